use sha2::{Digest, Sha256};

/// Queue and routing keys a worker binds to, derived from the speakers it serves.
///
/// Workers serving the same speaker set share one queue; any other set gets its own.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Topology {
    pub exchange: String,
    pub queue_name: String,
    /// `<exchange>.<speaker>`, sorted
    pub routing_keys: Vec<String>,
}

impl Topology {
    pub fn derive<S: AsRef<str>>(exchange: &str, model_name: &str, speakers: &[S]) -> Self {
        let mut routing_keys: Vec<String> = speakers
            .iter()
            .map(|speaker| format!("{exchange}.{}", speaker.as_ref()))
            .collect();
        routing_keys.sort();
        routing_keys.dedup();

        let digest = Sha256::digest(list_repr(&routing_keys).as_bytes());
        let hash: String = digest
            .iter()
            .take(4)
            .map(|byte| format!("{:02x}", byte))
            .collect();

        Self {
            exchange: exchange.to_string(),
            queue_name: format!("{exchange}.{model_name}_{hash}"),
            routing_keys,
        }
    }
}

/// Render a string list the way Python's `str(list)` does (`['a', 'b']`). Queue names of
/// existing deployments are hashed from this form.
fn list_repr(items: &[String]) -> String {
    let quoted: Vec<String> = items.iter().map(|item| str_repr(item)).collect();
    format!("[{}]", quoted.join(", "))
}

fn str_repr(value: &str) -> String {
    let quote = if value.contains('\'') && !value.contains('"') {
        '"'
    } else {
        '\''
    };
    let mut out = String::with_capacity(value.len() + 2);
    out.push(quote);
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c => out.push(c),
        }
    }
    out.push(quote);
    out
}
