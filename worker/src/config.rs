use std::path::Path;
use std::str::FromStr;

use tracing::debug;

/// Broker connection and topology settings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MqConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub exchange: String,
    /// Heartbeat interval in seconds
    pub heartbeat: u16,
    pub connection_name: String,
    /// Consumer priority passed as `x-priority` on `basic.consume`
    pub x_priority: i32,
    /// Idle queue expiry in milliseconds, passed as `x-expires`
    pub x_expires: u32,
}

impl Default for MqConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5672,
            username: "guest".to_string(),
            password: "guest".to_string(),
            exchange: "text-to-speech".to_string(),
            heartbeat: 60,
            connection_name: "TTS worker".to_string(),
            x_priority: 0,
            x_expires: 60000,
        }
    }
}

impl MqConfig {
    /// Read `MQ_*` variables from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; unset or unparsable values keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            host: lookup("MQ_HOST").unwrap_or(defaults.host),
            port: parsed(&lookup, "MQ_PORT").unwrap_or(defaults.port),
            username: lookup("MQ_USERNAME").unwrap_or(defaults.username),
            password: lookup("MQ_PASSWORD").unwrap_or(defaults.password),
            exchange: lookup("MQ_EXCHANGE").unwrap_or(defaults.exchange),
            heartbeat: parsed(&lookup, "MQ_HEARTBEAT").unwrap_or(defaults.heartbeat),
            connection_name: lookup("MQ_CONNECTION_NAME").unwrap_or(defaults.connection_name),
            x_priority: parsed(&lookup, "MQ_X_PRIORITY").unwrap_or(defaults.x_priority),
            x_expires: parsed(&lookup, "MQ_X_EXPIRES").unwrap_or(defaults.x_expires),
        }
    }
}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    lookup(key).and_then(|v| v.trim().parse().ok())
}

/// Load a dotenv file into the process environment. A missing file is not an error;
/// variables already set in the environment win.
pub fn load_env_file(path: impl AsRef<Path>) -> bool {
    let path = path.as_ref();
    match dotenvy::from_path(path) {
        Ok(()) => {
            debug!(target: "consumer", path = %path.display(), "Loaded environment file");
            true
        }
        Err(e) => {
            debug!(target: "consumer", path = %path.display(), error = %e, "Environment file not loaded");
            false
        }
    }
}
