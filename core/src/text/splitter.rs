//! Capacity-aware splitting of a normalized sentence.
//!
//! Lengths are counted in characters, not bytes: the capacity limit describes how
//! many symbols the acoustic model accepts in one invocation.

/// Split `segment` into sub-segments of at most `max_len` characters.
///
/// Each cut is made at the last whitespace inside the next `max_len` characters so the
/// separator travels with the following sub-segment. A window without usable whitespace
/// is cut hard at `max_len`. The final remainder is always emitted, so concatenating
/// the result reproduces `segment` exactly.
///
/// A `max_len` of zero is treated as one.
pub fn split_segment(segment: &str, max_len: usize) -> Vec<String> {
    let max_len = max_len.max(1);
    let mut parts = Vec::new();
    let mut rest = segment;

    // `nth(max_len)` exists only while the remainder is longer than the limit
    while let Some((limit, _)) = rest.char_indices().nth(max_len) {
        let window = &rest[..limit];
        let cut = match window.rfind(char::is_whitespace) {
            // a separator at position 0 would emit an empty part and never advance
            Some(idx) if idx > 0 => idx,
            _ => limit,
        };
        parts.push(rest[..cut].to_string());
        rest = &rest[cut..];
    }
    parts.push(rest.to_string());

    parts
}
