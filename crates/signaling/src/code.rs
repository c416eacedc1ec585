//! Human-readable connection codes.
//!
//! A code names one session. It is short enough to read aloud and avoids
//! characters that are easy to confuse (`0`, `O`, `1`, `I`).

use rand::Rng;

/// Number of characters in a code.
pub const CODE_LENGTH: usize = 8;

/// Characters a code may contain.
pub const CODE_ALPHABET: &[u8] = b"23456789ABCDEFGHJKLMNPQRSTUVWXYZ";

/// Generates a random connection code.
pub fn generate_connection_code() -> String {
    let mut rng = rand::thread_rng();
    (0..CODE_LENGTH)
        .map(|_| CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char)
        .collect()
}

/// Checks length and alphabet of an unformatted code.
pub fn is_valid_connection_code(code: &str) -> bool {
    code.len() == CODE_LENGTH && code.bytes().all(|b| CODE_ALPHABET.contains(&b))
}

/// Formats a code as two groups of four (`"ABCD EFGH"`).
///
/// Anything that is not a valid code is returned unchanged.
pub fn format_connection_code(code: &str) -> String {
    if !is_valid_connection_code(code) {
        return code.to_string();
    }
    format!("{} {}", &code[..4], &code[4..])
}

/// Strips whitespace from a formatted code.
pub fn parse_connection_code(formatted: &str) -> String {
    formatted.chars().filter(|c| !c.is_whitespace()).collect()
}
