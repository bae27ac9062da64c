//! Marker tags
//!
//! A tag is 32 random base-32 digits (160 bits), so two runs never look
//! for the same line.

use rand::Rng;

const TAG_LEN: usize = 32;
const ALPHABET: &[u8; 32] = b"0123456789abcdefghijklmnopqrstuv";

/// Generate a fresh marker tag
pub fn generate_tag() -> String {
    let mut rng = rand::thread_rng();
    (0..TAG_LEN)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect()
}

/// Log line emitted on the sender
pub fn marker_message(sender_address: &str, tag: &str) -> String {
    format!("Checking remote logging: {} {}", sender_address, tag)
}
