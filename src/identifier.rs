//! Short human-readable identifiers for new cases.
//!
//! Layout: `<USER2><yyyymmddHHMM>_<FAMILY2><seq:04>`, e.g. `JD202403071530_SI0001`.
//! The timestamp is captured once per batch. Two runs by the same user within the same
//! minute can still produce the same identifier for subjects sharing a family-name prefix.

use chrono::NaiveDateTime;

const TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M";

/// Largest batch whose sequence still fits the four-digit suffix.
pub const MAX_BATCH_SIZE: usize = 9999;

/// First two characters of `name`, upper-cased, padded with `X` when shorter.
fn two_letter_prefix(name: &str) -> String {
    let mut prefix: String = name
        .trim()
        .chars()
        .filter(|c| !c.is_whitespace())
        .take(2)
        .flat_map(char::to_uppercase)
        .collect();
    while prefix.chars().count() < 2 {
        prefix.push('X');
    }
    prefix
}

/// Assigns identifiers in batch order. One generator per invocation; callers keep batches
/// within [`MAX_BATCH_SIZE`].
#[derive(Debug, Clone)]
pub struct IdentifierGenerator {
    user_prefix: String,
    timestamp: String,
    issued: u32,
}

impl IdentifierGenerator {
    pub fn new(user: &str, batch_time: NaiveDateTime) -> Self {
        Self {
            user_prefix: two_letter_prefix(user),
            timestamp: batch_time.format(TIMESTAMP_FORMAT).to_string(),
            issued: 0,
        }
    }

    /// Identifier for the next row of the batch.
    pub fn next_for(&mut self, family_name: &str) -> String {
        self.issued += 1;
        format!(
            "{}{}_{}{:04}",
            self.user_prefix,
            self.timestamp,
            two_letter_prefix(family_name),
            self.issued
        )
    }
}
