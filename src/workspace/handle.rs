//! Workspace handle generation

use petname::{Generator, Petnames};

use crate::workspace::error::{Result, WorkshedError};

/// Generate a petname handle (e.g. `warmly-brave-otter`) not rejected by
/// `taken`, retrying up to `max_attempts` times.
pub fn generate_handle(
    words: u8,
    max_attempts: u32,
    taken: impl Fn(&str) -> bool,
) -> Result<String> {
    let petnames = Petnames::default();
    for _ in 0..max_attempts {
        let Some(candidate) = petnames.generate_one(words.max(1), "-") else {
            continue;
        };
        if !taken(&candidate) {
            return Ok(candidate);
        }
    }
    Err(WorkshedError::HandleExhausted(max_attempts))
}

/// Handles become directory names: lowercase alphanumerics and inner dashes only
pub fn is_valid_handle(handle: &str) -> bool {
    !handle.is_empty()
        && handle.len() <= 64
        && !handle.starts_with('-')
        && !handle.ends_with('-')
        && handle
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}
