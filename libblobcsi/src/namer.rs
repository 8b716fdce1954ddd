//! Container name derivation.
//!
//! A container name must be a valid DNS label: lowercase letters, digits and
//! single dashes, starting and ending with a letter or digit, 3 to 63
//! characters long. [`normalize`] never fails; a requested name that cannot
//! be coerced into that shape is replaced by a generated one.

use tracing::warn;

use crate::types::Protocol;

pub const CONTAINER_NAME_MIN_LENGTH: usize = 3;
pub const CONTAINER_NAME_MAX_LENGTH: usize = 63;

/// Derive a valid container name from a requested volume name.
pub fn normalize(requested: &str, protocol: Protocol) -> String {
    let mut name: String = requested
        .to_lowercase()
        .chars()
        .take(CONTAINER_NAME_MAX_LENGTH)
        .collect();

    if !begins_and_ends_alphanumeric(&name)
        || name.len() < CONTAINER_NAME_MIN_LENGTH
        || !name.chars().all(is_allowed_char)
    {
        let generated = generate_name(&format!("pvc-{protocol}"), CONTAINER_NAME_MAX_LENGTH);
        warn!(
            requested,
            generated = %generated,
            "requested volume name is invalid, regenerated"
        );
        name = generated;
    }

    collapse_dashes(&name)
}

fn is_alphanumeric_lower(c: char) -> bool {
    c.is_ascii_lowercase() || c.is_ascii_digit()
}

fn is_allowed_char(c: char) -> bool {
    is_alphanumeric_lower(c) || c == '-'
}

fn begins_and_ends_alphanumeric(name: &str) -> bool {
    match (name.chars().next(), name.chars().last()) {
        (Some(first), Some(last)) => is_alphanumeric_lower(first) && is_alphanumeric_lower(last),
        _ => false,
    }
}

/// `<prefix>-<uuid>`, with the prefix shortened when the result would
/// exceed `max_len`.
fn generate_name(prefix: &str, max_len: usize) -> String {
    let id = uuid::Uuid::new_v4().to_string();
    let room = max_len.saturating_sub(id.len() + 1);
    let prefix: String = prefix.chars().take(room).collect();
    let prefix = prefix.trim_end_matches('-');
    if prefix.is_empty() {
        id
    } else {
        format!("{prefix}-{id}")
    }
}

fn collapse_dashes(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        if c == '-' && out.ends_with('-') {
            continue;
        }
        out.push(c);
    }
    out
}
