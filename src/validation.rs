//! Validation of user-supplied names and sanitisation of text lines read off the link.

use thiserror::Error;

/// Channel names longer than this do not fit the radio's channel record.
pub const MAX_CHANNEL_NAME_LEN: usize = 31;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NameError {
    #[error("name is empty")]
    Empty,

    #[error("name is too long (maximum {max} bytes)")]
    TooLong { max: usize },

    #[error("name contains control characters")]
    ControlCharacters,

    #[error("name cannot start or end with whitespace")]
    InvalidWhitespace,
}

/// Channel names: non-empty, no control characters, no surrounding whitespace.
/// A leading `#` is allowed (`#weather`).
pub fn validate_channel_name(name: &str) -> Result<(), NameError> {
    validate_name(name, MAX_CHANNEL_NAME_LEN)
}

/// Session identifier sent in the init command.
pub fn validate_node_name(name: &str) -> Result<(), NameError> {
    validate_name(name, crate::meshcore::protocol::MAX_APP_NAME_LEN)
}

fn validate_name(name: &str, max: usize) -> Result<(), NameError> {
    if name.is_empty() {
        return Err(NameError::Empty);
    }
    if name.len() > max {
        return Err(NameError::TooLong { max });
    }
    if name.chars().any(char::is_control) {
        return Err(NameError::ControlCharacters);
    }
    if name.trim() != name {
        return Err(NameError::InvalidWhitespace);
    }
    Ok(())
}

/// Decode the HTML entities some serial bridges wrap around text (`&gt;`, `&#123;`, ...).
/// Unknown or malformed entities are left untouched.
pub fn decode_html_entities(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let tail = &rest[amp..];
        match tail.find(';').filter(|&end| end <= 10) {
            Some(end) => match decode_entity(&tail[1..end]) {
                Some(ch) => {
                    out.push(ch);
                    rest = &tail[end + 1..];
                }
                None => {
                    out.push('&');
                    rest = &tail[1..];
                }
            },
            None => {
                out.push('&');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

fn decode_entity(name: &str) -> Option<char> {
    match name {
        "lt" => Some('<'),
        "gt" => Some('>'),
        "amp" => Some('&'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        "nbsp" => Some('\u{a0}'),
        _ => {
            let num = name.strip_prefix('#')?;
            let code = match num.strip_prefix('x').or_else(|| num.strip_prefix('X')) {
                Some(hex) => u32::from_str_radix(hex, 16).ok()?,
                None => num.parse::<u32>().ok()?,
            };
            char::from_u32(code)
        }
    }
}

/// Drop control characters (including CR/LF) and the replacement character left by
/// lossy UTF-8 decoding.
pub fn strip_non_printable(input: &str) -> String {
    input
        .chars()
        .filter(|c| !c.is_control() && *c != char::REPLACEMENT_CHARACTER)
        .collect()
}

/// Only `{...}` lines are worth handing to the JSON parser.
pub fn is_json_candidate(line: &str) -> bool {
    line.starts_with('{') && line.ends_with('}')
}
