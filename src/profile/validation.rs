//! Field validation for profile edits.
//!
//! Usernames:
//! - Length: 3-30 characters
//! - Characters: lowercase letters, digits, `_` and `.`
//! - Stored lowercased; uniqueness is checked against the stores, not here

use url::Url;

use crate::error::{Result, SyncError};

pub const MIN_USERNAME_LENGTH: usize = 3;
pub const MAX_USERNAME_LENGTH: usize = 30;
pub const MAX_BIO_CHARS: usize = 500;
pub const MAX_DISPLAY_NAME_CHARS: usize = 50;

pub fn validate_username(username: &str) -> Result<()> {
    let len = username.chars().count();
    if !(MIN_USERNAME_LENGTH..=MAX_USERNAME_LENGTH).contains(&len) {
        return Err(SyncError::Validation(format!(
            "username must be {}-{} characters, got {}",
            MIN_USERNAME_LENGTH, MAX_USERNAME_LENGTH, len
        )));
    }
    if !username.chars().all(is_username_char) {
        return Err(SyncError::Validation(format!(
            "username '{}' may only contain a-z, 0-9, '_' and '.'",
            username
        )));
    }
    Ok(())
}

pub fn validate_bio(bio: &str) -> Result<()> {
    let len = bio.chars().count();
    if len > MAX_BIO_CHARS {
        return Err(SyncError::Validation(format!(
            "bio exceeds {} characters ({})",
            MAX_BIO_CHARS, len
        )));
    }
    Ok(())
}

pub fn validate_display_name(name: &str) -> Result<()> {
    let len = name.chars().count();
    if len > MAX_DISPLAY_NAME_CHARS {
        return Err(SyncError::Validation(format!(
            "display name exceeds {} characters ({})",
            MAX_DISPLAY_NAME_CHARS, len
        )));
    }
    Ok(())
}

/// Links must be absolute http(s) URLs.
pub fn validate_link(link: &str) -> Result<()> {
    let parsed = Url::parse(link)
        .map_err(|e| SyncError::Validation(format!("invalid URL '{}': {}", link, e)))?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(SyncError::Validation(format!(
            "unsupported URL scheme '{}' in '{}'",
            other, link
        ))),
    }
}

pub fn validate_email(email: &str) -> Result<()> {
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') => Ok(()),
        _ => Err(SyncError::Validation(format!("invalid email '{}'", email))),
    }
}

/// Derive a starting username from an email's local part.
///
/// Returns an empty string when nothing usable remains.
pub fn username_from_email(email: &str) -> String {
    let local = email.split('@').next().unwrap_or_default();
    let local = local.split('+').next().unwrap_or_default();
    let candidate: String = local
        .to_lowercase()
        .chars()
        .filter(|c| is_username_char(*c))
        .take(MAX_USERNAME_LENGTH)
        .collect();

    if candidate.chars().count() < MIN_USERNAME_LENGTH {
        String::new()
    } else {
        candidate
    }
}

#[inline]
fn is_username_char(c: char) -> bool {
    c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '.'
}
