//! Pure validation and sanitization predicates shared by every dispatch path.
//!
//! None of these touch storage or the network; they are deterministic
//! functions of their input so the connection handler can call them
//! before ever talking to the database.

use crate::constants::{
    CHANNEL_NAME_MAX_LEN, CHANNEL_NAME_MIN_LEN, MESSAGE_MAX_LEN, PASSWORD_MIN_LEN,
    USERNAME_MAX_LEN, USERNAME_MIN_LEN,
};

/// `Ok(())` or a human-readable rejection reason.
pub type ValidationResult = Result<(), String>;

pub fn validate_username(username: &str) -> ValidationResult {
    let trimmed = username.trim();
    if trimmed.is_empty() {
        return Err("Username cannot be empty.".into());
    }
    if trimmed.chars().count() < USERNAME_MIN_LEN || trimmed.chars().count() > USERNAME_MAX_LEN {
        return Err(format!(
            "Username must be between {USERNAME_MIN_LEN} and {USERNAME_MAX_LEN} characters."
        ));
    }
    if !trimmed.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err("Username may only contain letters, numbers, and underscores.".into());
    }
    Ok(())
}

pub fn validate_password(password: &str) -> ValidationResult {
    if password.len() < PASSWORD_MIN_LEN {
        return Err(format!(
            "Password must be at least {PASSWORD_MIN_LEN} characters."
        ));
    }
    Ok(())
}

pub fn validate_message_content(content: &str) -> ValidationResult {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return Err("Message cannot be empty.".into());
    }
    if trimmed.chars().count() > MESSAGE_MAX_LEN {
        return Err(format!(
            "Message must be at most {MESSAGE_MAX_LEN} characters."
        ));
    }
    Ok(())
}

pub fn validate_channel_name(name: &str) -> ValidationResult {
    let trimmed = name.trim().to_lowercase();
    if trimmed.is_empty() {
        return Err("Channel name cannot be empty.".into());
    }
    if trimmed.chars().count() < CHANNEL_NAME_MIN_LEN
        || trimmed.chars().count() > CHANNEL_NAME_MAX_LEN
    {
        return Err(format!(
            "Channel name must be between {CHANNEL_NAME_MIN_LEN} and {CHANNEL_NAME_MAX_LEN} characters."
        ));
    }
    if !trimmed.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-') {
        return Err("Channel name may only contain lowercase letters, numbers, and hyphens.".into());
    }
    Ok(())
}

/// Normalizes a channel name the way storage does: trimmed, lowercased.
pub fn normalize_channel_name(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Strips control characters (codepoint < 32) other than newline and tab.
/// Idempotent: re-sanitizing already-sanitized content is a no-op.
pub fn sanitize_content(content: &str) -> String {
    content
        .chars()
        .filter(|&c| c == '\n' || c == '\t' || (c as u32) >= 32)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn username_rejects_too_short() {
        assert!(validate_username("ab").is_err());
    }

    #[test]
    fn username_rejects_symbols() {
        assert!(validate_username("al-ice").is_err());
    }

    #[test]
    fn username_accepts_underscored_name() {
        assert!(validate_username("al_ice99").is_ok());
    }

    #[test]
    fn password_rejects_short() {
        assert!(validate_password("abc").is_err());
    }

    #[test]
    fn message_rejects_blank_after_trim() {
        assert!(validate_message_content("   \t  ").is_err());
    }

    #[test]
    fn message_rejects_over_limit() {
        let long = "a".repeat(MESSAGE_MAX_LEN + 1);
        assert!(validate_message_content(&long).is_err());
    }

    #[test]
    fn channel_name_rejects_uppercase_after_normalize_check() {
        // validated on the lowercased form, so mixed case that otherwise
        // matches the charset is accepted...
        assert!(validate_channel_name("Random-Stuff").is_ok());
    }

    #[test]
    fn channel_name_rejects_invalid_chars() {
        assert!(validate_channel_name("my_channel").is_err());
    }

    #[test]
    fn sanitize_strips_control_chars_but_keeps_newline_and_tab() {
        let input = "hi\x07there\nworld\t!\x01";
        assert_eq!(sanitize_content(input), "hithere\nworld\t!");
    }

    #[test]
    fn sanitize_is_idempotent() {
        let input = "hi\x07there\nworld\t!\x01";
        let once = sanitize_content(input);
        let twice = sanitize_content(&once);
        assert_eq!(once, twice);
    }
}
