//! Passphrase validation and a rough strength label.

use crate::error::{Result, VaultError};

/// Minimum passphrase length in characters.
pub const MIN_PASSPHRASE_LENGTH: usize = 12;

/// Validate passphrase meets minimum security requirements.
///
/// Length is counted in characters, not bytes, so multi-byte passphrases are
/// not penalised.
///
/// # Examples
///
/// ```
/// use vault_core::crypto::validate_passphrase;
///
/// assert!(validate_passphrase("correct-horse-battery-staple-123").is_ok());
/// assert!(validate_passphrase("short").is_err());
/// ```
pub fn validate_passphrase(passphrase: &str) -> Result<()> {
    if passphrase.trim().is_empty() {
        return Err(VaultError::Validation(
            "Passphrase cannot be empty".to_string(),
        ));
    }

    let length = passphrase.chars().count();
    if length < MIN_PASSPHRASE_LENGTH {
        return Err(VaultError::Validation(format!(
            "Passphrase must be at least {} characters (got {})",
            MIN_PASSPHRASE_LENGTH, length
        )));
    }

    Ok(())
}

/// Coarse passphrase strength shown to the user at init time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strength {
    Weak,
    Moderate,
    Strong,
}

impl Strength {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strength::Weak => "WEAK",
            Strength::Moderate => "MODERATE",
            Strength::Strong => "STRONG",
        }
    }
}

/// Grade a passphrase by length and character-class variety.
pub fn passphrase_strength(passphrase: &str) -> Strength {
    let length = passphrase.chars().count();
    let variety = [
        passphrase.chars().any(char::is_uppercase),
        passphrase.chars().any(char::is_lowercase),
        passphrase.chars().any(|c| c.is_ascii_digit()),
        passphrase.chars().any(|c| !c.is_alphanumeric()),
    ]
    .iter()
    .filter(|present| **present)
    .count();

    if length >= 20 && variety >= 3 {
        Strength::Strong
    } else if length >= 16 && variety >= 2 {
        Strength::Moderate
    } else {
        Strength::Weak
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_passphrase() {
        assert!(validate_passphrase("correct-horse-battery-staple-123").is_ok());
        assert!(validate_passphrase("exactly12chr").is_ok());
    }

    #[test]
    fn test_short_passphrase_rejected() {
        let err = validate_passphrase("elevenchars").unwrap_err();
        assert!(matches!(err, VaultError::Validation(_)));
    }

    #[test]
    fn test_whitespace_passphrase_rejected() {
        assert!(validate_passphrase("               ").is_err());
        assert!(validate_passphrase("").is_err());
    }

    #[test]
    fn test_length_counts_characters() {
        // 12 characters, 24 bytes
        assert!(validate_passphrase("ääääääääääää").is_ok());
        assert!(validate_passphrase("äääää").is_err());
    }

    #[test]
    fn test_strength_labels() {
        assert_eq!(passphrase_strength("aaaaaaaaaaaa"), Strength::Weak);
        assert_eq!(passphrase_strength("abcdefgh12345678"), Strength::Moderate);
        assert_eq!(
            passphrase_strength("Correct-Horse-Battery-9"),
            Strength::Strong
        );
    }
}
