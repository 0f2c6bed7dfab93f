//! Cameroonian phone numbers, stored in E.164 form (`+237` and nine digits).

use thiserror::Error;

pub const COUNTRY_PREFIX: &str = "+237";
const LOCAL_LEN: usize = 9;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PhoneError {
    #[error("phone number is empty")]
    Empty,
    #[error("invalid phone number '{0}'")]
    Invalid(String),
}

/// Normalizes user input to `+237XXXXXXXXX`.
///
/// Accepted shapes, ignoring spaces, dashes, dots and parentheses:
/// - nine local digits starting with 6 (mobile) or 2 (fixed line),
/// - `237` followed by nine digits,
/// - `+237` followed by nine digits (returned unchanged).
pub fn normalize_phone(raw: &str) -> Result<String, PhoneError> {
    let compact: String = raw
        .chars()
        .filter(|c| !(c.is_whitespace() || matches!(c, '-' | '.' | '(' | ')')))
        .collect();

    if compact.is_empty() {
        return Err(PhoneError::Empty);
    }

    if let Some(rest) = compact.strip_prefix(COUNTRY_PREFIX) {
        return if is_digits(rest, LOCAL_LEN) {
            Ok(compact)
        } else {
            Err(PhoneError::Invalid(raw.trim().to_string()))
        };
    }

    // A local fixed line may itself start with 237, so check the local shape first.
    if is_digits(&compact, LOCAL_LEN) && compact.starts_with(['6', '2']) {
        return Ok(format!("{COUNTRY_PREFIX}{compact}"));
    }

    match compact.strip_prefix("237") {
        Some(rest) if is_digits(rest, LOCAL_LEN) => Ok(format!("{COUNTRY_PREFIX}{rest}")),
        _ => Err(PhoneError::Invalid(raw.trim().to_string())),
    }
}

/// Sign-in identifiers without an `@` are treated as phone numbers.
pub fn looks_like_phone(identifier: &str) -> bool {
    !identifier.contains('@')
}

fn is_digits(s: &str, len: usize) -> bool {
    s.len() == len && s.bytes().all(|b| b.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_mobile_and_fixed_numbers_get_prefix() {
        assert_eq!(normalize_phone("699123456").unwrap(), "+237699123456");
        assert_eq!(normalize_phone("233456789").unwrap(), "+237233456789");
        assert_eq!(normalize_phone("237123456").unwrap(), "+237237123456");
    }

    #[test]
    fn prefixed_number_is_unchanged() {
        assert_eq!(normalize_phone("+237699123456").unwrap(), "+237699123456");
    }

    #[test]
    fn country_code_without_plus_is_completed() {
        assert_eq!(normalize_phone("237 6 99 12 34 56").unwrap(), "+237699123456");
    }

    #[test]
    fn separators_are_ignored() {
        assert_eq!(normalize_phone(" 699-12.34 56 ").unwrap(), "+237699123456");
        assert_eq!(normalize_phone("(+237) 699 123 456").unwrap(), "+237699123456");
    }

    #[test]
    fn invalid_patterns_fail() {
        assert_eq!(normalize_phone("   "), Err(PhoneError::Empty));
        // wrong leading digit for a local number
        assert!(normalize_phone("599123456").is_err());
        // too short / too long
        assert!(normalize_phone("69912345").is_err());
        assert!(normalize_phone("6991234567").is_err());
        assert!(normalize_phone("+23769912345").is_err());
        // another country
        assert!(normalize_phone("+33612345678").is_err());
        assert!(normalize_phone("69912345a").is_err());
    }

    #[test]
    fn identifiers_with_at_sign_are_emails() {
        assert!(looks_like_phone("699123456"));
        assert!(!looks_like_phone("awa@example.cm"));
    }
}
