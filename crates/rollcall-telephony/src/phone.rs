//! Phone number normalization and validation
//!
//! Contacts are entered by hand at schools, so numbers arrive in every
//! shape: `024 123 4567`, `024-123-4567`, `+233241234567`, `233241234567`.

use once_cell::sync::Lazy;
use regex::Regex;

/// Ghanaian mobile numbers, local or international form
static GHANA_MOBILE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\+233|0)[2-5][0-9]{8}$").expect("phone pattern compiles"));

fn strip_separators(phone: &str) -> String {
    phone
        .chars()
        .filter(|c| !c.is_whitespace() && !matches!(c, '-' | '(' | ')' | '.'))
        .collect()
}

/// Normalize a number to E.164 (`+<country><subscriber>`)
///
/// A leading trunk `0` is replaced with `country_code`; a bare country
/// code gets its `+`.
///
/// ```
/// use rollcall_telephony::format_phone_number;
///
/// assert_eq!(format_phone_number("024 123 4567", "233"), "+233241234567");
/// assert_eq!(format_phone_number("233241234567", "233"), "+233241234567");
/// ```
pub fn format_phone_number(phone: &str, country_code: &str) -> String {
    let digits = strip_separators(phone);

    if digits.starts_with('+') {
        digits
    } else if let Some(local) = digits.strip_prefix('0') {
        format!("+{}{}", country_code, local)
    } else {
        format!("+{}", digits)
    }
}

/// Whether the number is a valid Ghanaian mobile number
pub fn validate_phone_number(phone: &str) -> bool {
    GHANA_MOBILE.is_match(&strip_separators(phone))
}
