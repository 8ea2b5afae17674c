//! Pure normalizers for lead names and phone numbers.
//!
//! GHL stores first/last name separately and its contact search generally
//! expects E.164 phones, so both conversions happen here, in one place,
//! before any payload is built. Neither function can fail: absence of
//! meaningful input yields an empty result.

/// Maximum length GHL accepts for a name part.
const MAX_NAME_LEN: usize = 255;

fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

/// Split a full name into (first, last) on the first whitespace run.
///
/// A single token yields `(token, "")`; empty input yields `("", "")`.
pub fn split_name(full_name: &str) -> (String, String) {
    let trimmed = full_name.trim();
    if trimmed.is_empty() {
        return (String::new(), String::new());
    }
    match trimmed.split_once(char::is_whitespace) {
        Some((first, rest)) => (
            truncate_chars(first, MAX_NAME_LEN),
            truncate_chars(rest.trim_start(), MAX_NAME_LEN),
        ),
        None => (truncate_chars(trimmed, MAX_NAME_LEN), String::new()),
    }
}

/// Best-effort E.164 normalization.
///
/// Strips every non-digit character, then: exactly 10 digits is assumed
/// US/Canada without country code and gets `+1`; 11 digits starting with `1`
/// gets `+`; any other digit count gets `+` verbatim. Digits are not checked
/// against a numbering plan.
pub fn normalize_phone(phone: &str) -> String {
    let digits: String = phone.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return String::new();
    }
    if digits.len() == 10 {
        return format!("+1{}", digits);
    }
    if digits.len() == 11 && digits.starts_with('1') {
        return format!("+{}", digits);
    }
    format!("+{}", digits)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_single_token() {
        assert_eq!(split_name("Jane"), ("Jane".to_string(), "".to_string()));
    }

    #[test]
    fn split_two_tokens() {
        assert_eq!(
            split_name("Jane Doe"),
            ("Jane".to_string(), "Doe".to_string())
        );
    }

    #[test]
    fn split_keeps_rest_together() {
        assert_eq!(
            split_name("Jane Doe Smith"),
            ("Jane".to_string(), "Doe Smith".to_string())
        );
    }

    #[test]
    fn split_empty_and_whitespace() {
        assert_eq!(split_name(""), (String::new(), String::new()));
        assert_eq!(split_name("   "), (String::new(), String::new()));
    }

    #[test]
    fn split_collapses_inner_whitespace_run() {
        assert_eq!(
            split_name("Jane\t  Doe"),
            ("Jane".to_string(), "Doe".to_string())
        );
    }

    #[test]
    fn split_truncates_long_parts() {
        let long = "x".repeat(300);
        let (first, last) = split_name(&long);
        assert_eq!(first.len(), 255);
        assert_eq!(last, "");
    }

    #[test]
    fn phone_ten_digits_gets_us_prefix() {
        assert_eq!(normalize_phone("555-123-4567"), "+15551234567");
        assert_eq!(normalize_phone("(555) 123 4567"), "+15551234567");
    }

    #[test]
    fn phone_eleven_digits_with_one() {
        assert_eq!(normalize_phone("1 555 123 4567"), "+15551234567");
        assert_eq!(normalize_phone("+1 (555) 123-4567"), "+15551234567");
    }

    #[test]
    fn phone_other_lengths_pass_through() {
        assert_eq!(normalize_phone("+44 20 7946 0958"), "+442079460958");
        assert_eq!(normalize_phone("12345"), "+12345");
    }

    #[test]
    fn phone_empty_or_digitless() {
        assert_eq!(normalize_phone(""), "");
        assert_eq!(normalize_phone("n/a"), "");
    }

    #[test]
    fn phone_is_idempotent() {
        for raw in ["555-123-4567", "15551234567", "+442079460958", "12345"] {
            let once = normalize_phone(raw);
            assert_eq!(normalize_phone(&once), once);
        }
    }
}
