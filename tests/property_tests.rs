/// Property-based tests using proptest
/// Tests invariants and properties that should hold for all inputs
use proptest::prelude::*;
use rust_inbound_api::extractor::parse_profit;
use rust_inbound_api::normalize::{normalize_phone, split_name};
use serde_json::json;

// Property: phone normalization should never panic and be idempotent
proptest! {
    #[test]
    fn normalize_phone_never_panics(phone in "\\PC*") {
        let _ = normalize_phone(&phone);
    }

    #[test]
    fn normalize_phone_is_idempotent(phone in "\\PC*") {
        let once = normalize_phone(&phone);
        prop_assert_eq!(normalize_phone(&once), once);
    }

    #[test]
    fn digit_bearing_input_yields_plus_then_digits(digits in "[0-9]{1,20}") {
        let normalized = normalize_phone(&digits);
        prop_assert!(normalized.starts_with('+'));
        prop_assert!(normalized[1..].chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn ten_digit_numbers_get_us_country_code(digits in "[2-9][0-9]{9}") {
        let normalized = normalize_phone(&digits);
        prop_assert_eq!(normalized, format!("+1{}", digits));
    }

    #[test]
    fn formatting_characters_do_not_change_result(
        digits in "[0-9]{10}",
        use_parens in proptest::bool::ANY,
        use_dashes in proptest::bool::ANY
    ) {
        let formatted = if use_parens && use_dashes {
            format!("({}) {}-{}", &digits[..3], &digits[3..6], &digits[6..])
        } else if use_parens {
            format!("({}) {}", &digits[..3], &digits[3..])
        } else if use_dashes {
            format!("{}-{}-{}", &digits[..3], &digits[3..6], &digits[6..])
        } else {
            digits.clone()
        };
        prop_assert_eq!(normalize_phone(&formatted), normalize_phone(&digits));
    }
}

// Property: name splitting should never panic and keep its shape
proptest! {
    #[test]
    fn split_name_never_panics(name in "\\PC*") {
        let _ = split_name(&name);
    }

    #[test]
    fn first_part_contains_no_whitespace(name in "\\PC{0,120}") {
        let (first, _) = split_name(&name);
        prop_assert!(!first.chars().any(char::is_whitespace));
    }

    #[test]
    fn parts_are_bounded(name in "\\PC{0,600}") {
        let (first, last) = split_name(&name);
        prop_assert!(first.chars().count() <= 255);
        prop_assert!(last.chars().count() <= 255);
    }

    #[test]
    fn single_token_has_empty_last(token in "[A-Za-z]{1,40}") {
        let (first, last) = split_name(&token);
        prop_assert_eq!(first, token);
        prop_assert_eq!(last, "");
    }
}

// Property: profit coercion degrades, never errors
proptest! {
    #[test]
    fn profit_parse_never_panics(s in "\\PC*") {
        let _ = parse_profit(&json!(s));
    }

    #[test]
    fn numeric_profit_passes_through(n in 0u32..100_000_000) {
        prop_assert_eq!(parse_profit(&json!(n)), Some(n as f64));
    }

    #[test]
    fn currency_formatting_is_stripped(n in 1u32..1_000_000) {
        let with_symbols = format!("${}", n);
        prop_assert_eq!(parse_profit(&json!(with_symbols)), Some(n as f64));
    }

    #[test]
    fn thousands_separators_are_stripped(head in 1u32..999, tail in 0u32..1000) {
        let formatted = format!("${},{:03}", head, tail);
        let expected = (head as f64) * 1000.0 + tail as f64;
        prop_assert_eq!(parse_profit(&json!(formatted)), Some(expected));
    }
}
