use once_cell::sync::Lazy;
use regex::Regex;

use crate::db_types::OrderCode;

/// `ABO`, an 8-digit date and a 7-character suffix, e.g. `ABO20250101ABCDEFG`, standing on its own.
static STRICT_ORDER_CODE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:^|[^A-Z0-9])(ABO\d{8}[A-Z0-9]{7})(?:[^A-Z0-9]|$)").expect("strict order code pattern is valid")
});

/// A token starting with `ABO`, up to the first separator. Bank apps mangle descriptions in creative ways, and this
/// picks up codes that had text glued to their end or were truncated. `ABO` inside a word (`laboratory`) is not a code.
static LOOSE_ORDER_CODE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(?:^|[^A-Z0-9])(ABO[^\s\-_.,/:;|]+)").expect("loose order code pattern is valid"));

fn find_code<'a>(pattern: &Regex, description: &'a str) -> Option<&'a str> {
    pattern.captures(description).and_then(|c| c.get(1)).map(|m| m.as_str())
}

/// Extracts an order code from a free-text transfer description. The strict pattern is tried first. The result is
/// always upper-case.
pub fn extract_order_code(description: &str) -> Option<OrderCode> {
    find_code(&STRICT_ORDER_CODE, description)
        .or_else(|| find_code(&LOOSE_ORDER_CODE, description))
        .map(|code| OrderCode::from(code.to_ascii_uppercase()))
}
