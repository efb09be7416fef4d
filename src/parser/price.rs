use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use rust_decimal::Decimal;

static NON_PRICE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^\d.]").unwrap());

/// Parse a displayed price into a non-negative decimal.
///
/// Everything except ASCII digits and `.` is dropped before parsing; empty or
/// malformed text yields zero instead of an error.
pub fn parse_price(text: &str) -> Decimal {
    let cleaned = NON_PRICE_RE.replace_all(text, "");
    if cleaned.is_empty() {
        return Decimal::ZERO;
    }
    Decimal::from_str(&cleaned).unwrap_or(Decimal::ZERO)
}

// ── Tests ──
