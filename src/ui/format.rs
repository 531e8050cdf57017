//! Text formatting and validation.

use regex::Regex;
use std::sync::LazyLock;

static HEX_COLOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^#([A-Fa-f0-9]{6}|[A-Fa-f0-9]{3})$").expect("static regex"));

/// US-dollar amount with thousands separators and two decimals, e.g. `$1,234.50`.
pub fn format_price(amount: f64) -> String {
    if amount.is_nan() {
        return "$NaN".into();
    }
    if amount.is_infinite() {
        return if amount < 0.0 { "-$∞".into() } else { "$∞".into() };
    }

    let cents = (amount.abs() * 100.0).round() as u128;
    let (dollars, cents) = (cents / 100, cents % 100);
    let sign = if amount < 0.0 && (dollars, cents) != (0, 0) { "-" } else { "" };
    format!("{sign}${}.{cents:02}", group_thousands(dollars))
}

fn group_thousands(value: u128) -> String {
    let digits = value.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

/// Neutralize markup-significant characters so `text` renders literally.
pub fn escape_text(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

/// `#RGB` or `#RRGGBB`, hex digits in either case.
pub fn is_valid_hex_color(value: &str) -> bool {
    HEX_COLOR.is_match(value)
}
