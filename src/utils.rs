// Price text conversion and percentage deltas
use crate::model::{NOT_AVAILABLE, ParseError};

const CURRENCY_SYMBOL: &str = "R$";

/// Converts a localized price such as `"R$ 123.456,78"` into `123456.78`.
///
/// The currency symbol is removed first, then `.` thousands separators, and
/// finally the `,` decimal separator becomes `.`.
pub fn parse_price(text: &str) -> Result<f64, ParseError> {
    if text.is_empty() {
        return Err(ParseError::Empty);
    }
    let cleaned = text
        .replace(CURRENCY_SYMBOL, "")
        .replace('.', "")
        .replace(',', ".");
    let cleaned = cleaned.trim();

    match cleaned.parse::<f64>() {
        Ok(price) if price.is_finite() => Ok(price),
        _ => Err(ParseError::Invalid(text.to_string())),
    }
}

/// Renders a value as `"R$ 1.234,56"`; NaN and infinities become `"N/A"`.
pub fn format_price(value: f64) -> String {
    if !value.is_finite() {
        return NOT_AVAILABLE.to_string();
    }
    let fixed = format!("{:.2}", value.abs());
    let (int_part, frac_part) = fixed.split_once('.').unwrap_or((fixed.as_str(), "00"));

    let digits: Vec<char> = int_part.chars().collect();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, digit) in digits.iter().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push('.');
        }
        grouped.push(*digit);
    }

    let sign = if value < 0.0 && !fixed.trim_start_matches(['0', '.']).is_empty() {
        "-"
    } else {
        ""
    };
    format!("{} {}{},{}", CURRENCY_SYMBOL, sign, grouped, frac_part)
}

/// Relative change of `v1` against `v2` in percent: `((v1 / v2) - 1) * 100`.
///
/// Returns `None` when `v2` is zero or either input is NaN or infinite.
/// Every dashboard delta goes through here.
pub fn percentage_diff(v1: f64, v2: f64) -> Option<f64> {
    if v2 == 0.0 || !v1.is_finite() || !v2.is_finite() {
        return None;
    }
    Some(((v1 / v2) - 1.0) * 100.0)
}

/// Parses a required numeric request parameter.
pub fn parse_code(name: &str, raw: Option<&str>) -> Result<i32, String> {
    let raw = raw
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| format!("parameter '{}' is required", name))?;
    raw.parse::<i32>()
        .map_err(|_| format!("parameter '{}' is invalid: '{}'", name, raw))
}
