/// A year option split into model year and fuel code, e.g. `"2014-1"`.
#[derive(Debug, Clone, PartialEq)]
pub struct YearCode {
    pub code: String,
    pub year: i32,
    pub fuel: String,
}

impl YearCode {
    /// Model year as the price endpoint expects it.
    pub fn model_year(&self) -> &str {
        self.code.get(..self.code.len().saturating_sub(2)).unwrap_or_default()
    }
}

/// Splits a raw year code. The last character is the fuel code and the part
/// before the separator is the year; returns `None` when either is missing.
pub fn parse_year_code(raw: &str) -> Option<YearCode> {
    let raw = raw.trim();
    if raw.len() < 3 || !raw.is_ascii() {
        return None;
    }
    let (year_part, fuel) = (&raw[..raw.len() - 2], &raw[raw.len() - 1..]);
    let year = year_part.parse().ok()?;

    Some(YearCode {
        code: raw.to_string(),
        year,
        fuel: fuel.to_string(),
    })
}

/// Keeps the year codes that can be priced, in order.
pub fn normalize_years<'a>(raw: impl IntoIterator<Item = &'a str>) -> Vec<YearCode> {
    raw.into_iter().filter_map(parse_year_code).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_year_and_fuel() {
        let code = parse_year_code("2014-1").unwrap();
        assert_eq!(code.year, 2014);
        assert_eq!(code.fuel, "1");
        assert_eq!(code.model_year(), "2014");

        let new = parse_year_code("32000-3").unwrap();
        assert_eq!(new.year, 32000);
        assert_eq!(new.fuel, "3");
    }

    #[test]
    fn rejects_short_and_non_numeric_codes() {
        assert_eq!(parse_year_code(""), None);
        assert_eq!(parse_year_code("1-"), None);
        assert_eq!(parse_year_code("abcd-1"), None);
        assert_eq!(parse_year_code("ano-ç"), None);
    }

    #[test]
    fn normalize_keeps_order_and_drops_invalid() {
        let years = normalize_years(["32000-1", "xx", "2020-2"]);
        let codes: Vec<&str> = years.iter().map(|y| y.code.as_str()).collect();
        assert_eq!(codes, vec!["32000-1", "2020-2"]);
    }
}
