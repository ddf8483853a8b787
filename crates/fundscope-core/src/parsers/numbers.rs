//! Locale-tolerant numeric parsing for values printed in disclosure tables.

const CURRENCY_CODES: [&str; 6] = ["EUR", "USD", "GBP", "CHF", "JPY", "SEK"];

/// Parses numbers such as `1 234 567,89`, `1.234.567,89`, `1,234,567.89`,
/// `(1 234,50)`, `12,5 %`, `€ 1.000` or `1'000.50`.
///
/// A lone comma followed by exactly three digits (`1,000`, `12,500`) groups
/// thousands; any other lone comma is a decimal separator. When commas and
/// dots both appear, the rightmost one is the decimal separator. Parenthesized or trailing-minus
/// values are negative.
pub fn parse_number(raw: &str) -> Option<f64> {
    let mut text = raw.trim().to_uppercase();
    if text.is_empty() {
        return None;
    }

    let mut negative = false;
    if text.starts_with('(') && text.ends_with(')') {
        negative = true;
        text = text[1..text.len() - 1].to_owned();
    }

    for code in CURRENCY_CODES {
        text = text.replace(code, "");
    }

    let mut cleaned: String = text
        .chars()
        .filter(|ch| !ch.is_whitespace() && !matches!(ch, '\'' | '’' | '%' | '€' | '$' | '£'))
        .map(|ch| if ch == '−' { '-' } else { ch })
        .collect();

    if let Some(stripped) = cleaned.strip_suffix('-') {
        negative = !negative;
        cleaned = stripped.to_owned();
    }
    if let Some(stripped) = cleaned.strip_prefix('-') {
        negative = !negative;
        cleaned = stripped.to_owned();
    } else if let Some(stripped) = cleaned.strip_prefix('+') {
        cleaned = stripped.to_owned();
    }

    let normalized = normalize_separators(&cleaned);
    if normalized.is_empty() || !normalized.chars().all(|ch| ch.is_ascii_digit() || ch == '.') {
        return None;
    }

    let value = normalized.parse::<f64>().ok().filter(|v| v.is_finite())?;
    Some(if negative { -value } else { value })
}

fn normalize_separators(text: &str) -> String {
    let commas = text.matches(',').count();
    let dots = text.matches('.').count();

    match (commas, dots) {
        (0, 0) | (0, 1) => text.to_owned(),
        (1, 0) if groups_thousands(text) => text.replace(',', ""),
        (1, 0) => text.replace(',', "."),
        (_, 0) => text.replace(',', ""),
        (0, _) => text.replace('.', ""),
        _ => {
            let last_comma = text.rfind(',').unwrap_or(0);
            let last_dot = text.rfind('.').unwrap_or(0);
            if last_comma > last_dot {
                text.replace('.', "").replace(',', ".")
            } else {
                text.replace(',', "")
            }
        }
    }
}

/// `1,000` but not `0,125`, `12,5` or `1,2500`.
fn groups_thousands(text: &str) -> bool {
    let Some((whole, fraction)) = text.split_once(',') else {
        return false;
    };
    fraction.len() == 3
        && fraction.chars().all(|ch| ch.is_ascii_digit())
        && (1..=3).contains(&whole.len())
        && whole.chars().all(|ch| ch.is_ascii_digit())
        && whole != "0"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn european_separators() {
        assert_eq!(parse_number("1 234 567,89"), Some(1_234_567.89));
        assert_eq!(parse_number("1.234.567,89"), Some(1_234_567.89));
        assert_eq!(parse_number("1\u{a0}234,5"), Some(1_234.5));
        assert_eq!(parse_number("12,5"), Some(12.5));
    }

    #[test]
    fn anglo_separators() {
        assert_eq!(parse_number("1,234,567.89"), Some(1_234_567.89));
        assert_eq!(parse_number("1'000.50"), Some(1_000.5));
        assert_eq!(parse_number("0.25"), Some(0.25));
        assert_eq!(parse_number("1,000"), Some(1_000.0));
        assert_eq!(parse_number("12,500"), Some(12_500.0));
        assert_eq!(parse_number("12,500.25"), Some(12_500.25));
        assert_eq!(parse_number("(1,000)"), Some(-1_000.0));
    }

    #[test]
    fn lone_comma_without_three_digit_group_is_decimal() {
        assert_eq!(parse_number("1.234,5"), Some(1_234.5));
        assert_eq!(parse_number("0,125"), Some(0.125));
        assert_eq!(parse_number("1,2500"), Some(1.25));
        assert_eq!(parse_number("1234,567"), Some(1_234.567));
    }

    #[test]
    fn symbols_and_signs() {
        assert_eq!(parse_number("€ 1.000,00"), Some(1_000.0));
        assert_eq!(parse_number("12,5 %"), Some(12.5));
        assert_eq!(parse_number("(1 234,50)"), Some(-1_234.5));
        assert_eq!(parse_number("-3.5"), Some(-3.5));
        assert_eq!(parse_number("350-"), Some(-350.0));
        assert_eq!(parse_number("USD 10"), Some(10.0));
    }

    #[test]
    fn rejects_text() {
        assert_eq!(parse_number(""), None);
        assert_eq!(parse_number("n/a"), None);
        assert_eq!(parse_number("Total"), None);
        assert_eq!(parse_number("NS"), None);
    }
}
