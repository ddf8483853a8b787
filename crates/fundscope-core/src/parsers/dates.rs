//! Free-text date extraction for report titles and document headers.
//!
//! Recognised forms, tried in this order:
//!
//! | Form | Example |
//! |------|---------|
//! | day month-name year | `31 December 2023`, `30 juin 2024`, `31. März 2024` |
//! | month-name day, year | `June 30, 2024` |
//! | dotted | `31.12.2023` |
//! | ISO | `2023-12-31` |
//! | slashed (day first) | `31/12/2023` |
//! | year only (anchored variant) | `Annual report 2023` |

use std::sync::LazyLock;

use regex::Regex;
use time::{Date, Month};

static DAY_MONTH_YEAR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(\d{1,2})(?:st|nd|rd|th|er)?\.?\s+(\p{L}+)\.?\s+(\d{4})\b")
        .expect("date pattern is valid")
});
static MONTH_DAY_YEAR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(\p{L}+)\.?\s+(\d{1,2})(?:st|nd|rd|th)?,?\s+(\d{4})\b")
        .expect("date pattern is valid")
});
static DOTTED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(\d{1,2})\.(\d{1,2})\.(\d{4})\b").expect("date pattern is valid")
});
static ISO: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(\d{4})-(\d{2})-(\d{2})\b").expect("date pattern is valid"));
static SLASHED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(\d{1,2})/(\d{1,2})/(\d{4})\b").expect("date pattern is valid")
});
static YEAR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b((?:19|20)\d{2})\b").expect("date pattern is valid"));

/// Month names in English, French and German, including common abbreviations.
pub fn month_from_name(name: &str) -> Option<Month> {
    let lowered = name.trim().trim_end_matches('.').to_lowercase();
    let month = match lowered.as_str() {
        "january" | "jan" | "janvier" | "janv" | "januar" | "jänner" => Month::January,
        "february" | "feb" | "février" | "fevrier" | "févr" | "fevr" | "februar" => Month::February,
        "march" | "mar" | "mars" | "märz" | "maerz" | "mär" => Month::March,
        "april" | "apr" | "avril" | "avr" => Month::April,
        "may" | "mai" => Month::May,
        "june" | "jun" | "juin" | "juni" => Month::June,
        "july" | "jul" | "juillet" | "juil" | "juli" => Month::July,
        "august" | "aug" | "août" | "aout" => Month::August,
        "september" | "sep" | "sept" | "septembre" => Month::September,
        "october" | "oct" | "octobre" | "oktober" | "okt" => Month::October,
        "november" | "nov" | "novembre" => Month::November,
        "december" | "dec" | "décembre" | "decembre" | "déc" | "dezember" | "dez" => {
            Month::December
        }
        _ => return None,
    };
    Some(month)
}

fn build(year: &str, month: Month, day: &str) -> Option<Date> {
    let year = year.parse::<i32>().ok()?;
    let day = day.parse::<u8>().ok()?;
    Date::from_calendar_date(year, month, day).ok()
}

fn build_numeric(year: &str, month: &str, day: &str) -> Option<Date> {
    let month = Month::try_from(month.parse::<u8>().ok()?).ok()?;
    build(year, month, day)
}

/// First full date found in `text`; `None` when only a bare year (or
/// nothing) is present.
pub fn extract_date(text: &str) -> Option<Date> {
    for caps in DAY_MONTH_YEAR.captures_iter(text) {
        if let Some(date) = month_from_name(&caps[2]).and_then(|m| build(&caps[3], m, &caps[1])) {
            return Some(date);
        }
    }

    for caps in MONTH_DAY_YEAR.captures_iter(text) {
        if let Some(date) = month_from_name(&caps[1]).and_then(|m| build(&caps[3], m, &caps[2])) {
            return Some(date);
        }
    }

    for caps in DOTTED.captures_iter(text) {
        if let Some(date) = build_numeric(&caps[3], &caps[2], &caps[1]) {
            return Some(date);
        }
    }

    for caps in ISO.captures_iter(text) {
        if let Some(date) = build_numeric(&caps[1], &caps[2], &caps[3]) {
            return Some(date);
        }
    }

    for caps in SLASHED.captures_iter(text) {
        let date = build_numeric(&caps[3], &caps[2], &caps[1])
            .or_else(|| build_numeric(&caps[3], &caps[1], &caps[2]));
        if date.is_some() {
            return date;
        }
    }

    None
}

/// Like [`extract_date`], but also accepts a bare year: it takes the month and
/// day of `anchor` when given (clamped to the month's length), else Dec 31.
pub fn extract_date_anchored(text: &str, anchor: Option<Date>) -> Option<Date> {
    if let Some(date) = extract_date(text) {
        return Some(date);
    }

    let year = YEAR.captures(text)?[1].parse::<i32>().ok()?;
    match anchor {
        Some(anchor) => {
            let last_day = time::util::days_in_year_month(year, anchor.month());
            Date::from_calendar_date(year, anchor.month(), anchor.day().min(last_day)).ok()
        }
        None => Date::from_calendar_date(year, Month::December, 31).ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::date;

    #[test]
    fn month_names_in_three_languages() {
        let cases = [
            ("Annual report as at 31 December 2023", date!(2023 - 12 - 31)),
            ("Rapport semestriel au 30 juin 2024", date!(2024 - 06 - 30)),
            ("Halbjahresbericht zum 31. März 2024", date!(2024 - 03 - 31)),
        ];
        for (text, expected) in cases {
            assert_eq!(extract_date(text), Some(expected), "{text}");
        }
        assert_eq!(extract_date("Rapport annuel 1er août 2022"), Some(date!(2022 - 08 - 01)));
        assert_eq!(extract_date("Semi-annual report June 30, 2024"), Some(date!(2024 - 06 - 30)));
    }

    #[test]
    fn numeric_forms() {
        assert_eq!(extract_date("Stichtag 31.12.2023"), Some(date!(2023 - 12 - 31)));
        assert_eq!(extract_date("period 2024-03-31"), Some(date!(2024 - 03 - 31)));
        assert_eq!(extract_date("au 30/06/2024"), Some(date!(2024 - 06 - 30)));
        assert_eq!(extract_date("as of 06/30/2024"), Some(date!(2024 - 06 - 30)));
    }

    #[test]
    fn invalid_calendar_dates_are_skipped() {
        assert_eq!(extract_date("31 February 2024 then 2024-02-29"), Some(date!(2024 - 02 - 29)));
        assert_eq!(extract_date("no date here"), None);
    }

    #[test]
    fn bare_year_requires_the_anchored_variant() {
        assert_eq!(extract_date("Annual report 2023"), None);
        assert_eq!(extract_date_anchored("Annual report 2023", None), Some(date!(2023 - 12 - 31)));
        assert_eq!(
            extract_date_anchored("Annual report 2023", Some(date!(2024 - 06 - 30))),
            Some(date!(2023 - 06 - 30))
        );
        assert_eq!(
            extract_date_anchored("Report 2023", Some(date!(2024 - 02 - 29))),
            Some(date!(2023 - 02 - 28))
        );
    }
}
