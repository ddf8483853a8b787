//! `YYYY-MM-DD` date helpers shared by every partition and serialized record.

use time::format_description::FormatItem;
use time::macros::format_description;
use time::Date;

const ISO_DATE: &[FormatItem<'static>] = format_description!("[year]-[month]-[day]");

time::serde::format_description!(pub iso_date, Date, "[year]-[month]-[day]");

/// Formats a date as `YYYY-MM-DD`.
pub fn format_date(date: Date) -> String {
    date.format(ISO_DATE).unwrap_or_else(|_| {
        format!("{:04}-{:02}-{:02}", date.year(), u8::from(date.month()), date.day())
    })
}

/// Parses a strict `YYYY-MM-DD` date.
pub fn parse_date(value: &str) -> Option<Date> {
    Date::parse(value.trim(), ISO_DATE).ok()
}
