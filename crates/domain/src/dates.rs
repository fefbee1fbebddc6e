use time::format_description::BorrowedFormatItem;
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{Date, OffsetDateTime};

const ISO_DATE: &[BorrowedFormatItem<'static>] = format_description!("[year]-[month]-[day]");
const DAY_FIRST_FORMATS: &[&[BorrowedFormatItem<'static>]] = &[
    format_description!("[day]-[month]-[year]"),
    format_description!("[day]/[month]/[year]"),
];

/// `DD-MM-YYYY` becomes `YYYY-MM-DD` when the dash-separated segments are
/// exactly 2/2/4 characters long; anything else is returned trimmed.
pub fn normalize_dmy_date(value: &str) -> String {
    let trimmed = value.trim();
    let parts: Vec<&str> = trimmed.split('-').collect();
    if let [day, month, year] = parts.as_slice()
        && day.len() == 2
        && month.len() == 2
        && year.len() == 4
    {
        return format!("{year}-{month}-{day}");
    }
    trimmed.to_string()
}

/// Best-effort ISO calendar date: accepts ISO dates, ISO date-times and
/// day-first dates separated by `-` or `/`.
pub fn normalize_calendar_date(value: &str) -> String {
    let trimmed = value.trim();
    if parse_iso_date(trimmed).is_some() {
        return trimmed.to_string();
    }
    parse_date_time(trimmed)
        .or_else(|| parse_day_first(trimmed))
        .map(format_iso)
        .unwrap_or_else(|| trimmed.to_string())
}

pub fn parse_iso_date(value: &str) -> Option<Date> {
    Date::parse(value, ISO_DATE).ok()
}

pub fn format_iso(date: Date) -> String {
    date.format(ISO_DATE).unwrap_or_else(|_| date.to_string())
}

fn parse_date_time(value: &str) -> Option<Date> {
    if let Ok(timestamp) = OffsetDateTime::parse(value, &Rfc3339) {
        return Some(timestamp.date());
    }
    let (date_part, rest) = value.split_at_checked(10)?;
    if !rest.starts_with(['T', ' ']) {
        return None;
    }
    parse_iso_date(date_part)
}

fn parse_day_first(value: &str) -> Option<Date> {
    DAY_FIRST_FORMATS
        .iter()
        .find_map(|format| Date::parse(value, format).ok())
}
