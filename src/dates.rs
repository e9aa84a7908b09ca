// src/dates.rs

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use time::macros::format_description;
use time::{Date, Duration, Month, Weekday};

use crate::errors::AnalysisError;

/// Spanish weekday labels in canonical Monday→Sunday order.
pub const WEEK_ORDER: [&str; 7] = [
    "Lunes",
    "Martes",
    "Miércoles",
    "Jueves",
    "Viernes",
    "Sábado",
    "Domingo",
];

static ISO_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{4})-(\d{1,2})-(\d{1,2})(?:[ T].*)?$").unwrap());
static DMY_LONG_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{1,2})/(\d{1,2})/(\d{4})(?:[ ,].*)?$").unwrap());
static DMY_SHORT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{1,2})/(\d{1,2})/(\d{2})(?:[ ,].*)?$").unwrap());

fn calendar_date(year: i32, month: u8, day: u8) -> Option<Date> {
    let month = Month::try_from(month).ok()?;
    Date::from_calendar_date(year, month, day).ok()
}

/// Expand a two-digit year: 00–68 land in 2000s, 69–99 in 1900s.
fn expand_short_year(yy: i32) -> i32 {
    if yy < 69 { 2000 + yy } else { 1900 + yy }
}

/// Parse the `DD/MM/YY` timestamp used in chat exports.
pub fn parse_chat_date(text: &str) -> Option<Date> {
    let cap = DMY_SHORT_RE.captures(text.trim())?;
    let day: u8 = cap[1].parse().ok()?;
    let month: u8 = cap[2].parse().ok()?;
    let yy: i32 = cap[3].parse().ok()?;
    calendar_date(expand_short_year(yy), month, day)
}

/// Best-effort coercion of a stored date cell. Unknown layouts yield `None`.
pub fn coerce_date(text: &str) -> Option<Date> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    if let Some(cap) = ISO_RE.captures(text) {
        return calendar_date(cap[1].parse().ok()?, cap[2].parse().ok()?, cap[3].parse().ok()?);
    }
    if let Some(cap) = DMY_LONG_RE.captures(text) {
        return calendar_date(cap[3].parse().ok()?, cap[2].parse().ok()?, cap[1].parse().ok()?);
    }
    parse_chat_date(text)
}

/// Parse a user-supplied date argument.
pub fn parse_date_arg(text: &str) -> Result<Date, AnalysisError> {
    coerce_date(text).ok_or_else(|| AnalysisError::BadDateArg(text.to_string()))
}

/// `DD/MM/YYYY`, the format shown to couriers.
pub fn display(date: Date) -> String {
    date.format(format_description!("[day]/[month]/[year]"))
        .unwrap_or_else(|_| date.to_string())
}

pub fn weekday_label(weekday: Weekday) -> &'static str {
    WEEK_ORDER[weekday.number_days_from_monday() as usize]
}

pub fn is_weekend(date: Date) -> bool {
    matches!(date.weekday(), Weekday::Saturday | Weekday::Sunday)
}

/// Inclusive calendar window used to scope every aggregation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DateRange {
    #[serde(serialize_with = "iso::serialize")]
    pub start: Date,
    #[serde(serialize_with = "iso::serialize")]
    pub end: Date,
}

impl DateRange {
    pub fn new(start: Date, end: Date) -> Result<Self, AnalysisError> {
        if end < start {
            return Err(AnalysisError::InvalidRange { start, end });
        }
        Ok(Self { start, end })
    }

    /// Null dates never fall inside a range.
    pub fn contains(&self, date: Option<Date>) -> bool {
        date.is_some_and(|d| self.start <= d && d <= self.end)
    }

    /// Window offered for a single courier's export: the last week up to
    /// today, clamped to the dates actually present.
    pub fn courier_default(dates: impl IntoIterator<Item = Date>, today: Date) -> Self {
        let Some((min, max)) = bounds(dates) else {
            return Self { start: today, end: today };
        };
        if min == max {
            return Self { start: min, end: max };
        }
        let week_ago = today.checked_sub(Duration::days(7)).unwrap_or(min);
        let start = min.max(week_ago);
        let end = max.min(today);
        // Exports older than a week would otherwise produce an inverted window.
        if end < start {
            return Self { start: min, end: max };
        }
        Self { start, end }
    }

    /// Window offered for the cumulative dataset: the full span when it is
    /// at most 30 days, otherwise the last 30 days.
    pub fn global_default(dates: impl IntoIterator<Item = Date>, today: Date) -> Self {
        let Some((min, max)) = bounds(dates) else {
            return Self { start: today, end: today };
        };
        if (max - min).whole_days() <= 30 {
            return Self { start: min, end: max };
        }
        let start = max.checked_sub(Duration::days(30)).unwrap_or(min).max(min);
        Self { start, end: max }
    }
}

fn bounds(dates: impl IntoIterator<Item = Date>) -> Option<(Date, Date)> {
    dates.into_iter().fold(None, |acc, d| match acc {
        None => Some((d, d)),
        Some((lo, hi)) => Some((lo.min(d), hi.max(d))),
    })
}

/// Serde helpers writing dates as `YYYY-MM-DD` and reading them leniently.
pub mod iso {
    use serde::{Deserialize, Deserializer, Serializer};
    use time::Date;

    pub fn serialize<S: Serializer>(date: &Date, s: S) -> Result<S::Ok, S::Error> {
        s.collect_str(date)
    }

    pub fn serialize_opt<S: Serializer>(date: &Option<Date>, s: S) -> Result<S::Ok, S::Error> {
        match date {
            Some(d) => s.collect_str(d),
            None => s.serialize_str(""),
        }
    }

    /// Never fails: anything that is not a recognised date becomes `None`.
    pub fn deserialize_opt<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Date>, D::Error> {
        let raw = Option::<String>::deserialize(d)?;
        Ok(raw.as_deref().and_then(super::coerce_date))
    }
}
