//! Date and time implementations for the time crate.

use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{Date, OffsetDateTime, PrimitiveDateTime, Time};

use crate::error::Result;

use super::{FromSqlText, ToSqlText, parse_error};

const DATE: &[time::format_description::BorrowedFormatItem<'_>] =
    format_description!("[year]-[month]-[day]");
const TIME: &[time::format_description::BorrowedFormatItem<'_>] =
    format_description!("[hour]:[minute]:[second]");
const TIME_SUBSEC: &[time::format_description::BorrowedFormatItem<'_>] =
    format_description!("[hour]:[minute]:[second].[subsecond]");
const TIMESTAMP: &[time::format_description::BorrowedFormatItem<'_>] =
    format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
const TIMESTAMP_SUBSEC: &[time::format_description::BorrowedFormatItem<'_>] =
    format_description!("[year]-[month]-[day] [hour]:[minute]:[second].[subsecond]");
const TIMESTAMPTZ: &[time::format_description::BorrowedFormatItem<'_>] = format_description!(
    "[year]-[month]-[day] [hour]:[minute]:[second][optional [.[subsecond]]][offset_hour][optional [:[offset_minute]]]"
);

impl ToSqlText for Date {
    fn to_sql_text(&self) -> Option<String> {
        self.format(DATE).ok()
    }
}

impl FromSqlText for Date {
    fn from_sql_text(text: &str) -> Result<Self> {
        Date::parse(text, DATE).map_err(|e| parse_error("date", text, e))
    }
}

impl ToSqlText for Time {
    fn to_sql_text(&self) -> Option<String> {
        self.format(TIME_SUBSEC).ok()
    }
}

impl FromSqlText for Time {
    fn from_sql_text(text: &str) -> Result<Self> {
        Time::parse(text, TIME_SUBSEC)
            .or_else(|_| Time::parse(text, TIME))
            .map_err(|e| parse_error("time", text, e))
    }
}

impl ToSqlText for PrimitiveDateTime {
    fn to_sql_text(&self) -> Option<String> {
        self.format(TIMESTAMP_SUBSEC).ok()
    }
}

impl FromSqlText for PrimitiveDateTime {
    fn from_sql_text(text: &str) -> Result<Self> {
        PrimitiveDateTime::parse(text, TIMESTAMP_SUBSEC)
            .or_else(|_| PrimitiveDateTime::parse(text, TIMESTAMP))
            .map_err(|e| parse_error("timestamp", text, e))
    }
}

impl ToSqlText for OffsetDateTime {
    fn to_sql_text(&self) -> Option<String> {
        self.format(&Rfc3339).ok()
    }
}

impl FromSqlText for OffsetDateTime {
    /// Accepts the server's `2024-01-15 10:30:00.5+00` form and RFC 3339.
    fn from_sql_text(text: &str) -> Result<Self> {
        OffsetDateTime::parse(text, TIMESTAMPTZ)
            .or_else(|_| OffsetDateTime::parse(text, &Rfc3339))
            .map_err(|e| parse_error("timestamptz", text, e))
    }
}
