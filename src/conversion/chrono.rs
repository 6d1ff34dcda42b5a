//! Date and time implementations for the chrono crate.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};

use crate::error::Result;

use super::{FromSqlText, ToSqlText, parse_error};

impl ToSqlText for NaiveDate {
    fn to_sql_text(&self) -> Option<String> {
        Some(self.format("%Y-%m-%d").to_string())
    }
}

impl FromSqlText for NaiveDate {
    fn from_sql_text(text: &str) -> Result<Self> {
        NaiveDate::parse_from_str(text, "%Y-%m-%d").map_err(|e| parse_error("date", text, e))
    }
}

impl ToSqlText for NaiveTime {
    fn to_sql_text(&self) -> Option<String> {
        Some(self.format("%H:%M:%S%.f").to_string())
    }
}

impl FromSqlText for NaiveTime {
    fn from_sql_text(text: &str) -> Result<Self> {
        NaiveTime::parse_from_str(text, "%H:%M:%S%.f")
            .or_else(|_| NaiveTime::parse_from_str(text, "%H:%M:%S"))
            .map_err(|e| parse_error("time", text, e))
    }
}

impl ToSqlText for NaiveDateTime {
    fn to_sql_text(&self) -> Option<String> {
        Some(self.format("%Y-%m-%d %H:%M:%S%.f").to_string())
    }
}

impl FromSqlText for NaiveDateTime {
    fn from_sql_text(text: &str) -> Result<Self> {
        NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f")
            .or_else(|_| NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S"))
            .map_err(|e| parse_error("timestamp", text, e))
    }
}

impl ToSqlText for DateTime<Utc> {
    fn to_sql_text(&self) -> Option<String> {
        Some(self.to_rfc3339())
    }
}

impl FromSqlText for DateTime<Utc> {
    /// Accepts the server's `2024-01-15 10:30:00.5+00` form.
    fn from_sql_text(text: &str) -> Result<Self> {
        DateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f%#z")
            .or_else(|_| DateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%#z"))
            .or_else(|_| DateTime::parse_from_rfc3339(text))
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| parse_error("timestamptz", text, e))
    }
}
