//! NUMERIC implementation for the rust_decimal crate.

use std::str::FromStr;

use rust_decimal::Decimal;

use crate::error::{Error, Result};

use super::{FromSqlText, ToSqlText, parse_error};

impl ToSqlText for Decimal {
    fn to_sql_text(&self) -> Option<String> {
        Some(self.to_string())
    }
}

impl FromSqlText for Decimal {
    fn from_sql_text(text: &str) -> Result<Self> {
        if matches!(text, "NaN" | "Infinity" | "-Infinity") {
            return Err(Error::Argument(format!(
                "NUMERIC {text} cannot be represented as Decimal"
            )));
        }
        Decimal::from_str(text)
            .or_else(|_| Decimal::from_scientific(text))
            .map_err(|e| parse_error("numeric", text, e))
    }
}
