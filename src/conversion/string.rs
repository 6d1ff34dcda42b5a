//! String type implementations (&str, String, char).

use crate::error::{Error, Result};

use super::{FromSqlText, ToSqlText};

impl ToSqlText for str {
    fn to_sql_text(&self) -> Option<String> {
        Some(self.to_string())
    }
}

impl ToSqlText for String {
    fn to_sql_text(&self) -> Option<String> {
        Some(self.clone())
    }
}

impl ToSqlText for char {
    fn to_sql_text(&self) -> Option<String> {
        Some(self.to_string())
    }
}

impl FromSqlText for String {
    fn from_sql_text(text: &str) -> Result<Self> {
        Ok(text.to_string())
    }
}

impl FromSqlText for char {
    fn from_sql_text(text: &str) -> Result<Self> {
        let mut chars = text.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => Ok(c),
            _ => Err(Error::Argument(format!(
                "expected a single character, got {text:?}"
            ))),
        }
    }
}
