//! UUID type implementation (uuid crate).

use crate::error::Result;

use super::{FromSqlText, ToSqlText, parse_error};

impl ToSqlText for uuid::Uuid {
    fn to_sql_text(&self) -> Option<String> {
        Some(self.hyphenated().to_string())
    }
}

impl FromSqlText for uuid::Uuid {
    fn from_sql_text(text: &str) -> Result<Self> {
        uuid::Uuid::parse_str(text).map_err(|e| parse_error("UUID", text, e))
    }
}
