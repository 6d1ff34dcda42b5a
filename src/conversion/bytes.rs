//! Byte type implementations (`[u8]`, `Vec<u8>`), as `bytea`.

use crate::error::Result;
use crate::escape::{esc_raw, unesc_raw};

use super::{FromSqlText, ToSqlText};

impl ToSqlText for [u8] {
    fn to_sql_text(&self) -> Option<String> {
        Some(esc_raw(self))
    }
}

impl ToSqlText for Vec<u8> {
    fn to_sql_text(&self) -> Option<String> {
        self.as_slice().to_sql_text()
    }
}

impl FromSqlText for Vec<u8> {
    fn from_sql_text(text: &str) -> Result<Self> {
        unesc_raw(text.as_bytes())
    }
}
