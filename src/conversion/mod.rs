//! Text rendering of values for SQL, and parsing of text-format fields.
//!
//! Parameters go to the server in text format and results come back in
//! text format, so both directions are plain strings:
//! - [`ToSqlText`] renders a value for a statement parameter or a literal
//! - [`FromSqlText`] parses a field of a [`QueryResult`]
//!
//! [`QueryResult`]: crate::QueryResult

mod bytes;
mod primitives;
mod string;

#[cfg(feature = "with-chrono")]
mod chrono;
#[cfg(feature = "with-rust-decimal")]
mod decimal;
#[cfg(feature = "with-time")]
mod time;
#[cfg(feature = "with-uuid")]
mod uuid;

use crate::error::{Error, Result, check_cast};

/// Render a value the way the server parses it in text format.
pub trait ToSqlText {
    /// The text form, or `None` for SQL NULL.
    fn to_sql_text(&self) -> Option<String>;
}

/// Parse a text-format field.
pub trait FromSqlText: Sized {
    /// Decode a NULL field.
    ///
    /// Fails by default. Override for types that can represent NULL (like
    /// `Option<T>`).
    fn from_null() -> Result<Self> {
        Err(Error::Argument("unexpected NULL value".into()))
    }

    fn from_sql_text(text: &str) -> Result<Self>;
}

pub(crate) fn parse_error(what: &str, text: &str, err: impl std::fmt::Display) -> Error {
    Error::Argument(format!("cannot parse {text:?} as {what}: {err}"))
}

// === Option<T> - NULL handling ===

impl<T: ToSqlText> ToSqlText for Option<T> {
    fn to_sql_text(&self) -> Option<String> {
        self.as_ref().and_then(ToSqlText::to_sql_text)
    }
}

impl<T: FromSqlText> FromSqlText for Option<T> {
    fn from_null() -> Result<Self> {
        Ok(None)
    }

    fn from_sql_text(text: &str) -> Result<Self> {
        T::from_sql_text(text).map(Some)
    }
}

// === Reference support ===

impl<T: ToSqlText + ?Sized> ToSqlText for &T {
    fn to_sql_text(&self) -> Option<String> {
        (*self).to_sql_text()
    }
}

/// Render a parameter list for [`Transport::exec_params`].
///
/// Bind carries the parameter count as an unsigned 16-bit number and each
/// value length as a signed 32-bit one.
///
/// [`Transport::exec_params`]: crate::transport::Transport::exec_params
pub(crate) fn render_params(params: &[&dyn ToSqlText]) -> Result<Vec<Option<String>>> {
    check_cast::<u16, usize>(params.len(), "number of parameters")?;
    params
        .iter()
        .map(|p| {
            let text = p.to_sql_text();
            if let Some(text) = &text {
                check_param_len(text.len())?;
            }
            Ok(text)
        })
        .collect()
}

fn check_param_len(len: usize) -> Result<()> {
    check_cast::<i32, usize>(len, "parameter length")?;
    Ok(())
}
