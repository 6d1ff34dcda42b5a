//! Error types for pg-session.

use thiserror::Error;

/// Result type for pg-session operations.
pub type Result<T> = core::result::Result<T, Error>;

/// PostgreSQL error/notice field types.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorFields {
    /// Severity: ERROR, FATAL, PANIC, WARNING, NOTICE, DEBUG, INFO, LOG
    pub severity: Option<String>,
    /// Non-localized severity (same as severity but never translated)
    pub severity_non_localized: Option<String>,
    /// SQLSTATE error code (5 characters)
    pub code: Option<String>,
    /// Primary error message
    pub message: Option<String>,
    /// Detailed error explanation
    pub detail: Option<String>,
    /// Suggestion for fixing the error
    pub hint: Option<String>,
    /// Cursor position in query string (1-based)
    pub position: Option<u32>,
    /// Position in internal query
    pub internal_position: Option<u32>,
    /// Failed internal command text
    pub internal_query: Option<String>,
    /// Context/stack trace
    pub where_: Option<String>,
    /// Schema name
    pub schema: Option<String>,
    /// Table name
    pub table: Option<String>,
    /// Column name
    pub column: Option<String>,
    /// Data type name
    pub data_type: Option<String>,
    /// Constraint name
    pub constraint: Option<String>,
    /// Source file name
    pub file: Option<String>,
    /// Source line number
    pub line: Option<u32>,
    /// Source routine name
    pub routine: Option<String>,
}

impl ErrorFields {
    /// Severity, preferring the non-localized form.
    pub fn severity(&self) -> Option<&str> {
        self.severity_non_localized
            .as_deref()
            .or(self.severity.as_deref())
    }

    /// Render the fields the way a notice is delivered to handlers: one
    /// `SEVERITY:  message` line plus optional DETAIL/HINT lines, newline
    /// terminated.
    pub fn to_notice_text(&self) -> String {
        let mut text = String::new();
        if let Some(severity) = &self.severity {
            text.push_str(severity);
            text.push_str(":  ");
        }
        text.push_str(self.message.as_deref().unwrap_or_default());
        text.push('\n');
        if let Some(detail) = &self.detail {
            text.push_str("DETAIL:  ");
            text.push_str(detail);
            text.push('\n');
        }
        if let Some(hint) = &self.hint {
            text.push_str("HINT:  ");
            text.push_str(hint);
            text.push('\n');
        }
        text
    }
}

impl std::fmt::Display for ErrorFields {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(severity) = &self.severity {
            write!(f, "{}: ", severity)?;
        }
        if let Some(message) = &self.message {
            write!(f, "{}", message)?;
        }
        if let Some(code) = &self.code {
            write!(f, " (SQLSTATE {})", code)?;
        }
        if let Some(detail) = &self.detail {
            write!(f, "\nDETAIL: {}", detail)?;
        }
        if let Some(hint) = &self.hint {
            write!(f, "\nHINT: {}", hint)?;
        }
        Ok(())
    }
}

/// A statement rejected by the server, with the statement that caused it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlError {
    /// Diagnostic fields reported by the server.
    pub fields: ErrorFields,
    /// The statement text, or a bracketed pseudo-statement such as
    /// `[END COPY]` or `[cancel]`.
    pub query: String,
}

impl SqlError {
    /// Build an error that carries only a message and a pseudo-statement.
    pub fn from_message(message: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            fields: ErrorFields {
                message: Some(message.into()),
                ..ErrorFields::default()
            },
            query: query.into(),
        }
    }

    /// SQLSTATE code, if the server sent one.
    pub fn sqlstate(&self) -> Option<&str> {
        self.fields.code.as_deref()
    }

    /// Primary message.
    pub fn message(&self) -> &str {
        self.fields.message.as_deref().unwrap_or_default()
    }
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.fields)?;
        if !self.query.is_empty() {
            write!(f, "\nQUERY: {}", self.query)?;
        }
        Ok(())
    }
}

/// Error type for pg-session.
#[derive(Debug, Error)]
pub enum Error {
    /// Transport, socket or protocol failure; the session is usually unusable
    #[error("Broken connection: {0}")]
    BrokenConnection(String),

    /// The caller violated a precondition
    #[error("Usage error: {0}")]
    Usage(String),

    /// Generic failure reported by the transport or the server
    #[error("Failure: {0}")]
    Failure(String),

    /// Server rejected a statement
    #[error("SQL error: {0}")]
    Sql(Box<SqlError>),

    /// The link broke while committing; the transaction may or may not have
    /// been committed
    #[error("In doubt: {0}")]
    InDoubt(String),

    /// An assumed-impossible condition occurred
    #[error("Internal error: {0}")]
    Internal(String),

    /// Protocol or server version below the supported floor
    #[error("Feature not supported: {0}")]
    FeatureNotSupported(String),

    /// Checked numeric conversion overflowed
    #[error("Out of range: {0}")]
    Range(String),

    /// Invalid argument, such as text that is not valid in the client encoding
    #[error("Invalid argument: {0}")]
    Argument(String),

    /// Malformed or unexpected backend message
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Authentication failed
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// TLS error
    #[cfg(feature = "sync-tls")]
    #[error("TLS error: {0}")]
    Tls(#[from] native_tls::Error),
}

impl Error {
    /// Returns true if the error indicates the connection is broken and cannot be reused.
    pub fn is_connection_broken(&self) -> bool {
        match self {
            Error::Io(_) | Error::BrokenConnection(_) | Error::Protocol(_) | Error::InDoubt(_) => {
                true
            }
            #[cfg(feature = "sync-tls")]
            Error::Tls(_) => true,
            // FATAL and PANIC end the backend
            Error::Sql(err) => matches!(err.fields.severity(), Some("FATAL") | Some("PANIC")),
            _ => false,
        }
    }

    /// Get the SQLSTATE code if this is a server error.
    pub fn sqlstate(&self) -> Option<&str> {
        match self {
            Error::Sql(err) => err.sqlstate(),
            _ => None,
        }
    }

    /// Wrap diagnostic fields and the statement that produced them.
    pub fn sql(fields: ErrorFields, query: impl Into<String>) -> Self {
        Error::Sql(Box::new(SqlError {
            fields,
            query: query.into(),
        }))
    }
}

impl From<core::convert::Infallible> for Error {
    fn from(err: core::convert::Infallible) -> Self {
        match err {}
    }
}

impl<Src: std::fmt::Debug, Dst: std::fmt::Debug + ?Sized>
    From<zerocopy::error::CastError<Src, Dst>> for Error
{
    fn from(err: zerocopy::error::CastError<Src, Dst>) -> Self {
        Error::Protocol(format!("zerocopy cast error: {err:?}"))
    }
}

/// Convert between integer types, failing with [`Error::Range`] instead of
/// truncating.
pub fn check_cast<T, U>(value: U, what: &str) -> Result<T>
where
    T: TryFrom<U>,
    U: Copy + std::fmt::Display,
{
    T::try_from(value).map_err(|_| Error::Range(format!("{what}: {value} is out of range")))
}
