//! Executed outcomes and the immutable results built from them.

use std::sync::Arc;

use crate::conversion::FromSqlText;
use crate::encoding::EncodingGroup;
use crate::error::{Error, ErrorFields, Result};
use crate::notice::NoticeContext;
use crate::protocol::backend::query::rows_affected;
use crate::protocol::types::{FormatCode, Oid};

/// Status of a raw outcome, as reported by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecStatus {
    /// The statement string was empty.
    EmptyQuery,
    /// A command that returns no rows completed.
    CommandOk,
    /// A query returned rows (possibly zero of them).
    TuplesOk,
    /// The server started a COPY TO STDOUT.
    CopyOut,
    /// The server is waiting for COPY FROM STDIN data.
    CopyIn,
    /// The server's response was not understood.
    BadResponse,
    NonfatalError,
    FatalError,
}

impl ExecStatus {
    /// Statuses a [`QueryResult`] may carry.
    pub fn is_success(self) -> bool {
        matches!(
            self,
            Self::EmptyQuery | Self::CommandOk | Self::TuplesOk | Self::CopyOut | Self::CopyIn
        )
    }
}

/// One column of a row-returning outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub table_oid: Oid,
    pub column_id: i16,
    pub type_oid: Oid,
    pub type_size: i16,
    pub type_modifier: i32,
    pub format: FormatCode,
}

impl Column {
    /// A text column of type `text` with no table of origin.
    pub fn text(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table_oid: 0,
            column_id: 0,
            type_oid: 25,
            type_size: -1,
            type_modifier: -1,
            format: FormatCode::Text,
        }
    }
}

/// A row of field values; `None` is SQL NULL.
pub type RawRow = Vec<Option<Vec<u8>>>;

/// Everything the transport reports about one executed statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawOutcome {
    pub status: ExecStatus,
    pub columns: Vec<Column>,
    pub rows: Vec<RawRow>,
    /// CommandComplete tag, e.g. `INSERT 0 1`.
    pub command_tag: Option<String>,
    /// Diagnostics for error statuses.
    pub error: Option<ErrorFields>,
}

impl RawOutcome {
    /// An outcome with a status and nothing else.
    pub fn new(status: ExecStatus) -> Self {
        Self {
            status,
            columns: Vec::new(),
            rows: Vec::new(),
            command_tag: None,
            error: None,
        }
    }

    /// A completed command with the given tag.
    pub fn command(tag: impl Into<String>) -> Self {
        Self {
            command_tag: Some(tag.into()),
            ..Self::new(ExecStatus::CommandOk)
        }
    }

    /// A row-returning outcome; the tag is `SELECT <n>`.
    pub fn tuples(columns: Vec<Column>, rows: Vec<RawRow>) -> Self {
        Self {
            command_tag: Some(format!("SELECT {}", rows.len())),
            columns,
            rows,
            ..Self::new(ExecStatus::TuplesOk)
        }
    }

    /// A fatal error outcome.
    pub fn error(fields: ErrorFields) -> Self {
        Self {
            error: Some(fields),
            ..Self::new(ExecStatus::FatalError)
        }
    }
}

/// An immutable, cheaply clonable statement result.
///
/// A result keeps the notice context of the session that produced it, so
/// [`QueryResult::process_notice`] keeps working after the session is gone.
#[derive(Debug, Clone)]
pub struct QueryResult {
    raw: Arc<RawOutcome>,
    notices: Arc<NoticeContext>,
    query: Arc<str>,
    encoding: EncodingGroup,
}

impl QueryResult {
    /// Wrap a raw outcome, rejecting error statuses.
    ///
    /// An error status becomes [`Error::Sql`] carrying the server's
    /// diagnostics and `query`.
    pub fn create(
        raw: RawOutcome,
        query: &str,
        notices: Arc<NoticeContext>,
        encoding: EncodingGroup,
    ) -> Result<Self> {
        if !raw.status.is_success() {
            let fields = raw.error.unwrap_or_else(|| ErrorFields {
                severity: Some("ERROR".into()),
                message: Some(format!("Unexpected result status {:?}", raw.status)),
                ..ErrorFields::default()
            });
            return Err(Error::sql(fields, query));
        }
        Ok(Self {
            raw: Arc::new(raw),
            notices,
            query: Arc::from(query),
            encoding,
        })
    }

    pub fn status(&self) -> ExecStatus {
        self.raw.status
    }

    /// The statement that produced this result.
    pub fn query(&self) -> &str {
        &self.query
    }

    /// Client encoding in effect when the result was created.
    pub fn encoding(&self) -> EncodingGroup {
        self.encoding
    }

    pub fn command_tag(&self) -> Option<&str> {
        self.raw.command_tag.as_deref()
    }

    /// Rows inserted, updated, deleted, copied or selected, from the tag.
    pub fn affected_rows(&self) -> u64 {
        self.command_tag().and_then(rows_affected).unwrap_or(0)
    }

    pub fn columns(&self) -> &[Column] {
        &self.raw.columns
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.raw.columns.iter().position(|c| c.name == name)
    }

    pub fn len(&self) -> usize {
        self.raw.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.raw.rows.is_empty()
    }

    pub fn rows(&self) -> impl Iterator<Item = &[Option<Vec<u8>>]> {
        self.raw.rows.iter().map(Vec::as_slice)
    }

    /// Raw field value. `None` for NULL or out-of-range indexes.
    pub fn get(&self, row: usize, column: usize) -> Option<&[u8]> {
        self.raw.rows.get(row)?.get(column)?.as_deref()
    }

    /// Field value as text. `Ok(None)` for NULL.
    pub fn get_str(&self, row: usize, column: usize) -> Result<Option<&str>> {
        self.check_field(row, column)?;
        self.get(row, column)
            .map(|bytes| {
                simdutf8::compat::from_utf8(bytes)
                    .map_err(|e| Error::Argument(format!("field is not valid UTF-8: {e}")))
            })
            .transpose()
    }

    /// Field value parsed from its text form.
    pub fn get_as<T: FromSqlText>(&self, row: usize, column: usize) -> Result<T> {
        match self.get_str(row, column)? {
            Some(text) => T::from_sql_text(text),
            None => T::from_null(),
        }
    }

    fn check_field(&self, row: usize, column: usize) -> Result<()> {
        if row >= self.len() {
            return Err(Error::Range(format!(
                "Row number {row} out of range; result has {} rows.",
                self.len()
            )));
        }
        if column >= self.columns().len() {
            return Err(Error::Range(format!(
                "Column number {column} out of range; result has {} columns.",
                self.columns().len()
            )));
        }
        Ok(())
    }

    /// Fail unless the statement returned no rows.
    pub fn no_rows(&self) -> Result<&Self> {
        if !self.is_empty() {
            return Err(Error::Range(format!(
                "Expected no rows from query, got {}.\nQUERY: {}",
                self.len(),
                self.query
            )));
        }
        Ok(self)
    }

    /// Fail unless the result has exactly `expected` rows.
    pub fn expect_rows(&self, expected: usize) -> Result<&Self> {
        if self.len() != expected {
            let noun = if expected == 1 { "row" } else { "rows" };
            return Err(Error::Range(format!(
                "Expected {expected} {noun} from query, got {}.\nQUERY: {}",
                self.len(),
                self.query
            )));
        }
        Ok(self)
    }

    /// The single field of a one-row, one-column result.
    pub fn one_field(&self) -> Result<Option<&str>> {
        if self.len() != 1 {
            return Err(Error::Range(format!(
                "Expected 1 row from query, got {}.\nQUERY: {}",
                self.len(),
                self.query
            )));
        }
        if self.columns().len() != 1 {
            return Err(Error::Range(format!(
                "Expected 1 column from query, got {}.\nQUERY: {}",
                self.columns().len(),
                self.query
            )));
        }
        self.get_str(0, 0)
    }

    /// Route a notice through the context of the producing session.
    pub fn process_notice(&self, notice: &str) {
        self.notices.process_notice(notice);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    fn wrap(raw: RawOutcome) -> Result<QueryResult> {
        QueryResult::create(raw, "SELECT 1", NoticeContext::new(), EncodingGroup::Utf8)
    }

    #[test]
    fn accepts_success_statuses() {
        for status in [
            ExecStatus::EmptyQuery,
            ExecStatus::CommandOk,
            ExecStatus::TuplesOk,
            ExecStatus::CopyOut,
            ExecStatus::CopyIn,
        ] {
            assert!(wrap(RawOutcome::new(status)).is_ok(), "{status:?}");
        }
    }

    #[test]
    fn error_status_carries_diagnostics_and_query() {
        let fields = ErrorFields {
            severity: Some("ERROR".into()),
            code: Some("42601".into()),
            message: Some("syntax error at or near \"SELEC\"".into()),
            position: Some(1),
            ..ErrorFields::default()
        };
        let err = QueryResult::create(
            RawOutcome::error(fields),
            "SELEC 1",
            NoticeContext::new(),
            EncodingGroup::Utf8,
        )
        .unwrap_err();
        let Error::Sql(sql) = err else {
            panic!("expected a SQL error");
        };
        assert_eq!(sql.sqlstate(), Some("42601"));
        assert_eq!(sql.query, "SELEC 1");
        assert_eq!(sql.fields.position, Some(1));
    }

    #[test]
    fn bad_response_without_fields_is_still_sql_error() {
        let err = wrap(RawOutcome::new(ExecStatus::BadResponse)).unwrap_err();
        assert!(matches!(err, Error::Sql(_)));
    }

    #[test]
    fn field_access() {
        let result = wrap(RawOutcome::tuples(
            vec![Column::text("a"), Column::text("b")],
            vec![vec![Some(b"x".to_vec()), None]],
        ))
        .unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result.affected_rows(), 1);
        assert_eq!(result.column_index("b"), Some(1));
        assert_eq!(result.get_str(0, 0).unwrap(), Some("x"));
        assert_eq!(result.get_str(0, 1).unwrap(), None);
        assert!(matches!(result.get_str(1, 0), Err(Error::Range(_))));
        assert_eq!(result.get_as::<String>(0, 0).unwrap(), "x");
        assert_eq!(result.get_as::<Option<i32>>(0, 1).unwrap(), None);
        assert!(result.get_as::<i32>(0, 1).is_err());
        assert!(result.no_rows().is_err());
        assert!(result.one_field().is_err());
        assert!(result.expect_rows(1).is_ok());
        assert!(matches!(
            result.expect_rows(2),
            Err(Error::Range(m)) if m == "Expected 2 rows from query, got 1.\nQUERY: SELECT 1"
        ));
    }

    #[test]
    fn notices_outlive_the_creator() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let result = {
            let ctx = NoticeContext::new();
            let sink = seen.clone();
            ctx.set_callback(Some(Arc::new(move |n: &str| {
                sink.lock().unwrap().push(n.to_string())
            })));
            QueryResult::create(
                RawOutcome::command("LISTEN"),
                "LISTEN x",
                ctx,
                EncodingGroup::Utf8,
            )
            .unwrap()
        };
        result.process_notice("NOTICE:  late\n");
        assert_eq!(*seen.lock().unwrap(), ["NOTICE:  late\n"]);
    }
}
