//! Error and notice response messages.

use crate::error::{ErrorFields, Result};
use crate::protocol::codec::Reader;

/// Error field type codes from PostgreSQL protocol.
pub mod field_type {
    /// Severity (localized)
    pub const SEVERITY: u8 = b'S';
    /// Severity (non-localized, PostgreSQL 9.6+)
    pub const SEVERITY_NON_LOCALIZED: u8 = b'V';
    /// SQLSTATE code
    pub const CODE: u8 = b'C';
    /// Message
    pub const MESSAGE: u8 = b'M';
    /// Detail
    pub const DETAIL: u8 = b'D';
    /// Hint
    pub const HINT: u8 = b'H';
    /// Position in query
    pub const POSITION: u8 = b'P';
    /// Internal position
    pub const INTERNAL_POSITION: u8 = b'p';
    /// Internal query
    pub const INTERNAL_QUERY: u8 = b'q';
    /// Where (context)
    pub const WHERE: u8 = b'W';
    /// Schema name
    pub const SCHEMA: u8 = b's';
    /// Table name
    pub const TABLE: u8 = b't';
    /// Column name
    pub const COLUMN: u8 = b'c';
    /// Data type name
    pub const DATA_TYPE: u8 = b'd';
    /// Constraint name
    pub const CONSTRAINT: u8 = b'n';
    /// File name
    pub const FILE: u8 = b'F';
    /// Line number
    pub const LINE: u8 = b'L';
    /// Routine name
    pub const ROUTINE: u8 = b'R';
}

/// Parse the field list shared by ErrorResponse and NoticeResponse.
///
/// Field values are decoded lossily: the server sends them in the client
/// encoding, which need not be UTF-8.
pub fn parse_fields(payload: &[u8]) -> Result<ErrorFields> {
    let mut fields = ErrorFields::default();
    let mut r = Reader::new(payload);

    while let Some(code) = r.peek() {
        if code == 0 {
            break;
        }
        r.u8()?;
        let value = String::from_utf8_lossy(r.cstring()?).into_owned();

        match code {
            field_type::SEVERITY => fields.severity = Some(value),
            field_type::SEVERITY_NON_LOCALIZED => fields.severity_non_localized = Some(value),
            field_type::CODE => fields.code = Some(value),
            field_type::MESSAGE => fields.message = Some(value),
            field_type::DETAIL => fields.detail = Some(value),
            field_type::HINT => fields.hint = Some(value),
            field_type::POSITION => fields.position = value.parse().ok(),
            field_type::INTERNAL_POSITION => fields.internal_position = value.parse().ok(),
            field_type::INTERNAL_QUERY => fields.internal_query = Some(value),
            field_type::WHERE => fields.where_ = Some(value),
            field_type::SCHEMA => fields.schema = Some(value),
            field_type::TABLE => fields.table = Some(value),
            field_type::COLUMN => fields.column = Some(value),
            field_type::DATA_TYPE => fields.data_type = Some(value),
            field_type::CONSTRAINT => fields.constraint = Some(value),
            field_type::FILE => fields.file = Some(value),
            field_type::LINE => fields.line = value.parse().ok(),
            field_type::ROUTINE => fields.routine = Some(value),
            _ => {
                tracing::debug!("Unknown error field type: {}", code as char);
            }
        }
    }

    Ok(fields)
}

/// ErrorResponse message - error from server.
#[derive(Debug, Clone)]
pub struct ErrorResponse(pub ErrorFields);

impl ErrorResponse {
    /// Parse an ErrorResponse message from payload bytes.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        parse_fields(payload).map(Self)
    }
}

/// NoticeResponse message - non-fatal warning/info from server.
#[derive(Debug, Clone)]
pub struct NoticeResponse(pub ErrorFields);

impl NoticeResponse {
    /// Parse a NoticeResponse message from payload bytes.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        parse_fields(payload).map(Self)
    }
}
