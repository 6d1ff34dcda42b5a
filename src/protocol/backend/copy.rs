//! COPY protocol backend messages.

use crate::error::Result;
use crate::protocol::codec::Reader;
use crate::protocol::types::FormatCode;

/// CopyInResponse / CopyOutResponse body; both share one layout.
#[derive(Debug, Clone)]
pub struct CopyResponse {
    /// Overall format (0=text, 1=binary)
    pub format: FormatCode,
    /// Per-column format codes
    pub column_formats: Vec<FormatCode>,
}

impl CopyResponse {
    /// Parse a CopyInResponse or CopyOutResponse payload.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let mut r = Reader::new(payload);
        let format = FormatCode::from(u16::from(r.u8()?));

        let num_columns = r.u16()?;
        let mut column_formats = Vec::with_capacity(num_columns as usize);
        for _ in 0..num_columns {
            column_formats.push(FormatCode::from(r.u16()?));
        }

        Ok(Self {
            format,
            column_formats,
        })
    }

    /// Check if binary format is used.
    pub fn is_binary(&self) -> bool {
        matches!(self.format, FormatCode::Binary)
    }
}
