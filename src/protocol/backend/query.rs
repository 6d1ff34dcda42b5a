//! Query-related backend messages.

use std::mem::size_of;

use zerocopy::byteorder::big_endian::{I16 as I16BE, I32 as I32BE, U16 as U16BE, U32 as U32BE};
use zerocopy::{FromBytes, Immutable, KnownLayout};

use crate::error::{Error, Result};
use crate::protocol::codec::Reader;
use crate::protocol::types::{FormatCode, Oid};

/// Fixed-size tail of a field description (18 bytes).
#[derive(Debug, Clone, Copy, FromBytes, KnownLayout, Immutable)]
#[repr(C, packed)]
pub struct FieldDescriptionTail {
    /// Table OID (0 if not a table column)
    pub table_oid: U32BE,
    /// Column attribute number (0 if not a table column)
    pub column_id: I16BE,
    /// Data type OID
    pub type_oid: U32BE,
    /// Type size (-1 for variable, -2 for null-terminated)
    pub type_size: I16BE,
    /// Type modifier (type-specific)
    pub type_modifier: I32BE,
    /// Format code (0=text, 1=binary)
    pub format: U16BE,
}

/// Field description within a RowDescription.
#[derive(Debug, Clone, Copy)]
pub struct FieldDescription<'a> {
    /// Field name, in the client encoding
    pub name: &'a [u8],
    /// Fixed-size metadata
    pub tail: &'a FieldDescriptionTail,
}

impl FieldDescription<'_> {
    pub fn table_oid(&self) -> Oid {
        self.tail.table_oid.get()
    }

    pub fn column_id(&self) -> i16 {
        self.tail.column_id.get()
    }

    pub fn type_oid(&self) -> Oid {
        self.tail.type_oid.get()
    }

    pub fn type_size(&self) -> i16 {
        self.tail.type_size.get()
    }

    pub fn type_modifier(&self) -> i32 {
        self.tail.type_modifier.get()
    }

    pub fn format(&self) -> FormatCode {
        FormatCode::from(self.tail.format.get())
    }
}

/// RowDescription message - describes the columns in a result set.
#[derive(Debug)]
pub struct RowDescription<'a> {
    fields: Vec<FieldDescription<'a>>,
}

impl<'a> RowDescription<'a> {
    /// Parse a RowDescription message from payload bytes.
    pub fn parse(payload: &'a [u8]) -> Result<Self> {
        const TAIL_SIZE: usize = size_of::<FieldDescriptionTail>();

        let mut r = Reader::new(payload);
        let num_fields = r.u16()? as usize;
        let mut fields = Vec::with_capacity(num_fields);

        for _ in 0..num_fields {
            let name = r.cstring()?;
            let tail = FieldDescriptionTail::ref_from_bytes(r.bytes(TAIL_SIZE)?)?;
            fields.push(FieldDescription { name, tail });
        }

        Ok(Self { fields })
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn fields(&self) -> &[FieldDescription<'a>] {
        &self.fields
    }
}

/// DataRow message - contains a single row of data.
#[derive(Debug, Clone, Copy)]
pub struct DataRow<'a> {
    num_columns: u16,
    /// Column data (after the column count)
    columns_data: &'a [u8],
}

impl<'a> DataRow<'a> {
    /// Parse a DataRow message from payload bytes.
    pub fn parse(payload: &'a [u8]) -> Result<Self> {
        let mut r = Reader::new(payload);
        let num_columns = r.u16()?;
        Ok(Self {
            num_columns,
            columns_data: r.remaining(),
        })
    }

    pub fn len(&self) -> usize {
        self.num_columns as usize
    }

    pub fn is_empty(&self) -> bool {
        self.num_columns == 0
    }

    /// Copy the values out, `None` standing for NULL.
    pub fn to_values(&self) -> Result<Vec<Option<Vec<u8>>>> {
        let mut r = Reader::new(self.columns_data);
        let mut values = Vec::with_capacity(self.len());
        for _ in 0..self.num_columns {
            let len = r.i32()?;
            if len == -1 {
                values.push(None);
            } else {
                let len = usize::try_from(len)
                    .map_err(|_| Error::Protocol(format!("DataRow: invalid value length {len}")))?;
                values.push(Some(r.bytes(len)?.to_vec()));
            }
        }
        Ok(values)
    }
}

/// CommandComplete message - indicates successful completion of a command.
#[derive(Debug, Clone, Copy)]
pub struct CommandComplete<'a> {
    /// Command tag (e.g., "SELECT 5", "INSERT 0 1", "UPDATE 10")
    pub tag: &'a str,
}

impl<'a> CommandComplete<'a> {
    /// Parse a CommandComplete message from payload bytes.
    pub fn parse(payload: &'a [u8]) -> Result<Self> {
        let tag = Reader::new(payload).cstr()?;
        Ok(Self { tag })
    }
}

/// Number of rows a command tag reports, if any.
///
/// Tags look like `SELECT 5`, `INSERT 0 1` (oid, rows), `UPDATE 10`.
pub fn rows_affected(tag: &str) -> Option<u64> {
    let parts: Vec<&str> = tag.split_whitespace().collect();

    match parts.as_slice() {
        ["INSERT", _oid, count] => count.parse().ok(),
        ["SELECT" | "UPDATE" | "DELETE" | "MERGE" | "COPY" | "MOVE" | "FETCH", count] => {
            count.parse().ok()
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(buf: &mut Vec<u8>, name: &str, type_oid: u32) {
        buf.extend_from_slice(name.as_bytes());
        buf.push(0);
        buf.extend_from_slice(&0_u32.to_be_bytes());
        buf.extend_from_slice(&0_i16.to_be_bytes());
        buf.extend_from_slice(&type_oid.to_be_bytes());
        buf.extend_from_slice(&(-1_i16).to_be_bytes());
        buf.extend_from_slice(&(-1_i32).to_be_bytes());
        buf.extend_from_slice(&0_u16.to_be_bytes());
    }

    #[test]
    fn parses_row_description() {
        let mut payload = 2_u16.to_be_bytes().to_vec();
        field(&mut payload, "id", 23);
        field(&mut payload, "name", 25);

        let desc = RowDescription::parse(&payload).unwrap();
        assert_eq!(desc.len(), 2);
        assert_eq!(desc.fields()[1].name, b"name");
        assert_eq!(desc.fields()[0].type_oid(), 23);
        assert_eq!(desc.fields()[1].format(), FormatCode::Text);
    }

    #[test]
    fn data_row_values_with_null() {
        let mut payload = 2_u16.to_be_bytes().to_vec();
        payload.extend_from_slice(&(-1_i32).to_be_bytes());
        payload.extend_from_slice(&3_i32.to_be_bytes());
        payload.extend_from_slice(b"abc");

        let row = DataRow::parse(&payload).unwrap();
        assert_eq!(row.to_values().unwrap(), vec![None, Some(b"abc".to_vec())]);
    }

    #[test]
    fn data_row_short_value_is_an_error() {
        let mut payload = 1_u16.to_be_bytes().to_vec();
        payload.extend_from_slice(&10_i32.to_be_bytes());
        payload.extend_from_slice(b"abc");
        assert!(DataRow::parse(&payload).unwrap().to_values().is_err());
    }

    #[test]
    fn command_tag_row_counts() {
        assert_eq!(rows_affected("INSERT 0 3"), Some(3));
        assert_eq!(rows_affected("UPDATE 10"), Some(10));
        assert_eq!(rows_affected("COPY 2"), Some(2));
        assert_eq!(rows_affected("LISTEN"), None);
    }
}
