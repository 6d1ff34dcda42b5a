//! COPY sub-protocol, one line at a time.
//!
//! The session tracks which direction is open in [`CopyState`]. Reading and
//! writing never overlap, and no other statement may run until the stream
//! is finished. See [`Session::read_copy_line`], [`Session::write_copy_line`]
//! and [`Session::end_copy_write`].
//!
//! [`Session::read_copy_line`]: crate::Session::read_copy_line
//! [`Session::write_copy_line`]: crate::Session::write_copy_line
//! [`Session::end_copy_write`]: crate::Session::end_copy_write

use crate::error::{Error, Result, check_cast};
use crate::result::QueryResult;
use crate::transport::{CopyData, CopyEnd, Transport};

/// Query text attached to the outcome that closes a COPY.
pub(crate) const END_COPY: &str = "[END COPY]";

/// Which COPY direction, if any, is in progress on a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CopyState {
    #[default]
    Idle,
    /// COPY ... TO STDOUT.
    Reading,
    /// COPY ... FROM STDIN. `failed` is set once a line could not be sent.
    Writing { failed: bool },
}

/// One step of [`Session::read_copy_line`](crate::Session::read_copy_line).
#[derive(Debug)]
pub enum CopyLine {
    /// A row without its trailing newline.
    Row(Vec<u8>),
    /// End of the stream, with the outcome confirming the COPY.
    End(QueryResult),
}

/// Read one line. `None` at end of stream.
pub(crate) fn read_line(transport: &mut dyn Transport) -> Result<Option<Vec<u8>>> {
    match transport.get_copy_data() {
        CopyData::Row(mut line) => {
            if line.last() == Some(&b'\n') {
                line.pop();
            }
            Ok(Some(line))
        }
        CopyData::Done => Ok(None),
        CopyData::Failed => Err(Error::Failure(format!(
            "Reading of table data failed: {}",
            transport.error_message()
        ))),
        CopyData::Pending => Err(Error::Internal(
            "table read inexplicably went asynchronous".into(),
        )),
    }
}

/// Send `line` and then its newline, as two writes.
pub(crate) fn write_line(transport: &mut dyn Transport, line: &[u8]) -> Result<()> {
    check_cast::<i32, usize>(line.len(), "write_copy_line()")?;
    for chunk in [line, b"\n".as_slice()] {
        if !transport.put_copy_data(chunk) {
            return Err(Error::Failure(format!(
                "Error writing to table: {}",
                transport.error_message()
            )));
        }
    }
    Ok(())
}

/// End COPY FROM STDIN. When an earlier line failed the stream is aborted
/// instead and the call fails.
pub(crate) fn end_write(transport: &mut dyn Transport, failed: bool) -> Result<()> {
    let abort = failed.then_some("a line of COPY data could not be sent");
    match transport.put_copy_end(abort) {
        CopyEnd::Sent if failed => Err(Error::Failure(
            "Write to table failed: an earlier line could not be sent".into(),
        )),
        CopyEnd::Sent => Ok(()),
        CopyEnd::Pending => Err(Error::Internal(
            "table write is inexplicably asynchronous".into(),
        )),
        CopyEnd::Failed => Err(Error::Failure(format!(
            "Write to table failed: {}",
            transport.error_message()
        ))),
    }
}
