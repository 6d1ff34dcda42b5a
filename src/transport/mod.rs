//! The native connection handle a [`Session`](crate::Session) drives.
//!
//! [`Transport`] is a blocking, single-consumer interface in the shape of a
//! C client library: calls report failure through return values and keep
//! the error text around for [`Transport::error_message`]. The session turns
//! those into [`Error`](crate::Error)s.

mod stream;
mod wire;

use std::os::fd::RawFd;
use std::sync::Arc;
use std::time::Duration;

pub use stream::Stream;
pub use wire::WireTransport;

use crate::cancel::CancelToken;
use crate::error::Result;
use crate::notice::NoticeContext;
use crate::opts::Opts;
use crate::protocol::types::TransactionStatus;
use crate::result::RawOutcome;

/// Result of one non-blocking connect step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollingStatus {
    /// Wait until the socket is readable, then poll again.
    Reading,
    /// Wait until the socket is writable, then poll again.
    Writing,
    Failed,
    Ok,
}

/// One step of a COPY TO STDOUT stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CopyData {
    /// One row, newline included.
    Row(Vec<u8>),
    /// End of stream; fetch the closing outcome with [`Transport::get_result`].
    Done,
    /// No complete row yet (non-blocking use only).
    Pending,
    Failed,
}

/// Outcome of ending a COPY FROM STDIN stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyEnd {
    Sent,
    /// Could not flush yet (non-blocking use only).
    Pending,
    Failed,
}

/// A notification as buffered by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawNotification {
    pub channel: String,
    pub payload: String,
    pub backend_pid: u32,
}

pub trait Transport: Send {
    /// Whether the link is usable.
    fn is_ok(&self) -> bool;

    /// Text of the most recent failure.
    fn error_message(&self) -> String;

    /// Advance a non-blocking connect.
    fn poll_connect(&mut self) -> PollingStatus;

    /// Frontend/backend protocol major version, 0 when not connected.
    fn protocol_version(&self) -> i32;

    /// Server version as `major * 10000 + minor`, 0 when unknown.
    fn server_version(&self) -> i32;

    fn backend_pid(&self) -> u32;

    /// Transaction status reported by the last ReadyForQuery.
    fn transaction_status(&self) -> TransactionStatus;

    /// Last reported value of a server parameter.
    fn parameter(&self, name: &str) -> Option<&str>;

    /// Numeric id of the client encoding, -1 when unknown.
    fn client_encoding_id(&self) -> i32;

    fn set_client_encoding(&mut self, name: &str) -> bool;

    /// Run a simple query and return the last outcome.
    fn exec(&mut self, query: &str) -> Option<RawOutcome>;

    /// Run one statement with text parameters; `None` is NULL.
    fn exec_params(&mut self, query: &str, params: &[Option<&[u8]>]) -> Option<RawOutcome>;

    fn prepare(&mut self, name: &str, query: &str) -> Option<RawOutcome>;

    fn exec_prepared(&mut self, name: &str, params: &[Option<&[u8]>]) -> Option<RawOutcome>;

    /// Send a simple query without waiting for its outcome.
    fn send_query(&mut self, query: &str) -> bool;

    /// Next outcome of the statement in flight; `None` once it is complete.
    fn get_result(&mut self) -> Option<RawOutcome>;

    /// Read whatever the server has sent without blocking. False when the
    /// link is lost.
    fn consume_input(&mut self) -> bool;

    /// Whether [`Transport::get_result`] would block.
    fn is_busy(&self) -> bool;

    /// Pop one buffered notification.
    fn next_notification(&mut self) -> Option<RawNotification>;

    fn get_copy_data(&mut self) -> CopyData;

    fn put_copy_data(&mut self, data: &[u8]) -> bool;

    /// End COPY FROM STDIN; `Some(reason)` aborts it instead.
    fn put_copy_end(&mut self, error: Option<&str>) -> CopyEnd;

    /// Block until input is available, up to `timeout` when given. Returns
    /// false on timeout.
    fn wait_readable(&mut self, timeout: Option<Duration>) -> Result<bool>;

    fn cancel_token(&self) -> Option<CancelToken>;

    /// Route server notices through `context` from now on.
    fn set_notice_context(&mut self, context: Arc<NoticeContext>);

    fn socket(&self) -> Option<RawFd>;

    /// Options the link was opened with.
    fn opts(&self) -> &Opts;

    /// Terminate the session and release the link.
    fn finish(self: Box<Self>) -> Result<()>;
}
