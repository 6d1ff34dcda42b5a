//! A single-connection PostgreSQL session manager.
//!
//! # Features
//!
//! - **One session, one link**: [`Session`] owns the connection, the prepared
//!   statement registry and a slot for at most one [`Transaction`]
//! - **Notices that outlive the session**: every [`QueryResult`] shares the
//!   session's [`NoticeContext`]
//! - **LISTEN/NOTIFY**: per-channel handlers and shared receivers
//! - **COPY**: line-at-a-time reading and writing
//! - **Non-blocking connect**: [`Connecting`] for callers with their own
//!   event loop
//! - **Sans-I/O protocol core**: protocol logic in `state`, socket handling
//!   in `transport`
//!
//! # Example
//!
//! ```no_run
//! use pg_session::{Notification, Opts, Session};
//!
//! fn main() -> pg_session::Result<()> {
//!     let opts = Opts {
//!         host: "localhost".into(),
//!         user: "postgres".into(),
//!         database: Some("mydb".into()),
//!         password: Some("secret".into()),
//!         ..Default::default()
//!     };
//!
//!     let mut session = Session::connect(opts)?;
//!
//!     let result = session.exec_params("SELECT $1::int + 1", &[&41])?;
//!     let answer: i32 = result.get_as(0, 0)?;
//!     assert_eq!(answer, 42);
//!
//!     session.listen(
//!         "jobs",
//!         Some(Box::new(|n: &Notification<'_>| {
//!             tracing::info!(payload = n.payload, "job queued");
//!             Ok(())
//!         })),
//!     )?;
//!     session.await_notification()?;
//!
//!     session.close()?;
//!     Ok(())
//! }
//! ```

pub mod cancel;
pub mod connecting;
pub mod conversion;
pub mod copy;
pub mod encoding;
pub mod error;
pub mod escape;
pub mod notice;
pub mod notification;
pub mod opts;
pub mod protocol;
pub mod result;
pub mod session;
pub mod state;
pub mod transaction;
pub mod transport;

pub use cancel::CancelToken;
pub use connecting::Connecting;
pub use conversion::{FromSqlText, ToSqlText};
pub use copy::{CopyLine, CopyState};
pub use encoding::EncodingGroup;
pub use error::{Error, ErrorFields, Result, SqlError};
pub use notice::{ErrorHandler, NoticeCallback, NoticeContext, NoticeFlow};
pub use notification::{HandlerError, Notification, NotificationHandler, NotificationReceiver};
pub use opts::{Opts, SslMode};
pub use protocol::types::{Oid, TransactionStatus};
pub use result::{Column, ExecStatus, QueryResult, RawOutcome};
pub use session::{Guest, Session};
pub use transaction::Transaction;
pub use transport::{Transport, WireTransport};
