//! The session: one stateful link to a PostgreSQL backend.

use std::collections::BTreeMap;
use std::os::fd::RawFd;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::cancel::CancelToken;
use crate::conversion::{ToSqlText, render_params};
use crate::copy::{self, CopyLine, CopyState, END_COPY};
use crate::encoding::{self, EncodingGroup};
use crate::error::{Error, Result, SqlError};
use crate::escape;
use crate::notice::{ErrorHandler, NoticeCallback, NoticeContext};
use crate::notification::{NotificationHandler, NotificationReceiver, NotificationRouter};
use crate::opts::Opts;
use crate::protocol::frontend::auth;
use crate::protocol::types::TransactionStatus;
use crate::result::{ExecStatus, QueryResult, RawOutcome};
use crate::transaction::Transaction;
use crate::transport::{Transport, WireTransport};

static NEXT_GUEST_ID: AtomicU64 = AtomicU64::new(1);

fn lost_connection() -> Error {
    Error::BrokenConnection("Lost connection to the database server.".into())
}

fn into_text(bytes: Vec<u8>) -> Result<String> {
    String::from_utf8(bytes).map_err(|e| Error::Internal(format!("escaped text is not UTF-8: {e}")))
}

/// Identity of an object that occupies a session's transaction slot.
///
/// Clones share the identity of the original.
#[derive(Debug, Clone)]
pub struct Guest {
    id: u64,
    class: &'static str,
    name: String,
}

impl Guest {
    pub fn new(class: &'static str, name: impl Into<String>) -> Self {
        Self {
            id: NEXT_GUEST_ID.fetch_add(1, Ordering::Relaxed),
            class,
            name: name.into(),
        }
    }

    pub fn class(&self) -> &'static str {
        self.class
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// `class` or `class 'name'`, for messages.
    pub fn describe(&self) -> String {
        if self.name.is_empty() {
            self.class.to_string()
        } else {
            format!("{} '{}'", self.class, self.name)
        }
    }

    fn is(&self, other: &Guest) -> bool {
        self.id == other.id
    }
}

/// A single connection to a PostgreSQL server.
///
/// Owns the native handle, the notice routing state shared with every
/// [`QueryResult`] it produces, the notification registries, the prepared
/// statement registry and the transaction slot. At most one transaction is
/// registered at a time.
///
/// Dropping the session closes it.
pub struct Session {
    transport: Option<Box<dyn Transport>>,
    notices: Arc<NoticeContext>,
    guest: Option<Guest>,
    router: NotificationRouter,
    unique_id: u64,
    copy: CopyState,
    prepared: BTreeMap<String, String>,
    pending_query: Option<String>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("open", &self.is_open())
            .field("guest", &self.guest)
            .field("router", &self.router)
            .field("copy", &self.copy)
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Connect to a PostgreSQL server and wait for the session to be ready.
    pub fn connect<O: TryInto<Opts>>(opts: O) -> Result<Self>
    where
        Error: From<O::Error>,
    {
        let transport = WireTransport::connect(opts.try_into()?)?;
        Self::from_transport(Box::new(transport))
    }

    /// Wrap an established native handle.
    ///
    /// Fails when the handle is not connected, or when the protocol or the
    /// server is older than this crate supports.
    pub fn from_transport(transport: Box<dyn Transport>) -> Result<Self> {
        let mut session = Self::released();
        session.transport = Some(transport);
        session.set_up_state()?;
        Ok(session)
    }

    /// A session with no handle, as left behind by [`Session::take`].
    fn released() -> Self {
        Self {
            transport: None,
            notices: NoticeContext::new(),
            guest: None,
            router: NotificationRouter::default(),
            unique_id: 0,
            copy: CopyState::Idle,
            prepared: BTreeMap::new(),
            pending_query: None,
        }
    }

    fn set_up_state(&mut self) -> Result<()> {
        let notices = Arc::clone(&self.notices);
        let transport = self.handle_mut()?;
        transport.set_notice_context(notices);

        let protocol = transport.protocol_version();
        if protocol == 0 {
            return Err(Error::BrokenConnection("No connection.".into()));
        }
        if protocol < 3 {
            return Err(Error::FeatureNotSupported(
                "Unsupported frontend/backend protocol version; 3.0 is the minimum.".into(),
            ));
        }
        if transport.server_version() <= 90000 {
            return Err(Error::FeatureNotSupported(
                "Unsupported server version; 9.0 is the minimum.".into(),
            ));
        }
        tracing::debug!(
            backend_pid = transport.backend_pid(),
            server_version = transport.server_version(),
            "session ready"
        );
        Ok(())
    }

    fn handle(&self) -> Result<&dyn Transport> {
        self.transport.as_deref().ok_or_else(lost_connection)
    }

    fn handle_mut(&mut self) -> Result<&mut dyn Transport> {
        match self.transport.as_deref_mut() {
            Some(transport) => Ok(transport),
            None => Err(lost_connection()),
        }
    }

    /// Whether the session has a usable link.
    pub fn is_open(&self) -> bool {
        self.transport.as_deref().is_some_and(|t| t.is_ok())
    }

    /// Text of the most recent transport failure.
    pub fn err_msg(&self) -> String {
        match self.transport.as_deref() {
            Some(transport) => transport.error_message(),
            None => "No connection to database.".to_string(),
        }
    }

    /// Close the session.
    ///
    /// Does nothing when already closed. An open transaction or registered
    /// receivers are reported as notices rather than errors. Error handlers
    /// are unregistered before the link is released, and the handle is gone
    /// afterwards even when releasing it fails.
    pub fn close(&mut self) -> Result<()> {
        let Some(transport) = self.transport.take() else {
            return Ok(());
        };

        if let Some(guest) = &self.guest {
            self.notices.process_notice(&format!(
                "Closing connection while {} is still open.\n",
                guest.describe()
            ));
        }
        if self.router.any_receivers() {
            self.notices
                .process_notice("Closing connection with outstanding receivers.\n");
            self.router.clear_receivers();
        }
        self.notices.unregister_all();

        self.copy = CopyState::Idle;
        self.pending_query = None;
        self.prepared.clear();
        transport.finish()
    }

    // --- Moving ---

    fn check_movable(&self) -> Result<()> {
        if self.guest.is_some() {
            return Err(Error::Usage(
                "Moving a connection with a transaction open.".into(),
            ));
        }
        if self.router.any_receivers() {
            return Err(Error::Usage(
                "Moving a connection with notification receivers registered.".into(),
            ));
        }
        Ok(())
    }

    fn check_overwritable(&self) -> Result<()> {
        if self.guest.is_some() {
            return Err(Error::Usage(
                "Moving a connection onto one with a transaction open.".into(),
            ));
        }
        if self.router.any_receivers() {
            return Err(Error::Usage(
                "Moving a connection onto one with notification receivers registered.".into(),
            ));
        }
        Ok(())
    }

    /// Move the session out, leaving `self` closed.
    ///
    /// Fails, leaving `self` untouched, while a transaction is registered or
    /// receivers exist.
    pub fn take(&mut self) -> Result<Session> {
        self.check_movable()?;
        Ok(std::mem::replace(self, Self::released()))
    }

    /// Close `self` and move `source` into it.
    pub fn assign_from(&mut self, source: &mut Session) -> Result<()> {
        source.check_movable()?;
        self.check_overwritable()?;
        self.close()?;
        *self = source.take()?;
        Ok(())
    }

    // --- Transaction slot ---

    /// Occupy the transaction slot.
    pub fn register_transaction(&mut self, guest: &Guest) -> Result<()> {
        match &self.guest {
            Some(current) if current.is(guest) => Err(Error::Usage(format!(
                "Started twice: {}",
                guest.describe()
            ))),
            Some(current) => Err(Error::Usage(format!(
                "Started new {} while {} was still active.",
                guest.describe(),
                current.describe()
            ))),
            None => {
                self.guest = Some(guest.clone());
                Ok(())
            }
        }
    }

    /// Release the transaction slot. Never fails: a mismatch is reported as
    /// a notice and the slot is cleared anyway.
    pub fn unregister_transaction(&mut self, guest: &Guest) {
        let mismatch = match &self.guest {
            Some(current) if current.is(guest) => None,
            Some(current) => Some(format!(
                "Closed {}; expected to close {}",
                guest.describe(),
                current.describe()
            )),
            None => Some(format!("Closed while not open: {}", guest.describe())),
        };
        if let Some(message) = mismatch {
            self.process_notice(&message);
        }
        self.guest = None;
    }

    /// The guest currently holding the transaction slot.
    pub fn current_transaction(&self) -> Option<&Guest> {
        self.guest.as_ref()
    }

    /// Run `f` inside a transaction. Commits when it returns `Ok`, rolls back
    /// otherwise.
    pub fn run_transaction<T, F>(&mut self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Transaction<'_>) -> Result<T>,
    {
        let mut tx = Transaction::begin(self)?;
        match f(&mut tx) {
            Ok(value) => {
                tx.commit()?;
                Ok(value)
            }
            Err(e) => {
                tx.abort()?;
                Err(e)
            }
        }
    }

    // --- Execution ---

    fn check_no_copy(&self) -> Result<()> {
        match self.copy {
            CopyState::Idle => Ok(()),
            _ => Err(Error::Usage(
                "Cannot execute a statement while a COPY is in progress.".into(),
            )),
        }
    }

    fn make_result(&self, raw: Option<RawOutcome>, query: &str) -> Result<QueryResult> {
        let Some(raw) = raw else {
            return Err(if self.is_open() {
                Error::Failure(self.err_msg())
            } else {
                lost_connection()
            });
        };
        // A result from a link that just died still needs a group.
        let encoding = self.encoding_group().unwrap_or(EncodingGroup::Utf8);
        QueryResult::create(raw, query, Arc::clone(&self.notices), encoding)
    }

    fn track_copy(&mut self, result: &QueryResult) {
        match result.status() {
            ExecStatus::CopyOut => self.copy = CopyState::Reading,
            ExecStatus::CopyIn => self.copy = CopyState::Writing { failed: false },
            _ => {}
        }
    }

    /// Run a statement (or several, separated by semicolons) and return the
    /// last result.
    pub fn exec(&mut self, query: &str) -> Result<QueryResult> {
        self.check_no_copy()?;
        tracing::trace!(query, "exec");
        let raw = self.handle_mut()?.exec(query);
        let result = self.make_result(raw, query)?;
        self.track_copy(&result);
        self.get_notifs()?;
        Ok(result)
    }

    /// Run one statement with `$n` parameters sent as text.
    pub fn exec_params(&mut self, query: &str, params: &[&dyn ToSqlText]) -> Result<QueryResult> {
        self.check_no_copy()?;
        let rendered = render_params(params)?;
        let values: Vec<Option<&[u8]>> = rendered
            .iter()
            .map(|p| p.as_deref().map(str::as_bytes))
            .collect();

        tracing::trace!(query, params = values.len(), "exec_params");
        let raw = self.handle_mut()?.exec_params(query, &values);
        let result = self.make_result(raw, query)?;
        self.track_copy(&result);
        self.get_notifs()?;
        Ok(result)
    }

    /// Prepare `definition` under `name`. An empty name prepares the
    /// unnamed statement, which the next prepare replaces.
    pub fn prepare(&mut self, name: &str, definition: &str) -> Result<()> {
        self.check_no_copy()?;
        tracing::trace!(name, definition, "prepare");
        let raw = self.handle_mut()?.prepare(name, definition);
        self.make_result(raw, definition)?;
        self.prepared.insert(name.to_string(), definition.to_string());
        Ok(())
    }

    pub fn prepare_unnamed(&mut self, definition: &str) -> Result<()> {
        self.prepare("", definition)
    }

    /// Drop a prepared statement with `DEALLOCATE`.
    pub fn unprepare(&mut self, name: &str) -> Result<()> {
        let query = format!("DEALLOCATE {}", self.quote_name(name)?);
        self.exec(&query)?;
        self.prepared.remove(name);
        Ok(())
    }

    pub fn exec_prepared(&mut self, name: &str, params: &[&dyn ToSqlText]) -> Result<QueryResult> {
        self.check_no_copy()?;
        let rendered = render_params(params)?;
        let values: Vec<Option<&[u8]>> = rendered
            .iter()
            .map(|p| p.as_deref().map(str::as_bytes))
            .collect();

        tracing::trace!(name, params = values.len(), "exec_prepared");
        let raw = self.handle_mut()?.exec_prepared(name, &values);
        let result = self.make_result(raw, name)?;
        self.track_copy(&result);
        self.get_notifs()?;
        Ok(result)
    }

    /// Whether `name` was prepared through this session and not unprepared.
    pub fn is_prepared(&self, name: &str) -> bool {
        self.prepared.contains_key(name)
    }

    /// `(name, definition)` of every statement prepared through this session.
    pub fn prepared_statements(&self) -> impl Iterator<Item = (&str, &str)> {
        self.prepared.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Send a query without waiting. Collect its results with
    /// [`Session::get_result`].
    pub fn start_exec(&mut self, query: &str) -> Result<()> {
        self.check_no_copy()?;
        tracing::trace!(query, "start_exec");
        let transport = self.handle_mut()?;
        if !transport.send_query(query) {
            return Err(Error::Failure(transport.error_message()));
        }
        self.pending_query = Some(query.to_string());
        Ok(())
    }

    /// Next result of the query sent with [`Session::start_exec`], `None`
    /// once all of them have been returned.
    pub fn get_result(&mut self) -> Result<Option<QueryResult>> {
        let raw = self.handle_mut()?.get_result();
        if raw.is_none() {
            if !self.is_open() {
                return Err(lost_connection());
            }
            self.pending_query = None;
            return Ok(None);
        }
        let query = self.pending_query.clone().unwrap_or_default();
        let result = self.make_result(raw, &query)?;
        self.track_copy(&result);
        Ok(Some(result))
    }

    /// Read pending input without blocking. False when the link is lost.
    pub fn consume_input(&mut self) -> bool {
        self.transport
            .as_deref_mut()
            .is_some_and(|t| t.consume_input())
    }

    /// Whether [`Session::get_result`] would block.
    pub fn is_busy(&self) -> bool {
        self.transport.as_deref().is_some_and(|t| t.is_busy())
    }

    // --- Cancellation ---

    /// Token for cancelling the running query from another thread.
    pub fn cancel_token(&self) -> Option<CancelToken> {
        self.transport.as_deref().and_then(|t| t.cancel_token())
    }

    /// Ask the server to cancel the query running on this session.
    pub fn cancel_query(&self) -> Result<()> {
        let cancel_error =
            |message: String| Error::Sql(Box::new(SqlError::from_message(message, "[cancel]")));
        let token = self
            .cancel_token()
            .ok_or_else(|| cancel_error("No cancel key available for this connection.".into()))?;
        token.cancel().map_err(|e| cancel_error(e.to_string()))
    }

    // --- Notifications ---

    /// Set or clear the handler for `channel`.
    ///
    /// The first handler on a channel issues `LISTEN`; replacing it issues
    /// nothing; clearing it issues `UNLISTEN`. Not allowed while a
    /// transaction is registered.
    pub fn listen(&mut self, channel: &str, handler: Option<NotificationHandler>) -> Result<()> {
        if self.guest.is_some() {
            return Err(Error::Usage(format!(
                "Attempting to listen for notifications on '{channel}' while transaction is active."
            )));
        }

        match handler {
            Some(handler) => {
                if !self.router.has_handler(channel) {
                    let query = format!("LISTEN {}", self.quote_name(channel)?);
                    self.exec(&query)?;
                }
                self.router.set_handler(channel, handler);
            }
            None => {
                if self.router.has_handler(channel) {
                    let query = format!("UNLISTEN {}", self.quote_name(channel)?);
                    self.exec(&query)?;
                    self.router.remove_handler(channel);
                }
            }
        }
        Ok(())
    }

    /// Channels that have a handler installed.
    pub fn listened_channels(&self) -> impl Iterator<Item = &str> {
        self.router.handler_channels()
    }

    /// Register a receiver. The first one on a channel issues `LISTEN`.
    pub fn add_receiver(&mut self, receiver: Arc<dyn NotificationReceiver>) -> Result<()> {
        let channel = receiver.channel().to_string();
        if !self.router.has_receivers(&channel) {
            let query = format!("LISTEN {}", self.quote_name(&channel)?);
            self.exec(&query)?;
        }
        self.router.add_receiver(receiver);
        Ok(())
    }

    /// Unregister a receiver. The last one on a channel issues `UNLISTEN`.
    /// Problems are reported as notices.
    pub fn remove_receiver(&mut self, receiver: &Arc<dyn NotificationReceiver>) {
        let channel = receiver.channel().to_string();
        match self.router.remove_receiver(receiver) {
            None => self.process_notice(&format!(
                "Attempt to remove unknown receiver '{channel}'\n"
            )),
            Some(false) => {}
            Some(true) => {
                let unlisten = self
                    .quote_name(&channel)
                    .and_then(|name| self.exec(&format!("UNLISTEN {name}")));
                if let Err(e) = unlisten {
                    self.process_notice(&e.to_string());
                }
            }
        }
    }

    /// Deliver every notification the transport has buffered.
    ///
    /// Returns how many were delivered. While a transaction is registered
    /// input is still read but nothing is delivered; the notifications stay
    /// queued for a later call.
    pub fn get_notifs(&mut self) -> Result<usize> {
        let Some(transport) = self.transport.as_deref_mut() else {
            return Err(Error::BrokenConnection("Connection lost.".into()));
        };
        if !transport.consume_input() {
            return Err(Error::BrokenConnection("Connection lost.".into()));
        }
        if self.guest.is_some() {
            return Ok(0);
        }

        let mut delivered = 0;
        while let Some(notification) = transport.next_notification() {
            tracing::debug!(
                channel = %notification.channel,
                backend_pid = notification.backend_pid,
                "delivering notification"
            );
            self.router.dispatch(&notification, &self.notices);
            delivered += 1;
        }
        Ok(delivered)
    }

    /// Deliver notifications, waiting as long as it takes for one to arrive
    /// if none is pending.
    pub fn await_notification(&mut self) -> Result<usize> {
        self.await_notifs(None)
    }

    /// Like [`Session::await_notification`], waiting at most `timeout`.
    pub fn await_notification_timeout(&mut self, timeout: Duration) -> Result<usize> {
        self.await_notifs(Some(timeout))
    }

    fn await_notifs(&mut self, timeout: Option<Duration>) -> Result<usize> {
        let delivered = self.get_notifs()?;
        if delivered > 0 {
            return Ok(delivered);
        }
        self.handle_mut()?.wait_readable(timeout)?;
        self.get_notifs()
    }

    // --- COPY ---

    /// Read the next line of a COPY TO STDOUT started with [`Session::exec`].
    ///
    /// At end of stream the closing outcome is fetched and returned in
    /// [`CopyLine::End`]; reading again after that is an error.
    pub fn read_copy_line(&mut self) -> Result<CopyLine> {
        if self.copy != CopyState::Reading {
            return Err(Error::Usage("No COPY TO STDOUT in progress.".into()));
        }
        match copy::read_line(self.handle_mut()?) {
            Ok(Some(line)) => Ok(CopyLine::Row(line)),
            Ok(None) => {
                self.copy = CopyState::Idle;
                let raw = self.handle_mut()?.get_result();
                let result = self.make_result(raw, END_COPY)?;
                // Consume the end of the response.
                while self.handle_mut()?.get_result().is_some() {}
                Ok(CopyLine::End(result))
            }
            Err(e) => {
                self.copy = CopyState::Idle;
                Err(e)
            }
        }
    }

    /// Send one line of a COPY FROM STDIN. The newline is appended here.
    pub fn write_copy_line(&mut self, line: &[u8]) -> Result<()> {
        let CopyState::Writing { failed } = &mut self.copy else {
            return Err(Error::Usage("No COPY FROM STDIN in progress.".into()));
        };
        let Some(transport) = self.transport.as_deref_mut() else {
            *failed = true;
            return Err(lost_connection());
        };
        let sent = copy::write_line(transport, line);
        if sent.is_err() {
            *failed = true;
        }
        sent
    }

    /// Finish a COPY FROM STDIN and return the outcome confirming it.
    ///
    /// Fails, after aborting the COPY on the server, when any line could not
    /// be written.
    pub fn end_copy_write(&mut self) -> Result<QueryResult> {
        let CopyState::Writing { failed } = self.copy else {
            return Err(Error::Usage("No COPY FROM STDIN in progress.".into()));
        };
        self.copy = CopyState::Idle;

        let transport = self.handle_mut()?;
        if let Err(e) = copy::end_write(transport, failed) {
            if failed {
                // The server answers the abort with an error; drop it.
                while transport.get_result().is_some() {}
            }
            return Err(e);
        }
        let raw = transport.get_result();
        let result = self.make_result(raw, END_COPY)?;
        while self.handle_mut()?.get_result().is_some() {}
        Ok(result)
    }

    /// Which COPY direction, if any, is open.
    pub fn copy_state(&self) -> CopyState {
        self.copy
    }

    // --- Escaping ---

    fn standard_conforming_strings(&self) -> bool {
        self.transport
            .as_deref()
            .and_then(|t| t.parameter("standard_conforming_strings"))
            .is_none_or(|value| value == "on")
    }

    /// Escape `text` for use inside single quotes.
    pub fn esc(&self, text: &str) -> Result<String> {
        let group = self.encoding_group()?;
        into_text(escape::esc(
            text.as_bytes(),
            group,
            self.standard_conforming_strings(),
        )?)
    }

    /// `value` as a complete SQL literal, or `NULL`.
    pub fn quote<T: ToSqlText + ?Sized>(&self, value: &T) -> Result<String> {
        match value.to_sql_text() {
            None => Ok("NULL".to_string()),
            Some(text) => {
                let group = self.encoding_group()?;
                into_text(escape::quote(
                    text.as_bytes(),
                    group,
                    self.standard_conforming_strings(),
                )?)
            }
        }
    }

    /// `name` as a double-quoted identifier.
    pub fn quote_name(&self, name: &str) -> Result<String> {
        let group = self.encoding_group()?;
        into_text(escape::quote_name(name.as_bytes(), group)?)
    }

    /// A dotted path such as `schema.table`, each part quoted.
    pub fn quote_table(&self, path: &[&str]) -> Result<String> {
        let parts = path
            .iter()
            .map(|part| self.quote_name(part))
            .collect::<Result<Vec<_>>>()?;
        Ok(parts.join("."))
    }

    /// Binary data in bytea hex form, without quotes.
    pub fn esc_raw(&self, data: &[u8]) -> String {
        escape::esc_raw(data)
    }

    /// Binary data as a `bytea` literal.
    pub fn quote_raw(&self, data: &[u8]) -> String {
        escape::quote_raw(data)
    }

    /// Decode bytea text in hex or escape format.
    pub fn unesc_raw(&self, text: &str) -> Result<Vec<u8>> {
        escape::unesc_raw(text.as_bytes())
    }

    /// Parse a literal produced by [`Session::quote`] back into its text.
    pub fn unesc_literal(&self, literal: &str) -> Result<String> {
        let group = self.encoding_group()?;
        let bytes = escape::unesc_literal(
            literal.as_bytes(),
            group,
            self.standard_conforming_strings(),
        )?;
        String::from_utf8(bytes).map_err(|e| Error::Argument(format!("literal is not UTF-8: {e}")))
    }

    /// Escape `%`, `_` and `escape_char` in `text` for a LIKE pattern.
    pub fn esc_like(&self, text: &str, escape_char: char) -> Result<String> {
        let escape_byte = u8::try_from(escape_char)
            .ok()
            .filter(u8::is_ascii)
            .ok_or_else(|| {
                Error::Argument(format!(
                    "LIKE escape character must be ASCII, got {escape_char:?}"
                ))
            })?;
        let group = self.encoding_group()?;
        into_text(escape::esc_like(text.as_bytes(), escape_byte, group)?)
    }

    // --- Encoding ---

    /// Numeric id of the client encoding.
    pub fn encoding_id(&self) -> Result<i32> {
        let id = self.handle()?.client_encoding_id();
        if id < 0 {
            return Err(if self.is_open() {
                Error::Failure("Could not obtain client encoding.".into())
            } else {
                lost_connection()
            });
        }
        Ok(id)
    }

    /// Canonical name of the client encoding.
    pub fn client_encoding(&self) -> Result<&'static str> {
        let id = self.encoding_id()?;
        encoding::name_of(id)
            .ok_or_else(|| Error::Argument(format!("Unknown encoding id {id}.")))
    }

    /// The encoding family used to find glyph boundaries.
    pub fn encoding_group(&self) -> Result<EncodingGroup> {
        EncodingGroup::from_id(self.encoding_id()?)
    }

    pub fn set_client_encoding(&mut self, name: &str) -> Result<()> {
        let transport = self.handle_mut()?;
        if transport.set_client_encoding(name) {
            return Ok(());
        }
        Err(if self.is_open() {
            Error::Failure("Setting client encoding failed.".into())
        } else {
            lost_connection()
        })
    }

    // --- Session variables ---

    /// `SET name=value`. `value` is sent as written.
    pub fn set_variable(&mut self, name: &str, value: &str) -> Result<()> {
        let query = format!("SET {}={}", self.quote_name(name)?, value);
        self.exec(&query)?;
        Ok(())
    }

    /// Current value of a session variable, via `SHOW`.
    pub fn get_variable(&mut self, name: &str) -> Result<String> {
        let query = format!("SHOW {}", self.quote_name(name)?);
        let result = self.exec(&query)?;
        Ok(result.one_field()?.unwrap_or_default().to_string())
    }

    /// Hash `password` for `user` the way the server stores it, ready for
    /// `ALTER ROLE .. PASSWORD '<hash>'`.
    ///
    /// With no `algorithm`, the server's `password_encryption` setting picks
    /// one, which costs a round trip.
    pub fn encrypt_password(
        &mut self,
        user: &str,
        password: &str,
        algorithm: Option<&str>,
    ) -> Result<String> {
        let algorithm = match algorithm {
            Some(algorithm) => algorithm.to_string(),
            None => self.get_variable("password_encryption")?,
        };
        auth::encrypt_password(user, password, &algorithm)
    }

    /// A name unique within this session: `x<n>`, or `<base>_<n>`.
    pub fn adorn_name(&mut self, base: &str) -> String {
        self.unique_id += 1;
        if base.is_empty() {
            format!("x{}", self.unique_id)
        } else {
            format!("{base}_{}", self.unique_id)
        }
    }

    // --- Notices ---

    pub fn register_error_handler(&self, handler: Arc<dyn ErrorHandler>) {
        self.notices.register(handler);
    }

    /// Returns false if `handler` was not registered.
    pub fn unregister_error_handler(&self, handler: &Arc<dyn ErrorHandler>) -> bool {
        self.notices.unregister(handler)
    }

    /// Registered error handlers, oldest first.
    pub fn error_handlers(&self) -> Vec<Arc<dyn ErrorHandler>> {
        self.notices.handlers()
    }

    /// Install or clear the callback that receives notices no handler took.
    pub fn set_notice_callback(&self, callback: Option<NoticeCallback>) {
        self.notices.set_callback(callback);
    }

    /// The notice routing state shared with this session's results.
    pub fn notice_context(&self) -> &Arc<NoticeContext> {
        &self.notices
    }

    /// Route a notice as if the server had sent it. A missing trailing
    /// newline is added.
    pub fn process_notice(&self, message: &str) {
        if message.ends_with('\n') {
            self.notices.process_notice(message);
        } else {
            self.notices.process_notice(&format!("{message}\n"));
        }
    }

    // --- Connection details ---

    /// Process id of the backend serving this session, 0 when closed.
    pub fn backend_pid(&self) -> u32 {
        self.transport.as_deref().map_or(0, |t| t.backend_pid())
    }

    /// Frontend/backend protocol major version, 0 when closed.
    pub fn protocol_version(&self) -> i32 {
        self.transport.as_deref().map_or(0, |t| t.protocol_version())
    }

    /// Server version as `major * 10000 + minor`, 0 when closed.
    pub fn server_version(&self) -> i32 {
        self.transport.as_deref().map_or(0, |t| t.server_version())
    }

    /// Server-side transaction status, `Idle` when closed.
    pub fn transaction_status(&self) -> TransactionStatus {
        self.transport
            .as_deref()
            .map_or(TransactionStatus::Idle, |t| t.transaction_status())
    }

    fn opts(&self) -> Option<&Opts> {
        self.transport.as_deref().map(|t| t.opts())
    }

    /// Database name. The server defaults it to the user name.
    pub fn dbname(&self) -> Option<&str> {
        let opts = self.opts()?;
        Some(opts.database.as_deref().unwrap_or(&opts.user))
    }

    pub fn username(&self) -> Option<&str> {
        self.opts().map(|o| o.user.as_str())
    }

    /// Server host, or the socket directory for Unix socket sessions.
    pub fn hostname(&self) -> Option<&str> {
        let opts = self.opts()?;
        Some(opts.socket_dir.as_deref().unwrap_or(&opts.host))
    }

    pub fn port(&self) -> Option<u16> {
        self.opts().map(|o| o.port)
    }

    /// Raw socket descriptor, for readiness polling.
    pub fn sock(&self) -> Option<RawFd> {
        self.transport.as_deref().and_then(|t| t.socket())
    }

    /// `keyword=value` form of the options that differ from their defaults.
    pub fn connection_string(&self) -> Result<String> {
        self.opts().map(Opts::connection_string).ok_or_else(|| {
            Error::Usage("Can't get connection string: connection is not open.".into())
        })
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!(error = %e, "error closing session");
        }
    }
}
