//! [`Transport`] over the PostgreSQL v3 wire protocol.
//!
//! Protocol decisions live in the sans-I/O machines under `state`; this
//! module only moves bytes and keeps the per-connection bookkeeping
//! (server parameters, buffered notifications, last error text).

use std::collections::{BTreeMap, VecDeque};
use std::io::ErrorKind;
use std::ops::Range;
use std::os::fd::{AsRawFd, RawFd};
use std::sync::Arc;
use std::time::Duration;

use crate::cancel::CancelToken;
use crate::encoding;
use crate::error::{Error, Result};
use crate::notice::NoticeContext;
use crate::opts::Opts;
use crate::protocol::backend::{BackendKeyData, ErrorResponse, RawMessage, msg_type};
use crate::protocol::codec::{HEADER_LEN, frame_len};
use crate::protocol::frontend::{
    write_bind, write_copy_data, write_copy_done, write_copy_fail, write_describe_portal,
    write_execute, write_parse, write_query, write_sync, write_terminate,
};
use crate::protocol::types::TransactionStatus;
use crate::result::{ExecStatus, RawOutcome};
use crate::state::action::{Action, AsyncMessage};
use crate::state::connection::ConnectionStateMachine;
use crate::state::outcome::{Collect, OutcomeCollector};

use super::{CopyData, CopyEnd, PollingStatus, RawNotification, Stream, Transport};

const READ_CHUNK: usize = 8192;

/// Received bytes; frames are consumed from `pos`.
#[derive(Default)]
struct ReadBuf {
    data: Vec<u8>,
    pos: usize,
}

impl ReadBuf {
    fn pending(&self) -> &[u8] {
        self.data.get(self.pos..).unwrap_or_default()
    }

    /// Consume the next complete frame, returning its type byte and the
    /// payload range within `data`.
    fn next_frame(&mut self) -> Result<Option<(u8, Range<usize>)>> {
        let Some((type_byte, len)) = frame_len(self.pending())? else {
            return Ok(None);
        };
        let start = self.pos + HEADER_LEN;
        self.pos += len;
        Ok(Some((type_byte, start..self.pos)))
    }

    fn take_byte(&mut self) -> Option<u8> {
        let byte = self.data.get(self.pos).copied()?;
        self.pos += 1;
        Some(byte)
    }

    /// Whether a complete frame of one of the `wanted` types is buffered.
    fn has_frame(&self, wanted: &[u8]) -> bool {
        let mut rest = self.pending();
        while let Ok(Some((type_byte, len))) = frame_len(rest) {
            if wanted.is_empty() || wanted.contains(&type_byte) {
                return true;
            }
            rest = rest.get(len..).unwrap_or_default();
        }
        false
    }

    fn compact(&mut self) {
        self.data.drain(..self.pos);
        self.pos = 0;
    }
}

struct Io {
    stream: Stream,
    rbuf: ReadBuf,
    wbuf: Vec<u8>,
}

impl Io {
    /// One read into the buffer. `Ok(0)` is end of stream.
    fn fill(&mut self) -> std::io::Result<usize> {
        self.rbuf.compact();
        let start = self.rbuf.data.len();
        self.rbuf.data.resize(start + READ_CHUNK, 0);
        loop {
            let result = self.stream.read(&mut self.rbuf.data[start..]);
            if matches!(&result, Err(e) if e.kind() == ErrorKind::Interrupted) {
                continue;
            }
            self.rbuf.data.truncate(start + result.as_ref().map_or(0, |n| *n));
            return result;
        }
    }

    /// Write out `wbuf`. On `WouldBlock` the unwritten tail stays buffered.
    fn flush(&mut self) -> std::io::Result<()> {
        while !self.wbuf.is_empty() {
            match self.stream.write(&self.wbuf) {
                Ok(0) => return Err(ErrorKind::WriteZero.into()),
                Ok(n) => {
                    self.wbuf.drain(..n);
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        self.stream.flush()
    }
}

/// Read more input. `Ok(false)` when nothing arrived before the socket's
/// timeout or, in non-blocking mode, right away.
fn read_more(io: &mut Io) -> Result<bool> {
    match io.fill() {
        Ok(0) => Err(Error::BrokenConnection(
            "server closed the connection unexpectedly".into(),
        )),
        Ok(_) => Ok(true),
        Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// What the server has told us outside of statement responses.
#[derive(Default)]
struct ServerState {
    params: BTreeMap<String, String>,
    backend_key: Option<BackendKeyData>,
    notifications: VecDeque<RawNotification>,
    notices: Option<Arc<NoticeContext>>,
    last_error: String,
}

impl ServerState {
    fn handle_async(&mut self, msg: RawMessage<'_>) -> Result<()> {
        match AsyncMessage::parse(&msg)? {
            Some(AsyncMessage::Notice(fields)) => self.route_notice(&fields.to_notice_text()),
            Some(AsyncMessage::ParameterChanged { name, value }) => {
                tracing::debug!(%name, %value, "server parameter");
                self.params.insert(name, value);
            }
            Some(AsyncMessage::Notification {
                pid,
                channel,
                payload,
            }) => {
                tracing::debug!(%channel, pid, "notification buffered");
                self.notifications.push_back(RawNotification {
                    channel,
                    payload,
                    backend_pid: pid,
                });
            }
            None => {}
        }
        Ok(())
    }

    fn route_notice(&self, text: &str) {
        match &self.notices {
            Some(context) => context.process_notice(text),
            None => tracing::debug!(notice = text, "notice without a context"),
        }
    }
}

enum Phase {
    Startup {
        machine: Box<ConnectionStateMachine>,
        action: Action,
    },
    Idle,
    /// A statement is in flight.
    Busy(OutcomeCollector),
    CopyOut(OutcomeCollector),
    CopyIn(OutcomeCollector),
    /// The link failed; only teardown is possible.
    Bad,
}

/// A PostgreSQL connection over TCP or a Unix socket.
pub struct WireTransport {
    opts: Opts,
    io: Io,
    phase: Phase,
    server: ServerState,
    transaction_status: TransactionStatus,
}

impl WireTransport {
    /// Open the socket and queue the startup packet without waiting for the
    /// server. Drive the rest with [`Transport::poll_connect`].
    ///
    /// Opening the socket itself is synchronous.
    pub fn connect_start(opts: Opts) -> Result<Self> {
        let stream = Stream::connect(&opts)?;
        stream.set_nonblocking(true)?;

        let mut machine = Box::new(ConnectionStateMachine::new(opts.clone()));
        let mut wbuf = Vec::with_capacity(1024);
        let action = machine.start(&mut wbuf);

        Ok(Self {
            opts,
            io: Io {
                stream,
                rbuf: ReadBuf::default(),
                wbuf,
            },
            phase: Phase::Startup { machine, action },
            server: ServerState::default(),
            transaction_status: TransactionStatus::Idle,
        })
    }

    /// Connect and authenticate, blocking until the session is ready.
    pub fn connect(opts: Opts) -> Result<Self> {
        let mut transport = Self::connect_start(opts)?;
        transport.io.stream.set_nonblocking(false)?;
        transport
            .io
            .stream
            .set_read_timeout(transport.opts.connect_timeout)?;

        match transport.drive_startup(true) {
            Ok(PollingStatus::Ok) => {}
            Ok(_) => return Err(Error::BrokenConnection("timeout expired".into())),
            Err(e) => return Err(e),
        }
        transport.io.stream.set_read_timeout(None)?;
        Ok(transport)
    }

    fn fail(&mut self, err: &Error) {
        tracing::debug!(error = %err, "connection failed");
        self.server.last_error = err.to_string();
        self.phase = Phase::Bad;
    }

    /// Run the startup exchange as far as the socket allows. `blocking`
    /// tells which socket mode the caller has set up.
    fn drive_startup(&mut self, blocking: bool) -> Result<PollingStatus> {
        loop {
            match self.io.flush() {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(PollingStatus::Writing),
                Err(e) => return Err(e.into()),
            }

            let Phase::Startup { machine, action } = &mut self.phase else {
                return Ok(match self.phase {
                    Phase::Bad => PollingStatus::Failed,
                    _ => PollingStatus::Ok,
                });
            };

            let next = *action;
            match next {
                Action::Finished => {
                    self.server.backend_key = machine.backend_key().copied();
                    self.transaction_status = machine.transaction_status();
                    self.phase = Phase::Idle;
                    self.io.stream.set_nonblocking(false)?;
                    tracing::debug!(pid = self.backend_pid(), "connection ready");
                    return Ok(PollingStatus::Ok);
                }
                Action::ReadByte => match self.io.rbuf.take_byte() {
                    Some(byte) => {
                        // Anything after the answer was sent before encryption.
                        if byte == b'S' && !self.io.rbuf.pending().is_empty() {
                            return Err(Error::Protocol(
                                "received unencrypted data after SSL response".into(),
                            ));
                        }
                        *action = machine.process_ssl_response(byte, &mut self.io.wbuf)?;
                    }
                    None => {
                        if !read_more(&mut self.io)? {
                            return Ok(PollingStatus::Reading);
                        }
                    }
                },
                Action::StartTls => {
                    let tls = self.io.stream.start_tls(&self.opts)?;
                    self.io.stream = tls;
                    if blocking {
                        self.io.stream.set_read_timeout(self.opts.connect_timeout)?;
                    } else {
                        self.io.stream.set_read_timeout(None)?;
                        self.io.stream.set_nonblocking(true)?;
                    }
                    *action = machine.ssl_handshake_complete(&mut self.io.wbuf);
                }
                Action::ReadMessage => {
                    let Some((type_byte, range)) = self.io.rbuf.next_frame()? else {
                        if !read_more(&mut self.io)? {
                            return Ok(PollingStatus::Reading);
                        }
                        continue;
                    };
                    let msg = RawMessage::new(type_byte, &self.io.rbuf.data[range]);
                    if msg.is_async() {
                        self.server.handle_async(msg)?;
                        continue;
                    }
                    *action = machine.step(msg, &mut self.io.wbuf)?;
                }
            }
        }
    }

    /// Queue a request and mark the link busy.
    fn send(&mut self, write: impl FnOnce(&mut Vec<u8>)) -> bool {
        match self.phase {
            Phase::Idle => {}
            Phase::Bad => return false,
            _ => {
                self.server.last_error = "another command is already in progress".into();
                return false;
            }
        }
        write(&mut self.io.wbuf);
        if let Err(e) = self.io.flush() {
            self.fail(&e.into());
            return false;
        }
        self.phase = Phase::Busy(OutcomeCollector::new());
        true
    }

    fn flush_or_fail(&mut self) -> bool {
        match self.io.flush() {
            Ok(()) => true,
            Err(e) => {
                self.fail(&e.into());
                false
            }
        }
    }

    fn next_outcome(&mut self) -> Result<Option<RawOutcome>> {
        loop {
            let collector = match &mut self.phase {
                Phase::Busy(collector) => collector,
                Phase::CopyOut(_) => return Ok(Some(RawOutcome::new(ExecStatus::CopyOut))),
                Phase::CopyIn(_) => return Ok(Some(RawOutcome::new(ExecStatus::CopyIn))),
                _ => return Ok(None),
            };

            let Some((type_byte, range)) = self.io.rbuf.next_frame()? else {
                if !read_more(&mut self.io)? {
                    return Err(Error::BrokenConnection(
                        "timed out waiting for the server".into(),
                    ));
                }
                continue;
            };
            let msg = RawMessage::new(type_byte, &self.io.rbuf.data[range]);
            if msg.is_async() {
                self.server.handle_async(msg)?;
                continue;
            }

            match collector.step(msg)? {
                Collect::Pending => {}
                Collect::CopyOut(outcome) => {
                    let collector = std::mem::take(collector);
                    self.phase = Phase::CopyOut(collector);
                    return Ok(Some(outcome));
                }
                Collect::CopyIn(outcome) => {
                    let collector = std::mem::take(collector);
                    self.phase = Phase::CopyIn(collector);
                    return Ok(Some(outcome));
                }
                Collect::Ready => {
                    self.transaction_status = collector.transaction_status();
                    let outcome = std::mem::take(collector).finish();
                    self.phase = Phase::Idle;
                    return Ok(Some(outcome));
                }
            }
        }
    }

    /// Drain the statement in flight and keep the last outcome. COPY
    /// outcomes stop the drain since the caller has to run the copy first.
    fn last_outcome(&mut self) -> Option<RawOutcome> {
        let mut last = None;
        while let Some(outcome) = self.get_result() {
            let copy = matches!(outcome.status, ExecStatus::CopyIn | ExecStatus::CopyOut);
            last = Some(outcome);
            if copy {
                break;
            }
        }
        last
    }

    fn read_available(&mut self) -> Result<()> {
        self.io.stream.set_nonblocking(true)?;
        let read = loop {
            match self.io.fill() {
                Ok(0) => {
                    break Err(Error::BrokenConnection(
                        "server closed the connection unexpectedly".into(),
                    ));
                }
                Ok(_) => {}
                Err(e) if e.kind() == ErrorKind::WouldBlock => break Ok(()),
                Err(e) => break Err(e.into()),
            }
        };
        self.io.stream.set_nonblocking(false)?;

        // Whatever arrived before a disconnect still gets processed.
        if matches!(self.phase, Phase::Idle) {
            self.process_idle_frames()?;
        }
        read
    }

    fn process_idle_frames(&mut self) -> Result<()> {
        while let Some((type_byte, range)) = self.io.rbuf.next_frame()? {
            let msg = RawMessage::new(type_byte, &self.io.rbuf.data[range]);
            if msg.is_async() {
                self.server.handle_async(msg)?;
            } else if type_byte == msg_type::ERROR_RESPONSE {
                // Typically the server announcing that it is shutting down.
                let ErrorResponse(fields) = ErrorResponse::parse(msg.payload)?;
                self.server.route_notice(&fields.to_notice_text());
                if matches!(fields.severity(), Some("FATAL" | "PANIC")) {
                    return Err(Error::sql(fields, ""));
                }
            } else {
                return Err(Error::Protocol(format!(
                    "Unexpected message while idle: '{}'",
                    type_byte as char
                )));
            }
        }
        Ok(())
    }

    fn next_copy_row(&mut self) -> Result<CopyData> {
        loop {
            let Phase::CopyOut(collector) = &mut self.phase else {
                self.server.last_error = "no COPY TO STDOUT in progress".into();
                return Ok(CopyData::Failed);
            };

            let Some((type_byte, range)) = self.io.rbuf.next_frame()? else {
                if !read_more(&mut self.io)? {
                    return Ok(CopyData::Pending);
                }
                continue;
            };
            let msg = RawMessage::new(type_byte, &self.io.rbuf.data[range]);
            match type_byte {
                msg_type::COPY_DATA => return Ok(CopyData::Row(msg.payload.to_vec())),
                _ if msg.is_async() => self.server.handle_async(msg)?,
                _ => {
                    // CopyDone, or an error that ends the stream early; either
                    // way the closing outcome comes from get_result.
                    if type_byte != msg_type::COPY_DONE {
                        collector.step(msg)?;
                    }
                    let collector = std::mem::take(collector);
                    self.phase = Phase::Busy(collector);
                    return Ok(CopyData::Done);
                }
            }
        }
    }
}

/// `16.2 (Debian 16.2-1)` → 160002, `9.6.24` → 90624.
fn parse_server_version(text: &str) -> i32 {
    let end = text
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(text.len());
    let mut parts = text
        .get(..end)
        .unwrap_or_default()
        .split('.')
        .map(|part| part.parse::<i32>().unwrap_or(0));
    let major = parts.next().unwrap_or(0);
    let minor = parts.next().unwrap_or(0);
    let patch = parts.next().unwrap_or(0);
    if major >= 10 {
        major * 10000 + minor
    } else {
        major * 10000 + minor * 100 + patch
    }
}

impl Transport for WireTransport {
    fn is_ok(&self) -> bool {
        !matches!(self.phase, Phase::Bad)
    }

    fn error_message(&self) -> String {
        self.server.last_error.clone()
    }

    fn poll_connect(&mut self) -> PollingStatus {
        match self.drive_startup(false) {
            Ok(status) => status,
            Err(e) => {
                self.fail(&e);
                PollingStatus::Failed
            }
        }
    }

    fn protocol_version(&self) -> i32 {
        match self.phase {
            Phase::Startup { .. } | Phase::Bad => 0,
            _ => 3,
        }
    }

    fn server_version(&self) -> i32 {
        self.parameter("server_version")
            .map_or(0, parse_server_version)
    }

    fn transaction_status(&self) -> TransactionStatus {
        self.transaction_status
    }

    fn backend_pid(&self) -> u32 {
        self.server
            .backend_key
            .as_ref()
            .map_or(0, BackendKeyData::process_id)
    }

    fn parameter(&self, name: &str) -> Option<&str> {
        self.server.params.get(name).map(String::as_str)
    }

    fn client_encoding_id(&self) -> i32 {
        self.parameter("client_encoding")
            .and_then(encoding::id_of)
            .unwrap_or(-1)
    }

    fn set_client_encoding(&mut self, name: &str) -> bool {
        let query = format!("SET client_encoding TO '{}'", name.replace('\'', "''"));
        matches!(self.exec(&query), Some(outcome) if outcome.status == ExecStatus::CommandOk)
    }

    fn exec(&mut self, query: &str) -> Option<RawOutcome> {
        tracing::trace!(query, "exec");
        if !self.send(|buf| write_query(buf, query)) {
            return None;
        }
        self.last_outcome()
    }

    fn exec_params(&mut self, query: &str, params: &[Option<&[u8]>]) -> Option<RawOutcome> {
        tracing::trace!(query, params = params.len(), "exec_params");
        let sent = self.send(|buf| {
            write_parse(buf, "", query, &[]);
            write_bind(buf, "", "", params);
            write_describe_portal(buf, "");
            write_execute(buf, "", 0);
            write_sync(buf);
        });
        if !sent {
            return None;
        }
        self.last_outcome()
    }

    fn prepare(&mut self, name: &str, query: &str) -> Option<RawOutcome> {
        tracing::trace!(name, query, "prepare");
        let sent = self.send(|buf| {
            write_parse(buf, name, query, &[]);
            write_sync(buf);
        });
        if !sent {
            return None;
        }
        self.last_outcome()
    }

    fn exec_prepared(&mut self, name: &str, params: &[Option<&[u8]>]) -> Option<RawOutcome> {
        tracing::trace!(name, params = params.len(), "exec_prepared");
        let sent = self.send(|buf| {
            write_bind(buf, "", name, params);
            write_describe_portal(buf, "");
            write_execute(buf, "", 0);
            write_sync(buf);
        });
        if !sent {
            return None;
        }
        self.last_outcome()
    }

    fn send_query(&mut self, query: &str) -> bool {
        tracing::trace!(query, "send_query");
        self.send(|buf| write_query(buf, query))
    }

    fn get_result(&mut self) -> Option<RawOutcome> {
        match self.next_outcome() {
            Ok(outcome) => outcome,
            Err(e) => {
                self.fail(&e);
                None
            }
        }
    }

    fn consume_input(&mut self) -> bool {
        match self.phase {
            Phase::Bad => return false,
            Phase::Startup { .. } => return true,
            _ => {}
        }
        match self.read_available() {
            Ok(()) => true,
            Err(e) => {
                self.fail(&e);
                false
            }
        }
    }

    fn is_busy(&self) -> bool {
        match self.phase {
            Phase::Busy(_) => !self.io.rbuf.has_frame(&[
                msg_type::READY_FOR_QUERY,
                msg_type::COPY_IN_RESPONSE,
                msg_type::COPY_OUT_RESPONSE,
            ]),
            _ => false,
        }
    }

    fn next_notification(&mut self) -> Option<RawNotification> {
        self.server.notifications.pop_front()
    }

    fn get_copy_data(&mut self) -> CopyData {
        match self.next_copy_row() {
            Ok(data) => data,
            Err(e) => {
                self.fail(&e);
                CopyData::Failed
            }
        }
    }

    fn put_copy_data(&mut self, data: &[u8]) -> bool {
        if !matches!(self.phase, Phase::CopyIn(_)) {
            self.server.last_error = "no COPY FROM STDIN in progress".into();
            return false;
        }
        write_copy_data(&mut self.io.wbuf, data);
        self.flush_or_fail()
    }

    fn put_copy_end(&mut self, error: Option<&str>) -> CopyEnd {
        let Phase::CopyIn(collector) = &mut self.phase else {
            self.server.last_error = "no COPY FROM STDIN in progress".into();
            return CopyEnd::Failed;
        };
        let collector = std::mem::take(collector);
        self.phase = Phase::Busy(collector);
        match error {
            Some(reason) => write_copy_fail(&mut self.io.wbuf, reason),
            None => write_copy_done(&mut self.io.wbuf),
        }
        if self.flush_or_fail() {
            CopyEnd::Sent
        } else {
            CopyEnd::Failed
        }
    }

    fn wait_readable(&mut self, timeout: Option<Duration>) -> Result<bool> {
        if self.io.rbuf.has_frame(&[]) {
            return Ok(true);
        }
        // A zero read timeout means "block forever" to the OS.
        let timeout = timeout.map(|t| t.max(Duration::from_millis(1)));
        self.io.stream.set_read_timeout(timeout)?;
        let ready = read_more(&mut self.io);
        self.io.stream.set_read_timeout(None)?;
        ready
    }

    fn cancel_token(&self) -> Option<CancelToken> {
        let key = self.server.backend_key.as_ref()?;
        Some(match self.opts.socket_path() {
            Some(path) => CancelToken::unix(path, key.process_id(), key.secret()),
            None => CancelToken::tcp(&self.opts.host, self.opts.port, key.process_id(), key.secret()),
        })
    }

    fn set_notice_context(&mut self, context: Arc<NoticeContext>) {
        self.server.notices = Some(context);
    }

    fn socket(&self) -> Option<RawFd> {
        Some(self.io.stream.as_raw_fd())
    }

    fn opts(&self) -> &Opts {
        &self.opts
    }

    fn finish(self: Box<Self>) -> Result<()> {
        let mut this = *self;
        let flushed = if this.is_ok() {
            write_terminate(&mut this.io.wbuf);
            this.io.flush()
        } else {
            Ok(())
        };
        if let Err(e) = this.io.stream.shutdown() {
            tracing::debug!(error = %e, "socket shutdown failed");
        }
        flushed.map_err(Error::from)
    }
}
