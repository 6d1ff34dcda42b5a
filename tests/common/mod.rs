//! Scripted in-process transport for driving a `Session` without a server.

#![allow(dead_code)]

use std::collections::{BTreeMap, VecDeque};
use std::os::fd::RawFd;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use pg_session::cancel::CancelToken;
use pg_session::result::Column;
use pg_session::transport::{CopyData, CopyEnd, PollingStatus, RawNotification, Transport};
use pg_session::{
    ErrorFields, ExecStatus, NoticeContext, Opts, RawOutcome, Session, TransactionStatus,
};

/// Everything the scripted transport records and serves.
pub struct Script {
    /// Statements in the order they were issued.
    pub statements: Vec<String>,
    /// Parameters of each `exec_params`/`exec_prepared` call, as text.
    pub params: Vec<Vec<Option<String>>>,
    /// Served by `exec`, `exec_params` and `exec_prepared`. When empty, a
    /// command-complete outcome tagged with the statement's first word.
    pub outcomes: VecDeque<RawOutcome>,
    /// Served by `get_result`.
    pub results: VecDeque<RawOutcome>,
    pub notifications: VecDeque<RawNotification>,
    /// Moved into `notifications` by `wait_readable`.
    pub arriving: VecDeque<RawNotification>,
    pub copy_out: VecDeque<CopyData>,
    pub copy_in: Vec<Vec<u8>>,
    /// `Some(reason)` once the COPY FROM STDIN was ended.
    pub copy_end: Option<Option<String>>,
    pub fail_copy_writes: bool,
    pub polls: VecDeque<PollingStatus>,
    pub encoding_id: i32,
    pub protocol_version: i32,
    pub server_version: i32,
    pub broken: bool,
    pub error: String,
    pub finished: bool,
    pub fail_finish: bool,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            statements: Vec::new(),
            params: Vec::new(),
            outcomes: VecDeque::new(),
            results: VecDeque::new(),
            notifications: VecDeque::new(),
            arriving: VecDeque::new(),
            copy_out: VecDeque::new(),
            copy_in: Vec::new(),
            copy_end: None,
            fail_copy_writes: false,
            polls: VecDeque::new(),
            // UTF8
            encoding_id: 6,
            protocol_version: 3,
            server_version: 160_000,
            broken: false,
            error: String::new(),
            finished: false,
            fail_finish: false,
        }
    }
}

pub type Shared = Arc<Mutex<Script>>;

pub fn lock(script: &Shared) -> MutexGuard<'_, Script> {
    script.lock().unwrap()
}

pub struct ScriptedTransport {
    script: Shared,
    opts: Opts,
    params: BTreeMap<String, String>,
    notices: Option<Arc<NoticeContext>>,
}

impl ScriptedTransport {
    pub fn new(script: Shared) -> Self {
        Self {
            script,
            opts: Opts {
                user: "alice".into(),
                database: Some("shop".into()),
                ..Opts::default()
            },
            params: BTreeMap::from([(
                "standard_conforming_strings".to_string(),
                "on".to_string(),
            )]),
            notices: None,
        }
    }

    pub fn with_param(mut self, name: &str, value: &str) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    fn script(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap()
    }

    fn run(&mut self, statement: &str, params: Option<Vec<Option<String>>>) -> Option<RawOutcome> {
        let mut script = self.script();
        script.statements.push(statement.to_string());
        if let Some(params) = params {
            script.params.push(params);
        }
        if script.broken {
            return None;
        }
        Some(script.outcomes.pop_front().unwrap_or_else(|| {
            let tag = statement.split_whitespace().next().unwrap_or("");
            RawOutcome::command(tag.to_uppercase())
        }))
    }
}

fn text_params(params: &[Option<&[u8]>]) -> Vec<Option<String>> {
    params
        .iter()
        .map(|p| p.map(|bytes| String::from_utf8_lossy(bytes).into_owned()))
        .collect()
}

impl Transport for ScriptedTransport {
    fn is_ok(&self) -> bool {
        !self.script().broken
    }

    fn error_message(&self) -> String {
        self.script().error.clone()
    }

    fn poll_connect(&mut self) -> PollingStatus {
        self.script().polls.pop_front().unwrap_or(PollingStatus::Ok)
    }

    fn protocol_version(&self) -> i32 {
        self.script().protocol_version
    }

    fn server_version(&self) -> i32 {
        self.script().server_version
    }

    fn backend_pid(&self) -> u32 {
        4242
    }

    fn transaction_status(&self) -> TransactionStatus {
        TransactionStatus::Idle
    }

    fn parameter(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    fn client_encoding_id(&self) -> i32 {
        self.script().encoding_id
    }

    fn set_client_encoding(&mut self, name: &str) -> bool {
        match pg_session::encoding::id_of(name) {
            Some(id) => {
                self.script().encoding_id = id;
                true
            }
            None => false,
        }
    }

    fn exec(&mut self, query: &str) -> Option<RawOutcome> {
        self.run(query, None)
    }

    fn exec_params(&mut self, query: &str, params: &[Option<&[u8]>]) -> Option<RawOutcome> {
        self.run(query, Some(text_params(params)))
    }

    fn prepare(&mut self, name: &str, query: &str) -> Option<RawOutcome> {
        self.run(&format!("PREPARE {name} AS {query}"), None)
    }

    fn exec_prepared(&mut self, name: &str, params: &[Option<&[u8]>]) -> Option<RawOutcome> {
        self.run(&format!("EXECUTE {name}"), Some(text_params(params)))
    }

    fn send_query(&mut self, query: &str) -> bool {
        let mut script = self.script();
        script.statements.push(query.to_string());
        !script.broken
    }

    fn get_result(&mut self) -> Option<RawOutcome> {
        self.script().results.pop_front()
    }

    fn consume_input(&mut self) -> bool {
        !self.script().broken
    }

    fn is_busy(&self) -> bool {
        false
    }

    fn next_notification(&mut self) -> Option<RawNotification> {
        self.script().notifications.pop_front()
    }

    fn get_copy_data(&mut self) -> CopyData {
        self.script().copy_out.pop_front().unwrap_or(CopyData::Done)
    }

    fn put_copy_data(&mut self, data: &[u8]) -> bool {
        let mut script = self.script();
        if script.fail_copy_writes {
            script.error = "could not send data to server".into();
            return false;
        }
        script.copy_in.push(data.to_vec());
        true
    }

    fn put_copy_end(&mut self, error: Option<&str>) -> CopyEnd {
        self.script().copy_end = Some(error.map(str::to_string));
        CopyEnd::Sent
    }

    fn wait_readable(&mut self, _timeout: Option<Duration>) -> pg_session::Result<bool> {
        let mut script = self.script();
        let arrived = !script.arriving.is_empty();
        while let Some(n) = script.arriving.pop_front() {
            script.notifications.push_back(n);
        }
        Ok(arrived)
    }

    fn cancel_token(&self) -> Option<CancelToken> {
        None
    }

    fn set_notice_context(&mut self, context: Arc<NoticeContext>) {
        self.notices = Some(context);
    }

    fn socket(&self) -> Option<RawFd> {
        None
    }

    fn opts(&self) -> &Opts {
        &self.opts
    }

    fn finish(self: Box<Self>) -> pg_session::Result<()> {
        let mut script = self.script();
        script.finished = true;
        if script.fail_finish {
            return Err(pg_session::Error::BrokenConnection(
                "could not send terminate".into(),
            ));
        }
        Ok(())
    }
}

/// A session over a fresh script.
pub fn session() -> (Session, Shared) {
    let script = Shared::default();
    let session = Session::from_transport(Box::new(ScriptedTransport::new(script.clone())))
        .expect("scripted session");
    (session, script)
}

/// Collects every routed notice.
pub fn capture_notices(session: &Session) -> Arc<Mutex<Vec<String>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    session.set_notice_callback(Some(Arc::new(move |notice: &str| {
        sink.lock().unwrap().push(notice.to_string());
    })));
    seen
}

pub fn notification(channel: &str, payload: &str) -> RawNotification {
    RawNotification {
        channel: channel.into(),
        payload: payload.into(),
        backend_pid: 99,
    }
}

pub fn single_value(column: &str, value: &str) -> RawOutcome {
    RawOutcome::tuples(
        vec![Column::text(column)],
        vec![vec![Some(value.as_bytes().to_vec())]],
    )
}

pub fn sql_error(sqlstate: &str, message: &str) -> RawOutcome {
    RawOutcome::error(ErrorFields {
        severity: Some("ERROR".into()),
        code: Some(sqlstate.into()),
        message: Some(message.into()),
        ..ErrorFields::default()
    })
}

pub fn copy_started(status: ExecStatus) -> RawOutcome {
    RawOutcome::new(status)
}
