//! Non-blocking connection establishment.

use std::os::fd::RawFd;

use crate::error::{Error, Result};
use crate::opts::Opts;
use crate::session::Session;
use crate::transport::{PollingStatus, Transport, WireTransport};

/// A session still being set up, for callers running their own event loop.
///
/// After each [`Connecting::process`] step, wait for the socket to become
/// readable or writable as reported, then step again until
/// [`Connecting::done`]. Then take the session with [`Connecting::produce`].
///
/// ```no_run
/// use pg_session::Connecting;
///
/// # fn main() -> pg_session::Result<()> {
/// let mut connecting = Connecting::new("postgres://postgres@localhost/postgres")?;
/// while !connecting.done() {
///     // poll(2) on connecting.sock() for connecting.wait_to_read() /
///     // connecting.wait_to_write() here
///     connecting.process()?;
/// }
/// let session = connecting.produce()?;
/// # drop(session);
/// # Ok(())
/// # }
/// ```
pub struct Connecting {
    transport: Box<dyn Transport>,
    reading: bool,
    writing: bool,
}

impl std::fmt::Debug for Connecting {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connecting")
            .field("reading", &self.reading)
            .field("writing", &self.writing)
            .finish_non_exhaustive()
    }
}

impl Connecting {
    /// Open the socket and take the first step.
    pub fn new<O: TryInto<Opts>>(opts: O) -> Result<Self>
    where
        Error: From<O::Error>,
    {
        let transport = WireTransport::connect_start(opts.try_into()?)?;
        Self::from_transport(Box::new(transport))
    }

    /// Drive a handle whose connect has been started.
    pub fn from_transport(transport: Box<dyn Transport>) -> Result<Self> {
        let mut connecting = Self {
            transport,
            reading: false,
            writing: true,
        };
        connecting.process()?;
        Ok(connecting)
    }

    /// Take one step. Fails with a broken connection when the server
    /// rejects the session or the link goes away.
    pub fn process(&mut self) -> Result<()> {
        let (reading, writing) = match self.transport.poll_connect() {
            PollingStatus::Reading => (true, false),
            PollingStatus::Writing => (false, true),
            PollingStatus::Ok if self.transport.is_ok() => (false, false),
            PollingStatus::Ok | PollingStatus::Failed => {
                self.reading = false;
                self.writing = false;
                return Err(Error::BrokenConnection(self.transport.error_message()));
            }
        };
        tracing::trace!(reading, writing, "connect step");
        self.reading = reading;
        self.writing = writing;
        Ok(())
    }

    /// Wait for the socket to become readable before the next step.
    pub fn wait_to_read(&self) -> bool {
        self.reading
    }

    /// Wait for the socket to become writable before the next step.
    pub fn wait_to_write(&self) -> bool {
        self.writing
    }

    pub fn done(&self) -> bool {
        !self.reading && !self.writing
    }

    pub fn sock(&self) -> Option<RawFd> {
        self.transport.socket()
    }

    /// The finished session.
    pub fn produce(self) -> Result<Session> {
        if !self.done() {
            return Err(Error::Usage(
                "Tried to produce a nonblocking connection before it was done.".into(),
            ));
        }
        Session::from_transport(self.transport)
    }
}
