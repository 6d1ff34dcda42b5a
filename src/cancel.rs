//! Out-of-band query cancellation.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::os::unix::net::UnixStream;

use crate::error::Result;
use crate::protocol::frontend::write_cancel_request;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Target {
    Tcp { host: String, port: u16 },
    Unix(String),
}

/// Everything needed to cancel the statement running on a session.
///
/// A token is `Send + Clone`: hand it to another thread and call
/// [`CancelToken::cancel`] while the session is blocked in a query. It opens
/// a separate connection and never touches the session's own socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CancelToken {
    target: Target,
    backend_pid: u32,
    secret: u32,
}

impl CancelToken {
    pub(crate) fn tcp(host: &str, port: u16, backend_pid: u32, secret: u32) -> Self {
        Self {
            target: Target::Tcp {
                host: host.to_string(),
                port,
            },
            backend_pid,
            secret,
        }
    }

    pub(crate) fn unix(path: String, backend_pid: u32, secret: u32) -> Self {
        Self {
            target: Target::Unix(path),
            backend_pid,
            secret,
        }
    }

    pub fn backend_pid(&self) -> u32 {
        self.backend_pid
    }

    /// Ask the server to cancel whatever the backend is running.
    ///
    /// Success only means the request was delivered; the statement may have
    /// finished before the server acted on it.
    pub fn cancel(&self) -> Result<()> {
        let mut request = Vec::with_capacity(16);
        write_cancel_request(&mut request, self.backend_pid, self.secret);
        tracing::debug!(pid = self.backend_pid, "sending cancel request");

        // The server closes the connection once it has read the request.
        let mut sink = Vec::new();
        match &self.target {
            Target::Tcp { host, port } => {
                let mut stream = TcpStream::connect((host.as_str(), *port))?;
                stream.write_all(&request)?;
                stream.read_to_end(&mut sink)?;
            }
            Target::Unix(path) => {
                let mut stream = UnixStream::connect(path)?;
                stream.write_all(&request)?;
                stream.read_to_end(&mut sink)?;
            }
        }
        Ok(())
    }
}
