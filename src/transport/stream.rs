use std::io::{Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::net::UnixStream;
use std::time::Duration;

#[cfg(feature = "sync-tls")]
use native_tls::{TlsConnector, TlsStream};

use crate::error::{Error, Result};
use crate::opts::Opts;

pub enum Stream {
    Tcp(TcpStream),
    #[cfg(feature = "sync-tls")]
    Tls(Box<TlsStream<TcpStream>>),
    Unix(UnixStream),
}

impl Stream {
    /// Open the socket named by `opts`, honoring `connect_timeout` for TCP.
    pub fn connect(opts: &Opts) -> Result<Self> {
        if let Some(path) = opts.socket_path() {
            return Ok(Self::Unix(UnixStream::connect(path)?));
        }
        if opts.host.is_empty() {
            return Err(Error::Usage("host is empty".into()));
        }
        let tcp = match opts.connect_timeout {
            None => TcpStream::connect((opts.host.as_str(), opts.port))?,
            Some(timeout) => {
                let mut last = None;
                let mut connected = None;
                for addr in (opts.host.as_str(), opts.port).to_socket_addrs()? {
                    match TcpStream::connect_timeout(&addr, timeout) {
                        Ok(tcp) => {
                            connected = Some(tcp);
                            break;
                        }
                        Err(e) => last = Some(e),
                    }
                }
                match (connected, last) {
                    (Some(tcp), _) => tcp,
                    (None, Some(e)) => return Err(e.into()),
                    (None, None) => {
                        return Err(Error::BrokenConnection(format!(
                            "could not translate host name \"{}\" to address",
                            opts.host
                        )));
                    }
                }
            }
        };
        tcp.set_nodelay(true)?;
        Ok(Self::Tcp(tcp))
    }

    /// Run the TLS handshake over this TCP stream and return the encrypted
    /// stream. The handshake blocks, bounded by `connect_timeout`.
    ///
    /// The server certificate and host name are not verified, matching
    /// `sslmode=require`.
    #[cfg(feature = "sync-tls")]
    pub fn start_tls(&self, opts: &Opts) -> Result<Self> {
        let Stream::Tcp(tcp) = self else {
            return Err(Error::Internal("TLS requested on a non-TCP stream".into()));
        };
        // The clone shares the socket; dropping the plain stream keeps it open.
        let tcp = tcp.try_clone()?;
        tcp.set_nonblocking(false)?;
        tcp.set_read_timeout(opts.connect_timeout)?;
        let connector = TlsConnector::builder()
            .danger_accept_invalid_certs(true)
            .danger_accept_invalid_hostnames(true)
            .build()?;
        let tls = connector
            .connect(&opts.host, tcp)
            .map_err(|e| Error::BrokenConnection(format!("SSL handshake failed: {e}")))?;
        tracing::debug!(host = %opts.host, "TLS established");
        Ok(Self::Tls(Box::new(tls)))
    }

    /// Without TLS support an accepted SSLRequest cannot be honored.
    #[cfg(not(feature = "sync-tls"))]
    pub fn start_tls(&self, _opts: &Opts) -> Result<Self> {
        Err(Error::FeatureNotSupported(
            "SSL requested, but the crate was built without the sync-tls feature".into(),
        ))
    }

    pub fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            Stream::Tcp(s) => s.read(buf),
            #[cfg(feature = "sync-tls")]
            Stream::Tls(s) => s.read(buf),
            Stream::Unix(s) => s.read(buf),
        }
    }

    pub fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self {
            Stream::Tcp(s) => s.write(buf),
            #[cfg(feature = "sync-tls")]
            Stream::Tls(s) => s.write(buf),
            Stream::Unix(s) => s.write(buf),
        }
    }

    pub fn flush(&mut self) -> std::io::Result<()> {
        match self {
            Stream::Tcp(s) => s.flush(),
            #[cfg(feature = "sync-tls")]
            Stream::Tls(s) => s.flush(),
            Stream::Unix(s) => s.flush(),
        }
    }

    pub fn set_nonblocking(&self, nonblocking: bool) -> std::io::Result<()> {
        match self {
            Stream::Tcp(s) => s.set_nonblocking(nonblocking),
            #[cfg(feature = "sync-tls")]
            Stream::Tls(s) => s.get_ref().set_nonblocking(nonblocking),
            Stream::Unix(s) => s.set_nonblocking(nonblocking),
        }
    }

    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> std::io::Result<()> {
        match self {
            Stream::Tcp(s) => s.set_read_timeout(timeout),
            #[cfg(feature = "sync-tls")]
            Stream::Tls(s) => s.get_ref().set_read_timeout(timeout),
            Stream::Unix(s) => s.set_read_timeout(timeout),
        }
    }

    pub fn shutdown(&self) -> std::io::Result<()> {
        match self {
            Stream::Tcp(s) => s.shutdown(Shutdown::Both),
            #[cfg(feature = "sync-tls")]
            Stream::Tls(s) => s.get_ref().shutdown(Shutdown::Both),
            Stream::Unix(s) => s.shutdown(Shutdown::Both),
        }
    }
}

impl AsRawFd for Stream {
    fn as_raw_fd(&self) -> RawFd {
        match self {
            Stream::Tcp(s) => s.as_raw_fd(),
            #[cfg(feature = "sync-tls")]
            Stream::Tls(s) => s.get_ref().as_raw_fd(),
            Stream::Unix(s) => s.as_raw_fd(),
        }
    }
}
