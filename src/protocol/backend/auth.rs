//! Startup, authentication and asynchronous backend messages.

use zerocopy::byteorder::big_endian::U32 as U32BE;
use zerocopy::{FromBytes, Immutable, KnownLayout};

use crate::error::{Error, Result};
use crate::protocol::codec::Reader;
use crate::protocol::types::TransactionStatus;

/// Authentication method constants.
pub mod auth_type {
    pub const OK: i32 = 0;
    pub const KERBEROS_V5: i32 = 2;
    pub const CLEARTEXT_PASSWORD: i32 = 3;
    pub const MD5_PASSWORD: i32 = 5;
    pub const GSS: i32 = 7;
    pub const GSS_CONTINUE: i32 = 8;
    pub const SSPI: i32 = 9;
    pub const SASL: i32 = 10;
    pub const SASL_CONTINUE: i32 = 11;
    pub const SASL_FINAL: i32 = 12;
}

/// Authentication message from the server.
#[derive(Debug)]
pub enum AuthenticationMessage<'a> {
    /// Authentication successful
    Ok,
    /// Cleartext password required
    CleartextPassword,
    /// MD5 password required (with 4-byte salt)
    Md5Password { salt: [u8; 4] },
    /// SASL authentication required (with list of mechanisms)
    Sasl { mechanisms: Vec<&'a str> },
    /// SASL continue (with server-first-message)
    SaslContinue { data: &'a [u8] },
    /// SASL final (with server-final-message)
    SaslFinal { data: &'a [u8] },
    /// Kerberos, GSSAPI or SSPI; not supported by this client
    Unsupported(i32),
}

impl<'a> AuthenticationMessage<'a> {
    /// Parse an Authentication message from payload bytes.
    pub fn parse(payload: &'a [u8]) -> Result<Self> {
        let mut r = Reader::new(payload);
        let auth_type = r.i32()?;

        match auth_type {
            auth_type::OK => Ok(AuthenticationMessage::Ok),
            auth_type::CLEARTEXT_PASSWORD => Ok(AuthenticationMessage::CleartextPassword),
            auth_type::MD5_PASSWORD => {
                let mut salt = [0u8; 4];
                salt.copy_from_slice(r.bytes(4)?);
                Ok(AuthenticationMessage::Md5Password { salt })
            }
            auth_type::SASL => {
                let mut mechanisms = Vec::new();
                while r.peek().is_some_and(|b| b != 0) {
                    mechanisms.push(r.cstr()?);
                }
                Ok(AuthenticationMessage::Sasl { mechanisms })
            }
            auth_type::SASL_CONTINUE => Ok(AuthenticationMessage::SaslContinue {
                data: r.remaining(),
            }),
            auth_type::SASL_FINAL => Ok(AuthenticationMessage::SaslFinal {
                data: r.remaining(),
            }),
            auth_type::KERBEROS_V5
            | auth_type::GSS
            | auth_type::GSS_CONTINUE
            | auth_type::SSPI => Ok(AuthenticationMessage::Unsupported(auth_type)),
            _ => Err(Error::Protocol(format!(
                "Unknown authentication type: {auth_type}"
            ))),
        }
    }
}

/// BackendKeyData message - contains process ID and secret key for cancellation.
#[derive(Debug, Clone, Copy, FromBytes, KnownLayout, Immutable)]
#[repr(C, packed)]
pub struct BackendKeyData {
    /// Process ID of the backend
    pub pid: U32BE,
    /// Secret key for cancellation
    pub secret_key: U32BE,
}

impl BackendKeyData {
    /// Parse a BackendKeyData message from payload bytes.
    pub fn parse(payload: &[u8]) -> Result<&Self> {
        Ok(Self::ref_from_bytes(payload)?)
    }

    /// Get the process ID.
    pub fn process_id(&self) -> u32 {
        self.pid.get()
    }

    /// Get the secret key.
    pub fn secret(&self) -> u32 {
        self.secret_key.get()
    }
}

/// ParameterStatus message - server parameter name and value.
#[derive(Debug, Clone)]
pub struct ParameterStatus<'a> {
    /// Parameter name
    pub name: &'a str,
    /// Parameter value
    pub value: &'a str,
}

impl<'a> ParameterStatus<'a> {
    /// Parse a ParameterStatus message from payload bytes.
    pub fn parse(payload: &'a [u8]) -> Result<Self> {
        let mut r = Reader::new(payload);
        let name = r.cstr()?;
        let value = r.cstr()?;
        Ok(Self { name, value })
    }
}

/// ReadyForQuery message - indicates server is ready for a new query.
#[derive(Debug, Clone, Copy, FromBytes, KnownLayout, Immutable)]
#[repr(C, packed)]
pub struct ReadyForQuery {
    /// Transaction status byte
    pub status: u8,
}

impl ReadyForQuery {
    /// Parse a ReadyForQuery message from payload bytes.
    pub fn parse(payload: &[u8]) -> Result<&Self> {
        Ok(Self::ref_from_bytes(payload)?)
    }

    /// Get the transaction status.
    pub fn transaction_status(&self) -> Option<TransactionStatus> {
        TransactionStatus::from_byte(self.status)
    }
}

/// NotificationResponse message - asynchronous notification from LISTEN/NOTIFY.
#[derive(Debug, Clone)]
pub struct NotificationResponse<'a> {
    /// PID of the notifying backend
    pub pid: u32,
    /// Channel name
    pub channel: &'a str,
    /// Notification payload
    pub payload: &'a str,
}

impl<'a> NotificationResponse<'a> {
    /// Parse a NotificationResponse message from payload bytes.
    pub fn parse(payload: &'a [u8]) -> Result<Self> {
        let mut r = Reader::new(payload);
        let pid = r.u32()?;
        let channel = r.cstr()?;
        let payload = r.cstr()?;
        Ok(Self {
            pid,
            channel,
            payload,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_sasl_mechanisms() {
        let mut payload = 10_i32.to_be_bytes().to_vec();
        payload.extend_from_slice(b"SCRAM-SHA-256-PLUS\0SCRAM-SHA-256\0\0");
        match AuthenticationMessage::parse(&payload).unwrap() {
            AuthenticationMessage::Sasl { mechanisms } => {
                assert_eq!(mechanisms, ["SCRAM-SHA-256-PLUS", "SCRAM-SHA-256"]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn md5_without_salt_is_rejected() {
        let payload = 5_i32.to_be_bytes();
        assert!(AuthenticationMessage::parse(&payload).is_err());
    }

    #[test]
    fn parses_backend_key_and_ready() {
        let payload = [0, 0, 0x30, 0x39, 0xde, 0xad, 0xbe, 0xef];
        let key = BackendKeyData::parse(&payload).unwrap();
        assert_eq!(key.process_id(), 12345);
        assert_eq!(key.secret(), 0xdead_beef);

        let ready = ReadyForQuery::parse(b"T").unwrap();
        assert_eq!(
            ready.transaction_status(),
            Some(TransactionStatus::InTransaction)
        );
    }

    #[test]
    fn parses_notification() {
        let mut payload = 4242_u32.to_be_bytes().to_vec();
        payload.extend_from_slice(b"orders\0{\"id\":7}\0");
        let n = NotificationResponse::parse(&payload).unwrap();
        assert_eq!(n.pid, 4242);
        assert_eq!(n.channel, "orders");
        assert_eq!(n.payload, "{\"id\":7}");
    }
}
