//! Connection startup and authentication state machine.

use crate::error::{Error, Result};
use crate::opts::{Opts, SslMode};
use crate::protocol::backend::{
    AuthenticationMessage, BackendKeyData, ErrorResponse, RawMessage, ReadyForQuery, msg_type,
};
use crate::protocol::frontend::auth::{SCRAM_SHA_256, ScramClient, md5_password};
use crate::protocol::frontend::{
    write_password, write_sasl_initial_response, write_sasl_response, write_ssl_request,
    write_startup,
};
use crate::protocol::types::TransactionStatus;

use super::action::Action;

/// Connection state during startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Initial,
    WaitingSslResponse,
    SslHandshake,
    WaitingAuth,
    SaslInProgress,
    WaitingAuthResult,
    WaitingReady,
    Ready,
    Failed,
}

/// Connection startup state machine.
///
/// Asynchronous messages (notices, parameter status) are expected to be
/// filtered out by the caller before [`ConnectionStateMachine::step`].
pub struct ConnectionStateMachine {
    state: ConnectionState,
    options: Opts,
    backend_key: Option<BackendKeyData>,
    transaction_status: TransactionStatus,
    scram_client: Option<ScramClient>,
}

impl ConnectionStateMachine {
    /// Create a new connection state machine.
    pub fn new(options: Opts) -> Self {
        Self {
            state: ConnectionState::Initial,
            options,
            backend_key: None,
            transaction_status: TransactionStatus::Idle,
            scram_client: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Get the backend key data (for cancellation).
    pub fn backend_key(&self) -> Option<&BackendKeyData> {
        self.backend_key.as_ref()
    }

    pub fn transaction_status(&self) -> TransactionStatus {
        self.transaction_status
    }

    /// Start the connection process.
    ///
    /// Unix sockets never negotiate SSL. Over TCP, `prefer` asks for SSL
    /// only when the crate is built with TLS support.
    pub fn start(&mut self, out: &mut Vec<u8>) -> Action {
        let wants_ssl = match self.options.ssl_mode {
            SslMode::Disable => false,
            SslMode::Prefer => cfg!(feature = "sync-tls"),
            SslMode::Require => true,
        };
        if wants_ssl && self.options.socket_path().is_none() {
            write_ssl_request(out);
            self.state = ConnectionState::WaitingSslResponse;
            Action::ReadByte
        } else {
            self.write_startup_message(out);
            self.state = ConnectionState::WaitingAuth;
            Action::ReadMessage
        }
    }

    /// Process SSL response byte ('S' or 'N').
    pub fn process_ssl_response(&mut self, response: u8, out: &mut Vec<u8>) -> Result<Action> {
        match response {
            b'S' => {
                self.state = ConnectionState::SslHandshake;
                Ok(Action::StartTls)
            }
            b'N' => {
                if self.options.ssl_mode == SslMode::Require {
                    self.state = ConnectionState::Failed;
                    return Err(Error::BrokenConnection(
                        "server does not support SSL, but SSL was required".into(),
                    ));
                }
                self.write_startup_message(out);
                self.state = ConnectionState::WaitingAuth;
                Ok(Action::ReadMessage)
            }
            _ => {
                self.state = ConnectionState::Failed;
                Err(Error::Protocol(format!(
                    "Unexpected SSL response: {}",
                    response
                )))
            }
        }
    }

    /// Called once the TLS handshake is done; the startup packet goes out
    /// encrypted.
    pub fn ssl_handshake_complete(&mut self, out: &mut Vec<u8>) -> Action {
        self.write_startup_message(out);
        self.state = ConnectionState::WaitingAuth;
        Action::ReadMessage
    }

    /// Process a message from the server.
    pub fn step(&mut self, msg: RawMessage<'_>, out: &mut Vec<u8>) -> Result<Action> {
        if msg.type_byte == msg_type::ERROR_RESPONSE {
            let ErrorResponse(fields) = ErrorResponse::parse(msg.payload)?;
            self.state = ConnectionState::Failed;
            return Err(Error::sql(fields, ""));
        }

        let result = match self.state {
            ConnectionState::WaitingAuth => self.handle_auth_message(msg, out),
            ConnectionState::SaslInProgress => self.handle_sasl_message(msg, out),
            ConnectionState::WaitingAuthResult => self.handle_auth_result(msg),
            ConnectionState::WaitingReady => self.handle_ready_message(msg),
            _ => Err(Error::Protocol(format!(
                "Unexpected message in state {:?}",
                self.state
            ))),
        };
        if result.is_err() {
            self.state = ConnectionState::Failed;
        }
        result
    }

    fn write_startup_message(&self, out: &mut Vec<u8>) {
        let mut params: Vec<(&str, &str)> = vec![("user", &self.options.user)];

        if let Some(ref db) = self.options.database {
            params.push(("database", db));
        }

        if let Some(ref app) = self.options.application_name {
            params.push(("application_name", app));
        }

        if !self
            .options
            .params
            .iter()
            .any(|(name, _)| name == "client_encoding")
        {
            params.push(("client_encoding", "UTF8"));
        }

        for (name, value) in &self.options.params {
            params.push((name, value));
        }

        write_startup(out, &params);
    }

    fn password(&self) -> Result<&str> {
        self.options
            .password
            .as_deref()
            .ok_or_else(|| Error::Auth("Password required but not provided".into()))
    }

    fn expect_auth<'m>(msg: &RawMessage<'m>) -> Result<AuthenticationMessage<'m>> {
        if msg.type_byte != msg_type::AUTHENTICATION {
            return Err(Error::Protocol(format!(
                "Expected Authentication message, got '{}'",
                msg.type_byte as char
            )));
        }
        AuthenticationMessage::parse(msg.payload)
    }

    fn handle_auth_message(&mut self, msg: RawMessage<'_>, out: &mut Vec<u8>) -> Result<Action> {
        match Self::expect_auth(&msg)? {
            AuthenticationMessage::Ok => {
                self.state = ConnectionState::WaitingReady;
            }
            AuthenticationMessage::CleartextPassword => {
                write_password(out, self.password()?);
                self.state = ConnectionState::WaitingAuthResult;
            }
            AuthenticationMessage::Md5Password { salt } => {
                let hashed = md5_password(&self.options.user, self.password()?, &salt);
                write_password(out, &hashed);
                self.state = ConnectionState::WaitingAuthResult;
            }
            AuthenticationMessage::Sasl { mechanisms } => {
                if !mechanisms.contains(&SCRAM_SHA_256) {
                    return Err(Error::Auth(format!(
                        "No supported SASL mechanism. Server offers: {:?}",
                        mechanisms
                    )));
                }

                let scram = ScramClient::new(self.password()?);
                write_sasl_initial_response(
                    out,
                    SCRAM_SHA_256,
                    scram.client_first_message().as_bytes(),
                );
                self.scram_client = Some(scram);
                self.state = ConnectionState::SaslInProgress;
            }
            other => {
                return Err(Error::FeatureNotSupported(format!(
                    "Unsupported authentication method: {:?}",
                    other
                )));
            }
        }
        Ok(Action::ReadMessage)
    }

    fn handle_sasl_message(&mut self, msg: RawMessage<'_>, out: &mut Vec<u8>) -> Result<Action> {
        let scram = self
            .scram_client
            .as_mut()
            .ok_or_else(|| Error::Protocol("SCRAM client not initialized".into()))?;

        match Self::expect_auth(&msg)? {
            AuthenticationMessage::SaslContinue { data } => {
                let server_first = simdutf8::compat::from_utf8(data)
                    .map_err(|e| Error::Auth(format!("Invalid server-first-message: {}", e)))?;
                let client_final = scram.process_server_first(server_first)?;
                write_sasl_response(out, client_final.as_bytes());
            }
            AuthenticationMessage::SaslFinal { data } => {
                let server_final = simdutf8::compat::from_utf8(data)
                    .map_err(|e| Error::Auth(format!("Invalid server-final-message: {}", e)))?;
                scram.verify_server_final(server_final)?;
                self.state = ConnectionState::WaitingAuthResult;
            }
            other => {
                return Err(Error::Protocol(format!(
                    "Unexpected SASL message: {:?}",
                    other
                )));
            }
        }
        Ok(Action::ReadMessage)
    }

    fn handle_auth_result(&mut self, msg: RawMessage<'_>) -> Result<Action> {
        match Self::expect_auth(&msg)? {
            AuthenticationMessage::Ok => {
                self.state = ConnectionState::WaitingReady;
                Ok(Action::ReadMessage)
            }
            other => Err(Error::Auth(format!("Unexpected auth result: {:?}", other))),
        }
    }

    fn handle_ready_message(&mut self, msg: RawMessage<'_>) -> Result<Action> {
        match msg.type_byte {
            msg_type::BACKEND_KEY_DATA => {
                self.backend_key = Some(*BackendKeyData::parse(msg.payload)?);
                Ok(Action::ReadMessage)
            }
            msg_type::NEGOTIATE_PROTOCOL_VERSION => {
                tracing::debug!("server negotiated protocol version; staying on 3.0");
                Ok(Action::ReadMessage)
            }
            msg_type::READY_FOR_QUERY => {
                let ready = ReadyForQuery::parse(msg.payload)?;
                self.transaction_status = ready.transaction_status().unwrap_or_default();
                self.state = ConnectionState::Ready;
                Ok(Action::Finished)
            }
            _ => Err(Error::Protocol(format!(
                "Unexpected message during startup: '{}'",
                msg.type_byte as char
            ))),
        }
    }
}
