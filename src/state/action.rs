//! Action types for state machine I/O requests.

use crate::error::{ErrorFields, Result};
use crate::protocol::backend::{
    NoticeResponse, NotificationResponse, ParameterStatus, RawMessage, msg_type,
};

/// Action requested by a state machine.
///
/// Bytes the machine appended to the output buffer must be written before
/// the requested read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Read a single byte (the answer to an SSLRequest).
    ReadByte,
    /// The server accepted SSL; run the TLS handshake, then call
    /// `ssl_handshake_complete`.
    StartTls,
    /// Read the next complete backend message.
    ReadMessage,
    /// The state machine has finished successfully.
    Finished,
}

/// Asynchronous message from the server.
///
/// These can arrive at any time, including in the middle of a statement.
#[derive(Debug, Clone)]
pub enum AsyncMessage {
    /// Notification from LISTEN/NOTIFY.
    Notification {
        /// PID of the notifying backend process
        pid: u32,
        /// Channel name
        channel: String,
        /// Notification payload
        payload: String,
    },

    /// Non-fatal notice/warning from server.
    Notice(ErrorFields),

    /// Server parameter value changed.
    ParameterChanged {
        /// Parameter name
        name: String,
        /// New value
        value: String,
    },
}

impl AsyncMessage {
    /// Parse an asynchronous message; `None` for any other message type.
    pub fn parse(msg: &RawMessage<'_>) -> Result<Option<Self>> {
        let parsed = match msg.type_byte {
            msg_type::NOTICE_RESPONSE => {
                AsyncMessage::Notice(NoticeResponse::parse(msg.payload)?.0)
            }
            msg_type::PARAMETER_STATUS => {
                let param = ParameterStatus::parse(msg.payload)?;
                AsyncMessage::ParameterChanged {
                    name: param.name.to_string(),
                    value: param.value.to_string(),
                }
            }
            msg_type::NOTIFICATION_RESPONSE => {
                let n = NotificationResponse::parse(msg.payload)?;
                AsyncMessage::Notification {
                    pid: n.pid,
                    channel: n.channel.to_string(),
                    payload: n.payload.to_string(),
                }
            }
            _ => return Ok(None),
        };
        Ok(Some(parsed))
    }
}
