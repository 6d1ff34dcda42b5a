//! Sans-I/O state machines.
//!
//! The machines consume parsed backend messages and append frontend bytes
//! to a caller-owned buffer; the transport owns the socket.

pub mod action;
pub mod connection;
pub mod outcome;
