//! Simple and extended query protocol messages.
//!
//! Parameters always travel in text format; rendering values to text is the
//! caller's business.

use crate::protocol::codec::MessageBuilder;
use crate::protocol::types::Oid;

/// Write a Query message.
///
/// The query string may contain multiple SQL statements separated by semicolons.
pub fn write_query(buf: &mut Vec<u8>, query: &str) {
    let mut msg = MessageBuilder::new(buf, super::msg_type::QUERY);
    msg.cstr(query);
    msg.finish();
}

/// Write a Parse message.
///
/// - `name`: statement name (empty string for the unnamed statement)
/// - `param_oids`: parameter type OIDs (0 = let server infer)
pub fn write_parse(buf: &mut Vec<u8>, name: &str, query: &str, param_oids: &[Oid]) {
    let mut msg = MessageBuilder::new(buf, super::msg_type::PARSE);
    msg.cstr(name).cstr(query).i16(param_oids.len() as i16);
    for &oid in param_oids {
        msg.i32(oid as i32);
    }
    msg.finish();
}

/// Write a Bind message with text-format parameters and text-format results.
///
/// `None` parameters are sent as SQL NULL. The caller keeps the count within
/// `u16::MAX` and every value within `i32::MAX` bytes.
pub fn write_bind(buf: &mut Vec<u8>, portal: &str, statement: &str, params: &[Option<&[u8]>]) {
    let mut msg = MessageBuilder::new(buf, super::msg_type::BIND);
    msg.cstr(portal).cstr(statement);
    // Zero parameter format codes: all text.
    msg.i16(0);
    msg.u16(params.len() as u16);
    for param in params {
        match param {
            Some(value) => {
                msg.i32(value.len() as i32).bytes(value);
            }
            None => {
                msg.i32(-1);
            }
        }
    }
    // Zero result format codes: all text.
    msg.i16(0);
    msg.finish();
}

/// Write a Describe message for a portal.
pub fn write_describe_portal(buf: &mut Vec<u8>, name: &str) {
    let mut msg = MessageBuilder::new(buf, super::msg_type::DESCRIBE);
    msg.u8(b'P').cstr(name);
    msg.finish();
}

/// Write an Execute message.
///
/// `max_rows` of 0 means no limit.
pub fn write_execute(buf: &mut Vec<u8>, portal: &str, max_rows: u32) {
    let mut msg = MessageBuilder::new(buf, super::msg_type::EXECUTE);
    msg.cstr(portal).i32(max_rows as i32);
    msg.finish();
}

/// Write a Sync message, closing an extended-query sequence.
pub fn write_sync(buf: &mut Vec<u8>) {
    MessageBuilder::new(buf, super::msg_type::SYNC).finish();
}
