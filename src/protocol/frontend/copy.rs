//! COPY protocol frontend messages.

use crate::protocol::codec::MessageBuilder;

/// Write a CopyData message.
pub fn write_copy_data(buf: &mut Vec<u8>, data: &[u8]) {
    let mut msg = MessageBuilder::new(buf, super::msg_type::COPY_DATA);
    msg.bytes(data);
    msg.finish();
}

/// Write a CopyDone message.
pub fn write_copy_done(buf: &mut Vec<u8>) {
    MessageBuilder::new(buf, super::msg_type::COPY_DONE).finish();
}

/// Write a CopyFail message, aborting COPY FROM STDIN with `reason`.
pub fn write_copy_fail(buf: &mut Vec<u8>, reason: &str) {
    let mut msg = MessageBuilder::new(buf, super::msg_type::COPY_FAIL);
    msg.cstr(reason);
    msg.finish();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn copy_data_frames_payload_verbatim() {
        let mut buf = Vec::new();
        write_copy_data(&mut buf, b"1\tone");
        write_copy_data(&mut buf, b"\n");

        assert_eq!(&buf[..10], &[b'd', 0, 0, 0, 9, b'1', b'\t', b'o', b'n', b'e']);
        assert_eq!(&buf[10..], &[b'd', 0, 0, 0, 5, b'\n']);
    }

    #[test]
    fn copy_done_and_fail() {
        let mut buf = Vec::new();
        write_copy_done(&mut buf);
        assert_eq!(buf, [b'c', 0, 0, 0, 4]);

        buf.clear();
        write_copy_fail(&mut buf, "no");
        assert_eq!(buf, [b'f', 0, 0, 0, 7, b'n', b'o', 0]);
    }
}
