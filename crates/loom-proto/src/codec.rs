//! Line-oriented codec for framed IRC streams.
//!
//! Segments the inbound byte stream on CRLF (LF-only tolerated), applies the
//! line-length limits, and parses each line into a [`Message`]. Outbound
//! messages are serialized with a CRLF terminator.

use bytes::{BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::ProtocolError;
use crate::message::Message;
use crate::{MAX_CONTENT_LEN, MAX_TAGS_LEN};

/// Upper bound on a single line: full tags section plus full content.
const MAX_LINE_LEN: usize = MAX_TAGS_LEN + MAX_CONTENT_LEN;

/// Tokio codec turning a byte stream into [`Message`]s and back.
///
/// Lines that are empty, contain no command, or are not valid UTF-8 are
/// skipped silently per the wire contract; an oversize line is a hard codec
/// error and the connection owner closes with `ERROR :Line too long`.
#[derive(Debug, Default)]
pub struct LineCodec {
    _priv: (),
}

impl LineCodec {
    /// Create a new codec.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Decoder for LineCodec {
    type Item = Message;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Message>, ProtocolError> {
        loop {
            let newline = match src.iter().position(|&b| b == b'\n') {
                Some(pos) => pos,
                None => {
                    if src.len() > MAX_LINE_LEN {
                        return Err(ProtocolError::LineTooLong {
                            actual: src.len(),
                            limit: MAX_LINE_LEN,
                        });
                    }
                    return Ok(None);
                }
            };

            let line = src.split_to(newline + 1);
            let mut end = line.len() - 1;
            if end > 0 && line[end - 1] == b'\r' {
                end -= 1;
            }
            let line = &line[..end];

            if line.len() > MAX_LINE_LEN {
                return Err(ProtocolError::LineTooLong {
                    actual: line.len(),
                    limit: MAX_LINE_LEN,
                });
            }

            let text = match std::str::from_utf8(line) {
                Ok(t) => t,
                // Not UTF-8: skip the line, keep the connection.
                Err(_) => continue,
            };

            match text.parse::<Message>() {
                Ok(msg) => return Ok(Some(msg)),
                // Unparseable lines are dropped; only resource-class
                // failures terminate the connection.
                Err(ProtocolError::InvalidMessage { .. }) => continue,
                Err(e) => return Err(e),
            }
        }
    }
}

impl Encoder<Message> for LineCodec {
    type Error = ProtocolError;

    fn encode(&mut self, msg: Message, dst: &mut BytesMut) -> Result<(), ProtocolError> {
        let line = msg.to_string();
        dst.reserve(line.len() + 2);
        dst.put_slice(line.as_bytes());
        dst.put_slice(b"\r\n");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_crlf_and_lf_lines() {
        let mut codec = LineCodec::new();
        let mut buf = BytesMut::from(&b"PING :a\r\nPING :b\n"[..]);

        let a = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(a.params, vec!["a"]);
        let b = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(b.params, vec!["b"]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn skips_empty_lines() {
        let mut codec = LineCodec::new();
        let mut buf = BytesMut::from(&b"\r\n\r\nPING :x\r\n"[..]);
        let msg = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(msg.command, "PING");
    }

    #[test]
    fn partial_line_waits_for_more() {
        let mut codec = LineCodec::new();
        let mut buf = BytesMut::from(&b"PRIVMSG #ch :hel"[..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(b"lo\r\n");
        let msg = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(msg.params[1], "hello");
    }

    #[test]
    fn oversize_line_is_error() {
        let mut codec = LineCodec::new();
        let mut line = vec![b'A'; MAX_LINE_LEN + 10];
        line.push(b'\n');
        let mut buf = BytesMut::from(&line[..]);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(ProtocolError::LineTooLong { .. })
        ));
    }

    #[test]
    fn oversize_unterminated_buffer_is_error() {
        let mut codec = LineCodec::new();
        let mut buf = BytesMut::from(&vec![b'A'; MAX_LINE_LEN + 1][..]);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(ProtocolError::LineTooLong { .. })
        ));
    }

    #[test]
    fn encode_appends_crlf() {
        let mut codec = LineCodec::new();
        let mut buf = BytesMut::new();
        codec
            .encode(Message::new("PING", vec!["tok".into()]), &mut buf)
            .unwrap();
        assert_eq!(&buf[..], b"PING tok\r\n");
    }
}
