//! # RESP2 Server Protocol
//!
//! Purpose: Split an inbound byte stream into command argument lists and
//! encode replies.
//!
//! ## Design Principles
//! 1. **Incremental Parsing**: A partial frame leaves the buffer untouched and
//!    yields `None`; the caller reads more and tries again.
//! 2. **Binary-Safe**: Bulk arguments are copied out as raw bytes.
//! 3. **Fail Fast**: Malformed framing is an error; the connection is closed.

use bytes::{Buf, BufMut, BytesMut};
use thiserror::Error;

/// Upper bound on a single bulk argument.
const MAX_BULK_LEN: usize = 512 * 1024 * 1024;

/// Malformed inbound framing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("protocol error: {0}")]
pub struct ProtocolError(pub &'static str);

/// Stateless parser for client command frames.
#[derive(Debug, Default)]
pub struct RespParser;

impl RespParser {
    pub fn new() -> Self {
        RespParser
    }

    /// Parses one command from the front of `buf`.
    ///
    /// Accepts RESP arrays of bulk strings and inline (space separated)
    /// commands. Consumes the frame only when it is complete.
    pub fn parse(&mut self, buf: &mut BytesMut) -> Result<Option<Vec<Vec<u8>>>, ProtocolError> {
        if buf.is_empty() {
            return Ok(None);
        }
        if buf[0] != b'*' {
            return Ok(parse_inline(buf));
        }

        let (count, mut pos) = match read_line(buf, 0) {
            Some((line, next)) => (parse_len(&line[1..])?, next),
            None => return Ok(None),
        };

        let mut args = Vec::with_capacity(count);
        for _ in 0..count {
            let (len, next) = match read_line(buf, pos) {
                Some((line, next)) => {
                    if line.first() != Some(&b'$') {
                        return Err(ProtocolError("expected bulk string"));
                    }
                    (parse_len(&line[1..])?, next)
                }
                None => return Ok(None),
            };
            if len > MAX_BULK_LEN {
                return Err(ProtocolError("bulk string too large"));
            }
            let end = next + len;
            if buf.len() < end + 2 {
                return Ok(None);
            }
            if &buf[end..end + 2] != b"\r\n" {
                return Err(ProtocolError("missing CRLF after bulk string"));
            }
            args.push(buf[next..end].to_vec());
            pos = end + 2;
        }

        buf.advance(pos);
        Ok(Some(args))
    }
}

fn parse_inline(buf: &mut BytesMut) -> Option<Vec<Vec<u8>>> {
    let (line, next) = read_line(buf, 0)?;
    let args = line
        .split(|b| b.is_ascii_whitespace())
        .filter(|part| !part.is_empty())
        .map(<[u8]>::to_vec)
        .collect();
    buf.advance(next);
    Some(args)
}

// Returns the line starting at `start` without its CRLF, and the offset after it.
fn read_line(buf: &[u8], start: usize) -> Option<(&[u8], usize)> {
    let rest = buf.get(start..)?;
    let idx = rest.windows(2).position(|w| w == b"\r\n")?;
    Some((&rest[..idx], start + idx + 2))
}

fn parse_len(digits: &[u8]) -> Result<usize, ProtocolError> {
    if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) {
        return Err(ProtocolError("invalid length"));
    }
    std::str::from_utf8(digits)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or(ProtocolError("invalid length"))
}

/// One reply frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Simple(&'static str),
    Error(String),
    Integer(i64),
    Bulk(Vec<u8>),
    Null,
    Array(Vec<Reply>),
}

impl Reply {
    pub fn ok() -> Self {
        Reply::Simple("OK")
    }

    /// `-ERR <message>`.
    pub fn err(message: impl AsRef<str>) -> Self {
        Reply::Error(format!("ERR {}", message.as_ref()))
    }

    pub fn wrong_type() -> Self {
        Reply::Error("WRONGTYPE Operation against a key holding the wrong kind of value".to_string())
    }

    pub fn bulk_opt(value: Option<Vec<u8>>) -> Self {
        value.map_or(Reply::Null, Reply::Bulk)
    }

    /// Formats a score the way the store does (`inf`, `-inf`, shortest decimal).
    pub fn score(value: f64) -> Self {
        let text = if value.is_infinite() {
            if value > 0.0 { "inf".to_string() } else { "-inf".to_string() }
        } else {
            value.to_string()
        };
        Reply::Bulk(text.into_bytes())
    }

    pub fn array<I>(items: I) -> Self
    where
        I: IntoIterator<Item = Vec<u8>>,
    {
        Reply::Array(items.into_iter().map(Reply::Bulk).collect())
    }

    pub fn encode(&self, out: &mut BytesMut) {
        match self {
            Reply::Simple(text) => {
                out.put_u8(b'+');
                out.put_slice(text.as_bytes());
                out.put_slice(b"\r\n");
            }
            Reply::Error(message) => {
                out.put_u8(b'-');
                out.put_slice(message.as_bytes());
                out.put_slice(b"\r\n");
            }
            Reply::Integer(value) => {
                out.put_u8(b':');
                out.put_slice(value.to_string().as_bytes());
                out.put_slice(b"\r\n");
            }
            Reply::Bulk(data) => {
                out.put_u8(b'$');
                out.put_slice(data.len().to_string().as_bytes());
                out.put_slice(b"\r\n");
                out.put_slice(data);
                out.put_slice(b"\r\n");
            }
            Reply::Null => out.put_slice(b"$-1\r\n"),
            Reply::Array(items) => {
                out.put_u8(b'*');
                out.put_slice(items.len().to_string().as_bytes());
                out.put_slice(b"\r\n");
                for item in items {
                    item.encode(out);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_complete_frame() {
        let mut buf = BytesMut::from(&b"*2\r\n$3\r\nGET\r\n$1\r\nk\r\n*1\r\n"[..]);
        let args = RespParser::new().parse(&mut buf).unwrap().unwrap();
        assert_eq!(args, vec![b"GET".to_vec(), b"k".to_vec()]);
        assert_eq!(&buf[..], b"*1\r\n");
    }

    #[test]
    fn partial_frame_is_left_in_place() {
        let mut buf = BytesMut::from(&b"*2\r\n$3\r\nGET\r\n$1\r"[..]);
        assert_eq!(RespParser::new().parse(&mut buf).unwrap(), None);
        assert_eq!(buf.len(), 16);
    }

    #[test]
    fn parses_inline_command() {
        let mut buf = BytesMut::from(&b"PING  hello\r\n"[..]);
        let args = RespParser::new().parse(&mut buf).unwrap().unwrap();
        assert_eq!(args, vec![b"PING".to_vec(), b"hello".to_vec()]);
        assert!(buf.is_empty());
    }

    #[test]
    fn rejects_bad_framing() {
        let mut buf = BytesMut::from(&b"*1\r\n+GET\r\n"[..]);
        assert!(RespParser::new().parse(&mut buf).is_err());
        let mut buf = BytesMut::from(&b"*x\r\n"[..]);
        assert!(RespParser::new().parse(&mut buf).is_err());
    }

    #[test]
    fn encodes_nested_reply() {
        let mut out = BytesMut::new();
        Reply::Array(vec![Reply::Bulk(b"a".to_vec()), Reply::Null, Reply::Integer(3)]).encode(&mut out);
        assert_eq!(&out[..], b"*3\r\n$1\r\na\r\n$-1\r\n:3\r\n");

        let mut out = BytesMut::new();
        Reply::score(f64::NEG_INFINITY).encode(&mut out);
        assert_eq!(&out[..], b"$4\r\n-inf\r\n");
    }
}
