//! # RESP2 Wire Codec
//!
//! Purpose: Frame outgoing commands and read proxy replies off a blocking
//! stream.
//!
//! ## Design Principles
//! 1. **One Reader per Connection**: `ReplyReader` owns the buffered stream
//!    and its line buffer, so repeated replies reuse the same allocation.
//! 2. **Bounded Input**: Oversized bulk strings and deeply nested arrays are
//!    rejected before any allocation is made for them.
//! 3. **Binary-Safe**: Bulk payloads are raw bytes; UTF-8 is checked later by
//!    the reply mapping.

use std::io::{self, BufRead, BufReader, Read};

use thiserror::Error;

/// Largest bulk payload accepted from a proxy (the store's own limit).
const MAX_BULK_LEN: i64 = 512 * 1024 * 1024;
/// Deepest array nesting accepted in one reply.
const MAX_DEPTH: usize = 32;

/// One decoded reply frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RespValue {
    /// `+OK`, `+PONG`, `+string` status replies.
    Simple(Vec<u8>),
    /// `-ERR ...` and `-WRONGTYPE ...` replies, without the dash.
    Error(Vec<u8>),
    Integer(i64),
    /// `$-1` decodes to `Bulk(None)`.
    Bulk(Option<Vec<u8>>),
    /// `*-1` decodes to `Array(None)`.
    Array(Option<Vec<RespValue>>),
}

impl RespValue {
    /// True for the null bulk string and the null array.
    pub fn is_null(&self) -> bool {
        matches!(self, RespValue::Bulk(None) | RespValue::Array(None))
    }

    /// Text of an error reply.
    pub fn error_message(&self) -> Option<String> {
        match self {
            RespValue::Error(message) => Some(String::from_utf8_lossy(message).into_owned()),
            _ => None,
        }
    }
}

/// Failure while reading a reply.
#[derive(Debug, Error)]
pub enum RespError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("{0}")]
    Protocol(&'static str),
}

/// Appends `args` to `out` as a RESP array of bulk strings.
pub fn encode_command<A: AsRef<[u8]>>(args: &[A], out: &mut Vec<u8>) {
    push_header(out, b'*', args.len());
    for arg in args {
        let arg = arg.as_ref();
        push_header(out, b'$', arg.len());
        out.extend_from_slice(arg);
        out.extend_from_slice(b"\r\n");
    }
}

fn push_header(out: &mut Vec<u8>, marker: u8, len: usize) {
    let mut digits = [0u8; 20];
    let mut pos = digits.len();
    let mut rest = len;
    loop {
        pos -= 1;
        digits[pos] = b'0' + (rest % 10) as u8;
        rest /= 10;
        if rest == 0 {
            break;
        }
    }
    out.push(marker);
    out.extend_from_slice(&digits[pos..]);
    out.extend_from_slice(b"\r\n");
}

/// Blocking reply reader over one stream.
pub struct ReplyReader<R> {
    inner: BufReader<R>,
    line: Vec<u8>,
}

impl<R: Read> ReplyReader<R> {
    pub fn new(stream: R) -> Self {
        ReplyReader {
            inner: BufReader::new(stream),
            line: Vec::with_capacity(128),
        }
    }

    /// The underlying stream, for writing requests.
    pub fn get_mut(&mut self) -> &mut R {
        self.inner.get_mut()
    }

    /// Reads exactly one reply frame.
    pub fn read_reply(&mut self) -> Result<RespValue, RespError> {
        self.read_value(0)
    }

    fn read_value(&mut self, depth: usize) -> Result<RespValue, RespError> {
        if depth > MAX_DEPTH {
            return Err(RespError::Protocol("reply nested too deeply"));
        }
        self.next_line()?;
        let (&marker, body) = self
            .line
            .split_first()
            .ok_or(RespError::Protocol("empty reply line"))?;

        match marker {
            b'+' => Ok(RespValue::Simple(body.to_vec())),
            b'-' => Ok(RespValue::Error(body.to_vec())),
            b':' => Ok(RespValue::Integer(parse_int(body)?)),
            b'$' => {
                let len = parse_int(body)?;
                self.read_bulk(len)
            }
            b'*' => {
                let len = parse_int(body)?;
                if len < 0 {
                    return Ok(RespValue::Array(None));
                }
                let mut items = Vec::with_capacity(len.min(1024) as usize);
                for _ in 0..len {
                    items.push(self.read_value(depth + 1)?);
                }
                Ok(RespValue::Array(Some(items)))
            }
            _ => Err(RespError::Protocol("unknown reply type")),
        }
    }

    fn read_bulk(&mut self, len: i64) -> Result<RespValue, RespError> {
        if len < 0 {
            return Ok(RespValue::Bulk(None));
        }
        if len > MAX_BULK_LEN {
            return Err(RespError::Protocol("bulk reply too large"));
        }
        // Payload plus trailing CRLF in one read.
        let mut data = vec![0u8; len as usize + 2];
        self.inner.read_exact(&mut data)?;
        if !data.ends_with(b"\r\n") {
            return Err(RespError::Protocol("bulk reply missing CRLF"));
        }
        data.truncate(len as usize);
        Ok(RespValue::Bulk(Some(data)))
    }

    fn next_line(&mut self) -> Result<(), RespError> {
        self.line.clear();
        if self.inner.read_until(b'\n', &mut self.line)? == 0 {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "proxy closed the connection").into());
        }
        if !self.line.ends_with(b"\r\n") {
            return Err(RespError::Protocol("reply line missing CRLF"));
        }
        self.line.truncate(self.line.len() - 2);
        Ok(())
    }
}

fn parse_int(text: &[u8]) -> Result<i64, RespError> {
    std::str::from_utf8(text)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or(RespError::Protocol("invalid integer"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn parse(bytes: &[u8]) -> Result<RespValue, RespError> {
        ReplyReader::new(Cursor::new(bytes.to_vec())).read_reply()
    }

    #[test]
    fn encodes_command() {
        let mut buf = Vec::new();
        encode_command(&[&b"SET"[..], &b"key"[..], &b""[..]], &mut buf);
        assert_eq!(&buf, b"*3\r\n$3\r\nSET\r\n$3\r\nkey\r\n$0\r\n\r\n");
    }

    #[test]
    fn reads_scalar_replies() {
        assert_eq!(parse(b"+OK\r\n").unwrap(), RespValue::Simple(b"OK".to_vec()));
        assert_eq!(parse(b":-42\r\n").unwrap(), RespValue::Integer(-42));
        assert_eq!(parse(b"$5\r\nhe\r\no\r\n").unwrap(), RespValue::Bulk(Some(b"he\r\no".to_vec())));

        let err = parse(b"-WRONGTYPE bad\r\n").unwrap();
        assert_eq!(err.error_message().as_deref(), Some("WRONGTYPE bad"));
    }

    #[test]
    fn reads_nulls_and_nested_arrays() {
        assert!(parse(b"$-1\r\n").unwrap().is_null());
        assert!(parse(b"*-1\r\n").unwrap().is_null());
        assert_eq!(
            parse(b"*2\r\n$1\r\na\r\n*1\r\n:1\r\n").unwrap(),
            RespValue::Array(Some(vec![
                RespValue::Bulk(Some(b"a".to_vec())),
                RespValue::Array(Some(vec![RespValue::Integer(1)])),
            ]))
        );
    }

    #[test]
    fn consecutive_replies_share_a_reader() {
        let mut reader = ReplyReader::new(Cursor::new(b"+PONG\r\n$1\r\nv\r\n".to_vec()));
        assert_eq!(reader.read_reply().unwrap(), RespValue::Simple(b"PONG".to_vec()));
        assert_eq!(reader.read_reply().unwrap(), RespValue::Bulk(Some(b"v".to_vec())));
        assert!(matches!(reader.read_reply(), Err(RespError::Io(_))));
    }

    #[test]
    fn rejects_malformed_frames() {
        assert!(matches!(parse(b"?x\r\n"), Err(RespError::Protocol(_))));
        assert!(matches!(parse(b":12\n"), Err(RespError::Protocol(_))));
        assert!(matches!(parse(b"$1\r\nab\r\n"), Err(RespError::Protocol(_))));
        assert!(matches!(parse(b"$999999999999\r\n"), Err(RespError::Protocol(_))));

        let deep = "*1\r\n".repeat(MAX_DEPTH + 2);
        assert!(matches!(parse(deep.as_bytes()), Err(RespError::Protocol(_))));
    }
}
