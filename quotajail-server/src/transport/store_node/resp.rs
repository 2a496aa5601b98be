//! RESP (Redis Serialization Protocol) framing
//!
//! Used in both directions of the store-node link: the node parses commands
//! and encodes replies, [`RemoteStore`](crate::store::RemoteStore) encodes
//! commands and parses replies.

use anyhow::{Result, bail};
use std::str;

const MAX_BULK_STRING_SIZE: i64 = 64 * 1024; // keys and numbers only
const MAX_ARRAY_SIZE: i64 = 1024;
const MAX_ARRAY_DEPTH: usize = 8;

/// RESP value types
#[derive(Debug, Clone, PartialEq)]
pub enum RespValue {
    /// Simple string: +OK\r\n
    SimpleString(String),
    /// Error: -ERR message\r\n
    Error(String),
    /// Integer: :42\r\n
    Integer(i64),
    /// Bulk string: $6\r\nfoobar\r\n or $-1\r\n (null)
    BulkString(Option<String>),
    /// Array: *2\r\n$3\r\nfoo\r\n$3\r\nbar\r\n
    Array(Vec<RespValue>),
}

impl RespValue {
    /// Build a command array out of bulk strings
    pub fn command<I, S>(parts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        RespValue::Array(
            parts
                .into_iter()
                .map(|part| RespValue::BulkString(Some(part.into())))
                .collect(),
        )
    }

    pub fn error(message: impl AsRef<str>) -> Self {
        RespValue::Error(format!("ERR {}", message.as_ref()))
    }

    /// Append the wire form of this value to `buf`
    pub fn encode(&self, buf: &mut Vec<u8>) {
        match self {
            RespValue::SimpleString(s) => write_line(buf, b'+', s.as_bytes()),
            RespValue::Error(s) => write_line(buf, b'-', s.as_bytes()),
            RespValue::Integer(n) => write_line(buf, b':', n.to_string().as_bytes()),
            RespValue::BulkString(None) => buf.extend_from_slice(b"$-1\r\n"),
            RespValue::BulkString(Some(s)) => {
                write_line(buf, b'$', s.len().to_string().as_bytes());
                buf.extend_from_slice(s.as_bytes());
                buf.extend_from_slice(b"\r\n");
            }
            RespValue::Array(elements) => {
                write_line(buf, b'*', elements.len().to_string().as_bytes());
                for element in elements {
                    element.encode(buf);
                }
            }
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.encode(&mut buf);
        buf
    }
}

fn write_line(buf: &mut Vec<u8>, marker: u8, body: &[u8]) {
    buf.push(marker);
    buf.extend_from_slice(body);
    buf.extend_from_slice(b"\r\n");
}

/// Parse one complete value from the front of `data`
///
/// Returns `Ok(None)` when more bytes are needed, otherwise the value and the
/// number of bytes it occupied.
pub fn parse(data: &[u8]) -> Result<Option<(RespValue, usize)>> {
    parse_at_depth(data, 0)
}

fn parse_at_depth(data: &[u8], depth: usize) -> Result<Option<(RespValue, usize)>> {
    let Some((line, mut consumed)) = read_line(data) else {
        return Ok(None);
    };
    if line.is_empty() {
        bail!("Empty RESP line");
    }
    let body = str::from_utf8(&line[1..])?;

    let value = match line[0] {
        b'+' => RespValue::SimpleString(body.to_string()),
        b'-' => RespValue::Error(body.to_string()),
        b':' => RespValue::Integer(body.parse()?),
        b'$' => {
            let length: i64 = body.parse()?;
            if length == -1 {
                return Ok(Some((RespValue::BulkString(None), consumed)));
            }
            if !(0..=MAX_BULK_STRING_SIZE).contains(&length) {
                bail!("Invalid bulk string length: {}", length);
            }

            let length = length as usize;
            if data.len() < consumed + length + 2 {
                return Ok(None);
            }
            if &data[consumed + length..consumed + length + 2] != b"\r\n" {
                bail!("Bulk string not terminated by CRLF");
            }

            let s = str::from_utf8(&data[consumed..consumed + length])?.to_string();
            consumed += length + 2;
            RespValue::BulkString(Some(s))
        }
        b'*' => {
            if depth >= MAX_ARRAY_DEPTH {
                bail!("Maximum array nesting depth exceeded");
            }

            let count: i64 = body.parse()?;
            if count == -1 {
                return Ok(Some((RespValue::Array(Vec::new()), consumed)));
            }
            if !(0..=MAX_ARRAY_SIZE).contains(&count) {
                bail!("Invalid array size: {}", count);
            }

            let mut elements = Vec::with_capacity(count as usize);
            for _ in 0..count {
                match parse_at_depth(&data[consumed..], depth + 1)? {
                    Some((value, used)) => {
                        elements.push(value);
                        consumed += used;
                    }
                    None => return Ok(None),
                }
            }
            RespValue::Array(elements)
        }
        other => bail!("Invalid RESP type marker: {}", other as char),
    };

    Ok(Some((value, consumed)))
}

/// Read a line terminated by CRLF
/// Returns the line without CRLF and the bytes consumed, or None if incomplete
fn read_line(data: &[u8]) -> Option<(&[u8], usize)> {
    let end = data.windows(2).position(|pair| pair == b"\r\n")?;
    Some((&data[..end], end + 2))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_scalars() {
        assert_eq!(
            parse(b"+OK\r\n").unwrap(),
            Some((RespValue::SimpleString("OK".to_string()), 5))
        );
        assert_eq!(
            parse(b"-ERR unknown command\r\n").unwrap(),
            Some((RespValue::Error("ERR unknown command".to_string()), 22))
        );
        assert_eq!(parse(b":-1\r\n").unwrap(), Some((RespValue::Integer(-1), 5)));
        assert_eq!(parse(b"$-1\r\n").unwrap(), Some((RespValue::BulkString(None), 5)));
    }

    #[test]
    fn test_parse_command_array() {
        let data = b"*2\r\n$4\r\nPING\r\n$2\r\nhi\r\n";
        assert_eq!(
            parse(data).unwrap(),
            Some((RespValue::command(["PING", "hi"]), data.len()))
        );
    }

    #[test]
    fn test_parse_incomplete_input() {
        assert_eq!(parse(b"").unwrap(), None);
        assert_eq!(parse(b":12").unwrap(), None);
        assert_eq!(parse(b"$6\r\nfoo").unwrap(), None);
        assert_eq!(parse(b"*2\r\n$3\r\nfoo\r\n").unwrap(), None);
    }

    #[test]
    fn test_parse_pipelined_values() {
        let data = b":1\r\n:0\r\n";
        let (first, used) = parse(data).unwrap().unwrap();
        assert_eq!(first, RespValue::Integer(1));
        let (second, _) = parse(&data[used..]).unwrap().unwrap();
        assert_eq!(second, RespValue::Integer(0));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse(b"!oops\r\n").is_err());
        assert!(parse(b"\r\n").is_err());
        assert!(parse(b"$3\r\nfooXY").is_err());
        assert!(parse(b"$999999999\r\n").is_err());
        assert!(parse(b"*-5\r\n").is_err());
        assert!(parse(b":abc\r\n").is_err());
    }

    #[test]
    fn test_parse_rejects_deep_nesting() {
        let data = "*1\r\n".repeat(MAX_ARRAY_DEPTH + 1) + ":1\r\n";
        assert!(parse(data.as_bytes()).is_err());
    }

    #[test]
    fn test_encode() {
        assert_eq!(RespValue::SimpleString("OK".into()).to_bytes(), b"+OK\r\n");
        assert_eq!(RespValue::Integer(-1).to_bytes(), b":-1\r\n");
        assert_eq!(RespValue::BulkString(None).to_bytes(), b"$-1\r\n");
        assert_eq!(RespValue::error("bad").to_bytes(), b"-ERR bad\r\n");
        assert_eq!(
            RespValue::Array(vec![
                RespValue::BulkString(Some("foo".to_string())),
                RespValue::Integer(42),
            ])
            .to_bytes(),
            b"*2\r\n$3\r\nfoo\r\n:42\r\n"
        );
    }
}
