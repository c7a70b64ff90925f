/// Redis RESP2 (Redis Serialization Protocol) parsing and generation

use bytes::{BufMut, Bytes, BytesMut};
use std::str;

/// RESP data types
#[derive(Debug, Clone, PartialEq)]
pub enum RespValue {
    /// Simple String (+OK\r\n)
    SimpleString(String),
    /// Error (-ERR message\r\n)
    Error(String),
    /// Integer (:123\r\n)
    Integer(i64),
    /// Bulk String ($5\r\nhello\r\n)
    BulkString(Option<Bytes>), // None represents NULL
    /// Array (*2\r\n$5\r\nhello\r\n$5\r\nworld\r\n)
    Array(Option<Vec<RespValue>>), // None represents NULL array
}

/// RESP parser for reading Redis protocol messages
pub struct RespParser;

/// RESP encoder for writing Redis protocol messages
pub struct RespEncoder;

/// Parse error types
#[derive(Debug, thiserror::Error)]
pub enum RespParseError {
    #[error("Invalid RESP format: {0}")]
    InvalidFormat(String),
    #[error("Invalid UTF-8: {0}")]
    InvalidUtf8(#[from] str::Utf8Error),
    #[error("Invalid integer: {0}")]
    InvalidInteger(String),
}

impl RespValue {
    /// Bulk or simple string contents as UTF-8
    pub fn as_str(&self) -> Option<&str> {
        match self {
            RespValue::SimpleString(s) => Some(s),
            RespValue::BulkString(Some(b)) => str::from_utf8(b).ok(),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            RespValue::Integer(n) => Some(*n),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, RespValue::BulkString(None) | RespValue::Array(None))
    }
}

impl RespParser {
    /// Parse one complete RESP value from the front of `buf`.
    ///
    /// Returns `Ok(None)` and leaves `buf` untouched when the value is not
    /// fully buffered yet.
    pub fn parse(buf: &mut BytesMut) -> Result<Option<RespValue>, RespParseError> {
        match Self::parse_at(buf, 0)? {
            Some((value, consumed)) => {
                let _ = buf.split_to(consumed);
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    fn parse_at(data: &[u8], pos: usize) -> Result<Option<(RespValue, usize)>, RespParseError> {
        let Some(&first_byte) = data.get(pos) else {
            return Ok(None);
        };

        let Some((line, next)) = Self::read_line(data, pos + 1) else {
            return Ok(None);
        };

        match first_byte {
            b'+' => Ok(Some((
                RespValue::SimpleString(str::from_utf8(line)?.to_string()),
                next,
            ))),
            b'-' => Ok(Some((RespValue::Error(str::from_utf8(line)?.to_string()), next))),
            b':' => Ok(Some((RespValue::Integer(Self::parse_int(line)?), next))),
            b'$' => {
                let size = Self::parse_int(line)?;
                if size == -1 {
                    return Ok(Some((RespValue::BulkString(None), next)));
                }
                if size < 0 {
                    return Err(RespParseError::InvalidFormat(
                        "Invalid bulk string size".to_string(),
                    ));
                }

                let size = size as usize;
                if data.len() < next + size + 2 {
                    return Ok(None);
                }
                if &data[next + size..next + size + 2] != b"\r\n" {
                    return Err(RespParseError::InvalidFormat(
                        "Missing \\r\\n after bulk string".to_string(),
                    ));
                }

                let content = Bytes::copy_from_slice(&data[next..next + size]);
                Ok(Some((RespValue::BulkString(Some(content)), next + size + 2)))
            }
            b'*' => {
                let size = Self::parse_int(line)?;
                if size == -1 {
                    return Ok(Some((RespValue::Array(None), next)));
                }
                if size < 0 {
                    return Err(RespParseError::InvalidFormat(
                        "Invalid array size".to_string(),
                    ));
                }

                // each element needs at least three bytes, so a hostile header
                // cannot force a huge allocation
                let hint = usize::try_from(size).unwrap_or(0).min((data.len() - next) / 3);
                let mut elements = Vec::with_capacity(hint);
                let mut cursor = next;
                for _ in 0..size {
                    match Self::parse_at(data, cursor)? {
                        Some((element, after)) => {
                            elements.push(element);
                            cursor = after;
                        }
                        None => return Ok(None),
                    }
                }

                Ok(Some((RespValue::Array(Some(elements)), cursor)))
            }
            other => Err(RespParseError::InvalidFormat(format!(
                "Unknown RESP type: {}",
                other as char
            ))),
        }
    }

    fn parse_int(line: &[u8]) -> Result<i64, RespParseError> {
        btoi::btoi::<i64>(line)
            .map_err(|_| RespParseError::InvalidInteger(String::from_utf8_lossy(line).into_owned()))
    }

    /// Line content starting at `start` up to `\r\n`, and the offset after it
    fn read_line(data: &[u8], start: usize) -> Option<(&[u8], usize)> {
        let rest = data.get(start..)?;
        rest.windows(2)
            .position(|w| w == b"\r\n")
            .map(|i| (&rest[..i], start + i + 2))
    }
}

impl RespEncoder {
    /// Encode a RESP value to bytes
    pub fn encode(value: &RespValue) -> Bytes {
        let mut buf = BytesMut::new();
        Self::encode_into(&mut buf, value);
        buf.freeze()
    }

    /// Encode a RESP value into an existing buffer
    pub fn encode_into(buf: &mut BytesMut, value: &RespValue) {
        match value {
            RespValue::SimpleString(s) => {
                buf.put_u8(b'+');
                buf.extend_from_slice(s.as_bytes());
                buf.put_slice(b"\r\n");
            }
            RespValue::Error(s) => {
                buf.put_u8(b'-');
                buf.extend_from_slice(s.as_bytes());
                buf.put_slice(b"\r\n");
            }
            RespValue::Integer(n) => {
                buf.put_u8(b':');
                buf.extend_from_slice(n.to_string().as_bytes());
                buf.put_slice(b"\r\n");
            }
            RespValue::BulkString(Some(data)) => {
                buf.put_u8(b'$');
                buf.extend_from_slice(data.len().to_string().as_bytes());
                buf.put_slice(b"\r\n");
                buf.extend_from_slice(data);
                buf.put_slice(b"\r\n");
            }
            RespValue::BulkString(None) => {
                buf.extend_from_slice(b"$-1\r\n");
            }
            RespValue::Array(Some(elements)) => {
                buf.put_u8(b'*');
                buf.extend_from_slice(elements.len().to_string().as_bytes());
                buf.put_slice(b"\r\n");
                for element in elements {
                    Self::encode_into(buf, element);
                }
            }
            RespValue::Array(None) => {
                buf.extend_from_slice(b"*-1\r\n");
            }
        }
    }

    /// Create a Redis command from command name and arguments
    pub fn create_command(command: &str, args: &[&str]) -> RespValue {
        let mut elements = Vec::with_capacity(args.len() + 1);
        elements.push(RespValue::BulkString(Some(Bytes::copy_from_slice(
            command.as_bytes(),
        ))));

        for arg in args {
            elements.push(RespValue::BulkString(Some(Bytes::copy_from_slice(
                arg.as_bytes(),
            ))));
        }

        RespValue::Array(Some(elements))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_string() {
        let mut buf = BytesMut::from("+OK\r\n");
        let result = RespParser::parse(&mut buf).unwrap().unwrap();
        assert_eq!(result, RespValue::SimpleString("OK".to_string()));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_parse_error() {
        let mut buf = BytesMut::from("-ERR unknown command\r\n");
        let result = RespParser::parse(&mut buf).unwrap().unwrap();
        assert_eq!(result, RespValue::Error("ERR unknown command".to_string()));
    }

    #[test]
    fn test_parse_integer() {
        let mut buf = BytesMut::from(":-2\r\n");
        let result = RespParser::parse(&mut buf).unwrap().unwrap();
        assert_eq!(result, RespValue::Integer(-2));
    }

    #[test]
    fn test_parse_null_bulk_string() {
        let mut buf = BytesMut::from("$-1\r\n");
        let result = RespParser::parse(&mut buf).unwrap().unwrap();
        assert!(result.is_null());
    }

    #[test]
    fn test_parse_array() {
        let mut buf = BytesMut::from("*2\r\n$5\r\nhello\r\n$5\r\nworld\r\n");
        let result = RespParser::parse(&mut buf).unwrap().unwrap();

        if let RespValue::Array(Some(elements)) = result {
            assert_eq!(elements.len(), 2);
            assert_eq!(elements[0].as_str(), Some("hello"));
            assert_eq!(elements[1].as_str(), Some("world"));
        } else {
            panic!("Expected array");
        }
    }

    #[test]
    fn test_incomplete_data_is_left_in_place() {
        let mut buf = BytesMut::from("*2\r\n$5\r\nhello\r\n$5\r\nwor");
        assert!(RespParser::parse(&mut buf).unwrap().is_none());
        assert_eq!(buf.len(), 22);

        buf.extend_from_slice(b"ld\r\n+PONG\r\n");
        let first = RespParser::parse(&mut buf).unwrap().unwrap();
        assert!(matches!(first, RespValue::Array(Some(ref e)) if e.len() == 2));

        let second = RespParser::parse(&mut buf).unwrap().unwrap();
        assert_eq!(second.as_str(), Some("PONG"));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_invalid_input() {
        let mut buf = BytesMut::from("!oops\r\n");
        assert!(RespParser::parse(&mut buf).is_err());

        let mut buf = BytesMut::from(":12x\r\n");
        assert!(matches!(
            RespParser::parse(&mut buf),
            Err(RespParseError::InvalidInteger(_))
        ));
    }

    #[test]
    fn test_oversized_array_header_does_not_allocate() {
        let mut buf = BytesMut::from("*4611686018427387903\r\n");
        assert!(RespParser::parse(&mut buf).unwrap().is_none());
        assert_eq!(buf.len(), 22);

        let mut buf = BytesMut::from("*4611686018427387903\r\n+a\r\n");
        assert!(RespParser::parse(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_encode_command() {
        let command = RespEncoder::create_command("SET", &["key", "value"]);
        let encoded = RespEncoder::encode(&command);
        let expected = "*3\r\n$3\r\nSET\r\n$3\r\nkey\r\n$5\r\nvalue\r\n";
        assert_eq!(encoded, Bytes::from(expected));
    }
}
