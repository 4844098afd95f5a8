use bytes::{BufMut, BytesMut};
use std::ops::Range;

use crate::error::{RedlineError, RedlineResult};

/// Largest bulk string the decoder accepts (512MB, the server-side limit).
const MAX_BULK_LEN: i64 = 512 * 1024 * 1024;

/// Largest array element count the decoder accepts.
const MAX_ARRAY_LEN: i64 = 1024 * 1024;

/// Deepest array nesting the decoder accepts. Decoded values are dropped,
/// cloned and compared recursively, so depth stays bounded.
const MAX_DEPTH: usize = 512;

/// A RESP2 value.
#[derive(Debug, Clone, PartialEq)]
pub enum RespValue {
    /// +OK\r\n
    SimpleString(String),
    /// -ERR message\r\n
    Error(String),
    /// :1000\r\n
    Integer(i64),
    /// $6\r\nfoobar\r\n  or  $-1\r\n (null)
    BulkString(Option<Vec<u8>>),
    /// *2\r\n...  or  *-1\r\n (null); `Some(vec![])` is the empty array
    Array(Option<Vec<RespValue>>),
}

impl RespValue {
    pub fn ok() -> Self {
        RespValue::SimpleString("OK".to_string())
    }

    pub fn simple_string(s: impl Into<String>) -> Self {
        RespValue::SimpleString(s.into())
    }

    pub fn error(s: impl Into<String>) -> Self {
        RespValue::Error(s.into())
    }

    pub fn integer(n: i64) -> Self {
        RespValue::Integer(n)
    }

    pub fn bulk_string(data: impl Into<Vec<u8>>) -> Self {
        RespValue::BulkString(Some(data.into()))
    }

    pub fn null_bulk_string() -> Self {
        RespValue::BulkString(None)
    }

    pub fn null_array() -> Self {
        RespValue::Array(None)
    }

    pub fn array(items: Vec<RespValue>) -> Self {
        RespValue::Array(Some(items))
    }

    /// Serialize this value to RESP bytes.
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.write_to(&mut buf);
        buf
    }

    /// Write RESP bytes into the given buffer.
    pub fn write_to(&self, buf: &mut Vec<u8>) {
        match self {
            RespValue::SimpleString(s) => {
                buf.push(b'+');
                buf.extend_from_slice(s.as_bytes());
                buf.extend_from_slice(b"\r\n");
            }
            RespValue::Error(s) => {
                buf.push(b'-');
                buf.extend_from_slice(s.as_bytes());
                buf.extend_from_slice(b"\r\n");
            }
            RespValue::Integer(n) => {
                buf.push(b':');
                buf.extend_from_slice(n.to_string().as_bytes());
                buf.extend_from_slice(b"\r\n");
            }
            RespValue::BulkString(None) => {
                buf.extend_from_slice(b"$-1\r\n");
            }
            RespValue::BulkString(Some(data)) => {
                buf.push(b'$');
                buf.extend_from_slice(data.len().to_string().as_bytes());
                buf.extend_from_slice(b"\r\n");
                buf.extend_from_slice(data);
                buf.extend_from_slice(b"\r\n");
            }
            RespValue::Array(None) => {
                buf.extend_from_slice(b"*-1\r\n");
            }
            RespValue::Array(Some(items)) => {
                buf.push(b'*');
                buf.extend_from_slice(items.len().to_string().as_bytes());
                buf.extend_from_slice(b"\r\n");
                for item in items {
                    item.write_to(buf);
                }
            }
        }
    }

    /// Raw bytes of a bulk or simple string.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            RespValue::BulkString(Some(data)) => Some(data),
            RespValue::SimpleString(s) => Some(s.as_bytes()),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            RespValue::Integer(n) => Some(*n),
            _ => None,
        }
    }

    /// Convert to a UTF-8 string, if possible.
    pub fn to_string_lossy(&self) -> Option<String> {
        self.as_bytes()
            .map(|b| String::from_utf8_lossy(b).into_owned())
    }

    /// True for the null bulk string and the null array.
    pub fn is_null(&self) -> bool {
        matches!(self, RespValue::BulkString(None) | RespValue::Array(None))
    }

    /// Turns a server error reply into `RedlineError::Server`.
    pub fn into_result(self) -> RedlineResult<RespValue> {
        match self {
            RespValue::Error(message) => Err(RedlineError::Server(message)),
            other => Ok(other),
        }
    }
}

/// Appends one command frame (`*<argc>` followed by `argc` bulk strings).
pub fn write_command<A: AsRef<[u8]>>(args: &[A], buf: &mut BytesMut) {
    buf.put_u8(b'*');
    buf.put_slice(args.len().to_string().as_bytes());
    buf.put_slice(b"\r\n");
    for arg in args {
        let arg = arg.as_ref();
        buf.put_u8(b'$');
        buf.put_slice(arg.len().to_string().as_bytes());
        buf.put_slice(b"\r\n");
        buf.put_slice(arg);
        buf.put_slice(b"\r\n");
    }
}

/// Prepends a command name to its arguments.
pub fn command_line<'a, A: AsRef<[u8]>>(name: &'a str, args: &'a [A]) -> Vec<&'a [u8]> {
    let mut line = Vec::with_capacity(args.len() + 1);
    line.push(name.as_bytes());
    line.extend(args.iter().map(AsRef::as_ref));
    line
}

/// Encodes a single command frame.
pub fn encode_command<A: AsRef<[u8]>>(args: &[A]) -> Vec<u8> {
    let mut buf = BytesMut::new();
    write_command(args, &mut buf);
    buf.to_vec()
}

/// Streaming RESP reply parser.
///
/// Handles partial reads: call `parse()` again each time more data arrives
/// in the same buffer. Returns `Ok(Some(value))` when a complete value is
/// parsed, `Ok(None)` when more data is needed.
///
/// Completeness is checked incrementally. The parser remembers how far into
/// the front frame it got, so a large reply spread over many reads is
/// scanned once, and values are only built once the whole frame is buffered.
/// Nesting is walked with heap stacks rather than recursion.
#[derive(Debug, Default)]
pub struct RespParser {
    /// Offset of the first element of the front frame not yet scanned.
    scanned: usize,
    /// Elements still expected by each open array, outermost first.
    open: Vec<usize>,
}

/// One element header, with the payload located in the buffer.
enum Element {
    Simple(Range<usize>),
    Error(Range<usize>),
    Integer(i64),
    Bulk(Option<Range<usize>>),
    Array(Option<usize>),
}

impl Element {
    fn into_value(self, buf: &[u8]) -> RespValue {
        match self {
            Element::Simple(text) => {
                RespValue::SimpleString(String::from_utf8_lossy(&buf[text]).into_owned())
            }
            Element::Error(text) => RespValue::Error(String::from_utf8_lossy(&buf[text]).into_owned()),
            Element::Integer(n) => RespValue::Integer(n),
            Element::Bulk(data) => RespValue::BulkString(data.map(|data| buf[data].to_vec())),
            Element::Array(None) => RespValue::Array(None),
            Element::Array(Some(_)) => RespValue::Array(Some(Vec::new())),
        }
    }
}

impl RespParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Try to parse one complete RESP value from the front of `buf`.
    ///
    /// On success exactly the bytes of that frame are consumed, leaving the
    /// buffer at the next frame boundary. Nothing is consumed when the frame
    /// is still incomplete.
    pub fn parse(&mut self, buf: &mut BytesMut) -> Result<Option<RespValue>, RespError> {
        let end = match self.scan(buf) {
            Ok(Some(end)) => end,
            Ok(None) => return Ok(None),
            Err(e) => {
                self.reset();
                return Err(e);
            }
        };
        self.reset();
        let frame = buf.split_to(end);
        Self::build(&frame).map(Some)
    }

    fn reset(&mut self) {
        self.scanned = 0;
        self.open.clear();
    }

    /// Advances over complete elements, returning the frame length once the
    /// last one is buffered.
    fn scan(&mut self, buf: &[u8]) -> Result<Option<usize>, RespError> {
        loop {
            let Some((element, next)) = read_element(buf, self.scanned)? else {
                return Ok(None);
            };
            self.scanned = next;

            if let Element::Array(Some(len)) = element {
                if len > 0 {
                    if self.open.len() == MAX_DEPTH {
                        return Err(RespError::NestingTooDeep(MAX_DEPTH));
                    }
                    self.open.push(len);
                    continue;
                }
            }

            // One element finished; close every array it completes.
            loop {
                let Some(left) = self.open.last_mut() else {
                    return Ok(Some(next));
                };
                *left -= 1;
                if *left > 0 {
                    break;
                }
                self.open.pop();
            }
        }
    }

    /// Builds the value of a frame `scan` found complete.
    fn build(frame: &[u8]) -> Result<RespValue, RespError> {
        let mut pos = 0;
        let mut open: Vec<(Vec<RespValue>, usize)> = Vec::new();

        loop {
            let Some((element, next)) = read_element(frame, pos)? else {
                return Err(RespError::Truncated(frame.len()));
            };
            pos = next;

            let mut value = match element {
                Element::Array(Some(len)) if len > 0 => {
                    open.push((Vec::with_capacity(len), len));
                    continue;
                }
                other => other.into_value(frame),
            };

            loop {
                let Some((mut items, len)) = open.pop() else {
                    return Ok(value);
                };
                items.push(value);
                if items.len() < len {
                    open.push((items, len));
                    break;
                }
                value = RespValue::Array(Some(items));
            }
        }
    }
}

/// Reads the element starting at `pos`, returning it with the offset just
/// past it. Array elements cover only their header line.
fn read_element(buf: &[u8], pos: usize) -> Result<Option<(Element, usize)>, RespError> {
    let Some(&prefix) = buf.get(pos) else {
        return Ok(None);
    };
    if !matches!(prefix, b'+' | b'-' | b':' | b'$' | b'*') {
        return Err(RespError::InvalidByte(prefix));
    }
    let Some(crlf) = find_line_end(buf, pos + 1)? else {
        return Ok(None);
    };
    let line = pos + 1..crlf;
    let next = crlf + 2;

    let element = match prefix {
        b'+' => Element::Simple(line),
        b'-' => Element::Error(line),
        b':' => Element::Integer(parse_decimal(&buf[line], "integer")?),
        b'$' => {
            let len = parse_decimal(&buf[line], "bulk length")?;
            if len == -1 {
                return Ok(Some((Element::Bulk(None), next)));
            }
            if !(0..=MAX_BULK_LEN).contains(&len) {
                return Err(RespError::InvalidData(format!("invalid bulk length: {len}")));
            }

            let end = next + len as usize;
            // data + trailing \r\n
            if buf.len() < end + 2 {
                return Ok(None);
            }
            if buf[end] != b'\r' || buf[end + 1] != b'\n' {
                return Err(RespError::InvalidData(
                    "Missing trailing CRLF after bulk string".into(),
                ));
            }
            return Ok(Some((Element::Bulk(Some(next..end)), end + 2)));
        }
        _ => {
            let len = parse_decimal(&buf[line], "multibulk length")?;
            if len == -1 {
                Element::Array(None)
            } else if (0..=MAX_ARRAY_LEN).contains(&len) {
                Element::Array(Some(len as usize))
            } else {
                return Err(RespError::InvalidData(format!(
                    "invalid multibulk length: {len}"
                )));
            }
        }
    };
    Ok(Some((element, next)))
}

/// Finds the `\r\n` that ends the line starting at `start`.
///
/// A bare `\n` inside a line means the peer is not speaking RESP.
fn find_line_end(buf: &[u8], start: usize) -> Result<Option<usize>, RespError> {
    for i in start..buf.len() {
        match buf[i] {
            b'\r' => {
                return match buf.get(i + 1) {
                    Some(b'\n') => Ok(Some(i)),
                    Some(_) => Err(RespError::InvalidData("CR not followed by LF".into())),
                    None => Ok(None),
                };
            }
            b'\n' => return Err(RespError::InvalidData("LF without preceding CR".into())),
            _ => {}
        }
    }
    Ok(None)
}

fn parse_decimal(digits: &[u8], what: &str) -> Result<i64, RespError> {
    let s = std::str::from_utf8(digits)
        .map_err(|_| RespError::InvalidData(format!("invalid {what} encoding")))?;
    s.parse()
        .map_err(|_| RespError::InvalidData(format!("invalid {what}: {s}")))
}

#[derive(Debug, thiserror::Error)]
pub enum RespError {
    #[error("unknown reply type byte '{}'", *.0 as char)]
    InvalidByte(u8),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("stream ended in the middle of a frame ({0} bytes buffered)")]
    Truncated(usize),

    #[error("reply nested deeper than {0} levels")]
    NestingTooDeep(usize),
}
