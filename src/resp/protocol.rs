//! RESP2 framing: values, an incremental parser and the encoder

/// Largest bulk string or array length a client may announce
pub const MAX_FRAME_LEN: i64 = 512 * 1024 * 1024;

/// Longest inline command or length header accepted without a CRLF
pub const MAX_INLINE_LEN: usize = 64 * 1024;

/// RESP2 value
#[derive(Debug, Clone, PartialEq)]
pub enum RespValue {
  /// `+OK\r\n`
  SimpleString(String),
  /// `-ERR message\r\n`
  Error(String),
  /// `:123\r\n`
  Integer(i64),
  /// `$5\r\nhello\r\n`, or `$-1\r\n` for null
  BulkString(Option<String>),
  /// `*2\r\n...`, or `*-1\r\n` for null
  Array(Option<Vec<RespValue>>),
}

impl RespValue {
  pub fn ok() -> Self {
    RespValue::SimpleString("OK".to_string())
  }

  pub fn pong() -> Self {
    RespValue::SimpleString("PONG".to_string())
  }

  pub fn null_bulk() -> Self {
    RespValue::BulkString(None)
  }

  pub fn null_array() -> Self {
    RespValue::Array(None)
  }

  pub fn error(msg: impl Into<String>) -> Self {
    RespValue::Error(msg.into())
  }

  pub fn bulk(s: impl Into<String>) -> Self {
    RespValue::BulkString(Some(s.into()))
  }

  pub fn integer(i: i64) -> Self {
    RespValue::Integer(i)
  }

  pub fn array(items: Vec<RespValue>) -> Self {
    RespValue::Array(Some(items))
  }

  /// Array of bulk strings
  pub fn bulks<I, S>(items: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    RespValue::array(items.into_iter().map(RespValue::bulk).collect())
  }

  pub fn is_error(&self) -> bool {
    matches!(self, RespValue::Error(_))
  }

  /// Encode to RESP wire format
  pub fn encode(&self) -> Vec<u8> {
    let mut buf = Vec::new();
    self.encode_into(&mut buf);
    buf
  }

  pub fn encode_into(&self, buf: &mut Vec<u8>) {
    match self {
      RespValue::SimpleString(s) => line(buf, b'+', s),
      RespValue::Error(e) => line(buf, b'-', e),
      RespValue::Integer(i) => line(buf, b':', &i.to_string()),
      RespValue::BulkString(None) => buf.extend_from_slice(b"$-1\r\n"),
      RespValue::BulkString(Some(s)) => {
        line(buf, b'$', &s.len().to_string());
        buf.extend_from_slice(s.as_bytes());
        buf.extend_from_slice(b"\r\n");
      }
      RespValue::Array(None) => buf.extend_from_slice(b"*-1\r\n"),
      RespValue::Array(Some(items)) => {
        line(buf, b'*', &items.len().to_string());
        for item in items {
          item.encode_into(buf);
        }
      }
    }
  }

  pub fn as_str(&self) -> Option<&str> {
    match self {
      RespValue::SimpleString(s) | RespValue::BulkString(Some(s)) => Some(s),
      _ => None,
    }
  }

  pub fn as_i64(&self) -> Option<i64> {
    match self {
      RespValue::Integer(i) => Some(*i),
      RespValue::SimpleString(s) | RespValue::BulkString(Some(s)) => s.parse().ok(),
      _ => None,
    }
  }

  pub fn as_array(&self) -> Option<&[RespValue]> {
    match self {
      RespValue::Array(Some(arr)) => Some(arr),
      _ => None,
    }
  }
}

fn line(buf: &mut Vec<u8>, prefix: u8, body: &str) {
  buf.push(prefix);
  // Simple strings cannot carry line breaks
  buf.extend(body.bytes().map(|b| if b == b'\r' || b == b'\n' { b' ' } else { b }));
  buf.extend_from_slice(b"\r\n");
}

const INLINE_TOO_BIG: &str = "too big inline request";

/// RESP parse error
#[derive(Debug, Clone, PartialEq)]
pub enum RespError {
  /// More bytes are needed
  Incomplete,
  /// The frame is malformed
  Invalid(String),
}

impl std::fmt::Display for RespError {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      RespError::Incomplete => write!(f, "incomplete data"),
      RespError::Invalid(msg) => write!(f, "Protocol error: {}", msg),
    }
  }
}

impl std::error::Error for RespError {}

/// Incremental RESP parser fed from a socket
#[derive(Debug, Default)]
pub struct RespParser {
  buffer: Vec<u8>,
  pos: usize,
  // Line start and offset already searched for CRLF
  scanned: Option<(usize, usize)>,
}

impl RespParser {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn feed(&mut self, data: &[u8]) {
    self.buffer.extend_from_slice(data);
  }

  /// Bytes received but not yet consumed
  pub fn buffered(&self) -> usize {
    self.buffer.len()
  }

  /// Parse the next complete value, or `None` until more data arrives
  pub fn parse(&mut self) -> Result<Option<RespValue>, RespError> {
    if self.buffer.is_empty() {
      return Ok(None);
    }

    self.pos = 0;
    match self.parse_value() {
      Ok(value) => {
        self.buffer.drain(..self.pos);
        self.pos = 0;
        self.scanned = None;
        Ok(Some(value))
      }
      Err(RespError::Incomplete) => {
        self.pos = 0;
        Ok(None)
      }
      Err(e) => Err(e),
    }
  }

  pub fn clear(&mut self) {
    self.buffer.clear();
    self.pos = 0;
    self.scanned = None;
  }

  fn parse_value(&mut self) -> Result<RespValue, RespError> {
    match self.read_byte()? {
      b'+' => Ok(RespValue::SimpleString(self.read_line(INLINE_TOO_BIG)?)),
      b'-' => Ok(RespValue::Error(self.read_line(INLINE_TOO_BIG)?)),
      b':' => {
        let line = self.read_line(INLINE_TOO_BIG)?;
        let i = line
          .parse()
          .map_err(|_| RespError::Invalid(format!("invalid integer '{}'", line)))?;
        Ok(RespValue::Integer(i))
      }
      b'$' => self.parse_bulk_string(),
      b'*' => self.parse_array(),
      _ => {
        self.pos -= 1;
        self.parse_inline_command()
      }
    }
  }

  fn read_len(&mut self, what: &str) -> Result<i64, RespError> {
    let line = self.read_line(if what == "bulk" {
      "too big bulk count string"
    } else {
      "too big mbulk count string"
    })?;
    let len: i64 = line
      .parse()
      .map_err(|_| RespError::Invalid(format!("invalid {} length '{}'", what, line)))?;
    if len > MAX_FRAME_LEN {
      return Err(RespError::Invalid(format!("invalid {} length '{}'", what, line)));
    }
    Ok(len)
  }

  fn parse_bulk_string(&mut self) -> Result<RespValue, RespError> {
    let len = self.read_len("bulk")?;
    if len < 0 {
      return Ok(RespValue::BulkString(None));
    }

    let len = len as usize;
    if self.pos + len + 2 > self.buffer.len() {
      return Err(RespError::Incomplete);
    }
    let s = String::from_utf8_lossy(&self.buffer[self.pos..self.pos + len]).into_owned();
    self.pos += len;

    if &self.buffer[self.pos..self.pos + 2] != b"\r\n" {
      return Err(RespError::Invalid("expected CRLF after bulk string".to_string()));
    }
    self.pos += 2;
    Ok(RespValue::BulkString(Some(s)))
  }

  fn parse_array(&mut self) -> Result<RespValue, RespError> {
    let len = self.read_len("multibulk")?;
    if len < 0 {
      return Ok(RespValue::Array(None));
    }

    // Cap the preallocation; the elements may never arrive
    let mut items = Vec::with_capacity((len as usize).min(1024));
    for _ in 0..len {
      items.push(self.parse_value()?);
    }
    Ok(RespValue::Array(Some(items)))
  }

  fn parse_inline_command(&mut self) -> Result<RespValue, RespError> {
    let line = self.read_line(INLINE_TOO_BIG)?;
    let items: Vec<RespValue> = line.split_whitespace().map(RespValue::bulk).collect();
    // A bare CRLF is an empty inline command; callers skip it
    Ok(RespValue::Array(Some(items)))
  }

  fn read_byte(&mut self) -> Result<u8, RespError> {
    let byte = *self.buffer.get(self.pos).ok_or(RespError::Incomplete)?;
    self.pos += 1;
    Ok(byte)
  }

  /// Read up to the next CRLF. A line longer than [`MAX_INLINE_LEN`]
  /// fails with `too_big`. Resumes the CRLF search where the previous
  /// incomplete attempt on the same line stopped.
  fn read_line(&mut self, too_big: &str) -> Result<String, RespError> {
    let start = self.pos;
    let from = match self.scanned {
      Some((line, offset)) if line == start => offset,
      _ => start,
    };
    let found = self.buffer[from..]
      .windows(2)
      .position(|w| w == b"\r\n")
      .map(|i| from + i);

    let Some(end) = found else {
      let len = self.buffer.len() - start;
      if len > MAX_INLINE_LEN {
        return Err(RespError::Invalid(too_big.to_string()));
      }
      // The CR of a split CRLF may be the last byte
      self.scanned = Some((start, self.buffer.len().saturating_sub(1).max(start)));
      return Err(RespError::Incomplete);
    };
    if end - start > MAX_INLINE_LEN {
      return Err(RespError::Invalid(too_big.to_string()));
    }
    let s = String::from_utf8_lossy(&self.buffer[start..end]).into_owned();
    self.pos = end + 2;
    Ok(s)
  }
}

/// Parse a single RESP value from bytes
pub fn parse_resp(data: &[u8]) -> Result<RespValue, RespError> {
  let mut parser = RespParser::new();
  parser.feed(data);
  parser.parse()?.ok_or(RespError::Incomplete)
}

/// Split a request array into an upper-cased command name and arguments
pub fn extract_command(value: &RespValue) -> Option<(String, Vec<String>)> {
  let (name, rest) = value.as_array()?.split_first()?;
  let cmd = name.as_str()?.to_uppercase();
  let args = rest
    .iter()
    .map(|v| match v {
      RespValue::Integer(i) => Some(i.to_string()),
      other => other.as_str().map(String::from),
    })
    .collect::<Option<Vec<String>>>()?;
  Some((cmd, args))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_parse_scalars() {
    assert_eq!(
      parse_resp(b"+OK\r\n").unwrap(),
      RespValue::SimpleString("OK".to_string())
    );
    assert_eq!(
      parse_resp(b"-ERR unknown command\r\n").unwrap(),
      RespValue::Error("ERR unknown command".to_string())
    );
    assert_eq!(parse_resp(b":42\r\n").unwrap(), RespValue::Integer(42));
    assert_eq!(parse_resp(b"$5\r\nhello\r\n").unwrap(), RespValue::bulk("hello"));
    assert_eq!(parse_resp(b"$-1\r\n").unwrap(), RespValue::null_bulk());
    assert_eq!(parse_resp(b"*-1\r\n").unwrap(), RespValue::null_array());
  }

  #[test]
  fn test_parse_array() {
    let result = parse_resp(b"*2\r\n$3\r\nGET\r\n$3\r\nfoo\r\n").unwrap();
    assert_eq!(result, RespValue::bulks(["GET", "foo"]));
  }

  #[test]
  fn test_bulk_string_is_binary_safe() {
    let result = parse_resp(b"$4\r\na\r\nb\r\n").unwrap();
    assert_eq!(result, RespValue::bulk("a\r\nb"));
  }

  #[test]
  fn test_partial_frames_wait_for_more_data() {
    let mut parser = RespParser::new();
    parser.feed(b"*2\r\n$3\r\nGET\r\n$3\r\nf");
    assert_eq!(parser.parse().unwrap(), None);
    parser.feed(b"oo\r\n*1\r\n$4\r\nPING\r\n");
    assert_eq!(parser.parse().unwrap(), Some(RespValue::bulks(["GET", "foo"])));
    assert_eq!(parser.parse().unwrap(), Some(RespValue::bulks(["PING"])));
    assert_eq!(parser.parse().unwrap(), None);
    assert_eq!(parser.buffered(), 0);
  }

  #[test]
  fn test_invalid_frames() {
    assert!(matches!(parse_resp(b":abc\r\n"), Err(RespError::Invalid(_))));
    assert!(matches!(parse_resp(b"$3\r\nabcd\r\n"), Err(RespError::Invalid(_))));
    assert!(matches!(
      parse_resp(b"$999999999999\r\n"),
      Err(RespError::Invalid(_))
    ));
  }

  #[test]
  fn test_encode() {
    assert_eq!(RespValue::ok().encode(), b"+OK\r\n");
    assert_eq!(RespValue::error("ERR x").encode(), b"-ERR x\r\n");
    assert_eq!(RespValue::integer(-3).encode(), b":-3\r\n");
    assert_eq!(RespValue::bulk("hé").encode(), "$3\r\nhé\r\n".as_bytes());
    assert_eq!(RespValue::null_bulk().encode(), b"$-1\r\n");
    assert_eq!(
      RespValue::array(vec![RespValue::integer(1), RespValue::null_bulk()]).encode(),
      b"*2\r\n:1\r\n$-1\r\n"
    );
    assert_eq!(RespValue::error("ERR a\r\nb").encode(), b"-ERR a  b\r\n");
  }

  #[test]
  fn test_extract_command() {
    let value = RespValue::bulks(["set", "key", "value"]);
    let (cmd, args) = extract_command(&value).unwrap();
    assert_eq!(cmd, "SET");
    assert_eq!(args, vec!["key", "value"]);
    assert!(extract_command(&RespValue::array(vec![])).is_none());
  }

  #[test]
  fn test_inline_line_split_across_reads() {
    let mut parser = RespParser::new();
    parser.feed(b"SET greet");
    assert_eq!(parser.parse().unwrap(), None);
    parser.feed(b"ing hi\r");
    assert_eq!(parser.parse().unwrap(), None);
    parser.feed(b"\nPING\r\n");
    assert_eq!(parser.parse().unwrap(), Some(RespValue::bulks(["SET", "greeting", "hi"])));
    assert_eq!(parser.parse().unwrap(), Some(RespValue::bulks(["PING"])));
  }

  #[test]
  fn test_oversized_lines_are_rejected() {
    let mut parser = RespParser::new();
    let chunk = vec![b'a'; 4096];
    for _ in 0..MAX_INLINE_LEN / chunk.len() {
      parser.feed(&chunk);
      assert_eq!(parser.parse().unwrap(), None);
    }
    parser.feed(b"a");
    assert_eq!(
      parser.parse(),
      Err(RespError::Invalid("too big inline request".to_string()))
    );

    let mut header = b"*".to_vec();
    header.extend(vec![b'1'; MAX_INLINE_LEN + 1]);
    assert_eq!(
      parse_resp(&header),
      Err(RespError::Invalid("too big mbulk count string".to_string()))
    );
  }

  #[test]
  fn test_inline_command() {
    let result = parse_resp(b"SET greeting hello\r\n").unwrap();
    let (cmd, args) = extract_command(&result).unwrap();
    assert_eq!(cmd, "SET");
    assert_eq!(args, vec!["greeting", "hello"]);
  }
}
