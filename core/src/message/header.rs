// Plain-text message header: `key=value` lines, blank line ends the block
//
// Outbound messages carry only `id`. Reading distinguishes I/O failures
// (retry later) from malformed content (discard).

use std::collections::BTreeMap;
use std::io::{self, BufRead, Cursor, Read};
use thiserror::Error;

/// Longest accepted header line, terminator excluded
pub const MAX_LINE_LENGTH: usize = 1024;

/// Maximum accepted message blob: 256 KB
pub const MAX_MESSAGE_SIZE: usize = 256 * 1024;

#[derive(Debug, Error)]
pub enum HeaderError {
    #[error("I/O error reading header: {0}")]
    Io(#[from] io::Error),
    #[error("Header line longer than {MAX_LINE_LENGTH} bytes")]
    LineTooLong,
    #[error("Header line is not valid UTF-8")]
    NotUtf8,
    #[error("Message too large: {0} bytes (max {MAX_MESSAGE_SIZE})")]
    TooLarge(usize),
}

impl HeaderError {
    /// Whether the failure was in reading rather than in the content
    pub fn is_io(&self) -> bool {
        matches!(self, HeaderError::Io(_))
    }
}

/// Parsed header fields
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Header {
    fields: BTreeMap<String, String>,
}

impl Header {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    /// The `id` field as an integer, `None` if missing or not a number
    pub fn id(&self) -> Option<u64> {
        self.get("id").and_then(|v| v.trim().parse().ok())
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Read one line, accepting `\n` or `\r\n`. `Ok(None)` at end of input.
pub fn read_line<R: BufRead>(reader: &mut R) -> Result<Option<String>, HeaderError> {
    let mut buf = Vec::new();
    // One extra byte for the newline, one more to detect overflow
    let read = reader
        .take(MAX_LINE_LENGTH as u64 + 2)
        .read_until(b'\n', &mut buf)?;
    if read == 0 {
        return Ok(None);
    }
    if buf.last() == Some(&b'\n') {
        buf.pop();
        if buf.last() == Some(&b'\r') {
            buf.pop();
        }
    }
    if buf.len() > MAX_LINE_LENGTH {
        return Err(HeaderError::LineTooLong);
    }
    String::from_utf8(buf)
        .map(Some)
        .map_err(|_| HeaderError::NotUtf8)
}

/// Read header lines up to (and consuming) the first blank line or end of input
pub fn read_header<R: BufRead>(reader: &mut R) -> Result<Header, HeaderError> {
    let mut header = Header::default();
    while let Some(line) = read_line(reader)? {
        if line.is_empty() {
            break;
        }
        if let Some((key, value)) = line.split_once('=') {
            header.fields.insert(key.to_string(), value.to_string());
        }
    }
    Ok(header)
}

/// Split a blob into its header and the body that follows the blank line
pub fn split_message(blob: &[u8]) -> Result<(Header, &[u8]), HeaderError> {
    if blob.len() > MAX_MESSAGE_SIZE {
        return Err(HeaderError::TooLarge(blob.len()));
    }
    let mut cursor = Cursor::new(blob);
    let header = read_header(&mut cursor)?;
    let offset = cursor.position() as usize;
    Ok((header, &blob[offset..]))
}

/// Prefix a body with the minimal outbound header
pub fn wrap_message(uid: u64, body: &[u8]) -> Vec<u8> {
    let mut out = format!("id={}\r\n\r\n", uid).into_bytes();
    out.extend_from_slice(body);
    out
}

/// A reader that fails, for exercising the I/O path
#[cfg(test)]
pub(crate) struct FailingReader;

#[cfg(test)]
impl Read for FailingReader {
    fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
        Err(io::Error::new(io::ErrorKind::Other, "disk on fire"))
    }
}
