//! Request-line reading and parsing.
//!
//! # Responsibilities
//! - Read the first line of an HTTP/1.x request without consuming anything else
//! - Extract the path used for rule matching
//! - Reject malformed lines early (before any upstream is contacted)
//!
//! # Design Decisions
//! - Only the request line is parsed; headers and body are relayed untouched
//! - The raw bytes read are kept so they can be replayed to the upstream
//! - Line length is bounded to avoid unbounded buffering

use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

/// Maximum accepted request-line length, including the line terminator.
pub const MAX_REQUEST_LINE: usize = 8 * 1024;

/// Empty lines tolerated before the request line.
const MAX_LEADING_EMPTY_LINES: usize = 4;

/// Reasons a request line is rejected with `400 Bad Request`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("empty request line")]
    Empty,

    #[error("request line exceeds {MAX_REQUEST_LINE} bytes")]
    TooLong,

    #[error("request line is not valid UTF-8")]
    NotUtf8,

    #[error("malformed request line: {0:?}")]
    Malformed(String),

    #[error("invalid method: {0:?}")]
    InvalidMethod(String),

    #[error("unsupported request target: {0:?}")]
    InvalidTarget(String),

    #[error("unsupported HTTP version: {0:?}")]
    UnsupportedVersion(String),
}

/// A parsed HTTP/1.x request line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestLine {
    pub method: String,
    pub target: String,
    pub version: String,
    path_span: PathSpan,
}

/// Byte range of the path inside `target`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PathSpan {
    Range(usize, usize),
    /// Absolute-form target with no path component.
    Root,
}

impl RequestLine {
    /// The path component used for matching (never includes query or fragment).
    pub fn path(&self) -> &str {
        match self.path_span {
            PathSpan::Range(start, end) => &self.target[start..end],
            PathSpan::Root => "/",
        }
    }
}

/// Parse a request line with its terminator already stripped.
pub fn parse_request_line(line: &str) -> Result<RequestLine, ParseError> {
    if line.is_empty() {
        return Err(ParseError::Empty);
    }

    let mut parts = line.split_whitespace();
    let (method, target, version) = match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(m), Some(t), Some(v), None) => (m, t, v),
        _ => return Err(ParseError::Malformed(line.to_string())),
    };

    if !method.bytes().all(is_token_byte) {
        return Err(ParseError::InvalidMethod(method.to_string()));
    }

    if !matches!(version, "HTTP/1.0" | "HTTP/1.1") {
        return Err(ParseError::UnsupportedVersion(version.to_string()));
    }

    let path_span = locate_path(target).ok_or_else(|| ParseError::InvalidTarget(target.to_string()))?;

    Ok(RequestLine {
        method: method.to_string(),
        target: target.to_string(),
        version: version.to_string(),
        path_span,
    })
}

/// Find the path inside an origin-form, absolute-form, or asterisk-form target.
fn locate_path(target: &str) -> Option<PathSpan> {
    if target == "*" {
        return Some(PathSpan::Range(0, 1));
    }

    let start = if target.starts_with('/') {
        0
    } else {
        let scheme_end = target.find("://")?;
        let scheme = &target[..scheme_end];
        if scheme.is_empty() || !scheme.bytes().all(|b| b.is_ascii_alphanumeric() || b"+-.".contains(&b)) {
            return None;
        }
        let authority_start = scheme_end + 3;
        match target[authority_start..].find(['/', '?', '#']) {
            Some(offset) if target.as_bytes()[authority_start + offset] == b'/' => authority_start + offset,
            _ => return Some(PathSpan::Root),
        }
    };

    let end = target[start..]
        .find(['?', '#'])
        .map_or(target.len(), |offset| start + offset);
    Some(PathSpan::Range(start, end))
}

/// RFC 9110 `tchar`.
fn is_token_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b)
}

/// Bytes of a request line as received, with the parse result.
#[derive(Debug)]
pub struct ReceivedLine {
    pub raw: Vec<u8>,
    pub parsed: Result<RequestLine, ParseError>,
}

/// Read the request line from `reader`.
///
/// Returns `Ok(None)` if the peer closed the connection before sending
/// anything. On success the returned bytes are exactly what the client sent
/// for the request line (terminator included), minus skipped leading empty
/// lines. Bytes buffered beyond the line are left in `reader`.
pub async fn read_request_line<R>(reader: &mut R) -> std::io::Result<Option<ReceivedLine>>
where
    R: AsyncBufRead + Unpin,
{
    let mut skipped = 0;
    loop {
        let mut raw = Vec::new();
        let n = (&mut *reader)
            .take(MAX_REQUEST_LINE as u64)
            .read_until(b'\n', &mut raw)
            .await?;

        if n == 0 {
            return Ok(None);
        }

        if raw.last() != Some(&b'\n') {
            if raw.len() >= MAX_REQUEST_LINE {
                return Ok(Some(ReceivedLine {
                    raw,
                    parsed: Err(ParseError::TooLong),
                }));
            }
            // Peer closed mid-line.
            return Err(std::io::ErrorKind::UnexpectedEof.into());
        }

        let line = strip_line_ending(&raw);
        if line.is_empty() && skipped < MAX_LEADING_EMPTY_LINES {
            skipped += 1;
            continue;
        }

        let parsed = match std::str::from_utf8(line) {
            Ok(text) => parse_request_line(text),
            Err(_) => Err(ParseError::NotUtf8),
        };
        return Ok(Some(ReceivedLine { raw, parsed }));
    }
}

fn strip_line_ending(raw: &[u8]) -> &[u8] {
    let line = raw.strip_suffix(b"\n").unwrap_or(raw);
    line.strip_suffix(b"\r").unwrap_or(line)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt as _, BufReader};

    #[test]
    fn origin_form_path_excludes_query() {
        let line = parse_request_line("GET /books/42?expand=true HTTP/1.1").unwrap();
        assert_eq!(line.method, "GET");
        assert_eq!(line.target, "/books/42?expand=true");
        assert_eq!(line.path(), "/books/42");
    }

    #[test]
    fn absolute_form_path_is_extracted() {
        let line = parse_request_line("GET http://localhost:3000/books/1?x=1 HTTP/1.1").unwrap();
        assert_eq!(line.path(), "/books/1");

        let bare = parse_request_line("GET http://localhost:3000 HTTP/1.0").unwrap();
        assert_eq!(bare.path(), "/");

        let query_only = parse_request_line("GET http://localhost:3000?q=1 HTTP/1.1").unwrap();
        assert_eq!(query_only.path(), "/");
    }

    #[test]
    fn path_span_stops_at_fragment() {
        let line = parse_request_line("GET /books/7#reviews HTTP/1.1").unwrap();
        assert_eq!(line.path(), "/books/7");
        assert_eq!(line.target, "/books/7#reviews");

        let absolute = parse_request_line("GET http://localhost/a/b#c?d HTTP/1.1").unwrap();
        assert_eq!(absolute.path(), "/a/b");
    }

    #[test]
    fn asterisk_form_is_accepted() {
        let line = parse_request_line("OPTIONS * HTTP/1.1").unwrap();
        assert_eq!(line.path(), "*");
    }

    #[test]
    fn rejects_malformed_lines() {
        assert_eq!(parse_request_line(""), Err(ParseError::Empty));
        assert!(matches!(parse_request_line("GET /books"), Err(ParseError::Malformed(_))));
        assert!(matches!(
            parse_request_line("GET /books HTTP/1.1 extra"),
            Err(ParseError::Malformed(_))
        ));
        assert!(matches!(
            parse_request_line("G(T /books HTTP/1.1"),
            Err(ParseError::InvalidMethod(_))
        ));
        assert!(matches!(
            parse_request_line("GET /books HTTP/2.0"),
            Err(ParseError::UnsupportedVersion(_))
        ));
        assert!(matches!(
            parse_request_line("GET books HTTP/1.1"),
            Err(ParseError::InvalidTarget(_))
        ));
    }

    #[test]
    fn connect_authority_form_is_rejected() {
        assert!(matches!(
            parse_request_line("CONNECT example.com:443 HTTP/1.1"),
            Err(ParseError::InvalidTarget(_))
        ));
    }

    #[tokio::test]
    async fn reads_line_and_leaves_rest_buffered() {
        let input: &[u8] = b"\r\nGET /books/42 HTTP/1.1\r\nHost: x\r\n\r\n";
        let mut reader = BufReader::new(input);

        let line = read_request_line(&mut reader).await.unwrap().unwrap();
        assert_eq!(line.raw, b"GET /books/42 HTTP/1.1\r\n");
        assert_eq!(line.parsed.unwrap().path(), "/books/42");

        let mut rest = Vec::new();
        reader.read_to_end(&mut rest).await.unwrap();
        assert_eq!(rest, b"Host: x\r\n\r\n");
    }

    #[tokio::test]
    async fn eof_before_any_bytes_is_none() {
        let mut reader = BufReader::new(&b""[..]);
        assert!(read_request_line(&mut reader).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn partial_line_is_unexpected_eof() {
        let mut reader = BufReader::new(&b"GET /bo"[..]);
        let err = read_request_line(&mut reader).await.unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::UnexpectedEof);
    }

    #[tokio::test]
    async fn overlong_line_is_rejected() {
        let mut input = b"GET /".to_vec();
        input.extend(std::iter::repeat(b'a').take(MAX_REQUEST_LINE));
        input.extend_from_slice(b" HTTP/1.1\r\n");
        let mut reader = BufReader::new(&input[..]);

        let line = read_request_line(&mut reader).await.unwrap().unwrap();
        assert_eq!(line.parsed, Err(ParseError::TooLong));
    }

    #[tokio::test]
    async fn binary_garbage_is_not_utf8() {
        let mut reader = BufReader::new(&b"\xff\xfe /x HTTP/1.1\n"[..]);
        let line = read_request_line(&mut reader).await.unwrap().unwrap();
        assert_eq!(line.parsed, Err(ParseError::NotUtf8));
    }
}
