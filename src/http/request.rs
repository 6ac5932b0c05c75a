//! Request head parsing.
//!
//! # Responsibilities
//! - Find the end of the request head in a read buffer
//! - Extract method, target, version
//! - Decide keep-alive and how many body bytes to discard

/// The parts of a request head the responder acts on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHead {
    pub method: String,
    pub target: String,
    pub version: String,
    pub keep_alive: bool,
    pub content_length: usize,
}

impl RequestHead {
    pub fn is_head(&self) -> bool {
        self.method.eq_ignore_ascii_case("HEAD")
    }
}

/// Why a request head could not be parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseError {
    /// The request line is not `METHOD TARGET HTTP/x.y`.
    RequestLine,
    /// A header line has no colon or an unparsable `Content-Length`.
    Header,
}

/// Length of the head including the terminating blank line, if complete.
pub fn head_len(buf: &[u8]) -> Option<usize> {
    buf.windows(4)
        .position(|window| window == b"\r\n\r\n")
        .map(|pos| pos + 4)
}

/// Parse a complete request head.
pub fn parse_head(head: &[u8]) -> Result<RequestHead, ParseError> {
    let text = std::str::from_utf8(head).map_err(|_| ParseError::RequestLine)?;
    let mut lines = text.split("\r\n");

    let request_line = lines.next().ok_or(ParseError::RequestLine)?;
    let mut parts = request_line.split(' ');
    let (method, target, version) = match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(m), Some(t), Some(v), None) if !m.is_empty() && !t.is_empty() && v.starts_with("HTTP/") => (m, t, v),
        _ => return Err(ParseError::RequestLine),
    };

    // HTTP/1.1 defaults to keep-alive, 1.0 to close.
    let mut keep_alive = version == "HTTP/1.1";
    let mut content_length = 0;

    for line in lines.filter(|line| !line.is_empty()) {
        let (name, value) = line.split_once(':').ok_or(ParseError::Header)?;
        let value = value.trim();
        if name.eq_ignore_ascii_case("connection") {
            if value.eq_ignore_ascii_case("close") {
                keep_alive = false;
            } else if value.eq_ignore_ascii_case("keep-alive") {
                keep_alive = true;
            }
        } else if name.eq_ignore_ascii_case("content-length") {
            content_length = value.parse().map_err(|_| ParseError::Header)?;
        }
    }

    Ok(RequestHead {
        method: method.to_string(),
        target: target.to_string(),
        version: version.to_string(),
        keep_alive,
        content_length,
    })
}
