use crate::error::{NetError, ProtocolErrorKind, Result};
use crate::protocol::{RTSP_VERSION, STATUS_OK, find_header, parse_headers};

/// An RTSP response (RFC 2326 §7).
///
/// Serializes to the standard text format:
///
/// ```text
/// RTSP/1.0 200 OK\r\n
/// CSeq: 1\r\n
/// Content-Type: application/sdp\r\n
/// Content-Length: 142\r\n
/// \r\n
/// v=0\r\n...
/// ```
///
/// The client reads responses with [`parse`](Self::parse) and then attaches
/// the body; the builder methods are used to script peers in tests and tools.
#[must_use]
#[derive(Debug, Clone)]
pub struct RtspResponse {
    pub status_code: u16,
    pub status_text: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

impl RtspResponse {
    pub fn new(status_code: u16, status_text: &str) -> Self {
        RtspResponse {
            status_code,
            status_text: status_text.to_string(),
            headers: Vec::new(),
            body: None,
        }
    }

    /// 200 OK, success (RFC 2326 §7.1.1).
    pub fn ok() -> Self {
        Self::new(STATUS_OK, "OK")
    }

    /// 404 Not Found: the requested resource does not exist.
    pub fn not_found() -> Self {
        Self::new(404, "Not Found")
    }

    pub fn add_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn with_body(mut self, body: String) -> Self {
        self.body = Some(body);
        self
    }

    /// Only `200` counts as success; every other code fails the exchange.
    pub fn is_success(&self) -> bool {
        self.status_code == STATUS_OK
    }

    pub fn get_header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    /// Declared body length; `0` when the header is absent.
    pub fn content_length(&self) -> Result<usize> {
        match self.get_header("Content-Length") {
            Some(v) => v
                .parse()
                .map_err(|_| NetError::protocol(ProtocolErrorKind::InvalidContentLength)),
            None => Ok(0),
        }
    }

    /// Parse a response head (status line and headers). The body, if any,
    /// is read separately using [`content_length`](Self::content_length).
    pub fn parse(head: &str) -> Result<Self> {
        let mut lines = head.lines();

        let status_line = lines
            .next()
            .filter(|l| !l.trim().is_empty())
            .ok_or(NetError::protocol(ProtocolErrorKind::EmptyMessage))?;

        let mut parts = status_line.splitn(3, ' ');
        let version = parts.next().unwrap_or_default();
        if !version.starts_with("RTSP/") {
            return Err(NetError::protocol(ProtocolErrorKind::InvalidStatusLine));
        }
        let status_code = parts
            .next()
            .and_then(|c| c.parse::<u16>().ok())
            .ok_or(NetError::protocol(ProtocolErrorKind::InvalidStatusLine))?;
        let status_text = parts.next().unwrap_or_default().trim().to_string();

        Ok(RtspResponse {
            status_code,
            status_text,
            headers: parse_headers(lines)?,
            body: None,
        })
    }

    /// Serialize to the RTSP text wire format.
    ///
    /// If a body is present, `Content-Length` is appended automatically
    /// (RFC 2326 §12.14).
    pub fn serialize(&self) -> String {
        let mut response = format!(
            "{} {} {}\r\n",
            RTSP_VERSION, self.status_code, self.status_text
        );

        for (name, value) in &self.headers {
            response.push_str(&format!("{}: {}\r\n", name, value));
        }

        if let Some(body) = &self.body {
            response.push_str(&format!("Content-Length: {}\r\n", body.len()));
            response.push_str("\r\n");
            response.push_str(body);
        } else {
            response.push_str("\r\n");
        }
        response
    }
}

/// Binary data interleaved on the control connection (RFC 2326 §10.12).
///
/// ```text
/// '$' | channel (1 byte) | length (2 bytes, big-endian) | data
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterleavedFrame {
    pub channel: u8,
    pub payload: Vec<u8>,
}

impl InterleavedFrame {
    /// Marker byte that starts every interleaved frame.
    pub const MAGIC: u8 = b'$';

    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(4 + self.payload.len());
        out.push(Self::MAGIC);
        out.push(self.channel);
        out.extend_from_slice(&(self.payload.len() as u16).to_be_bytes());
        out.extend_from_slice(&self.payload);
        out
    }

    /// RTCP packets carry payload types 200–204 in their second byte.
    pub fn is_rtcp(&self) -> bool {
        self.payload.len() > 1 && (200..=204).contains(&self.payload[1])
    }
}

/// Anything read from the control connection.
#[derive(Debug, Clone)]
pub enum RtspMessage {
    Response(RtspResponse),
    Data(InterleavedFrame),
}
