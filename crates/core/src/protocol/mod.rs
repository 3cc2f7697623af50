//! RTSP control protocol (RFC 2326), client side.
//!
//! This module models the text-based signaling messages, the RTSP URL and
//! the SDP session description returned by DESCRIBE.
//!
//! ## RTSP message format (RFC 2326 §4)
//!
//! ```text
//! DESCRIBE rtsp://server/stream RTSP/1.0\r\n
//! CSeq: 2\r\n
//! Accept: application/sdp\r\n
//! \r\n
//! ```
//!
//! ## Methods issued by the session driver
//!
//! | Method | RFC section | Purpose |
//! |--------|-------------|---------|
//! | DESCRIBE | §10.2 | Retrieve SDP session description |
//! | SETUP | §10.4 | Set up one stream (interleaved transport) |
//! | PLAY | §10.5 | Start media delivery |
//! | PAUSE | §10.6 | Suspend media delivery |
//! | TEARDOWN | §10.7 | Destroy session |

pub mod request;
pub mod response;
pub mod sdp;
pub mod url;

use std::fmt;

pub use request::RtspRequest;
pub use response::{InterleavedFrame, RtspMessage, RtspResponse};
pub use sdp::SessionDescription;
pub use url::RtspUrl;

/// Protocol version written in every request line.
pub const RTSP_VERSION: &str = "RTSP/1.0";

/// The only status code treated as success.
pub const STATUS_OK: u16 = 200;

/// Client identification string sent in every request (RFC 2326 §12.41).
pub const USER_AGENT: &str = "medianet/0.1";

/// Request methods issued by the session driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Describe,
    Setup,
    Play,
    Pause,
    Teardown,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Describe => "DESCRIBE",
            Method::Setup => "SETUP",
            Method::Play => "PLAY",
            Method::Pause => "PAUSE",
            Method::Teardown => "TEARDOWN",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parse `Name: value` header lines until the first empty line.
pub(crate) fn parse_headers<'a>(
    lines: impl Iterator<Item = &'a str>,
) -> crate::error::Result<Vec<(String, String)>> {
    let mut headers = Vec::new();
    for line in lines {
        if line.is_empty() {
            break;
        }
        let colon_pos = line.find(':').ok_or(crate::error::NetError::Protocol {
            kind: crate::error::ProtocolErrorKind::InvalidHeader,
        })?;
        headers.push((
            line[..colon_pos].trim().to_string(),
            line[colon_pos + 1..].trim().to_string(),
        ));
    }
    Ok(headers)
}

/// Case-insensitive header lookup (RFC 2326 §4.2).
pub(crate) fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_str())
}
