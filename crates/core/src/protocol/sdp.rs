//! SDP (Session Description Protocol, RFC 8866) parsing and generation.
//!
//! The DESCRIBE response carries one of these. The subset handled here:
//!
//! ```text
//! v=0                                          ← protocol version
//! o=- 1234 1 IN IP4 10.0.0.5                   ← origin
//! s=Session                                    ← session name
//! c=IN IP4 10.0.0.5                            ← connection address
//! t=0 0                                        ← timing (ignored)
//! a=control:*                                  ← session attribute
//! m=audio 0 RTP/AVP 96                         ← media description
//! a=rtpmap:96 L16/48000/2                      ← codec/clock rate
//! a=control:track1                             ← per-stream control URL
//! ```
//!
//! Lines of other types are accepted and skipped.

use std::fmt;
use std::net::IpAddr;

use crate::error::{NetError, ProtocolErrorKind, Result};

/// A `a=name` or `a=name:value` line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub name: String,
    pub value: Option<String>,
}

impl Attribute {
    pub fn new(name: &str, value: Option<&str>) -> Self {
        Attribute {
            name: name.to_string(),
            value: value.map(str::to_string),
        }
    }

    fn parse(text: &str) -> Self {
        match text.split_once(':') {
            Some((name, value)) => Attribute::new(name, Some(value)),
            None => Attribute::new(text, None),
        }
    }
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.value {
            Some(value) => write!(f, "a={}:{}", self.name, value),
            None => write!(f, "a={}", self.name),
        }
    }
}

/// Parsed `a=rtpmap:<pt> <encoding>/<clock-rate>[/<channels>]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpMap {
    pub payload_type: u8,
    pub encoding: String,
    pub clock_rate: u32,
    pub channels: Option<u16>,
}

impl RtpMap {
    pub fn parse(value: &str) -> Option<Self> {
        let (pt, rest) = value.trim().split_once(' ')?;
        let mut parts = rest.trim().split('/');
        let encoding = parts.next()?.to_string();
        let clock_rate = parts.next()?.parse().ok()?;
        let channels = match parts.next() {
            Some(c) => Some(c.parse().ok()?),
            None => None,
        };
        Some(RtpMap {
            payload_type: pt.parse().ok()?,
            encoding,
            clock_rate,
            channels,
        })
    }
}

/// One `m=` section and the lines that follow it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaDescription {
    /// `audio`, `video`, `application`...
    pub media: String,
    pub port: u16,
    pub protocol: String,
    pub formats: Vec<String>,
    pub connection: Option<String>,
    pub attributes: Vec<Attribute>,
}

impl MediaDescription {
    pub fn new(media: &str, port: u16, protocol: &str, formats: Vec<String>) -> Self {
        MediaDescription {
            media: media.to_string(),
            port,
            protocol: protocol.to_string(),
            formats,
            connection: None,
            attributes: Vec::new(),
        }
    }

    pub fn with_attribute(mut self, name: &str, value: Option<&str>) -> Self {
        self.attributes.push(Attribute::new(name, value));
        self
    }

    /// Value of the first attribute called `name`. Flag attributes yield `""`.
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.name == name)
            .map(|a| a.value.as_deref().unwrap_or(""))
    }

    /// The `control` attribute, if the stream can be set up individually.
    pub fn control(&self) -> Option<&str> {
        self.attribute("control")
    }

    /// All `rtpmap` attributes that parse.
    pub fn rtpmaps(&self) -> impl Iterator<Item = RtpMap> + '_ {
        self.attributes
            .iter()
            .filter(|a| a.name == "rtpmap")
            .filter_map(|a| a.value.as_deref().and_then(RtpMap::parse))
    }

    fn parse_line(value: &str, line: &str) -> Result<Self> {
        let mut parts = value.split_whitespace();
        let (Some(media), Some(port), Some(protocol)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(malformed(line));
        };
        // `<port>/<count>` is allowed; only the base port is kept.
        let port = port
            .split('/')
            .next()
            .and_then(|p| p.parse().ok())
            .ok_or_else(|| malformed(line))?;
        Ok(MediaDescription::new(
            media,
            port,
            protocol,
            parts.map(str::to_string).collect(),
        ))
    }
}

/// A parsed (or to-be-generated) session description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionDescription {
    pub version: u32,
    pub origin: Option<String>,
    pub session_name: String,
    pub connection: Option<String>,
    /// Session-level attributes (before the first `m=`).
    pub attributes: Vec<Attribute>,
    pub media: Vec<MediaDescription>,
}

impl SessionDescription {
    /// `c=` value for a unicast address: `IN IP4 <addr>` or `IN IP6 <addr>`.
    pub fn connection_for(ip: IpAddr) -> String {
        match ip {
            IpAddr::V4(v4) => format!("IN IP4 {v4}"),
            IpAddr::V6(v6) => format!("IN IP6 {v6}"),
        }
    }

    pub fn new(session_name: &str) -> Self {
        SessionDescription {
            version: 0,
            origin: None,
            session_name: session_name.to_string(),
            connection: None,
            attributes: Vec::new(),
            media: Vec::new(),
        }
    }

    /// Parse SDP text. Accepts both `\r\n` and `\n` line endings.
    pub fn parse(text: &str) -> Result<Self> {
        let mut sdp = SessionDescription::new("");
        let mut seen_version = false;

        for raw in text.lines() {
            let line = raw.trim_end_matches('\r');
            if line.trim().is_empty() {
                continue;
            }
            let (kind, value) = line.split_once('=').ok_or_else(|| malformed(line))?;
            if kind.len() != 1 {
                return Err(malformed(line));
            }

            match kind {
                "v" => {
                    sdp.version = value.trim().parse().map_err(|_| malformed(line))?;
                    seen_version = true;
                }
                "o" => sdp.origin = Some(value.to_string()),
                "s" => sdp.session_name = value.to_string(),
                "c" => match sdp.media.last_mut() {
                    Some(m) => m.connection = Some(value.to_string()),
                    None => sdp.connection = Some(value.to_string()),
                },
                "m" => sdp.media.push(MediaDescription::parse_line(value, line)?),
                "a" => {
                    let attr = Attribute::parse(value);
                    match sdp.media.last_mut() {
                        Some(m) => m.attributes.push(attr),
                        None => sdp.attributes.push(attr),
                    }
                }
                _ => tracing::trace!(line, "skipping session description line"),
            }
        }

        if !seen_version {
            return Err(malformed("missing v= line"));
        }
        Ok(sdp)
    }

    /// Session-level attribute value. Flag attributes yield `""`.
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.name == name)
            .map(|a| a.value.as_deref().unwrap_or(""))
    }
}

impl fmt::Display for SessionDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v={}\r\n", self.version)?;
        match &self.origin {
            Some(origin) => write!(f, "o={}\r\n", origin)?,
            None => write!(f, "o=- 0 0 IN IP4 0.0.0.0\r\n")?,
        }
        write!(f, "s={}\r\n", self.session_name)?;
        if let Some(c) = &self.connection {
            write!(f, "c={}\r\n", c)?;
        }
        write!(f, "t=0 0\r\n")?;
        for a in &self.attributes {
            write!(f, "{}\r\n", a)?;
        }
        for m in &self.media {
            write!(
                f,
                "m={} {} {} {}\r\n",
                m.media,
                m.port,
                m.protocol,
                m.formats.join(" ")
            )?;
            if let Some(c) = &m.connection {
                write!(f, "c={}\r\n", c)?;
            }
            for a in &m.attributes {
                write!(f, "{}\r\n", a)?;
            }
        }
        Ok(())
    }
}

fn malformed(line: &str) -> NetError {
    NetError::protocol(ProtocolErrorKind::MalformedSessionDescription(
        line.to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    const CAMERA_SDP: &str = "v=0\r\n\
        o=- 1234 1 IN IP4 10.0.0.5\r\n\
        s=Live\r\n\
        c=IN IP4 10.0.0.5\r\n\
        t=0 0\r\n\
        a=control:*\r\n\
        m=audio 0 RTP/AVP 96\r\n\
        a=rtpmap:96 L16/48000/2\r\n\
        a=control:track1\r\n\
        m=application 0 RTP/AVP 107\r\n\
        a=rtpmap:107 vnd.onvif.metadata/90000\r\n\
        a=recvonly\r\n";

    #[test]
    fn parses_media_sections() {
        let sdp = SessionDescription::parse(CAMERA_SDP).unwrap();
        assert_eq!(sdp.session_name, "Live");
        assert_eq!(sdp.attribute("control"), Some("*"));
        assert_eq!(sdp.media.len(), 2);

        let audio = &sdp.media[0];
        assert_eq!(audio.media, "audio");
        assert_eq!(audio.formats, vec!["96"]);
        assert_eq!(audio.control(), Some("track1"));
        let map = audio.rtpmaps().next().unwrap();
        assert_eq!(map.payload_type, 96);
        assert_eq!(map.encoding, "L16");
        assert_eq!(map.clock_rate, 48000);
        assert_eq!(map.channels, Some(2));

        let meta = &sdp.media[1];
        assert_eq!(meta.control(), None);
        assert_eq!(meta.attribute("recvonly"), Some(""));
        assert_eq!(meta.rtpmaps().next().unwrap().channels, None);
    }

    #[test]
    fn accepts_bare_newlines() {
        let sdp = SessionDescription::parse("v=0\ns=x\nm=video 5000/2 RTP/AVP 26\n").unwrap();
        assert_eq!(sdp.media[0].port, 5000);
    }

    #[test]
    fn rejects_garbage_lines() {
        assert!(SessionDescription::parse("v=0\r\nthis is not sdp\r\n").is_err());
        assert!(SessionDescription::parse("v=0\r\nm=audio\r\n").is_err());
        assert!(SessionDescription::parse("s=no version\r\n").is_err());
    }

    #[test]
    fn generated_text_parses_back() {
        let mut sdp = SessionDescription::new("L16 stream");
        sdp.connection = Some("IN IP4 127.0.0.1".into());
        sdp.media.push(
            MediaDescription::new("audio", 5004, "RTP/AVP", vec!["10".into()])
                .with_attribute("rtpmap", Some("10 L16/44100/2")),
        );
        let text = sdp.to_string();
        assert!(text.contains("m=audio 5004 RTP/AVP 10\r\n"));
        assert!(text.contains("a=rtpmap:10 L16/44100/2\r\n"));

        let parsed = SessionDescription::parse(&text).unwrap();
        assert_eq!(parsed.media, sdp.media);
        assert_eq!(parsed.connection, sdp.connection);
    }

    #[test]
    fn connection_line_matches_family() {
        use std::net::{Ipv4Addr, Ipv6Addr};
        assert_eq!(
            SessionDescription::connection_for(IpAddr::V4(Ipv4Addr::new(192, 0, 2, 7))),
            "IN IP4 192.0.2.7"
        );
        assert_eq!(
            SessionDescription::connection_for(IpAddr::V6(Ipv6Addr::LOCALHOST)),
            "IN IP6 ::1"
        );
    }
}
