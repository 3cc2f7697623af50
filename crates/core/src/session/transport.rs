use std::fmt;

/// Lower transport profile for RTP over the control connection.
pub const INTERLEAVED_PROFILE: &str = "RTP/AVP/TCP";

/// `Transport` header value for interleaved delivery (RFC 2326 §12.39).
///
/// RTP and RTCP for a stream travel on the control connection as `$`
/// frames tagged with a pair of channel numbers.
///
/// ## Wire format example
///
/// ```text
/// Client → Server:
///   Transport: RTP/AVP/TCP;unicast;interleaved=0-1
///
/// Server → Client:
///   Transport: RTP/AVP/TCP;unicast;interleaved=0-1;ssrc=1A2B3C4D
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportHeader {
    /// Transport specifier, e.g. `RTP/AVP/TCP`.
    pub profile: String,
    pub unicast: bool,
    /// RTP channel for this stream.
    pub rtp_channel: u8,
    /// RTCP channel, normally `rtp_channel + 1`.
    pub rtcp_channel: u8,
    /// Sender SSRC, when the server announces one.
    pub ssrc: Option<u32>,
}

impl TransportHeader {
    /// Request for stream `index`: channels `2 * index` and `2 * index + 1`.
    ///
    /// Returns `None` once the channel numbers no longer fit in a byte.
    pub fn interleaved(index: usize) -> Option<Self> {
        let rtp_channel = u8::try_from(index.checked_mul(2)?).ok()?;
        Some(TransportHeader {
            profile: INTERLEAVED_PROFILE.to_string(),
            unicast: true,
            rtp_channel,
            rtcp_channel: rtp_channel.checked_add(1)?,
            ssrc: None,
        })
    }

    /// Parse the `Transport` header value (RFC 2326 §12.39).
    ///
    /// Only the interleaved form is understood; values without an
    /// `interleaved=` parameter yield `None`.
    ///
    /// ## Examples
    ///
    /// ```
    /// use medianet::session::transport::TransportHeader;
    ///
    /// let th = TransportHeader::parse("RTP/AVP/TCP;unicast;interleaved=2-3").unwrap();
    /// assert_eq!(th.rtp_channel, 2);
    /// assert_eq!(th.rtcp_channel, 3);
    ///
    /// assert!(TransportHeader::parse("RTP/AVP;unicast;client_port=8000-8001").is_none());
    /// ```
    pub fn parse(header: &str) -> Option<Self> {
        let mut parts = header.split(';').map(str::trim);
        let profile = parts.next()?.to_string();
        let mut unicast = false;
        let mut channels = None;
        let mut ssrc = None;

        for part in parts {
            if part.eq_ignore_ascii_case("unicast") {
                unicast = true;
            } else if let Some(range) = part.strip_prefix("interleaved=") {
                channels = Some(match range.split_once('-') {
                    Some((rtp, rtcp)) => (rtp.parse().ok()?, rtcp.parse().ok()?),
                    None => {
                        let rtp: u8 = range.parse().ok()?;
                        (rtp, rtp.checked_add(1)?)
                    }
                });
            } else if let Some(value) = part.strip_prefix("ssrc=") {
                ssrc = u32::from_str_radix(value, 16).ok();
            }
        }

        let (rtp_channel, rtcp_channel) = channels?;
        Some(TransportHeader {
            profile,
            unicast,
            rtp_channel,
            rtcp_channel,
            ssrc,
        })
    }
}

impl fmt::Display for TransportHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.profile)?;
        if self.unicast {
            f.write_str(";unicast")?;
        }
        write!(f, ";interleaved={}-{}", self.rtp_channel, self.rtcp_channel)?;
        if let Some(ssrc) = self.ssrc {
            write!(f, ";ssrc={:08X}", ssrc)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_channels_per_stream() {
        assert_eq!(
            TransportHeader::interleaved(0).unwrap().to_string(),
            "RTP/AVP/TCP;unicast;interleaved=0-1"
        );
        assert_eq!(
            TransportHeader::interleaved(3).unwrap().to_string(),
            "RTP/AVP/TCP;unicast;interleaved=6-7"
        );
        assert!(TransportHeader::interleaved(127).is_some());
        assert!(TransportHeader::interleaved(128).is_none());
    }

    #[test]
    fn parse_server_reply() {
        let th = TransportHeader::parse("RTP/AVP/TCP;unicast;interleaved=4-5;ssrc=1A2B3C4D").unwrap();
        assert_eq!(th.profile, "RTP/AVP/TCP");
        assert!(th.unicast);
        assert_eq!((th.rtp_channel, th.rtcp_channel), (4, 5));
        assert_eq!(th.ssrc, Some(0x1A2B3C4D));
    }

    #[test]
    fn parse_single_channel() {
        let th = TransportHeader::parse("RTP/AVP/TCP;interleaved=8").unwrap();
        assert_eq!((th.rtp_channel, th.rtcp_channel), (8, 9));
        assert!(!th.unicast);
    }

    #[test]
    fn parse_no_interleaved() {
        assert!(TransportHeader::parse("RTP/AVP;unicast").is_none());
        assert!(TransportHeader::parse("RTP/AVP/TCP;interleaved=x-y").is_none());
    }
}
