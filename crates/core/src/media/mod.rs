//! Media payload formats and RTP packetization.
//!
//! This module provides the [`Packetizer`] and [`Depacketizer`] traits and
//! the payload formats built on them.
//!
//! ## RTP overview (RFC 3550)
//!
//! Every RTP packet carries a 12-byte fixed header ([`rtp::RtpHeader`])
//! containing:
//!
//! - **Sequence number** (16-bit, wrapping): for reordering and loss detection.
//! - **Timestamp** (32-bit): media clock in payload-specific units.
//! - **SSRC** (32-bit): randomly chosen to identify the sender.
//! - **Marker bit**: meaning defined by the payload format.
//!
//! ## Payload formats
//!
//! | Format | Module | Reference |
//! |--------|--------|-----------|
//! | L16 linear audio | [`l16`] | [RFC 3551 §4.5.11](https://tools.ietf.org/html/rfc3551) |
//! | Buffers with inline caps and events | [`generic`] | `X-GST` |

pub mod generic;
pub mod l16;
pub mod rtp;
pub mod varint;

use std::time::Duration;

use crate::error::Result;
use crate::protocol::sdp::{Attribute, MediaDescription};

/// Per-buffer flags carried by the generic payload format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BufferFlags {
    /// Not independently decodable (inter frame).
    pub delta_unit: bool,
    pub media1: bool,
    pub media2: bool,
    pub media3: bool,
}

/// A unit of media exchanged with the hosting pipeline.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MediaBuffer {
    pub data: Vec<u8>,
    /// Presentation time relative to the start of the stream.
    pub pts: Option<Duration>,
    pub flags: BufferFlags,
}

impl MediaBuffer {
    pub fn new(data: Vec<u8>) -> Self {
        MediaBuffer {
            data,
            ..Default::default()
        }
    }

    pub fn with_pts(mut self, pts: Duration) -> Self {
        self.pts = Some(pts);
        self
    }

    pub fn with_flags(mut self, flags: BufferFlags) -> Self {
        self.flags = flags;
        self
    }
}

/// Payload-specific RTP packetizer.
///
/// Each payload format implements this trait, providing:
/// - **Packetization**: splitting buffers into RTP-sized packets
/// - **SDP attributes**: format parameters for the session description
/// - **RTP metadata**: payload type, clock rate, sequence/timestamp state
///
/// The generic RTP header is handled by [`rtp::RtpHeader`]: packetizers
/// compose it rather than reimplementing header serialization.
pub trait Packetizer: Send {
    /// Packetize one buffer into zero or more RTP packets.
    ///
    /// Each returned `Vec<u8>` is a complete RTP packet: 12-byte header
    /// (RFC 3550 §5.1) followed by the payload.
    fn packetize(&mut self, buffer: &MediaBuffer) -> Result<Vec<Vec<u8>>>;

    /// Encoding name for the SDP `a=rtpmap` attribute (e.g. `"L16"`).
    fn codec_name(&self) -> &'static str;

    /// RTP clock rate in Hz.
    fn clock_rate(&self) -> u32;

    /// RTP payload type number (RFC 3551).
    fn payload_type(&self) -> u8;

    /// SDP media-level attributes for this format (`rtpmap`, `fmtp`...).
    fn sdp_attributes(&self) -> Vec<Attribute>;

    /// Sequence number of the next packet.
    fn next_sequence(&self) -> u16;

    /// RTP timestamp of the next packet.
    fn next_rtp_timestamp(&self) -> u32;

    /// `m=` section announcing this stream on `port`.
    fn media_description(&self, media: &str, port: u16) -> MediaDescription {
        let mut description = MediaDescription::new(
            media,
            port,
            "RTP/AVP",
            vec![self.payload_type().to_string()],
        );
        description.attributes = self.sdp_attributes();
        description
    }
}

/// Payload-specific RTP depacketizer.
pub trait Depacketizer {
    type Output;

    /// Parse one received RTP packet.
    fn depacketize(&mut self, packet: &[u8]) -> Result<Self::Output>;

    /// Forget stream state so the next packet starts a new timeline.
    fn reset(&mut self);
}
