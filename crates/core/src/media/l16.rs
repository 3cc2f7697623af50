use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{NetError, Result};
use crate::protocol::sdp::{Attribute, SessionDescription};

use super::rtp::{HEADER_LEN, RtpHeader, RtpPacket};
use super::{Depacketizer, MediaBuffer, Packetizer};

/// Static payload type for 44.1 kHz stereo (RFC 3551 table 4).
pub const PAYLOAD_L16_STEREO: u8 = 10;
/// Static payload type for 44.1 kHz mono (RFC 3551 table 4).
pub const PAYLOAD_L16_MONO: u8 = 11;
/// Sample rate of both static payload types.
pub const STATIC_RATE: u32 = 44100;

const DEFAULT_MTU: usize = 1400;
const NANOS_PER_SEC: u64 = 1_000_000_000;

/// Byte order of 16-bit samples in a buffer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Endianness {
    /// Network order, as carried on the wire.
    #[default]
    Big,
    Little,
}

/// Sample format of an L16 stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    pub rate: u32,
    pub channels: u16,
    pub endianness: Endianness,
}

impl AudioFormat {
    /// Big-endian format with the given rate and channel count.
    pub fn new(rate: u32, channels: u16) -> Self {
        AudioFormat {
            rate,
            channels,
            endianness: Endianness::Big,
        }
    }

    pub fn with_endianness(mut self, endianness: Endianness) -> Self {
        self.endianness = endianness;
        self
    }

    /// Bytes per sample frame (one 16-bit sample per channel).
    pub fn frame_size(&self) -> usize {
        2 * self.channels as usize
    }

    fn validate(&self) -> Result<()> {
        if self.rate == 0 || self.channels == 0 {
            return Err(NetError::InvalidConfig(format!(
                "L16 format needs a rate and channels, got {}/{}",
                self.rate, self.channels
            )));
        }
        Ok(())
    }
}

impl Default for AudioFormat {
    /// The format of [`PAYLOAD_L16_STEREO`].
    fn default() -> Self {
        AudioFormat::new(STATIC_RATE, 2)
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.rate, self.channels)
    }
}

/// Dynamic payload type definitions: payload type to rate and channels.
///
/// Parsed from entries separated by `,`, `;` or newlines, each either
/// `<pt>:<rate>/<channels>` or the `rtpmap` form `<pt> L16/<rate>/<channels>`.
/// `rtpmap` entries for other encodings are skipped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PayloadTypeMap {
    entries: BTreeMap<u8, (u32, u16)>,
}

impl PayloadTypeMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, pt: u8, rate: u32, channels: u16) -> Result<()> {
        if pt > 127 {
            return Err(NetError::InvalidConfig(format!("payload type {pt} out of range")));
        }
        AudioFormat::new(rate, channels).validate()?;
        self.entries.insert(pt, (rate, channels));
        Ok(())
    }

    pub fn get(&self, pt: u8) -> Option<(u32, u16)> {
        self.entries.get(&pt).copied()
    }

    /// Lowest payload type mapped to `rate`/`channels`.
    pub fn find(&self, rate: u32, channels: u16) -> Option<u8> {
        self.entries
            .iter()
            .find(|(_, v)| **v == (rate, channels))
            .map(|(pt, _)| *pt)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Collect every L16 `rtpmap` in a session description. A missing
    /// channel count means mono (RFC 3551 §4.5.11).
    pub fn from_sdp(sdp: &SessionDescription) -> Self {
        let mut map = PayloadTypeMap::new();
        for rtpmap in sdp.media.iter().flat_map(|m| m.rtpmaps()) {
            if rtpmap.encoding.eq_ignore_ascii_case("L16") {
                let channels = rtpmap.channels.unwrap_or(1);
                if map
                    .insert(rtpmap.payload_type, rtpmap.clock_rate, channels)
                    .is_err()
                {
                    tracing::warn!(pt = rtpmap.payload_type, "ignoring invalid L16 rtpmap");
                }
            }
        }
        map
    }

    fn parse_entry(&mut self, entry: &str) -> Result<()> {
        let invalid = || NetError::InvalidConfig(format!("invalid payload type entry {entry:?}"));
        let entry = entry.strip_prefix("rtpmap:").unwrap_or(entry);

        let (pt, format) = match entry.split_once(':') {
            Some((pt, format)) => (pt, format.trim()),
            None => {
                let (pt, rest) = entry.split_once(char::is_whitespace).ok_or_else(invalid)?;
                let (encoding, format) = rest.trim().split_once('/').ok_or_else(invalid)?;
                if !encoding.eq_ignore_ascii_case("L16") {
                    tracing::debug!(entry, "skipping non-L16 payload type");
                    return Ok(());
                }
                (pt, format)
            }
        };

        let (rate, channels) = format.split_once('/').ok_or_else(invalid)?;
        self.insert(
            pt.trim().parse().map_err(|_| invalid())?,
            rate.trim().parse().map_err(|_| invalid())?,
            channels.trim().parse().map_err(|_| invalid())?,
        )
    }
}

impl FromStr for PayloadTypeMap {
    type Err = NetError;

    fn from_str(s: &str) -> Result<Self> {
        let mut map = PayloadTypeMap::new();
        for entry in s.split([',', ';', '\n']).map(str::trim) {
            if !entry.is_empty() {
                map.parse_entry(entry)?;
            }
        }
        Ok(map)
    }
}

/// Payload type for `format`: static types for 44.1 kHz mono/stereo,
/// otherwise the dynamic type mapped to the same rate and channels.
pub fn select_payload_type(format: &AudioFormat, map: &PayloadTypeMap) -> Result<u8> {
    let pt = match (format.rate, format.channels) {
        (STATIC_RATE, 1) => Some(PAYLOAD_L16_MONO),
        (STATIC_RATE, 2) => Some(PAYLOAD_L16_STEREO),
        (rate, channels) => map.find(rate, channels),
    };
    pt.ok_or(NetError::UnsupportedFormat {
        rate: format.rate,
        channels: format.channels,
    })
}

fn check_mtu(mtu: usize, format: &AudioFormat) -> Result<()> {
    if mtu < HEADER_LEN + format.frame_size() {
        return Err(NetError::InvalidConfig(format!(
            "MTU {mtu} leaves no room for a {}-channel frame",
            format.channels
        )));
    }
    Ok(())
}

/// Format implied by a payload type, if known.
fn format_for(pt: u8, map: &PayloadTypeMap) -> Option<AudioFormat> {
    match pt {
        PAYLOAD_L16_MONO => Some(AudioFormat::new(STATIC_RATE, 1)),
        PAYLOAD_L16_STEREO => Some(AudioFormat::new(STATIC_RATE, 2)),
        _ => map
            .get(pt)
            .map(|(rate, channels)| AudioFormat::new(rate, channels)),
    }
}

/// L16 RTP packetizer (RFC 3551 §4.5.11).
///
/// Splits interleaved 16-bit samples into packets whose payload is a whole
/// number of sample frames and fits in `mtu - 12` bytes. The RTP timestamp
/// counts sample frames, so it advances by the frames each packet carries.
/// Little-endian input is swapped to network order.
#[derive(Debug)]
pub struct L16Packetizer {
    header: RtpHeader,
    format: AudioFormat,
    map: PayloadTypeMap,
    mtu: usize,
}

impl L16Packetizer {
    /// Create with random SSRC, sequence number and timestamp.
    pub fn new(format: AudioFormat, map: PayloadTypeMap) -> Result<Self> {
        format.validate()?;
        check_mtu(DEFAULT_MTU, &format)?;
        let pt = select_payload_type(&format, &map)?;
        Ok(Self {
            header: RtpHeader::random(pt),
            format,
            map,
            mtu: DEFAULT_MTU,
        })
    }

    /// Create with explicit initial RTP state.
    pub fn with_state(
        format: AudioFormat,
        map: PayloadTypeMap,
        ssrc: u32,
        sequence: u16,
        timestamp: u32,
    ) -> Result<Self> {
        format.validate()?;
        check_mtu(DEFAULT_MTU, &format)?;
        let pt = select_payload_type(&format, &map)?;
        Ok(Self {
            header: RtpHeader::new(pt, ssrc, sequence, timestamp),
            format,
            map,
            mtu: DEFAULT_MTU,
        })
    }

    pub fn format(&self) -> AudioFormat {
        self.format
    }

    pub fn mtu(&self) -> usize {
        self.mtu
    }

    /// Maximum packet size including the RTP header. Must leave room for at
    /// least one sample frame.
    pub fn set_mtu(&mut self, mtu: usize) -> Result<()> {
        check_mtu(mtu, &self.format)?;
        self.mtu = mtu;
        Ok(())
    }

    /// Switch to a new sample format, re-selecting the payload type.
    pub fn set_format(&mut self, format: AudioFormat) -> Result<()> {
        format.validate()?;
        check_mtu(self.mtu, &format)?;
        let pt = select_payload_type(&format, &self.map)?;
        self.header.set_payload_type(pt);
        self.format = format;
        tracing::debug!(pt, format = %format, "L16 format set");
        Ok(())
    }

    /// The upstream timeline restarted; the media clock restarts at zero.
    pub fn discontinuity(&mut self) {
        tracing::debug!("discontinuity, RTP timestamp reset");
        self.header.reset_timestamp();
    }
}

impl Packetizer for L16Packetizer {
    fn packetize(&mut self, buffer: &MediaBuffer) -> Result<Vec<Vec<u8>>> {
        let frame = self.format.frame_size();
        let space = (self.mtu - HEADER_LEN) / frame * frame;
        let usable = buffer.data.len() / frame * frame;
        if usable < buffer.data.len() {
            tracing::warn!(
                dropped = buffer.data.len() - usable,
                frame,
                "buffer ends with a partial sample frame"
            );
        }

        let mut packets = Vec::with_capacity(usable.div_ceil(space));
        for chunk in buffer.data[..usable].chunks(space) {
            let mut packet = Vec::with_capacity(HEADER_LEN + chunk.len());
            packet.extend_from_slice(&self.header.write(false));
            match self.format.endianness {
                Endianness::Big => packet.extend_from_slice(chunk),
                Endianness::Little => {
                    for sample in chunk.chunks_exact(2) {
                        packet.extend_from_slice(&[sample[1], sample[0]]);
                    }
                }
            }
            let samples = (chunk.len() / frame) as u32;
            tracing::trace!(
                seq = self.header.sequence().wrapping_sub(1),
                timestamp = self.header.timestamp(),
                samples,
                "L16 packet"
            );
            self.header.advance_timestamp(samples);
            packets.push(packet);
        }
        Ok(packets)
    }

    fn codec_name(&self) -> &'static str {
        "L16"
    }

    fn clock_rate(&self) -> u32 {
        self.format.rate
    }

    fn payload_type(&self) -> u8 {
        self.header.pt
    }

    fn sdp_attributes(&self) -> Vec<Attribute> {
        let rtpmap = format!(
            "{} {}/{}/{}",
            self.payload_type(),
            self.codec_name(),
            self.format.rate,
            self.format.channels
        );
        vec![Attribute::new("rtpmap", Some(&rtpmap))]
    }

    fn next_sequence(&self) -> u16 {
        self.header.sequence()
    }

    fn next_rtp_timestamp(&self) -> u32 {
        self.header.timestamp()
    }
}

/// A change in the incoming stream's payload type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatChange {
    /// The new payload type implies a different sample format.
    Changed(AudioFormat),
    /// No mapping is known for this payload type; the previous format is
    /// still in effect.
    UnmappedPayloadType(u8),
}

/// One depacketized L16 packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Depacketized {
    /// Big-endian samples; `pts` is relative to the first packet.
    pub buffer: MediaBuffer,
    pub format_change: Option<FormatChange>,
}

/// L16 RTP depacketizer.
///
/// The first packet's timestamp becomes time zero. Later packets get
/// `(timestamp - first) / rate` as their presentation time.
#[derive(Debug)]
pub struct L16Depacketizer {
    format: AudioFormat,
    payload_type: u8,
    map: PayloadTypeMap,
    first_timestamp: Option<u32>,
}

impl L16Depacketizer {
    pub fn new(map: PayloadTypeMap) -> Self {
        Self {
            format: AudioFormat::default(),
            payload_type: PAYLOAD_L16_STEREO,
            map,
            first_timestamp: None,
        }
    }

    pub fn format(&self) -> AudioFormat {
        self.format
    }

    pub fn payload_type(&self) -> u8 {
        self.payload_type
    }

    pub fn set_payload_type_map(&mut self, map: PayloadTypeMap) {
        self.map = map;
    }

    fn payload_type_changed(&mut self, pt: u8) -> Option<FormatChange> {
        self.payload_type = pt;
        match format_for(pt, &self.map) {
            Some(format) if format != self.format => {
                tracing::debug!(pt, format = %format, "L16 format changed");
                self.format = format;
                Some(FormatChange::Changed(format))
            }
            Some(_) => None,
            None => {
                tracing::warn!(pt, format = %self.format, "unknown payload type, keeping format");
                Some(FormatChange::UnmappedPayloadType(pt))
            }
        }
    }
}

impl Depacketizer for L16Depacketizer {
    type Output = Depacketized;

    fn depacketize(&mut self, packet: &[u8]) -> Result<Depacketized> {
        let rtp = RtpPacket::parse(packet)?;
        tracing::trace!(
            pt = rtp.payload_type,
            seq = rtp.sequence,
            timestamp = rtp.timestamp,
            ssrc = rtp.ssrc,
            "L16 packet"
        );

        let format_change = if rtp.payload_type != self.payload_type {
            self.payload_type_changed(rtp.payload_type)
        } else {
            None
        };

        let first = *self.first_timestamp.get_or_insert(rtp.timestamp);
        let elapsed = u64::from(rtp.timestamp.wrapping_sub(first));
        let pts = Duration::from_nanos(elapsed * NANOS_PER_SEC / u64::from(self.format.rate));

        Ok(Depacketized {
            buffer: MediaBuffer::new(rtp.payload.to_vec()).with_pts(pts),
            format_change,
        })
    }

    fn reset(&mut self) {
        self.first_timestamp = None;
    }
}
