use base64::prelude::{BASE64_STANDARD, Engine as _};

use crate::error::{NetError, Result};
use crate::protocol::sdp::Attribute;

use super::rtp::{HEADER_LEN, RtpHeader};
use super::{MediaBuffer, Packetizer, varint};

const DEFAULT_MTU: usize = 1400;
const CLOCK_RATE: u32 = 90000;

/// Length of the payload sub-header that precedes every fragment.
pub const SUB_HEADER_LEN: usize = 8;

const FLAG_CAPS: u8 = 0x80;
const FLAG_DELTA_UNIT: u8 = 0x08;
const FLAG_MEDIA1: u8 = 0x04;
const FLAG_MEDIA2: u8 = 0x02;
const FLAG_MEDIA3: u8 = 0x01;
/// Bits kept across flushes.
const FLAGS_KEPT: u8 = 0x70;

/// Kind of an out-of-band event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Tag,
    CustomDownstream,
    CustomBoth,
    /// Anything else; carried by nothing.
    Other,
}

impl EventKind {
    /// Event type code written to the sub-header; `None` if not carried.
    pub fn code(self) -> Option<u8> {
        match self {
            EventKind::Tag => Some(1),
            EventKind::CustomDownstream | EventKind::CustomBoth => Some(2),
            EventKind::Other => None,
        }
    }
}

/// A named event travelling alongside the media, serialized as a string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutOfBandEvent {
    pub kind: EventKind,
    pub structure: String,
}

impl OutOfBandEvent {
    pub fn new(kind: EventKind, structure: impl Into<String>) -> Self {
        OutOfBandEvent {
            kind,
            structure: structure.into(),
        }
    }
}

/// The 8-byte sub-header at the start of every payload.
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |C| CV  |D|X|Y|Z|     ETYPE     |              MBZ              |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                          Frag_offset                          |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
///
/// `C` marks inline caps, `CV` is the caps version (0 means caps from the
/// session description), `D` the delta-unit flag, `X`/`Y`/`Z` the media
/// flags and `ETYPE` the event type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubHeader {
    pub caps_inline: bool,
    pub caps_version: u8,
    pub delta_unit: bool,
    pub media: [bool; 3],
    pub event_type: u8,
    pub frag_offset: u32,
}

impl SubHeader {
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let b = payload
            .get(..SUB_HEADER_LEN)
            .ok_or(NetError::MalformedPacket("shorter than payload sub-header"))?;
        Ok(SubHeader {
            caps_inline: b[0] & FLAG_CAPS != 0,
            caps_version: (b[0] >> 4) & 0x07,
            delta_unit: b[0] & FLAG_DELTA_UNIT != 0,
            media: [
                b[0] & FLAG_MEDIA1 != 0,
                b[0] & FLAG_MEDIA2 != 0,
                b[0] & FLAG_MEDIA3 != 0,
            ],
            event_type: b[1],
            frag_offset: u32::from_be_bytes([b[4], b[5], b[6], b[7]]),
        })
    }
}

/// Payloader for arbitrary buffers plus their caps and events (`X-GST`).
///
/// Caps strings and events are framed with a [`varint`] length prefix and
/// collected in an adapter together with media data. Each flush drains the
/// adapter into MTU-sized packets, each starting with a [`SubHeader`]. The
/// fragment offset counts payload bytes since the start of the flush, and
/// the last packet of a flush carries the marker bit.
///
/// - Caps are queued by [`set_caps`](Self::set_caps) and go out with the next
///   flush, under a new 3-bit caps version.
/// - Events received before the first caps are held back, then flushed one
///   by one once caps arrive.
/// - Media buffers are appended without a prefix and flushed immediately;
///   the marker bit delimits them.
#[derive(Debug)]
pub struct GenericPayloader {
    header: RtpHeader,
    base_timestamp: u32,
    mtu: usize,
    adapter: Vec<u8>,
    flags: u8,
    etype: u8,
    current_cv: u8,
    next_cv: u8,
    have_caps: bool,
    caps: Option<String>,
    pending_events: Vec<OutOfBandEvent>,
}

impl GenericPayloader {
    /// Create with random SSRC, sequence number and timestamp base.
    pub fn new(pt: u8) -> Self {
        Self::from_header(RtpHeader::random(pt))
    }

    /// Create with explicit initial RTP state.
    pub fn with_state(pt: u8, ssrc: u32, sequence: u16, timestamp: u32) -> Self {
        Self::from_header(RtpHeader::new(pt, ssrc, sequence, timestamp))
    }

    fn from_header(header: RtpHeader) -> Self {
        Self {
            base_timestamp: header.timestamp(),
            header,
            mtu: DEFAULT_MTU,
            adapter: Vec::new(),
            flags: 0,
            etype: 0,
            current_cv: 0,
            next_cv: 0,
            have_caps: false,
            caps: None,
            pending_events: Vec::new(),
        }
    }

    pub fn mtu(&self) -> usize {
        self.mtu
    }

    /// Maximum packet size including RTP header and sub-header.
    pub fn set_mtu(&mut self, mtu: usize) -> Result<()> {
        if mtu <= HEADER_LEN + SUB_HEADER_LEN {
            return Err(NetError::InvalidConfig(format!(
                "MTU {mtu} leaves no room for payload"
            )));
        }
        self.mtu = mtu;
        Ok(())
    }

    /// Version of the most recently set caps.
    pub fn caps_version(&self) -> u8 {
        self.current_cv
    }

    pub fn caps(&self) -> Option<&str> {
        self.caps.as_deref()
    }

    /// Bytes waiting for the next flush.
    pub fn pending_bytes(&self) -> usize {
        self.adapter.len()
    }

    /// New upstream format. Held-back events are flushed first; the caps
    /// themselves wait for the next buffer.
    pub fn set_caps(&mut self, caps: &str) -> Vec<Vec<u8>> {
        self.current_cv = self.next_cv;
        self.have_caps = true;
        self.caps = Some(caps.to_string());
        tracing::debug!(caps, version = self.current_cv, "caps set");

        let mut packets = Vec::new();
        for event in std::mem::take(&mut self.pending_events) {
            packets.extend(self.process_event(&event));
        }

        // NUL-terminated on the wire.
        let mut data = caps.as_bytes().to_vec();
        data.push(0);
        self.push_framed(&data);

        self.flags = FLAG_CAPS | (self.current_cv << 4);
        self.next_cv = (self.next_cv + 1) & 0x07;
        packets
    }

    /// Queue or send an out-of-band event.
    pub fn handle_event(&mut self, event: OutOfBandEvent) -> Vec<Vec<u8>> {
        if !self.have_caps {
            tracing::trace!(kind = ?event.kind, "event held until caps");
            self.pending_events.push(event);
            return Vec::new();
        }
        self.process_event(&event)
    }

    /// Append a media buffer and flush it.
    pub fn handle_buffer(&mut self, buffer: &MediaBuffer) -> Vec<Vec<u8>> {
        let f = buffer.flags;
        if f.delta_unit {
            self.flags |= FLAG_DELTA_UNIT;
        }
        if f.media1 {
            self.flags |= FLAG_MEDIA1;
        }
        if f.media2 {
            self.flags |= FLAG_MEDIA2;
        }
        if f.media3 {
            self.flags |= FLAG_MEDIA3;
        }

        if let Some(pts) = buffer.pts {
            let ticks = (pts.as_nanos() * u128::from(CLOCK_RATE) / 1_000_000_000) as u32;
            self.header.reset_timestamp();
            self.header
                .advance_timestamp(self.base_timestamp.wrapping_add(ticks));
        }

        self.adapter.extend_from_slice(&buffer.data);
        self.flush()
    }

    /// Drain the adapter into packets.
    pub fn flush(&mut self) -> Vec<Vec<u8>> {
        let mut packets = Vec::new();
        let mut frag_offset: u32 = 0;
        let mut taken = 0;
        let mut avail = self.adapter.len();

        while avail > 0 {
            let packet_len = (HEADER_LEN + SUB_HEADER_LEN + avail).min(self.mtu);
            let payload_len = packet_len - HEADER_LEN - SUB_HEADER_LEN;
            avail -= payload_len;

            let mut packet = Vec::with_capacity(packet_len);
            packet.extend_from_slice(&self.header.write(avail == 0));
            packet.push(self.flags);
            packet.push(self.etype);
            packet.extend_from_slice(&[0, 0]);
            packet.extend_from_slice(&frag_offset.to_be_bytes());
            packet.extend_from_slice(&self.adapter[taken..taken + payload_len]);

            tracing::trace!(len = packet_len, frag_offset, "X-GST packet");
            frag_offset = frag_offset.wrapping_add(payload_len as u32);
            taken += payload_len;
            packets.push(packet);
        }

        self.adapter.clear();
        self.flags &= FLAGS_KEPT;
        self.etype = 0;
        packets
    }

    /// Drop held-back events and forget the caps, as when the stream is
    /// stopped or restarted.
    pub fn reset(&mut self) {
        self.pending_events.clear();
        self.have_caps = false;
    }

    fn process_event(&mut self, event: &OutOfBandEvent) -> Vec<Vec<u8>> {
        match event.kind.code() {
            Some(code) => {
                tracing::debug!(etype = code, "event payload");
                self.etype = code;
                self.push_framed(event.structure.as_bytes());
                self.flush()
            }
            None => Vec::new(),
        }
    }

    fn push_framed(&mut self, data: &[u8]) {
        varint::encode(data.len() as u64, &mut self.adapter);
        self.adapter.extend_from_slice(data);
    }
}

impl Packetizer for GenericPayloader {
    fn packetize(&mut self, buffer: &MediaBuffer) -> Result<Vec<Vec<u8>>> {
        Ok(self.handle_buffer(buffer))
    }

    fn codec_name(&self) -> &'static str {
        "X-GST"
    }

    fn clock_rate(&self) -> u32 {
        CLOCK_RATE
    }

    fn payload_type(&self) -> u8 {
        self.header.pt
    }

    fn sdp_attributes(&self) -> Vec<Attribute> {
        let pt = self.payload_type();
        let mut attributes = vec![Attribute::new(
            "rtpmap",
            Some(&format!("{} {}/{}", pt, self.codec_name(), CLOCK_RATE)),
        )];
        if let Some(caps) = &self.caps {
            let fmtp = format!(
                "{} caps={};capsversion={}",
                pt,
                BASE64_STANDARD.encode(caps),
                self.current_cv
            );
            attributes.push(Attribute::new("fmtp", Some(&fmtp)));
        }
        attributes
    }

    fn next_sequence(&self) -> u16 {
        self.header.sequence()
    }

    fn next_rtp_timestamp(&self) -> u32 {
        self.header.timestamp()
    }
}
