use crate::error::{NetError, Result};

/// Length of the fixed RTP header.
pub const HEADER_LEN: usize = 12;

/// Generic RTP fixed header builder (RFC 3550 §5.1).
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |V=2|P|X|  CC   |M|     PT      |       Sequence Number         |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                           Timestamp                           |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                             SSRC                              |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
///
/// Shared by every packetizer. It manages:
/// - **Sequence number**: 16-bit, wrapping, incremented on every packet.
/// - **Timestamp**: 32-bit media clock, wrapping. Advanced explicitly by the
///   packetizer in clock-rate units.
/// - **SSRC**: fixed for the lifetime of the stream.
///
/// Version is always 2. Padding, extension, and CSRC count are always 0.
#[derive(Debug)]
pub struct RtpHeader {
    /// RTP payload type (7-bit, RFC 3551).
    pub pt: u8,
    /// Synchronization source identifier (RFC 3550 §8.1).
    pub ssrc: u32,
    sequence: u16,
    timestamp: u32,
}

impl RtpHeader {
    /// Create a header state with explicit initial values.
    pub fn new(pt: u8, ssrc: u32, sequence: u16, timestamp: u32) -> Self {
        tracing::debug!(
            pt,
            ssrc = format_args!("{:#010X}", ssrc),
            sequence,
            timestamp,
            "RTP header state created"
        );
        Self {
            pt: pt & 0x7f,
            ssrc,
            sequence,
            timestamp,
        }
    }

    /// Create with random SSRC, initial sequence number and initial
    /// timestamp (RFC 3550 §5.1, §8.1).
    pub fn random(pt: u8) -> Self {
        Self::new(pt, rand::random(), rand::random(), rand::random())
    }

    /// Current sequence number (before the next [`write`](Self::write) call).
    pub fn sequence(&self) -> u16 {
        self.sequence
    }

    /// Timestamp the next packet will carry.
    pub fn timestamp(&self) -> u32 {
        self.timestamp
    }

    pub fn set_payload_type(&mut self, pt: u8) {
        self.pt = pt & 0x7f;
    }

    /// Serialize a 12-byte RTP fixed header and advance the sequence number.
    ///
    /// The `marker` bit (RFC 3550 §5.1) is interpreted by the payload format.
    pub fn write(&mut self, marker: bool) -> [u8; HEADER_LEN] {
        let first_byte: u8 = 2 << 6;
        let second_byte: u8 = ((marker as u8) << 7) | self.pt;

        let mut header = [0u8; HEADER_LEN];
        header[0] = first_byte;
        header[1] = second_byte;
        header[2..4].copy_from_slice(&self.sequence.to_be_bytes());
        header[4..8].copy_from_slice(&self.timestamp.to_be_bytes());
        header[8..12].copy_from_slice(&self.ssrc.to_be_bytes());

        self.sequence = self.sequence.wrapping_add(1);
        header
    }

    /// Advance the RTP timestamp by the given increment.
    pub fn advance_timestamp(&mut self, increment: u32) {
        self.timestamp = self.timestamp.wrapping_add(increment);
    }

    /// Restart the media clock at zero.
    pub fn reset_timestamp(&mut self) {
        self.timestamp = 0;
    }
}

/// A received RTP packet, borrowed from the datagram it was read from.
///
/// Fields are extracted byte by byte, so the input needs no alignment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpPacket<'a> {
    pub marker: bool,
    pub payload_type: u8,
    pub sequence: u16,
    pub timestamp: u32,
    pub ssrc: u32,
    pub csrc_count: u8,
    /// Payload after CSRCs and extension, with padding removed.
    pub payload: &'a [u8],
}

impl<'a> RtpPacket<'a> {
    pub fn parse(data: &'a [u8]) -> Result<Self> {
        if data.len() < HEADER_LEN {
            return Err(NetError::MalformedPacket("shorter than fixed header"));
        }
        if data[0] >> 6 != 2 {
            return Err(NetError::MalformedPacket("unsupported RTP version"));
        }

        let padding = data[0] & 0x20 != 0;
        let extension = data[0] & 0x10 != 0;
        let csrc_count = data[0] & 0x0f;

        let mut offset = HEADER_LEN + 4 * csrc_count as usize;
        if data.len() < offset {
            return Err(NetError::MalformedPacket("truncated CSRC list"));
        }

        if extension {
            // 16-bit profile id, then 16-bit length in 32-bit words.
            let header = data
                .get(offset..offset + 4)
                .ok_or(NetError::MalformedPacket("truncated extension header"))?;
            let words = u16::from_be_bytes([header[2], header[3]]) as usize;
            offset += 4 + 4 * words;
            if data.len() < offset {
                return Err(NetError::MalformedPacket("truncated extension"));
            }
        }

        let mut end = data.len();
        if padding {
            let pad = data[end - 1] as usize;
            if pad == 0 || end - offset < pad {
                return Err(NetError::MalformedPacket("invalid padding length"));
            }
            end -= pad;
        }

        Ok(RtpPacket {
            marker: data[1] & 0x80 != 0,
            payload_type: data[1] & 0x7f,
            sequence: u16::from_be_bytes([data[2], data[3]]),
            timestamp: u32::from_be_bytes([data[4], data[5], data[6], data[7]]),
            ssrc: u32::from_be_bytes([data[8], data[9], data[10], data[11]]),
            csrc_count,
            payload: &data[offset..end],
        })
    }
}
