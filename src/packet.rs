use serde::Serialize;
use std::sync::Arc;

use super::error::{DecodeError, DecodeStage};
use super::packet_payload::{TelemetryPayload, PAYLOAD_LEN};

pub const PRIMARY_HEADER_LEN: usize = 6;
pub const SECONDARY_HEADER_LEN: usize = 10;
pub const PACKET_LEN: usize = PRIMARY_HEADER_LEN + SECONDARY_HEADER_LEN + PAYLOAD_LEN;

/// Lenient pre-check applied before decoding. It is shorter than `PACKET_LEN`,
/// so buffers in between still reach the decoder and fail as `Truncated`.
pub const MIN_PACKET_LEN: usize = 20;

/// CCSDS primary header, kept as the three raw big-endian words.
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PrimaryHeader {
    pub packet_id: u16,        // version(3) | type(1) | sec hdr flag(1) | apid(11)
    pub sequence_control: u16, // seq flags(2) | seq count(14)
    pub packet_length: u16,    // declared data length minus one, never checked
}

impl PrimaryHeader {
    /// Builds a version 0 telemetry header with the secondary header flag set.
    pub fn telemetry(apid: u16, seq_flags: u8, seq_count: u16) -> Self {
        Self {
            packet_id: (1 << 11) | (apid & 0x07FF),
            sequence_control: ((seq_flags as u16 & 0x03) << 14) | (seq_count & 0x3FFF),
            packet_length: (PACKET_LEN - PRIMARY_HEADER_LEN - 1) as u16,
        }
    }

    pub fn version(&self) -> u8 {
        ((self.packet_id >> 13) & 0x07) as u8
    }

    pub fn packet_type(&self) -> u8 {
        ((self.packet_id >> 12) & 0x01) as u8
    }

    pub fn has_secondary_header(&self) -> bool {
        (self.packet_id >> 11) & 0x01 == 1
    }

    pub fn apid(&self) -> u16 {
        self.packet_id & 0x07FF
    }

    pub fn seq_flags(&self) -> u8 {
        ((self.sequence_control >> 14) & 0x03) as u8
    }

    pub fn seq_count(&self) -> u16 {
        self.sequence_control & 0x3FFF
    }
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SecondaryHeader {
    pub timestamp: u64, // unix seconds
    pub subsystem_id: u16,
}

/// One decoded datagram. Holds the received bytes verbatim for raw storage.
#[derive(Debug, Clone, PartialEq)]
pub struct FullPacket {
    pub primary: PrimaryHeader,
    pub secondary: SecondaryHeader,
    pub payload: TelemetryPayload,
    raw: Arc<[u8]>,
}

impl FullPacket {
    /// Assembles a packet whose raw bytes are its own encoding.
    pub fn new(primary: PrimaryHeader, secondary: SecondaryHeader, payload: TelemetryPayload) -> Self {
        let raw = encode(&primary, &secondary, &payload).into();
        Self {
            primary,
            secondary,
            payload,
            raw,
        }
    }

    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    pub fn apid(&self) -> u16 {
        self.primary.apid()
    }

    pub fn encode(&self) -> Vec<u8> {
        encode(&self.primary, &self.secondary, &self.payload)
    }
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, stage: DecodeStage, len: usize) -> Result<&'a [u8], DecodeError> {
        let available = self.buf.len() - self.pos;
        if available < len {
            return Err(DecodeError::Truncated {
                stage,
                needed: len,
                available,
            });
        }
        let out = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(out)
    }
}

fn be_u16(b: &[u8], at: usize) -> u16 {
    u16::from_be_bytes([b[at], b[at + 1]])
}

fn be_u64(b: &[u8], at: usize) -> u64 {
    let mut word = [0u8; 8];
    word.copy_from_slice(&b[at..at + 8]);
    u64::from_be_bytes(word)
}

/// Decodes the primary header, secondary header and payload in wire order.
/// `PacketLength` is carried through without being compared to `pkt.len()`.
pub fn decode(pkt: &[u8]) -> Result<FullPacket, DecodeError> {
    if pkt.len() < MIN_PACKET_LEN {
        return Err(DecodeError::TooShort {
            length: pkt.len(),
            minimum: MIN_PACKET_LEN,
        });
    }

    let mut reader = Reader { buf: pkt, pos: 0 };

    let b = reader.take(DecodeStage::PrimaryHeader, PRIMARY_HEADER_LEN)?;
    let primary = PrimaryHeader {
        packet_id: be_u16(b, 0),
        sequence_control: be_u16(b, 2),
        packet_length: be_u16(b, 4),
    };

    let b = reader.take(DecodeStage::SecondaryHeader, SECONDARY_HEADER_LEN)?;
    let secondary = SecondaryHeader {
        timestamp: be_u64(b, 0),
        subsystem_id: be_u16(b, 8),
    };

    let b = reader.take(DecodeStage::Payload, PAYLOAD_LEN)?;
    let payload = TelemetryPayload::from_be_slice(b);

    Ok(FullPacket {
        primary,
        secondary,
        payload,
        raw: Arc::from(pkt),
    })
}

pub fn encode(primary: &PrimaryHeader, secondary: &SecondaryHeader, payload: &TelemetryPayload) -> Vec<u8> {
    let mut out = Vec::with_capacity(PACKET_LEN);
    out.extend_from_slice(&primary.packet_id.to_be_bytes());
    out.extend_from_slice(&primary.sequence_control.to_be_bytes());
    out.extend_from_slice(&primary.packet_length.to_be_bytes());
    out.extend_from_slice(&secondary.timestamp.to_be_bytes());
    out.extend_from_slice(&secondary.subsystem_id.to_be_bytes());
    payload.write_be(&mut out);
    out
}
