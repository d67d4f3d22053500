// Station packet wire format.
//
// A packet is a fixed 24-byte little-endian header followed by
// `payload_len` bytes of samples, time-major: nr_samples slots of
// nr_channels samples each.

use std::ops::Range;

use crate::error::{IngestError, Result};
use crate::Structs::descriptor::BufferDescriptor;

pub const PACKET_VERSION: u8 = 1;

/// Size of the encoded [`PacketHeader`] in bytes.
pub const HEADER_SIZE: usize = 24;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct PacketHeader {
    pub version: u8,
    pub board: u8,
    pub bit_mode: u8,
    pub nr_channels: u8,
    pub nr_samples: u16,
    pub station_id: u16,
    /// Absolute time index of the first sample.
    pub time_index: u64,
    pub payload_len: u32,
    pub flags: u32,
}

impl PacketHeader {
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        out[0] = self.version;
        out[1] = self.board;
        out[2] = self.bit_mode;
        out[3] = self.nr_channels;
        out[4..6].copy_from_slice(&self.nr_samples.to_le_bytes());
        out[6..8].copy_from_slice(&self.station_id.to_le_bytes());
        out[8..16].copy_from_slice(&self.time_index.to_le_bytes());
        out[16..20].copy_from_slice(&self.payload_len.to_le_bytes());
        out[20..24].copy_from_slice(&self.flags.to_le_bytes());
        out
    }

    /// Parse a header. Only framing is checked here; whether the packet fits
    /// a buffer is decided by the ingester.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(IngestError::Format(format!(
                "header needs {HEADER_SIZE} bytes, got {}",
                bytes.len()
            )));
        }
        let u16_at = |at: usize| u16::from_le_bytes([bytes[at], bytes[at + 1]]);
        let u32_at = |at: usize| {
            u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
        };
        let mut time = [0u8; 8];
        time.copy_from_slice(&bytes[8..16]);

        Ok(Self {
            version: bytes[0],
            board: bytes[1],
            bit_mode: bytes[2],
            nr_channels: bytes[3],
            nr_samples: u16_at(4),
            station_id: u16_at(6),
            time_index: u64::from_le_bytes(time),
            payload_len: u32_at(16),
            flags: u32_at(20),
        })
    }

    /// Time indices covered by this packet.
    pub fn time_range(&self) -> Range<u64> {
        self.time_index..self.time_index.saturating_add(self.nr_samples as u64)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Packet {
    pub header: PacketHeader,
    pub payload: Vec<u8>,
}

impl Packet {
    /// Build a packet, filling in `payload_len` from the payload.
    pub fn new(mut header: PacketHeader, payload: Vec<u8>) -> Self {
        header.payload_len = payload.len() as u32;
        Self { header, payload }
    }

    /// A well-formed packet for `descriptor` with every payload byte set to `fill`.
    pub fn filled(
        descriptor: &BufferDescriptor,
        board: u8,
        time_index: u64,
        nr_samples: u16,
        fill: u8,
    ) -> Self {
        let header = PacketHeader {
            version: PACKET_VERSION,
            board,
            bit_mode: descriptor.bit_mode as u8,
            nr_channels: descriptor.channels_per_board as u8,
            nr_samples,
            station_id: descriptor.station_id as u16,
            time_index,
            payload_len: 0,
            flags: 0,
        };
        let payload = vec![fill; nr_samples as usize * descriptor.slot_bytes()];
        Self::new(header, payload)
    }

    pub fn encode_into(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.header.encode());
        out.extend_from_slice(&self.payload);
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_SIZE + self.payload.len());
        self.encode_into(&mut out);
        out
    }
}
