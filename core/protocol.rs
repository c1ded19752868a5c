// Data-channel frame codec - pure data structures, no I/O
//
// Wire layout, all integers little-endian:
//
//   [header_len: u16][data_len: u16][stream_id: u16][federation_id: u16]
//   [header: header_len bytes][payload: data_len bytes]
//
// The stream id field is 16 bits wide while stream ids elsewhere are u32.
// Ids above 0xFFFF are truncated on the wire; widening the field would need
// a protocol version bump on the broker side.
use crate::error::FrameError;
use crate::types::StreamId;

pub const PREAMBLE_LEN: usize = 8;

/// Largest header or payload a single frame can describe
pub const MAX_SECTION_LEN: usize = u16::MAX as usize;

/// Federation id is reserved and always sent as 0
pub const DEFAULT_FEDERATION_ID: u16 = 0;

/// Payload of the registration ping a receiver sends once per stream
pub const RECEIVER_PING_PAYLOAD: [u8; 4] = [0; 4];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataFrame {
    pub stream_id: StreamId,
    pub federation_id: u16,
    pub header: Vec<u8>,
    pub payload: Vec<u8>,
}

impl DataFrame {
    pub fn new(stream_id: StreamId, header: Vec<u8>, payload: Vec<u8>) -> Self {
        DataFrame {
            stream_id,
            federation_id: DEFAULT_FEDERATION_ID,
            header,
            payload,
        }
    }

    /// A frame without payload only keeps a registration alive and carries
    /// nothing to dispatch
    pub fn is_empty_frame(&self) -> bool {
        self.payload.is_empty()
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, FrameError> {
        encode_frame(self.stream_id, &self.header, &self.payload)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, FrameError> {
        if bytes.len() < PREAMBLE_LEN {
            return Err(FrameError::TooShort { len: bytes.len() });
        }

        let header_len = u16::from_le_bytes([bytes[0], bytes[1]]) as usize;
        let data_len = u16::from_le_bytes([bytes[2], bytes[3]]) as usize;
        let stream_id = u16::from_le_bytes([bytes[4], bytes[5]]);
        let federation_id = u16::from_le_bytes([bytes[6], bytes[7]]);

        let body = &bytes[PREAMBLE_LEN..];
        if header_len + data_len > body.len() {
            return Err(FrameError::LengthMismatch {
                declared: header_len + data_len,
                available: body.len(),
            });
        }

        Ok(DataFrame {
            stream_id: StreamId::from(stream_id),
            federation_id,
            header: body[..header_len].to_vec(),
            payload: body[header_len..header_len + data_len].to_vec(),
        })
    }
}

/// Narrow a stream id to the 16-bit wire field. Ids above 65535 alias
/// lower ids on the wire; the field is not widened without a protocol change.
pub fn wire_stream_id(stream_id: StreamId) -> u16 {
    stream_id as u16
}

pub fn encode_frame(stream_id: StreamId, header: &[u8], payload: &[u8]) -> Result<Vec<u8>, FrameError> {
    if header.len() > MAX_SECTION_LEN {
        return Err(FrameError::TooLarge { field: "header", len: header.len() });
    }
    if payload.len() > MAX_SECTION_LEN {
        return Err(FrameError::TooLarge { field: "payload", len: payload.len() });
    }

    let mut bytes = Vec::with_capacity(PREAMBLE_LEN + header.len() + payload.len());
    bytes.extend_from_slice(&(header.len() as u16).to_le_bytes());
    bytes.extend_from_slice(&(payload.len() as u16).to_le_bytes());
    bytes.extend_from_slice(&wire_stream_id(stream_id).to_le_bytes());
    bytes.extend_from_slice(&DEFAULT_FEDERATION_ID.to_le_bytes());
    bytes.extend_from_slice(header);
    bytes.extend_from_slice(payload);
    Ok(bytes)
}
