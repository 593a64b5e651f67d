//! Audio payload codec

use crate::error::ParseError;
use crate::protocol::CodecType;

/// Fixed part of the audio payload preceding the codec bytes
pub const AUDIO_HEADER_SIZE: usize = 8;

/// Payload of a [`PacketType::Audio`](crate::protocol::PacketType) packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioPayload {
    pub codec: CodecType,
    /// Sample rate in kHz (48 kHz = 48)
    pub sample_rate_khz: u8,
    pub channels: u8,
    /// Bitrate in kbps (128 kbps = 128)
    pub bitrate_kbps: u8,
    pub frame_timestamp_ms: u32,
    /// Opaque codec bytes
    pub data: Vec<u8>,
}

impl AudioPayload {
    pub fn marshal(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(AUDIO_HEADER_SIZE + self.data.len());
        buf.push(self.codec as u8);
        buf.push(self.sample_rate_khz);
        buf.push(self.channels);
        buf.push(self.bitrate_kbps);
        buf.extend_from_slice(&self.frame_timestamp_ms.to_be_bytes());
        buf.extend_from_slice(&self.data);
        buf
    }

    pub fn parse(data: &[u8]) -> Result<Self, ParseError> {
        if data.len() < AUDIO_HEADER_SIZE {
            return Err(ParseError::AudioTooSmall(data.len()));
        }

        // Unknown codec ids degrade to Opus rather than dropping the frame
        let codec = CodecType::from_u8(data[0]).unwrap_or(CodecType::Opus);

        Ok(Self {
            codec,
            sample_rate_khz: data[1],
            channels: data[2],
            bitrate_kbps: data[3],
            frame_timestamp_ms: u32::from_be_bytes(data[4..8].try_into().unwrap()),
            data: data[AUDIO_HEADER_SIZE..].to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let payload = AudioPayload {
            codec: CodecType::Opus,
            sample_rate_khz: 48,
            channels: 2,
            bitrate_kbps: 128,
            frame_timestamp_ms: 12345,
            data: vec![0xDE, 0xAD, 0xBE, 0xEF],
        };

        let wire = payload.marshal();
        assert_eq!(wire.len(), 12);
        assert_eq!(AudioPayload::parse(&wire).unwrap(), payload);
    }

    #[test]
    fn empty_data() {
        let payload = AudioPayload {
            codec: CodecType::Opus,
            sample_rate_khz: 48,
            channels: 1,
            bitrate_kbps: 64,
            frame_timestamp_ms: 0,
            data: vec![],
        };
        let parsed = AudioPayload::parse(&payload.marshal()).unwrap();
        assert!(parsed.data.is_empty());
    }

    #[test]
    fn too_small() {
        assert_eq!(
            AudioPayload::parse(&[1, 2, 3]),
            Err(ParseError::AudioTooSmall(3))
        );
    }
}
