//! Opus encoder wrapper

use bytes::Bytes;
use opus::{Application, Channels, Encoder};

use crate::config::StreamConfig;
use crate::error::CodecError;

/// Opus encoder bound to one stream configuration
pub struct OpusEncoder {
    encoder: Encoder,
    config: StreamConfig,
    /// Encoding buffer, reused to avoid per-frame allocations
    encode_buffer: Vec<u8>,
    frames_encoded: u64,
    bytes_produced: u64,
}

impl OpusEncoder {
    /// Create an encoder with the given application profile
    pub fn new(config: StreamConfig, application: Application) -> Result<Self, CodecError> {
        let channels = match config.channels {
            1 => Channels::Mono,
            2 => Channels::Stereo,
            n => {
                return Err(CodecError::EncoderInit(format!(
                    "Unsupported channel count: {}",
                    n
                )))
            }
        };

        let mut encoder = Encoder::new(config.sample_rate, channels, application)
            .map_err(|e| CodecError::EncoderInit(e.to_string()))?;
        encoder
            .set_bitrate(opus::Bitrate::Bits(config.bitrate as i32))
            .map_err(|e| CodecError::EncoderInit(format!("Failed to set bitrate: {}", e)))?;

        // Max Opus frame is about 1275 bytes
        let encode_buffer = vec![0u8; 4000];

        Ok(Self {
            encoder,
            config,
            encode_buffer,
            frames_encoded: 0,
            bytes_produced: 0,
        })
    }

    /// Encoder tuned for music broadcast
    pub fn music(config: StreamConfig) -> Result<Self, CodecError> {
        Self::new(config, Application::Audio)
    }

    /// Encoder tuned for voice
    pub fn voice(config: StreamConfig) -> Result<Self, CodecError> {
        Self::new(config, Application::Voip)
    }

    /// Encode one frame of interleaved i16 samples. Input length must be
    /// `frame_size * channels`.
    pub fn encode(&mut self, samples: &[i16]) -> Result<Bytes, CodecError> {
        if samples.len() != self.config.samples_per_frame() {
            return Err(CodecError::InvalidFrameSize(samples.len()));
        }

        let size = self
            .encoder
            .encode(samples, &mut self.encode_buffer)
            .map_err(|e| CodecError::EncodingFailed(e.to_string()))?;

        self.frames_encoded += 1;
        self.bytes_produced += size as u64;

        Ok(Bytes::copy_from_slice(&self.encode_buffer[..size]))
    }

    pub fn set_bitrate(&mut self, bitrate: u32) -> Result<(), CodecError> {
        self.encoder
            .set_bitrate(opus::Bitrate::Bits(bitrate as i32))
            .map_err(|e| CodecError::EncoderInit(format!("Failed to set bitrate: {}", e)))?;
        self.config.bitrate = bitrate;
        Ok(())
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    pub fn stats(&self) -> EncoderStats {
        EncoderStats {
            frames_encoded: self.frames_encoded,
            bytes_produced: self.bytes_produced,
        }
    }
}

/// Encoder statistics
#[derive(Debug, Clone, Copy)]
pub struct EncoderStats {
    pub frames_encoded: u64,
    pub bytes_produced: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encoder_creation() {
        let encoder = OpusEncoder::music(StreamConfig::music());
        assert!(encoder.is_ok());
    }

    #[test]
    fn encodes_silence() {
        let mut encoder = OpusEncoder::music(StreamConfig::music()).unwrap();
        let samples = vec![0i16; encoder.config().samples_per_frame()];

        let encoded = encoder.encode(&samples).unwrap();
        assert!(!encoded.is_empty());
        assert_eq!(encoder.stats().frames_encoded, 1);
    }

    #[test]
    fn wrong_frame_size_rejected() {
        let mut encoder = OpusEncoder::voice(StreamConfig::voice()).unwrap();
        assert!(matches!(
            encoder.encode(&[0i16; 100]),
            Err(CodecError::InvalidFrameSize(100))
        ));
    }
}
