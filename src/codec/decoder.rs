//! Opus decoder wrapper

use opus::{Channels, Decoder};

use crate::config::StreamConfig;
use crate::error::CodecError;

/// Opus decoder producing interleaved i16 PCM
pub struct OpusDecoder {
    decoder: Decoder,
    channels: u16,
    /// Decoding buffer sized for the maximum 120 ms Opus frame
    decode_buffer: Vec<i16>,
    frames_decoded: u64,
    frames_lost: u64,
}

impl OpusDecoder {
    pub fn new(config: StreamConfig) -> Result<Self, CodecError> {
        let channels = match config.channels {
            1 => Channels::Mono,
            2 => Channels::Stereo,
            n => {
                return Err(CodecError::DecoderInit(format!(
                    "Unsupported channel count: {}",
                    n
                )))
            }
        };

        let decoder = Decoder::new(config.sample_rate, channels)
            .map_err(|e| CodecError::DecoderInit(e.to_string()))?;

        let decode_buffer =
            vec![0i16; config.sample_rate as usize * config.channels as usize * 120 / 1000];

        Ok(Self {
            decoder,
            channels: config.channels,
            decode_buffer,
            frames_decoded: 0,
            frames_lost: 0,
        })
    }

    /// Decode one Opus packet to interleaved samples
    pub fn decode(&mut self, data: &[u8]) -> Result<Vec<i16>, CodecError> {
        let samples = self
            .decoder
            .decode(data, &mut self.decode_buffer, false)
            .map_err(|e| CodecError::DecodingFailed(e.to_string()))?;

        self.frames_decoded += 1;
        Ok(self.decode_buffer[..samples * self.channels as usize].to_vec())
    }

    /// Conceal a lost packet
    pub fn decode_plc(&mut self) -> Result<Vec<i16>, CodecError> {
        let samples = self
            .decoder
            .decode(&[], &mut self.decode_buffer, false)
            .map_err(|e| CodecError::DecodingFailed(e.to_string()))?;

        self.frames_lost += 1;
        Ok(self.decode_buffer[..samples * self.channels as usize].to_vec())
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn stats(&self) -> DecoderStats {
        DecoderStats {
            frames_decoded: self.frames_decoded,
            frames_lost: self.frames_lost,
        }
    }
}

/// Decoder statistics
#[derive(Debug, Clone, Copy)]
pub struct DecoderStats {
    pub frames_decoded: u64,
    pub frames_lost: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::OpusEncoder;

    #[test]
    fn encode_decode_roundtrip() {
        let config = StreamConfig::music();
        let mut encoder = OpusEncoder::music(config).unwrap();
        let mut decoder = OpusDecoder::new(config).unwrap();

        // 440 Hz sine
        let mut samples = Vec::with_capacity(config.samples_per_frame());
        for i in 0..config.frame_size {
            let t = i as f32 / config.sample_rate as f32;
            let v = ((t * 440.0 * 2.0 * std::f32::consts::PI).sin() * 16000.0) as i16;
            samples.push(v);
            samples.push(v);
        }

        let encoded = encoder.encode(&samples).unwrap();
        let decoded = decoder.decode(&encoded).unwrap();
        assert_eq!(decoded.len(), config.samples_per_frame());
    }

    #[test]
    fn plc_counts_loss() {
        let mut decoder = OpusDecoder::new(StreamConfig::voice()).unwrap();
        assert!(decoder.decode_plc().is_ok());
        assert_eq!(decoder.stats().frames_lost, 1);
    }
}
