//! Audio stream configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Parameters of a PCM stream flowing through capture, codec and playback.
///
/// `frame_size` is in samples per channel; one frame therefore carries
/// `frame_size * channels` interleaved i16 samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Channel count (1 = mono, 2 = stereo)
    pub channels: u16,
    /// Samples per channel per frame (960 = 20 ms at 48 kHz)
    pub frame_size: usize,
    /// Target codec bitrate in bits per second
    pub bitrate: u32,
}

impl StreamConfig {
    /// Stereo music defaults: 48 kHz, 20 ms frames, 128 kbps
    pub fn music() -> Self {
        Self {
            sample_rate: 48000,
            channels: 2,
            frame_size: 960,
            bitrate: 128_000,
        }
    }

    /// Mono voice defaults: 48 kHz, 20 ms frames, 64 kbps
    pub fn voice() -> Self {
        Self {
            sample_rate: 48000,
            channels: 1,
            frame_size: 960,
            bitrate: 64_000,
        }
    }

    /// Total interleaved samples in one frame
    pub fn samples_per_frame(&self) -> usize {
        self.frame_size * self.channels as usize
    }

    /// Wall-clock duration of one frame
    pub fn frame_duration(&self) -> Duration {
        Duration::from_micros(self.frame_size as u64 * 1_000_000 / self.sample_rate as u64)
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self::music()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn music_frame_is_20ms() {
        let cfg = StreamConfig::music();
        assert_eq!(cfg.frame_duration(), Duration::from_millis(20));
        assert_eq!(cfg.samples_per_frame(), 1920);
    }

    #[test]
    fn voice_is_mono() {
        let cfg = StreamConfig::voice();
        assert_eq!(cfg.channels, 1);
        assert_eq!(cfg.samples_per_frame(), 960);
    }
}
