//! Audio source abstraction
//!
//! A sum type over the concrete PCM producers, sharing one pull
//! contract: `read` blocks cooperatively until a frame is available and
//! returns interleaved i16 samples of length `frame_size * channels`.

use std::path::Path;
use std::time::Duration;

use crate::config::StreamConfig;
use crate::error::AudioError;

use super::capture::MicrophoneSource;
use super::file::FileSource;

/// A pull-based PCM frame producer
pub enum AudioSource {
    /// Platform capture device
    Microphone(MicrophoneSource),
    /// Decoded audio file (MP3 and friends)
    File(FileSource),
    /// Sine generator paced at the frame cadence; stands in for capture
    /// hardware in tests and headless hosts
    Tone(ToneSource),
}

impl AudioSource {
    pub fn microphone(config: StreamConfig) -> Self {
        AudioSource::Microphone(MicrophoneSource::new(config))
    }

    pub fn file<P: AsRef<Path>>(path: P, config: StreamConfig) -> Result<Self, AudioError> {
        Ok(AudioSource::File(FileSource::open(path, config)?))
    }

    pub fn tone(frequency_hz: f32, config: StreamConfig) -> Self {
        AudioSource::Tone(ToneSource::new(frequency_hz, config))
    }

    pub fn start(&mut self) -> Result<(), AudioError> {
        match self {
            AudioSource::Microphone(s) => s.start(),
            AudioSource::File(s) => s.start(),
            AudioSource::Tone(s) => s.start(),
        }
    }

    pub fn stop(&mut self) {
        match self {
            AudioSource::Microphone(s) => s.stop(),
            AudioSource::File(s) => s.stop(),
            AudioSource::Tone(s) => s.stop(),
        }
    }

    /// Next PCM frame. [`AudioError::EndOfStream`] marks a finite source
    /// running dry; any other error is per-frame and transient.
    pub fn read(&mut self) -> Result<Vec<i16>, AudioError> {
        match self {
            AudioSource::Microphone(s) => s.read(),
            AudioSource::File(s) => s.read(),
            AudioSource::Tone(s) => s.read(),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.config().sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.config().channels
    }

    pub fn is_running(&self) -> bool {
        match self {
            AudioSource::Microphone(s) => s.is_running(),
            AudioSource::File(s) => s.is_running(),
            AudioSource::Tone(s) => s.is_running(),
        }
    }

    fn config(&self) -> &StreamConfig {
        match self {
            AudioSource::Microphone(s) => s.config(),
            AudioSource::File(s) => s.config(),
            AudioSource::Tone(s) => s.config(),
        }
    }
}

/// Sine generator producing frames at the real frame cadence
pub struct ToneSource {
    config: StreamConfig,
    frequency_hz: f32,
    phase: f32,
    running: bool,
}

impl ToneSource {
    pub fn new(frequency_hz: f32, config: StreamConfig) -> Self {
        Self {
            config,
            frequency_hz,
            phase: 0.0,
            running: false,
        }
    }

    pub fn start(&mut self) -> Result<(), AudioError> {
        self.running = true;
        Ok(())
    }

    pub fn stop(&mut self) {
        self.running = false;
    }

    pub fn read(&mut self) -> Result<Vec<i16>, AudioError> {
        if !self.running {
            return Err(AudioError::NotRunning);
        }

        // Pace at the frame cadence so the broadcast loop runs in real time
        std::thread::sleep(self.frame_sleep());

        let step = self.frequency_hz * 2.0 * std::f32::consts::PI / self.config.sample_rate as f32;
        let mut frame = Vec::with_capacity(self.config.samples_per_frame());
        for _ in 0..self.config.frame_size {
            let v = (self.phase.sin() * 8000.0) as i16;
            self.phase += step;
            if self.phase > 2.0 * std::f32::consts::PI {
                self.phase -= 2.0 * std::f32::consts::PI;
            }
            for _ in 0..self.config.channels {
                frame.push(v);
            }
        }
        Ok(frame)
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    fn frame_sleep(&self) -> Duration {
        self.config.frame_duration()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tone_produces_full_frames() {
        let config = StreamConfig {
            sample_rate: 48000,
            channels: 2,
            frame_size: 96, // short frame keeps the pacing sleep tiny
            bitrate: 128_000,
        };
        let mut source = AudioSource::tone(440.0, config);

        assert!(matches!(
            match &mut source {
                AudioSource::Tone(t) => t.read(),
                _ => unreachable!(),
            },
            Err(AudioError::NotRunning)
        ));

        source.start().unwrap();
        let frame = source.read().unwrap();
        assert_eq!(frame.len(), config.samples_per_frame());
        assert!(frame.iter().any(|&s| s != 0));
        assert!(source.is_running());
        source.stop();
        assert!(!source.is_running());
    }
}
