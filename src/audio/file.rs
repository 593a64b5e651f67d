//! File audio source
//!
//! Decodes an encoded audio file (MP3 and anything else symphonia can
//! probe) into PCM at the configured rate and channel count. Some
//! decoders emit zeros past the end of stream instead of signalling EOF;
//! a run of consecutive all-zero frames therefore also terminates the
//! stream.

use std::fs::File;
use std::path::Path;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{Decoder, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::{debug, warn};

use crate::config::StreamConfig;
use crate::constants::SILENCE_EOF_FRAMES;
use crate::error::AudioError;

use super::resample::{downmix_to_mono, upmix_to_stereo, LinearResampler};

/// Detects a decoder that has gone silent past EOF
pub(crate) struct SilenceGate {
    consecutive: usize,
    limit: usize,
}

impl SilenceGate {
    pub fn new(limit: usize) -> Self {
        Self {
            consecutive: 0,
            limit,
        }
    }

    /// Feed one frame; returns true once the silent-run limit is reached
    pub fn observe(&mut self, frame: &[i16]) -> bool {
        if frame.iter().all(|&s| s == 0) {
            self.consecutive += 1;
            self.consecutive >= self.limit
        } else {
            self.consecutive = 0;
            false
        }
    }
}

/// PCM source decoding an audio file
pub struct FileSource {
    config: StreamConfig,
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    src_channels: usize,
    resampler: Option<LinearResampler>,
    sample_buf: Option<SampleBuffer<i16>>,
    /// Interleaved source-channel samples at the target rate
    buffer: Vec<i16>,
    silence: SilenceGate,
    running: bool,
    eof: bool,
}

impl FileSource {
    pub fn open<P: AsRef<Path>>(path: P, config: StreamConfig) -> Result<Self, AudioError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| AudioError::FileError(e.to_string()))?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = path.extension() {
            hint.with_extension(&ext.to_string_lossy());
        }

        let probed = symphonia::default::get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|e| AudioError::UnsupportedFormat(e.to_string()))?;
        let format = probed.format;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| AudioError::UnsupportedFormat("no audio track".into()))?;
        let track_id = track.id;

        let src_rate = track
            .codec_params
            .sample_rate
            .ok_or_else(|| AudioError::UnsupportedFormat("missing sample rate".into()))?;
        let src_channels = track
            .codec_params
            .channels
            .map(|c| c.count())
            .ok_or_else(|| AudioError::UnsupportedFormat("missing channel count".into()))?;
        if !(1..=2).contains(&src_channels) {
            return Err(AudioError::UnsupportedFormat(format!(
                "{} channels",
                src_channels
            )));
        }

        let decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .map_err(|e| AudioError::UnsupportedFormat(e.to_string()))?;

        let resampler = (src_rate != config.sample_rate)
            .then(|| LinearResampler::new(src_rate, config.sample_rate, src_channels));

        debug!(
            path = %path.display(),
            src_rate,
            src_channels,
            "opened file source"
        );

        Ok(Self {
            config,
            format,
            decoder,
            track_id,
            src_channels,
            resampler,
            sample_buf: None,
            buffer: Vec::new(),
            silence: SilenceGate::new(SILENCE_EOF_FRAMES),
            running: false,
            eof: false,
        })
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

        let needed = self.config.frame_size * self.src_channels;

        while self.buffer.len() < needed && !self.eof {
            self.decode_next_packet();
        }

        if self.buffer.len() < needed {
            if self.buffer.is_empty() {
                self.running = false;
                return Err(AudioError::EndOfStream);
            }
            // Pad the final partial frame with silence
            self.buffer.resize(needed, 0);
        }

        let frame: Vec<i16> = self.buffer.drain(..needed).collect();

        if self.silence.observe(&frame) {
            warn!(
                "detected {} consecutive silent frames, ending stream",
                SILENCE_EOF_FRAMES
            );
            self.running = false;
            return Err(AudioError::EndOfStream);
        }

        Ok(self.convert_channels(frame))
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    fn decode_next_packet(&mut self) {
        let packet = match self.format.next_packet() {
            Ok(p) => p,
            Err(SymphoniaError::IoError(ref e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                self.eof = true;
                return;
            }
            Err(SymphoniaError::ResetRequired) => {
                self.eof = true;
                return;
            }
            Err(e) => {
                warn!("file read error: {}", e);
                self.eof = true;
                return;
            }
        };

        if packet.track_id() != self.track_id {
            return;
        }

        match self.decoder.decode(&packet) {
            Ok(decoded) => {
                let sample_buf = self.sample_buf.get_or_insert_with(|| {
                    SampleBuffer::<i16>::new(decoded.capacity() as u64, *decoded.spec())
                });
                sample_buf.copy_interleaved_ref(decoded);
                let samples = sample_buf.samples();

                match &self.resampler {
                    Some(r) => self.buffer.extend(r.resample(samples)),
                    None => self.buffer.extend_from_slice(samples),
                }
            }
            Err(SymphoniaError::DecodeError(e)) => {
                // Corrupt frame, keep going
                debug!("skipping undecodable packet: {}", e);
            }
            Err(e) => {
                warn!("decode error: {}", e);
                self.eof = true;
            }
        }
    }

    fn convert_channels(&self, frame: Vec<i16>) -> Vec<i16> {
        match (self.src_channels, self.config.channels) {
            (2, 1) => downmix_to_mono(&frame),
            (1, 2) => upmix_to_stereo(&frame),
            _ => frame,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn silence_gate_trips_on_run() {
        let mut gate = SilenceGate::new(3);
        let silent = vec![0i16; 8];
        let loud = vec![1i16; 8];

        assert!(!gate.observe(&silent));
        assert!(!gate.observe(&silent));
        // Real audio resets the counter
        assert!(!gate.observe(&loud));
        assert!(!gate.observe(&silent));
        assert!(!gate.observe(&silent));
        assert!(gate.observe(&silent));
    }

    #[test]
    fn missing_file_is_an_error() {
        let result = FileSource::open("/does/not/exist.mp3", StreamConfig::music());
        assert!(matches!(result, Err(AudioError::FileError(_))));
    }
}
