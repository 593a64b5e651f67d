//! Microphone capture
//!
//! Wraps the default platform input device. The device callback chops the
//! incoming sample stream into full frames and feeds a bounded channel;
//! `read` blocks cooperatively until a frame arrives.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::{bounded, Receiver, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::config::StreamConfig;
use crate::constants::READ_DEADLINE;
use crate::error::AudioError;

const FRAME_CHANNEL_CAPACITY: usize = 16;

/// Audio capture from the default input device
pub struct MicrophoneSource {
    config: StreamConfig,
    running: Arc<AtomicBool>,
    frames_rx: Receiver<Vec<i16>>,
    frames_tx: Sender<Vec<i16>>,
    thread: Option<JoinHandle<()>>,
}

impl MicrophoneSource {
    pub fn new(config: StreamConfig) -> Self {
        let (frames_tx, frames_rx) = bounded(FRAME_CHANNEL_CAPACITY);
        Self {
            config,
            running: Arc::new(AtomicBool::new(false)),
            frames_rx,
            frames_tx,
            thread: None,
        }
    }

    pub fn start(&mut self) -> Result<(), AudioError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| AudioError::DeviceNotFound("no default input device".into()))?;

        let stream_config = cpal::StreamConfig {
            channels: self.config.channels,
            sample_rate: cpal::SampleRate(self.config.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let running = self.running.clone();
        let running_for_loop = self.running.clone();
        let frames_tx = self.frames_tx.clone();
        let samples_per_frame = self.config.samples_per_frame();

        let handle = thread::Builder::new()
            .name("mic-capture".to_string())
            .spawn(move || {
                let mut pending: Vec<i16> = Vec::with_capacity(samples_per_frame * 2);

                let stream = device.build_input_stream(
                    &stream_config,
                    move |data: &[f32], _: &cpal::InputCallbackInfo| {
                        if !running.load(Ordering::Relaxed) {
                            return;
                        }

                        pending.extend(
                            data.iter()
                                .map(|&s| (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16),
                        );

                        while pending.len() >= samples_per_frame {
                            let frame: Vec<i16> = pending.drain(..samples_per_frame).collect();
                            // Drop the frame when the consumer lags
                            let _ = frames_tx.try_send(frame);
                        }
                    },
                    move |err| {
                        tracing::error!("capture stream error: {}", err);
                    },
                    None,
                );

                match stream {
                    Ok(stream) => {
                        if let Err(e) = stream.play() {
                            tracing::error!("failed to start capture stream: {}", e);
                            return;
                        }
                        while running_for_loop.load(Ordering::Relaxed) {
                            thread::sleep(std::time::Duration::from_millis(10));
                        }
                        // Stream drops here, stopping capture
                    }
                    Err(e) => {
                        tracing::error!("failed to build capture stream: {}", e);
                    }
                }
            })
            .map_err(|e| AudioError::StreamError(e.to_string()))?;

        self.thread = Some(handle);
        Ok(())
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
        // Drain frames buffered before the stop
        while self.frames_rx.try_recv().is_ok() {}
    }

    /// Blocking pull of the next captured frame
    pub fn read(&mut self) -> Result<Vec<i16>, AudioError> {
        loop {
            if !self.running.load(Ordering::SeqCst) {
                return Err(AudioError::NotRunning);
            }
            match self.frames_rx.recv_timeout(READ_DEADLINE) {
                Ok(frame) => return Ok(frame),
                Err(crossbeam_channel::RecvTimeoutError::Timeout) => continue,
                Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
                    return Err(AudioError::NotRunning)
                }
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }
}

impl Drop for MicrophoneSource {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Creation never touches the device; start() may fail on hosts
    // without capture hardware and that is fine here.
    #[test]
    fn creation_is_idle() {
        let source = MicrophoneSource::new(StreamConfig::voice());
        assert!(!source.is_running());
        assert_eq!(source.config().channels, 1);
    }
}
