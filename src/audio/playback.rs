//! Audio playback
//!
//! The output device callback pulls frames from a bounded FIFO sized for
//! about three seconds of audio. When the queue runs dry the callback
//! waits briefly and then emits silence of the exact frame length; when
//! the queue is full the writer drops the newest frame. That drop is the
//! single point where receive-path backpressure is resolved.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crate::config::StreamConfig;
use crate::constants::{PLAYBACK_QUEUE_FRAMES, UNDERRUN_WAIT};
use crate::error::AudioError;

/// Playback sink on the default output device
pub struct Playback {
    config: StreamConfig,
    frames_tx: Sender<Vec<i16>>,
    frames_rx: Receiver<Vec<i16>>,
    running: Arc<AtomicBool>,
    done_rx: Mutex<Option<Receiver<()>>>,
    underruns: Arc<AtomicU64>,
    dropped: AtomicU64,
}

impl Playback {
    pub fn new(config: StreamConfig) -> Self {
        let (frames_tx, frames_rx) = bounded(PLAYBACK_QUEUE_FRAMES);
        Self {
            config,
            frames_tx,
            frames_rx,
            running: Arc::new(AtomicBool::new(false)),
            done_rx: Mutex::new(None),
            underruns: Arc::new(AtomicU64::new(0)),
            dropped: AtomicU64::new(0),
        }
    }

    pub fn start(&self) -> Result<(), AudioError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let host = cpal::default_host();
        let device = host.default_output_device().ok_or_else(|| {
            self.running.store(false, Ordering::SeqCst);
            AudioError::DeviceNotFound("no default output device".into())
        })?;

        let stream_config = cpal::StreamConfig {
            channels: self.config.channels,
            sample_rate: cpal::SampleRate(self.config.sample_rate),
            buffer_size: cpal::BufferSize::Fixed(self.config.frame_size as u32),
        };

        let running = self.running.clone();
        let running_for_loop = self.running.clone();
        let frames_rx = self.frames_rx.clone();
        let underruns = self.underruns.clone();
        let (done_tx, done_rx) = bounded::<()>(1);
        *self.done_rx.lock().unwrap() = Some(done_rx);

        thread::Builder::new()
            .name("playback".to_string())
            .spawn(move || {
                let stream = device.build_output_stream(
                    &stream_config,
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        if !running.load(Ordering::Relaxed) {
                            data.fill(0.0);
                            return;
                        }

                        match frames_rx.recv_timeout(UNDERRUN_WAIT) {
                            Ok(frame) => {
                                let n = frame.len().min(data.len());
                                for (dst, &src) in data[..n].iter_mut().zip(frame.iter()) {
                                    *dst = src as f32 / i16::MAX as f32;
                                }
                                data[n..].fill(0.0);
                            }
                            Err(_) => {
                                // Genuine underrun: exact-length silence
                                data.fill(0.0);
                                let count = underruns.fetch_add(1, Ordering::Relaxed) + 1;
                                if count % 50 == 0 {
                                    tracing::warn!("playback underrun (total {})", count);
                                }
                            }
                        }
                    },
                    move |err| {
                        tracing::error!("playback stream error: {}", err);
                    },
                    None,
                );

                match stream {
                    Ok(stream) => {
                        if let Err(e) = stream.play() {
                            tracing::error!("failed to start playback stream: {}", e);
                        } else {
                            while running_for_loop.load(Ordering::Relaxed) {
                                thread::sleep(Duration::from_millis(10));
                            }
                        }
                        drop(stream);
                    }
                    Err(e) => {
                        tracing::error!("failed to build playback stream: {}", e);
                    }
                }
                let _ = done_tx.send(());
            })
            .map_err(|e| {
                self.running.store(false, Ordering::SeqCst);
                AudioError::StreamError(e.to_string())
            })?;

        tracing::info!(
            "audio playback started ({} Hz, {} channels)",
            self.config.sample_rate,
            self.config.channels
        );
        Ok(())
    }

    /// Stop playback. Cleanup is bounded by one second so a faulty driver
    /// cannot hang the caller.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(done_rx) = self.done_rx.lock().unwrap().take() {
            let _ = done_rx.recv_timeout(Duration::from_secs(1));
        }
        while self.frames_rx.try_recv().is_ok() {}
    }

    /// Queue a frame for playback, dropping the newest when full
    pub fn write(&self, frame: Vec<i16>) {
        if let Err(TrySendError::Full(_)) = self.frames_tx.try_send(frame) {
            let count = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            if count % 50 == 0 {
                tracing::warn!("playback queue full, dropped {} frames", count);
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn underrun_count(&self) -> u64 {
        self.underruns.load(Ordering::Relaxed)
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Queue depth in frames
    pub fn queued(&self) -> usize {
        self.frames_rx.len()
    }
}

impl Drop for Playback {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // The queue policy is testable without a device: writes beyond the
    // capacity drop the newest frame.
    #[test]
    fn full_queue_drops_newest() {
        let playback = Playback::new(StreamConfig::voice());
        for i in 0..PLAYBACK_QUEUE_FRAMES {
            playback.write(vec![i as i16; 4]);
        }
        assert_eq!(playback.queued(), PLAYBACK_QUEUE_FRAMES);
        assert_eq!(playback.dropped_count(), 0);

        playback.write(vec![9999i16; 4]);
        assert_eq!(playback.dropped_count(), 1);

        // The oldest frame is still at the head
        let head = playback.frames_rx.recv().unwrap();
        assert_eq!(head, vec![0i16; 4]);
    }

    #[test]
    fn stop_without_start_is_noop() {
        let playback = Playback::new(StreamConfig::music());
        playback.stop();
        assert!(!playback.is_running());
    }
}
