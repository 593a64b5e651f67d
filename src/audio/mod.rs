//! Audio subsystem
//!
//! Pull-based PCM sources (microphone, file, tone generator) and the
//! playback sink. Frames are interleaved i16 samples of length
//! `frame_size * channels`.

pub mod capture;
pub mod file;
pub mod playback;
pub mod resample;
pub mod source;

pub use capture::MicrophoneSource;
pub use file::FileSource;
pub use playback::Playback;
pub use resample::LinearResampler;
pub use source::{AudioSource, ToneSource};
