//! Linear-interpolation resampler
//!
//! Quality is modest but the implementation is dependency-free and cheap
//! enough for the per-frame path. Operates on interleaved i16 samples.

/// Channel-aware linear resampler
pub struct LinearResampler {
    from_rate: u32,
    to_rate: u32,
    channels: usize,
}

impl LinearResampler {
    pub fn new(from_rate: u32, to_rate: u32, channels: usize) -> Self {
        Self {
            from_rate,
            to_rate,
            channels,
        }
    }

    pub fn resample(&self, input: &[i16]) -> Vec<i16> {
        if self.from_rate == self.to_rate {
            return input.to_vec();
        }

        let ratio = self.to_rate as f64 / self.from_rate as f64;
        let input_frames = input.len() / self.channels;
        let output_frames = (input_frames as f64 * ratio) as usize;
        let mut output = vec![0i16; output_frames * self.channels];

        for i in 0..output_frames {
            let src_pos = i as f64 / ratio;
            let src_index = src_pos as usize;
            let frac = src_pos - src_index as f64;

            for ch in 0..self.channels {
                let idx = src_index * self.channels + ch;
                output[i * self.channels + ch] = if idx + self.channels < input.len() {
                    let a = input[idx] as f64;
                    let b = input[idx + self.channels] as f64;
                    (a + (b - a) * frac) as i16
                } else if idx < input.len() {
                    input[idx]
                } else {
                    0
                };
            }
        }

        output
    }
}

/// Average a stereo frame down to mono
pub fn downmix_to_mono(input: &[i16]) -> Vec<i16> {
    input
        .chunks_exact(2)
        .map(|pair| ((pair[0] as i32 + pair[1] as i32) / 2) as i16)
        .collect()
}

/// Duplicate a mono frame into both stereo channels
pub fn upmix_to_stereo(input: &[i16]) -> Vec<i16> {
    let mut out = Vec::with_capacity(input.len() * 2);
    for &s in input {
        out.push(s);
        out.push(s);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_rate_passthrough() {
        let resampler = LinearResampler::new(48000, 48000, 2);
        let input = vec![1i16, 2, 3, 4];
        assert_eq!(resampler.resample(&input), input);
    }

    #[test]
    fn upsample_lengthens() {
        let resampler = LinearResampler::new(44100, 48000, 1);
        let input = vec![0i16; 441];
        let out = resampler.resample(&input);
        assert_eq!(out.len(), 480);
    }

    #[test]
    fn downsample_shortens_stereo() {
        let resampler = LinearResampler::new(48000, 24000, 2);
        let input = vec![100i16; 960];
        let out = resampler.resample(&input);
        assert_eq!(out.len(), 480);
        // Interior samples interpolate between equal values
        assert!(out[2..out.len() - 2].iter().all(|&s| s == 100));
    }

    #[test]
    fn channel_mixing() {
        assert_eq!(downmix_to_mono(&[100, 200, -50, 50]), vec![150, 0]);
        assert_eq!(upmix_to_stereo(&[7, 9]), vec![7, 7, 9, 9]);
    }
}
