//! Audio frame wire decoding and energy-based voice activity detection.

use crate::error::FrameError;

/// Minimum frame length: 4-byte timestamp + 4-byte flags + at least one
/// 16-bit PCM sample.
const HEADER_LEN: usize = 8;
const MIN_FRAME_LEN: usize = 10;

/// A decoded inbound audio frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    pub timestamp: u32,
    pub flags: u32,
    pub pcm: Vec<i16>,
}

/// Decode a raw binary frame per the wire format: 4-byte LE timestamp,
/// 4-byte LE flags, then mono 16 kHz 16-bit signed LE PCM.
pub fn parse_frame(bytes: &[u8]) -> Result<AudioFrame, FrameError> {
    if bytes.len() < MIN_FRAME_LEN {
        return Err(FrameError::TooShort { len: bytes.len() });
    }

    let timestamp = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    let flags = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
    let pcm_bytes = &bytes[HEADER_LEN..];

    if pcm_bytes.len() % 2 != 0 {
        return Err(FrameError::TruncatedPcm {
            len: pcm_bytes.len(),
        });
    }

    let pcm = pcm_bytes
        .chunks_exact(2)
        .map(|c| i16::from_le_bytes([c[0], c[1]]))
        .collect();

    Ok(AudioFrame {
        timestamp,
        flags,
        pcm,
    })
}

/// Number of leading PCM samples inspected per frame.
const ENERGY_WINDOW: usize = 50;
/// Frames over which the continuous-voice counter accumulates before reset.
const RESET_INTERVAL: u32 = 20;
/// Fraction of the reset window that must be voiced for continuous voice.
const CONTINUOUS_VOICE_RATIO: f32 = 0.3;

/// Cheap, dependency-free energy-threshold voice activity detector with a
/// rolling continuous-voice counter, used to drive barge-in detection.
#[derive(Debug, Clone)]
pub struct EnergyVad {
    threshold: f32,
    frame_count: u32,
    voice_frames: u32,
}

impl EnergyVad {
    #[must_use]
    pub fn new(threshold: f32) -> Self {
        Self {
            threshold,
            frame_count: 0,
            voice_frames: 0,
        }
    }

    /// Process one PCM chunk, returning whether it was voiced. Updates the
    /// rolling continuous-voice counter, resetting every [`RESET_INTERVAL`]
    /// frames regardless of outcome.
    pub fn process_frame(&mut self, pcm: &[i16]) -> bool {
        let voiced = Self::is_voiced(pcm, self.threshold);

        self.frame_count += 1;
        if voiced {
            self.voice_frames += 1;
        }
        if self.frame_count >= RESET_INTERVAL {
            self.frame_count = 0;
            self.voice_frames = 0;
        }

        voiced
    }

    /// Whether the voiced-frame ratio over the current window exceeds
    /// [`CONTINUOUS_VOICE_RATIO`] (≥7 voiced frames per 20-frame window).
    #[must_use]
    pub fn has_continuous_voice(&self) -> bool {
        f64::from(self.voice_frames) > f64::from(RESET_INTERVAL) * f64::from(CONTINUOUS_VOICE_RATIO)
    }

    /// Reset the rolling counters, e.g. after a barge-in has been handled.
    pub fn reset(&mut self) {
        self.frame_count = 0;
        self.voice_frames = 0;
    }

    fn is_voiced(pcm: &[i16], threshold: f32) -> bool {
        if pcm.is_empty() {
            return false;
        }
        let window = &pcm[..pcm.len().min(ENERGY_WINDOW)];
        let sum: f64 = window.iter().map(|s| f64::from(s.unsigned_abs())).sum();
        let mean = sum / window.len() as f64;
        let normalized = mean / f64::from(i16::MAX as u16 + 1);
        normalized > f64::from(threshold)
    }
}

impl Default for EnergyVad {
    fn default() -> Self {
        Self::new(0.05)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_short_frames() {
        let bytes = [0u8; 9];
        assert_eq!(
            parse_frame(&bytes),
            Err(FrameError::TooShort { len: 9 })
        );
    }

    #[test]
    fn decodes_header_and_pcm() {
        let mut bytes = vec![1, 0, 0, 0, 0, 0, 0, 0];
        bytes.extend_from_slice(&[0i16; 160].iter().flat_map(|s| s.to_le_bytes()).collect::<Vec<u8>>());
        let frame = parse_frame(&bytes).unwrap();
        assert_eq!(frame.timestamp, 1);
        assert_eq!(frame.flags, 0);
        assert_eq!(frame.pcm.len(), 160);
    }

    #[test]
    fn rejects_truncated_pcm() {
        let mut bytes = vec![0u8; 8];
        bytes.push(1);
        assert!(matches!(
            parse_frame(&bytes),
            Err(FrameError::TruncatedPcm { .. })
        ));
    }

    #[test]
    fn silent_buffer_is_not_voiced() {
        let mut vad = EnergyVad::default();
        assert!(!vad.process_frame(&[0i16; 160]));
    }

    #[test]
    fn saturated_buffer_is_voiced() {
        let mut vad = EnergyVad::default();
        assert!(vad.process_frame(&[i16::MAX; 160]));
    }

    #[test]
    fn continuous_voice_requires_majority_of_window() {
        let mut vad = EnergyVad::default();
        for _ in 0..6 {
            vad.process_frame(&[i16::MAX; 160]);
        }
        assert!(!vad.has_continuous_voice());
        vad.process_frame(&[i16::MAX; 160]);
        assert!(vad.has_continuous_voice());
    }

    #[test]
    fn counters_reset_after_window() {
        let mut vad = EnergyVad::default();
        for _ in 0..20 {
            vad.process_frame(&[i16::MAX; 160]);
        }
        assert_eq!(vad.frame_count, 0);
        assert_eq!(vad.voice_frames, 0);
    }
}
