//! Energy-based voice-activity detection
//!
//! Labels each ingress bucket by comparing its RMS amplitude against a
//! threshold expressed as a fraction of full scale.

use chorus_core::AudioFrame;

/// Energy-threshold voice-activity detector
#[derive(Debug, Clone, Copy)]
pub struct EnergyVad {
    /// RMS threshold as a fraction of full scale
    threshold: f32,
}

impl EnergyVad {
    pub fn new(threshold: f32) -> Self {
        Self {
            threshold: threshold.clamp(0.0, 1.0),
        }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Whether the frame carries voice-level energy
    pub fn is_voice(&self, frame: &AudioFrame) -> bool {
        frame.rms() >= self.threshold
    }
}

impl Default for EnergyVad {
    fn default() -> Self {
        Self::new(0.5)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chorus_core::{Channels, SampleRate};

    fn frame(level: f32) -> AudioFrame {
        AudioFrame::new(vec![level; 160], SampleRate::Hz16000, Channels::Mono, 0)
    }

    #[test]
    fn test_silence_below_threshold() {
        let vad = EnergyVad::new(0.5);
        assert!(!vad.is_voice(&frame(0.0)));
        assert!(!vad.is_voice(&frame(0.2)));
    }

    #[test]
    fn test_voice_at_threshold() {
        let vad = EnergyVad::new(0.5);
        // Constant-level signal has RMS equal to its level
        assert!(vad.is_voice(&frame(0.5)));
        assert!(vad.is_voice(&frame(0.9)));
    }

    #[test]
    fn test_threshold_clamped() {
        let vad = EnergyVad::new(7.0);
        assert_eq!(vad.threshold(), 1.0);
    }
}
