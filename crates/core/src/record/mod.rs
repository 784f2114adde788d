use std::path::Path;

use crate::Result;

/// Raw microphone audio captured during one take.
#[derive(Debug, Clone, PartialEq)]
pub struct Recording {
    sample_rate: u32,
    samples: Vec<f32>,
}

impl Recording {
    pub fn new(sample_rate: u32, samples: Vec<f32>) -> Self {
        Self {
            sample_rate,
            samples,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn duration_ms(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 * 1000.0 / f64::from(self.sample_rate)
    }

    /// Writes the take as a mono 32-bit float WAV file.
    pub fn write_wav(&self, path: impl AsRef<Path>) -> Result<()> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: self.sample_rate,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };

        let mut writer = hound::WavWriter::create(path.as_ref(), spec)?;
        for &sample in &self.samples {
            writer.write_sample(sample)?;
        }
        writer.finalize()?;
        Ok(())
    }
}

/// Pass-through sink that concatenates captured chunks into a single
/// [`Recording`] between `start` and `stop`.
#[derive(Debug, Default)]
pub struct TakeRecorder {
    sample_rate: u32,
    samples: Vec<f32>,
    is_recording: bool,
}

impl TakeRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a fresh recording, discarding anything not yet collected.
    pub fn start(&mut self, sample_rate: u32) {
        self.sample_rate = sample_rate;
        self.samples.clear();
        self.is_recording = true;
    }

    pub fn set_sample_rate(&mut self, sample_rate: u32) {
        self.sample_rate = sample_rate;
    }

    pub fn write_sample(&mut self, sample: f32) {
        if self.is_recording {
            self.samples.push(sample);
        }
    }

    pub fn write(&mut self, samples: &[f32]) {
        if self.is_recording {
            self.samples.extend_from_slice(samples);
        }
    }

    /// Finishes the recording. Returns `None` when nothing was recording or no
    /// audio arrived.
    pub fn stop(&mut self) -> Option<Recording> {
        if !std::mem::replace(&mut self.is_recording, false) {
            return None;
        }
        let samples = std::mem::take(&mut self.samples);
        if samples.is_empty() {
            return None;
        }
        Some(Recording::new(self.sample_rate, samples))
    }

    pub fn is_recording(&self) -> bool {
        self.is_recording
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ignores_audio_outside_a_take() {
        let mut recorder = TakeRecorder::new();
        recorder.write(&[1.0; 8]);
        assert!(recorder.stop().is_none());

        recorder.start(8_000);
        recorder.write(&[0.5; 4]);
        recorder.write_sample(0.25);
        let recording = recorder.stop().unwrap();
        assert_eq!(recording.samples(), &[0.5, 0.5, 0.5, 0.5, 0.25]);
        assert!(!recorder.is_recording());
    }

    #[test]
    fn empty_take_yields_nothing() {
        let mut recorder = TakeRecorder::new();
        recorder.start(44_100);
        assert!(recorder.stop().is_none());
    }

    #[test]
    fn writes_readable_wav() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("take.wav");
        let recording = Recording::new(8_000, vec![0.0, 0.5, -0.5, 0.25]);
        assert!((recording.duration_ms() - 0.5).abs() < 1e-9);

        recording.write_wav(&path).unwrap();

        let mut reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.spec().sample_rate, 8_000);
        let samples: Vec<f32> = reader.samples::<f32>().map(|s| s.unwrap()).collect();
        assert_eq!(samples, vec![0.0, 0.5, -0.5, 0.25]);
    }
}
