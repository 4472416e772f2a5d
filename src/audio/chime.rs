use rodio::Source;
use std::f32::consts::PI;
use std::time::Duration;

const SAMPLE_RATE: u32 = 44100;

/// Short two-note bell: a sine at `frequency` for the first half and a fifth
/// above it for the second, each with an exponential decay.
pub struct Chime {
    frequency: f32,
    volume: f32,
    num_sample: usize,
    total_samples: usize,
}

impl Chime {
    pub fn new(frequency: f32, volume: f32, length: Duration) -> Self {
        Self {
            frequency,
            volume: volume.clamp(0.0, 1.0),
            num_sample: 0,
            total_samples: (length.as_secs_f32() * SAMPLE_RATE as f32) as usize,
        }
    }

    pub fn work_done(volume: f32) -> Self {
        Self::new(660.0, volume, Duration::from_millis(900))
    }

    pub fn break_done(volume: f32) -> Self {
        Self::new(523.25, volume, Duration::from_millis(900))
    }
}

impl Iterator for Chime {
    type Item = f32;

    fn next(&mut self) -> Option<Self::Item> {
        if self.num_sample >= self.total_samples {
            return None;
        }

        let half = (self.total_samples / 2).max(1);
        let (freq, offset) = if self.num_sample < half {
            (self.frequency, self.num_sample)
        } else {
            (self.frequency * 1.5, self.num_sample - half)
        };
        self.num_sample += 1;

        let t = offset as f32 / SAMPLE_RATE as f32;
        let envelope = (-6.0 * t).exp();
        Some((2.0 * PI * freq * t).sin() * envelope * self.volume * 0.4)
    }
}

impl Source for Chime {
    fn current_frame_len(&self) -> Option<usize> {
        Some(self.total_samples.saturating_sub(self.num_sample))
    }

    fn channels(&self) -> u16 {
        1
    }

    fn sample_rate(&self) -> u32 {
        SAMPLE_RATE
    }

    fn total_duration(&self) -> Option<Duration> {
        Some(Duration::from_secs_f32(
            self.total_samples as f32 / SAMPLE_RATE as f32,
        ))
    }
}
