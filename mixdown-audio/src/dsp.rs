const MICROS_PER_SECOND: u64 = 1_000_000;

/// Number of interleaved samples covering `duration_us` at the given format.
pub fn us_to_samples(duration_us: u64, sample_rate: u32, channels: u16) -> u64 {
    (duration_us as u128 * sample_rate as u128 * channels as u128 / MICROS_PER_SECOND as u128)
        as u64
}

/// Duration in microseconds of `samples` interleaved samples at the given format.
pub fn samples_to_us(samples: u64, sample_rate: u32, channels: u16) -> u64 {
    let per_second = sample_rate as u128 * channels as u128;
    if per_second == 0 {
        return 0;
    }
    (samples as u128 * MICROS_PER_SECOND as u128 / per_second) as u64
}

/// Appends `interleaved` (with `from` channels) to `out` re-laid out with `to` channels.
///
/// Mono input is duplicated into every output channel, any input collapses to
/// mono by averaging each frame. Other layouts keep the leading channels and
/// wrap around when widening.
pub fn convert_channels(interleaved: &[i16], from: usize, to: usize, out: &mut Vec<i16>) {
    debug_assert!(from > 0 && to > 0);
    debug_assert_eq!(interleaved.len() % from, 0);

    if from == to {
        out.extend_from_slice(interleaved);
        return;
    }

    let frames = interleaved.len() / from;
    out.reserve(frames * to);

    if to == 1 {
        downmix_interleaved_to_mono(interleaved, from, out);
    } else if from == 1 {
        upmix_mono_to_interleaved(interleaved, to, out);
    } else {
        for frame in interleaved.chunks_exact(from) {
            for ch in 0..to {
                out.push(frame[ch % from]);
            }
        }
    }
}

pub fn downmix_interleaved_to_mono(interleaved: &[i16], channels: usize, mono: &mut Vec<i16>) {
    for frame in interleaved.chunks_exact(channels) {
        mono.push(downmix_frame_to_mono(frame));
    }
}

pub fn upmix_mono_to_interleaved(mono: &[i16], channels: usize, interleaved: &mut Vec<i16>) {
    for &sample in mono {
        for _ in 0..channels {
            interleaved.push(sample);
        }
    }
}

#[inline]
fn downmix_frame_to_mono(frame: &[i16]) -> i16 {
    match frame.len() {
        0 => 0,
        1 => frame[0],
        2 => ((frame[0] as i32 + frame[1] as i32) / 2) as i16,
        n => (frame.iter().map(|&s| s as i32).sum::<i32>() / n as i32) as i16,
    }
}

/// Scales a sample by `volume`, truncating toward zero and saturating at the
/// 16-bit range instead of wrapping.
#[inline]
pub fn apply_volume(sample: i16, volume: f32) -> i16 {
    if volume == 1.0 {
        sample
    } else {
        (sample as f32 * volume) as i16
    }
}

#[derive(Debug, Clone)]
pub struct LinearResampler {
    from_hz: u64,
    to_hz: u64,
    /// output frames produced in the current stream
    emitted: u64,
    /// stream index of the first frame still available (the carried one)
    base: u64,
    /// final frame of the previous call, the left neighbour of the next input
    carry: Vec<i16>,
    channels: usize,
}

impl LinearResampler {
    pub fn new(from_hz: u32, to_hz: u32, channels: u16) -> Self {
        let channels = channels.max(1) as usize;
        Self {
            from_hz: from_hz.max(1) as u64,
            to_hz: to_hz.max(1) as u64,
            emitted: 0,
            base: 0,
            carry: Vec::with_capacity(channels),
            channels,
        }
    }

    /// Input position of the next output frame as whole frames plus a fraction.
    fn next_position(&self) -> (u64, f64) {
        // output frame k sits at input frame k * from / to
        let num = self.emitted * self.from_hz;
        (
            num / self.to_hz,
            (num % self.to_hz) as f64 / self.to_hz as f64,
        )
    }

    /// Resamples interleaved `input` and appends to `out`. Returns the number of
    /// samples appended. Output positions that need a frame from the next call
    /// are held back; [`flush`](Self::flush) emits them at the end of the stream.
    pub fn process(&mut self, input: &[i16], out: &mut Vec<i16>) -> usize {
        let frames = input.len() / self.channels;
        if frames == 0 {
            return 0;
        }

        let channels = self.channels;
        let carried = usize::from(!self.carry.is_empty());
        let end = self.base + (carried + frames) as u64;
        let start = out.len();

        loop {
            let (i, frac) = self.next_position();
            if i + 1 >= end {
                break;
            }
            let local = (i - self.base) as usize;
            for ch in 0..channels {
                let frame_sample = |frame: usize| -> f64 {
                    if frame < carried {
                        self.carry[ch] as f64
                    } else {
                        input[(frame - carried) * channels + ch] as f64
                    }
                };
                let a = frame_sample(local);
                let b = frame_sample(local + 1);
                out.push((a + (b - a) * frac).round() as i16);
            }
            self.emitted += 1;
        }

        self.base = end - 1;
        let tail = (frames - 1) * channels;
        self.carry.clear();
        self.carry.extend_from_slice(&input[tail..tail + channels]);

        out.len() - start
    }

    /// Emits the positions between the final input frame and the end of the
    /// stream, holding that frame, then resets for a new stream.
    pub fn flush(&mut self, out: &mut Vec<i16>) -> usize {
        let start = out.len();
        if !self.carry.is_empty() {
            while self.next_position().0 <= self.base {
                out.extend_from_slice(&self.carry);
                self.emitted += 1;
            }
        }
        self.reset();
        out.len() - start
    }

    pub fn reset(&mut self) {
        self.emitted = 0;
        self.base = 0;
        self.carry.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use test_log::test;

    #[test]
    fn sample_time_conversions() {
        assert_eq!(us_to_samples(5_000_000, 44_100, 2), 441_000);
        assert_eq!(us_to_samples(0, 44_100, 2), 0);
        assert_eq!(samples_to_us(441_000, 44_100, 2), 5_000_000);
        assert_eq!(samples_to_us(1024 * 2, 48_000, 2), 21_333);
        assert_eq!(samples_to_us(10, 0, 2), 0);
    }

    #[test]
    fn mono_to_stereo_duplicates() {
        let mut out = Vec::new();
        convert_channels(&[1, -2, 3], 1, 2, &mut out);
        assert_eq!(out, vec![1, 1, -2, -2, 3, 3]);
    }

    #[test]
    fn stereo_to_mono_averages_pairs() {
        let mut out = Vec::new();
        convert_channels(&[100, 200, -100, 100, i16::MAX, i16::MAX], 2, 1, &mut out);
        assert_eq!(out, vec![150, 0, i16::MAX]);
    }

    #[test]
    fn same_layout_is_copied() {
        let mut out = vec![7];
        convert_channels(&[1, 2, 3, 4], 2, 2, &mut out);
        assert_eq!(out, vec![7, 1, 2, 3, 4]);
    }

    #[test]
    fn volume_saturates_instead_of_wrapping() {
        assert_eq!(apply_volume(1000, 1.0), 1000);
        assert_eq!(apply_volume(1000, 0.5), 500);
        assert_eq!(apply_volume(-1001, 0.5), -500);
        assert_eq!(apply_volume(30_000, 2.0), i16::MAX);
        assert_eq!(apply_volume(-30_000, 2.0), i16::MIN);
    }

    #[test]
    fn linear_resampler_output_is_proportional() {
        let mut resampler = LinearResampler::new(48_000, 24_000, 2);
        let input: Vec<i16> = (0..960).map(|i| (i % 100) as i16).collect();
        let mut out = Vec::new();

        let mut produced = 0;
        for chunk in input.chunks(96) {
            produced += resampler.process(chunk, &mut out);
        }

        assert_eq!(produced, out.len());
        assert_eq!(out.len(), 480);
    }

    #[test]
    fn linear_resampler_upsamples_across_calls() {
        let mut resampler = LinearResampler::new(22_050, 44_100, 1);
        let mut out = Vec::new();
        resampler.process(&[0, 100], &mut out);
        resampler.process(&[200, 300], &mut out);
        assert_eq!(out, vec![0, 50, 100, 150, 200, 250]);

        resampler.flush(&mut out);
        assert_eq!(out, vec![0, 50, 100, 150, 200, 250, 300, 300]);
    }

    #[test]
    fn linear_resampler_starts_on_the_first_frame() {
        let mut resampler = LinearResampler::new(8_000, 16_000, 1);
        let mut out = Vec::new();
        resampler.process(&[500; 10], &mut out);
        resampler.flush(&mut out);
        assert_eq!(out, vec![500; 20]);
    }

    #[test]
    fn linear_resampler_flush_completes_the_rate_ratio() {
        let mut resampler = LinearResampler::new(48_000, 44_100, 1);
        let mut out = Vec::new();
        for chunk in [0i16; 24_000].chunks(1000) {
            resampler.process(chunk, &mut out);
        }
        resampler.flush(&mut out);
        assert_eq!(out.len(), 22_050);
    }

    #[test]
    fn linear_resampler_is_deterministic() {
        let input: Vec<i16> = (0..441).map(|i| ((i * 37) % 2000) as i16 - 1000).collect();
        let run = || {
            let mut resampler = LinearResampler::new(44_100, 48_000, 1);
            let mut out = Vec::new();
            resampler.process(&input, &mut out);
            out
        };
        assert_eq!(run(), run());
    }
}
