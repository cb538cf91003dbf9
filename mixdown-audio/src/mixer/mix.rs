use crate::config::MixingType;
use crate::dsp::apply_volume;
use crate::error::Result;
use crate::sources::AudioSource;

/// The engine's ordered sources together with the discipline that combines them.
pub(crate) struct SourceMix {
    sources: Vec<Box<dyn AudioSource>>,
    mixing_type: MixingType,
    /// Index of the playing source in sequential mixing.
    current: usize,
}

impl SourceMix {
    pub(crate) fn new(sources: Vec<Box<dyn AudioSource>>, mixing_type: MixingType) -> Self {
        Self {
            sources,
            mixing_type,
            current: 0,
        }
    }

    pub(crate) fn start(&mut self, sample_rate: u32, channel_count: u16) -> Result<()> {
        for source in &mut self.sources {
            source.start(sample_rate, channel_count)?;
        }
        self.skip_exhausted();
        Ok(())
    }

    /// Whether another mixed sample can be produced. Looping sources never end,
    /// so parallel mixing only follows the non-looping ones.
    pub(crate) fn has_remaining(&self) -> bool {
        match self.mixing_type {
            MixingType::Parallel => self
                .sources
                .iter()
                .any(|s| !s.is_looping_enabled() && s.has_remaining()),
            MixingType::Sequential => self.current < self.sources.len(),
        }
    }

    /// Fills `out` with mixed samples and returns how many were written. Fewer
    /// than `out.len()` are written only once every source is exhausted.
    pub(crate) fn fill(&mut self, out: &mut [i16]) -> Result<usize> {
        match self.mixing_type {
            MixingType::Parallel => self.fill_parallel(out),
            MixingType::Sequential => self.fill_sequential(out),
        }
    }

    fn fill_parallel(&mut self, out: &mut [i16]) -> Result<usize> {
        let mut written = 0;
        while written < out.len() && self.has_remaining() {
            let mut sum = 0i32;
            let mut contributors = 0i32;
            for source in &mut self.sources {
                if source.has_remaining() {
                    sum += apply_volume(source.next()?, source.volume()) as i32;
                    contributors += 1;
                }
            }
            out[written] = (sum / contributors.max(1)) as i16;
            written += 1;
        }
        Ok(written)
    }

    fn fill_sequential(&mut self, out: &mut [i16]) -> Result<usize> {
        let mut written = 0;
        while written < out.len() {
            let Some(source) = self.sources.get_mut(self.current) else {
                break;
            };
            out[written] = apply_volume(source.next()?, source.volume());
            written += 1;
            if !source.has_remaining() {
                self.current += 1;
                self.skip_exhausted();
            }
        }
        Ok(written)
    }

    fn skip_exhausted(&mut self) {
        if self.mixing_type != MixingType::Sequential {
            return;
        }
        while self
            .sources
            .get(self.current)
            .is_some_and(|s| !s.has_remaining())
        {
            self.current += 1;
        }
    }

    /// Releases every source; a source's release never prevents the others'.
    pub(crate) fn release(&mut self) {
        for source in &mut self.sources {
            source.release();
        }
        self.sources.clear();
    }
}
