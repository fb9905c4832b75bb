//! Growth-rate sampling.

use tracing::info;

use crate::engine::LSystem;

/// Histogram of per-mille growth ratios between consecutive generations.
///
/// `rates[r]` counts the generations whose length was `r / 1000` times the
/// length of the one before.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GrowthProfile {
    pub rates: Vec<u32>,
    pub lengths: Vec<usize>,
}

impl GrowthProfile {
    fn record(&mut self, previous: usize, length: usize) {
        let ratio = (length as f64 / previous as f64 * 1000.0).round() as usize;
        if ratio >= self.rates.len() {
            self.rates.resize((ratio + 1).max(self.rates.len() * 2), 0);
        }
        self.rates[ratio] += 1;
    }

    /// Number of recorded ratios.
    pub fn samples(&self) -> u32 {
        self.rates.iter().sum()
    }

    /// Mean length ratio. `0.0` when nothing was recorded.
    pub fn mean_growth(&self) -> f64 {
        let total = self.samples();
        if total == 0 {
            return 0.0;
        }
        let weighted: f64 = self
            .rates
            .iter()
            .enumerate()
            .map(|(per_mille, &n)| per_mille as f64 * n as f64)
            .sum();
        weighted / total as f64 / 1000.0
    }
}

/// Resets `engine` and runs `generations` sequential generations, recording
/// the growth ratio of each over its predecessor. Generations that follow an
/// empty one are skipped.
pub fn growth_profile(engine: &mut LSystem, generations: usize) -> GrowthProfile {
    let mut profile = GrowthProfile { rates: vec![0; 1024], lengths: Vec::with_capacity(generations + 1) };
    engine.reset();
    let mut previous = engine.pool().len();
    profile.lengths.push(previous);
    for _ in 0..generations {
        let length = engine.iterate_once().len();
        if previous > 0 {
            profile.record(previous, length);
        }
        profile.lengths.push(length);
        previous = length;
    }
    info!(
        axiom = %engine.axiom(),
        generations,
        mean_growth = profile.mean_growth(),
        "growth profile"
    );
    profile
}
