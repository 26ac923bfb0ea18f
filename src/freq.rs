// UTILGOV FREQUENCY SELECTION
// FreqTable: THE DRIVER'S DISCRETE OPERATING POINTS (kHz, ASCENDING).
// FreqSelector: CONTROL LAW + RAW-FREQUENCY CACHE. SKIPS TABLE RESOLUTION
// WHEN THE RAW CANDIDATE DID NOT MOVE AND A TARGET IS ALREADY COMMITTED.

use crate::tuning;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FreqTable {
    freqs: Vec<u32>,
}

impl FreqTable {
    // NONE FOR AN EMPTY TABLE; CALLERS MAP IT TO THEIR OWN ERROR
    pub fn new(mut freqs: Vec<u32>) -> Option<Self> {
        freqs.retain(|&f| f > 0);
        freqs.sort_unstable();
        freqs.dedup();
        if freqs.is_empty() {
            return None;
        }
        Some(Self { freqs })
    }

    // SYNTHETIC TABLE FOR DRIVERS THAT PUBLISH ONLY A RANGE
    pub fn from_range(min_khz: u32, max_khz: u32, step_khz: u32) -> Option<Self> {
        if min_khz > max_khz || step_khz == 0 {
            return None;
        }
        let mut freqs: Vec<u32> = (min_khz..=max_khz).step_by(step_khz as usize).collect();
        if freqs.last() != Some(&max_khz) {
            freqs.push(max_khz);
        }
        Self::new(freqs)
    }

    pub fn min(&self) -> u32 {
        self.freqs.first().copied().unwrap_or(0)
    }

    pub fn max(&self) -> u32 {
        self.freqs.last().copied().unwrap_or(0)
    }

    pub fn as_slice(&self) -> &[u32] {
        &self.freqs
    }

    // LOWEST SUPPORTED FREQUENCY >= target, CLAMPED INTO [min_khz, max_khz].
    // THE HIGHEST ENTRY WITHIN LIMITS WHEN target EXCEEDS THEM ALL.
    pub fn resolve(&self, target: u32, min_khz: u32, max_khz: u32) -> u32 {
        let target = target.clamp(min_khz, max_khz.max(min_khz));
        let in_range = self.freqs.iter().copied().filter(|&f| f >= min_khz && f <= max_khz);
        let mut best_below = None;
        for f in in_range {
            if f >= target {
                return f;
            }
            best_below = Some(f);
        }
        best_below.unwrap_or(target)
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct FreqSelector {
    cached_raw: u32,
}

impl FreqSelector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cached_raw(&self) -> u32 {
        self.cached_raw
    }

    // FORCE THE NEXT select() TO RESOLVE AGAINST THE TABLE
    pub fn invalidate(&mut self) {
        self.cached_raw = 0;
    }

    // reference_khz: POLICY MAX IF UTILIZATION IS FREQUENCY-INVARIANT,
    // OTHERWISE THE CURRENT FREQUENCY.
    pub fn select(
        &mut self,
        util: u64,
        capacity: u64,
        reference_khz: u32,
        committed: Option<u32>,
        resolve: impl FnOnce(u32) -> u32,
    ) -> u32 {
        let raw = tuning::raw_target(reference_khz, util, capacity);
        if let Some(next) = committed {
            if raw == self.cached_raw {
                return next;
            }
        }
        self.cached_raw = raw;
        resolve(raw)
    }
}
