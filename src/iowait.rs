// UTILGOV IOWAIT BOOST
// A CORE COMING BACK FROM I/O WAIT GETS A TRANSIENT DEMAND FLOOR THAT HALVES
// ON EVERY USE. A CORE SILENT FOR MORE THAN A TICK LOSES IT OUTRIGHT.

use crate::sample::UpdateFlags;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct IowaitBoost {
    value: u64,
    max: u64,
}

impl IowaitBoost {
    pub fn new(max: u64) -> Self {
        Self { value: 0, max }
    }

    pub fn value(&self) -> u64 {
        self.value
    }

    pub fn max(&self) -> u64 {
        self.max
    }

    pub fn clear(&mut self) {
        self.value = 0;
    }

    // CALLED ON EVERY SAMPLE, BEFORE last_update ADVANCES.
    // since_last_ns IS THE GAP TO THE PREVIOUS SAMPLE OF THIS CORE.
    pub fn update(&mut self, flags: UpdateFlags, since_last_ns: u64, tick_ns: u64, suppress: bool) {
        if suppress {
            self.value = 0;
            return;
        }
        if flags.contains(UpdateFlags::IOWAIT) {
            self.value = self.max;
        } else if self.value > 0 && since_last_ns > tick_ns {
            self.value = 0;
        }
    }

    // SUBSTITUTE (boost, boost_max) FOR (util, cap) WHEN THE BOOST ASKS FOR
    // MORE. CROSS-MULTIPLIED: util/cap < boost/boost_max.
    // DECAYS BY HALF ON EVERY CALL WHILE NONZERO, SUBSTITUTED OR NOT.
    pub fn apply(&mut self, util: &mut u64, cap: &mut u64) {
        if self.value == 0 {
            return;
        }
        if util.saturating_mul(self.max) < cap.saturating_mul(self.value) {
            *util = self.value;
            *cap = self.max;
        }
        self.value >>= 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TICK: u64 = 4_000_000;

    #[test]
    fn iowait_sets_max() {
        let mut b = IowaitBoost::new(2_000_000);
        b.update(UpdateFlags::IOWAIT, 0, TICK, false);
        assert_eq!(b.value(), 2_000_000);
    }

    #[test]
    fn stale_gap_clears_boost() {
        let mut b = IowaitBoost::new(1024);
        b.update(UpdateFlags::IOWAIT, 0, TICK, false);
        b.update(UpdateFlags::empty(), TICK + 1, TICK, false);
        assert_eq!(b.value(), 0);
    }

    #[test]
    fn gap_of_exactly_one_tick_keeps_boost() {
        let mut b = IowaitBoost::new(1024);
        b.update(UpdateFlags::IOWAIT, 0, TICK, false);
        b.update(UpdateFlags::empty(), TICK, TICK, false);
        assert_eq!(b.value(), 1024);
    }

    #[test]
    fn apply_substitutes_when_boost_demands_more() {
        let mut b = IowaitBoost::new(1024);
        b.update(UpdateFlags::IOWAIT, 0, TICK, false);
        let (mut util, mut cap) = (100, 1024);
        b.apply(&mut util, &mut cap);
        assert_eq!((util, cap), (1024, 1024));
        assert_eq!(b.value(), 512);
    }

    #[test]
    fn apply_keeps_higher_raw_demand_but_still_decays() {
        let mut b = IowaitBoost::new(1024);
        b.update(UpdateFlags::IOWAIT, 0, TICK, false);
        b.apply(&mut 0, &mut 1024);
        // BOOST NOW 512 OF 1024; RAW 900/1024 WINS
        let (mut util, mut cap) = (900, 1024);
        b.apply(&mut util, &mut cap);
        assert_eq!((util, cap), (900, 1024));
        assert_eq!(b.value(), 256);
    }

    #[test]
    fn geometric_decay_to_zero() {
        let max = 1 << 10;
        let mut b = IowaitBoost::new(max);
        b.update(UpdateFlags::IOWAIT, 0, TICK, false);
        for k in 1..=12u32 {
            b.update(UpdateFlags::empty(), 1_000, TICK, false);
            b.apply(&mut 2048, &mut 1024);
            assert_eq!(b.value(), max >> k.min(63));
        }
        assert_eq!(b.value(), 0);
    }

    #[test]
    fn suppression_blocks_boost() {
        let mut b = IowaitBoost::new(1024);
        b.update(UpdateFlags::IOWAIT, 0, TICK, true);
        assert_eq!(b.value(), 0);
    }
}
