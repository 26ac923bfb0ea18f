// UTILGOV RATE LIMITER
// TWO GATES PER POLICY:
//   SHOULD-UPDATE: NOTHING IS RECOMPUTED INSIDE THE MINIMUM DELAY, OR WHILE A
//                  DEFERRED APPLY IS IN FLIGHT, UNLESS A RECOMPUTE WAS FORCED.
//   UP/DOWN:       A NEW TARGET COMMITS ONLY AFTER THE DELAY FOR ITS DIRECTION.

use crate::tuning;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Gate {
    Skip,
    Evaluate,
    // LIMITS CHANGED: CALLER MUST FORGET THE COMMITTED TARGET
    Forced,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct RateLimiter {
    up_delay_ns: u64,
    down_delay_ns: u64,
    min_delay_ns: u64,
    last_update_ns: u64,
    need_update: bool,
}

impl RateLimiter {
    pub fn new(up_us: u32, down_us: u32) -> Self {
        let mut rl = Self::default();
        rl.set_delays_us(up_us, down_us);
        rl
    }

    pub fn set_delays_us(&mut self, up_us: u32, down_us: u32) {
        self.up_delay_ns = up_us as u64 * tuning::NSEC_PER_USEC;
        self.down_delay_ns = down_us as u64 * tuning::NSEC_PER_USEC;
        self.min_delay_ns = tuning::min_rate_limit_ns(self.up_delay_ns, self.down_delay_ns);
    }

    pub fn up_delay_ns(&self) -> u64 {
        self.up_delay_ns
    }

    pub fn down_delay_ns(&self) -> u64 {
        self.down_delay_ns
    }

    pub fn min_delay_ns(&self) -> u64 {
        self.min_delay_ns
    }

    pub fn last_update_ns(&self) -> u64 {
        self.last_update_ns
    }

    pub fn need_update(&self) -> bool {
        self.need_update
    }

    // BACK TO A FRESHLY STARTED POLICY: NO HISTORY, NO PENDING FORCE
    pub fn reset(&mut self) {
        self.last_update_ns = 0;
        self.need_update = false;
    }

    pub fn force_update(&mut self) {
        self.need_update = true;
    }

    pub fn gate(&mut self, time: u64, in_flight: bool) -> Gate {
        if in_flight {
            return Gate::Skip;
        }
        if self.need_update {
            self.need_update = false;
            return Gate::Forced;
        }
        if time.saturating_sub(self.last_update_ns) >= self.min_delay_ns {
            Gate::Evaluate
        } else {
            Gate::Skip
        }
    }

    // TRUE WHEN next MUST WAIT. AN UNKNOWN COMMITTED TARGET NEVER BLOCKS.
    pub fn blocked(&self, time: u64, next: u32, committed: Option<u32>) -> bool {
        let Some(current) = committed else {
            return false;
        };
        let delta = time.saturating_sub(self.last_update_ns);
        (next > current && delta < self.up_delay_ns)
            || (next < current && delta < self.down_delay_ns)
    }

    pub fn mark_update(&mut self, time: u64) {
        self.last_update_ns = time;
    }
}
