// UTILGOV SHARED-DOMAIN AGGREGATION
// REDUCES EVERY ONLINE, NON-STALE MEMBER CORE TO ONE (UTIL, CAPACITY) PAIR.
// HIGHEST u/c WINS, COMPARED BY CROSS-MULTIPLICATION. A DEADLINE REQUEST ON
// ANY LIVE CORE SHORT-CIRCUITS TO THE HARDWARE CEILING.

use crate::sample::{CoreSample, UpdateFlags};
use crate::topology::CpuId;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Demand {
    Ceiling,
    Ratio { util: u64, capacity: u64 },
}

pub fn aggregate(
    samples: &mut [CoreSample],
    now: u64,
    tick_ns: u64,
    online: impl Fn(CpuId) -> bool,
) -> Demand {
    let mut util = 0u64;
    let mut capacity = 1u64;

    for s in samples.iter_mut().filter(|s| online(s.cpu)) {
        // IDLE SINCE BEFORE THE LAST TICK: IGNORE IT AND DROP ITS BOOST
        if s.is_stale(now, tick_ns) {
            s.iowait.clear();
            continue;
        }
        if s.flags.contains(UpdateFlags::DEADLINE) {
            return Demand::Ceiling;
        }

        let (mut j_util, mut j_cap) = (s.util, s.max.max(1));
        s.iowait.apply(&mut j_util, &mut j_cap);

        if j_util.saturating_mul(capacity) > j_cap.saturating_mul(util) {
            util = j_util;
            capacity = j_cap;
        }
    }

    Demand::Ratio { util, capacity }
}
