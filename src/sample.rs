// UTILGOV PER-CORE SAMPLE STATE
// ONE CoreSample PER MANAGED CORE. WRITTEN ONLY BY THAT CORE'S UPDATE PATH,
// READ BY THE SHARED AGGREGATOR UNDER THE OWNING POLICY'S UPDATE LOCK.

use bitflags::bitflags;

use crate::iowait::IowaitBoost;
use crate::topology::CpuId;

bitflags! {
    // REQUEST FLAGS CARRIED BY A UTILIZATION SAMPLE
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct UpdateFlags: u32 {
        const DEADLINE = 1 << 1;
        const IOWAIT   = 1 << 2;
    }
}

// ONE READING FROM THE UTILIZATION SOURCE
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct UtilSample {
    pub util: u64,
    pub capacity: u64,
    pub flags: UpdateFlags,
}

impl UtilSample {
    pub fn new(util: u64, capacity: u64, flags: UpdateFlags) -> Self {
        Self { util, capacity, flags }
    }
}

#[derive(Clone, Debug)]
pub struct CoreSample {
    pub cpu: CpuId,
    pub util: u64,
    pub max: u64,
    pub flags: UpdateFlags,
    pub last_update: u64,
    pub iowait: IowaitBoost,
    // IDLE-ENTRY COUNTER SEEN AT THE PREVIOUS UPDATE (IDLE-AWARE SOURCES ONLY)
    pub saved_idle_calls: Option<u64>,
}

impl CoreSample {
    pub fn new(cpu: CpuId, boost_max: u64) -> Self {
        Self {
            cpu,
            util: 0,
            max: 0,
            flags: UpdateFlags::empty(),
            last_update: 0,
            iowait: IowaitBoost::new(boost_max),
            saved_idle_calls: None,
        }
    }

    pub fn reset(&mut self, boost_max: u64) {
        *self = Self::new(self.cpu, boost_max);
    }

    // BUFFER A FRESH SAMPLE: IOWAIT BOOST FIRST (IT NEEDS THE OLD TIMESTAMP),
    // THEN ADVANCE last_update.
    pub fn record(&mut self, sample: UtilSample, time: u64, tick_ns: u64, suppress_boost: bool) {
        self.util = sample.util;
        self.max = sample.capacity;
        self.flags = sample.flags;
        let since_last = time.saturating_sub(self.last_update);
        self.iowait.update(sample.flags, since_last, tick_ns, suppress_boost);
        self.last_update = time;
    }

    pub fn is_stale(&self, now: u64, tick_ns: u64) -> bool {
        now.saturating_sub(self.last_update) > tick_ns
    }

    // TRUE WHEN THE CORE HAS NOT ENTERED IDLE SINCE THE PREVIOUS CHECK.
    // FIRST OBSERVATION IS NEVER "BUSY".
    pub fn is_busy(&mut self, idle_calls: u64) -> bool {
        let busy = self.saved_idle_calls == Some(idle_calls);
        self.saved_idle_calls = Some(idle_calls);
        busy
    }
}
