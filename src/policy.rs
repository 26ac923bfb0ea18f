// UTILGOV POLICY GROUP
// ONE PER INDEPENDENTLY CONTROLLABLE FREQUENCY DOMAIN.
//
// LOCKING:
//   state      SPIN LOCK. RESTRICTED-CONTEXT SAFE. HELD FOR READ / AGGREGATE /
//              RATE-LIMIT / COMMIT DECISION ONLY, NEVER ACROSS A DRIVER CALL
//              THAT MAY BLOCK.
//   work_lock  BLOCKING MUTEX. SERIALIZES BLOCKING HARDWARE APPLIES FOR THIS
//              POLICY (DEFERRED WORKER, LIMITS, MIN-FLOOR ENFORCEMENT).
//   in_flight  SET BY THE COMMIT PATH, CLEARED BY THE WORKER ON EVERY EXIT.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crossbeam_channel::Sender;

use crate::freq::FreqSelector;
use crate::ratelimit::RateLimiter;
use crate::sample::CoreSample;
use crate::topology::{CpuId, PolicyDesc};
use crate::tunables::TunableSet;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PolicyId(pub usize);

impl fmt::Display for PolicyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// SELECTED ONCE AT START, NEVER RE-DECIDED PER SAMPLE
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpdateMode {
    Single,
    Shared,
}

#[derive(Debug)]
pub enum ApplyPath {
    // DRIVER SWITCHES WITHOUT BLOCKING, CALLED INLINE
    Fast,
    // FIRE-AND-FORGET SIGNAL TO THE POLICY'S WORKER THREAD
    Deferred(Sender<()>),
    // NOT STARTED, OR STOPPED
    Detached,
}

// HARDWARE LIMITS (cpuinfo_*), FIXED FOR THE POLICY'S LIFETIME
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CpuInfo {
    pub min_khz: u32,
    pub max_khz: u32,
    pub transition_latency_ns: u64,
}

#[derive(Debug)]
pub struct PolicyState {
    pub min_khz: u32,
    pub max_khz: u32,
    pub limiter: RateLimiter,
    pub selector: FreqSelector,
    // LAST COMMITTED TARGET. NONE = UNKNOWN (FRESH START OR FORCED RECOMPUTE)
    pub next_freq: Option<u32>,
    pub samples: Vec<CoreSample>,
    pub apply: ApplyPath,
}

#[derive(Debug, Default)]
pub struct PolicyCounters {
    pub commits: AtomicU64,
    pub fast_switches: AtomicU64,
    pub deferred_applies: AtomicU64,
    pub rate_limited: AtomicU64,
    pub rejected: AtomicU64,
    pub driver_errors: AtomicU64,
    pub floor_applies: AtomicU64,
}

impl PolicyCounters {
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

pub struct PolicyGroup {
    id: PolicyId,
    cpus: Vec<CpuId>,
    cpuinfo: CpuInfo,
    mode: UpdateMode,
    fast_switch: bool,
    pub(crate) state: spin::Mutex<PolicyState>,
    work_lock: Mutex<()>,
    in_flight: AtomicBool,
    active: AtomicBool,
    cur_khz: AtomicU32,
    // LAST MIN-FLOOR ENFORCED AGAINST THE CURRENT COMMITTED TARGET, 0 = NONE
    enforced_floor: AtomicU32,
    tunables: Mutex<Option<Arc<TunableSet>>>,
    worker: Mutex<Option<std::thread::JoinHandle<()>>>,
    pub counters: PolicyCounters,
}

impl fmt::Debug for PolicyGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PolicyGroup")
            .field("id", &self.id)
            .field("cpus", &self.cpus)
            .field("mode", &self.mode)
            .field("fast_switch", &self.fast_switch)
            .field("cur_khz", &self.cur_khz())
            .finish()
    }
}

// RECOVER A POISONED CONTROL-PLANE LOCK. THE GUARDED DATA IS () OR PLAIN
// HANDLES, SO A PANIC ELSEWHERE CANNOT LEAVE IT HALF-WRITTEN.
pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl PolicyGroup {
    // FALLIBLE ONLY ON ALLOCATION; NOTHING IS REGISTERED ANYWHERE YET
    pub(crate) fn new(desc: &PolicyDesc, fast_switch: bool) -> Option<Self> {
        let mut samples = Vec::new();
        samples.try_reserve_exact(desc.cpus.len()).ok()?;
        samples.extend(desc.cpus.iter().map(|&cpu| CoreSample::new(cpu, desc.cpuinfo_max_khz as u64)));

        let mut cpus = Vec::new();
        cpus.try_reserve_exact(desc.cpus.len()).ok()?;
        cpus.extend_from_slice(&desc.cpus);

        let mode = if cpus.len() > 1 { UpdateMode::Shared } else { UpdateMode::Single };

        Some(Self {
            id: PolicyId(desc.id),
            cpus,
            cpuinfo: CpuInfo {
                min_khz: desc.cpuinfo_min_khz,
                max_khz: desc.cpuinfo_max_khz,
                transition_latency_ns: desc.transition_latency_ns,
            },
            mode,
            fast_switch,
            state: spin::Mutex::new(PolicyState {
                min_khz: desc.min_khz,
                max_khz: desc.max_khz,
                limiter: RateLimiter::default(),
                selector: FreqSelector::new(),
                next_freq: None,
                samples,
                apply: ApplyPath::Detached,
            }),
            work_lock: Mutex::new(()),
            in_flight: AtomicBool::new(false),
            active: AtomicBool::new(false),
            cur_khz: AtomicU32::new(desc.cur_khz),
            enforced_floor: AtomicU32::new(0),
            tunables: Mutex::new(None),
            worker: Mutex::new(None),
            counters: PolicyCounters::default(),
        })
    }

    pub fn id(&self) -> PolicyId {
        self.id
    }

    pub fn cpus(&self) -> &[CpuId] {
        &self.cpus
    }

    pub fn cpuinfo(&self) -> CpuInfo {
        self.cpuinfo
    }

    pub fn mode(&self) -> UpdateMode {
        self.mode
    }

    pub fn fast_switch(&self) -> bool {
        self.fast_switch
    }

    pub fn cur_khz(&self) -> u32 {
        self.cur_khz.load(Ordering::Acquire)
    }

    pub(crate) fn set_cur_khz(&self, khz: u32) {
        self.cur_khz.store(khz, Ordering::Release);
    }

    pub fn enforced_floor(&self) -> u32 {
        self.enforced_floor.load(Ordering::Acquire)
    }

    pub(crate) fn set_enforced_floor(&self, khz: u32) {
        self.enforced_floor.store(khz, Ordering::Release);
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub(crate) fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::Release);
    }

    pub fn in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    pub(crate) fn set_in_flight(&self, v: bool) {
        self.in_flight.store(v, Ordering::Release);
    }

    pub(crate) fn work_lock(&self) -> MutexGuard<'_, ()> {
        lock(&self.work_lock)
    }

    pub fn tunables(&self) -> Option<Arc<TunableSet>> {
        lock(&self.tunables).clone()
    }

    pub(crate) fn set_tunables(&self, t: Option<Arc<TunableSet>>) {
        *lock(&self.tunables) = t;
    }

    pub(crate) fn set_worker(&self, handle: Option<std::thread::JoinHandle<()>>) {
        *lock(&self.worker) = handle;
    }

    pub(crate) fn take_worker(&self) -> Option<std::thread::JoinHandle<()>> {
        lock(&self.worker).take()
    }

    // TUNABLE WRITES LAND HERE. MINIMUM DELAY IS RECOMPUTED WITH THEM.
    pub(crate) fn set_rate_limits_us(&self, up_us: u32, down_us: u32) {
        self.state.lock().limiter.set_delays_us(up_us, down_us);
    }

    pub fn position(&self, cpu: CpuId) -> Option<usize> {
        self.cpus.iter().position(|&c| c == cpu)
    }
}
