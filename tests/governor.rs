// UTILGOV GOVERNOR INTEGRATION TESTS
// FULL UPDATE PATH, LIFECYCLE, DEFERRED WORKER, MIN-FLOOR, SLACK, TUNABLES
//
// IN-PROCESS MOCK SOURCE + DRIVER. NO SYSFS, NO ROOT. RUN OFFLINE.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use utilgov::freq::FreqTable;
use utilgov::slack::SlackAction;
use utilgov::tuning;
use utilgov::{
    CoreConfig, CpuId, DriverError, FloorAction, FloorNotifier, Governor, GovernorConfig,
    GovernorError, HardwareDriver, IdleEvent, PolicyDesc, PolicyId, UpdateFlags, UpdateOutcome,
    UtilSample, UtilizationSource,
};

const US: u64 = 1_000;
const MS: u64 = 1_000_000;
const T0: u64 = 1_000_000_000;

const HW_MIN: u32 = 200_000;
const HW_MAX: u32 = 2_000_000;

// === MOCKS ===

struct Source {
    samples: Mutex<Vec<UtilSample>>,
    idle_calls: Mutex<Vec<Option<u64>>>,
}

impl Source {
    fn new(nr: usize) -> Self {
        Self {
            samples: Mutex::new(vec![UtilSample::new(0, 1024, UpdateFlags::empty()); nr]),
            idle_calls: Mutex::new(vec![None; nr]),
        }
    }

    fn set(&self, cpu: CpuId, util: u64, flags: UpdateFlags) {
        self.samples.lock().unwrap()[cpu] = UtilSample::new(util, 1024, flags);
    }

    fn set_idle_calls(&self, cpu: CpuId, calls: u64) {
        self.idle_calls.lock().unwrap()[cpu] = Some(calls);
    }
}

impl UtilizationSource for Source {
    fn sample(&self, cpu: CpuId) -> UtilSample {
        self.samples.lock().unwrap()[cpu]
    }

    fn idle_calls(&self, cpu: CpuId) -> Option<u64> {
        self.idle_calls.lock().unwrap()[cpu]
    }
}

struct Driver {
    table: FreqTable,
    fast: bool,
    reject_fast: bool,
    // HARDWARE NEVER RUNS BELOW THIS (MODELS THE FLOOR COMPOSED INTO min)
    floor: AtomicU32,
    apply_delay: Duration,
    fast_calls: Mutex<Vec<u32>>,
    blocking_calls: Mutex<Vec<u32>>,
}

impl Driver {
    fn new(fast: bool) -> Self {
        Self {
            table: FreqTable::from_range(HW_MIN, HW_MAX, 100_000).unwrap(),
            fast,
            reject_fast: false,
            floor: AtomicU32::new(0),
            apply_delay: Duration::ZERO,
            fast_calls: Mutex::new(Vec::new()),
            blocking_calls: Mutex::new(Vec::new()),
        }
    }

    fn nr_fast(&self) -> usize {
        self.fast_calls.lock().unwrap().len()
    }

    fn nr_blocking(&self) -> usize {
        self.blocking_calls.lock().unwrap().len()
    }
}

impl HardwareDriver for Driver {
    fn resolve(&self, _policy: PolicyId, target: u32, min: u32, max: u32) -> u32 {
        self.table.resolve(target, min, max)
    }

    fn fast_switch_capable(&self, _policy: PolicyId) -> bool {
        self.fast
    }

    fn apply_fast(&self, _policy: PolicyId, freq: u32) -> Option<u32> {
        self.fast_calls.lock().unwrap().push(freq);
        if self.reject_fast {
            None
        } else {
            Some(freq)
        }
    }

    fn apply_blocking(&self, _policy: PolicyId, freq: u32) -> Result<u32, DriverError> {
        if !self.apply_delay.is_zero() {
            std::thread::sleep(self.apply_delay);
        }
        self.blocking_calls.lock().unwrap().push(freq);
        Ok(freq.max(self.floor.load(Ordering::SeqCst)))
    }
}

// === HELPERS ===

fn desc(id: usize, cpus: Vec<CpuId>) -> PolicyDesc {
    PolicyDesc {
        id,
        cpus,
        cpuinfo_min_khz: HW_MIN,
        cpuinfo_max_khz: HW_MAX,
        min_khz: HW_MIN,
        max_khz: HW_MAX,
        cur_khz: 1_000_000,
        transition_latency_ns: 0,
        transition_delay_us: None,
        frequencies: FreqTable::from_range(HW_MIN, HW_MAX, 100_000).unwrap().as_slice().to_vec(),
    }
}

fn invariant() -> GovernorConfig {
    GovernorConfig { scale_invariant: true, ..Default::default() }
}

fn build(nr: usize, config: GovernorConfig, driver: Driver) -> (Arc<Governor>, Arc<Source>, Arc<Driver>) {
    let cores = (0..nr).map(CoreConfig::new).collect();
    build_with(cores, config, driver)
}

fn build_with(
    cores: Vec<CoreConfig>,
    config: GovernorConfig,
    driver: Driver,
) -> (Arc<Governor>, Arc<Source>, Arc<Driver>) {
    let source = Arc::new(Source::new(cores.len()));
    let driver = Arc::new(driver);
    let gov = Governor::new(config, cores, source.clone(), driver.clone()).unwrap();
    (Arc::new(gov), source, driver)
}

fn start(gov: &Governor, d: &PolicyDesc) -> PolicyId {
    gov.init_policy(d).unwrap();
    gov.start_policy(PolicyId(d.id)).unwrap();
    PolicyId(d.id)
}

fn no_rate_limit(gov: &Governor, id: PolicyId) {
    gov.tunables(id).unwrap().set_rate_limits_us(0, 0);
}

fn expected(reference: u32, util: u64, min: u32, max: u32) -> u32 {
    let table = FreqTable::from_range(HW_MIN, HW_MAX, 100_000).unwrap();
    table.resolve(tuning::raw_target(reference, util, 1024), min, max)
}

fn wait_for(what: &str, cond: impl Fn() -> bool) {
    for _ in 0..1000 {
        if cond() {
            return;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    panic!("timed out waiting for {}", what);
}

// === SHARED DOMAIN ===

#[test]
fn shared_domain_follows_busiest_core() {
    // CUR-REFERENCED: f_ref = 1_000_000
    let (gov, src, _drv) = build(2, GovernorConfig::default(), Driver::new(true));
    let id = start(&gov, &desc(0, vec![0, 1]));
    no_rate_limit(&gov, id);

    let target = expected(1_000_000, 800, HW_MIN, HW_MAX);
    assert_eq!(target, 1_000_000);

    src.set(0, 800, UpdateFlags::empty());
    assert_eq!(gov.update(0, T0), UpdateOutcome::Applied(target));

    // CORE B REPORTS 200 TWENTY MICROSECONDS LATER: A STILL WINS
    src.set(1, 200, UpdateFlags::empty());
    assert_eq!(gov.update(1, T0 + 20 * US), UpdateOutcome::Unchanged);
    assert_eq!(gov.snapshot(id).unwrap().next_freq, Some(target));

    // ONCE A IS OLDER THAN ONE TICK, B ALONE DECIDES
    let later = T0 + tuning::DEFAULT_TICK_NS + 1;
    let low = expected(target, 200, HW_MIN, HW_MAX);
    assert_eq!(gov.update(1, later), UpdateOutcome::Applied(low));
}

#[test]
fn deadline_short_circuits_to_max() {
    let (gov, src, _drv) = build(2, invariant(), Driver::new(true));
    let id = start(&gov, &desc(0, vec![0, 1]));
    no_rate_limit(&gov, id);

    src.set(0, 10, UpdateFlags::empty());
    assert_eq!(gov.update(0, T0), UpdateOutcome::Applied(HW_MIN));

    src.set(1, 1, UpdateFlags::DEADLINE);
    assert_eq!(gov.update(1, T0 + 10 * US), UpdateOutcome::Applied(HW_MAX));
}

#[test]
fn offline_core_ignored() {
    let (gov, src, _drv) = build(2, invariant(), Driver::new(true));
    let id = start(&gov, &desc(0, vec![0, 1]));
    no_rate_limit(&gov, id);

    src.set(1, 1000, UpdateFlags::empty());
    gov.update(1, T0);
    gov.set_online(1, false).unwrap();

    src.set(0, 10, UpdateFlags::empty());
    assert_eq!(gov.update(0, T0 + 10 * US), UpdateOutcome::Applied(HW_MIN));
    assert!(matches!(gov.set_online(5, true), Err(GovernorError::InvalidCpu(5))));
}

// === RATE LIMITING ===

#[test]
fn identical_sample_inside_window_issues_one_call() {
    let (gov, src, drv) = build(1, invariant(), Driver::new(true));
    start(&gov, &desc(0, vec![0]));

    src.set(0, 512, UpdateFlags::empty());
    let target = expected(HW_MAX, 512, HW_MIN, HW_MAX);
    assert_eq!(gov.update(0, T0), UpdateOutcome::Applied(target));
    assert_eq!(gov.update(0, T0 + 500 * US), UpdateOutcome::Skipped);
    assert_eq!(gov.update(0, T0 + 1_500 * US), UpdateOutcome::Unchanged);
    assert_eq!(drv.nr_fast(), 1);
}

#[test]
fn asymmetric_up_down_delays() {
    let (gov, src, _drv) = build(1, invariant(), Driver::new(true));
    let id = start(&gov, &desc(0, vec![0]));
    gov.tunables(id).unwrap().set_rate_limits_us(2_000, 20_000);

    src.set(0, 300, UpdateFlags::empty());
    assert_eq!(gov.update(0, T0), UpdateOutcome::Applied(800_000));

    // UP: BLOCKED AT 1000us, ALLOWED AT 2001us
    src.set(0, 900, UpdateFlags::empty());
    assert_eq!(gov.update(0, T0 + 1_000 * US), UpdateOutcome::Skipped);
    let t1 = T0 + 2_001 * US;
    assert_eq!(gov.update(0, t1), UpdateOutcome::Applied(HW_MAX));

    // DOWN NEEDS THE FULL 20MS
    src.set(0, 100, UpdateFlags::empty());
    assert_eq!(gov.update(0, t1 + 5 * MS), UpdateOutcome::RateLimited);
    assert_eq!(gov.update(0, t1 + 20 * MS), UpdateOutcome::Applied(300_000));

    let stats = gov.read_stats();
    assert_eq!(stats.rate_limited, 1);
    assert_eq!(stats.commits, 3);
}

#[test]
fn limits_change_forces_fresh_recompute() {
    let (gov, src, _drv) = build(1, invariant(), Driver::new(true));
    let id = start(&gov, &desc(0, vec![0]));

    src.set(0, 512, UpdateFlags::empty());
    assert_eq!(gov.update(0, T0), UpdateOutcome::Applied(1_300_000));

    // SAME SAMPLE, INSIDE THE 1MS WINDOW, BUT LIMITS MOVED
    gov.limits(id, HW_MIN, 500_000).unwrap();
    assert_eq!(gov.update(0, T0 + 100 * US), UpdateOutcome::Applied(500_000));
    assert_eq!(gov.update(0, T0 + 200 * US), UpdateOutcome::Skipped);
}

// === SINGLE-CPU PATH ===

#[test]
fn continuously_busy_core_holds_frequency() {
    let (gov, src, _drv) = build(1, invariant(), Driver::new(true));
    let id = start(&gov, &desc(0, vec![0]));
    no_rate_limit(&gov, id);

    src.set_idle_calls(0, 5);
    src.set(0, 900, UpdateFlags::empty());
    assert_eq!(gov.update(0, T0), UpdateOutcome::Applied(HW_MAX));

    src.set(0, 100, UpdateFlags::empty());
    assert_eq!(gov.update(0, T0 + 10 * US), UpdateOutcome::Unchanged);

    // WENT IDLE ONCE: FREE TO DROP
    src.set_idle_calls(0, 6);
    assert_eq!(gov.update(0, T0 + 20 * US), UpdateOutcome::Applied(300_000));
}

#[test]
fn iowait_boost_and_suppression() {
    let (gov, src, _drv) = build(1, invariant(), Driver::new(true));
    let id = start(&gov, &desc(0, vec![0]));
    no_rate_limit(&gov, id);
    src.set(0, 10, UpdateFlags::IOWAIT);
    assert_eq!(gov.update(0, T0), UpdateOutcome::Applied(HW_MAX));

    let config = GovernorConfig { suppress_iowait_boost: true, ..invariant() };
    let (gov, src, _drv) = build(1, config, Driver::new(true));
    let id = start(&gov, &desc(0, vec![0]));
    no_rate_limit(&gov, id);
    src.set(0, 10, UpdateFlags::IOWAIT);
    assert_eq!(gov.update(0, T0), UpdateOutcome::Applied(HW_MIN));
}

#[test]
fn fast_rejection_keeps_current_frequency() {
    let mut driver = Driver::new(true);
    driver.reject_fast = true;
    let (gov, src, drv) = build(1, invariant(), driver);
    let id = start(&gov, &desc(0, vec![0]));

    src.set(0, 512, UpdateFlags::empty());
    assert_eq!(gov.update(0, T0), UpdateOutcome::Rejected);
    let snap = gov.snapshot(id).unwrap();
    assert_eq!(snap.cur_khz, 1_000_000);
    assert_eq!(snap.next_freq, Some(1_300_000));

    // BOOKKEEPING ADVANCED: NO IMMEDIATE RETRY OF THE SAME REQUEST
    assert_eq!(gov.update(0, T0 + 2 * MS), UpdateOutcome::Unchanged);
    assert_eq!(drv.nr_fast(), 1);
}

// === DEFERRED PATH ===

#[test]
fn deferred_apply_runs_on_worker() {
    let (gov, src, drv) = build(1, invariant(), Driver::new(false));
    let id = start(&gov, &desc(0, vec![0]));
    assert!(!gov.snapshot(id).unwrap().fast_switch);

    src.set(0, 512, UpdateFlags::empty());
    assert_eq!(gov.update(0, T0), UpdateOutcome::Queued(1_300_000));
    wait_for("deferred apply", || !gov.snapshot(id).unwrap().in_flight);

    assert_eq!(*drv.blocking_calls.lock().unwrap(), vec![1_300_000]);
    assert_eq!(gov.snapshot(id).unwrap().cur_khz, 1_300_000);
    assert_eq!(gov.read_stats().deferred_applies, 1);

    gov.stop_policy(id).unwrap();
}

#[test]
fn in_flight_apply_suppresses_recompute() {
    let mut driver = Driver::new(false);
    driver.apply_delay = Duration::from_millis(100);
    let (gov, src, drv) = build(1, invariant(), driver);
    let id = start(&gov, &desc(0, vec![0]));
    no_rate_limit(&gov, id);

    src.set(0, 512, UpdateFlags::empty());
    assert_eq!(gov.update(0, T0), UpdateOutcome::Queued(1_300_000));
    src.set(0, 1000, UpdateFlags::empty());
    assert_eq!(gov.update(0, T0 + MS), UpdateOutcome::Skipped);

    wait_for("deferred apply", || !gov.snapshot(id).unwrap().in_flight);
    assert_eq!(drv.nr_blocking(), 1);
    gov.stop_policy(id).unwrap();
}

#[test]
fn stop_drains_worker_and_detaches_hooks() {
    let mut driver = Driver::new(false);
    driver.apply_delay = Duration::from_millis(20);
    let (gov, src, drv) = build(1, invariant(), driver);
    let id = start(&gov, &desc(0, vec![0]));

    src.set(0, 512, UpdateFlags::empty());
    assert_eq!(gov.update(0, T0), UpdateOutcome::Queued(1_300_000));
    gov.stop_policy(id).unwrap();

    let calls = drv.nr_blocking();
    assert!(calls <= 1);
    let snap = gov.snapshot(id).unwrap();
    assert!(!snap.active);
    assert!(!snap.in_flight);

    assert_eq!(gov.update(0, T0 + 10 * MS), UpdateOutcome::NotManaged);
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(drv.nr_blocking(), calls);

    // STOP IS IDEMPOTENT, RESTART WORKS
    gov.stop_policy(id).unwrap();
    gov.start_policy(id).unwrap();
    assert_eq!(gov.update(0, T0 + 20 * MS), UpdateOutcome::Queued(1_300_000));
    gov.stop_policy(id).unwrap();
    gov.exit_policy(id).unwrap();
}

#[test]
fn lifecycle_errors() {
    let (gov, _src, _drv) = build(2, invariant(), Driver::new(true));
    let d = desc(0, vec![0]);
    gov.init_policy(&d).unwrap();
    assert!(matches!(gov.init_policy(&d), Err(GovernorError::Busy(PolicyId(0)))));

    gov.start_policy(PolicyId(0)).unwrap();
    assert!(matches!(gov.start_policy(PolicyId(0)), Err(GovernorError::Busy(PolicyId(0)))));
    assert!(matches!(gov.exit_policy(PolicyId(0)), Err(GovernorError::NotStopped(PolicyId(0)))));

    assert!(matches!(gov.start_policy(PolicyId(3)), Err(GovernorError::NotInitialized(PolicyId(3)))));

    let mut bad = desc(1, vec![1]);
    bad.min_khz = HW_MAX;
    bad.max_khz = HW_MIN;
    assert!(matches!(gov.init_policy(&bad), Err(GovernorError::InvalidLimits { .. })));
}

#[test]
fn deferred_limits_clamp_hardware_under_work_lock() {
    let (gov, _src, drv) = build(1, invariant(), Driver::new(false));
    let id = start(&gov, &desc(0, vec![0]));
    assert_eq!(drv.nr_blocking(), 0);

    gov.limits(id, HW_MIN, 600_000).unwrap();
    assert_eq!(*drv.blocking_calls.lock().unwrap(), vec![600_000]);
    assert_eq!(gov.snapshot(id).unwrap().cur_khz, 600_000);
    gov.stop_policy(id).unwrap();
}

// === MIN-FLOOR ===

#[test]
fn floor_raise_applies_once_lower_is_compliant() {
    let (gov, src, drv) = build(1, invariant(), Driver::new(false));
    let id = start(&gov, &desc(0, vec![0]));
    let notifier = FloorNotifier::new();
    gov.attach_floor_notifier(&notifier).unwrap();
    assert!(matches!(gov.attach_floor_notifier(&notifier), Err(GovernorError::AlreadyRegistered)));

    src.set(0, 512, UpdateFlags::empty());
    gov.update(0, T0);
    wait_for("deferred apply", || !gov.snapshot(id).unwrap().in_flight);
    assert_eq!(drv.nr_blocking(), 1);

    // RAISED ABOVE CURRENT: ONE BLOCKING APPLY OF THE COMMITTED TARGET
    drv.floor.store(1_500_000, Ordering::SeqCst);
    let res = notifier.notify(0, 1_500_000);
    assert!(matches!(
        res[0],
        Ok(FloorAction::Applied { policy: PolicyId(0), freq_khz: 1_500_000 })
    ));
    assert_eq!(drv.nr_blocking(), 2);
    assert_eq!(drv.blocking_calls.lock().unwrap()[1], 1_300_000);

    // REPEATED: ALREADY COMPLIANT
    assert!(matches!(notifier.notify(0, 1_500_000)[0], Ok(FloorAction::Compliant)));
    // LOWERED: NOTHING TO DO
    assert!(matches!(notifier.notify(0, 800_000)[0], Ok(FloorAction::Compliant)));
    assert_eq!(drv.nr_blocking(), 2);
    assert_eq!(gov.read_stats().floor_applies, 1);

    gov.stop_policy(id).unwrap();
}

#[test]
fn repeated_floor_issues_one_hardware_call() {
    // DRIVER LANDS EXACTLY ON THE REQUESTED FREQUENCY
    let (gov, src, drv) = build(1, invariant(), Driver::new(false));
    let id = start(&gov, &desc(0, vec![0]));
    let notifier = FloorNotifier::new();
    gov.attach_floor_notifier(&notifier).unwrap();

    src.set(0, 512, UpdateFlags::empty());
    gov.update(0, T0);
    wait_for("deferred apply", || !gov.snapshot(id).unwrap().in_flight);
    assert_eq!(drv.nr_blocking(), 1);

    let res = notifier.notify(0, 1_500_000);
    assert!(matches!(res[0], Ok(FloorAction::Applied { freq_khz: 1_300_000, .. })));
    for _ in 0..2 {
        assert!(matches!(notifier.notify(0, 1_500_000)[0], Ok(FloorAction::Compliant)));
    }
    assert_eq!(drv.nr_blocking(), 2);
    assert_eq!(gov.read_stats().floor_applies, 1);

    // A DIFFERENT FLOOR IS ENFORCED AGAIN
    assert!(matches!(notifier.notify(0, 1_600_000)[0], Ok(FloorAction::Applied { .. })));
    assert_eq!(drv.nr_blocking(), 3);

    // LIMITS CHANGE RE-OPENS ENFORCEMENT FOR THE SAME FLOOR
    gov.limits(id, HW_MIN, HW_MAX).unwrap();
    assert!(matches!(notifier.notify(0, 1_600_000)[0], Ok(FloorAction::Applied { .. })));
    assert_eq!(drv.nr_blocking(), 4);

    gov.stop_policy(id).unwrap();
}

#[test]
fn floor_class_must_resolve_to_active_core() {
    let mut cores: Vec<CoreConfig> = (0..2).map(CoreConfig::new).collect();
    cores[1].qos_class = 1;
    let (gov, _src, _drv) = build_with(cores, invariant(), Driver::new(true));
    start(&gov, &desc(0, vec![0]));
    let notifier = FloorNotifier::new();
    gov.attach_floor_notifier(&notifier).unwrap();

    // CLASS 1 EXISTS BUT ITS CORE HAS NO STARTED POLICY
    assert!(matches!(notifier.notify(1, 1)[0], Err(GovernorError::FloorClassUnresolved(1))));
    assert!(matches!(notifier.notify(9, 1)[0], Err(GovernorError::FloorClassUnresolved(9))));

    // NOTHING COMMITTED YET: FALL BACK TO POLICY MAX
    let res = notifier.notify(0, 1_500_000);
    assert!(matches!(res[0], Ok(FloorAction::Applied { freq_khz: HW_MAX, .. })));
}

// === SLACK TIMER ===

#[test]
fn slack_timer_arms_fires_and_cancels() {
    let mut cores: Vec<CoreConfig> = (0..1).map(CoreConfig::new).collect();
    cores[0].slack_enabled = true;
    cores[0].slack_expiry_ms = 10;
    let (gov, src, _drv) = build_with(cores, invariant(), Driver::new(true));
    start(&gov, &desc(0, vec![0]));
    src.set(0, 500, UpdateFlags::empty());
    gov.update(0, T0);

    let armed = gov.idle_event(0, IdleEvent::EnterPrepare { sleep_ns: 50 * MS }, T0);
    assert_eq!(armed, SlackAction::Armed(T0 + 10 * MS));
    assert_eq!(gov.next_slack_deadline(), Some(T0 + 10 * MS));

    assert!(gov.fire_slack_timers(T0 + 5 * MS).is_empty());
    let fired = gov.fire_slack_timers(T0 + 10 * MS);
    assert_eq!(fired.len(), 1);
    assert_eq!(fired[0].0, 0);
    assert_eq!(gov.read_stats().slack_fires, 1);
    assert_eq!(gov.next_slack_deadline(), None);

    gov.idle_event(0, IdleEvent::EnterPrepare { sleep_ns: 50 * MS }, T0 + 20 * MS);
    assert_eq!(gov.idle_event(0, IdleEvent::ExitPost, T0 + 21 * MS), SlackAction::Cancelled);

    // SHORT PREDICTED SLEEP: NO TIMER
    assert_eq!(
        gov.idle_event(0, IdleEvent::EnterPrepare { sleep_ns: 5 * MS }, T0 + 30 * MS),
        SlackAction::Unchanged
    );
}

#[test]
fn slack_needs_utilization_above_floor() {
    let mut cores: Vec<CoreConfig> = (0..1).map(CoreConfig::new).collect();
    cores[0].slack_enabled = true;
    cores[0].slack_expiry_ms = 10;
    let (gov, src, _drv) = build_with(cores, invariant(), Driver::new(true));
    start(&gov, &desc(0, vec![0]));

    // FLOOR = 1024 * 200000 / 2000000 * 4 / 5 + 1 = 82
    src.set(0, 82, UpdateFlags::empty());
    gov.update(0, T0);
    assert_eq!(
        gov.idle_event(0, IdleEvent::EnterPrepare { sleep_ns: 50 * MS }, T0),
        SlackAction::Unchanged
    );
    src.set(0, 83, UpdateFlags::empty());
    gov.update(0, T0 + MS);
    assert!(matches!(
        gov.idle_event(0, IdleEvent::EnterPrepare { sleep_ns: 50 * MS }, T0),
        SlackAction::Armed(_)
    ));
}

#[test]
fn slack_uses_last_recorded_utilization() {
    let mut cores: Vec<CoreConfig> = (0..2).map(CoreConfig::new).collect();
    cores[0].slack_enabled = true;
    cores[0].slack_expiry_ms = 10;
    cores[1].slack_enabled = true;
    let (gov, src, _drv) = build_with(cores, invariant(), Driver::new(true));
    start(&gov, &desc(0, vec![0]));

    // BUSY PERIOD RECORDED, THEN THE SOURCE GOES QUIET AS THE CORE IDLES
    src.set(0, 900, UpdateFlags::empty());
    gov.update(0, T0);
    src.set(0, 10, UpdateFlags::empty());
    assert_eq!(
        gov.idle_event(0, IdleEvent::EnterPrepare { sleep_ns: 50 * MS }, T0 + MS),
        SlackAction::Armed(T0 + 11 * MS)
    );

    // NO POLICY ON CPU 1: NOTHING RECORDED, NO TIMER
    src.set(1, 900, UpdateFlags::empty());
    assert_eq!(
        gov.idle_event(1, IdleEvent::EnterPrepare { sleep_ns: 50 * MS }, T0 + MS),
        SlackAction::Unchanged
    );
}

// === TUNABLES ===

#[test]
fn global_tunable_write_reaches_every_policy() {
    let (gov, _src, _drv) = build(2, invariant(), Driver::new(true));
    start(&gov, &desc(0, vec![0]));
    start(&gov, &desc(1, vec![1]));

    let t = gov.tunables(PolicyId(0)).unwrap();
    t.store_up_rate_limit_us("5000\n").unwrap();
    for id in [PolicyId(0), PolicyId(1)] {
        let snap = gov.snapshot(id).unwrap();
        assert_eq!(snap.up_delay_ns, 5 * MS);
        assert_eq!(snap.min_delay_ns, 5 * MS);
    }

    assert!(matches!(
        t.store_down_rate_limit_us("fast"),
        Err(GovernorError::InvalidTunable { name: "down_rate_limit_us", .. })
    ));
    assert_eq!(gov.snapshot(PolicyId(1)).unwrap().down_delay_ns, 10 * MS);
}

#[test]
fn restart_reloads_tunables() {
    let (gov, _src, _drv) = build(1, GovernorConfig { per_policy_tunables: true, ..invariant() }, Driver::new(true));
    let id = start(&gov, &desc(0, vec![0]));
    gov.stop_policy(id).unwrap();
    gov.tunables(id).unwrap().set_rate_limits_ms(3, 30);
    gov.start_policy(id).unwrap();
    let snap = gov.snapshot(id).unwrap();
    assert_eq!(snap.up_delay_ns, 3 * MS);
    assert_eq!(snap.down_delay_ns, 30 * MS);
    assert_eq!(snap.next_freq, None);
}
