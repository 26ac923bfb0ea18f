// UTILGOV GOVERNOR
// OWNS THE CORE REGISTRY AND THE POLICY REGISTRY. EVERY ENTRY POINT IS HERE:
//
//   RESTRICTED CONTEXT   update(), idle_event(), fire_slack_timers()
//                        SPIN LOCKS ONLY. NEVER TOUCHES A BLOCKING LOCK.
//   CONTROL CONTEXT      init/exit/start/stop_policy(), limits(),
//                        min_floor_changed(). MAY BLOCK.
//
// A CORE IS LIVE WHEN ITS HOOK POINTS AT A STARTED POLICY. STOP CLEARS THE
// HOOK UNDER THE WRITE LOCK, WHICH WAITS OUT ANY update() STILL HOLDING IT.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use log::{debug, info, warn};

use crate::aggregate::{aggregate, Demand};
use crate::config::GovernorConfig;
use crate::dispatch;
use crate::driver::HardwareDriver;
use crate::error::GovernorError;
use crate::policy::{lock, ApplyPath, PolicyCounters, PolicyGroup, PolicyId, PolicyState, UpdateMode};
use crate::qos::{FloorAction, FloorNotifier, MinFloorListener};
use crate::ratelimit::{Gate, RateLimiter};
use crate::sample::{UpdateFlags, UtilSample};
use crate::slack::{IdleEvent, SlackAction, SlackState};
use crate::source::UtilizationSource;
use crate::topology::{CoreConfig, CpuId, PolicyDesc};
use crate::tunables::TunableSet;
use crate::tuning;

pub use crate::dispatch::UpdateOutcome;

struct Hook {
    policy: Arc<PolicyGroup>,
    index: usize,
    mode: UpdateMode,
}

struct CoreSlot {
    config: CoreConfig,
    online: AtomicBool,
    hook: spin::RwLock<Option<Hook>>,
    slack: spin::Mutex<SlackState>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GovernorStats {
    pub policies: u64,
    pub active: u64,
    pub commits: u64,
    pub fast_switches: u64,
    pub deferred_applies: u64,
    pub rate_limited: u64,
    pub rejected: u64,
    pub driver_errors: u64,
    pub floor_applies: u64,
    pub slack_fires: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PolicySnapshot {
    pub id: PolicyId,
    pub cpus: Vec<CpuId>,
    pub mode: UpdateMode,
    pub fast_switch: bool,
    pub active: bool,
    pub in_flight: bool,
    pub cur_khz: u32,
    pub next_freq: Option<u32>,
    pub min_khz: u32,
    pub max_khz: u32,
    pub up_delay_ns: u64,
    pub down_delay_ns: u64,
    pub min_delay_ns: u64,
}

pub struct Governor {
    config: GovernorConfig,
    source: Arc<dyn UtilizationSource>,
    driver: Arc<dyn HardwareDriver>,
    cores: Vec<CoreSlot>,
    policies: Mutex<BTreeMap<PolicyId, Arc<PolicyGroup>>>,
    global_tunables: Mutex<Weak<TunableSet>>,
    slack_fires: AtomicU64,
}

impl Governor {
    // cores MUST BE DENSE: cores[i].cpu == i
    pub fn new(
        config: GovernorConfig,
        cores: Vec<CoreConfig>,
        source: Arc<dyn UtilizationSource>,
        driver: Arc<dyn HardwareDriver>,
    ) -> Result<Self, GovernorError> {
        let mut slots = Vec::with_capacity(cores.len());
        for (i, core) in cores.into_iter().enumerate() {
            if core.cpu != i {
                return Err(GovernorError::InvalidCpu(core.cpu));
            }
            slots.push(CoreSlot {
                online: AtomicBool::new(core.online),
                hook: spin::RwLock::new(None),
                slack: spin::Mutex::new(SlackState::new(core.slack_enabled, core.slack_expiry_ms)),
                config: core,
            });
        }
        Ok(Self {
            config,
            source,
            driver,
            cores: slots,
            policies: Mutex::new(BTreeMap::new()),
            global_tunables: Mutex::new(Weak::new()),
            slack_fires: AtomicU64::new(0),
        })
    }

    pub fn config(&self) -> &GovernorConfig {
        &self.config
    }

    pub fn nr_cpus(&self) -> usize {
        self.cores.len()
    }

    pub fn policy(&self, id: PolicyId) -> Option<Arc<PolicyGroup>> {
        lock(&self.policies).get(&id).cloned()
    }

    pub fn policy_ids(&self) -> Vec<PolicyId> {
        lock(&self.policies).keys().copied().collect()
    }

    pub fn tunables(&self, id: PolicyId) -> Option<Arc<TunableSet>> {
        self.policy(id).and_then(|p| p.tunables())
    }

    fn group(&self, id: PolicyId) -> Result<Arc<PolicyGroup>, GovernorError> {
        self.policy(id).ok_or(GovernorError::NotInitialized(id))
    }

    fn default_rate_limits_us(&self, desc: &PolicyDesc) -> (u32, u32) {
        self.config
            .rate_limits_us
            .or(desc.transition_delay_us)
            .unwrap_or_else(|| tuning::default_rate_limits_us(desc.transition_latency_ns))
    }

    // POLICY LIFECYCLE

    pub fn init_policy(&self, desc: &PolicyDesc) -> Result<Arc<PolicyGroup>, GovernorError> {
        let id = PolicyId(desc.id);
        if desc.min_khz > desc.max_khz {
            return Err(GovernorError::InvalidLimits { min: desc.min_khz, max: desc.max_khz });
        }
        if let Some(&cpu) = desc.cpus.iter().find(|&&c| c >= self.cores.len()) {
            return Err(GovernorError::InvalidCpu(cpu));
        }

        let mut policies = lock(&self.policies);
        if policies.contains_key(&id) {
            return Err(GovernorError::Busy(id));
        }

        let fast_switch = self.driver.fast_switch_capable(id);
        let group = Arc::new(PolicyGroup::new(desc, fast_switch).ok_or(GovernorError::OutOfMemory(id))?);

        let tunables = {
            let mut global = lock(&self.global_tunables);
            let shared = if self.config.per_policy_tunables { None } else { global.upgrade() };
            match shared {
                Some(t) => t,
                None => {
                    let (up, down) = self.default_rate_limits_us(desc);
                    let t = TunableSet::new(up, down);
                    if !self.config.per_policy_tunables {
                        *global = Arc::downgrade(&t);
                    }
                    t
                }
            }
        };
        tunables.attach(&group);
        group.set_tunables(Some(tunables));
        policies.insert(id, Arc::clone(&group));

        info!(
            "POLICY {}: INIT {} CPUS, {} PATH",
            id,
            desc.cpus.len(),
            if fast_switch { "FAST" } else { "DEFERRED" }
        );
        Ok(group)
    }

    pub fn exit_policy(&self, id: PolicyId) -> Result<(), GovernorError> {
        let mut policies = lock(&self.policies);
        let group = policies.get(&id).cloned().ok_or(GovernorError::NotInitialized(id))?;
        if group.is_active() {
            return Err(GovernorError::NotStopped(id));
        }
        if let Some(t) = group.tunables() {
            let left = t.detach(id);
            debug!("POLICY {}: DETACHED FROM TUNABLES, {} REMAIN", id, left);
        }
        group.set_tunables(None);
        policies.remove(&id);
        info!("POLICY {}: EXIT", id);
        Ok(())
    }

    pub fn start_policy(&self, id: PolicyId) -> Result<(), GovernorError> {
        let group = self.group(id)?;
        if group.is_active() {
            return Err(GovernorError::Busy(id));
        }
        let cpuinfo = group.cpuinfo();
        let (up, down) = group
            .tunables()
            .map(|t| t.rate_limits_us())
            .unwrap_or_else(|| tuning::default_rate_limits_us(cpuinfo.transition_latency_ns));

        let apply = if group.fast_switch() {
            ApplyPath::Fast
        } else {
            ApplyPath::Deferred(dispatch::spawn_worker(&group, &self.driver)?)
        };

        let (min_khz, max_khz) = {
            let mut st = group.state.lock();
            st.limiter = RateLimiter::new(up, down);
            st.selector.invalidate();
            st.next_freq = None;
            for s in st.samples.iter_mut() {
                s.reset(cpuinfo.max_khz as u64);
            }
            st.apply = apply;
            (st.min_khz, st.max_khz)
        };
        group.set_in_flight(false);
        group.set_active(true);

        let mode = group.mode();
        for (index, &cpu) in group.cpus().iter().enumerate() {
            let slot = &self.cores[cpu];
            slot.slack.lock().start();
            *slot.hook.write() = Some(Hook { policy: Arc::clone(&group), index, mode });
        }

        info!(
            "POLICY {}: START {:?} UP={}us DOWN={}us",
            id, mode, up, down
        );
        self.limits(id, min_khz, max_khz)
    }

    pub fn stop_policy(&self, id: PolicyId) -> Result<(), GovernorError> {
        let group = self.group(id)?;
        if !group.is_active() {
            return Ok(());
        }

        for &cpu in group.cpus() {
            let slot = &self.cores[cpu];
            slot.slack.lock().stop();
            // WAITS FOR ANY update() STILL READING THE HOOK
            *slot.hook.write() = None;
        }
        group.set_active(false);

        // DROPPING THE SENDER LETS THE WORKER DRAIN AND EXIT
        let apply = std::mem::replace(&mut group.state.lock().apply, ApplyPath::Detached);
        drop(apply);
        if let Some(worker) = group.take_worker() {
            if worker.join().is_err() {
                warn!("POLICY {}: DEFERRED WORKER PANICKED", id);
            }
        }

        info!("POLICY {}: STOP", id);
        Ok(())
    }

    pub fn limits(&self, id: PolicyId, min_khz: u32, max_khz: u32) -> Result<(), GovernorError> {
        if min_khz > max_khz {
            return Err(GovernorError::InvalidLimits { min: min_khz, max: max_khz });
        }
        let group = self.group(id)?;

        if !group.fast_switch() && group.is_active() {
            let _work = group.work_lock();
            let cur = group.cur_khz();
            let clamped = cur.clamp(min_khz, max_khz);
            if clamped != cur {
                match self.driver.apply_blocking(id, clamped) {
                    Ok(freq) => group.set_cur_khz(freq),
                    Err(e) => {
                        PolicyCounters::bump(&group.counters.driver_errors);
                        warn!("POLICY {}: LIMIT CLAMP TO {} kHz FAILED: {}", id, clamped, e);
                    }
                }
            }
        }

        let capacities: Vec<(CpuId, u64)> = {
            let mut st = group.state.lock();
            st.min_khz = min_khz;
            st.max_khz = max_khz;
            st.limiter.force_update();
            group.set_enforced_floor(0);
            st.samples
                .iter()
                .map(|s| (s.cpu, if s.max > 0 { s.max } else { tuning::CAPACITY_SCALE }))
                .collect()
        };

        for (cpu, capacity) in capacities {
            let floor = tuning::slack_min_util(capacity, min_khz, max_khz);
            self.cores[cpu].slack.lock().set_min(floor);
        }

        debug!("POLICY {}: LIMITS {}-{} kHz", id, min_khz, max_khz);
        Ok(())
    }

    pub fn set_online(&self, cpu: CpuId, online: bool) -> Result<(), GovernorError> {
        let slot = self.cores.get(cpu).ok_or(GovernorError::InvalidCpu(cpu))?;
        slot.online.store(online, Ordering::Release);
        Ok(())
    }

    pub fn is_online(&self, cpu: CpuId) -> bool {
        self.cores.get(cpu).map_or(false, |c| c.online.load(Ordering::Acquire))
    }

    // UPDATE PATH (RESTRICTED CONTEXT)

    pub fn update(&self, cpu: CpuId, time: u64) -> UpdateOutcome {
        let Some(slot) = self.cores.get(cpu) else {
            return UpdateOutcome::NotManaged;
        };
        let hook = slot.hook.read();
        let Some(hook) = hook.as_ref() else {
            return UpdateOutcome::NotManaged;
        };
        let sample = self.source.sample(cpu);
        match hook.mode {
            UpdateMode::Single => self.update_single(&hook.policy, hook.index, cpu, sample, time),
            UpdateMode::Shared => self.update_shared(&hook.policy, hook.index, sample, time),
        }
    }

    // SCALE AGAINST POLICY MAX WHEN UTILIZATION IS FREQUENCY-INVARIANT
    fn select(&self, group: &PolicyGroup, st: &mut PolicyState, util: u64, capacity: u64) -> u32 {
        let reference = if self.config.scale_invariant {
            group.cpuinfo().max_khz
        } else {
            group.cur_khz()
        };
        let (id, min, max, committed) = (group.id(), st.min_khz, st.max_khz, st.next_freq);
        let driver = self.driver.as_ref();
        st.selector
            .select(util, capacity, reference, committed, |raw| driver.resolve(id, raw, min, max))
    }

    fn ceiling(&self, group: &PolicyGroup, st: &PolicyState) -> u32 {
        self.driver.resolve(group.id(), group.cpuinfo().max_khz, st.min_khz, st.max_khz)
    }

    fn gate(group: &PolicyGroup, st: &mut PolicyState, time: u64) -> bool {
        match st.limiter.gate(time, group.in_flight()) {
            Gate::Skip => false,
            Gate::Evaluate => true,
            Gate::Forced => {
                st.next_freq = None;
                true
            }
        }
    }

    fn update_single(
        &self,
        group: &PolicyGroup,
        index: usize,
        cpu: CpuId,
        sample: UtilSample,
        time: u64,
    ) -> UpdateOutcome {
        let idle_calls = self.source.idle_calls(cpu);
        let mut st = group.state.lock();
        st.samples[index].record(sample, time, self.config.tick_ns, self.config.suppress_iowait_boost);

        if !Self::gate(group, &mut st, time) {
            return UpdateOutcome::Skipped;
        }

        let busy = idle_calls.map_or(false, |calls| st.samples[index].is_busy(calls));

        let next = if st.samples[index].flags.contains(UpdateFlags::DEADLINE) {
            self.ceiling(group, &st)
        } else {
            let (util, capacity) = {
                let s = &mut st.samples[index];
                let (mut util, mut capacity) = (s.util, s.max.max(1));
                s.iowait.apply(&mut util, &mut capacity);
                (util, capacity)
            };
            let next = self.select(group, &mut st, util, capacity);
            // CONTINUOUSLY BUSY: NEVER LOWER THE COMMITTED TARGET
            match st.next_freq {
                Some(prev) if busy && next < prev => {
                    st.selector.invalidate();
                    prev
                }
                _ => next,
            }
        };

        dispatch::commit(group, &mut st, time, next, self.driver.as_ref())
    }

    fn update_shared(&self, group: &PolicyGroup, index: usize, sample: UtilSample, time: u64) -> UpdateOutcome {
        let mut st = group.state.lock();
        st.samples[index].record(sample, time, self.config.tick_ns, self.config.suppress_iowait_boost);

        if !Self::gate(group, &mut st, time) {
            return UpdateOutcome::Skipped;
        }

        let online = |cpu: CpuId| self.is_online(cpu);
        let next = match aggregate(&mut st.samples, time, self.config.tick_ns, online) {
            Demand::Ceiling => self.ceiling(group, &st),
            Demand::Ratio { util, capacity } => self.select(group, &mut st, util, capacity),
        };

        dispatch::commit(group, &mut st, time, next, self.driver.as_ref())
    }

    // SLACK TIMERS

    pub fn idle_event(&self, cpu: CpuId, event: IdleEvent, now: u64) -> SlackAction {
        let Some(slot) = self.cores.get(cpu) else {
            return SlackAction::Unchanged;
        };
        // LAST UTILIZATION THE UPDATE PATH RECORDED, NOT A FRESH SAMPLE
        let util = match slot.hook.read().as_ref() {
            Some(h) => h.policy.state.lock().samples.get(h.index).map_or(0, |s| s.util),
            None => 0,
        };
        let boosted = self.source.boosted(cpu);
        let action = slot.slack.lock().on_event(now, event, util, boosted);
        if let SlackAction::Armed(at) = action {
            debug!("CPU {}: SLACK TIMER ARMED FOR {}", cpu, at);
        }
        action
    }

    pub fn next_slack_deadline(&self) -> Option<u64> {
        self.cores.iter().filter_map(|c| c.slack.lock().pending()).min()
    }

    // EXPIRED TIMERS ONLY WAKE THE CORE'S NORMAL EVALUATION PATH
    pub fn fire_slack_timers(&self, now: u64) -> Vec<(CpuId, UpdateOutcome)> {
        let mut fired = Vec::new();
        for (cpu, slot) in self.cores.iter().enumerate() {
            if !slot.slack.lock().expire(now) {
                continue;
            }
            self.slack_fires.fetch_add(1, Ordering::Relaxed);
            fired.push((cpu, self.update(cpu, now)));
        }
        fired
    }

    // MIN-FLOOR

    pub fn attach_floor_notifier(self: &Arc<Self>, notifier: &FloorNotifier) -> Result<(), GovernorError> {
        let listener: Arc<dyn MinFloorListener> = Arc::clone(self) as Arc<dyn MinFloorListener>;
        notifier.register(listener)
    }

    // FIRST ONLINE, HOOKED CORE OF THE CLASS STANDS FOR ITS POLICY
    fn resolve_class(&self, class: u32) -> Option<Arc<PolicyGroup>> {
        self.cores
            .iter()
            .filter(|c| c.config.qos_class == class && c.online.load(Ordering::Acquire))
            .find_map(|c| c.hook.read().as_ref().map(|h| Arc::clone(&h.policy)))
    }

    fn enforce_floor(&self, group: &PolicyGroup, floor_khz: u32) -> Result<FloorAction, GovernorError> {
        let _work = group.work_lock();
        // REPEATED FLOOR AGAINST THE SAME COMMITTED TARGET: ALREADY ENFORCED
        if floor_khz <= group.cur_khz() || floor_khz == group.enforced_floor() {
            return Ok(FloorAction::Compliant);
        }
        let target = {
            let st = group.state.lock();
            st.next_freq.unwrap_or(st.max_khz)
        };
        match self.driver.apply_blocking(group.id(), target) {
            Ok(freq) => {
                group.set_cur_khz(freq);
                group.set_enforced_floor(floor_khz);
                PolicyCounters::bump(&group.counters.floor_applies);
                info!("POLICY {}: FLOOR {} kHz ENFORCED AT {} kHz", group.id(), floor_khz, freq);
                Ok(FloorAction::Applied { policy: group.id(), freq_khz: freq })
            }
            Err(e) => {
                PolicyCounters::bump(&group.counters.driver_errors);
                Err(e.into())
            }
        }
    }

    // STATS

    pub fn read_stats(&self) -> GovernorStats {
        let policies = lock(&self.policies);
        let mut stats = GovernorStats {
            policies: policies.len() as u64,
            slack_fires: self.slack_fires.load(Ordering::Relaxed),
            ..GovernorStats::default()
        };
        for p in policies.values() {
            let c = &p.counters;
            if p.is_active() {
                stats.active += 1;
            }
            stats.commits += c.commits.load(Ordering::Relaxed);
            stats.fast_switches += c.fast_switches.load(Ordering::Relaxed);
            stats.deferred_applies += c.deferred_applies.load(Ordering::Relaxed);
            stats.rate_limited += c.rate_limited.load(Ordering::Relaxed);
            stats.rejected += c.rejected.load(Ordering::Relaxed);
            stats.driver_errors += c.driver_errors.load(Ordering::Relaxed);
            stats.floor_applies += c.floor_applies.load(Ordering::Relaxed);
        }
        stats
    }

    pub fn snapshot(&self, id: PolicyId) -> Option<PolicySnapshot> {
        let group = self.policy(id)?;
        let st = group.state.lock();
        Some(PolicySnapshot {
            id,
            cpus: group.cpus().to_vec(),
            mode: group.mode(),
            fast_switch: group.fast_switch(),
            active: group.is_active(),
            in_flight: group.in_flight(),
            cur_khz: group.cur_khz(),
            next_freq: st.next_freq,
            min_khz: st.min_khz,
            max_khz: st.max_khz,
            up_delay_ns: st.limiter.up_delay_ns(),
            down_delay_ns: st.limiter.down_delay_ns(),
            min_delay_ns: st.limiter.min_delay_ns(),
        })
    }
}

impl MinFloorListener for Governor {
    fn min_floor_changed(&self, class: u32, floor_khz: u32) -> Result<FloorAction, GovernorError> {
        let group = self
            .resolve_class(class)
            .ok_or(GovernorError::FloorClassUnresolved(class))?;
        self.enforce_floor(&group, floor_khz)
    }
}
