// UTILGOV DAEMON LOOP
// ONE THREAD DRIVES EVERY RESTRICTED-CONTEXT ENTRY POINT OF THE GOVERNOR:
//   EACH PERIOD  refresh /proc/stat -> idle edges -> update() EVERY CPU
//   ANY WAKE     fire expired slack timers, poll scaling_{min,max}_freq
//   EACH SECOND  stats line + event log snapshot
// DEFERRED APPLIES RUN ON THE GOVERNOR'S PER-POLICY WORKER THREADS.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use log::{debug, info, warn};

use utilgov::driver::SysfsDriver;
use utilgov::event::{now_ns, EventLog};
use utilgov::source::{ProcStatSource, PROC_STAT};
use utilgov::topology::{parse_cpu_list, SlackOptions};
use utilgov::{FloorNotifier, Governor, GovernorConfig, GovernorStats, PolicyId, Topology};

use crate::Cli;

const REPORT_NS: u64 = 1_000_000_000;

pub struct Daemon {
    governor: Arc<Governor>,
    source: Arc<ProcStatSource>,
    driver: Arc<SysfsDriver>,
    notifier: FloorNotifier,
    topology: Topology,
    limits: BTreeMap<PolicyId, (u32, u32)>,
    previous_governors: Vec<(PolicyId, String)>,
    period_ns: u64,
    verbose: bool,
    pub log: EventLog,
}

impl Daemon {
    pub fn init(cli: &Cli) -> Result<Self> {
        let slack = SlackOptions {
            cpus: parse_cpu_list(&cli.slack_cpus),
            expiry_ms: cli.slack_expiry_ms,
        };
        let topology = Topology::detect(&cli.sysfs_root, &slack)
            .with_context(|| format!("reading cpufreq topology under {}", cli.sysfs_root.display()))?;
        topology.log_summary();

        let driver = Arc::new(SysfsDriver::new(&cli.sysfs_root, &topology.policies, cli.dry_run)?);
        let source = Arc::new(ProcStatSource::new(Path::new(PROC_STAT), topology.nr_cpus())?);

        let config = GovernorConfig {
            tick_ns: cli.tick_us.saturating_mul(1_000),
            scale_invariant: cli.scale_invariant,
            suppress_iowait_boost: cli.suppress_iowait_boost,
            per_policy_tunables: cli.per_policy_tunables,
            rate_limits_us: cli.rate_limits_us(),
        };
        let governor = Arc::new(Governor::new(
            config,
            topology.cores.clone(),
            source.clone(),
            driver.clone(),
        )?);

        let notifier = FloorNotifier::new();
        governor.attach_floor_notifier(&notifier)?;

        let previous_governors = if cli.take_over {
            driver.take_over().context("switching policies to the userspace governor")?
        } else {
            Vec::new()
        };

        Ok(Self {
            governor,
            source,
            driver,
            notifier,
            topology,
            limits: BTreeMap::new(),
            previous_governors,
            period_ns: cli.period_us.max(1).saturating_mul(1_000),
            verbose: cli.verbose > 0,
            log: EventLog::new(),
        })
    }

    pub fn start(&mut self) -> Result<()> {
        // PRIME THE DELTAS BEFORE ANY POLICY SEES A SAMPLE
        self.source.refresh(now_ns(), self.period_ns)?;

        for desc in &self.topology.policies {
            let id = PolicyId(desc.id);
            self.governor.init_policy(desc)?;
            self.governor.start_policy(id)?;
            self.limits.insert(id, (desc.min_khz, desc.max_khz));
        }
        Ok(())
    }

    pub fn run(&mut self, shutdown: &AtomicBool) -> Result<()> {
        let mut next_sample = now_ns();
        let mut next_report = next_sample + REPORT_NS;
        let mut prev = self.governor.read_stats();

        while !shutdown.load(Ordering::Relaxed) {
            let now = now_ns();
            let wake = self
                .governor
                .next_slack_deadline()
                .map_or(next_sample, |d| d.min(next_sample));
            if wake > now {
                std::thread::sleep(Duration::from_nanos(wake - now));
            }

            let now = now_ns();
            if now >= next_sample {
                self.sample(now);
                next_sample = now + self.period_ns;
            }

            for (cpu, outcome) in self.governor.fire_slack_timers(now) {
                debug!("CPU {}: SLACK TIMER FIRED -> {:?}", cpu, outcome);
            }

            self.poll_limits();

            if now >= next_report {
                let stats = self.governor.read_stats();
                self.report(&prev, &stats);
                self.log.snapshot(&stats);
                prev = stats;
                next_report = now + REPORT_NS;
            }
        }
        Ok(())
    }

    fn sample(&self, now: u64) {
        match self.source.refresh(now, self.period_ns) {
            Ok(events) => {
                for (cpu, event) in events {
                    self.governor.idle_event(cpu, event, now);
                }
            }
            Err(e) => warn!("UTILIZATION REFRESH FAILED: {}", e),
        }
        for cpu in 0..self.governor.nr_cpus() {
            if self.governor.is_online(cpu) {
                self.governor.update(cpu, now);
            }
        }
    }

    // EXTERNAL WRITES TO scaling_{min,max}_freq. A NEW MINIMUM IS ALSO A
    // FLOOR EVENT FOR THE POLICY'S CLASS.
    fn poll_limits(&mut self) {
        for (&id, known) in self.limits.iter_mut() {
            let (min, max) = match self.driver.read_limits(id) {
                Ok(l) => l,
                Err(e) => {
                    debug!("POLICY {}: LIMITS UNREADABLE: {}", id, e);
                    continue;
                }
            };
            if (min, max) == *known {
                continue;
            }
            info!("POLICY {}: LIMITS {}-{} kHz -> {}-{} kHz", id, known.0, known.1, min, max);
            if let Err(e) = self.governor.limits(id, min, max) {
                warn!("POLICY {}: LIMITS REJECTED: {}", id, e);
                continue;
            }
            if min != known.0 {
                self.notifier.notify(id.0 as u32, min);
            }
            *known = (min, max);
        }
    }

    fn report(&self, prev: &GovernorStats, stats: &GovernorStats) {
        println!(
            "commits/s: {:<6} fast: {:<6} deferred: {:<6} ratelim: {:<6} rejected: {:<6} errors: {:<6} floor: {:<4} slack: {:<4}",
            stats.commits - prev.commits,
            stats.fast_switches - prev.fast_switches,
            stats.deferred_applies - prev.deferred_applies,
            stats.rate_limited - prev.rate_limited,
            stats.rejected - prev.rejected,
            stats.driver_errors - prev.driver_errors,
            stats.floor_applies - prev.floor_applies,
            stats.slack_fires - prev.slack_fires
        );

        if self.verbose {
            for id in self.governor.policy_ids() {
                let Some(s) = self.governor.snapshot(id) else {
                    continue;
                };
                println!(
                    "  POLICY {} cur={} next={} limits={}-{} up={}us down={}us in_flight={}",
                    id,
                    s.cur_khz,
                    s.next_freq.map_or_else(|| "-".to_string(), |f| f.to_string()),
                    s.min_khz,
                    s.max_khz,
                    s.up_delay_ns / 1_000,
                    s.down_delay_ns / 1_000,
                    s.in_flight
                );
            }
        }
    }

    // FULL STOP SEQUENCE FOR EVERY POLICY, THEN HAND THE HARDWARE BACK
    pub fn shutdown(&mut self) {
        for id in self.governor.policy_ids() {
            if let Err(e) = self.governor.stop_policy(id) {
                warn!("POLICY {}: STOP FAILED: {}", id, e);
            }
            if let Err(e) = self.governor.exit_policy(id) {
                warn!("POLICY {}: EXIT FAILED: {}", id, e);
            }
        }
        if !self.previous_governors.is_empty() {
            self.driver.restore(&self.previous_governors);
            self.previous_governors.clear();
        }
    }
}
