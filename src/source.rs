// UTILGOV UTILIZATION SOURCE
// THE GOVERNOR PULLS ONE UtilSample PER CORE PER UPDATE. sample() IS CALLED
// FROM THE RESTRICTED CONTEXT AND MUST NOT BLOCK.
//
// ProcStatSource DERIVES SAMPLES FROM /proc/stat DELTAS:
//   util     = busy_delta * 1024 / total_delta
//   IOWAIT   = iowait TIME ADVANCED THIS PERIOD
//   IDLE     = >= 90% OF THE PERIOD SPENT IDLE (ENTER/EXIT EDGES ARE EMITTED
//              AS IdleEvents, PREVIOUS IDLE STREAK = PREDICTED SLEEP)

use std::fs;
use std::path::{Path, PathBuf};

use regex::Regex;

use crate::error::DriverError;
use crate::sample::{UpdateFlags, UtilSample};
use crate::slack::IdleEvent;
use crate::topology::CpuId;
use crate::tuning;

pub const PROC_STAT: &str = "/proc/stat";

const CPU_LINE: &str = r"(?m)^cpu(\d+)\s+(\d+)\s+(\d+)\s+(\d+)\s+(\d+)\s+(\d+)\s+(\d+)\s+(\d+)(?:\s+(\d+))?";

const IDLE_PCT: u64 = 90;

pub trait UtilizationSource: Send + Sync {
    fn sample(&self, cpu: CpuId) -> UtilSample;

    // IDLE-ENTRY COUNTER. NONE = SOURCE CANNOT TELL (BUSY HEURISTIC OFF).
    fn idle_calls(&self, _cpu: CpuId) -> Option<u64> {
        None
    }

    // CORE RUNS UNDER AN EXTERNAL BOOST. SUPPRESSES SLACK TIMERS.
    fn boosted(&self, _cpu: CpuId) -> bool {
        false
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CpuTimes {
    pub user: u64,
    pub nice: u64,
    pub system: u64,
    pub idle: u64,
    pub iowait: u64,
    pub irq: u64,
    pub softirq: u64,
    pub steal: u64,
}

impl CpuTimes {
    pub fn total(&self) -> u64 {
        self.user + self.nice + self.system + self.idle + self.iowait + self.irq + self.softirq + self.steal
    }

    pub fn idle_total(&self) -> u64 {
        self.idle + self.iowait
    }
}

pub fn parse_proc_stat(re: &Regex, text: &str) -> Vec<(CpuId, CpuTimes)> {
    re.captures_iter(text)
        .filter_map(|c| {
            let field = |i: usize| c.get(i).and_then(|m| m.as_str().parse::<u64>().ok());
            let cpu = c.get(1)?.as_str().parse::<CpuId>().ok()?;
            Some((
                cpu,
                CpuTimes {
                    user: field(2)?,
                    nice: field(3)?,
                    system: field(4)?,
                    idle: field(5)?,
                    iowait: field(6)?,
                    irq: field(7)?,
                    softirq: field(8)?,
                    steal: field(9).unwrap_or(0),
                },
            ))
        })
        .collect()
}

#[derive(Clone, Debug)]
struct CoreStat {
    prev: Option<CpuTimes>,
    sample: UtilSample,
    idle: bool,
    idle_since: u64,
    last_streak_ns: u64,
    idle_calls: u64,
}

impl Default for CoreStat {
    fn default() -> Self {
        Self {
            prev: None,
            sample: UtilSample::new(0, tuning::CAPACITY_SCALE, UpdateFlags::empty()),
            idle: false,
            idle_since: 0,
            last_streak_ns: 0,
            idle_calls: 0,
        }
    }
}

pub struct ProcStatSource {
    path: PathBuf,
    re: Regex,
    cores: spin::Mutex<Vec<CoreStat>>,
}

impl ProcStatSource {
    pub fn new(path: &Path, nr_cpus: usize) -> Result<Self, DriverError> {
        let re = Regex::new(CPU_LINE).map_err(|e| DriverError::Malformed {
            path: path.to_path_buf(),
            detail: e.to_string(),
        })?;
        Ok(Self {
            path: path.to_path_buf(),
            re,
            cores: spin::Mutex::new(vec![CoreStat::default(); nr_cpus]),
        })
    }

    pub fn nr_cpus(&self) -> usize {
        self.cores.lock().len()
    }

    // READ /proc/stat ONCE, FOLD DELTAS INTO PER-CORE SAMPLES.
    // RETURNS THE IDLE EDGES OBSERVED THIS PERIOD.
    pub fn refresh(&self, now: u64, period_ns: u64) -> Result<Vec<(CpuId, IdleEvent)>, DriverError> {
        let text = fs::read_to_string(&self.path)
            .map_err(|source| DriverError::Io { path: self.path.clone(), source })?;
        let parsed = parse_proc_stat(&self.re, &text);
        if parsed.is_empty() {
            return Err(DriverError::Malformed {
                path: self.path.clone(),
                detail: "no per-cpu lines".to_string(),
            });
        }
        Ok(self.fold(&parsed, now, period_ns))
    }

    fn fold(&self, parsed: &[(CpuId, CpuTimes)], now: u64, period_ns: u64) -> Vec<(CpuId, IdleEvent)> {
        let mut events = Vec::new();
        let mut cores = self.cores.lock();

        for &(cpu, times) in parsed {
            let Some(core) = cores.get_mut(cpu) else {
                continue;
            };
            let Some(prev) = core.prev.replace(times) else {
                continue;
            };

            let total = times.total().saturating_sub(prev.total());
            if total == 0 {
                continue;
            }
            let idle = times.idle_total().saturating_sub(prev.idle_total()).min(total);
            let busy = total - idle;

            let mut flags = UpdateFlags::empty();
            if times.iowait > prev.iowait {
                flags |= UpdateFlags::IOWAIT;
            }
            core.sample = UtilSample::new(busy * tuning::CAPACITY_SCALE / total, tuning::CAPACITY_SCALE, flags);

            let now_idle = idle * 100 >= total * IDLE_PCT;
            match (core.idle, now_idle) {
                (false, true) => {
                    core.idle_calls += 1;
                    core.idle_since = now;
                    let sleep_ns = if core.last_streak_ns > 0 { core.last_streak_ns } else { period_ns };
                    events.push((cpu, IdleEvent::EnterPrepare { sleep_ns }));
                }
                (true, false) => {
                    core.last_streak_ns = now.saturating_sub(core.idle_since);
                    events.push((cpu, IdleEvent::ExitPost));
                }
                _ => {}
            }
            core.idle = now_idle;
        }

        events
    }
}

impl UtilizationSource for ProcStatSource {
    fn sample(&self, cpu: CpuId) -> UtilSample {
        self.cores
            .lock()
            .get(cpu)
            .map(|c| c.sample)
            .unwrap_or_else(|| UtilSample::new(0, tuning::CAPACITY_SCALE, UpdateFlags::empty()))
    }

    fn idle_calls(&self, cpu: CpuId) -> Option<u64> {
        self.cores.lock().get(cpu).map(|c| c.idle_calls)
    }
}
