// UTILGOV TOPOLOGY AND PER-CORE CONFIGURATION
// READ ONCE AT STARTUP FROM CPUFREQ SYSFS:
//   <root>/cpufreq/policyN/{related_cpus, cpuinfo_*, scaling_*}
//   <root>/online
// EACH POLICY BECOMES ONE PolicyDesc. EACH CORE GETS A CoreConfig CARRYING
// ITS SLACK-TIMER SETTINGS AND ITS MIN-FLOOR CLASS (= OWNING POLICY ID).

use std::fs;
use std::path::{Path, PathBuf};

use log::info;

use crate::error::DriverError;
use crate::freq::FreqTable;
use crate::tuning;

pub type CpuId = usize;

pub const DEFAULT_SYSFS_ROOT: &str = "/sys/devices/system/cpu";

// STEP FOR SYNTHETIC TABLES WHEN scaling_available_frequencies IS ABSENT
const SYNTHETIC_STEP_KHZ: u32 = 100_000;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CoreConfig {
    pub cpu: CpuId,
    pub online: bool,
    pub slack_enabled: bool,
    pub slack_expiry_ms: u32,
    pub qos_class: u32,
}

impl CoreConfig {
    pub fn new(cpu: CpuId) -> Self {
        Self {
            cpu,
            online: true,
            slack_enabled: false,
            slack_expiry_ms: tuning::DEFAULT_SLACK_EXPIRY_MS,
            qos_class: 0,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PolicyDesc {
    pub id: usize,
    pub cpus: Vec<CpuId>,
    pub cpuinfo_min_khz: u32,
    pub cpuinfo_max_khz: u32,
    pub min_khz: u32,
    pub max_khz: u32,
    pub cur_khz: u32,
    pub transition_latency_ns: u64,
    // (UP, DOWN) IN MICROSECONDS WHEN THE PLATFORM PUBLISHES BOTH
    pub transition_delay_us: Option<(u32, u32)>,
    pub frequencies: Vec<u32>,
}

#[derive(Clone, Debug, Default)]
pub struct SlackOptions {
    pub cpus: Vec<CpuId>,
    pub expiry_ms: u32,
}

#[derive(Clone, Debug, Default)]
pub struct Topology {
    pub cores: Vec<CoreConfig>,
    pub policies: Vec<PolicyDesc>,
}

fn read_trimmed(path: &Path) -> Result<String, DriverError> {
    fs::read_to_string(path)
        .map(|s| s.trim().to_string())
        .map_err(|source| DriverError::Io { path: path.to_path_buf(), source })
}

fn read_u32(path: &Path) -> Result<u32, DriverError> {
    let raw = read_trimmed(path)?;
    raw.parse::<u32>().map_err(|_| DriverError::Io {
        path: path.to_path_buf(),
        source: std::io::Error::new(std::io::ErrorKind::InvalidData, raw),
    })
}

fn policy_index(path: &Path) -> Option<usize> {
    path.file_name()?.to_str()?.strip_prefix("policy")?.parse().ok()
}

impl Topology {
    pub fn nr_cpus(&self) -> usize {
        self.cores.len()
    }

    pub fn detect(root: &Path, slack: &SlackOptions) -> Result<Self, DriverError> {
        let cpufreq = root.join("cpufreq");
        let entries = fs::read_dir(&cpufreq)
            .map_err(|source| DriverError::Io { path: cpufreq.clone(), source })?;

        let mut dirs: Vec<(usize, PathBuf)> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter_map(|p| policy_index(&p).map(|i| (i, p)))
            .collect();
        dirs.sort();

        let mut policies = Vec::with_capacity(dirs.len());
        for (id, dir) in dirs {
            policies.push(read_policy(id, &dir)?);
        }

        let nr_cpus = policies
            .iter()
            .flat_map(|p| p.cpus.iter().copied())
            .max()
            .map_or(0, |m| m + 1);

        // MISSING online FILE: EVERYTHING IS ONLINE
        let online = read_trimmed(&root.join("online"))
            .map(|s| parse_cpu_list(&s))
            .ok();

        let mut cores: Vec<CoreConfig> = (0..nr_cpus).map(CoreConfig::new).collect();
        for policy in &policies {
            for &cpu in &policy.cpus {
                let core = &mut cores[cpu];
                core.qos_class = policy.id as u32;
                core.online = online.as_ref().map_or(true, |o| o.contains(&cpu));
                core.slack_enabled = slack.cpus.contains(&cpu);
                core.slack_expiry_ms = slack.expiry_ms;
            }
        }

        Ok(Self { cores, policies })
    }

    pub fn log_summary(&self) {
        for p in &self.policies {
            let cpus: Vec<String> = p.cpus.iter().map(|c| c.to_string()).collect();
            info!(
                "POLICY {}: CPUS [{}] HW {}-{} kHz LIMITS {}-{} kHz CUR {} kHz OPP {}",
                p.id,
                cpus.join(","),
                p.cpuinfo_min_khz,
                p.cpuinfo_max_khz,
                p.min_khz,
                p.max_khz,
                p.cur_khz,
                p.frequencies.len()
            );
        }
        let slack: Vec<String> = self
            .cores
            .iter()
            .filter(|c| c.slack_enabled)
            .map(|c| c.cpu.to_string())
            .collect();
        info!(
            "TOPOLOGY: {} POLICIES ACROSS {} CPUS, SLACK ON [{}]",
            self.policies.len(),
            self.nr_cpus(),
            slack.join(",")
        );
    }
}

fn read_policy(id: usize, dir: &Path) -> Result<PolicyDesc, DriverError> {
    let cpus = parse_cpu_list(&read_trimmed(&dir.join("related_cpus"))?);
    let cpuinfo_min_khz = read_u32(&dir.join("cpuinfo_min_freq"))?;
    let cpuinfo_max_khz = read_u32(&dir.join("cpuinfo_max_freq"))?;
    let min_khz = read_u32(&dir.join("scaling_min_freq")).unwrap_or(cpuinfo_min_khz);
    let max_khz = read_u32(&dir.join("scaling_max_freq")).unwrap_or(cpuinfo_max_khz);
    let cur_khz = read_u32(&dir.join("scaling_cur_freq")).unwrap_or(min_khz);
    let transition_latency_ns = read_u32(&dir.join("cpuinfo_transition_latency"))
        .map(u64::from)
        .unwrap_or(0);

    let listed: Vec<u32> = read_trimmed(&dir.join("scaling_available_frequencies"))
        .map(|s| s.split_whitespace().filter_map(|f| f.parse().ok()).collect())
        .unwrap_or_default();
    let table = FreqTable::new(listed)
        .or_else(|| FreqTable::from_range(cpuinfo_min_khz, cpuinfo_max_khz, SYNTHETIC_STEP_KHZ));
    let frequencies = table.map(|t| t.as_slice().to_vec()).unwrap_or_default();

    Ok(PolicyDesc {
        id,
        cpus,
        cpuinfo_min_khz,
        cpuinfo_max_khz,
        min_khz,
        max_khz,
        cur_khz,
        transition_latency_ns,
        transition_delay_us: None,
        frequencies,
    })
}

// PARSE KERNEL CPU LIST FORMAT: "0,6" or "0-2,6-8" or "3"
pub fn parse_cpu_list(s: &str) -> Vec<CpuId> {
    let mut result = Vec::new();
    for part in s.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        if let Some((start, end)) = part.split_once('-') {
            if let (Ok(s), Ok(e)) = (start.parse::<CpuId>(), end.parse::<CpuId>()) {
                result.extend(s..=e);
            }
        } else if let Ok(cpu) = part.parse::<CpuId>() {
            result.push(cpu);
        }
    }
    result.sort_unstable();
    result.dedup();
    result
}
