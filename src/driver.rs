// UTILGOV HARDWARE DRIVER BOUNDARY
// resolve:        RAW kHz -> SUPPORTED kHz WITHIN POLICY LIMITS. NEVER BLOCKS.
// apply_fast:     OPTIONAL NON-BLOCKING SWITCH. NONE = REJECTED.
// apply_blocking: MAY SLEEP. ONLY EVER CALLED FROM WORKER / CONTROL CONTEXT.
//
// SysfsDriver DRIVES scaling_setspeed UNDER THE "userspace" GOVERNOR.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};

use crate::error::{DriverError, GovernorError};
use crate::freq::FreqTable;
use crate::policy::PolicyId;
use crate::topology::PolicyDesc;

pub trait HardwareDriver: Send + Sync {
    fn resolve(&self, policy: PolicyId, target_khz: u32, min_khz: u32, max_khz: u32) -> u32;

    fn fast_switch_capable(&self, _policy: PolicyId) -> bool {
        false
    }

    fn apply_fast(&self, _policy: PolicyId, _freq_khz: u32) -> Option<u32> {
        None
    }

    fn apply_blocking(&self, policy: PolicyId, freq_khz: u32) -> Result<u32, DriverError>;
}

const USERSPACE_GOVERNOR: &str = "userspace";

struct SysfsPolicy {
    dir: PathBuf,
    table: FreqTable,
}

pub struct SysfsDriver {
    policies: HashMap<PolicyId, SysfsPolicy>,
    dry_run: bool,
}

fn write_attr(path: &Path, value: &str) -> Result<(), DriverError> {
    fs::write(path, value).map_err(|source| DriverError::Io { path: path.to_path_buf(), source })
}

fn read_attr(path: &Path) -> Result<String, DriverError> {
    fs::read_to_string(path)
        .map(|s| s.trim().to_string())
        .map_err(|source| DriverError::Io { path: path.to_path_buf(), source })
}

impl SysfsDriver {
    pub fn new(root: &Path, descs: &[PolicyDesc], dry_run: bool) -> Result<Self, GovernorError> {
        let mut policies = HashMap::with_capacity(descs.len());
        for desc in descs {
            let id = PolicyId(desc.id);
            let table = FreqTable::new(desc.frequencies.clone())
                .ok_or(GovernorError::EmptyFrequencyTable(id))?;
            let dir = root.join("cpufreq").join(format!("policy{}", desc.id));
            policies.insert(id, SysfsPolicy { dir, table });
        }
        Ok(Self { policies, dry_run })
    }

    pub fn table(&self, policy: PolicyId) -> Option<&FreqTable> {
        self.policies.get(&policy).map(|p| &p.table)
    }

    fn policy(&self, id: PolicyId) -> Result<&SysfsPolicy, DriverError> {
        self.policies.get(&id).ok_or(DriverError::UnknownPolicy(id))
    }

    pub fn current_governor(&self, id: PolicyId) -> Result<String, DriverError> {
        read_attr(&self.policy(id)?.dir.join("scaling_governor"))
    }

    // SWITCH EVERY POLICY TO THE USERSPACE GOVERNOR. RETURNS WHAT WAS THERE.
    pub fn take_over(&self) -> Result<Vec<(PolicyId, String)>, DriverError> {
        let mut ids: Vec<PolicyId> = self.policies.keys().copied().collect();
        ids.sort();
        let mut previous = Vec::with_capacity(ids.len());
        for id in ids {
            let prev = self.current_governor(id)?;
            if prev != USERSPACE_GOVERNOR {
                write_attr(&self.policy(id)?.dir.join("scaling_governor"), USERSPACE_GOVERNOR)?;
                info!("POLICY {}: GOVERNOR {} -> {}", id, prev, USERSPACE_GOVERNOR);
            }
            previous.push((id, prev));
        }
        Ok(previous)
    }

    pub fn restore(&self, previous: &[(PolicyId, String)]) {
        for (id, governor) in previous {
            let res = self
                .policy(*id)
                .and_then(|p| write_attr(&p.dir.join("scaling_governor"), governor));
            match res {
                Ok(()) => info!("POLICY {}: GOVERNOR RESTORED TO {}", id, governor),
                Err(e) => warn!("POLICY {}: RESTORE FAILED: {}", id, e),
            }
        }
    }

    // (scaling_min_freq, scaling_max_freq) AS CURRENTLY PUBLISHED
    pub fn read_limits(&self, id: PolicyId) -> Result<(u32, u32), DriverError> {
        let dir = &self.policy(id)?.dir;
        let parse = |name: &str| -> Result<u32, DriverError> {
            let path = dir.join(name);
            let raw = read_attr(&path)?;
            raw.parse().map_err(|_| DriverError::Io {
                path,
                source: std::io::Error::new(std::io::ErrorKind::InvalidData, raw),
            })
        };
        Ok((parse("scaling_min_freq")?, parse("scaling_max_freq")?))
    }
}

impl HardwareDriver for SysfsDriver {
    fn resolve(&self, policy: PolicyId, target_khz: u32, min_khz: u32, max_khz: u32) -> u32 {
        match self.policies.get(&policy) {
            Some(p) => p.table.resolve(target_khz, min_khz, max_khz),
            None => target_khz.clamp(min_khz, max_khz.max(min_khz)),
        }
    }

    fn apply_blocking(&self, policy: PolicyId, freq_khz: u32) -> Result<u32, DriverError> {
        let p = self.policy(policy)?;
        if self.dry_run {
            debug!("POLICY {}: DRY RUN SETSPEED {} kHz", policy, freq_khz);
            return Ok(freq_khz);
        }
        write_attr(&p.dir.join("scaling_setspeed"), &freq_khz.to_string())?;
        Ok(freq_khz)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn desc(id: usize) -> PolicyDesc {
        PolicyDesc {
            id,
            cpus: vec![0],
            cpuinfo_min_khz: 500_000,
            cpuinfo_max_khz: 1_500_000,
            min_khz: 500_000,
            max_khz: 1_500_000,
            cur_khz: 500_000,
            transition_latency_ns: 0,
            transition_delay_us: None,
            frequencies: vec![500_000, 1_000_000, 1_500_000],
        }
    }

    fn fake_root(id: usize) -> tempfile::TempDir {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("cpufreq").join(format!("policy{}", id));
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("scaling_governor"), "schedutil\n").unwrap();
        fs::write(dir.join("scaling_setspeed"), "<unsupported>\n").unwrap();
        fs::write(dir.join("scaling_min_freq"), "500000\n").unwrap();
        fs::write(dir.join("scaling_max_freq"), "1000000\n").unwrap();
        tmp
    }

    #[test]
    fn empty_table_rejected() {
        let mut d = desc(0);
        d.frequencies.clear();
        let err = SysfsDriver::new(Path::new("/nonexistent"), &[d], true).err().unwrap();
        assert!(matches!(err, GovernorError::EmptyFrequencyTable(PolicyId(0))));
    }

    #[test]
    fn resolve_uses_table() {
        let drv = SysfsDriver::new(Path::new("/nonexistent"), &[desc(0)], true).unwrap();
        assert_eq!(drv.resolve(PolicyId(0), 600_000, 500_000, 1_500_000), 1_000_000);
        assert_eq!(drv.resolve(PolicyId(0), 600_000, 500_000, 800_000), 800_000);
    }

    #[test]
    fn apply_writes_setspeed() {
        let tmp = fake_root(1);
        let drv = SysfsDriver::new(tmp.path(), &[desc(1)], false).unwrap();
        assert_eq!(drv.apply_blocking(PolicyId(1), 1_000_000).unwrap(), 1_000_000);
        let written = fs::read_to_string(tmp.path().join("cpufreq/policy1/scaling_setspeed")).unwrap();
        assert_eq!(written, "1000000");
    }

    #[test]
    fn unknown_policy_errors() {
        let drv = SysfsDriver::new(Path::new("/nonexistent"), &[desc(0)], true).unwrap();
        assert!(matches!(
            drv.apply_blocking(PolicyId(9), 1),
            Err(DriverError::UnknownPolicy(PolicyId(9)))
        ));
    }

    #[test]
    fn take_over_and_restore() {
        let tmp = fake_root(0);
        let drv = SysfsDriver::new(tmp.path(), &[desc(0)], false).unwrap();
        let prev = drv.take_over().unwrap();
        assert_eq!(prev, vec![(PolicyId(0), "schedutil".to_string())]);
        assert_eq!(drv.current_governor(PolicyId(0)).unwrap(), "userspace");
        drv.restore(&prev);
        assert_eq!(drv.current_governor(PolicyId(0)).unwrap(), "schedutil");
    }

    #[test]
    fn limits_read_back() {
        let tmp = fake_root(0);
        let drv = SysfsDriver::new(tmp.path(), &[desc(0)], false).unwrap();
        assert_eq!(drv.read_limits(PolicyId(0)).unwrap(), (500_000, 1_000_000));
    }
}
