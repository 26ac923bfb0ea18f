// UTILGOV ERROR TYPES
// EVERY ERROR IS SCOPED TO ONE FREQUENCY DOMAIN. NONE IS FATAL TO THE ENGINE.

use std::path::PathBuf;

use thiserror::Error;

use crate::policy::PolicyId;
use crate::topology::CpuId;

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("sysfs access failed at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed {path}: {detail}")]
    Malformed { path: PathBuf, detail: String },

    #[error("driver has no policy {0}")]
    UnknownPolicy(PolicyId),

    #[error("driver rejected {0} kHz")]
    Rejected(u32),
}

#[derive(Debug, Error)]
pub enum GovernorError {
    #[error("invalid value {value:?} for tunable {name}")]
    InvalidTunable { name: &'static str, value: String },

    #[error("cpu {0} is outside the core registry")]
    InvalidCpu(CpuId),

    #[error("invalid limits: min {min} kHz > max {max} kHz")]
    InvalidLimits { min: u32, max: u32 },

    #[error("policy {0} has an empty frequency table")]
    EmptyFrequencyTable(PolicyId),

    #[error("policy {0} is already initialized")]
    Busy(PolicyId),

    #[error("policy {0} is not initialized")]
    NotInitialized(PolicyId),

    #[error("policy {0} is still running")]
    NotStopped(PolicyId),

    #[error("allocation failed while activating policy {0}")]
    OutOfMemory(PolicyId),

    #[error("no active cpu in min-floor class {0}")]
    FloorClassUnresolved(u32),

    #[error("cpu {0} is not managed by any policy")]
    NotManaged(CpuId),

    #[error("governor is already registered with this floor notifier")]
    AlreadyRegistered,

    #[error("failed to spawn deferred worker for policy {policy}: {source}")]
    WorkerSpawn {
        policy: PolicyId,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Driver(#[from] DriverError),
}
