// UTILGOV -- UTILIZATION-DRIVEN CPU FREQUENCY GOVERNOR
// DECISION ENGINE: SAMPLE INTAKE, FREQUENCY SELECTION, RATE LIMITING,
// SHARED-DOMAIN AGGREGATION, SLACK TIMER, MIN-FLOOR ENFORCEMENT.
//
// THE BINARY (src/main.rs) WIRES THIS ENGINE TO CPUFREQ SYSFS AND /proc/stat.
// EVERYTHING IN HERE RUNS OFFLINE AGAINST MOCK SOURCES AND DRIVERS.

pub mod aggregate;
pub mod config;
pub mod dispatch;
pub mod driver;
pub mod error;
pub mod event;
pub mod freq;
pub mod governor;
pub mod iowait;
pub mod policy;
pub mod qos;
pub mod ratelimit;
pub mod sample;
pub mod slack;
pub mod source;
pub mod topology;
pub mod tunables;
pub mod tuning;

pub use config::GovernorConfig;
pub use driver::HardwareDriver;
pub use error::{DriverError, GovernorError};
pub use governor::{Governor, GovernorStats, PolicySnapshot, UpdateOutcome};
pub use policy::PolicyId;
pub use qos::{FloorAction, FloorNotifier, MinFloorListener};
pub use sample::{UpdateFlags, UtilSample};
pub use slack::IdleEvent;
pub use source::UtilizationSource;
pub use topology::{CoreConfig, CpuId, PolicyDesc, Topology};
pub use tunables::TunableSet;
