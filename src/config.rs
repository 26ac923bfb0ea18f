// UTILGOV GOVERNOR CONFIGURATION
// FIXED FOR THE GOVERNOR'S LIFETIME. PER-POLICY DATA COMES FROM PolicyDesc.

use crate::tuning;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GovernorConfig {
    // SCHEDULER TICK. STALENESS AND IOWAIT-BOOST EXPIRY BOTH USE IT.
    pub tick_ns: u64,
    // TRUE: UTILIZATION IS FREQUENCY-INVARIANT, SCALE AGAINST POLICY MAX.
    // FALSE: SCALE AGAINST THE CURRENT FREQUENCY.
    pub scale_invariant: bool,
    // PLATFORM OVERRIDE: NEVER INJECT AN IOWAIT BOOST
    pub suppress_iowait_boost: bool,
    // FALSE: EVERY POLICY SHARES ONE GLOBAL TunableSet
    pub per_policy_tunables: bool,
    // (UP, DOWN) MICROSECONDS. OVERRIDES BOTH PLATFORM DELAYS AND LATENCY DEFAULTS.
    pub rate_limits_us: Option<(u32, u32)>,
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            tick_ns: tuning::DEFAULT_TICK_NS,
            scale_invariant: false,
            suppress_iowait_boost: false,
            per_policy_tunables: false,
            rate_limits_us: None,
        }
    }
}
