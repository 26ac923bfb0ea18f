// UTILGOV TUNING CONSTANTS AND PURE CONTROL-LAW HELPERS
// ZERO STATE, ZERO I/O. SHARED BY THE ENGINE, THE DAEMON AND tests/tuning.rs

// SCHEDULER TICK
// A CORE WHOSE LAST SAMPLE IS OLDER THAN ONE TICK IS PRESUMED IDLE.

pub const DEFAULT_TICK_NS: u64 = 4_000_000;   // 4MS (HZ=250)

pub const NSEC_PER_USEC: u64 = 1_000;
pub const NSEC_PER_MSEC: u64 = 1_000_000;

// CAPACITY REFERENCE FOR SOURCES THAT DO NOT KNOW BETTER

pub const CAPACITY_SCALE: u64 = 1024;

// RATE LIMIT DEFAULTS
// DERIVED FROM THE DRIVER'S TRANSITION LATENCY WHEN THE POLICY CARRIES NO
// EXPLICIT TRANSITION DELAYS. DOWN IS ALWAYS SLOWER THAN UP.

pub const LATENCY_MULTIPLIER: u32 = 1_000;
pub const MAX_UP_RATE_LIMIT_US: u32 = 2_000;   // 2MS CEILING ON DERIVED UP DELAY
pub const DOWN_RATE_RATIO: u32 = 10;           // DOWN = 10X UP

// SLACK TIMER

pub const DEFAULT_SLACK_EXPIRY_MS: u32 = 70;

// TIPPING POINT: f + f/4
// PLACES THE "FULL UTILIZATION" CROSSOVER AT 80% OF CAPACITY.

pub fn tipping_point(freq_khz: u32) -> u64 {
    let f = freq_khz as u64;
    f + (f >> 2)
}

// PROPORTIONAL CONTROL LAW: tipping_point(f_ref) * util / capacity.
// CAPACITY 0 IS TREATED AS 1 SO A BROKEN SOURCE CANNOT DIVIDE BY ZERO.
// SATURATES AT u32::MAX; RESOLUTION CLAMPS INTO THE POLICY RANGE LATER.

pub fn raw_target(reference_khz: u32, util: u64, capacity: u64) -> u32 {
    let raw = tipping_point(reference_khz).saturating_mul(util) / capacity.max(1);
    raw.min(u32::MAX as u64) as u32
}

// DEFAULT RATE LIMITS (MICROSECONDS) FROM TRANSITION LATENCY

pub fn default_rate_limits_us(transition_latency_ns: u64) -> (u32, u32) {
    let lat_us = transition_latency_ns / NSEC_PER_USEC;
    let up = if lat_us == 0 {
        LATENCY_MULTIPLIER
    } else {
        (lat_us.saturating_mul(LATENCY_MULTIPLIER as u64))
            .min(MAX_UP_RATE_LIMIT_US as u64) as u32
    };
    (up, up.saturating_mul(DOWN_RATE_RATIO))
}

// MINIMUM DELAY GATES ANY RECOMPUTATION REGARDLESS OF DIRECTION

pub fn min_rate_limit_ns(up_ns: u64, down_ns: u64) -> u64 {
    up_ns.min(down_ns)
}

// SLACK UTILIZATION FLOOR
// SMALLEST UTILIZATION THAT WOULD ASK FOR MORE THAN policy_min, MINUS THE
// TIPPING-POINT HEADROOM. BELOW IT THE CORE ALREADY SITS AT THE FLOOR.

pub fn slack_min_util(capacity: u64, policy_min_khz: u32, policy_max_khz: u32) -> u64 {
    let min_cap = capacity * policy_min_khz as u64 / (policy_max_khz as u64).max(1);
    min_cap * 4 / 5 + 1
}
