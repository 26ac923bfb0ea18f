// UTILGOV EVENT LOG
// RECORDS GOVERNOR STATS SNAPSHOTS WHILE THE DAEMON RUNS
// PRE-ALLOCATED RING BUFFER. NO HEAP ALLOCATION DURING MONITORING.
// WRAPS AROUND AT CAPACITY -- OLDEST ENTRIES OVERWRITTEN.
// COUNTERS ARE CUMULATIVE; DUMP AND SUMMARY WORK ON DELTAS.

use crate::governor::GovernorStats;

const MAX_SNAPSHOTS: usize = 8192;

#[derive(Clone, Copy, Default)]
pub struct Snapshot {
    pub ts_ns:        u64,
    pub commits:      u64,
    pub fast:         u64,
    pub deferred:     u64,
    pub rate_limited: u64,
    pub rejected:     u64,
    pub errors:       u64,
    pub floor:        u64,
    pub slack:        u64,
}

impl Snapshot {
    fn from_stats(ts_ns: u64, s: &GovernorStats) -> Self {
        Self {
            ts_ns,
            commits: s.commits,
            fast: s.fast_switches,
            deferred: s.deferred_applies,
            rate_limited: s.rate_limited,
            rejected: s.rejected,
            errors: s.driver_errors,
            floor: s.floor_applies,
            slack: s.slack_fires,
        }
    }
}

pub struct EventLog {
    snapshots: Vec<Snapshot>,
    head:      usize,
    len:       usize,
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}

impl EventLog {
    pub fn new() -> Self {
        Self {
            snapshots: vec![Snapshot::default(); MAX_SNAPSHOTS],
            head: 0,
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    // RECORD ONE STATS SNAPSHOT. CALLED ONCE PER SECOND FROM THE DAEMON LOOP.
    // OVERWRITES OLDEST ENTRY WHEN FULL.
    pub fn snapshot(&mut self, stats: &GovernorStats) {
        self.snapshots[self.head] = Snapshot::from_stats(now_ns(), stats);
        self.head = (self.head + 1) % MAX_SNAPSHOTS;
        if self.len < MAX_SNAPSHOTS {
            self.len += 1;
        }
    }

    pub fn latest(&self) -> Option<&Snapshot> {
        if self.len == 0 {
            return None;
        }
        Some(&self.snapshots[(self.head + MAX_SNAPSHOTS - 1) % MAX_SNAPSHOTS])
    }

    // ITERATE SNAPSHOTS IN CHRONOLOGICAL ORDER
    fn iter_chronological(&self) -> impl Iterator<Item = &Snapshot> {
        let start = if self.len < MAX_SNAPSHOTS { 0 } else { self.head };
        (0..self.len).map(move |i| {
            &self.snapshots[(start + i) % MAX_SNAPSHOTS]
        })
    }

    // DUMP THE TIME SERIES (PER-INTERVAL DELTAS) AFTER EXECUTION
    pub fn dump(&self) {
        let mut iter = self.iter_chronological();
        let Some(first) = iter.next() else {
            return;
        };
        let base_ts = first.ts_ns;

        println!("\n{:<10} {:<10} {:<10} {:<10} {:<10} {:<10} {:<10} {:<10} {:<10}",
            "TIME_S", "COMMIT", "FAST", "DEFER", "RATELIM", "REJECT", "ERR", "FLOOR", "SLACK");
        println!("{}", "-".repeat(96));

        let mut prev = *first;
        println!("{:<10.1} {:<10} {:<10} {:<10} {:<10} {:<10} {:<10} {:<10} {:<10}",
            0.0, first.commits, first.fast, first.deferred, first.rate_limited,
            first.rejected, first.errors, first.floor, first.slack);

        for s in iter {
            let elapsed_s = s.ts_ns.saturating_sub(base_ts) as f64 / 1_000_000_000.0;
            println!("{:<10.1} {:<10} {:<10} {:<10} {:<10} {:<10} {:<10} {:<10} {:<10}",
                elapsed_s,
                s.commits.saturating_sub(prev.commits),
                s.fast.saturating_sub(prev.fast),
                s.deferred.saturating_sub(prev.deferred),
                s.rate_limited.saturating_sub(prev.rate_limited),
                s.rejected.saturating_sub(prev.rejected),
                s.errors.saturating_sub(prev.errors),
                s.floor.saturating_sub(prev.floor),
                s.slack.saturating_sub(prev.slack));
            prev = *s;
        }

        if self.len == MAX_SNAPSHOTS {
            println!("\n(RING BUFFER WRAPPED -- SHOWING MOST RECENT {} SNAPSHOTS)", MAX_SNAPSHOTS);
        }
        println!("TOTAL SNAPSHOTS: {}", self.len);
    }

    // SUMMARY STATISTICS
    pub fn summary(&self) {
        if self.len < 2 {
            return;
        }

        let snapshots: Vec<&Snapshot> = self.iter_chronological().collect();
        let (first, last) = (snapshots[0], snapshots[snapshots.len() - 1]);

        let commits = last.commits.saturating_sub(first.commits);
        let fast = last.fast.saturating_sub(first.fast);
        let deferred = last.deferred.saturating_sub(first.deferred);
        let rate_limited = last.rate_limited.saturating_sub(first.rate_limited);
        let rejected = last.rejected.saturating_sub(first.rejected);
        let errors = last.errors.saturating_sub(first.errors);

        let peak = snapshots
            .windows(2)
            .map(|w| w[1].commits.saturating_sub(w[0].commits))
            .max()
            .unwrap_or(0);

        let elapsed_s = last.ts_ns.saturating_sub(first.ts_ns) as f64 / 1_000_000_000.0;

        println!("\n{}", "=".repeat(50));
        println!("UTILGOV SUMMARY");
        println!("{}", "=".repeat(50));
        println!("  TOTAL COMMITS:     {}", commits);
        println!("  FAST / DEFERRED:   {} / {}", fast, deferred);
        println!("  RATE LIMITED:      {}", rate_limited);
        println!("  REJECTED / ERRORS: {} / {}", rejected, errors);
        println!("  PEAK COMMITS/S:    {}", peak);
        if elapsed_s > 0.0 {
            println!("  AVG COMMITS/S:     {:.1}", commits as f64 / elapsed_s);
            let held = rate_limited as f64 / (commits + rate_limited).max(1) as f64 * 100.0;
            println!("  HYSTERESIS HOLD:   {:.1}%", held);
        }
        println!("  FLOOR APPLIES:     {}", last.floor.saturating_sub(first.floor));
        println!("  SLACK FIRES:       {}", last.slack.saturating_sub(first.slack));
        println!("  ELAPSED:           {:.1}s", elapsed_s);
        println!("  SAMPLES:           {}", self.len);
    }
}

pub fn now_ns() -> u64 {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    unsafe {
        libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts);
    }
    (ts.tv_sec as u64) * 1_000_000_000 + (ts.tv_nsec as u64)
}
