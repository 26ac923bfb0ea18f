// UTILGOV DISPATCH
// COMMIT A SELECTED TARGET AND HAND IT TO THE HARDWARE.
//
//   FAST      apply_fast INLINE, UNDER THE POLICY SPIN LOCK. NEVER BLOCKS.
//   DEFERRED  RAISE in_flight, try_send ONE SIGNAL TO THE POLICY WORKER.
//             THE WORKER TAKES work_lock, READS THE COMMITTED TARGET AND
//             CALLS apply_blocking. in_flight DROPS ON EVERY EXIT PATH.
//
// THE RESTRICTED CONTEXT NEVER WAITS ON THE WORKER: bounded(1) + try_send.

use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender, TrySendError};
use log::{debug, trace, warn};

use crate::driver::HardwareDriver;
use crate::error::GovernorError;
use crate::policy::{ApplyPath, PolicyCounters, PolicyGroup, PolicyState};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpdateOutcome {
    // CORE HAS NO ACTIVE POLICY HOOK
    NotManaged,
    // RATE-LIMIT WINDOW OPEN OR DEFERRED APPLY IN FLIGHT
    Skipped,
    // HYSTERESIS GATE HELD THE NEW TARGET
    RateLimited,
    // TARGET EQUALS THE COMMITTED ONE
    Unchanged,
    // FAST PATH SWITCHED TO THIS FREQUENCY
    Applied(u32),
    // FAST PATH REFUSED; COMMITTED TARGET STANDS, CURRENT FREQUENCY DOES NOT MOVE
    Rejected,
    // HANDED TO THE DEFERRED WORKER
    Queued(u32),
}

pub(crate) fn commit(
    group: &PolicyGroup,
    state: &mut PolicyState,
    time: u64,
    next: u32,
    driver: &dyn HardwareDriver,
) -> UpdateOutcome {
    if state.limiter.blocked(time, next, state.next_freq) {
        state.selector.invalidate();
        PolicyCounters::bump(&group.counters.rate_limited);
        return UpdateOutcome::RateLimited;
    }
    if state.next_freq == Some(next) {
        return UpdateOutcome::Unchanged;
    }

    state.next_freq = Some(next);
    state.limiter.mark_update(time);
    group.set_enforced_floor(0);
    PolicyCounters::bump(&group.counters.commits);

    match &state.apply {
        ApplyPath::Fast => match driver.apply_fast(group.id(), next) {
            Some(freq) => {
                group.set_cur_khz(freq);
                PolicyCounters::bump(&group.counters.fast_switches);
                trace!("POLICY {}: FAST SWITCH {} kHz", group.id(), freq);
                UpdateOutcome::Applied(freq)
            }
            None => {
                PolicyCounters::bump(&group.counters.rejected);
                UpdateOutcome::Rejected
            }
        },
        ApplyPath::Deferred(tx) => {
            group.set_in_flight(true);
            match tx.try_send(()) {
                Ok(()) | Err(TrySendError::Full(())) => UpdateOutcome::Queued(next),
                Err(TrySendError::Disconnected(())) => {
                    group.set_in_flight(false);
                    UpdateOutcome::NotManaged
                }
            }
        }
        ApplyPath::Detached => UpdateOutcome::NotManaged,
    }
}

// CLEARS in_flight HOWEVER THE ITERATION ENDS
struct InFlight<'a>(&'a PolicyGroup);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.set_in_flight(false);
    }
}

pub(crate) fn spawn_worker(
    group: &Arc<PolicyGroup>,
    driver: &Arc<dyn HardwareDriver>,
) -> Result<Sender<()>, GovernorError> {
    let (tx, rx) = crossbeam_channel::bounded::<()>(1);
    let worker_group = Arc::clone(group);
    let worker_driver = Arc::clone(driver);

    let handle = std::thread::Builder::new()
        .name(format!("utilgov-p{}", group.id()))
        .spawn(move || worker_loop(&worker_group, worker_driver.as_ref(), &rx))
        .map_err(|source| GovernorError::WorkerSpawn { policy: group.id(), source })?;

    group.set_worker(Some(handle));
    debug!("POLICY {}: DEFERRED WORKER STARTED", group.id());
    Ok(tx)
}

// EXITS WHEN EVERY SENDER IS DROPPED (STOP DETACHES THE APPLY PATH).
// SIGNALS STILL BUFFERED AT THAT POINT ARE DRAINED AGAINST AN INACTIVE
// POLICY AND ISSUE NO HARDWARE CALL.
fn worker_loop(group: &PolicyGroup, driver: &dyn HardwareDriver, rx: &Receiver<()>) {
    while rx.recv().is_ok() {
        let _in_flight = InFlight(group);
        if !group.is_active() {
            continue;
        }
        apply_committed(group, driver);
    }
    debug!("POLICY {}: DEFERRED WORKER EXITED", group.id());
}

fn apply_committed(group: &PolicyGroup, driver: &dyn HardwareDriver) {
    let _work = group.work_lock();
    let Some(freq) = group.state.lock().next_freq else {
        return;
    };
    match driver.apply_blocking(group.id(), freq) {
        Ok(applied) => {
            group.set_cur_khz(applied);
            PolicyCounters::bump(&group.counters.deferred_applies);
            trace!("POLICY {}: DEFERRED APPLY {} kHz", group.id(), applied);
        }
        Err(e) => {
            PolicyCounters::bump(&group.counters.driver_errors);
            warn!("POLICY {}: APPLY {} kHz FAILED: {}", group.id(), freq, e);
        }
    }
}
