// UTILGOV SLACK TIMER
// PER-CORE ONE-SHOT DEADLINE ARMED ON DEEP-IDLE ENTRY WHEN THE CORE STILL
// CARRIES UTILIZATION ABOVE ITS FLOOR AND EXPECTS TO SLEEP PAST THE EXPIRY.
// FIRING ONLY OPENS A RE-EVALUATION OPPORTUNITY. NO DECISION LOGIC HERE.
//
// THE DEADLINE IS A PLAIN TIMESTAMP. THE OWNER POLLS expire() FROM ITS OWN
// LOOP; CANCEL IS CLEARING THE DEADLINE.

use crate::tuning;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IdleEvent {
    // ABOUT TO ENTER DEEP IDLE, PREDICTED SLEEP LENGTH
    EnterPrepare { sleep_ns: u64 },
    // ENTERED DEEP IDLE
    Enter { sleep_ns: u64 },
    // LEFT DEEP IDLE
    ExitPost,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SlackAction {
    Armed(u64),
    Cancelled,
    Unchanged,
}

#[derive(Clone, Debug)]
pub struct SlackState {
    min_util: u64,
    enabled: bool,
    started: bool,
    expiry_ns: u64,
    deadline: Option<u64>,
}

impl SlackState {
    pub fn new(enabled: bool, expiry_ms: u32) -> Self {
        Self {
            min_util: u64::MAX,
            enabled,
            started: false,
            expiry_ns: expiry_ms as u64 * tuning::NSEC_PER_MSEC,
            deadline: None,
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn min_util(&self) -> u64 {
        self.min_util
    }

    pub fn expiry_ns(&self) -> u64 {
        self.expiry_ns
    }

    pub fn pending(&self) -> Option<u64> {
        self.deadline
    }

    // NO TIMER UNTIL THE FIRST limits() PUBLISHES A FLOOR
    pub fn start(&mut self) {
        if !self.enabled {
            return;
        }
        self.min_util = u64::MAX;
        self.deadline = None;
        self.started = true;
    }

    pub fn stop(&mut self) -> bool {
        let had = self.deadline.take().is_some();
        self.started = false;
        had
    }

    pub fn set_min(&mut self, min_util: u64) {
        self.min_util = min_util;
    }

    pub fn need_timer(&self, util: u64, sleep_ns: u64, boosted: bool) -> bool {
        self.enabled
            && self.started
            && !boosted
            && util > self.min_util
            && sleep_ns > self.expiry_ns
    }

    pub fn on_event(&mut self, now: u64, event: IdleEvent, util: u64, boosted: bool) -> SlackAction {
        if !self.started {
            return SlackAction::Unchanged;
        }
        match event {
            IdleEvent::EnterPrepare { sleep_ns } | IdleEvent::Enter { sleep_ns } => {
                if self.need_timer(util, sleep_ns, boosted) {
                    let at = now.saturating_add(self.expiry_ns);
                    self.deadline = Some(at);
                    SlackAction::Armed(at)
                } else if self.deadline.take().is_some() {
                    SlackAction::Cancelled
                } else {
                    SlackAction::Unchanged
                }
            }
            IdleEvent::ExitPost => {
                if self.deadline.take().is_some() {
                    SlackAction::Cancelled
                } else {
                    SlackAction::Unchanged
                }
            }
        }
    }

    // ONE-SHOT: TRUE EXACTLY ONCE WHEN THE DEADLINE HAS PASSED
    pub fn expire(&mut self, now: u64) -> bool {
        match self.deadline {
            Some(at) if now >= at => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }
}
