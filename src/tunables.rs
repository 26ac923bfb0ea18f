// UTILGOV TUNABLE SET
// UP/DOWN RATE LIMITS IN MICROSECONDS. ONE SET PER POLICY, OR ONE GLOBAL SET
// SHARED BY EVERY POLICY WHEN THE PLATFORM HAS NO PER-POLICY GOVERNOR DATA.
// EVERY WRITE PROPAGATES TO ALL ATTACHED POLICIES.

use std::sync::{Arc, Mutex, Weak};

use log::debug;

use crate::error::GovernorError;
use crate::policy::{lock, PolicyGroup, PolicyId};
use crate::tuning;

#[derive(Debug)]
struct Inner {
    up_rate_limit_us: u32,
    down_rate_limit_us: u32,
    policies: Vec<Weak<PolicyGroup>>,
}

#[derive(Debug)]
pub struct TunableSet {
    inner: Mutex<Inner>,
}

// DECIMAL, OPTIONAL SURROUNDING WHITESPACE (SYSFS-STYLE "2000\n")
fn parse_us(name: &'static str, buf: &str) -> Result<u32, GovernorError> {
    buf.trim().parse::<u32>().map_err(|_| GovernorError::InvalidTunable {
        name,
        value: buf.to_string(),
    })
}

impl TunableSet {
    pub fn new(up_rate_limit_us: u32, down_rate_limit_us: u32) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Inner {
                up_rate_limit_us,
                down_rate_limit_us,
                policies: Vec::new(),
            }),
        })
    }

    pub fn up_rate_limit_us(&self) -> u32 {
        lock(&self.inner).up_rate_limit_us
    }

    pub fn down_rate_limit_us(&self) -> u32 {
        lock(&self.inner).down_rate_limit_us
    }

    pub fn rate_limits_us(&self) -> (u32, u32) {
        let inner = lock(&self.inner);
        (inner.up_rate_limit_us, inner.down_rate_limit_us)
    }

    pub fn store_up_rate_limit_us(&self, buf: &str) -> Result<(), GovernorError> {
        let up = parse_us("up_rate_limit_us", buf)?;
        let mut inner = lock(&self.inner);
        inner.up_rate_limit_us = up;
        Self::propagate(&mut inner);
        Ok(())
    }

    pub fn store_down_rate_limit_us(&self, buf: &str) -> Result<(), GovernorError> {
        let down = parse_us("down_rate_limit_us", buf)?;
        let mut inner = lock(&self.inner);
        inner.down_rate_limit_us = down;
        Self::propagate(&mut inner);
        Ok(())
    }

    pub fn set_rate_limits_us(&self, up_us: u32, down_us: u32) {
        let mut inner = lock(&self.inner);
        inner.up_rate_limit_us = up_us;
        inner.down_rate_limit_us = down_us;
        Self::propagate(&mut inner);
    }

    pub fn set_rate_limits_ms(&self, up_ms: u32, down_ms: u32) {
        let per_ms = (tuning::NSEC_PER_MSEC / tuning::NSEC_PER_USEC) as u32;
        self.set_rate_limits_us(up_ms.saturating_mul(per_ms), down_ms.saturating_mul(per_ms));
    }

    pub fn nr_policies(&self) -> usize {
        lock(&self.inner).policies.iter().filter(|w| w.strong_count() > 0).count()
    }

    pub(crate) fn attach(&self, policy: &Arc<PolicyGroup>) {
        lock(&self.inner).policies.push(Arc::downgrade(policy));
    }

    // RETURNS HOW MANY POLICIES REMAIN ATTACHED
    pub(crate) fn detach(&self, id: PolicyId) -> usize {
        let mut inner = lock(&self.inner);
        inner.policies.retain(|w| w.upgrade().map_or(false, |p| p.id() != id));
        inner.policies.len()
    }

    fn propagate(inner: &mut Inner) {
        inner.policies.retain(|w| w.strong_count() > 0);
        for policy in inner.policies.iter().filter_map(Weak::upgrade) {
            policy.set_rate_limits_us(inner.up_rate_limit_us, inner.down_rate_limit_us);
            debug!(
                "POLICY {}: RATE LIMITS UP={}us DOWN={}us",
                policy.id(),
                inner.up_rate_limit_us,
                inner.down_rate_limit_us
            );
        }
    }
}
