// UTILGOV MIN-FLOOR SUBSCRIPTION
// EXTERNAL POLICY SOURCES PUBLISH (CLASS, FLOOR kHz) THROUGH A FloorNotifier.
// LISTENERS REGISTER ONCE; DELIVERY IS SYNCHRONOUS, IN REGISTRATION ORDER.

use std::sync::{Arc, Mutex};

use log::{debug, warn};

use crate::error::GovernorError;
use crate::policy::{lock, PolicyId};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FloorAction {
    // ONE BLOCKING APPLY WAS ISSUED
    Applied { policy: PolicyId, freq_khz: u32 },
    // FLOOR ALREADY SATISFIED, NO HARDWARE CALL
    Compliant,
}

pub trait MinFloorListener: Send + Sync {
    fn min_floor_changed(&self, class: u32, floor_khz: u32) -> Result<FloorAction, GovernorError>;
}

#[derive(Default)]
pub struct FloorNotifier {
    listeners: Mutex<Vec<Arc<dyn MinFloorListener>>>,
}

impl FloorNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, listener: Arc<dyn MinFloorListener>) -> Result<(), GovernorError> {
        let mut listeners = lock(&self.listeners);
        if listeners.iter().any(|l| Arc::ptr_eq(l, &listener)) {
            return Err(GovernorError::AlreadyRegistered);
        }
        listeners.push(listener);
        Ok(())
    }

    pub fn nr_listeners(&self) -> usize {
        lock(&self.listeners).len()
    }

    // NOT RETRIED. A FAILED RESULT IS THE CALLER'S TO REDELIVER.
    pub fn notify(&self, class: u32, floor_khz: u32) -> Vec<Result<FloorAction, GovernorError>> {
        // SNAPSHOT SO A LISTENER MAY REGISTER OTHERS WITHOUT DEADLOCK
        let listeners: Vec<Arc<dyn MinFloorListener>> = lock(&self.listeners).clone();
        listeners
            .iter()
            .map(|l| {
                let res = l.min_floor_changed(class, floor_khz);
                match &res {
                    Ok(action) => debug!("FLOOR CLASS {} -> {} kHz: {:?}", class, floor_khz, action),
                    Err(e) => warn!("FLOOR CLASS {} -> {} kHz REJECTED: {}", class, floor_khz, e),
                }
                res
            })
            .collect()
    }
}
