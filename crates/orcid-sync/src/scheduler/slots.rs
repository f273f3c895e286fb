//! At-most-one in-flight run per (institution, kind).

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use crate::model::RecordKind;

type SlotKey = (String, RecordKind);

/// Registry of held run slots, shared by every rebuild on a scheduler.
#[derive(Clone, Default)]
pub struct RunSlots {
    held: Arc<Mutex<HashSet<SlotKey>>>,
}

impl RunSlots {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test-and-set. `None` when the slot is already held.
    pub fn try_acquire(&self, ror_id: &str, kind: RecordKind) -> Option<RunSlot> {
        let key = (ror_id.to_string(), kind);
        let mut held = self.held.lock().unwrap_or_else(|e| e.into_inner());
        if !held.insert(key.clone()) {
            return None;
        }
        Some(RunSlot {
            held: Arc::clone(&self.held),
            key,
        })
    }

    pub fn is_held(&self, ror_id: &str, kind: RecordKind) -> bool {
        let held = self.held.lock().unwrap_or_else(|e| e.into_inner());
        held.contains(&(ror_id.to_string(), kind))
    }
}

/// A held slot, released on drop.
pub struct RunSlot {
    held: Arc<Mutex<HashSet<SlotKey>>>,
    key: SlotKey,
}

impl Drop for RunSlot {
    fn drop(&mut self) {
        let mut held = self.held.lock().unwrap_or_else(|e| e.into_inner());
        held.remove(&self.key);
    }
}
