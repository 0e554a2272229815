//! Per-slot credit deduplication.
//!
//! Several code paths can conclude "this miner was online this slot" (the
//! first poll, the ViaBTC re-poll, the GRACE branch). The coordinator owns
//! the process-local set of already-credited miner ids for the current
//! slot and hands each id out exactly once; the advisory slot lock in the
//! key-value store extends the guarantee across processes best-effort.

use crate::slot::Slot;
use std::collections::HashSet;
use tokio::sync::Mutex;
use tracing::debug;

#[derive(Default)]
struct Window {
    slot_iso: String,
    credited: HashSet<String>,
}

#[derive(Default)]
pub struct SlotCoordinator {
    window: Mutex<Window>,
}

impl SlotCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Filter out ids already credited in this slot and record the rest.
    /// The window rotates automatically when the slot advances.
    pub async fn claim(&self, slot: Slot, ids: Vec<String>) -> Vec<String> {
        let mut window = self.window.lock().await;
        let iso = slot.iso();
        if window.slot_iso != iso {
            debug!(slot = %iso, "rotating credit window");
            window.slot_iso = iso;
            window.credited.clear();
        }
        ids.into_iter()
            .filter(|id| window.credited.insert(id.clone()))
            .collect()
    }
}
