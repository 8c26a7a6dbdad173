use log::debug;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::oneshot;

use crate::models::filter::FilterId;

struct WorkerSlot {
    filter_id: FilterId,
    generation: u64,
    stop: oneshot::Sender<()>,
}

/// Claim on a monitored address, held by exactly one monitor task
#[derive(Debug)]
pub struct WorkerTicket {
    pub address: Ipv4Addr,
    pub filter_id: FilterId,
    pub generation: u64,
    /// Resolves when the slot is cancelled
    pub stop: oneshot::Receiver<()>,
}

/// In-flight monitor workers keyed by the address each one watches.
///
/// Every method takes the lock for a single map operation and never across
/// an await point or external command. Generations are unique for the life of
/// the registry, so a slot can only be released by the worker that claimed it.
pub struct WorkerRegistry {
    slots: Mutex<HashMap<Ipv4Addr, WorkerSlot>>,
    next_generation: AtomicU64,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            next_generation: AtomicU64::new(1),
        }
    }

    /// Claim `address` for a new worker, or `None` if one is already running
    pub fn try_claim(&self, address: Ipv4Addr, filter_id: FilterId) -> Option<WorkerTicket> {
        let mut slots = self.slots.lock();
        if slots.contains_key(&address) {
            return None;
        }

        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst);
        let (stop_tx, stop_rx) = oneshot::channel();
        slots.insert(
            address,
            WorkerSlot {
                filter_id,
                generation,
                stop: stop_tx,
            },
        );

        Some(WorkerTicket {
            address,
            filter_id,
            generation,
            stop: stop_rx,
        })
    }

    /// Remove the caller's own slot. Returns `false` if the slot was already
    /// cancelled or now belongs to another generation.
    pub fn release(&self, address: Ipv4Addr, generation: u64) -> bool {
        let mut slots = self.slots.lock();
        match slots.get(&address) {
            Some(slot) if slot.generation == generation => {
                slots.remove(&address);
                true
            }
            _ => false,
        }
    }

    /// Signal the worker owning `address` to stop. No-op when none runs.
    pub fn cancel(&self, address: Ipv4Addr) -> bool {
        let slot = self.slots.lock().remove(&address);
        match slot {
            Some(slot) => {
                debug!(
                    "Cancelling monitor for {} (filter {}, generation {})",
                    address, slot.filter_id, slot.generation
                );
                // the worker may have exited between its last check and now
                let _ = slot.stop.send(());
                true
            }
            None => false,
        }
    }

    /// Cancel every worker, returning how many were signalled
    pub fn cancel_all(&self) -> usize {
        let slots: Vec<WorkerSlot> = self.slots.lock().drain().map(|(_, slot)| slot).collect();
        let count = slots.len();
        for slot in slots {
            let _ = slot.stop.send(());
        }
        count
    }

    /// Whether `generation` still holds the slot for `address`
    pub fn owns(&self, address: Ipv4Addr, generation: u64) -> bool {
        self.slots
            .lock()
            .get(&address)
            .map_or(false, |slot| slot.generation == generation)
    }

    pub fn is_running(&self, address: Ipv4Addr) -> bool {
        self.slots.lock().contains_key(&address)
    }

    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }
}

impl Default for WorkerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
