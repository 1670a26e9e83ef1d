//! Per-beneficiary serialisation of financial mutations.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use earmark_protocol::BeneficiaryId;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type Slots = Arc<Mutex<HashMap<BeneficiaryId, Arc<AsyncMutex<()>>>>>;

/// One async mutex per beneficiary id, created on first use and dropped
/// once nobody holds or waits for it.
///
/// Holding the guard for an id excludes every other donate, submit, verify,
/// reject, or release evaluation on that id. Different ids never contend.
#[derive(Debug, Default, Clone)]
pub struct KeyedLocks {
    slots: Slots,
}

/// Exclusive hold on one id. Released on drop.
pub struct KeyGuard {
    // Field order matters: the mutex guard must go before the slot.
    _guard: OwnedMutexGuard<()>,
    _slot: SlotRef,
}

/// A counted reference to an id's slot. The last one out removes the slot.
struct SlotRef {
    id: BeneficiaryId,
    slots: Slots,
    slot: Option<Arc<AsyncMutex<()>>>,
}

impl Drop for SlotRef {
    fn drop(&mut self) {
        let mut slots = lock_map(&self.slots);
        self.slot.take();
        if slots
            .get(&self.id)
            .is_some_and(|slot| Arc::strong_count(slot) == 1)
        {
            slots.remove(&self.id);
        }
    }
}

fn lock_map(slots: &Slots) -> MutexGuard<'_, HashMap<BeneficiaryId, Arc<AsyncMutex<()>>>> {
    slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, id: BeneficiaryId) -> KeyGuard {
        let (slot, mutex) = {
            let mut slots = lock_map(&self.slots);
            let mutex = slots.entry(id).or_default().clone();
            let slot = SlotRef {
                id,
                slots: self.slots.clone(),
                slot: Some(mutex.clone()),
            };
            (slot, mutex)
        };
        KeyGuard {
            _guard: mutex.lock_owned().await,
            _slot: slot,
        }
    }

    /// Number of ids currently held or waited on.
    #[cfg(test)]
    pub fn len(&self) -> usize {
        lock_map(&self.slots).len()
    }
}
