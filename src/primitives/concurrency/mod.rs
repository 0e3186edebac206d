//! Reader pin tracking for recycling horizons.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::types::EpochId;

/// Multiset of epochs held by live readers.
///
/// Every transaction and explicit reader registers its snapshot epoch here;
/// recycling never frees a block that a pinned epoch could still reach.
#[derive(Clone, Default)]
pub struct EpochPins {
    inner: Arc<Mutex<BTreeMap<EpochId, u32>>>,
}

/// Guard releasing a pin on drop.
pub struct PinGuard {
    pins: EpochPins,
    epoch: EpochId,
}

impl PinGuard {
    /// Epoch held by this pin.
    pub fn epoch(&self) -> EpochId {
        self.epoch
    }
}

impl Drop for PinGuard {
    fn drop(&mut self) {
        self.pins.release(self.epoch);
    }
}

/// Point-in-time view of the pin table.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct PinSnapshot {
    /// Total live pins.
    pub active: u64,
    /// Oldest pinned epoch, if any.
    pub oldest: Option<EpochId>,
    /// Newest pinned epoch, if any.
    pub newest: Option<EpochId>,
}

impl EpochPins {
    /// Creates an empty pin table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Pins `epoch` until the returned guard drops.
    pub fn pin(&self, epoch: EpochId) -> PinGuard {
        let mut map = self.inner.lock();
        let counter = map.entry(epoch).or_insert(0);
        *counter = counter.saturating_add(1);
        drop(map);
        PinGuard {
            pins: self.clone(),
            epoch,
        }
    }

    fn release(&self, epoch: EpochId) {
        let mut map = self.inner.lock();
        if let Some(counter) = map.get_mut(&epoch) {
            if *counter > 1 {
                *counter -= 1;
            } else {
                map.remove(&epoch);
            }
        }
    }

    /// Oldest epoch any live reader holds.
    pub fn oldest(&self) -> Option<EpochId> {
        self.inner.lock().keys().next().copied()
    }

    /// Summary of the pin table.
    pub fn snapshot(&self) -> PinSnapshot {
        let map = self.inner.lock();
        PinSnapshot {
            active: map.values().map(|&count| u64::from(count)).sum(),
            oldest: map.keys().next().copied(),
            newest: map.keys().next_back().copied(),
        }
    }
}
