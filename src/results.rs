//! # Response Assembly
//!
//! Per-item results accumulate out of order — ingest failures land first,
//! prerequisite failures next, replication results last — but the response
//! must line up positionally with the request. [`ResponseSlots`] is the
//! fan-in point: a fixed-size array of write-once slots, one per original
//! item, claimed from any stage and drained exactly once at the end.

use std::sync::Mutex;

use crate::error::{Error, Result};
use crate::types::ItemResult;

/// A fixed array of write-once result slots, indexed by the item's position
/// in the original batch. Shared across pipeline stages behind an `Arc`.
#[derive(Debug)]
pub struct ResponseSlots {
    slots: Mutex<Vec<Option<ItemResult>>>,
}

impl ResponseSlots {
    /// Creates `len` empty slots. The count never changes afterwards: items
    /// dropped or failed mid-pipeline keep their position.
    pub fn new(len: usize) -> Self {
        Self {
            slots: Mutex::new(vec![None; len]),
        }
    }

    /// Number of slots.
    pub fn len(&self) -> usize {
        match self.slots.lock() {
            Ok(slots) => slots.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    /// Whether there are no slots at all.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Claims slot `index` with `result`. The first claim wins; a second
    /// claim for the same slot is ignored and reported as `false`. Earlier
    /// pipeline stages run before later ones, so the first claim is always
    /// the authoritative outcome for that item.
    pub fn claim(&self, index: usize, result: ItemResult) -> bool {
        let mut slots = match self.slots.lock() {
            Ok(slots) => slots,
            Err(poisoned) => poisoned.into_inner(),
        };
        match slots.get_mut(index) {
            Some(slot @ None) => {
                *slot = Some(result);
                true
            }
            _ => false,
        }
    }

    /// Whether slot `index` has been claimed.
    pub fn is_claimed(&self, index: usize) -> bool {
        let slots = match self.slots.lock() {
            Ok(slots) => slots,
            Err(poisoned) => poisoned.into_inner(),
        };
        matches!(slots.get(index), Some(Some(_)))
    }

    /// Drains the slots into the positional result vector. Every slot must
    /// have been claimed by now; an unfilled slot means a pipeline stage
    /// dropped an item without recording its outcome, which is a bug.
    pub fn finish(&self) -> Result<Vec<ItemResult>> {
        let mut slots = match self.slots.lock() {
            Ok(slots) => slots,
            Err(poisoned) => poisoned.into_inner(),
        };
        slots
            .drain(..)
            .enumerate()
            .map(|(index, slot)| {
                slot.ok_or_else(|| {
                    Error::internal(format!("response slot {index} was never filled"))
                })
            })
            .collect()
    }
}

// =============================================================================
// Tests
// =============================================================================
