//! Fixed-capacity table of the operations currently open on the TA.

use log::{debug, warn};
use std::sync::{Mutex, MutexGuard};
use tkm_common::{km_err, Error};
use tkm_wire::{keymint::Algorithm, OpHandle};

/// Client-side record of an open operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Operation {
    pub handle: OpHandle,
    /// Key type, which governs the output buffer sizes needed.
    pub algorithm: Algorithm,
    /// Upper bound on the output `finish` produces beyond any buffered input.
    pub final_length: usize,
}

/// Reference to a live slot in an [`OperationTable`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SlotRef {
    index: usize,
    op: Operation,
}

impl SlotRef {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn operation(&self) -> &Operation {
        &self.op
    }

    pub fn handle(&self) -> OpHandle {
        self.op.handle
    }
}

/// Table of open operations.
///
/// The table is safe to use from several threads at once for different handles.  Calls for the
/// same handle must not overlap; the table does not serialize them.
#[derive(Debug)]
pub struct OperationTable {
    slots: Mutex<Vec<Option<Operation>>>,
}

impl OperationTable {
    /// Build a table with room for `capacity` concurrent operations.
    pub fn new(capacity: usize) -> Self {
        Self { slots: Mutex::new(vec![None; capacity]) }
    }

    fn slots(&self) -> MutexGuard<Vec<Option<Operation>>> {
        // Every update to the slots is a single assignment, so the contents are consistent even
        // if another thread panicked while holding the lock.
        self.slots.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn capacity(&self) -> usize {
        self.slots().len()
    }

    /// Number of live slots.
    pub fn live(&self) -> usize {
        self.slots().iter().filter(|s| s.is_some()).count()
    }

    /// Record a new operation in the first free slot.
    pub fn allocate(&self, op: Operation) -> Result<SlotRef, Error> {
        let mut slots = self.slots();
        if slots.iter().flatten().any(|s| s.handle == op.handle) {
            return Err(km_err!(
                InvalidOperationHandle,
                "handle {:#x} is already in use",
                op.handle.0
            ));
        }
        let index = slots.iter().position(|s| s.is_none()).ok_or_else(|| {
            km_err!(TooManyOperations, "all {} operation slots in use", slots.len())
        })?;
        slots[index] = Some(op);
        debug!("operation {:#x} ({:?}) in slot {}", op.handle.0, op.algorithm, index);
        Ok(SlotRef { index, op })
    }

    /// Find the live slot holding `handle`.
    pub fn lookup(&self, handle: OpHandle) -> Option<SlotRef> {
        self.slots().iter().enumerate().find_map(|(index, s)| match s {
            Some(op) if op.handle == handle => Some(SlotRef { index, op: *op }),
            _ => None,
        })
    }

    /// Free the slot, unless it has already been released.
    pub fn release(&self, slot: &SlotRef) {
        let mut slots = self.slots();
        match slots.get_mut(slot.index) {
            Some(s) if s.map(|op| op.handle) == Some(slot.op.handle) => {
                *s = None;
                debug!("operation {:#x} released from slot {}", slot.op.handle.0, slot.index);
            }
            _ => warn!("operation {:#x} already released", slot.op.handle.0),
        }
    }
}
