//! Child Slot Table
//!
//! Fixed-capacity registry of the children this layer created. It is the
//! only owner of their process handles: a handle is closed when its slot is
//! released and no waiter still holds a clone of it.
//!
//! ```text
//!   Free ──reserve──▶ Reserved ──populate──▶ Live { pid, handle }
//!    ▲                   │                        │
//!    └──── dropped ──────┘◀──────── release ──────┘
//! ```

use std::sync::Arc;

use spin::Mutex;

use crate::compat::{Pid, ANY_CHILD};
use crate::{ProcError, Result};

/// Index of a slot in the table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotId(usize);

impl SlotId {
    /// Raw index
    pub fn index(self) -> usize {
        self.0
    }
}

enum SlotState<H> {
    Free,
    Reserved,
    Live { pid: Pid, handle: Arc<H> },
}

impl<H> SlotState<H> {
    fn is_free(&self) -> bool {
        matches!(self, SlotState::Free)
    }
}

/// Snapshot of a live slot
///
/// Holds its own reference to the handle, so the process handle stays open
/// while the snapshot exists even if the slot is released meanwhile.
#[derive(Debug)]
pub struct LiveChild<H> {
    slot: SlotId,
    pid: Pid,
    handle: Arc<H>,
}

impl<H> Clone for LiveChild<H> {
    fn clone(&self) -> Self {
        Self {
            slot: self.slot,
            pid: self.pid,
            handle: Arc::clone(&self.handle),
        }
    }
}

impl<H> LiveChild<H> {
    /// Slot the child occupies (or occupied)
    pub fn slot(&self) -> SlotId {
        self.slot
    }

    /// Native pid
    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// Process handle
    pub fn handle(&self) -> &Arc<H> {
        &self.handle
    }
}

/// Registry of tracked children
pub struct ChildSlotTable<H> {
    slots: Mutex<Vec<SlotState<H>>>,
}

impl<H> ChildSlotTable<H> {
    /// Table with `capacity` free slots
    pub fn new(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || SlotState::Free);
        Self {
            slots: Mutex::new(slots),
        }
    }

    /// Number of slots
    pub fn capacity(&self) -> usize {
        self.slots.lock().len()
    }

    /// Claim the first free slot
    ///
    /// The slot returns to free when the reservation is dropped without
    /// being populated.
    pub fn reserve_free_slot(&self) -> Result<Reservation<'_, H>> {
        let mut slots = self.slots.lock();
        let capacity = slots.len();
        let index = slots
            .iter()
            .position(SlotState::is_free)
            .ok_or(ProcError::ResourceExhausted { capacity })?;
        slots[index] = SlotState::Reserved;
        log::trace!("Reserved child slot {}", index);

        Ok(Reservation {
            table: self,
            slot: SlotId(index),
            populated: false,
        })
    }

    /// Free a live slot, dropping its handle reference
    ///
    /// Reserved slots belong to their [`Reservation`] and are left alone.
    /// Returns whether a live slot was freed.
    pub fn release_slot(&self, slot: SlotId) -> bool {
        let mut slots = self.slots.lock();
        match slots.get_mut(slot.0) {
            Some(state @ SlotState::Live { .. }) => {
                *state = SlotState::Free;
                true
            }
            _ => false,
        }
    }

    /// Free `slot` only if it still holds exactly `handle`
    pub(crate) fn release_if_holds(&self, slot: SlotId, handle: &Arc<H>) -> bool {
        let mut slots = self.slots.lock();
        let holds = matches!(
            slots.get(slot.0),
            Some(SlotState::Live { handle: h, .. }) if Arc::ptr_eq(h, handle)
        );
        if holds {
            slots[slot.0] = SlotState::Free;
        }
        holds
    }

    /// First live slot with this pid; [`ANY_CHILD`] matches any live slot
    pub fn find_by_pid(&self, pid: Pid) -> Option<LiveChild<H>> {
        self.scan(|child_pid, _| pid == ANY_CHILD || child_pid == pid)
    }

    /// Live slot holding this exact handle
    pub fn find_by_handle(&self, handle: &Arc<H>) -> Option<LiveChild<H>> {
        self.scan(|_, h| Arc::ptr_eq(h, handle))
    }

    /// Snapshot of every live slot, in slot order
    pub fn live_children(&self) -> Vec<LiveChild<H>> {
        let slots = self.slots.lock();
        slots
            .iter()
            .enumerate()
            .filter_map(|(index, state)| live(index, state))
            .collect()
    }

    /// Number of live slots
    pub fn live_count(&self) -> usize {
        self.slots
            .lock()
            .iter()
            .filter(|s| matches!(s, SlotState::Live { .. }))
            .count()
    }

    fn scan<F>(&self, mut matches: F) -> Option<LiveChild<H>>
    where
        F: FnMut(Pid, &Arc<H>) -> bool,
    {
        let slots = self.slots.lock();
        let found = slots.iter().enumerate().find_map(|(index, state)| match state {
            SlotState::Live { pid, handle } if matches(*pid, handle) => live(index, state),
            _ => None,
        });
        log::trace!("Child table scan: {:?}", found.as_ref().map(|c| c.pid));
        found
    }
}

fn live<H>(index: usize, state: &SlotState<H>) -> Option<LiveChild<H>> {
    match state {
        SlotState::Live { pid, handle } => Some(LiveChild {
            slot: SlotId(index),
            pid: *pid,
            handle: Arc::clone(handle),
        }),
        _ => None,
    }
}

/// A reserved slot awaiting its process
#[must_use = "dropping a reservation frees the slot"]
pub struct Reservation<'a, H> {
    table: &'a ChildSlotTable<H>,
    slot: SlotId,
    populated: bool,
}

impl<'a, H> Reservation<'a, H> {
    /// Reserved slot
    pub fn slot(&self) -> SlotId {
        self.slot
    }

    /// Make the slot live with a created process
    pub fn populate(mut self, pid: Pid, handle: H) -> LiveChild<H> {
        let handle = Arc::new(handle);
        let mut slots = self.table.slots.lock();
        let state = &mut slots[self.slot.0];
        assert!(
            matches!(state, SlotState::Reserved),
            "child slot {} lost its reservation",
            self.slot.0
        );
        *state = SlotState::Live {
            pid,
            handle: Arc::clone(&handle),
        };
        drop(slots);
        self.populated = true;
        LiveChild {
            slot: self.slot,
            pid,
            handle,
        }
    }
}

impl<H> Drop for Reservation<'_, H> {
    fn drop(&mut self) {
        if self.populated {
            return;
        }
        let mut slots = self.table.slots.lock();
        if matches!(slots.get(self.slot.0), Some(SlotState::Reserved)) {
            slots[self.slot.0] = SlotState::Free;
            log::trace!("Released unused child slot {}", self.slot.0);
        }
    }
}
