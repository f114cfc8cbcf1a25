//! Stream table: a bounded arena of stream slots.
//!
//! Slots are `Option<Arc<Stream>>` in a `Vec` that grows up to the accept
//! backlog. Freed slots go on a free-list and are reused before the vector
//! grows; freeing the last slot shrinks the vector past any trailing holes.

use std::sync::Arc;

use crate::stream::Stream;

use super::Role;

pub(crate) struct StreamTable {
    slots: Vec<Option<Arc<Stream>>>,
    free: Vec<usize>,
    live: usize,
    capacity: usize,
    /// Next self-allocated id, `None` once the id space is used up.
    next_id: Option<u32>,
}

impl StreamTable {
    pub(crate) fn new(capacity: usize, role: Role) -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            live: 0,
            capacity,
            next_id: Some(role.first_stream_id()),
        }
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    pub(crate) fn live(&self) -> usize {
        self.live
    }

    /// High-water mark of the slot vector.
    pub(crate) fn high_water(&self) -> usize {
        self.slots.len()
    }

    pub(crate) fn peek_next_id(&self) -> Option<u32> {
        self.next_id
    }

    pub(crate) fn advance_next_id(&mut self) {
        self.next_id = self.next_id.and_then(|id| id.checked_add(2));
    }

    /// Pick a slot for a new stream: a freed one first, else grow.
    ///
    /// Returns `None` when the table is at capacity. The slot stays empty
    /// until [`insert`](Self::insert) fills it.
    pub(crate) fn claim_slot(&mut self) -> Option<usize> {
        if let Some(index) = self.free.pop() {
            return Some(index);
        }
        if self.slots.len() < self.capacity {
            self.slots.push(None);
            return Some(self.slots.len() - 1);
        }
        None
    }

    pub(crate) fn insert(&mut self, stream: Arc<Stream>) {
        let index = stream.slot();
        debug_assert!(self.slots[index].is_none());
        self.slots[index] = Some(stream);
        self.live += 1;
    }

    /// Give back the slot held by `stream`. Returns false if the slot
    /// belongs to someone else (already released and reused).
    pub(crate) fn release(&mut self, stream: &Stream) -> bool {
        let index = stream.slot();
        let owned = matches!(
            self.slots.get(index),
            Some(Some(current)) if std::ptr::eq(Arc::as_ptr(current), stream)
        );
        if !owned {
            return false;
        }

        self.slots[index] = None;
        self.live -= 1;

        if index + 1 == self.slots.len() {
            while matches!(self.slots.last(), Some(None)) {
                self.slots.pop();
            }
            let len = self.slots.len();
            self.free.retain(|&i| i < len);
        } else {
            self.free.push(index);
        }
        true
    }

    /// Live, non-closed stream with this id.
    pub(crate) fn find(&self, id: u32) -> Option<Arc<Stream>> {
        self.slots
            .iter()
            .flatten()
            .find(|stream| stream.id() == id && !stream.is_closed())
            .cloned()
    }

    pub(crate) fn streams(&self) -> Vec<Arc<Stream>> {
        self.slots.iter().flatten().cloned().collect()
    }
}
