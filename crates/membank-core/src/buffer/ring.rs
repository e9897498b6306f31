//! Fixed-capacity FIFO message store.

use crate::message::Message;

/// Holds at most `capacity` messages; appending past that overwrites the
/// oldest slot. Never resizes.
#[derive(Debug, Clone)]
pub struct RingBuffer {
    slots: Vec<Message>,
    capacity: usize,
    /// Slot the next append writes to once the buffer is full.
    next: usize,
    last_seq: u64,
    flushed_through: u64,
}

impl RingBuffer {
    /// A capacity of zero is treated as one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            slots: Vec::with_capacity(capacity.min(1024)),
            capacity,
            next: 0,
            last_seq: 0,
            flushed_through: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Append, evicting the oldest message when full. Returns the stored copy.
    pub fn append(&mut self, mut message: Message) -> Message {
        self.last_seq += 1;
        message.seq = self.last_seq;

        if self.slots.len() < self.capacity {
            self.slots.push(message.clone());
        } else {
            self.slots[self.next] = message.clone();
        }
        self.next = (self.next + 1) % self.capacity;
        message
    }

    /// Newest-first iteration.
    fn newest_first(&self) -> impl Iterator<Item = &Message> {
        let len = self.slots.len();
        // While filling, `next == len`; once full, `next` points at the oldest.
        let head = if len < self.capacity { len } else { self.next };
        (0..len).map(move |i| &self.slots[(head + len - 1 - i) % len])
    }

    /// Up to `limit` messages, newest first. `0` or an over-large limit
    /// returns everything stored.
    pub fn recent(&self, limit: usize) -> Vec<Message> {
        let take = if limit == 0 || limit > self.slots.len() {
            self.slots.len()
        } else {
            limit
        };
        self.newest_first().take(take).cloned().collect()
    }

    /// Case-insensitive substring scan, newest first, stopping at `limit`.
    pub fn search(&self, query: &str, limit: usize) -> Vec<Message> {
        let needle = query.to_lowercase();
        self.newest_first()
            .filter(|m| m.content.to_lowercase().contains(&needle))
            .take(limit)
            .cloned()
            .collect()
    }

    /// Stored messages not yet promoted to long-term storage, oldest first.
    pub fn pending_flush(&self) -> Vec<Message> {
        let mut pending: Vec<Message> = self
            .newest_first()
            .filter(|m| m.seq > self.flushed_through)
            .cloned()
            .collect();
        pending.reverse();
        pending
    }

    /// Advance the flush watermark. Never moves backwards.
    pub fn mark_flushed(&mut self, through_seq: u64) {
        self.flushed_through = self.flushed_through.max(through_seq.min(self.last_seq));
    }

    pub fn flushed_through(&self) -> u64 {
        self.flushed_through
    }
}
