use std::collections::VecDeque;

use crate::rdma::type_alias::*;
use crate::rdma::wr::*;

/// A posted send-side work request and its progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SendEntry {
    pub wr: SendWr,

    /// A send-enable credit has been taken for this entry.
    pub credited: bool,

    /// For enables: the gate index this entry has granted up to.
    pub granted: Option<u64>,
}

impl From<SendWr> for SendEntry {
    fn from(wr: SendWr) -> Self {
        Self {
            wr,
            credited: false,
            granted: None,
        }
    }
}

/// Bounded FIFO work queue.
#[derive(Debug, Clone)]
pub(crate) struct WorkQueue<T> {
    entries: VecDeque<T>,
    depth: u32,
}

impl<T> WorkQueue<T> {
    pub fn new(depth: u32) -> Self {
        Self {
            entries: VecDeque::new(),
            depth,
        }
    }

    /// Number of free slots.
    #[inline]
    pub fn room(&self) -> usize {
        (self.depth as usize).saturating_sub(self.entries.len())
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Append every item, or nothing if they do not all fit.
    pub fn push_all<I>(&mut self, items: I) -> bool
    where
        I: ExactSizeIterator<Item = T>,
    {
        if items.len() > self.room() {
            return false;
        }
        self.entries.extend(items);
        true
    }

    #[inline]
    pub fn front(&self) -> Option<&T> {
        self.entries.front()
    }

    #[inline]
    pub fn front_mut(&mut self) -> Option<&mut T> {
        self.entries.front_mut()
    }

    #[inline]
    pub fn pop_front(&mut self) -> Option<T> {
        self.entries.pop_front()
    }

    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.entries.iter()
    }

    /// Remove and return everything in FIFO order.
    pub fn drain(&mut self) -> impl Iterator<Item = T> + '_ {
        self.entries.drain(..)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Send queue of a queue pair.
pub(crate) type SendQueue = WorkQueue<SendEntry>;

/// Receive queue of a queue pair.
pub(crate) type RecvQueue = WorkQueue<RecvWr>;

impl SendQueue {
    /// Number of queued sends, i.e., messages that will arrive at the peer.
    pub fn pending_sends(&self) -> u64 {
        self.iter()
            .filter(|e| e.wr.opcode() == WrOpcode::Send)
            .count() as u64
    }

    /// Number of entries that have not yet taken a send-enable credit.
    pub fn uncredited(&self) -> u64 {
        self.iter().filter(|e| !e.credited).count() as u64
    }

    /// Work request IDs in queue order.
    #[cfg(test)]
    pub fn ids(&self) -> Vec<WrId> {
        self.iter().map(|e| e.wr.id()).collect()
    }
}
