//! Enable gate of a managed work queue.
//!
//! A managed queue pair does not consume work queue entries of its managed
//! side on its own. Instead, a managing queue pair hands out credits by
//! posting `RECV_ENABLE` or `SEND_ENABLE` work requests, and every consumed
//! entry takes one credit away.
//!
//! Counts carried by enable work requests are relative to an internal base
//! index. The base only advances when an enable with `WAIT_ENABLE_LAST` is
//! processed, so a chain of non-waiting enables with the same count enables
//! the same entries again rather than accumulating.

use std::cmp;

/// Managed state of a work queue, derived from its enable gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagedState {
    /// The queue is not managed; entries are consumed unconditionally.
    Unmanaged,

    /// The queue is managed and holds no credit. Incoming work is held.
    Blocked,

    /// The queue is managed and holds at least one credit.
    Releasing,
}

/// Credit state of one managed work queue.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnableGate {
    /// Cumulative index up to which entries are enabled.
    limit: u64,

    /// Index that relative enable counts are measured from.
    base: u64,

    /// Number of entries consumed so far.
    consumed: u64,

    /// The count field of the last processed enable.
    last_count: u32,
}

impl EnableGate {
    /// Create a gate that holds no credit.
    pub const fn new() -> Self {
        Self {
            limit: 0,
            base: 0,
            consumed: 0,
            last_count: 0,
        }
    }

    /// Apply an enable and return the index it enables up to.
    ///
    /// - A positive `count` enables `count` entries past the current base.
    /// - A zero `count` enables everything outstanding at this moment, i.e.,
    ///   the `outstanding` entries already observed but not yet consumed.
    ///   Entries observed later are not covered.
    ///
    /// The enabled limit never moves backwards. If `wait_last` is set, the
    /// base advances to the returned index.
    pub fn grant(&mut self, count: u32, wait_last: bool, outstanding: u64) -> u64 {
        let target = if count == 0 {
            self.consumed + outstanding
        } else {
            self.base + count as u64
        };
        self.limit = cmp::max(self.limit, target);
        self.last_count = count;
        if wait_last {
            self.base = target;
        }
        target
    }

    /// Take one credit if there is any. Return whether a credit was taken.
    #[inline]
    pub fn try_consume(&mut self) -> bool {
        if self.consumed < self.limit {
            self.consumed += 1;
            true
        } else {
            false
        }
    }

    /// Number of credits currently available.
    #[inline]
    pub fn credits(&self) -> u64 {
        self.limit - self.consumed
    }

    /// Whether at least one credit is available.
    #[inline]
    pub fn permits(&self) -> bool {
        self.credits() > 0
    }

    /// Whether consumption has reached the given index.
    #[inline]
    pub fn reached(&self, index: u64) -> bool {
        self.consumed >= index
    }

    /// Number of entries consumed through this gate.
    #[inline]
    pub fn consumed(&self) -> u64 {
        self.consumed
    }

    /// Cumulative number of entries ever enabled.
    #[inline]
    pub fn limit(&self) -> u64 {
        self.limit
    }

    /// The count field of the last processed enable.
    #[inline]
    pub fn last_count(&self) -> u32 {
        self.last_count
    }

    /// Current managed state.
    #[inline]
    pub fn state(&self) -> ManagedState {
        if self.permits() {
            ManagedState::Releasing
        } else {
            ManagedState::Blocked
        }
    }
}

/// Managed state of an optional gate.
pub(crate) fn managed_state(gate: Option<&EnableGate>) -> ManagedState {
    gate.map_or(ManagedState::Unmanaged, EnableGate::state)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(gate: &mut EnableGate, available: u64) -> u64 {
        let mut n = 0;
        while n < available && gate.try_consume() {
            n += 1;
        }
        n
    }

    #[test]
    fn test_initially_blocked() {
        let mut gate = EnableGate::new();
        assert_eq!(gate.state(), ManagedState::Blocked);
        assert!(!gate.try_consume());
        assert_eq!(gate.credits(), 0);
    }

    #[test]
    fn test_single_credit_grants() {
        let mut gate = EnableGate::new();
        for i in 1..=5 {
            assert_eq!(gate.grant(1, true, 10), i);
            assert_eq!(drain(&mut gate, 10), 1);
            assert!(gate.reached(i));
        }
        assert_eq!(gate.consumed(), 5);
    }

    #[test]
    fn test_zero_count_is_a_snapshot() {
        let mut gate = EnableGate::new();
        assert_eq!(gate.grant(0, true, 10), 10);
        assert_eq!(drain(&mut gate, 100), 10);
        assert_eq!(gate.state(), ManagedState::Blocked);
    }

    #[test]
    fn test_partial_grant() {
        let mut gate = EnableGate::new();
        gate.grant(3, true, 10);
        assert_eq!(drain(&mut gate, 10), 3);
        assert_eq!(gate.last_count(), 3);
    }

    #[test]
    fn test_waiting_chain_accumulates() {
        let mut gate = EnableGate::new();
        assert_eq!(gate.grant(2, true, 10), 2);
        assert_eq!(gate.grant(2, true, 10), 4);
        assert_eq!(gate.grant(2, true, 10), 6);
        assert_eq!(drain(&mut gate, 10), 6);
    }

    #[test]
    fn test_non_waiting_chain_shares_base() {
        let mut gate = EnableGate::new();
        assert_eq!(gate.grant(2, false, 10), 2);
        assert_eq!(gate.grant(2, false, 10), 2);
        assert_eq!(gate.grant(2, true, 10), 2);
        assert_eq!(drain(&mut gate, 10), 2);

        // The base has now advanced past the waiting enable.
        assert_eq!(gate.grant(1, false, 8), 3);
    }

    #[test]
    fn test_limit_never_shrinks() {
        let mut gate = EnableGate::new();
        gate.grant(5, false, 0);
        gate.grant(1, false, 0);
        assert_eq!(gate.credits(), 5);
        assert_eq!(gate.state(), ManagedState::Releasing);
    }

    #[test]
    fn test_zero_after_nonzero() {
        let mut gate = EnableGate::new();
        gate.grant(2, true, 10);
        drain(&mut gate, 10);
        // Eight messages still outstanding: the snapshot covers exactly them.
        assert_eq!(gate.grant(0, true, 8), 10);
        assert_eq!(drain(&mut gate, 100), 8);
    }

    #[test]
    fn test_unmanaged_state() {
        assert_eq!(managed_state(None), ManagedState::Unmanaged);
        assert_eq!(
            managed_state(Some(&EnableGate::new())),
            ManagedState::Blocked
        );
    }
}
