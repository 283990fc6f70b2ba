//! Completion queue and Work completion.

mod wc;

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;

pub use self::wc::*;
use super::context::Context;
use super::type_alias::Cqn;

/// Entries and overrun flag of a completion queue.
struct CqRing {
    entries: VecDeque<Wc>,
    overrun: bool,
}

/// Ownership holder of completion queue.
struct CqInner {
    ctx: Context,
    cqn: Cqn,
    capacity: u32,
    ring: Mutex<CqRing>,
}

/// Completion queue.
///
/// Completions are appended in the order their work requests retire and are
/// never reordered. Each entry can be polled at most once. This type is a
/// reference to the underlying queue and can be cloned cheaply.
#[derive(Clone)]
pub struct Cq {
    inner: Arc<CqInner>,
}

impl fmt::Debug for Cq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_fmt(format_args!("Cq<{}>", self.inner.cqn))
    }
}

impl Cq {
    /// The default CQ depth.
    pub const DEFAULT_CQ_DEPTH: u32 = 128;

    /// Create a new completion queue.
    pub fn new(ctx: &Context, capacity: u32) -> Result<Cq, CqCreationError> {
        let max_capacity = ctx.attr().max_cqe;
        if capacity > max_capacity {
            return Err(CqCreationError::TooManyCqes(max_capacity));
        }
        if capacity == 0 {
            return Err(CqCreationError::ZeroCapacity);
        }

        let cqn = ctx.alloc_cqn();
        log::debug!("created CQ {} with capacity {}", cqn, capacity);
        Ok(Self {
            inner: Arc::new(CqInner {
                ctx: ctx.clone(),
                cqn,
                capacity,
                ring: Mutex::new(CqRing {
                    entries: VecDeque::with_capacity(capacity as usize),
                    overrun: false,
                }),
            }),
        })
    }

    /// Get the underlying [`Context`].
    pub fn context(&self) -> &Context {
        &self.inner.ctx
    }

    /// Get the CQ number.
    #[inline]
    pub fn cqn(&self) -> Cqn {
        self.inner.cqn
    }

    /// Get the capacity of the completion queue.
    #[inline]
    pub fn capacity(&self) -> u32 {
        self.inner.capacity
    }

    /// Get the number of completions ready to be polled.
    #[inline]
    pub fn len(&self) -> usize {
        self.inner.ring.lock().entries.len()
    }

    /// Whether there is no completion ready to be polled.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether two handles refer to the same completion queue.
    #[inline]
    pub fn same_as(&self, other: &Cq) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Non-blockingly poll. Return the work completions polled.
    ///
    /// It is the caller's responsibility to check the status codes of the
    /// returned work completion entries.
    #[inline]
    pub fn poll(&self) -> Result<Vec<Wc>, CqError> {
        self.poll_some(self.capacity())
    }

    /// Non-blockingly poll with a limited number of expected work completions.
    /// Return the work completions polled, which may be empty.
    ///
    /// It is the caller's responsibility to check the status codes of the
    /// returned work completion entries.
    pub fn poll_some(&self, num: u32) -> Result<Vec<Wc>, CqError> {
        let mut ring = self.inner.ring.lock();
        if ring.overrun {
            return Err(CqError::Overrun(self.inner.cqn));
        }
        let n = ring.entries.len().min(num as usize);
        Ok(ring.entries.drain(..n).collect())
    }

    /// Non-blockingly poll one work completion.
    #[inline]
    pub fn poll_one(&self) -> Result<Option<Wc>, CqError> {
        let mut ring = self.inner.ring.lock();
        if ring.overrun {
            return Err(CqError::Overrun(self.inner.cqn));
        }
        Ok(ring.entries.pop_front())
    }

    /// Non-blockingly poll into the given buffer. Return the number of work
    /// completions polled.
    ///
    /// **NOTE:** It is possible that the number of polled work completions is
    /// less than `wc.len()` or even zero. Entries beyond the number of polled
    /// work completions are left untouched.
    pub fn poll_into(&self, wc: &mut [Wc]) -> Result<u32, CqError> {
        if wc.is_empty() {
            return Ok(0);
        }

        let mut ring = self.inner.ring.lock();
        if ring.overrun {
            return Err(CqError::Overrun(self.inner.cqn));
        }
        let n = ring.entries.len().min(wc.len());
        for (slot, entry) in wc.iter_mut().zip(ring.entries.drain(..n)) {
            *slot = entry;
        }
        Ok(n as u32)
    }

    /// Append a completion. Return `false` and mark the queue overrun if it
    /// is full.
    pub(crate) fn push(&self, wc: Wc) -> bool {
        let mut ring = self.inner.ring.lock();
        if ring.entries.len() >= self.inner.capacity as usize {
            if !ring.overrun {
                log::warn!(
                    "CQ {} overrun (capacity {}), dropping {:?}",
                    self.inner.cqn,
                    self.inner.capacity,
                    wc
                );
            }
            ring.overrun = true;
            return false;
        }
        ring.entries.push_back(wc);
        true
    }
}

/// CQ creation error type.
#[derive(Debug, Error)]
pub enum CqCreationError {
    /// The capacity of the CQ is larger than the device's maximum allowed
    /// capacity, which is contained in the error.
    #[error("CQ capacity too large (maximum: {0})")]
    TooManyCqes(u32),

    /// A CQ must be able to hold at least one entry.
    #[error("CQ capacity must be positive")]
    ZeroCapacity,
}

/// CQ polling error type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CqError {
    /// More completions were produced than the CQ could hold. The CQ is no
    /// longer usable.
    #[error("CQ {0} overrun")]
    Overrun(Cqn),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rdma::context::DeviceConfig;

    fn wc(wr_id: u64) -> Wc {
        Wc::new(wr_id, WcStatus::Success, WcOpcode::Send, 1)
    }

    #[test]
    fn test_poll_order() {
        let ctx = Context::open(DeviceConfig::default());
        let cq = Cq::new(&ctx, 8).unwrap();
        assert!(cq.poll().unwrap().is_empty());

        for i in 0..5 {
            assert!(cq.push(wc(i)));
        }
        let polled = cq.poll_some(3).unwrap();
        assert_eq!(
            polled.iter().map(Wc::wr_id).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
        assert_eq!(cq.poll_one().unwrap().map(|wc| wc.wr_id()), Some(3));

        let mut buf = [Wc::default(); 4];
        assert_eq!(cq.poll_into(&mut buf).unwrap(), 1);
        assert_eq!(buf[0].wr_id(), 4);
        assert!(cq.is_empty());
    }

    #[test]
    fn test_debug_shows_imm() {
        let recv = Wc::new(3, WcStatus::Success, WcOpcode::Recv, 1).with_imm(Some(7));
        let s = format!("{:?}", recv);
        assert!(s.contains("imm: Some(7)"), "{}", s);
        assert!(format!("{:?}", wc(0)).contains("imm: None"));
    }

    #[test]
    fn test_overrun() {
        let ctx = Context::open(DeviceConfig::default());
        let cq = Cq::new(&ctx, 2).unwrap();
        assert!(cq.push(wc(0)));
        assert!(cq.push(wc(1)));
        assert!(!cq.push(wc(2)));
        assert_eq!(cq.poll(), Err(CqError::Overrun(cq.cqn())));
    }

    #[test]
    fn test_capacity_limit() {
        let ctx = Context::open(DeviceConfig {
            max_cqe: 16,
            ..Default::default()
        });
        assert!(matches!(
            Cq::new(&ctx, 17),
            Err(CqCreationError::TooManyCqes(16))
        ));
        assert!(matches!(Cq::new(&ctx, 0), Err(CqCreationError::ZeroCapacity)));
    }
}
