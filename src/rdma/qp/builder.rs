use crate::rdma::context::Context;
use crate::rdma::cq::*;

use super::{Qp, QpCreationError};

/// Queue pair capability attributes.
///
/// Documentation borrowed from [RDMAmojo](https://www.rdmamojo.com/2012/12/21/ibv_create_qp/).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QpCaps {
    /// The maximum number of outstanding work Requests that can be posted to
    /// the Send Queue in that Queue Pair.
    ///
    /// Value can be [0..`max_qp_wr`] of the device.
    pub max_send_wr: u32,

    /// The maximum number of outstanding Work Requests that can be posted to
    /// the Receive Queue in that Queue Pair.
    ///
    /// Value can be [0..`max_qp_wr`] of the device.
    pub max_recv_wr: u32,
}

impl Default for QpCaps {
    /// Generate a default queue pair capabilities setting with 128
    /// outstanding send/recv work requests.
    fn default() -> Self {
        QpCaps {
            max_send_wr: 128,
            max_recv_wr: 128,
        }
    }
}

impl QpCaps {
    /// Generate a capabilities setting for a managing queue pair, which never
    /// receives.
    pub fn for_managing(max_send_wr: u32) -> Self {
        QpCaps {
            max_send_wr,
            max_recv_wr: 0,
        }
    }
}

bitflags::bitflags! {
    /// Cross-channel creation flags of a queue pair.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct QpCreateFlags: u32 {
        /// The QP may post enable work requests targeting other QPs.
        const CROSS_CHANNEL = 1 << 0;

        /// The receive queue only consumes buffers enabled by `RECV_ENABLE`.
        const MANAGED_RECEIVE = 1 << 1;

        /// The send queue only executes work requests enabled by `SEND_ENABLE`.
        const MANAGED_SEND = 1 << 2;
    }
}

/// Queue pair builder.
#[derive(Clone)]
pub struct QpBuilder<'a> {
    /// Send completion queue for this QP.
    pub(super) send_cq: Option<&'a Cq>,

    /// Receive completion queue for this QP. Can be the same to send CQ.
    pub(super) recv_cq: Option<&'a Cq>,

    /// Capabilities of this QP.
    pub(super) caps: QpCaps,

    /// Cross-channel creation flags.
    pub(super) flags: QpCreateFlags,

    /// Whether to signal for all send work requests.
    pub(super) sq_sig_all: bool,
}

impl<'a> QpBuilder<'a> {
    /// Create a new queue pair builder.
    pub fn new() -> Self {
        Self {
            send_cq: None,
            recv_cq: None,
            caps: QpCaps::default(),
            flags: QpCreateFlags::empty(),
            sq_sig_all: false,
        }
    }

    /// Set the send completion queue for this QP.
    pub fn send_cq(mut self, send_cq: &'a Cq) -> Self {
        self.send_cq = Some(send_cq);
        self
    }

    /// Set the receive completion queue for this QP.
    pub fn recv_cq(mut self, recv_cq: &'a Cq) -> Self {
        self.recv_cq = Some(recv_cq);
        self
    }

    /// Set the capabilities of this QP.
    /// If not set, [`QpCaps::default()`] is used.
    pub fn caps(mut self, caps: QpCaps) -> Self {
        self.caps = caps;
        self
    }

    /// Set the cross-channel creation flags of this QP.
    pub fn flags(mut self, flags: QpCreateFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Set whether to signal for all send work requests.
    pub fn sq_sig_all(mut self, sq_sig_all: bool) -> Self {
        self.sq_sig_all = sq_sig_all;
        self
    }

    /// Build the queue pair on the given context.
    ///
    /// Both completion queues must be set and belong to `ctx`.
    pub fn build(self, ctx: &Context) -> Result<Qp, QpCreationError> {
        Qp::new(ctx, self)
    }
}

impl<'a> QpBuilder<'a> {
    /// Unwrap the builder and return the set attributes.
    #[inline]
    pub(super) fn unwrap(self) -> Result<QpInitAttr, QpCreationError> {
        Ok(QpInitAttr {
            send_cq: self
                .send_cq
                .ok_or(QpCreationError::MissingCq("send"))?
                .clone(),
            recv_cq: self
                .recv_cq
                .ok_or(QpCreationError::MissingCq("recv"))?
                .clone(),
            caps: self.caps,
            flags: self.flags,
            sq_sig_all: self.sq_sig_all,
        })
    }
}

impl Default for QpBuilder<'_> {
    fn default() -> Self {
        Self::new()
    }
}

/// Initialization attributes of a queue pair.
#[derive(Clone, Debug)]
pub(crate) struct QpInitAttr {
    /// Send completion queue for this QP.
    pub send_cq: Cq,

    /// Receive completion queue for this QP. Can be the same to send CQ.
    pub recv_cq: Cq,

    /// Capabilities of this QP.
    pub caps: QpCaps,

    /// Cross-channel creation flags.
    pub flags: QpCreateFlags,

    /// Whether to signal for all send work requests.
    pub sq_sig_all: bool,
}
