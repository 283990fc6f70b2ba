//! Queue pair and related types.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::rdma::{context::Context, cq::Cq, gate::*, type_alias::*, wr::*};

pub use self::builder::*;
pub use self::peer::*;
pub use self::state::*;

mod builder;
mod peer;
mod state;

/// Queue pair creation error type.
#[derive(Debug, Error)]
pub enum QpCreationError {
    /// Specified capabilities are not supported by the device.
    /// The three fields are for the capability name, the maximum supported
    /// value, and the required value.
    #[error("capability not enough: {0} supports up to {1}, {2} required")]
    CapabilityNotEnough(String, u32, u32),

    /// The device already holds its maximum number of queue pairs.
    #[error("too many QPs (maximum: {0})")]
    TooManyQps(u32),

    /// A mandatory completion queue was not set on the builder.
    #[error("{0} CQ must be set")]
    MissingCq(&'static str),

    /// A completion queue was created on another context.
    #[error("{0} CQ belongs to another context")]
    ForeignCq(&'static str),
}

/// Queue pair state modification error type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum QpModifyError {
    /// The requested transition is not allowed from the current state.
    #[error("cannot modify QP from {0:?} to {1:?}")]
    InvalidTransition(QpState, QpState),

    /// The peer endpoint does not name a QP on this device.
    #[error("unknown peer QP {0}")]
    UnknownPeer(Qpn),

    /// The QP no longer exists on the device.
    #[error("QP {0} is destroyed")]
    Destroyed(Qpn),
}

/// Work request posting error type.
///
/// A post that returns an error enqueues nothing and generates no completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PostError {
    /// An enable targets a QP that is not managed on the enabled side.
    #[error("QP {0} is not managed for this enable")]
    UnsupportedTarget(Qpn),

    /// Enables can only be posted on a QP created with `CROSS_CHANNEL`.
    #[error("QP is not created with CROSS_CHANNEL")]
    NotCrossChannel,

    /// A send is posted on a QP without a peer.
    #[error("QP is not connected")]
    NotConnected,

    /// An enable targets a QP that does not exist on this device, or one
    /// that was created on another device.
    #[error("unknown target QP {0}")]
    UnknownTarget(Qpn),

    /// The QP is not in a state that accepts this post.
    #[error("cannot post in state {0:?}")]
    InvalidState(QpState),

    /// The work queue cannot hold the whole batch. The field is the number of
    /// requests currently outstanding.
    #[error("work queue is full ({0} outstanding)")]
    QueueFull(u32),
}

/// Ownership holder of queue pair.
struct QpInner {
    ctx: Context,
    qpn: Qpn,
    init_attr: QpInitAttr,
}

impl Drop for QpInner {
    fn drop(&mut self) {
        self.ctx.engine().destroy_qp(self.qpn);
    }
}

/// Queue pair.
///
/// This type is a reference to the underlying queue pair and can be cloned
/// cheaply. The queue pair is destroyed when the last clone is dropped.
#[derive(Clone)]
pub struct Qp {
    inner: Arc<QpInner>,
}

impl fmt::Debug for Qp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_fmt(format_args!("Qp<{}>", self.inner.qpn))
    }
}

impl Qp {
    /// Check whether the given capabilities are supported by the device.
    fn check_caps(ctx: &Context, caps: &QpCaps) -> Result<(), QpCreationError> {
        let attr = ctx.attr();
        if caps.max_send_wr > attr.max_qp_wr {
            return Err(QpCreationError::CapabilityNotEnough(
                "max_send_wr".to_string(),
                attr.max_qp_wr,
                caps.max_send_wr,
            ));
        }
        if caps.max_recv_wr > attr.max_qp_wr {
            return Err(QpCreationError::CapabilityNotEnough(
                "max_recv_wr".to_string(),
                attr.max_qp_wr,
                caps.max_recv_wr,
            ));
        }
        Ok(())
    }

    /// Create a new queue pair with the given builder.
    pub(crate) fn new(ctx: &Context, builder: QpBuilder) -> Result<Self, QpCreationError> {
        let init_attr = builder.unwrap()?;
        Self::check_caps(ctx, &init_attr.caps)?;
        if !init_attr.send_cq.context().same_as(ctx) {
            return Err(QpCreationError::ForeignCq("send"));
        }
        if !init_attr.recv_cq.context().same_as(ctx) {
            return Err(QpCreationError::ForeignCq("recv"));
        }

        let qpn = ctx.engine().create_qp(&init_attr, ctx.attr().max_qp)?;
        Ok(Qp {
            inner: Arc::new(QpInner {
                ctx: ctx.clone(),
                qpn,
                init_attr,
            }),
        })
    }

    /// Create a new QP builder.
    pub fn builder<'a>() -> QpBuilder<'a> {
        Default::default()
    }

    /// Get the context of the queue pair.
    pub fn context(&self) -> &Context {
        &self.inner.ctx
    }

    /// Get the queue pair number.
    #[inline]
    pub fn qp_num(&self) -> Qpn {
        self.inner.qpn
    }

    /// Get the cross-channel creation flags.
    #[inline]
    pub fn flags(&self) -> QpCreateFlags {
        self.inner.init_attr.flags
    }

    /// Whether all send work requests generate completions.
    #[inline]
    pub fn sq_sig_all(&self) -> bool {
        self.inner.init_attr.sq_sig_all
    }

    /// Get the capabilities of this QP.
    pub fn caps(&self) -> &QpCaps {
        &self.inner.init_attr.caps
    }

    /// Get the send CQ of this QP.
    #[inline]
    pub fn scq(&self) -> &Cq {
        &self.inner.init_attr.send_cq
    }

    /// Get the receive CQ of this QP.
    #[inline]
    pub fn rcq(&self) -> &Cq {
        &self.inner.init_attr.recv_cq
    }

    /// Get the current state of the queue pair.
    #[inline]
    pub fn state(&self) -> QpState {
        self.context().engine().state(self.qp_num())
    }

    /// Get the endpoint information of this QP.
    #[inline]
    pub fn endpoint(&self) -> QpEndpoint {
        QpEndpoint::new(self)
    }

    /// Get the endpoint of the peer this QP is connected to.
    pub fn peer(&self) -> Option<QpEndpoint> {
        self.context()
            .engine()
            .peer(self.qp_num())
            .map(|qpn| QpEndpoint { qpn })
    }

    /// Get the managed state of the receive queue.
    pub fn recv_state(&self) -> ManagedState {
        managed_state(self.context().engine().recv_gate(self.qp_num()).as_ref())
    }

    /// Get the managed state of the send queue.
    pub fn send_state(&self) -> ManagedState {
        managed_state(self.context().engine().send_gate(self.qp_num()).as_ref())
    }

    /// Get a snapshot of the receive enable gate, if the QP is created with
    /// `MANAGED_RECEIVE`.
    pub fn recv_gate(&self) -> Option<EnableGate> {
        self.context().engine().recv_gate(self.qp_num())
    }

    /// Get a snapshot of the send enable gate, if the QP is created with
    /// `MANAGED_SEND`.
    pub fn send_gate(&self) -> Option<EnableGate> {
        self.context().engine().send_gate(self.qp_num())
    }

    /// Number of send-side work requests that have not yet retired.
    pub fn outstanding_sends(&self) -> usize {
        self.context().engine().sq_len(self.qp_num())
    }

    /// Number of posted receive buffers that have not yet been consumed.
    pub fn outstanding_recvs(&self) -> usize {
        self.context().engine().rq_len(self.qp_num())
    }
}

impl Qp {
    /// Modify the QP from RESET to INIT, so that receive buffers can be
    /// posted before connecting.
    pub fn init(&self) -> Result<(), QpModifyError> {
        self.context()
            .engine()
            .modify(self.qp_num(), QpState::Init)
    }

    /// Connect the QP to the given peer and bring it to RTS.
    /// Passing the QP's own endpoint creates a loopback connection.
    ///
    /// The QP must be in RESET, INIT or RTR state.
    pub fn bind_peer(&self, ep: QpEndpoint) -> Result<(), QpModifyError> {
        self.context()
            .engine()
            .connect(self.qp_num(), ep.qpn, QpState::Rts)
    }

    /// Connect the QP to the given peer and bring it to RTR only. The QP
    /// accepts inbound sends but cannot post any until [`Qp::bind_peer`]
    /// brings it to RTS.
    ///
    /// The QP must be in RESET or INIT state.
    pub fn bind_peer_rtr(&self, ep: QpEndpoint) -> Result<(), QpModifyError> {
        self.context()
            .engine()
            .connect(self.qp_num(), ep.qpn, QpState::Rtr)
    }

    /// Reset the QP.
    /// Queued work requests are discarded without completions, the peer is
    /// cleared and enable gates start over with no credit. Enables targeting
    /// this QP that are still waiting on a managing QP complete with
    /// [`WcStatus::LocQpOpErr`](crate::WcStatus::LocQpOpErr).
    pub fn reset(&self) -> Result<(), QpModifyError> {
        self.context()
            .engine()
            .modify(self.qp_num(), QpState::Reset)
    }

    /// Move the QP to the error state. Every outstanding work request is
    /// completed with [`WcStatus::WrFlushErr`](crate::WcStatus::WrFlushErr).
    pub fn set_error(&self) -> Result<(), QpModifyError> {
        self.context()
            .engine()
            .modify(self.qp_num(), QpState::Error)
    }

    /// Post a list of send-side work requests.
    ///
    /// The list is validated as a whole: on error nothing is enqueued. On
    /// success, the requests are processed as far as possible before this
    /// method returns, and their completions (if any) may already be ready
    /// on the send CQ.
    pub fn post_send(&self, wrs: &[SendWr]) -> Result<(), PostError> {
        let dev = self.context().id();
        if let Some(wr) = wrs
            .iter()
            .find(|wr| wr.opcode().is_enable() && !wr.targets_device(dev))
        {
            return Err(PostError::UnknownTarget(wr.target));
        }
        self.context().engine().post_send(self.qp_num(), wrs)
    }

    /// Post a list of receive buffers.
    pub fn post_recv(&self, wrs: &[RecvWr]) -> Result<(), PostError> {
        self.context().engine().post_recv(self.qp_num(), wrs)
    }

    /// Post a send to the connected peer.
    pub fn send(&self, imm: Option<ImmData>, wr_id: WrId, signal: bool) -> Result<(), PostError> {
        let mut wr = send_wr();
        wr.set_id(wr_id).set_wr_send(imm);
        if signal {
            wr.set_flag_signaled();
        }
        self.post_send(&[wr])
    }

    /// Post a receive buffer.
    pub fn recv(&self, wr_id: WrId) -> Result<(), PostError> {
        self.post_recv(&[RecvWr::new(wr_id)])
    }
}
