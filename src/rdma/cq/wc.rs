use std::fmt;

use thiserror::Error;

use crate::rdma::type_alias::*;
use crate::rdma::wr::WrOpcode;

/// Opcode of a completion queue entry.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum WcOpcode {
    /// Send request.
    Send,
    /// Receive request.
    Recv,
    /// Receive-enable request.
    RecvEnable,
    /// Send-enable request.
    SendEnable,
}

impl From<WrOpcode> for WcOpcode {
    fn from(opcode: WrOpcode) -> Self {
        match opcode {
            WrOpcode::Send => WcOpcode::Send,
            WrOpcode::RecvEnable => WcOpcode::RecvEnable,
            WrOpcode::SendEnable => WcOpcode::SendEnable,
        }
    }
}

/// Which side of the protocol produced a completion.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum WcSource {
    /// A send retired on a send queue.
    Send,
    /// A receive buffer was consumed.
    Recv,
    /// An enable retired on a managing queue pair.
    Managing,
}

/// Status of a completion queue entry.
///
/// The documentation is borrowed from [RDMAmojo](https://www.rdmamojo.com/2013/02/15/ibv_poll_cq/)
/// where the meaning carries over to this device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
#[repr(u32)]
pub enum WcStatus {
    /// **Operation completed successfully:** the corresponding Work Request
    /// (and all of the unsignaled Work Requests that were posted previous to
    /// it) ended.
    #[error("success")]
    Success = 0,

    /// **Local QP Operation Error:** an internal QP consistency error was
    /// detected while processing this Work Request, e.g., its enable target
    /// no longer exists, was reset, or is in the error state.
    #[error("local QP operation error")]
    LocQpOpErr = 2,

    /// **Work Request Flushed Error:** a Work Request was in process or
    /// outstanding when the QP transitioned into the Error State.
    #[error("WR flush error")]
    WrFlushErr = 5,

    /// **Remote Operation Error:** the operation could not be completed
    /// successfully by the responder, e.g., the peer QP is in the error
    /// state or was destroyed.
    #[error("remote operation error")]
    RemOpErr = 11,
}

/// Work completion entry, representing an entry polled from a completion
/// queue.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Wc {
    pub(crate) wr_id: WrId,
    pub(crate) status: WcStatus,
    pub(crate) opcode: WcOpcode,
    pub(crate) qp_num: Qpn,
    pub(crate) imm: Option<ImmData>,
}

impl Wc {
    pub(crate) fn new(wr_id: WrId, status: WcStatus, opcode: WcOpcode, qp_num: Qpn) -> Self {
        Self {
            wr_id,
            status,
            opcode,
            qp_num,
            imm: None,
        }
    }

    pub(crate) fn with_imm(mut self, imm: Option<ImmData>) -> Self {
        self.imm = imm;
        self
    }

    /// Get the work request ID.
    #[inline]
    pub fn wr_id(&self) -> WrId {
        self.wr_id
    }

    /// Get the completion status.
    #[inline]
    pub fn status(&self) -> WcStatus {
        self.status
    }

    /// Get the completion status as a `Result`.
    #[inline]
    pub fn result(&self) -> Result<(), WcStatus> {
        match self.status {
            WcStatus::Success => Ok(()),
            status => Err(status),
        }
    }

    /// Get the opcode of the work request.
    #[inline]
    pub fn opcode(&self) -> WcOpcode {
        self.opcode
    }

    /// Get the number of the queue pair that owns the work request.
    #[inline]
    pub fn qp_num(&self) -> Qpn {
        self.qp_num
    }

    /// Get the immediate data, if the completed receive carried any.
    #[inline]
    pub fn imm(&self) -> Option<ImmData> {
        self.imm
    }

    /// Get the protocol side that produced this completion.
    #[inline]
    pub fn source(&self) -> WcSource {
        match self.opcode {
            WcOpcode::Send => WcSource::Send,
            WcOpcode::Recv => WcSource::Recv,
            WcOpcode::RecvEnable | WcOpcode::SendEnable => WcSource::Managing,
        }
    }
}

impl Default for Wc {
    /// Create a blank successful send completion entry, useful to size
    /// buffers for [`Cq::poll_into`](super::Cq::poll_into).
    fn default() -> Self {
        Self::new(0, WcStatus::Success, WcOpcode::Send, 0)
    }
}

impl fmt::Debug for Wc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Wc")
            .field("wr_id", &self.wr_id)
            .field("status", &self.status)
            .field("opcode", &self.opcode)
            .field("qp_num", &self.qp_num)
            .field("imm", &self.imm)
            .finish()
    }
}
