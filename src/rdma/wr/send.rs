use super::{SendFlags, WrOpcode};
use crate::rdma::qp::Qp;
use crate::rdma::type_alias::*;

/// Send-side work request.
///
/// A work request is built with the setter methods and then handed to
/// [`Qp::post_send`], which copies it into the send queue. Once posted it is
/// immutable and retires exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendWr {
    pub(crate) wr_id: WrId,
    pub(crate) opcode: WrOpcode,
    pub(crate) flags: SendFlags,
    pub(crate) imm: Option<ImmData>,
    pub(crate) target: Qpn,
    pub(crate) target_dev: Option<DeviceId>,
    pub(crate) count: EnableCount,
}

/// Create a new send work request.
/// It is an unsignaled send without immediate until changed.
pub fn send_wr() -> SendWr {
    Default::default()
}

impl Default for SendWr {
    fn default() -> Self {
        Self {
            wr_id: 0,
            opcode: WrOpcode::Send,
            flags: SendFlags::empty(),
            imm: None,
            target: 0,
            target_dev: None,
            count: 0,
        }
    }
}

impl_wr_id_accessors!(SendWr);

impl SendWr {
    /// Create a signaled send with the given ID.
    pub fn send(wr_id: WrId) -> Self {
        let mut wr = send_wr();
        wr.set_id(wr_id).set_wr_send(None).set_flag_signaled();
        wr
    }

    /// Create a receive-enable of `count` entries on `target` with the given
    /// ID and flags.
    pub fn recv_enable(wr_id: WrId, target: &Qp, count: EnableCount, flags: SendFlags) -> Self {
        let mut wr = send_wr();
        wr.set_id(wr_id)
            .set_wr_recv_enable(target, count)
            .set_flags(flags);
        wr
    }

    /// Create a send-enable of `count` entries on `target` with the given
    /// ID and flags.
    pub fn send_enable(wr_id: WrId, target: &Qp, count: EnableCount, flags: SendFlags) -> Self {
        let mut wr = send_wr();
        wr.set_id(wr_id)
            .set_wr_send_enable(target, count)
            .set_flags(flags);
        wr
    }

    /// Set the work request flags, replacing existing ones.
    #[inline]
    pub fn set_flags(&mut self, flags: SendFlags) -> &mut Self {
        self.flags = flags;
        self
    }

    /// Set the work request flags to include `SIGNALED`.
    #[inline]
    pub fn set_flag_signaled(&mut self) -> &mut Self {
        self.flags |= SendFlags::SIGNALED;
        self
    }

    /// Set the work request flags to include `WAIT_ENABLE_LAST`.
    #[inline]
    pub fn set_flag_wait_enable_last(&mut self) -> &mut Self {
        self.flags |= SendFlags::WAIT_ENABLE_LAST;
        self
    }

    /// Set the work request to a send, optionally carrying immediate data.
    #[inline]
    pub fn set_wr_send(&mut self, imm: Option<ImmData>) -> &mut Self {
        self.opcode = WrOpcode::Send;
        self.imm = imm;
        self.target = 0;
        self.target_dev = None;
        self.count = 0;
        self
    }

    /// Set the work request to enable `count` entries of the receive queue
    /// of `target`. A zero count enables everything already outstanding.
    #[inline]
    pub fn set_wr_recv_enable(&mut self, target: &Qp, count: EnableCount) -> &mut Self {
        self.set_enable(WrOpcode::RecvEnable, target.qp_num(), count);
        self.target_dev = Some(target.context().id());
        self
    }

    /// Set the work request to enable `count` entries of the send queue of
    /// `target`. A zero count enables everything already outstanding.
    #[inline]
    pub fn set_wr_send_enable(&mut self, target: &Qp, count: EnableCount) -> &mut Self {
        self.set_enable(WrOpcode::SendEnable, target.qp_num(), count);
        self.target_dev = Some(target.context().id());
        self
    }

    /// Set the work request to an enable addressed by queue pair number on
    /// the device of the QP it is posted to.
    #[inline]
    pub fn set_enable(&mut self, opcode: WrOpcode, target: Qpn, count: EnableCount) -> &mut Self {
        debug_assert!(opcode.is_enable(), "{:?} is not an enable opcode", opcode);
        self.opcode = opcode;
        self.imm = None;
        self.target = target;
        self.target_dev = None;
        self.count = count;
        self
    }

    /// Get the opcode.
    #[inline]
    pub fn opcode(&self) -> WrOpcode {
        self.opcode
    }

    /// Get the flags.
    #[inline]
    pub fn flags(&self) -> SendFlags {
        self.flags
    }

    /// Get the enable target, if this is an enable.
    #[inline]
    pub fn target(&self) -> Option<Qpn> {
        self.opcode.is_enable().then_some(self.target)
    }

    /// Get the enable count.
    #[inline]
    pub fn count(&self) -> EnableCount {
        self.count
    }

    /// Get the immediate data, if any.
    #[inline]
    pub fn imm(&self) -> Option<ImmData> {
        self.imm
    }

    /// Whether the enable target lives on device `dev`. Targets addressed
    /// only by number are taken to be local.
    #[inline]
    pub(crate) fn targets_device(&self, dev: DeviceId) -> bool {
        self.target_dev.map_or(true, |d| d == dev)
    }

    #[inline]
    pub(crate) fn wait_last(&self) -> bool {
        self.flags.contains(SendFlags::WAIT_ENABLE_LAST)
    }
}
