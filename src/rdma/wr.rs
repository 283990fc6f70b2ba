//! Work requests.

#[macro_use]
mod macros;
mod recv;
mod send;

pub use self::recv::*;
pub use self::send::*;

bitflags::bitflags! {
    /// Flags of a send-side work request.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct SendFlags: u32 {
        /// Generate a work completion when the work request retires.
        const SIGNALED = 1 << 1;

        /// For enable work requests: advance the enable base index past this
        /// request, and retire it only after the target has consumed every
        /// entry it enables.
        const WAIT_ENABLE_LAST = 1 << 5;
    }
}

/// Opcode of a send-side work request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WrOpcode {
    /// Send a message to the connected peer, consuming one of its receive
    /// buffers.
    Send,

    /// Enable entries of a managed receive queue.
    RecvEnable,

    /// Enable entries of a managed send queue.
    SendEnable,
}

impl WrOpcode {
    /// Whether this is an enable-type opcode.
    #[inline]
    pub const fn is_enable(self) -> bool {
        matches!(self, Self::RecvEnable | Self::SendEnable)
    }
}
