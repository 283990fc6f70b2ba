/// Queue pair state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QpState {
    /// Reset. Nothing can be posted.
    Reset,

    /// Initialized. Receive buffers can be posted but not consumed.
    Init,

    /// Ready To Receive.
    Rtr,

    /// Ready To Send.
    Rts,

    /// Error. Everything outstanding has been flushed.
    Error,
}

impl QpState {
    /// Whether the QP may move from this state to `next`.
    ///
    /// The forward path is `Reset -> Init -> Rtr -> Rts`. Any state may move
    /// to `Reset` or `Error`.
    pub const fn can_transit_to(self, next: QpState) -> bool {
        matches!(
            (self, next),
            (_, QpState::Reset)
                | (_, QpState::Error)
                | (QpState::Reset, QpState::Init)
                | (QpState::Init, QpState::Rtr)
                | (QpState::Rtr, QpState::Rts)
        )
    }

    /// Whether receive buffers can be posted.
    #[inline]
    pub const fn can_post_recv(self) -> bool {
        matches!(self, QpState::Init | QpState::Rtr | QpState::Rts)
    }

    /// Whether inbound sends can be accepted.
    #[inline]
    pub const fn can_receive(self) -> bool {
        matches!(self, QpState::Rtr | QpState::Rts)
    }
}
