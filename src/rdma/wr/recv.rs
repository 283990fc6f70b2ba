use crate::rdma::type_alias::*;

/// Receive work request, i.e., one receive buffer slot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecvWr {
    pub(crate) wr_id: WrId,
}

impl_wr_id_accessors!(RecvWr);

impl RecvWr {
    /// Create a receive work request with the given ID.
    pub fn new(wr_id: WrId) -> Self {
        Self { wr_id }
    }
}
