use serde::{Deserialize, Serialize};

use crate::rdma::qp::Qp;
use crate::rdma::type_alias::*;

/// Endpoint data of a queue pair.
///
/// It can be serialized and exchanged out-of-band, then passed to
/// [`Qp::bind_peer`] on the other side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QpEndpoint {
    /// Queue pair number.
    pub qpn: Qpn,
}

impl QpEndpoint {
    /// Create a new endpoint from a queue pair.
    pub fn new(qp: &Qp) -> Self {
        QpEndpoint { qpn: qp.qp_num() }
    }
}

impl From<&Qp> for QpEndpoint {
    fn from(qp: &Qp) -> Self {
        Self::new(qp)
    }
}
