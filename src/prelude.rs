//! The ccverbs prelude.
//!
//! The purpose of this module is to alleviate imports of common device
//! functionalities.

pub use crate::rdma::context::{Context, DeviceConfig};
pub use crate::rdma::cq::{Cq, Wc, WcOpcode, WcSource, WcStatus};
pub use crate::rdma::gate::{EnableGate, ManagedState};
pub use crate::rdma::qp::{Qp, QpCaps, QpCreateFlags, QpEndpoint, QpState};
pub use crate::rdma::wr::*;
