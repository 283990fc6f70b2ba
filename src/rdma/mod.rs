//! Software RDMA device functionalities.

pub mod context;
pub mod cq;
pub(crate) mod engine;
pub mod gate;
pub mod qp;
pub mod type_alias;
pub mod wr;
