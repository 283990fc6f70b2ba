//! A software RDMA verbs device implementing cross-channel managed receive
//! and managed send.
//!
//! A *managed* queue pair does not consume its receive buffers (or execute
//! its send queue) on its own. A *managing* queue pair, created with
//! [`QpCreateFlags::CROSS_CHANNEL`], hands out permission by posting
//! `RECV_ENABLE` / `SEND_ENABLE` work requests that target it. See
//! [`EnableGate`] for the credit arithmetic.
//!
//! `ccverbs` provides `Arc`-based handle types. Therefore, all resource
//! holder types ([`Context`], [`Cq`] and [`Qp`]) should be viewed as
//! references to the true underlying resources. You can share these
//! resources simply by `clone()`-ing them. All of them are `Send + Sync`.
//!
//! Processing is synchronous: every post runs the device until nothing can
//! advance any further, so completions are ready to poll as soon as the post
//! returns.
//!
//! Aside from device functionalities, there are some validation utilities
//! in the [`ctrl`] mod, most notably the [`ctrl::Scenario`] driver.
//!
//! # Example
//!
//! ```rust
//! use ccverbs::*;
//!
//! fn main() -> anyhow::Result<()> {
//!     let ctx = Context::open(DeviceConfig::default());
//!     let cq = Cq::new(&ctx, Cq::DEFAULT_CQ_DEPTH)?;
//!     let mcq = Cq::new(&ctx, 16)?;
//!
//!     let qp = Qp::builder()
//!         .send_cq(&cq)
//!         .recv_cq(&cq)
//!         .flags(QpCreateFlags::MANAGED_RECEIVE)
//!         .build(&ctx)?;
//!     qp.init()?;
//!     qp.recv(0)?;
//!     qp.bind_peer(qp.endpoint())?;
//!
//!     let mqp = Qp::builder()
//!         .send_cq(&mcq)
//!         .recv_cq(&mcq)
//!         .flags(QpCreateFlags::CROSS_CHANNEL)
//!         .build(&ctx)?;
//!     mqp.bind_peer(mqp.endpoint())?;
//!
//!     // The send waits for a receive credit.
//!     qp.send(None, 1, true)?;
//!     assert!(cq.poll()?.is_empty());
//!
//!     mqp.post_send(&[SendWr::recv_enable(2, &qp, 1, SendFlags::SIGNALED)])?;
//!     assert_eq!(cq.poll()?.len(), 2);
//!     assert_eq!(mcq.poll_one()?.map(|wc| wc.wr_id()), Some(2));
//!     Ok(())
//! }
//! ```

mod rdma;
pub use rdma::{context::*, cq::*, gate::*, qp::*, type_alias::*, wr::*};

/// Validation utilities.
pub mod ctrl;

pub mod prelude;
