use std::time::Duration;

use quanta::Instant;
use thiserror::Error;

use crate::rdma::cq::*;
use crate::rdma::type_alias::WrId;

/// Completion checking error type.
///
/// Any of these is fatal to the run that observes it. Nothing is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CompletionError {
    /// A completion carries a non-success status.
    #[error("wr_id {wr_id} ({opcode:?}) completed with {status}")]
    NonSuccessStatus {
        wr_id: WrId,
        opcode: WcOpcode,
        status: WcStatus,
    },

    /// Fewer completions than expected arrived before the cutoff.
    #[error("timed out with {got} of {expected} completions")]
    Timeout { expected: usize, got: usize },

    /// More completions than expected arrived.
    #[error("expected {expected} completions, got {got}")]
    Excess { expected: usize, got: usize },

    /// The completion queue is no longer usable.
    #[error(transparent)]
    Cq(#[from] CqError),
}

/// Turn a non-success work completion into an error.
pub fn check_wc(wc: &Wc) -> Result<(), CompletionError> {
    wc.result()
        .map_err(|status| CompletionError::NonSuccessStatus {
            wr_id: wc.wr_id(),
            opcode: wc.opcode(),
            status,
        })
}

/// Busy-poll `cq` until `timeout` elapses and require exactly `expected`
/// successful completions.
///
/// Returns early with [`CompletionError::Excess`] once more than `expected`
/// completions are seen. Always spends the whole `timeout` otherwise, so
/// that late completions are caught.
pub fn poll_exact(cq: &Cq, expected: usize, timeout: Duration) -> Result<Vec<Wc>, CompletionError> {
    let deadline = Instant::now() + timeout;
    let mut polled = Vec::with_capacity(expected);
    loop {
        for wc in cq.poll()? {
            check_wc(&wc)?;
            polled.push(wc);
        }
        if polled.len() > expected {
            return Err(CompletionError::Excess {
                expected,
                got: polled.len(),
            });
        }
        if Instant::now() >= deadline {
            break;
        }
        std::hint::spin_loop();
    }

    if polled.len() < expected {
        return Err(CompletionError::Timeout {
            expected,
            got: polled.len(),
        });
    }
    Ok(polled)
}

/// Busy-poll `cq` until at least `expected` successful completions are seen
/// or `timeout` elapses. Returns as soon as enough completions are polled.
pub fn poll_at_least(
    cq: &Cq,
    expected: usize,
    timeout: Duration,
) -> Result<Vec<Wc>, CompletionError> {
    let deadline = Instant::now() + timeout;
    let mut polled = Vec::with_capacity(expected);
    loop {
        for wc in cq.poll()? {
            check_wc(&wc)?;
            polled.push(wc);
        }
        if polled.len() >= expected {
            return Ok(polled);
        }
        if Instant::now() >= deadline {
            return Err(CompletionError::Timeout {
                expected,
                got: polled.len(),
            });
        }
        std::hint::spin_loop();
    }
}
