use quanta::Instant;
use thiserror::Error;

use super::config::*;
use super::poll::*;
use crate::rdma::context::Context;
use crate::rdma::cq::*;
use crate::rdma::qp::*;
use crate::rdma::type_alias::*;
use crate::rdma::wr::*;

/// Scenario error type. Every variant aborts the scenario.
#[derive(Debug, Error)]
pub enum ScenarioError {
    #[error("cannot create CQ: {0}")]
    CqCreation(#[from] CqCreationError),

    #[error("cannot create QP: {0}")]
    QpCreation(#[from] QpCreationError),

    #[error("cannot modify QP: {0}")]
    Modify(#[from] QpModifyError),

    #[error("post failed: {0}")]
    Post(#[from] PostError),

    #[error("completion failed: {0}")]
    Completion(#[from] CompletionError),
}

/// Completion counters observed by a scenario.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counters {
    /// Steps driven so far.
    pub steps: u64,

    /// Successful send completions.
    pub send_cqes: u64,

    /// Successful receive completions.
    pub recv_cqes: u64,

    /// Largest difference between send and receive completions seen after
    /// any polling round.
    pub max_skew: u64,
}

/// A managed QP in loopback plus the managing QP controlling it, with their
/// completion queues.
///
/// The managed QP sends to itself. Its receive queue is kept topped up with
/// buffers: whenever at most one is left, it is refilled to
/// [`ScenarioConfig::qp_rx_depth`].
pub struct Scenario {
    config: ScenarioConfig,
    ctx: Context,
    scq: Cq,
    rcq: Cq,
    mcq: Cq,
    qp: Qp,
    mqp: Qp,
    next_recv_id: WrId,
    counters: Counters,
}

impl Scenario {
    /// Build a scenario whose managed QP is created with `flags`.
    pub fn new(config: &Config, flags: QpCreateFlags) -> Result<Self, ScenarioError> {
        let ctx = Context::open(config.device);
        let sc = config.scenario;

        let scq = Cq::new(&ctx, sc.cq_tx_depth)?;
        let rcq = Cq::new(&ctx, sc.cq_rx_depth)?;
        let mcq = Cq::new(&ctx, sc.cq_mgmt_depth)?;

        let qp = Qp::builder()
            .send_cq(&scq)
            .recv_cq(&rcq)
            .caps(QpCaps {
                max_send_wr: sc.qp_tx_depth,
                max_recv_wr: sc.qp_rx_depth,
            })
            .flags(flags)
            .build(&ctx)?;
        qp.init()?;

        let mqp = Qp::builder()
            .send_cq(&mcq)
            .recv_cq(&mcq)
            .caps(QpCaps::for_managing(sc.qp_tx_depth))
            .flags(QpCreateFlags::CROSS_CHANNEL)
            .build(&ctx)?;
        mqp.bind_peer(mqp.endpoint())?;

        let mut scenario = Self {
            config: sc,
            ctx,
            scq,
            rcq,
            mcq,
            qp,
            mqp,
            next_recv_id: 0,
            counters: Counters::default(),
        };
        scenario.replenish()?;
        scenario.qp.bind_peer(scenario.qp.endpoint())?;
        log::info!(
            "scenario ready: managed {:?} ({:?}), managing {:?}",
            scenario.qp,
            flags,
            scenario.mqp
        );
        Ok(scenario)
    }

    pub fn config(&self) -> &ScenarioConfig {
        &self.config
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    /// The managed QP.
    pub fn qp(&self) -> &Qp {
        &self.qp
    }

    /// The managing QP.
    pub fn mqp(&self) -> &Qp {
        &self.mqp
    }

    pub fn scq(&self) -> &Cq {
        &self.scq
    }

    pub fn rcq(&self) -> &Cq {
        &self.rcq
    }

    /// The managing CQ.
    pub fn mcq(&self) -> &Cq {
        &self.mcq
    }

    pub fn counters(&self) -> Counters {
        self.counters
    }

    /// Post a signaled send on the managed QP.
    pub fn post_send(&self, wr_id: WrId) -> Result<(), ScenarioError> {
        self.qp.post_send(&[SendWr::send(wr_id)])?;
        Ok(())
    }

    /// Post a signaled work request of the given opcode on the managed QP.
    /// Enables target the managed QP itself with a count of one.
    pub fn post_on_qp(&self, wr_id: WrId, opcode: WrOpcode) -> Result<(), ScenarioError> {
        let mut wr = send_wr();
        wr.set_id(wr_id).set_flag_signaled();
        match opcode {
            WrOpcode::Send => wr.set_wr_send(None),
            opcode => wr.set_enable(opcode, self.qp.qp_num(), 1),
        };
        self.qp.post_send(&[wr])?;
        Ok(())
    }

    /// Build a receive-enable of the managed QP.
    pub fn recv_enable(&self, wr_id: WrId, count: EnableCount, flags: SendFlags) -> SendWr {
        SendWr::recv_enable(wr_id, &self.qp, count, flags)
    }

    /// Post a chain of work requests on the managing QP.
    pub fn post_managing(&self, wrs: &[SendWr]) -> Result<(), ScenarioError> {
        self.mqp.post_send(wrs)?;
        Ok(())
    }

    /// Refill the receive queue of the managed QP if at most one buffer is
    /// left. Return the number of buffers posted.
    fn replenish(&mut self) -> Result<usize, ScenarioError> {
        let outstanding = self.qp.outstanding_recvs();
        if outstanding > 1 {
            return Ok(0);
        }

        let n = (self.config.qp_rx_depth as usize).saturating_sub(outstanding);
        let wrs = (0..n)
            .map(|i| RecvWr::new(self.next_recv_id + i as WrId))
            .collect::<Vec<_>>();
        self.qp.post_recv(&wrs)?;
        self.next_recv_id += n as WrId;
        log::trace!("replenished {} receive buffers", n);
        Ok(n)
    }

    /// Poll the send and receive CQs once each and update counters.
    /// Return the number of completions polled.
    pub fn poll_round(&mut self) -> Result<usize, ScenarioError> {
        let mut polled = 0;
        for cq in [&self.scq, &self.rcq] {
            let wcs = cq.poll().map_err(CompletionError::from)?;
            for wc in &wcs {
                check_wc(wc)?;
                match wc.source() {
                    WcSource::Send => self.counters.send_cqes += 1,
                    WcSource::Recv => self.counters.recv_cqes += 1,
                    WcSource::Managing => {
                        log::warn!("unexpected managing completion {:?}", wc)
                    }
                }
                log::debug!(
                    "{:?} wr_id={} scnt={} rcnt={}",
                    wc.opcode(),
                    wc.wr_id(),
                    self.counters.send_cqes,
                    self.counters.recv_cqes
                );
            }
            polled += wcs.len();
        }

        let skew = self.counters.send_cqes.abs_diff(self.counters.recv_cqes);
        self.counters.max_skew = self.counters.max_skew.max(skew);
        self.replenish()?;
        Ok(polled)
    }

    /// Drive `step` once for each of the first [`ScenarioConfig::send_count`]
    /// indices, polling after each, then keep polling until the poll timeout
    /// has elapsed since the start. Return the final counters.
    pub fn run<F>(&mut self, mut step: F) -> Result<Counters, ScenarioError>
    where
        F: FnMut(&mut Self, u64) -> Result<(), ScenarioError>,
    {
        let start = Instant::now();
        let timeout = self.config.poll_timeout();
        loop {
            if self.counters.steps < self.config.send_count {
                let i = self.counters.steps;
                step(self, i)?;
                self.counters.steps += 1;
            }
            self.poll_round()?;

            if self.counters.steps >= self.config.send_count && start.elapsed() >= timeout {
                break;
            }
        }
        log::info!("scenario finished: {:?}", self.counters);
        Ok(self.counters)
    }

    /// Require exactly `expected` successful completions on the managing CQ
    /// within the poll timeout.
    pub fn poll_managing(&self, expected: usize) -> Result<Vec<Wc>, ScenarioError> {
        Ok(poll_exact(&self.mcq, expected, self.config.poll_timeout())?)
    }

    /// Require exactly `expected` successful completions on the send CQ and
    /// the receive CQ within the poll timeout.
    pub fn poll_data(&self, expected_send: usize, expected_recv: usize) -> Result<(), ScenarioError> {
        poll_exact(&self.scq, expected_send, self.config.poll_timeout())?;
        poll_exact(&self.rcq, expected_recv, self.config.poll_timeout())?;
        Ok(())
    }
}
