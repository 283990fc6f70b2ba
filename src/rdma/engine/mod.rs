//! Processing engine of a software device.
//!
//! The engine owns the work queues and enable gates of every queue pair on a
//! [`Context`](super::context::Context). Each post rings the doorbell, which
//! runs [`Engine::progress`] until no queue pair can advance any further.
//! Completions are pushed to the completion queues while the engine lock is
//! held, so the lock order is always engine first, CQ second.

mod queue;

use std::collections::BTreeMap;

use crate::rdma::cq::*;
use crate::rdma::gate::*;
use crate::rdma::qp::*;
use crate::rdma::type_alias::*;
use crate::rdma::wr::*;

use self::queue::*;

/// Engine-side state of one queue pair.
#[derive(Debug)]
pub(crate) struct QpSlot {
    flags: QpCreateFlags,
    state: QpState,
    peer: Option<Qpn>,
    sq_sig_all: bool,
    scq: Cq,
    rcq: Cq,
    sq: SendQueue,
    rq: RecvQueue,
    recv_gate: Option<EnableGate>,
    send_gate: Option<EnableGate>,
}

impl QpSlot {
    fn new(attr: &QpInitAttr) -> Self {
        let mut slot = Self {
            flags: attr.flags,
            state: QpState::Reset,
            peer: None,
            sq_sig_all: attr.sq_sig_all,
            scq: attr.send_cq.clone(),
            rcq: attr.recv_cq.clone(),
            sq: SendQueue::new(attr.caps.max_send_wr),
            rq: RecvQueue::new(attr.caps.max_recv_wr),
            recv_gate: None,
            send_gate: None,
        };
        slot.reset_gates();
        slot
    }

    /// Recreate gates according to creation flags. Every managed gate
    /// starts with no credit.
    fn reset_gates(&mut self) {
        self.recv_gate = self
            .flags
            .contains(QpCreateFlags::MANAGED_RECEIVE)
            .then(EnableGate::new);
        self.send_gate = self
            .flags
            .contains(QpCreateFlags::MANAGED_SEND)
            .then(EnableGate::new);
    }

    fn gate_mut(&mut self, opcode: WrOpcode) -> Option<&mut EnableGate> {
        match opcode {
            WrOpcode::RecvEnable => self.recv_gate.as_mut(),
            WrOpcode::SendEnable => self.send_gate.as_mut(),
            WrOpcode::Send => None,
        }
    }

    fn gate(&self, opcode: WrOpcode) -> Option<&EnableGate> {
        match opcode {
            WrOpcode::RecvEnable => self.recv_gate.as_ref(),
            WrOpcode::SendEnable => self.send_gate.as_ref(),
            WrOpcode::Send => None,
        }
    }

    /// Whether an enable of the given opcode may target this QP.
    fn accepts_enable(&self, opcode: WrOpcode) -> bool {
        match opcode {
            WrOpcode::RecvEnable => self.flags.contains(QpCreateFlags::MANAGED_RECEIVE),
            WrOpcode::SendEnable => self.flags.contains(QpCreateFlags::MANAGED_SEND),
            WrOpcode::Send => false,
        }
    }

    /// Whether a completion is generated for a successfully retired request.
    #[inline]
    fn signals(&self, wr: &SendWr) -> bool {
        self.sq_sig_all || wr.flags().contains(SendFlags::SIGNALED)
    }
}

/// Outcome of trying to advance the head of a send queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    /// Nothing changed.
    Stalled,

    /// Some state changed, but the head is still in place.
    Advanced,

    /// The head retired.
    Retired,
}

impl Step {
    #[inline]
    fn progressed(self) -> bool {
        self != Step::Stalled
    }
}

/// Queue pair table and processing logic.
#[derive(Debug)]
pub(crate) struct Engine {
    qps: BTreeMap<Qpn, QpSlot>,
    next_qpn: Qpn,
}

impl Engine {
    pub fn new() -> Self {
        Self {
            qps: BTreeMap::new(),
            next_qpn: 1,
        }
    }

    pub fn create_qp(&mut self, attr: &QpInitAttr, max_qp: u32) -> Result<Qpn, QpCreationError> {
        if self.qps.len() >= max_qp as usize {
            return Err(QpCreationError::TooManyQps(max_qp));
        }

        let qpn = self.next_qpn;
        self.next_qpn += 1;
        self.qps.insert(qpn, QpSlot::new(attr));
        log::debug!(
            "created QP {} (flags {:?}, scq {}, rcq {})",
            qpn,
            attr.flags,
            attr.send_cq.cqn(),
            attr.recv_cq.cqn()
        );
        Ok(qpn)
    }

    /// Remove a QP. Queued work is dropped without completions; peers and
    /// managing QPs observe the loss on their next progress.
    pub fn destroy_qp(&mut self, qpn: Qpn) {
        if self.qps.remove(&qpn).is_some() {
            log::debug!("destroyed QP {}", qpn);
            self.progress();
        }
    }

    #[inline]
    fn slot(&self, qpn: Qpn) -> Option<&QpSlot> {
        self.qps.get(&qpn)
    }

    #[inline]
    fn slot_mut(&mut self, qpn: Qpn) -> Option<&mut QpSlot> {
        self.qps.get_mut(&qpn)
    }

    pub fn state(&self, qpn: Qpn) -> QpState {
        self.slot(qpn).map_or(QpState::Error, |s| s.state)
    }

    pub fn peer(&self, qpn: Qpn) -> Option<Qpn> {
        self.slot(qpn).and_then(|s| s.peer)
    }

    pub fn recv_gate(&self, qpn: Qpn) -> Option<EnableGate> {
        self.slot(qpn).and_then(|s| s.recv_gate.clone())
    }

    pub fn send_gate(&self, qpn: Qpn) -> Option<EnableGate> {
        self.slot(qpn).and_then(|s| s.send_gate.clone())
    }

    pub fn sq_len(&self, qpn: Qpn) -> usize {
        self.slot(qpn).map_or(0, |s| s.sq.len())
    }

    pub fn rq_len(&self, qpn: Qpn) -> usize {
        self.slot(qpn).map_or(0, |s| s.rq.len())
    }

    /// Number of messages queued towards `target` by connected senders that
    /// have not yet been delivered.
    fn inbound_sends(&self, target: Qpn) -> u64 {
        self.qps
            .values()
            .filter(|s| s.state == QpState::Rts && s.peer == Some(target))
            .map(|s| s.sq.pending_sends())
            .sum()
    }

    /// Modify the state of a QP.
    pub fn modify(&mut self, qpn: Qpn, next: QpState) -> Result<(), QpModifyError> {
        let Some(slot) = self.slot_mut(qpn) else {
            return Err(QpModifyError::Destroyed(qpn));
        };
        let cur = slot.state;
        if !cur.can_transit_to(next) {
            return Err(QpModifyError::InvalidTransition(cur, next));
        }

        match next {
            QpState::Error => self.flush(qpn),
            QpState::Reset => {
                slot.state = QpState::Reset;
                slot.peer = None;
                slot.sq.clear();
                slot.rq.clear();
                slot.reset_gates();
                log::debug!("QP {}: {:?} -> Reset", qpn, cur);
            }
            _ => {
                slot.state = next;
                log::debug!("QP {}: {:?} -> {:?}", qpn, cur, next);
            }
        }
        self.progress();
        Ok(())
    }

    /// Connect a QP to `peer` and bring it to `next`, which is either RTR or
    /// RTS. Intermediate states are passed through implicitly.
    pub fn connect(&mut self, qpn: Qpn, peer: Qpn, next: QpState) -> Result<(), QpModifyError> {
        if !self.qps.contains_key(&peer) {
            return Err(QpModifyError::UnknownPeer(peer));
        }
        let Some(slot) = self.slot_mut(qpn) else {
            return Err(QpModifyError::Destroyed(qpn));
        };
        let allowed = match next {
            QpState::Rtr => matches!(slot.state, QpState::Reset | QpState::Init),
            QpState::Rts => matches!(slot.state, QpState::Reset | QpState::Init | QpState::Rtr),
            _ => false,
        };
        if !allowed {
            return Err(QpModifyError::InvalidTransition(slot.state, next));
        }

        let cur = slot.state;
        slot.peer = Some(peer);
        slot.state = next;
        log::debug!("QP {}: connected to {}, {:?} -> {:?}", qpn, peer, cur, next);
        self.progress();
        Ok(())
    }

    /// Validate and enqueue a batch of send-side work requests, then ring the
    /// doorbell. Either every request is enqueued or none is.
    pub fn post_send(&mut self, qpn: Qpn, wrs: &[SendWr]) -> Result<(), PostError> {
        let slot = self.slot(qpn).ok_or(PostError::InvalidState(QpState::Error))?;
        if slot.state != QpState::Rts {
            return Err(PostError::InvalidState(slot.state));
        }
        if wrs.len() > slot.sq.room() {
            return Err(PostError::QueueFull(slot.sq.len() as u32));
        }

        for wr in wrs {
            match wr.opcode() {
                WrOpcode::Send => {
                    if slot.peer.is_none() {
                        return Err(PostError::NotConnected);
                    }
                }
                opcode => {
                    if !slot.flags.contains(QpCreateFlags::CROSS_CHANNEL) {
                        return Err(PostError::NotCrossChannel);
                    }
                    let target = self
                        .slot(wr.target)
                        .ok_or(PostError::UnknownTarget(wr.target))?;
                    if !target.accepts_enable(opcode) {
                        return Err(PostError::UnsupportedTarget(wr.target));
                    }
                }
            }
        }

        for wr in wrs {
            log::trace!(
                "QP {}: post {:?} wr_id={} flags={:?} target={:?} count={}",
                qpn,
                wr.opcode(),
                wr.id(),
                wr.flags(),
                wr.target(),
                wr.count()
            );
        }
        if let Some(slot) = self.slot_mut(qpn) {
            slot.sq.push_all(wrs.iter().copied().map(SendEntry::from));
        }
        self.progress();
        Ok(())
    }

    /// Enqueue a batch of receive buffers, then ring the doorbell.
    pub fn post_recv(&mut self, qpn: Qpn, wrs: &[RecvWr]) -> Result<(), PostError> {
        let slot = self
            .slot_mut(qpn)
            .ok_or(PostError::InvalidState(QpState::Error))?;
        if !slot.state.can_post_recv() {
            return Err(PostError::InvalidState(slot.state));
        }
        if !slot.rq.push_all(wrs.iter().copied()) {
            return Err(PostError::QueueFull(slot.rq.len() as u32));
        }
        log::trace!("QP {}: posted {} receive buffers", qpn, wrs.len());
        self.progress();
        Ok(())
    }

    /// Move a QP to the error state and flush every outstanding request.
    fn flush(&mut self, qpn: Qpn) {
        let Some(slot) = self.slot_mut(qpn) else {
            return;
        };
        let prev = slot.state;
        slot.state = QpState::Error;

        let (mut nsq, mut nrq) = (0, 0);
        for entry in slot.sq.drain() {
            let wc = Wc::new(
                entry.wr.id(),
                WcStatus::WrFlushErr,
                entry.wr.opcode().into(),
                qpn,
            );
            slot.scq.push(wc);
            nsq += 1;
        }
        for wr in slot.rq.drain() {
            slot.rcq
                .push(Wc::new(wr.id(), WcStatus::WrFlushErr, WcOpcode::Recv, qpn));
            nrq += 1;
        }
        log::error!(
            "QP {}: {:?} -> Error, flushed {} send and {} receive requests",
            qpn,
            prev,
            nsq,
            nrq
        );
    }

    /// Run every queue pair until none of them can advance.
    pub fn progress(&mut self) {
        loop {
            let qpns = self.qps.keys().copied().collect::<Vec<_>>();
            let mut progressed = false;
            for qpn in qpns {
                loop {
                    let step = self.step(qpn);
                    progressed |= step.progressed();
                    if step != Step::Retired {
                        break;
                    }
                }
            }
            if !progressed {
                break;
            }
        }
    }

    /// Try to advance the head of the send queue of `qpn`.
    fn step(&mut self, qpn: Qpn) -> Step {
        let Some(slot) = self.slot_mut(qpn) else {
            return Step::Stalled;
        };
        if slot.state != QpState::Rts {
            return Step::Stalled;
        }
        let Some(head) = slot.sq.front_mut() else {
            return Step::Stalled;
        };

        let mut credited_now = false;
        if !head.credited {
            if let Some(gate) = slot.send_gate.as_mut() {
                if !gate.try_consume() {
                    return Step::Stalled;
                }
            }
            head.credited = true;
            credited_now = true;
        }

        let step = match head.wr.opcode() {
            WrOpcode::Send => self.step_send(qpn),
            _ => self.step_enable(qpn),
        };
        if credited_now && step == Step::Stalled {
            Step::Advanced
        } else {
            step
        }
    }

    /// Deliver the head send to the peer if it can accept it.
    fn step_send(&mut self, qpn: Qpn) -> Step {
        let Some((wr, peer)) = self
            .slot(qpn)
            .and_then(|s| s.sq.front().map(|e| (e.wr, s.peer)))
        else {
            return Step::Stalled;
        };
        let Some(peer) = peer else {
            return self.fail(qpn, WcStatus::RemOpErr);
        };

        let alive = self
            .slot(peer)
            .is_some_and(|p| p.state != QpState::Error);
        if !alive {
            return self.fail(qpn, WcStatus::RemOpErr);
        }

        let Some(p) = self.slot_mut(peer) else {
            return Step::Stalled;
        };
        if !p.state.can_receive() || p.rq.is_empty() {
            return Step::Stalled;
        }
        if let Some(gate) = p.recv_gate.as_mut() {
            if !gate.try_consume() {
                return Step::Stalled;
            }
        }
        let Some(buf) = p.rq.pop_front() else {
            return Step::Stalled;
        };
        let wc = Wc::new(buf.id(), WcStatus::Success, WcOpcode::Recv, peer).with_imm(wr.imm());
        p.rcq.push(wc);
        log::trace!("QP {}: delivered wr_id={} to QP {}", qpn, wr.id(), peer);
        self.retire(qpn, WcStatus::Success)
    }

    /// Apply the head enable to its target and retire it once its barrier,
    /// if any, is satisfied.
    fn step_enable(&mut self, qpn: Qpn) -> Step {
        let Some((wr, granted)) = self
            .slot(qpn)
            .and_then(|s| s.sq.front().map(|e| (e.wr, e.granted)))
        else {
            return Step::Stalled;
        };
        let target = wr.target;
        // A reset target starts over with fresh gates, so an earlier grant
        // can never be reached on it.
        let alive = self
            .slot(target)
            .is_some_and(|t| !matches!(t.state, QpState::Reset | QpState::Error));
        if !alive {
            return self.fail(qpn, WcStatus::LocQpOpErr);
        }

        let mut step = Step::Stalled;
        let index = match granted {
            Some(index) => index,
            None => {
                let outstanding = match wr.opcode() {
                    WrOpcode::SendEnable => self.slot(target).map_or(0, |t| t.sq.uncredited()),
                    _ => self.inbound_sends(target),
                };
                let Some(gate) = self
                    .slot_mut(target)
                    .and_then(|t| t.gate_mut(wr.opcode()))
                else {
                    return self.fail(qpn, WcStatus::LocQpOpErr);
                };
                let index = gate.grant(wr.count(), wr.wait_last(), outstanding);
                log::debug!(
                    "QP {}: {:?} wr_id={} on QP {} count={} -> limit {} (credits {})",
                    qpn,
                    wr.opcode(),
                    wr.id(),
                    target,
                    wr.count(),
                    gate.limit(),
                    gate.credits()
                );
                if let Some(head) = self.slot_mut(qpn).and_then(|s| s.sq.front_mut()) {
                    head.granted = Some(index);
                }
                step = Step::Advanced;
                index
            }
        };

        if wr.wait_last() {
            let reached = self
                .slot(target)
                .and_then(|t| t.gate(wr.opcode()))
                .map_or(true, |g| g.reached(index));
            if !reached {
                return step;
            }
        }
        self.retire(qpn, WcStatus::Success)
    }

    /// Retire the head of the send queue with the given status.
    fn retire(&mut self, qpn: Qpn, status: WcStatus) -> Step {
        let Some(slot) = self.slot_mut(qpn) else {
            return Step::Stalled;
        };
        let Some(entry) = slot.sq.pop_front() else {
            return Step::Stalled;
        };
        if status != WcStatus::Success || slot.signals(&entry.wr) {
            slot.scq
                .push(Wc::new(entry.wr.id(), status, entry.wr.opcode().into(), qpn));
        }
        Step::Retired
    }

    /// Retire the head with an error status and move the QP to error.
    fn fail(&mut self, qpn: Qpn, status: WcStatus) -> Step {
        log::warn!("QP {}: head request failed with {:?}", qpn, status);
        let step = self.retire(qpn, status);
        self.flush(qpn);
        step
    }
}
