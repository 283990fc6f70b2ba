use std::thread;
use std::time::Duration;

use anyhow::Result;
use ccverbs::ctrl::*;
use ccverbs::*;

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// A loopback QP with `nrecv` receive buffers posted.
fn loopback(ctx: &Context, scq: &Cq, rcq: &Cq, flags: QpCreateFlags, nrecv: u64) -> Result<Qp> {
    let qp = Qp::builder()
        .send_cq(scq)
        .recv_cq(rcq)
        .flags(flags)
        .build(ctx)?;
    qp.init()?;
    qp.post_recv(&(0..nrecv).map(RecvWr::new).collect::<Vec<_>>())?;
    qp.bind_peer(qp.endpoint())?;
    Ok(qp)
}

fn managing(ctx: &Context, mcq: &Cq) -> Result<Qp> {
    let mqp = Qp::builder()
        .send_cq(mcq)
        .recv_cq(mcq)
        .caps(QpCaps::for_managing(64))
        .flags(QpCreateFlags::CROSS_CHANNEL)
        .build(ctx)?;
    mqp.bind_peer(mqp.endpoint())?;
    Ok(mqp)
}

#[test]
fn error_state_flushes_everything() -> Result<()> {
    init_logger();
    let ctx = Context::default();
    let (scq, rcq) = (Cq::new(&ctx, 32)?, Cq::new(&ctx, 32)?);
    let qp = loopback(&ctx, &scq, &rcq, QpCreateFlags::MANAGED_RECEIVE, 4)?;

    for wr_id in 0..3 {
        qp.send(None, wr_id, false)?;
    }
    assert!(scq.is_empty());

    qp.set_error()?;
    assert_eq!(qp.state(), QpState::Error);

    let sends = scq.poll()?;
    assert_eq!(sends.len(), 3);
    assert!(sends.iter().all(|wc| wc.status() == WcStatus::WrFlushErr));
    let recvs = rcq.poll()?;
    assert_eq!(recvs.len(), 4);
    assert!(recvs
        .iter()
        .all(|wc| wc.status() == WcStatus::WrFlushErr && wc.opcode() == WcOpcode::Recv));

    assert!(matches!(
        qp.send(None, 9, true),
        Err(PostError::InvalidState(QpState::Error))
    ));
    Ok(())
}

#[test]
fn destroyed_peer_fails_send() -> Result<()> {
    init_logger();
    let ctx = Context::default();
    let cq = Cq::new(&ctx, 32)?;

    let a = Qp::builder().send_cq(&cq).recv_cq(&cq).build(&ctx)?;
    let b = Qp::builder()
        .send_cq(&cq)
        .recv_cq(&cq)
        .flags(QpCreateFlags::MANAGED_RECEIVE)
        .build(&ctx)?;
    b.init()?;
    b.recv(0)?;
    a.bind_peer(b.endpoint())?;
    b.bind_peer(a.endpoint())?;

    a.send(None, 1, true)?;
    a.send(None, 2, true)?;
    assert!(cq.is_empty());

    drop(b);
    let wcs = cq.poll()?;
    assert_eq!(wcs.len(), 2);
    assert_eq!((wcs[0].wr_id(), wcs[0].status()), (1, WcStatus::RemOpErr));
    assert_eq!((wcs[1].wr_id(), wcs[1].status()), (2, WcStatus::WrFlushErr));
    assert_eq!(a.state(), QpState::Error);
    Ok(())
}

#[test]
fn enable_on_errored_target() -> Result<()> {
    init_logger();
    let ctx = Context::default();
    let (cq, mcq) = (Cq::new(&ctx, 32)?, Cq::new(&ctx, 8)?);
    let qp = loopback(&ctx, &cq, &cq, QpCreateFlags::MANAGED_RECEIVE, 4)?;
    let mqp = managing(&ctx, &mcq)?;

    qp.set_error()?;
    cq.poll()?;

    mqp.post_send(&[SendWr::recv_enable(5, &qp, 1, SendFlags::empty())])?;
    let wc = mcq.poll_one()?;
    assert_eq!(wc.map(|wc| (wc.wr_id(), wc.status())), Some((5, WcStatus::LocQpOpErr)));
    assert_eq!(mqp.state(), QpState::Error);
    Ok(())
}

#[test]
fn send_enable_gates_send_queue() -> Result<()> {
    init_logger();
    let ctx = Context::default();
    let (cq, mcq) = (Cq::new(&ctx, 32)?, Cq::new(&ctx, 8)?);
    let qp = loopback(&ctx, &cq, &cq, QpCreateFlags::MANAGED_SEND, 8)?;
    let mqp = managing(&ctx, &mcq)?;

    for wr_id in 0..3 {
        qp.send(None, wr_id, true)?;
    }
    assert!(cq.is_empty());
    assert_eq!(qp.send_state(), ManagedState::Blocked);
    assert_eq!(qp.recv_state(), ManagedState::Unmanaged);

    mqp.post_send(&[SendWr::send_enable(10, &qp, 2, SendFlags::SIGNALED)])?;
    assert_eq!(cq.poll()?.len(), 4);
    assert_eq!(qp.outstanding_sends(), 1);
    let wc = mcq.poll_one()?;
    assert_eq!(wc.map(|wc| wc.opcode()), Some(WcOpcode::SendEnable));

    // A zero count covers the one send still waiting.
    mqp.post_send(&[SendWr::send_enable(11, &qp, 0, SendFlags::empty())])?;
    assert_eq!(cq.poll()?.len(), 2);
    assert_eq!(qp.outstanding_sends(), 0);
    assert!(mcq.is_empty());
    Ok(())
}

#[test]
fn post_time_rejections() -> Result<()> {
    init_logger();
    let ctx = Context::default();
    let (cq, mcq) = (Cq::new(&ctx, 32)?, Cq::new(&ctx, 8)?);
    let managed = loopback(&ctx, &cq, &cq, QpCreateFlags::MANAGED_RECEIVE, 4)?;
    let mqp = managing(&ctx, &mcq)?;

    // Enables need a CROSS_CHANNEL poster.
    assert_eq!(
        managed.post_send(&[SendWr::recv_enable(1, &managed, 1, SendFlags::SIGNALED)]),
        Err(PostError::NotCrossChannel)
    );

    // SEND_ENABLE needs a MANAGED_SEND target.
    assert_eq!(
        mqp.post_send(&[SendWr::send_enable(2, &managed, 1, SendFlags::SIGNALED)]),
        Err(PostError::UnsupportedTarget(managed.qp_num()))
    );

    let mut unknown = send_wr();
    unknown.set_id(3).set_enable(WrOpcode::RecvEnable, 9999, 1);
    assert_eq!(mqp.post_send(&[unknown]), Err(PostError::UnknownTarget(9999)));

    // Nothing was enqueued and nothing completed.
    assert_eq!(mqp.outstanding_sends(), 0);
    assert!(mcq.is_empty());
    assert!(cq.is_empty());
    Ok(())
}

#[test]
fn enable_from_another_context_is_rejected() -> Result<()> {
    init_logger();
    let (ctx_a, ctx_b) = (Context::default(), Context::default());
    let (cq_a, mcq_a) = (Cq::new(&ctx_a, 32)?, Cq::new(&ctx_a, 8)?);
    let cq_b = Cq::new(&ctx_b, 32)?;
    let a = loopback(&ctx_a, &cq_a, &cq_a, QpCreateFlags::MANAGED_RECEIVE, 4)?;
    let mqp = managing(&ctx_a, &mcq_a)?;
    let b = loopback(&ctx_b, &cq_b, &cq_b, QpCreateFlags::MANAGED_RECEIVE, 4)?;
    assert_eq!(a.qp_num(), b.qp_num());

    a.send(None, 0, true)?;
    assert_eq!(
        mqp.post_send(&[SendWr::recv_enable(7, &b, 1, SendFlags::SIGNALED)]),
        Err(PostError::UnknownTarget(b.qp_num()))
    );
    assert_eq!(mqp.outstanding_sends(), 0);
    assert_eq!(a.recv_gate(), Some(EnableGate::new()));
    assert_eq!(b.recv_gate(), Some(EnableGate::new()));
    assert!(cq_a.is_empty());
    assert!(mcq_a.is_empty());

    // The same enable aimed at the local QP goes through.
    mqp.post_send(&[SendWr::recv_enable(8, &a, 1, SendFlags::SIGNALED)])?;
    assert_eq!(cq_a.poll()?.len(), 2);
    assert_eq!(mcq_a.poll_one()?.map(|wc| wc.wr_id()), Some(8));
    Ok(())
}

#[test]
fn reset_fails_waiting_enable() -> Result<()> {
    init_logger();
    let ctx = Context::default();
    let (cq, mcq) = (Cq::new(&ctx, 32)?, Cq::new(&ctx, 8)?);
    let qp = loopback(&ctx, &cq, &cq, QpCreateFlags::MANAGED_RECEIVE, 4)?;
    let mqp = managing(&ctx, &mcq)?;

    qp.send(None, 0, true)?;
    let flags = SendFlags::SIGNALED | SendFlags::WAIT_ENABLE_LAST;
    mqp.post_send(&[
        SendWr::recv_enable(7, &qp, 2, flags),
        SendWr::recv_enable(8, &qp, 1, SendFlags::SIGNALED),
    ])?;
    // One of two credits consumed, so the first enable is still waiting.
    assert_eq!(cq.poll()?.len(), 2);
    assert_eq!(mqp.outstanding_sends(), 2);
    assert!(mcq.is_empty());

    qp.reset()?;
    let wcs = mcq.poll()?;
    assert_eq!(wcs.len(), 2);
    assert_eq!((wcs[0].wr_id(), wcs[0].status()), (7, WcStatus::LocQpOpErr));
    assert_eq!((wcs[1].wr_id(), wcs[1].status()), (8, WcStatus::WrFlushErr));
    assert_eq!(mqp.outstanding_sends(), 0);
    assert_eq!(mqp.state(), QpState::Error);

    // New traffic on the reconnected QP waits for fresh credits.
    qp.init()?;
    qp.post_recv(&(10..15).map(RecvWr::new).collect::<Vec<_>>())?;
    qp.bind_peer(qp.endpoint())?;
    for wr_id in 1..6 {
        qp.send(None, wr_id, true)?;
    }
    assert_eq!(qp.outstanding_sends(), 5);
    assert_eq!(qp.recv_state(), ManagedState::Blocked);
    assert!(cq.is_empty());
    assert!(mcq.is_empty());
    Ok(())
}

#[test]
fn rtr_receives_but_cannot_send() -> Result<()> {
    init_logger();
    let ctx = Context::default();
    let cq = Cq::new(&ctx, 32)?;
    let a = Qp::builder().send_cq(&cq).recv_cq(&cq).build(&ctx)?;
    let b = Qp::builder().send_cq(&cq).recv_cq(&cq).build(&ctx)?;

    b.init()?;
    b.recv(0)?;
    b.bind_peer_rtr(a.endpoint())?;
    assert_eq!(b.state(), QpState::Rtr);
    assert_eq!(
        b.bind_peer_rtr(a.endpoint()),
        Err(QpModifyError::InvalidTransition(QpState::Rtr, QpState::Rtr))
    );

    a.bind_peer(b.endpoint())?;
    a.send(Some(5), 1, true)?;
    let wcs = cq.poll()?;
    assert_eq!(wcs.len(), 2);
    assert!(wcs.iter().any(|wc| wc.source() == WcSource::Recv && wc.imm() == Some(5)));

    assert_eq!(b.send(None, 2, true), Err(PostError::InvalidState(QpState::Rtr)));
    b.bind_peer(a.endpoint())?;
    assert_eq!(b.state(), QpState::Rts);
    b.send(None, 2, true)?;
    assert_eq!(b.outstanding_sends(), 1);
    Ok(())
}

#[test]
fn queue_depth_is_enforced() -> Result<()> {
    init_logger();
    let ctx = Context::default();
    let cq = Cq::new(&ctx, 32)?;
    let qp = Qp::builder()
        .send_cq(&cq)
        .recv_cq(&cq)
        .caps(QpCaps {
            max_send_wr: 2,
            max_recv_wr: 1,
        })
        .flags(QpCreateFlags::MANAGED_RECEIVE)
        .build(&ctx)?;

    assert_eq!(qp.send(None, 0, true), Err(PostError::InvalidState(QpState::Reset)));
    assert_eq!(qp.recv(0), Err(PostError::InvalidState(QpState::Reset)));

    qp.init()?;
    assert_eq!(
        qp.post_recv(&[RecvWr::new(0), RecvWr::new(1)]),
        Err(PostError::QueueFull(0))
    );
    qp.recv(0)?;
    qp.bind_peer(qp.endpoint())?;

    let wrs = [SendWr::send(0), SendWr::send(1), SendWr::send(2)];
    assert_eq!(qp.post_send(&wrs), Err(PostError::QueueFull(0)));
    assert_eq!(qp.outstanding_sends(), 0);
    qp.post_send(&wrs[..2])?;
    assert_eq!(qp.post_send(&wrs[2..]), Err(PostError::QueueFull(2)));
    Ok(())
}

#[test]
fn reset_discards_without_completions() -> Result<()> {
    init_logger();
    let ctx = Context::default();
    let (cq, mcq) = (Cq::new(&ctx, 32)?, Cq::new(&ctx, 8)?);
    let qp = loopback(&ctx, &cq, &cq, QpCreateFlags::MANAGED_RECEIVE, 4)?;
    let mqp = managing(&ctx, &mcq)?;

    mqp.post_send(&[SendWr::recv_enable(1, &qp, 5, SendFlags::empty())])?;
    assert_eq!(qp.recv_gate().map(|g| g.credits()), Some(5));
    qp.send(None, 0, true)?;
    qp.send(None, 1, true)?;
    assert_eq!(cq.poll()?.len(), 4);

    qp.reset()?;
    assert_eq!(qp.state(), QpState::Reset);
    assert_eq!(qp.peer(), None);
    assert_eq!(qp.outstanding_recvs(), 0);
    assert_eq!(qp.recv_gate(), Some(EnableGate::new()));
    assert!(cq.is_empty());

    // The QP is usable again after reconnecting.
    qp.init()?;
    qp.recv(7)?;
    qp.bind_peer(qp.endpoint())?;
    qp.send(None, 2, true)?;
    assert_eq!(qp.recv_state(), ManagedState::Blocked);
    assert_eq!(qp.outstanding_sends(), 1);
    Ok(())
}

#[test]
fn creation_errors() -> Result<()> {
    init_logger();
    let ctx = Context::open(DeviceConfig {
        max_qp: 1,
        max_qp_wr: 64,
        max_cqe: 64,
    });
    let cq = Cq::new(&ctx, 64)?;
    assert!(matches!(
        Cq::new(&ctx, 65),
        Err(CqCreationError::TooManyCqes(64))
    ));

    assert!(matches!(
        Qp::builder().recv_cq(&cq).build(&ctx),
        Err(QpCreationError::MissingCq("send"))
    ));
    assert!(matches!(
        Qp::builder()
            .send_cq(&cq)
            .recv_cq(&cq)
            .caps(QpCaps {
                max_send_wr: 65,
                max_recv_wr: 1
            })
            .build(&ctx),
        Err(QpCreationError::CapabilityNotEnough(_, 64, 65))
    ));

    let other = Context::default();
    let foreign = Cq::new(&other, 8)?;
    assert!(matches!(
        Qp::builder()
            .send_cq(&cq)
            .recv_cq(&foreign)
            .caps(QpCaps::for_managing(8))
            .build(&ctx),
        Err(QpCreationError::ForeignCq("recv"))
    ));

    let caps = QpCaps::for_managing(8);
    let _qp = Qp::builder()
        .send_cq(&cq)
        .recv_cq(&cq)
        .caps(caps)
        .build(&ctx)?;
    assert!(matches!(
        Qp::builder().send_cq(&cq).recv_cq(&cq).caps(caps).build(&ctx),
        Err(QpCreationError::TooManyQps(1))
    ));
    Ok(())
}

#[test]
fn completion_details() -> Result<()> {
    init_logger();
    let ctx = Context::default();
    let (scq, rcq) = (Cq::new(&ctx, 8)?, Cq::new(&ctx, 8)?);
    let qp = Qp::builder()
        .send_cq(&scq)
        .recv_cq(&rcq)
        .sq_sig_all(true)
        .build(&ctx)?;
    qp.init()?;
    qp.recv(40)?;
    qp.bind_peer(qp.endpoint())?;

    // Unsignaled, but the QP signals everything.
    qp.send(Some(0xbeef), 41, false)?;

    let send = scq.poll_one()?.map(|wc| (wc.wr_id(), wc.source(), wc.qp_num()));
    assert_eq!(send, Some((41, WcSource::Send, qp.qp_num())));
    let recv = rcq.poll_one()?.map(|wc| (wc.wr_id(), wc.source(), wc.imm()));
    assert_eq!(recv, Some((40, WcSource::Recv, Some(0xbeef))));
    Ok(())
}

#[test]
fn cq_overrun_is_reported() -> Result<()> {
    init_logger();
    let ctx = Context::default();
    let cq = Cq::new(&ctx, 2)?;
    let qp = loopback(&ctx, &cq, &cq, QpCreateFlags::empty(), 4)?;

    qp.post_send(&[SendWr::send(0), SendWr::send(1)])?;
    assert_eq!(cq.poll(), Err(CqError::Overrun(cq.cqn())));
    assert!(matches!(
        poll_exact(&cq, 2, Duration::from_millis(1)),
        Err(CompletionError::Cq(CqError::Overrun(_)))
    ));
    Ok(())
}

#[test]
fn concurrent_producers() -> Result<()> {
    const N: u64 = 100;

    init_logger();
    let ctx = Context::default();
    let (scq, rcq, mcq) = (
        Cq::new(&ctx, 1024)?,
        Cq::new(&ctx, 1024)?,
        Cq::new(&ctx, 1024)?,
    );
    let qp = loopback(
        &ctx,
        &scq,
        &rcq,
        QpCreateFlags::MANAGED_RECEIVE,
        N,
    )?;
    let mqp = Qp::builder()
        .send_cq(&mcq)
        .recv_cq(&mcq)
        .caps(QpCaps::for_managing(N as u32))
        .flags(QpCreateFlags::CROSS_CHANNEL)
        .build(&ctx)?;
    mqp.bind_peer(mqp.endpoint())?;

    thread::scope(|s| {
        s.spawn(|| {
            for wr_id in 0..N {
                qp.send(None, wr_id, true).unwrap();
            }
        });
        s.spawn(|| {
            let flags = SendFlags::SIGNALED | SendFlags::WAIT_ENABLE_LAST;
            for wr_id in 0..N {
                mqp.post_send(&[SendWr::recv_enable(wr_id, &qp, 1, flags)])
                    .unwrap();
            }
        });
    });

    let timeout = Duration::from_millis(50);
    poll_exact(&scq, N as usize, timeout)?;
    poll_exact(&rcq, N as usize, timeout)?;
    let ids = poll_exact(&mcq, N as usize, timeout)?
        .iter()
        .map(Wc::wr_id)
        .collect::<Vec<_>>();
    assert_eq!(ids, (0..N).collect::<Vec<_>>());
    Ok(())
}
