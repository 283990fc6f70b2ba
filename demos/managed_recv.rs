use ccverbs::prelude::*;
use quanta::Instant;

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let context = Context::open(DeviceConfig::default());
    let cq = Cq::new(&context, Cq::DEFAULT_CQ_DEPTH)?;
    let mcq = Cq::new(&context, 16)?;

    let qp = Qp::builder()
        .send_cq(&cq)
        .recv_cq(&cq)
        .caps(QpCaps::default())
        .flags(QpCreateFlags::MANAGED_RECEIVE)
        .sq_sig_all(true)
        .build(&context)?;
    qp.init()?;
    qp.post_recv(&(0..16).map(RecvWr::new).collect::<Vec<_>>())?;
    qp.bind_peer(qp.endpoint())?;

    let mqp = Qp::builder()
        .send_cq(&mcq)
        .recv_cq(&mcq)
        .caps(QpCaps::for_managing(16))
        .flags(QpCreateFlags::CROSS_CHANNEL)
        .build(&context)?;
    mqp.bind_peer(mqp.endpoint())?;

    // Ten messages wait at the receiver.
    for i in 0..10 {
        qp.send(Some(i as u32), i, false)?;
    }
    println!("{:?}: {:?}, {} pending", qp, qp.recv_state(), qp.outstanding_sends());

    // Let them through in batches of three, each waiting for the previous.
    let time = Instant::now();
    let flags = SendFlags::SIGNALED | SendFlags::WAIT_ENABLE_LAST;
    let chain = (0..3)
        .map(|k| SendWr::recv_enable(100 + k, &qp, 3, flags))
        .collect::<Vec<_>>();
    mqp.post_send(&chain)?;
    println!("Time elapsed (enable chain): {:?}", time.elapsed());

    for wc in cq.poll()? {
        println!("  {:?} wr_id={} imm={:?}", wc.source(), wc.wr_id(), wc.imm());
    }
    for wc in mcq.poll()? {
        println!("  managing wr_id={} {}", wc.wr_id(), wc.status());
    }
    println!("{:?}: {:?}, {} pending", qp, qp.recv_state(), qp.outstanding_sends());
    Ok(())
}
