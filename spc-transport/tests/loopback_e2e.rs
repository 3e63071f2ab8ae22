use std::sync::Arc;
use std::thread;
use std::time::Duration;

use spc_core::{FillMode, TransportConfig};
use spc_logging::MemorySink;
use spc_transport::{
    BatchContext, BatchData, BatchReceiver, BatchSender, BatchSpec, LoopbackNetwork, ReplyStatus,
};

fn spec(batch: usize) -> BatchSpec {
    BatchSpec::new("actor", batch)
        .field_f32("s", 2)
        .field_i32("hash", 1)
        .field_f32("V", 1)
        .field_f32("pi", 3)
}

/// Serve `batches` ready batches: `V = s0 + s1`, `pi = [s0, s1, hash]`.
fn serve(rx: Arc<BatchReceiver>, batches: usize) -> thread::JoinHandle<Vec<usize>> {
    thread::spawn(move || {
        let mut sizes = Vec::new();
        while sizes.len() < batches {
            let Some(mut ready) = rx.wait(Duration::from_millis(100)).unwrap() else {
                continue;
            };
            let n = ready.data().len();
            let s = ready.data().f32("s").unwrap()[..2 * n].to_vec();
            let h = ready.data().i32("hash").unwrap()[..n].to_vec();
            let d = ready.data_mut();
            for i in 0..n {
                d.f32_mut("V").unwrap()[i] = s[2 * i] + s[2 * i + 1];
                d.f32_mut("pi").unwrap()[3 * i..3 * i + 3]
                    .copy_from_slice(&[s[2 * i], s[2 * i + 1], h[i] as f32]);
            }
            sizes.push(n);
            rx.step(ready, ReplyStatus::Success);
        }
        sizes
    })
}

fn peer_batch(peer: u32, n: usize) -> BatchData {
    let mut d = BatchData::new(Arc::new(spec(n)));
    for i in 0..n {
        d.f32_mut("s").unwrap()[2 * i] = peer as f32;
        d.f32_mut("s").unwrap()[2 * i + 1] = i as f32;
        d.i32_mut("hash").unwrap()[i] = (100 * peer + i as u32) as i32;
    }
    d.set_len(n);
    d
}

fn run(mode: FillMode, receiver_batch: usize, per_peer: usize) {
    let net = LoopbackNetwork::new();
    let cfg = TransportConfig {
        num_collectors: 1,
        num_peers: 2,
        fill_mode: mode,
        remote_labels: vec!["actor".to_string()],
        reply_timeout_ms: 5000,
        ..TransportConfig::default()
    };
    let sink = Arc::new(MemorySink::new());
    let rx = Arc::new(BatchReceiver::new(
        &cfg,
        spec(receiver_batch),
        net.server_link(),
        sink.clone(),
    )
    .unwrap());
    rx.start();
    let rounds = 2;
    let batches = match mode {
        FillMode::PerSlice => rounds * 2 * per_peer / receiver_batch,
        FillMode::Whole => rounds * 2,
    };
    let server = serve(Arc::clone(&rx), batches);

    let peers: Vec<_> = (0..2u32)
        .map(|peer| {
            let link = net.peer_link(peer);
            let cfg = cfg.clone();
            let sink = sink.clone();
            thread::spawn(move || {
                let local = BatchContext::new();
                let sender = BatchSender::new(&cfg, link, local.client(), sink);
                let mut route = sender.allocate_batch(&spec(per_peer));
                for _ in 0..rounds {
                    let mut d = peer_batch(peer, per_peer);
                    let status = sender.dispatch(&mut route, &mut d).unwrap();
                    assert_eq!(status, ReplyStatus::Success);
                    for i in 0..per_peer {
                        assert_eq!(d.f32("V").unwrap()[i], peer as f32 + i as f32);
                        let pi = &d.f32("pi").unwrap()[3 * i..3 * i + 3];
                        assert_eq!(pi, &[peer as f32, i as f32, (100 * peer + i as u32) as f32]);
                    }
                }
                sender.unknown_replies()
            })
        })
        .collect();

    for p in peers {
        assert_eq!(p.join().unwrap(), 0);
    }
    let sizes = server.join().unwrap();
    assert_eq!(sizes.len(), batches);

    rx.stop();
    let snap = rx.stats().snapshot();
    assert_eq!(snap.total_samples, (rounds * 2 * per_peer) as u64);
    assert_eq!(snap.in_queue(), 0);
}

#[test]
fn per_slice_batches_mix_peers_and_reply_to_each() {
    run(FillMode::PerSlice, 4, 2);
}

#[test]
fn whole_batches_round_trip() {
    run(FillMode::Whole, 4, 3);
}
