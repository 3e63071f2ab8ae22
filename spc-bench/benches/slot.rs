use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use spc_core::FillMode;
use spc_transport::{BatchSlot, BatchSpec, Column, Envelope, ReplyStatus, RoutingKey, WireMessage};

const STATE_DIM: usize = 64;

fn messages(n: usize) -> Vec<WireMessage> {
    (0..n)
        .map(|i| {
            let mut body = Envelope::default();
            body.insert("s", Column::F32(vec![i as f32; STATE_DIM]));
            body.insert("hash", Column::I32(vec![i as i32]));
            WireMessage {
                key: RoutingKey {
                    peer: Some(0),
                    reply_idx: i as u64,
                    round: 1,
                    slice: 0,
                },
                label: "actor".to_string(),
                status: ReplyStatus::Success,
                body,
            }
        })
        .collect()
}

fn bench_fill_and_reply(c: &mut Criterion) {
    let mut g = c.benchmark_group("spc_transport_slot");
    for &batch in &[32usize, 256usize] {
        let spec = BatchSpec::new("actor", batch)
            .field_f32("s", STATE_DIM)
            .field_i32("hash", 1)
            .field_f32("V", 1);
        let msgs = messages(batch);
        let mut slot = BatchSlot::new(Arc::new(spec), FillMode::PerSlice);
        g.bench_with_input(BenchmarkId::new("fill_reply_reset", batch), &msgs, |b, msgs| {
            b.iter(|| {
                for m in msgs {
                    black_box(slot.fill_next(m).unwrap());
                }
                black_box(slot.replies(ReplyStatus::Success));
                slot.reset();
            })
        });
    }
    g.finish();
}

criterion_group!(benches, bench_fill_and_reply);
criterion_main!(benches);
