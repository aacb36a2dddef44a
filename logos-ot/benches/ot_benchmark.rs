use std::hint::black_box;

use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use logos_ot::operation::{FieldKey, OpContext, Operation};
use logos_ot::ot::{apply, generate_operation, transform};
use logos_ot::processor::{InboundOperation, RemoteOperationProcessor};
use logos_ot::protocol::SyncMessage;
use logos_ot::registry::FieldRegistry;
use uuid::Uuid;

fn key() -> FieldKey {
    FieldKey::content_item("slide-1", 0)
}

/// Typical speaker-notes paragraph.
fn paragraph() -> String {
    "Walk through the quarterly numbers, then pause for questions. ".repeat(8)
}

fn bench_apply(c: &mut Criterion) {
    let text = paragraph();
    let op = Operation::replace(120, 30, "revised wording", "alice", key());

    c.bench_function("apply_replace_500_chars", |b| {
        b.iter(|| black_box(apply(black_box(&text), black_box(&op))))
    });
}

fn bench_transform(c: &mut Criterion) {
    let ins = Operation::insert(40, "X", "alice", key());
    let del = Operation::delete(30, 20, "bob", key());
    let rep_a = Operation::replace(10, 30, "first", "alice", key());
    let rep_b = Operation::replace(25, 30, "second", "bob", key());

    c.bench_function("transform_insert_delete", |b| {
        b.iter(|| black_box(transform(black_box(&ins), black_box(&del))))
    });
    c.bench_function("transform_replace_conflict", |b| {
        b.iter(|| black_box(transform(black_box(&rep_a), black_box(&rep_b))))
    });
}

fn bench_generate(c: &mut Criterion) {
    let old = paragraph();
    let mut new = old.clone();
    new.insert_str(250, "really ");
    let ctx = OpContext::new("alice", key());

    c.bench_function("generate_keystroke_500_chars", |b| {
        b.iter(|| black_box(generate_operation(black_box(&old), black_box(&new), &ctx)))
    });
}

fn bench_merge_against_pending(c: &mut Criterion) {
    let text = paragraph();

    c.bench_function("merge_remote_over_32_pending", |b| {
        b.iter_batched(
            || {
                let mut registry = FieldRegistry::default();
                registry.ensure(&key(), &text);
                for i in 0..32 {
                    registry.apply_local(Operation::insert(i * 10, "k", "alice", key()));
                }
                let remote = Operation::insert(200, "remote", "bob", key());
                (registry, InboundOperation::new(remote))
            },
            |(mut registry, inbound)| {
                let mut processor = RemoteOperationProcessor::new();
                black_box(processor.process(&mut registry, None, inbound));
            },
            BatchSize::SmallInput,
        )
    });
}

fn bench_message_codec(c: &mut Criterion) {
    let op = Operation::insert(12, "hello", "alice", key());
    let msg = SyncMessage::new(Uuid::new_v4(), Uuid::new_v4(), 1, op);
    let encoded = msg.encode().unwrap();

    c.bench_function("sync_message_encode", |b| {
        b.iter(|| black_box(black_box(&msg).encode().unwrap()))
    });
    c.bench_function("sync_message_decode", |b| {
        b.iter(|| black_box(SyncMessage::decode(black_box(&encoded)).unwrap()))
    });
}

criterion_group!(
    benches,
    bench_apply,
    bench_transform,
    bench_generate,
    bench_merge_against_pending,
    bench_message_codec,
);
criterion_main!(benches);
