//! Performance benchmarks for message processing.
//!
//! These benchmarks measure the hot paths in the daemon:
//! - Request/response JSON encoding and framing
//! - Frame decoding from a byte buffer
//! - Request routing through the router

use std::sync::Arc;
use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use daemon::notify::TracingNotifier;
use daemon::output::OutputSink;
use daemon::router::MessageRouter;
use daemon::session::{
    ConfigRegistry, SessionConfig, SessionLocks, SessionService, SessionStore, SessionTimer,
};
use protocol::messages::{ARG_SESSION_CONFIG_ID, ARG_SESSION_ID};
use protocol::{Frame, FrameCodec, Request, Response};
use tokio_util::sync::CancellationToken;

/// Output sink that drops every line.
struct NullOutput;

impl OutputSink for NullOutput {
    fn queue_message(&self, _line: String) {}
}

fn sample_request() -> Request {
    Request::new("session", "start")
        .with_argument(ARG_SESSION_ID, "deep-work")
        .with_argument(ARG_SESSION_CONFIG_ID, "pomodoro")
}

/// Benchmark message serialization performance.
fn bench_message_serialization(c: &mut Criterion) {
    let mut group = c.benchmark_group("message_serialization");

    let request = sample_request();
    let request_bytes = request.to_json().unwrap();
    group.throughput(Throughput::Bytes(request_bytes.len() as u64));

    group.bench_function("request_to_frame", |b| {
        b.iter(|| black_box(&request).to_frame_bytes().unwrap());
    });

    group.bench_function("request_from_json", |b| {
        b.iter(|| Request::from_json(black_box(&request_bytes)).unwrap());
    });

    let response = Response::ok("reading [executing] Focus 12:34 / 25:00 (12:26 left), cycle 2/4");
    group.bench_function("response_to_frame", |b| {
        b.iter(|| black_box(&response).to_frame_bytes().unwrap());
    });

    group.finish();
}

/// Benchmark frame decoding from a stream buffer.
fn bench_frame_decoding(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame_decoding");
    let codec = FrameCodec::new();

    // Small payload (typical request)
    let small = codec.encode(&Frame::new(vec![b'x'; 64])).unwrap();
    group.throughput(Throughput::Bytes(small.len() as u64));
    group.bench_function("small_64B", |b| {
        b.iter(|| codec.decode(black_box(&small)).unwrap());
    });

    // Large payload (long session listing)
    let large = codec.encode(&Frame::new(vec![b'x'; 16 * 1024])).unwrap();
    group.throughput(Throughput::Bytes(large.len() as u64));
    group.bench_function("large_16KB", |b| {
        b.iter(|| codec.decode(black_box(&large)).unwrap());
    });

    // Back-to-back frames in one buffer
    let mut batch = Vec::new();
    for _ in 0..32 {
        batch.extend_from_slice(&sample_request().to_frame_bytes().unwrap());
    }
    group.throughput(Throughput::Bytes(batch.len() as u64));
    group.bench_function("batch_32_requests", |b| {
        b.iter(|| {
            let mut offset = 0;
            while let Some((frame, used)) = codec.try_decode(&batch[offset..]).unwrap() {
                black_box(frame);
                offset += used;
            }
        });
    });

    group.finish();
}

/// Benchmark dispatch through the router.
fn bench_routing(c: &mut Criterion) {
    let mut group = c.benchmark_group("routing");
    let runtime = tokio::runtime::Runtime::new().unwrap();

    let configs = Arc::new(
        ConfigRegistry::new(
            vec![
                SessionConfig::new("pomodoro", Duration::from_secs(1500), Duration::from_secs(300))
                    .with_target_cycles(4),
                SessionConfig::new("short", Duration::from_secs(900), Duration::from_secs(180)),
            ],
            "pomodoro",
        )
        .unwrap(),
    );
    let timer = Arc::new(SessionTimer::new(
        Arc::new(SessionStore::new()),
        Arc::new(SessionLocks::new()),
        Duration::from_secs(1),
    ));
    let sessions = Arc::new(SessionService::new(
        timer,
        configs.clone(),
        Arc::new(NullOutput),
        Arc::new(TracingNotifier::new()),
        CancellationToken::new(),
    ));
    let router = MessageRouter::new(sessions, configs);

    let config_list = Request::new("config", "list");
    group.bench_function("config_list", |b| {
        b.iter(|| runtime.block_on(router.route(black_box(&config_list))));
    });

    let session_list = Request::new("session", "list");
    group.bench_function("session_list_empty", |b| {
        b.iter(|| runtime.block_on(router.route(black_box(&session_list))));
    });

    let unknown = Request::new("timer", "list");
    group.bench_function("unknown_command", |b| {
        b.iter(|| runtime.block_on(router.route(black_box(&unknown))));
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_message_serialization,
    bench_frame_decoding,
    bench_routing,
);

criterion_main!(benches);
