use criterion::{criterion_group, criterion_main, Criterion};
use emf_aggregator::emf::OutputEvent;
use emf_aggregator::sink::{FlushSummary, Flusher};
use emf_aggregator::{collector, Collector, Error};
use futures::future::{BoxFuture, FutureExt};
use serde_json::{json, Value};

/// Serializes events and throws them away
struct NullFlusher;

impl Flusher for NullFlusher {
    fn flush<'a>(&'a self, events: &'a [OutputEvent]) -> BoxFuture<'a, Result<FlushSummary, Error>> {
        async move {
            let mut summary = FlushSummary::default();
            for event in events {
                summary.bytes_written += serde_json::to_vec(event)?.len() as u64;
                summary.events_written += 1;
            }
            Ok(summary)
        }
        .boxed()
    }
}

fn records(count: usize) -> Vec<Value> {
    (0..count)
        .map(|i| {
            json!({
                "_aws": {
                    "Timestamp": 1687657545423i64 + i as i64,
                    "CloudWatchMetrics": [{
                        "Namespace": "GameServerMetrics",
                        "Dimensions": [["Address", "Port"]],
                        "Metrics": [
                            {"Name": "FrameTime", "Unit": "Milliseconds"},
                            {"Name": "Players", "Unit": "Count"}
                        ]
                    }]
                },
                "Address": format!("10.172.207.{}", i % 4),
                "Port": "7779",
                "FrameTime": (i % 50) as f64 * 0.25,
                "Players": {"Min": 1, "Max": 12, "Sum": 40, "Count": 6}
            })
        })
        .collect()
}

fn criterion_benchmark(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let collector = Collector::new(collector::Config::default(), Box::new(NullFlusher));
    let batch = records(1000);

    c.bench_function("parse", |b| b.iter(|| emf_aggregator::parse(&batch[0]).unwrap()));

    c.bench_function("ingest_and_flush", |b| {
        b.to_async(&runtime).iter(|| async {
            collector.ingest_records(&batch).await;
            collector.flush().await.unwrap()
        })
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
