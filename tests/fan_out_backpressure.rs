//! Scenario 3: a single producer fans out to two consumers of very different
//! speeds over a small ring; every sample still reaches both despite the
//! slow consumer gating the shared write cursor.

mod common;

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use flowdsp::{Graph, GraphConfig};

#[test]
fn slow_consumer_holds_back_writer_without_losing_samples() {
    let mut graph = Graph::new();
    let source = graph.add(common::RealSource { remaining: 256, rate: 48_000.0 });

    let fast_total = Arc::new(Mutex::new(0.0f32));
    let fast_sink = graph.add(common::SumSink { total: fast_total.clone() });

    let slow_total = Arc::new(Mutex::new(0.0f32));
    let slow_sink = graph.add(common::SlowSumSink {
        total: slow_total.clone(),
        delay: Duration::from_millis(2),
    });

    graph.connect(source, 0, fast_sink, 0).unwrap();
    graph.connect(source, 0, slow_sink, 0).unwrap();

    // A ring much smaller than the total sample count forces the producer to
    // block on the slow consumer's cursor repeatedly over the run.
    let config = GraphConfig::new().with_ring_capacity_samples(16).with_chunk_size(8);
    let runtime = graph.start(&config).expect("graph should start");
    runtime.wait().expect("graph should run to completion");

    assert_eq!(*fast_total.lock(), 256.0);
    assert_eq!(*slow_total.lock(), 256.0);
}
