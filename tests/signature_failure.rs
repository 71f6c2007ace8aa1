//! Scenario 4: connecting a producer and consumer whose signatures never
//! agree fails synchronously at `start()`, before any worker is spawned.

mod common;

use std::sync::Arc;

use parking_lot::Mutex;

use flowdsp::{Graph, GraphConfig, GraphConstructionError, StartError};

#[test]
fn incompatible_signatures_fail_before_any_worker_runs() {
    let mut graph = Graph::new();
    // Produces real32; ComplexSumSink only accepts complex32 -- no candidate
    // signature can ever agree across this edge.
    let source = graph.add(common::RealSource { remaining: 1, rate: 48_000.0 });
    let sink = graph.add(common::ComplexSumSink { total_re: Arc::new(Mutex::new(0.0)) });
    graph.connect(source, 0, sink, 0).unwrap();

    let err = graph.start(&GraphConfig::new()).expect_err("mismatched types must not start");
    assert!(matches!(
        err,
        StartError::Construction(GraphConstructionError::SignatureMismatch { .. })
    ));

    // The graph was never frozen, since `start()` failed before scheduling.
    assert!(!graph.is_frozen());
}
