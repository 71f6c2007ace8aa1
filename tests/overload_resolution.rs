//! Scenario 2: a two-input block with both a real and a complex candidate
//! signature resolves to the complex branch when its producers are complex.

mod common;

use std::sync::Arc;

use parking_lot::Mutex;

use flowdsp::{Complex32, Graph, GraphConfig};

#[test]
fn multiply_resolves_to_complex_branch_from_complex_producers() {
    let mut graph = Graph::new();
    let a = graph.add(common::ComplexSource {
        remaining: 500,
        value: Complex32::new(2.0, 0.0),
        rate: 48_000.0,
    });
    let b = graph.add(common::ComplexSource {
        remaining: 500,
        value: Complex32::new(2.0, 0.0),
        rate: 48_000.0,
    });
    let mul = graph.add(common::Multiply::new());
    let total_re = Arc::new(Mutex::new(0.0f32));
    let sink = graph.add(common::ComplexSumSink { total_re: total_re.clone() });

    graph.connect(a, 0, mul, 0).unwrap();
    graph.connect(b, 0, mul, 1).unwrap();
    graph.connect(mul, 0, sink, 0).unwrap();

    let runtime = graph.start(&GraphConfig::new().with_chunk_size(64)).expect("graph should start");
    runtime.wait().expect("graph should run to completion");

    // (2 + 0i) * (2 + 0i) = 4 + 0i, summed over 500 samples.
    assert_eq!(*total_re.lock(), 2000.0);
}
