//! Scenario 6: when neither neighbor constrains a block's candidate
//! signatures enough to narrow to one, resolution breaks the tie toward the
//! candidate declared first, deterministically.

mod common;

use std::sync::Arc;

use parking_lot::Mutex;

use flowdsp::{Graph, GraphConfig};

#[test]
fn unconstrained_ambiguity_resolves_to_first_declared_candidate() {
    let mut graph = Graph::new();
    let chosen_rate_scale = Arc::new(Mutex::new(None));
    let source = graph.add(common::AmbiguousSource { remaining: 10, chosen_rate_scale: chosen_rate_scale.clone() });
    let total = Arc::new(Mutex::new(0.0f32));
    let sink = graph.add(common::SumSink { total: total.clone() });
    graph.connect(source, 0, sink, 0).unwrap();

    let runtime = graph.start(&GraphConfig::new()).expect("graph should start");
    runtime.wait().expect("graph should run to completion");

    // `AmbiguousSource` declares its rate_scale=1.0 candidate first; both
    // candidates produce the identical `real32` output type, so nothing
    // downstream can break the tie -- only declaration order can.
    assert_eq!(*chosen_rate_scale.lock(), Some(1.0));
    assert_eq!(*total.lock(), 10.0);
}
