//! The rate propagator (component F): walks the resolved graph from sources,
//! assigning a sample rate to every edge and calling each block's
//! `initialize` hook as soon as its own rate is known.

use crate::block::BlockId;
use crate::error::{GraphConstructionError, GraphRunError, StartError, StartResult};
use crate::graph::Graph;

/// Propagates sample rates through an already-resolved graph, in topological
/// order, and initializes every block with its resolved signature and
/// input rate.
///
/// Every source (a block with no input ports) must expose a rate via
/// [`Block::nominal_rate`](crate::block::Block::nominal_rate); every other
/// block's rate is the rate of the edge feeding its first input port, and
/// every other input port must agree exactly or the block fails with
/// [`GraphConstructionError::RateMismatch`] -- per the resolved Open
/// Question, scaling is never implicitly reconciled across inputs.
pub fn propagate(graph: &mut Graph) -> StartResult<()> {
    for id in graph.topological_order() {
        let input_rate = if graph.incoming(id).is_empty() {
            source_rate(graph, id)
        } else {
            inherited_rate(graph, id)?
        };

        assign_output_rates(graph, id, input_rate);
        initialize_block(graph, id, input_rate)?;
    }
    Ok(())
}

fn source_rate(graph: &Graph, id: BlockId) -> f64 {
    graph
        .node(id)
        .block
        .nominal_rate()
        .expect("source block must declare a nominal_rate")
}

fn inherited_rate(graph: &Graph, id: BlockId) -> StartResult<f64> {
    let incoming = graph.incoming(id);
    let mut rates = incoming.iter().map(|(_, edge)| {
        edge.rate
            .expect("upstream edge rate must already be assigned in topological order")
    });

    let first = rates.next().expect("at least one incoming edge");
    for rate in rates {
        if rate != first {
            return Err(StartError::Construction(GraphConstructionError::RateMismatch {
                block: id,
                first,
                second: rate,
            }));
        }
    }
    Ok(first)
}

fn assign_output_rates(graph: &mut Graph, id: BlockId, input_rate: f64) {
    let resolved = graph
        .node(id)
        .resolved_signature
        .clone()
        .expect("signature resolution must run before rate propagation");

    let outgoing: Vec<_> = graph
        .outgoing(id)
        .into_iter()
        .map(|(edge_idx, _, edge)| (edge_idx, edge.source_output))
        .collect();

    for (edge_idx, source_output) in outgoing {
        let scale = resolved.rate_scale.get(source_output).copied().unwrap_or(1.0);
        graph.edge_mut(edge_idx).rate = Some(input_rate * scale);
    }

    graph.node_mut(id).resolved_input_rate = Some(input_rate);
}

fn initialize_block(graph: &mut Graph, id: BlockId, input_rate: f64) -> StartResult<()> {
    let resolved = graph
        .node(id)
        .resolved_signature
        .clone()
        .expect("signature resolution must run before rate propagation");

    let name = graph.node(id).block.name();
    graph
        .node_mut(id)
        .block
        .initialize(&resolved, input_rate)
        .map_err(|source| {
            StartError::Init(GraphRunError::BlockInitFailed { block: id, name, source })
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::{Inputs, Outputs, ProcessOutcome};
    use crate::error::BlockResult;
    use crate::port::PortSpec;
    use crate::resolve;
    use crate::signature::Signature;
    use crate::types::SampleType;

    struct Source {
        rate: f64,
    }
    impl crate::block::Block for Source {
        fn input_ports(&self) -> Vec<PortSpec> {
            vec![]
        }
        fn output_ports(&self) -> Vec<PortSpec> {
            vec![PortSpec::output("out")]
        }
        fn signatures(&self) -> Vec<Signature> {
            vec![Signature::new(vec![], vec![real32()])]
        }
        fn nominal_rate(&self) -> Option<f64> {
            Some(self.rate)
        }
        fn process(&mut self, _: Inputs<'_>, _: Outputs<'_>) -> BlockResult<ProcessOutcome> {
            Ok(ProcessOutcome::EndOfStream)
        }
    }

    struct HalfRate;
    impl crate::block::Block for HalfRate {
        fn input_ports(&self) -> Vec<PortSpec> {
            vec![PortSpec::input("in")]
        }
        fn output_ports(&self) -> Vec<PortSpec> {
            vec![PortSpec::output("out")]
        }
        fn signatures(&self) -> Vec<Signature> {
            vec![Signature::with_rate_scale(
                vec![crate::port::Accepts::Type(real32())],
                vec![real32()],
                vec![0.5],
            )]
        }
        fn process(&mut self, _: Inputs<'_>, _: Outputs<'_>) -> BlockResult<ProcessOutcome> {
            Ok(ProcessOutcome::EndOfStream)
        }
    }

    struct TwoInputs;
    impl crate::block::Block for TwoInputs {
        fn input_ports(&self) -> Vec<PortSpec> {
            vec![PortSpec::input("a"), PortSpec::input("b")]
        }
        fn output_ports(&self) -> Vec<PortSpec> {
            vec![]
        }
        fn signatures(&self) -> Vec<Signature> {
            vec![Signature::new(vec![real32(), real32()], vec![])]
        }
        fn process(&mut self, _: Inputs<'_>, _: Outputs<'_>) -> BlockResult<ProcessOutcome> {
            Ok(ProcessOutcome::EndOfStream)
        }
    }

    fn real32() -> SampleType {
        SampleType::Fixed(crate::types::FixedType {
            name: std::sync::Arc::from("real32"),
            size: 4,
            align: 4,
        })
    }

    #[test]
    fn rate_scale_is_applied_downstream() {
        let mut g = Graph::new();
        let src = g.add(Source { rate: 48000.0 });
        let half = g.add(HalfRate);
        g.connect(src, 0, half, 0).unwrap();

        resolve::resolve(&mut g).unwrap();
        propagate(&mut g).unwrap();

        assert_eq!(g.node(half).resolved_input_rate, Some(48000.0));
    }

    #[test]
    fn mismatched_input_rates_fail() {
        let mut g = Graph::new();
        let src_a = g.add(Source { rate: 48000.0 });
        let src_b = g.add(Source { rate: 96000.0 });
        let sink = g.add(TwoInputs);
        g.connect(src_a, 0, sink, 0).unwrap();
        g.connect(src_b, 0, sink, 1).unwrap();

        resolve::resolve(&mut g).unwrap();
        let err = propagate(&mut g).unwrap_err();
        assert!(matches!(
            err,
            StartError::Construction(GraphConstructionError::RateMismatch { .. })
        ));
    }
}
