//! The signature resolver (component E): a constraint propagator over the
//! graph's DAG that assigns exactly one candidate signature to each block.

use rustc_hash::FxHashMap;

use crate::block::BlockId;
use crate::error::{ConstructionResult, GraphConstructionError};
use crate::graph::Graph;
use crate::types::SampleType;

/// Resolves every block in `graph` to exactly one of its candidate
/// signatures, or fails with [`GraphConstructionError::SignatureMismatch`]
/// / [`GraphConstructionError::AmbiguousSignature`].
///
/// Resolution is deterministic: running it twice over the same graph always
/// produces the same assignment, because the tie-break rule (majority of
/// already-resolved neighbors, then declaration order) is itself
/// deterministic and never depends on iteration order beyond topology.
pub fn resolve(graph: &mut Graph) -> ConstructionResult<()> {
    let ids = graph.all_block_ids();

    // `remaining[id]` holds the surviving candidate indices for that block.
    let mut remaining: FxHashMap<BlockId, Vec<usize>> = ids
        .iter()
        .map(|&id| (id, (0..graph.node(id).signatures.len()).collect()))
        .collect();

    let topo = graph.topological_order();
    let rev_topo: Vec<BlockId> = topo.iter().rev().copied().collect();

    // Propagate in alternating reverse-topological / topological passes,
    // eliminating candidates that disagree with neighbors already narrowed
    // to a single survivor, until a full pass makes no further progress.
    loop {
        let mut changed = false;
        for order in [&rev_topo, &topo] {
            for &id in order {
                if remaining[&id].is_empty() {
                    continue;
                }
                let before = remaining[&id].len();
                let (kept, _) = eliminate(graph, id, &remaining);
                if kept.len() != before {
                    changed = true;
                }
                remaining.insert(id, kept);
            }
        }
        if !changed {
            break;
        }
    }

    // Finalize in topological order: an upstream block's tie-broken choice
    // is visible to downstream blocks in the same sweep; a downstream
    // block's choice can never retroactively change an upstream one.
    for &id in &topo {
        if remaining[&id].len() > 1 {
            let (kept, last_conflict) = eliminate(graph, id, &remaining);
            remaining.insert(id, kept);
            if remaining[&id].is_empty() {
                return Err(GraphConstructionError::SignatureMismatch {
                    block: id,
                    detail: last_conflict.unwrap_or_else(|| "no candidates remained".into()),
                });
            }
        }
        if remaining[&id].is_empty() {
            return Err(GraphConstructionError::SignatureMismatch {
                block: id,
                detail: "no candidate signature ever agreed with its neighbors".into(),
            });
        }
        let chosen = if remaining[&id].len() == 1 {
            remaining[&id][0]
        } else {
            tie_break(graph, id, &remaining[&id], &remaining)
        };
        remaining.insert(id, vec![chosen]);
        graph.node_mut(id).resolved_signature =
            Some(graph.node(id).signatures[chosen].clone());
    }

    Ok(())
}

/// Returns the resolved output type of `id`'s output port `port`, if `id`
/// has already been narrowed to exactly one candidate.
fn resolved_output_type(
    graph: &Graph,
    id: BlockId,
    port: usize,
    remaining: &FxHashMap<BlockId, Vec<usize>>,
) -> Option<SampleType> {
    let cands = remaining.get(&id)?;
    if cands.len() != 1 {
        return None;
    }
    graph.node(id).signatures[cands[0]].outputs.get(port).cloned()
}

/// Filters `id`'s remaining candidates against every neighbor that has
/// already been narrowed to a single signature, returning the surviving
/// indices and a diagnostic for the last candidate eliminated (used only if
/// the result becomes empty).
fn eliminate(
    graph: &Graph,
    id: BlockId,
    remaining: &FxHashMap<BlockId, Vec<usize>>,
) -> (Vec<usize>, Option<String>) {
    let cands = remaining[&id].clone();
    let incoming = graph.incoming(id);
    let outgoing = graph.outgoing(id);
    let signatures = &graph.node(id).signatures;

    let mut kept = Vec::with_capacity(cands.len());
    let mut last_conflict = None;

    for &c in &cands {
        let sig = &signatures[c];
        let mut ok = true;

        for (_, edge) in &incoming {
            if let Some(producer_type) =
                find_producer_type(graph, id, edge.target_input, remaining)
            {
                if let Some(acceptor) = sig.inputs.get(edge.target_input) {
                    if !acceptor.accepts(&producer_type) {
                        ok = false;
                        last_conflict = Some(format!(
                            "input {} expects {:?} but producer resolved to {}",
                            edge.target_input,
                            acceptor,
                            producer_type.name()
                        ));
                        break;
                    }
                }
            }
        }

        if ok {
            for (_, target, edge) in &outgoing {
                if let Some(required) =
                    required_input_acceptor(graph, *target, edge.target_input, remaining)
                {
                    if let Some(our_output) = sig.outputs.get(edge.source_output) {
                        if !required.accepts(our_output) {
                            ok = false;
                            last_conflict = Some(format!(
                                "output {} resolved to {} but consumer input {} requires {:?}",
                                edge.source_output,
                                our_output.name(),
                                edge.target_input,
                                required
                            ));
                            break;
                        }
                    }
                }
            }
        }

        if ok {
            kept.push(c);
        }
    }

    (kept, last_conflict)
}

fn find_producer_type(
    graph: &Graph,
    id: BlockId,
    target_input: usize,
    remaining: &FxHashMap<BlockId, Vec<usize>>,
) -> Option<SampleType> {
    use petgraph::visit::EdgeRef;
    graph
        .digraph
        .edges_directed(id.0, petgraph::Direction::Incoming)
        .find(|e| e.weight().target_input == target_input)
        .and_then(|e| {
            let source = BlockId(e.source());
            resolved_output_type(graph, source, e.weight().source_output, remaining)
        })
}

fn required_input_acceptor<'g>(
    graph: &'g Graph,
    target: BlockId,
    target_input: usize,
    remaining: &FxHashMap<BlockId, Vec<usize>>,
) -> Option<&'g crate::port::Accepts> {
    let cands = remaining.get(&target)?;
    if cands.len() != 1 {
        return None;
    }
    graph.node(target).signatures[cands[0]].inputs.get(target_input)
}

/// Applies the deterministic tie-break: prefer the candidate matching the
/// signatures already chosen for the majority of resolved neighbors, then
/// fall back to the candidate declared earliest.
///
/// Only upstream (already-finalized) neighbors can contribute to the
/// majority score, since finalization runs in topological order -- this is
/// exactly what makes resolution "locally stable": adding a downstream
/// block can never change an upstream block's chosen signature.
fn tie_break(
    graph: &Graph,
    id: BlockId,
    cands: &[usize],
    remaining: &FxHashMap<BlockId, Vec<usize>>,
) -> usize {
    let incoming = graph.incoming(id);
    let signatures = &graph.node(id).signatures;

    // Precompute each resolved producer's output type per input port, since
    // it does not depend on which of our own candidates we are scoring.
    let producer_types: Vec<(usize, Option<SampleType>)> = incoming
        .iter()
        .map(|(_, edge)| {
            let ty = find_producer_type(graph, id, edge.target_input, remaining);
            (edge.target_input, ty)
        })
        .collect();

    let mut best = cands[0];
    let mut best_score = -1i64;

    for &c in cands {
        let sig = &signatures[c];
        let mut score = 0i64;

        for (target_input, producer_ty) in &producer_types {
            if let (Some(acceptor), Some(producer_ty)) =
                (sig.inputs.get(*target_input), producer_ty)
            {
                if acceptor.accepts(producer_ty) {
                    score += 1;
                }
            }
        }

        if score > best_score {
            best_score = score;
            best = c;
        }
    }

    best
}
