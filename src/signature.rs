//! Signatures: a concrete per-port type assignment a block may declare
//! candidates for, and that the resolver (component E) reduces to exactly
//! one per block.

use crate::port::Accepts;
use crate::types::SampleType;

/// One candidate signature: a concrete type per input and output port, plus
/// an optional rate-scaling factor per output (default `1.0`).
#[derive(Debug, Clone)]
pub struct Signature {
    pub inputs: Vec<Accepts>,
    pub outputs: Vec<SampleType>,
    pub rate_scale: Vec<f64>,
}

impl Signature {
    /// Builds a signature from concrete input types (no predicates), output
    /// types, and a rate-scale of `1.0` for every output.
    pub fn new(inputs: Vec<SampleType>, outputs: Vec<SampleType>) -> Self {
        let rate_scale = vec![1.0; outputs.len()];
        Self {
            inputs: inputs.into_iter().map(Accepts::Type).collect(),
            outputs,
            rate_scale,
        }
    }

    /// Builds a signature from arbitrary input acceptors (including
    /// predicate-typed inputs), output types, and an explicit per-output
    /// rate-scale vector.
    pub fn with_rate_scale(
        inputs: Vec<Accepts>,
        outputs: Vec<SampleType>,
        rate_scale: Vec<f64>,
    ) -> Self {
        assert_eq!(outputs.len(), rate_scale.len());
        Self {
            inputs,
            outputs,
            rate_scale,
        }
    }
}
