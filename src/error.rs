//! Error types for graph construction and graph execution.

use thiserror::Error;

use crate::block::BlockId;
use crate::types::SampleType;

/// Errors raised synchronously while building or starting a graph.
///
/// These are the five construction-time kinds named in the error design:
/// incompatible type registration, signature resolution failures, duplicate
/// fan-in, and rate mismatches. All of them are raised from `connect` or
/// `start` and never cross the control channel.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum GraphConstructionError {
    /// A type was re-registered under the same name with a different
    /// definition.
    #[error("type {name:?} already registered with a conflicting definition")]
    TypeConflict {
        /// The name under which the conflicting definitions were registered.
        name: String,
    },

    /// No combination of candidate signatures agrees across an edge.
    #[error("no signature agreement across the edge feeding {block:?}: {detail}")]
    SignatureMismatch {
        /// The block whose last candidate signature was eliminated.
        block: BlockId,
        /// A human-readable explanation naming the offending edge.
        detail: String,
    },

    /// More than one candidate signature survived both resolution passes.
    #[error("block {block:?} has {remaining} ambiguous signatures after resolution")]
    AmbiguousSignature {
        /// The block left with more than one surviving candidate.
        block: BlockId,
        /// How many candidates remained.
        remaining: usize,
    },

    /// More than one producer was connected to the same input port.
    #[error("input {input} of block {block:?} already has a producer")]
    FanInConflict {
        /// The block whose input port already has an inbound edge.
        block: BlockId,
        /// The input port index.
        input: usize,
    },

    /// A block observed inconsistent sample rates across its inputs.
    #[error("block {block:?} sees mismatched input rates ({first} vs {second})")]
    RateMismatch {
        /// The block with mismatched input rates.
        block: BlockId,
        /// The rate seen on the first input port.
        first: f64,
        /// The rate seen on a later input port that disagreed.
        second: f64,
    },

    /// A connection referenced a port index that does not exist.
    #[error("block {block:?} has no {direction} port {index}")]
    PortOutOfBounds {
        /// The block being connected.
        block: BlockId,
        /// Whether the missing port was an input or an output.
        direction: &'static str,
        /// The out-of-bounds port index.
        index: usize,
    },

    /// The graph contains a cycle and no block opted in to feedback.
    #[error("graph contains a cycle through block {block:?}")]
    Cycle {
        /// A block participating in the detected cycle.
        block: BlockId,
    },

    /// An input port has no inbound edge at `start()` time.
    #[error("block {block:?} has no producer connected to input {input}")]
    UnconnectedInput {
        /// The block with an unfed input.
        block: BlockId,
        /// The unconnected input port index.
        input: usize,
    },
}

/// The error a block author's `process` step can fail with.
///
/// This is what crosses the block-author interface; the scheduler wraps it
/// into a [`GraphRunError`] before relaying it over the control channel.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum BlockError {
    /// `initialize` rejected its resolved signature or assigned rate.
    #[error("block initialization failed: {0}")]
    InitFailed(String),

    /// `process` failed fatally.
    #[error("block process step failed: {0}")]
    Runtime(String),

    /// A declared type did not match the data actually produced.
    #[error("output {index} produced type {actual:?}, signature declared {expected:?}")]
    OutputTypeMismatch {
        /// The output port index.
        index: usize,
        /// The type declared in the resolved signature.
        expected: SampleType,
        /// The type actually produced.
        actual: SampleType,
    },
}

/// Errors observed while a started graph is running, aggregated at `wait()`.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum GraphRunError {
    /// A block's `initialize` hook failed.
    #[error("block {block:?} ({name}) failed to initialize: {source}")]
    BlockInitFailed {
        /// The block that failed to initialize.
        block: BlockId,
        /// The block's diagnostic name.
        name: String,
        /// The underlying error.
        #[source]
        source: BlockError,
    },

    /// A block's `process` step failed fatally at runtime.
    #[error("block {block:?} ({name}) failed during processing: {source}")]
    BlockRuntimeError {
        /// The block that failed.
        block: BlockId,
        /// The block's diagnostic name.
        name: String,
        /// The underlying error.
        #[source]
        source: BlockError,
    },

    /// A worker thread panicked instead of returning an error.
    #[error("block {block:?} ({name}) panicked: {detail}")]
    WorkerPanicked {
        /// The block running on the panicked worker.
        block: BlockId,
        /// The block's diagnostic name.
        name: String,
        /// The panic payload, stringified.
        detail: String,
    },
}

/// Errors `Graph::start()` can fail with, synchronously, before any worker is
/// spawned.
///
/// `initialize()` runs during rate propagation, itself part of `start()`, so
/// its failure is surfaced synchronously here -- wrapping the same
/// `GraphRunError` variant the control channel would carry for a purely
/// runtime failure, rather than inventing a second representation for the
/// same fact.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum StartError {
    /// Graph topology, type, or rate resolution failed before any block was
    /// initialized.
    #[error(transparent)]
    Construction(#[from] GraphConstructionError),

    /// A block's `initialize` hook rejected its resolved signature or rate.
    #[error(transparent)]
    Init(#[from] GraphRunError),
}

impl BlockError {
    /// A short, stable tag for this error's kind, carried over the control
    /// channel (`ControlMsg::Error::kind`) since the channel deals only in
    /// plain data, never `thiserror` types directly.
    pub(crate) fn kind(&self) -> &'static str {
        match self {
            BlockError::InitFailed(_) => "BlockInitFailed",
            BlockError::Runtime(_) => "BlockRuntimeError",
            BlockError::OutputTypeMismatch { .. } => "BlockRuntimeError",
        }
    }
}

/// Result alias for construction-time operations.
pub type ConstructionResult<T> = Result<T, GraphConstructionError>;

/// Result alias for a block's own fallible hooks.
pub type BlockResult<T> = Result<T, BlockError>;

/// Result alias for `Graph::start()`.
pub type StartResult<T> = Result<T, StartError>;
