//! A real-time DSP flow-graph runtime: a directed graph of typed sample
//! streams between computational blocks, with signature resolution, rate
//! propagation, and a multi-threaded scheduler moving samples end-to-end.
//!
//! The pieces, in the order a graph passes through them:
//!
//! - [`types`] -- the sample type registry (fixed records and structured
//!   objects).
//! - [`port`] / [`signature`] -- port acceptance and per-block candidate
//!   signatures.
//! - [`block`] -- the `Block` trait every graph node implements.
//! - [`graph`] -- the graph model: `add`, `connect`, topology queries.
//! - [`resolve`] -- the signature resolver, run once at `start()`.
//! - [`rate`] -- the rate propagator, run immediately after resolution.
//! - [`buffer`] -- the ring and object-queue transports.
//! - [`scheduler`] -- one OS thread per block, driven by [`Graph::start`].
//! - [`control`] -- the control channel carrying lifecycle events back to
//!   the supervisor.
//! - [`config`] -- graph-wide tunables (`GraphConfig`).
//! - [`platform`] -- a small host capability probe.
//! - [`error`] -- the construction-time and runtime error hierarchies.
//!
//! A minimal program:
//!
//! ```no_run
//! use flowdsp::{Graph, GraphConfig};
//!
//! let mut graph = Graph::new();
//! // graph.add(..); graph.connect(..);
//! let runtime = graph.start(&GraphConfig::new()).expect("graph failed to start");
//! runtime.wait().expect("graph failed while running");
//! ```

pub mod block;
pub mod buffer;
pub mod config;
pub mod control;
pub mod error;
pub mod graph;
pub mod platform;
pub mod port;
pub mod rate;
pub mod resolve;
pub mod scheduler;
pub mod signature;
pub mod types;
pub mod view;

pub use block::{
    Block, BlockId, Inputs, ObjectsOut, Outputs, PortInput, PortOutput, ProcessOutcome, SamplesOut,
};
pub use config::GraphConfig;
pub use control::{ControlMsg, ControlReceiver, ControlSender};
pub use error::{
    BlockError, BlockResult, ConstructionResult, GraphConstructionError, GraphRunError, StartError,
    StartResult,
};
pub use graph::{Edge, Graph};
pub use platform::{probe, PlatformInfo};
pub use port::{Accepts, Direction, PortSpec};
pub use scheduler::{BlockStatus, Runtime};
pub use signature::Signature;
pub use types::{Complex32, FixedType, ObjectType, ObjectValue, SampleType, TypeRegistry};
