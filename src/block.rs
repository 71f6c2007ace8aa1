//! The block contract (component C).

use std::fmt;
use std::sync::Arc;

use downcast_rs::{impl_downcast, Downcast};

use crate::error::BlockResult;
use crate::port::PortSpec;
use crate::signature::Signature;
use crate::types::SampleType;

/// Opaque per-block identity, distinct from a block's human-readable name.
/// This is a thin newtype over the graph's node index; block authors never
/// construct one themselves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockId(pub(crate) petgraph::graph::NodeIndex<u32>);

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "block#{}", self.0.index())
    }
}

/// A read-only view of one input port's available data for this `process`
/// call. Unconnected inputs never occur once a graph has started (every
/// input has exactly one inbound edge by then); [`PortInput::Closed`]
/// represents the upstream producer having ended the stream.
pub enum PortInput<'a> {
    /// The upstream producer has closed; no more data will arrive on this
    /// port. This is the block-facing form of `BufferClosed` -- it never
    /// reaches the graph user directly.
    Closed,
    /// A contiguous run of fixed-size samples.
    Samples {
        sample_type: &'a SampleType,
        bytes: &'a [u8],
        sample_size: usize,
    },
    /// A batch of framed structured objects, in production order.
    Objects {
        sample_type: &'a SampleType,
        frames: &'a [Arc<[u8]>],
    },
}

impl<'a> PortInput<'a> {
    /// The number of samples or objects available on this port.
    pub fn len(&self) -> usize {
        match self {
            PortInput::Closed => 0,
            PortInput::Samples { bytes, sample_size, .. } => bytes.len() / sample_size,
            PortInput::Objects { frames, .. } => frames.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// View this port's samples as `f32`, if it carries `real32` data.
    pub fn as_f32(&self) -> &'a [f32] {
        match self {
            PortInput::Samples { bytes, .. } => crate::view::as_f32_slice(bytes),
            _ => &[],
        }
    }

    /// View this port's samples as [`Complex32`](crate::types::Complex32),
    /// if it carries `complex32` data.
    pub fn as_complex32(&self) -> &'a [crate::types::Complex32] {
        match self {
            PortInput::Samples { bytes, .. } => crate::view::as_complex32_slice(bytes),
            _ => &[],
        }
    }

    /// View this port's raw object frames, for a structured-object input.
    pub fn as_objects(&self) -> &'a [Arc<[u8]>] {
        match self {
            PortInput::Objects { frames, .. } => frames,
            _ => &[],
        }
    }
}

/// A writable view of one output port's reserved space for this `process`
/// call, for fixed-sample ports. The block writes into the reserved region
/// and returns how many samples it actually produced; it may produce fewer
/// than the reserved capacity.
pub struct SamplesOut<'a> {
    pub(crate) bytes: &'a mut [u8],
    pub(crate) sample_size: usize,
}

impl<'a> SamplesOut<'a> {
    /// The maximum number of samples that may be written.
    pub fn capacity(&self) -> usize {
        self.bytes.len() / self.sample_size
    }

    /// A mutable `f32` view of the reserved region.
    pub fn as_f32_mut(&mut self) -> &mut [f32] {
        crate::view::as_f32_slice_mut(self.bytes)
    }

    /// A mutable [`Complex32`](crate::types::Complex32) view of the reserved
    /// region.
    pub fn as_complex32_mut(&mut self) -> &mut [crate::types::Complex32] {
        crate::view::as_complex32_slice_mut(self.bytes)
    }
}

/// A sink for a structured-object output port: the block emits zero or more
/// frames during one `process` call, each delivered to the downstream
/// object queue as soon as `emit` is called.
pub struct ObjectsOut<'a> {
    pub(crate) emit: &'a mut dyn FnMut(Vec<u8>),
}

impl<'a> ObjectsOut<'a> {
    /// Emits one encoded object frame.
    pub fn emit(&mut self, bytes: Vec<u8>) {
        (self.emit)(bytes)
    }
}

/// A writable view of one output port, matching its resolved type.
pub enum PortOutput<'a> {
    Samples(SamplesOut<'a>),
    Objects(ObjectsOut<'a>),
}

impl<'a> PortOutput<'a> {
    /// Convenience accessor for a fixed-sample output; panics if this port
    /// is a structured-object output, which would indicate the block
    /// disagrees with its own resolved signature.
    pub fn samples(&mut self) -> &mut SamplesOut<'a> {
        match self {
            PortOutput::Samples(s) => s,
            PortOutput::Objects(_) => panic!("output port is structured-object, not samples"),
        }
    }

    /// Convenience accessor for a structured-object output.
    pub fn objects(&mut self) -> &mut ObjectsOut<'a> {
        match self {
            PortOutput::Objects(o) => o,
            PortOutput::Samples(_) => panic!("output port is samples, not structured-object"),
        }
    }
}

/// The inputs presented to one `process` call, one entry per input port in
/// declaration order.
pub struct Inputs<'a> {
    pub ports: &'a [PortInput<'a>],
}

/// The outputs available to one `process` call, one entry per output port
/// in declaration order. For `Samples` outputs the capacity reflects the
/// scheduler's current process-chunk sizing, honoring the edge's rate
/// scaling relative to the block's input rate.
pub struct Outputs<'a> {
    pub ports: &'a mut [PortOutput<'a>],
}

/// What a `process` call reports back to the scheduler.
pub enum ProcessOutcome {
    /// Data was produced. `counts[i]` is how many samples were written into
    /// output `i`'s reserved region (ignored for `Objects` outputs, whose
    /// frames were already delivered via `emit`).
    Produced { counts: Vec<usize> },
    /// Not enough input was available to make progress; the scheduler
    /// should wait for more before calling `process` again.
    NeedMoreInput,
    /// This source has no more data; its output buffers should be closed.
    EndOfStream,
}

/// The declarative surface a block presents to the runtime: ports,
/// candidate signatures, an optional initializer, and a mandatory process
/// step. Blocks have no hidden global state; any state is private and
/// confined to the single execution unit that owns them.
pub trait Block: Downcast + Send {
    /// A diagnostic name, defaulted from the block's type name.
    fn name(&self) -> String {
        let full = std::any::type_name::<Self>();
        full.rsplit("::").next().unwrap_or(full).to_string()
    }

    /// This block's input port declarations, in the order signatures index
    /// them.
    fn input_ports(&self) -> Vec<PortSpec>;

    /// This block's output port declarations, in the order signatures index
    /// them.
    fn output_ports(&self) -> Vec<PortSpec>;

    /// The candidate signatures this block can be resolved to. Must return
    /// at least one.
    fn signatures(&self) -> Vec<Signature>;

    /// Called once, after signature resolution and rate propagation, before
    /// the first `process` call. The block may allocate internal state here
    /// and reject the assignment it was given.
    #[allow(unused_variables)]
    fn initialize(&mut self, resolved: &Signature, input_rate: f64) -> BlockResult<()> {
        Ok(())
    }

    /// The sample rate this block injects into the graph. Required for
    /// sources (blocks with no input ports); every other block inherits its
    /// rate from its producer and this is never consulted for them.
    fn nominal_rate(&self) -> Option<f64> {
        None
    }

    /// Runs one step of computation. Source blocks receive an empty
    /// `inputs.ports`; sink blocks receive an empty `outputs.ports`.
    fn process(&mut self, inputs: Inputs<'_>, outputs: Outputs<'_>) -> BlockResult<ProcessOutcome>;
}
impl_downcast!(Block);

impl fmt::Debug for dyn Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}
