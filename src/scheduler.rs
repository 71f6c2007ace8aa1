//! The scheduler and data transport (component G). Partitions the graph into
//! one execution unit per block -- the default fusion policy -- allocates one
//! shared buffer per output port, and drives each unit on its own OS thread
//! via [`std::thread::Builder::spawn`], coordinated only through those
//! buffers and the control channel (component H). Fused multi-block
//! execution units are not implemented by this core; see DESIGN.md.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::block::{BlockId, Inputs, ObjectsOut, Outputs, PortInput, PortOutput, ProcessOutcome, SamplesOut};
use crate::buffer::{ObjectQueue, ReadGuard, RingBuffer, WriteGuard};
use crate::config::GraphConfig;
use crate::control::{self, ControlMsg, ControlReceiver, ControlSender};
use crate::error::{BlockError, GraphConstructionError, GraphRunError, StartError, StartResult};
use crate::graph::Graph;
use crate::rate;
use crate::resolve;
use crate::types::SampleType;

/// A per-block lifecycle snapshot, assembled only from the control channel's
/// running history -- the supervisor never inspects worker state directly.
#[derive(Debug, Clone, PartialEq)]
pub enum BlockStatus {
    /// The worker for this block has not sent its first `Started` message.
    NotStarted,
    /// The worker is executing its run loop.
    Running,
    /// The worker exited cleanly; its output buffers are closed.
    Stopped,
    /// The worker exited after a fatal error or panic.
    Errored(String),
}

/// One (block, output port)'s backing transport, shared by every fan-out
/// consumer.
#[derive(Clone)]
enum EdgeBuffer {
    Samples(Arc<RingBuffer>, SampleType),
    Objects(Arc<ObjectQueue>, SampleType),
}

impl EdgeBuffer {
    fn add_consumer(&self) -> usize {
        match self {
            EdgeBuffer::Samples(ring, _) => ring.add_consumer(),
            EdgeBuffer::Objects(queue, _) => queue.add_consumer(),
        }
    }

    fn sample_type(&self) -> &SampleType {
        match self {
            EdgeBuffer::Samples(_, ty) | EdgeBuffer::Objects(_, ty) => ty,
        }
    }

    fn close_producer(&self) {
        match self {
            EdgeBuffer::Samples(ring, _) => ring.close_producer(),
            EdgeBuffer::Objects(queue, _) => queue.close_producer(),
        }
    }

    fn close_consumer(&self, consumer: usize) {
        match self {
            EdgeBuffer::Samples(ring, _) => ring.close_consumer(consumer),
            EdgeBuffer::Objects(queue, _) => queue.close_consumer(consumer),
        }
    }
}

/// One input port's wiring: the shared buffer it reads from, this worker's
/// consumer cursor on it, and the `min_input` threshold declared by the port.
struct InputSlot {
    buffer: EdgeBuffer,
    consumer: usize,
    min_input: usize,
}

/// One output port's wiring: the buffer every downstream consumer reads from.
struct OutputSlot {
    buffer: EdgeBuffer,
}

impl Graph {
    /// Resolves signatures, propagates rates, allocates buffers, and spawns
    /// one execution unit per block. Returns a [`Runtime`] handle; the graph
    /// itself is left frozen, with every block's implementation moved out
    /// into its worker (see [`Graph::take_block`]).
    ///
    /// Fails synchronously, before any worker is spawned, if an input port
    /// is unconnected, no signature assignment agrees across the graph, or a
    /// block's `initialize` hook rejects its resolved signature.
    pub fn start(&mut self, config: &GraphConfig) -> StartResult<Runtime> {
        if self.is_frozen() {
            panic!("graph is already started: call stop() and wait() before starting again");
        }

        if let Some((block, input)) = self.unconnected_inputs().into_iter().next() {
            return Err(StartError::Construction(GraphConstructionError::UnconnectedInput {
                block,
                input,
            }));
        }

        resolve::resolve(self)?;
        rate::propagate(self)?;
        self.freeze();

        let ids = self.all_block_ids();
        let names: FxHashMap<BlockId, String> =
            ids.iter().map(|&id| (id, self.node(id).block.name())).collect();

        let mut output_buffers: FxHashMap<(BlockId, usize), EdgeBuffer> = FxHashMap::default();
        for &id in &ids {
            let resolved = self
                .node(id)
                .resolved_signature
                .clone()
                .expect("every block has a resolved signature by this point in start()");
            for (port, ty) in resolved.outputs.iter().enumerate() {
                let buffer = match ty {
                    SampleType::Fixed(fixed) => EdgeBuffer::Samples(
                        RingBuffer::new(fixed.size, config.ring_capacity_samples()),
                        ty.clone(),
                    ),
                    SampleType::Object(_) => {
                        EdgeBuffer::Objects(ObjectQueue::new(config.object_queue_capacity()), ty.clone())
                    }
                };
                output_buffers.insert((id, port), buffer);
            }
        }

        let mut input_slots: FxHashMap<BlockId, Vec<Option<InputSlot>>> = ids
            .iter()
            .map(|&id| (id, (0..self.node(id).input_specs.len()).map(|_| None).collect()))
            .collect();

        for &id in &ids {
            for (source, edge) in self.incoming_with_source(id) {
                let min_input = self.node(id).input_specs[edge.target_input].min_input;
                let out_buf = output_buffers
                    .get(&(source, edge.source_output))
                    .expect("every edge's source output has an allocated buffer")
                    .clone();
                let consumer = out_buf.add_consumer();
                input_slots.get_mut(&id).expect("every block has an input_slots entry")[edge.target_input] =
                    Some(InputSlot { buffer: out_buf, consumer, min_input });
            }
        }

        let (control_tx, control_rx) = control::channel();
        let shutdown = Arc::new(AtomicBool::new(false));
        let status: Arc<Mutex<FxHashMap<BlockId, BlockStatus>>> =
            Arc::new(Mutex::new(ids.iter().map(|&id| (id, BlockStatus::NotStarted)).collect()));
        let stall_warn_threshold = Duration::from_millis(config.stall_warn_threshold_ms());

        let mut handles = Vec::with_capacity(ids.len());
        for &id in &ids {
            let name = names[&id].clone();
            let block = self.take_block(id);

            let inputs: Vec<InputSlot> = input_slots
                .remove(&id)
                .expect("every block has an input_slots entry")
                .into_iter()
                .map(|slot| slot.expect("every input port has an inbound edge, checked above"))
                .collect();

            let n_outputs = self.node(id).output_specs.len();
            let outputs: Vec<OutputSlot> = (0..n_outputs)
                .map(|port| OutputSlot { buffer: output_buffers[&(id, port)].clone() })
                .collect();

            let worker = Worker {
                id,
                name,
                block,
                inputs,
                outputs,
                chunk_size: config.chunk_size(),
                stall_warn_threshold,
                shutdown: shutdown.clone(),
                control: control_tx.clone(),
            };

            log::debug!("starting execution unit for {} ({id})", worker.name);
            let handle = thread::Builder::new()
                .name(format!("flowdsp-{}", worker.name))
                .spawn(move || worker.run())
                .expect("failed to spawn execution unit thread");
            handles.push((id, handle));
        }
        drop(control_tx);

        let names = Arc::new(names);
        let reaper_status = status.clone();
        let reaper_shutdown = shutdown.clone();
        let reaper_names = names.clone();
        let reaper = thread::Builder::new()
            .name("flowdsp-control".to_string())
            .spawn(move || reap(control_rx, reaper_status, reaper_shutdown, reaper_names))
            .expect("failed to spawn control-channel reaper thread");

        Ok(Runtime {
            state: Mutex::new(Some(WaitState { handles, reaper })),
            result: Mutex::new(None),
            shutdown,
            status,
        })
    }
}

struct WaitState {
    handles: Vec<(BlockId, JoinHandle<()>)>,
    reaper: JoinHandle<Vec<GraphRunError>>,
}

/// A handle to a running graph, returned by [`Graph::start`]. Cloning is not
/// supported: there is exactly one supervisor per run.
pub struct Runtime {
    state: Mutex<Option<WaitState>>,
    result: Mutex<Option<Result<(), Vec<GraphRunError>>>>,
    shutdown: Arc<AtomicBool>,
    status: Arc<Mutex<FxHashMap<BlockId, BlockStatus>>>,
}

impl Runtime {
    /// Requests cooperative shutdown: every worker observes this within one
    /// `CANCEL_POLL_INTERVAL` of being suspended on a buffer. Idempotent.
    pub fn stop(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }

    /// Blocks until every execution unit has terminated, returning the first
    /// fatal error observed per block, if any. Idempotent: a second call
    /// returns the same result without re-joining already-joined threads.
    pub fn wait(&self) -> Result<(), Vec<GraphRunError>> {
        if let Some(result) = self.result.lock().clone() {
            return result;
        }

        let taken = self.state.lock().take();
        let result = match taken {
            Some(WaitState { handles, reaper }) => {
                for (id, handle) in handles {
                    if handle.join().is_err() {
                        log::error!("execution unit for {id} did not shut down cleanly");
                    }
                }
                let errors = reaper.join().unwrap_or_default();
                if errors.is_empty() {
                    Ok(())
                } else {
                    Err(errors)
                }
            }
            None => {
                // A concurrent caller already took the join handles; wait for
                // it to publish the result rather than joining twice.
                loop {
                    if let Some(result) = self.result.lock().clone() {
                        break result;
                    }
                    thread::yield_now();
                }
            }
        };

        *self.result.lock() = Some(result.clone());
        result
    }

    /// A snapshot of every block's lifecycle status.
    pub fn status(&self) -> FxHashMap<BlockId, BlockStatus> {
        self.status.lock().clone()
    }
}

fn reap(
    rx: ControlReceiver,
    status: Arc<Mutex<FxHashMap<BlockId, BlockStatus>>>,
    shutdown: Arc<AtomicBool>,
    names: Arc<FxHashMap<BlockId, String>>,
) -> Vec<GraphRunError> {
    let mut first_errors: FxHashMap<BlockId, GraphRunError> = FxHashMap::default();

    while let Some(msg) = rx.recv_blocking() {
        let block = msg.block();
        let name = names.get(&block).cloned().unwrap_or_else(|| block.to_string());

        match msg {
            ControlMsg::Started { .. } => {
                status.lock().insert(block, BlockStatus::Running);
                log::debug!("block {name} ({block}) started");
            }
            ControlMsg::Stopped { .. } => {
                let mut status = status.lock();
                if !matches!(status.get(&block), Some(BlockStatus::Errored(_))) {
                    status.insert(block, BlockStatus::Stopped);
                }
                log::debug!("block {name} ({block}) stopped");
            }
            ControlMsg::Error { kind, detail, .. } => {
                log::error!("block {name} ({block}) failed: {kind}: {detail}");
                status.lock().insert(block, BlockStatus::Errored(detail.clone()));
                shutdown.store(true, Ordering::Relaxed);
                first_errors.entry(block).or_insert_with(|| {
                    if kind == "panic" {
                        GraphRunError::WorkerPanicked { block, name: name.clone(), detail: detail.clone() }
                    } else {
                        GraphRunError::BlockRuntimeError {
                            block,
                            name: name.clone(),
                            source: BlockError::Runtime(detail.clone()),
                        }
                    }
                });
            }
        }
    }

    let mut errors: Vec<GraphRunError> = first_errors.into_values().collect();
    errors.sort_by_key(|e| match e {
        GraphRunError::BlockInitFailed { block, .. }
        | GraphRunError::BlockRuntimeError { block, .. }
        | GraphRunError::WorkerPanicked { block, .. } => block.0.index(),
    });
    errors
}

struct Worker {
    id: BlockId,
    name: String,
    block: Box<dyn crate::block::Block>,
    inputs: Vec<InputSlot>,
    outputs: Vec<OutputSlot>,
    chunk_size: usize,
    stall_warn_threshold: Duration,
    shutdown: Arc<AtomicBool>,
    control: ControlSender,
}

impl Worker {
    fn run(self) {
        let Worker { id, name, mut block, inputs, outputs, chunk_size, stall_warn_threshold, shutdown, control } =
            self;

        control.send(ControlMsg::Started { block: id });

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            run_loop(&mut *block, &inputs, &outputs, chunk_size, stall_warn_threshold, &name, &shutdown)
        }));

        close_all_inputs(&inputs);
        close_all_outputs(&outputs);

        match outcome {
            Ok(Ok(())) => control.send(ControlMsg::Stopped { block: id }),
            Ok(Err(err)) => {
                log::error!("block {name} ({id}) process step failed: {err}");
                control.send(ControlMsg::Error { block: id, kind: err.kind(), detail: err.to_string() });
            }
            Err(panic) => {
                let detail = panic_message(panic);
                log::error!("block {name} ({id}) panicked: {detail}");
                control.send(ControlMsg::Error { block: id, kind: "panic", detail });
            }
        }
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "block panicked with a non-string payload".to_string()
    }
}

fn close_all_inputs(inputs: &[InputSlot]) {
    for slot in inputs {
        slot.buffer.close_consumer(slot.consumer);
    }
}

fn close_all_outputs(outputs: &[OutputSlot]) {
    for slot in outputs {
        slot.buffer.close_producer();
    }
}

/// One input port's view for the current `process` call: either a held read
/// guard over sample bytes, a batch of already-popped object frames, or a
/// marker that the port's producer has closed.
enum InputGuard<'a> {
    Closed,
    Samples(ReadGuard<'a>),
    Objects(Vec<Arc<[u8]>>),
}

enum OutputPrep<'a> {
    Samples(WriteGuard<'a>),
    Objects(Box<dyn FnMut(Vec<u8>) + 'a>),
}

/// Reserves space on every output port for this `process` call. Returns
/// `None` if any output's reservation cannot proceed -- either shutdown was
/// requested, or every consumer on that output has closed (nothing downstream
/// will ever read it again) -- in which case the worker should finish.
fn reserve_outputs<'a>(
    outputs: &'a [OutputSlot],
    chunk_size: usize,
    shutdown: &'a AtomicBool,
) -> Option<Vec<OutputPrep<'a>>> {
    let mut preps = Vec::with_capacity(outputs.len());
    for slot in outputs {
        let prep = match &slot.buffer {
            EdgeBuffer::Samples(ring, _) => {
                OutputPrep::Samples(ring.reserve_write_cancelable(chunk_size, shutdown)?)
            }
            EdgeBuffer::Objects(queue, _) => {
                let queue = queue.clone();
                let emit: Box<dyn FnMut(Vec<u8>) + 'a> =
                    Box::new(move |bytes| { queue.push_cancelable(bytes, shutdown); });
                OutputPrep::Objects(emit)
            }
        };
        preps.push(prep);
    }
    Some(preps)
}

/// Drives one execution unit until its inputs are exhausted, it is told to
/// stop, or its `process` step fails.
///
/// Each call of the outer loop gathers whatever is currently available on
/// every input port (blocking up to each port's declared `min_input`),
/// reserves space on every output port, and invokes `process` exactly once.
/// A `Produced` outcome is assumed to have fully consumed what it was handed
/// on every input port (the block contract carries no partial-consumption
/// count); `NeedMoreInput` advances nothing, so the same bytes are handed
/// back next time alongside whatever newly arrived.
fn run_loop(
    block: &mut dyn crate::block::Block,
    inputs: &[InputSlot],
    outputs: &[OutputSlot],
    chunk_size: usize,
    stall_warn_threshold: Duration,
    name: &str,
    shutdown: &AtomicBool,
) -> Result<(), BlockError> {
    let mut closed = vec![false; inputs.len()];

    loop {
        if shutdown.load(Ordering::Relaxed) {
            return Ok(());
        }

        let wait_start = Instant::now();

        let mut guards: Vec<InputGuard<'_>> = Vec::with_capacity(inputs.len());
        for (i, slot) in inputs.iter().enumerate() {
            if closed[i] {
                guards.push(InputGuard::Closed);
                continue;
            }
            let guard = match &slot.buffer {
                EdgeBuffer::Samples(ring, _) => {
                    match ring.peek_read_min_cancelable(slot.consumer, slot.min_input, chunk_size, shutdown) {
                        Ok(g) => InputGuard::Samples(g),
                        Err(_) => {
                            closed[i] = true;
                            InputGuard::Closed
                        }
                    }
                }
                EdgeBuffer::Objects(queue, _) => {
                    match queue.pop_batch_cancelable(slot.consumer, chunk_size.max(1), shutdown) {
                        Ok(batch) => InputGuard::Objects(batch),
                        Err(_) => {
                            closed[i] = true;
                            InputGuard::Closed
                        }
                    }
                }
            };
            guards.push(guard);
        }

        if shutdown.load(Ordering::Relaxed) {
            return Ok(());
        }

        let all_closed = !inputs.is_empty() && closed.iter().all(|&c| c);

        let port_inputs: Vec<PortInput<'_>> = inputs
            .iter()
            .zip(guards.iter())
            .map(|(slot, guard)| match guard {
                InputGuard::Closed => PortInput::Closed,
                InputGuard::Samples(g) => {
                    let sample_size = match &slot.buffer {
                        EdgeBuffer::Samples(ring, _) => ring.sample_size(),
                        EdgeBuffer::Objects(..) => unreachable!("samples guard implies samples buffer"),
                    };
                    PortInput::Samples { sample_type: slot.buffer.sample_type(), bytes: g.as_bytes(g.len()), sample_size }
                }
                InputGuard::Objects(frames) => {
                    PortInput::Objects { sample_type: slot.buffer.sample_type(), frames: frames.as_slice() }
                }
            })
            .collect();

        let Some(mut preps) = reserve_outputs(outputs, chunk_size, shutdown) else {
            return Ok(());
        };

        let mut port_outputs: Vec<PortOutput<'_>> = outputs
            .iter()
            .zip(preps.iter_mut())
            .map(|(slot, prep)| match prep {
                OutputPrep::Samples(guard) => {
                    let sample_size = match &slot.buffer {
                        EdgeBuffer::Samples(ring, _) => ring.sample_size(),
                        EdgeBuffer::Objects(..) => unreachable!("samples prep implies samples buffer"),
                    };
                    let cap = guard.capacity();
                    PortOutput::Samples(SamplesOut { bytes: guard.as_bytes_mut(cap), sample_size })
                }
                OutputPrep::Objects(emit) => PortOutput::Objects(ObjectsOut { emit: &mut **emit }),
            })
            .collect();

        let stalled = wait_start.elapsed();
        if stalled > stall_warn_threshold {
            log::warn!("block {name} stalled {stalled:?} waiting on its buffers before processing");
        }

        let mut outcome = block.process(Inputs { ports: &port_inputs }, Outputs { ports: &mut port_outputs })?;

        if all_closed && matches!(outcome, ProcessOutcome::NeedMoreInput) {
            // Every input has ended and the block still wants more: no
            // further input will ever arrive, so treat this as end of stream
            // rather than spinning forever re-offering the same closed ports.
            outcome = ProcessOutcome::EndOfStream;
        }

        drop(port_inputs);
        drop(port_outputs);

        match outcome {
            ProcessOutcome::Produced { counts } => {
                for guard in guards {
                    if let InputGuard::Samples(g) = guard {
                        let n = g.len();
                        g.advance(n);
                    }
                }
                for (i, prep) in preps.into_iter().enumerate() {
                    if let OutputPrep::Samples(guard) = prep {
                        let n = counts.get(i).copied().unwrap_or(0).min(guard.capacity());
                        guard.commit(n);
                    }
                }
            }
            ProcessOutcome::NeedMoreInput => {
                for prep in preps {
                    if let OutputPrep::Samples(guard) = prep {
                        guard.commit(0);
                    }
                }
                if inputs.is_empty() {
                    // A source declining to produce without any input to wait
                    // on; avoid a tight busy spin until it has something.
                    thread::sleep(Duration::from_micros(100));
                }
            }
            ProcessOutcome::EndOfStream => {
                for guard in guards {
                    if let InputGuard::Samples(g) = guard {
                        let n = g.len();
                        g.advance(n);
                    }
                }
                for prep in preps {
                    if let OutputPrep::Samples(guard) = prep {
                        guard.commit(0);
                    }
                }
                return Ok(());
            }
        }
    }
}
