//! Shared block fixtures for the black-box integration tests. Each test
//! binary pulls in only the pieces it needs; nothing here depends on any
//! crate-internal item, only the public API re-exported from `flowdsp`.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use flowdsp::{
    Block, BlockResult, Complex32, FixedType, Inputs, Outputs, PortInput, ProcessOutcome, SampleType,
    Signature,
};

pub fn real32() -> SampleType {
    SampleType::Fixed(FixedType { name: Arc::from("real32"), size: 4, align: 4 })
}

pub fn complex32() -> SampleType {
    SampleType::Fixed(FixedType { name: Arc::from("complex32"), size: 8, align: 4 })
}

/// Emits `remaining` samples of `1.0`, then ends the stream.
pub struct RealSource {
    pub remaining: usize,
    pub rate: f64,
}

impl Block for RealSource {
    fn input_ports(&self) -> Vec<flowdsp::PortSpec> {
        vec![]
    }
    fn output_ports(&self) -> Vec<flowdsp::PortSpec> {
        vec![flowdsp::PortSpec::output("out")]
    }
    fn signatures(&self) -> Vec<Signature> {
        vec![Signature::new(vec![], vec![real32()])]
    }
    fn nominal_rate(&self) -> Option<f64> {
        Some(self.rate)
    }
    fn process(&mut self, _inputs: Inputs<'_>, mut outputs: Outputs<'_>) -> BlockResult<ProcessOutcome> {
        if self.remaining == 0 {
            return Ok(ProcessOutcome::EndOfStream);
        }
        let out = outputs.ports[0].samples();
        let n = out.capacity().min(self.remaining);
        for sample in out.as_f32_mut()[..n].iter_mut() {
            *sample = 1.0;
        }
        self.remaining -= n;
        Ok(ProcessOutcome::Produced { counts: vec![n] })
    }
}

/// Emits `remaining` constant complex samples.
pub struct ComplexSource {
    pub remaining: usize,
    pub value: Complex32,
    pub rate: f64,
}

impl Block for ComplexSource {
    fn input_ports(&self) -> Vec<flowdsp::PortSpec> {
        vec![]
    }
    fn output_ports(&self) -> Vec<flowdsp::PortSpec> {
        vec![flowdsp::PortSpec::output("out")]
    }
    fn signatures(&self) -> Vec<Signature> {
        vec![Signature::new(vec![], vec![complex32()])]
    }
    fn nominal_rate(&self) -> Option<f64> {
        Some(self.rate)
    }
    fn process(&mut self, _inputs: Inputs<'_>, mut outputs: Outputs<'_>) -> BlockResult<ProcessOutcome> {
        if self.remaining == 0 {
            return Ok(ProcessOutcome::EndOfStream);
        }
        let out = outputs.ports[0].samples();
        let n = out.capacity().min(self.remaining);
        for sample in out.as_complex32_mut()[..n].iter_mut() {
            *sample = self.value;
        }
        self.remaining -= n;
        Ok(ProcessOutcome::Produced { counts: vec![n] })
    }
}

/// Multiplies every incoming real sample by a constant factor.
pub struct Gain {
    pub factor: f32,
}

impl Block for Gain {
    fn input_ports(&self) -> Vec<flowdsp::PortSpec> {
        vec![flowdsp::PortSpec::input("in")]
    }
    fn output_ports(&self) -> Vec<flowdsp::PortSpec> {
        vec![flowdsp::PortSpec::output("out")]
    }
    fn signatures(&self) -> Vec<Signature> {
        vec![Signature::new(vec![real32()], vec![real32()])]
    }
    fn process(&mut self, inputs: Inputs<'_>, mut outputs: Outputs<'_>) -> BlockResult<ProcessOutcome> {
        match &inputs.ports[0] {
            PortInput::Closed => Ok(ProcessOutcome::EndOfStream),
            PortInput::Samples { .. } => {
                let data = inputs.ports[0].as_f32();
                let n = data.len();
                let out = outputs.ports[0].samples();
                let cap = out.capacity().min(n);
                let dst = out.as_f32_mut();
                for i in 0..cap {
                    dst[i] = data[i] * self.factor;
                }
                Ok(ProcessOutcome::Produced { counts: vec![cap] })
            }
            PortInput::Objects { .. } => Ok(ProcessOutcome::EndOfStream),
        }
    }
}

/// Sums every incoming real sample into a shared total.
pub struct SumSink {
    pub total: Arc<Mutex<f32>>,
}

impl Block for SumSink {
    fn input_ports(&self) -> Vec<flowdsp::PortSpec> {
        vec![flowdsp::PortSpec::input("in")]
    }
    fn output_ports(&self) -> Vec<flowdsp::PortSpec> {
        vec![]
    }
    fn signatures(&self) -> Vec<Signature> {
        vec![Signature::new(vec![real32()], vec![])]
    }
    fn process(&mut self, inputs: Inputs<'_>, _outputs: Outputs<'_>) -> BlockResult<ProcessOutcome> {
        match &inputs.ports[0] {
            PortInput::Closed => Ok(ProcessOutcome::EndOfStream),
            PortInput::Samples { .. } => {
                *self.total.lock() += inputs.ports[0].as_f32().iter().sum::<f32>();
                Ok(ProcessOutcome::Produced { counts: vec![] })
            }
            PortInput::Objects { .. } => Ok(ProcessOutcome::EndOfStream),
        }
    }
}

/// Sums every incoming real sample, sleeping a little after each call to
/// model a slow downstream consumer for the back-pressure scenario.
pub struct SlowSumSink {
    pub total: Arc<Mutex<f32>>,
    pub delay: Duration,
}

impl Block for SlowSumSink {
    fn input_ports(&self) -> Vec<flowdsp::PortSpec> {
        vec![flowdsp::PortSpec::input("in")]
    }
    fn output_ports(&self) -> Vec<flowdsp::PortSpec> {
        vec![]
    }
    fn signatures(&self) -> Vec<Signature> {
        vec![Signature::new(vec![real32()], vec![])]
    }
    fn process(&mut self, inputs: Inputs<'_>, _outputs: Outputs<'_>) -> BlockResult<ProcessOutcome> {
        match &inputs.ports[0] {
            PortInput::Closed => Ok(ProcessOutcome::EndOfStream),
            PortInput::Samples { .. } => {
                *self.total.lock() += inputs.ports[0].as_f32().iter().sum::<f32>();
                std::thread::sleep(self.delay);
                Ok(ProcessOutcome::Produced { counts: vec![] })
            }
            PortInput::Objects { .. } => Ok(ProcessOutcome::EndOfStream),
        }
    }
}

/// Sums the real component of every incoming complex sample.
pub struct ComplexSumSink {
    pub total_re: Arc<Mutex<f32>>,
}

impl Block for ComplexSumSink {
    fn input_ports(&self) -> Vec<flowdsp::PortSpec> {
        vec![flowdsp::PortSpec::input("in")]
    }
    fn output_ports(&self) -> Vec<flowdsp::PortSpec> {
        vec![]
    }
    fn signatures(&self) -> Vec<Signature> {
        vec![Signature::new(vec![complex32()], vec![])]
    }
    fn process(&mut self, inputs: Inputs<'_>, _outputs: Outputs<'_>) -> BlockResult<ProcessOutcome> {
        match &inputs.ports[0] {
            PortInput::Closed => Ok(ProcessOutcome::EndOfStream),
            PortInput::Samples { .. } => {
                *self.total_re.lock() +=
                    inputs.ports[0].as_complex32().iter().map(|c| c.re).sum::<f32>();
                Ok(ProcessOutcome::Produced { counts: vec![] })
            }
            PortInput::Objects { .. } => Ok(ProcessOutcome::EndOfStream),
        }
    }
}

/// A two-input elementwise multiplier with one candidate signature per
/// sample kind; the resolver picks whichever candidate its producers'
/// resolved types satisfy.
pub struct Multiply {
    kind: Option<&'static str>,
}

impl Multiply {
    pub fn new() -> Self {
        Self { kind: None }
    }
}

impl Block for Multiply {
    fn input_ports(&self) -> Vec<flowdsp::PortSpec> {
        vec![flowdsp::PortSpec::input("a"), flowdsp::PortSpec::input("b")]
    }
    fn output_ports(&self) -> Vec<flowdsp::PortSpec> {
        vec![flowdsp::PortSpec::output("out")]
    }
    fn signatures(&self) -> Vec<Signature> {
        vec![
            Signature::new(vec![real32(), real32()], vec![real32()]),
            Signature::new(vec![complex32(), complex32()], vec![complex32()]),
        ]
    }
    fn initialize(&mut self, resolved: &Signature, _input_rate: f64) -> BlockResult<()> {
        self.kind = Some(if resolved.outputs[0].name() == "complex32" { "complex" } else { "real" });
        Ok(())
    }
    fn process(&mut self, inputs: Inputs<'_>, mut outputs: Outputs<'_>) -> BlockResult<ProcessOutcome> {
        if matches!(inputs.ports[0], PortInput::Closed) || matches!(inputs.ports[1], PortInput::Closed) {
            return Ok(ProcessOutcome::EndOfStream);
        }
        match self.kind.expect("initialize runs before the first process call") {
            "real" => {
                let a = inputs.ports[0].as_f32();
                let b = inputs.ports[1].as_f32();
                let n = a.len().min(b.len());
                let out = outputs.ports[0].samples();
                let cap = out.capacity().min(n);
                let dst = out.as_f32_mut();
                for i in 0..cap {
                    dst[i] = a[i] * b[i];
                }
                Ok(ProcessOutcome::Produced { counts: vec![cap] })
            }
            "complex" => {
                let a = inputs.ports[0].as_complex32();
                let b = inputs.ports[1].as_complex32();
                let n = a.len().min(b.len());
                let out = outputs.ports[0].samples();
                let cap = out.capacity().min(n);
                let dst = out.as_complex32_mut();
                for i in 0..cap {
                    dst[i] = a[i] * b[i];
                }
                Ok(ProcessOutcome::Produced { counts: vec![cap] })
            }
            _ => unreachable!(),
        }
    }
}

/// A source with two candidate signatures that produce the identical
/// `real32` output type and are otherwise unconstrained by any neighbor;
/// records which candidate the resolver actually picked via `initialize`.
pub struct AmbiguousSource {
    pub remaining: usize,
    pub chosen_rate_scale: Arc<Mutex<Option<f64>>>,
}

impl Block for AmbiguousSource {
    fn input_ports(&self) -> Vec<flowdsp::PortSpec> {
        vec![]
    }
    fn output_ports(&self) -> Vec<flowdsp::PortSpec> {
        vec![flowdsp::PortSpec::output("out")]
    }
    fn signatures(&self) -> Vec<Signature> {
        vec![
            Signature::with_rate_scale(vec![], vec![real32()], vec![1.0]),
            Signature::with_rate_scale(vec![], vec![real32()], vec![2.0]),
        ]
    }
    fn nominal_rate(&self) -> Option<f64> {
        Some(48000.0)
    }
    fn initialize(&mut self, resolved: &Signature, _input_rate: f64) -> BlockResult<()> {
        *self.chosen_rate_scale.lock() = Some(resolved.rate_scale[0]);
        Ok(())
    }
    fn process(&mut self, _inputs: Inputs<'_>, mut outputs: Outputs<'_>) -> BlockResult<ProcessOutcome> {
        if self.remaining == 0 {
            return Ok(ProcessOutcome::EndOfStream);
        }
        let out = outputs.ports[0].samples();
        let n = out.capacity().min(self.remaining);
        for sample in out.as_f32_mut()[..n].iter_mut() {
            *sample = 1.0;
        }
        self.remaining -= n;
        Ok(ProcessOutcome::Produced { counts: vec![n] })
    }
}

/// A trivial structured object carrying a single `u32` payload, encoded as
/// four big-endian bytes.
#[derive(Debug)]
pub struct Packet(pub u32);
impl flowdsp::ObjectValue for Packet {}

pub fn register_packet_type(registry: &flowdsp::TypeRegistry) -> SampleType {
    registry
        .register_object(
            "Packet",
            ["json"],
            |v: &dyn flowdsp::ObjectValue| v.downcast_ref::<Packet>().unwrap().0.to_be_bytes().to_vec(),
            |bytes: &[u8]| Box::new(Packet(u32::from_be_bytes(bytes.try_into().unwrap()))) as Box<dyn flowdsp::ObjectValue>,
        )
        .unwrap()
}

/// Emits `remaining` packets, each carrying its own index as payload.
pub struct PacketSource {
    pub remaining: u32,
    pub total: u32,
    pub packet_type: SampleType,
}

impl Block for PacketSource {
    fn input_ports(&self) -> Vec<flowdsp::PortSpec> {
        vec![]
    }
    fn output_ports(&self) -> Vec<flowdsp::PortSpec> {
        vec![flowdsp::PortSpec::output("out")]
    }
    fn signatures(&self) -> Vec<Signature> {
        vec![Signature::new(vec![], vec![self.packet_type.clone()])]
    }
    fn nominal_rate(&self) -> Option<f64> {
        Some(1000.0)
    }
    fn process(&mut self, _inputs: Inputs<'_>, mut outputs: Outputs<'_>) -> BlockResult<ProcessOutcome> {
        if self.remaining == 0 {
            return Ok(ProcessOutcome::EndOfStream);
        }
        let payload = self.total - self.remaining;
        outputs.ports[0].objects().emit(payload.to_be_bytes().to_vec());
        self.remaining -= 1;
        Ok(ProcessOutcome::Produced { counts: vec![] })
    }
}

/// Accepts any type carrying the `json` capability and sums the decoded
/// packet payloads.
pub struct PacketSink {
    pub sum: Arc<Mutex<u64>>,
    pub count: Arc<Mutex<usize>>,
}

impl Block for PacketSink {
    fn input_ports(&self) -> Vec<flowdsp::PortSpec> {
        vec![flowdsp::PortSpec::input("in")]
    }
    fn output_ports(&self) -> Vec<flowdsp::PortSpec> {
        vec![]
    }
    fn signatures(&self) -> Vec<Signature> {
        vec![Signature::with_rate_scale(vec![flowdsp::Accepts::capability("json")], vec![], vec![])]
    }
    fn process(&mut self, inputs: Inputs<'_>, _outputs: Outputs<'_>) -> BlockResult<ProcessOutcome> {
        match &inputs.ports[0] {
            PortInput::Closed => Ok(ProcessOutcome::EndOfStream),
            PortInput::Objects { sample_type, frames } => {
                let SampleType::Object(object_type) = sample_type else {
                    panic!("json-capable port must carry an object type");
                };
                for frame in frames.iter() {
                    let value = object_type.decode(frame);
                    let packet = value.downcast_ref::<Packet>().expect("packet payload");
                    *self.sum.lock() += packet.0 as u64;
                    *self.count.lock() += 1;
                }
                Ok(ProcessOutcome::Produced { counts: vec![] })
            }
            PortInput::Samples { .. } => Ok(ProcessOutcome::EndOfStream),
        }
    }
}
