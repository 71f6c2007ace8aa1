//! Ports and their accepted-type sets.

use std::fmt;
use std::sync::Arc;

use crate::types::SampleType;

/// What an input port will accept.
#[derive(Clone)]
pub enum Accepts {
    /// Exactly one concrete type.
    Type(SampleType),
    /// Any type whose registered capability set satisfies this predicate,
    /// e.g. "any type with a JSON encoder". Predicate inputs never
    /// back-constrain the producer; they are only evaluated against a
    /// concrete producer type during signature resolution.
    Predicate {
        /// A short diagnostic label, e.g. `"has encode"`.
        label: Arc<str>,
        test: Arc<dyn Fn(&SampleType) -> bool + Send + Sync>,
    },
}

impl fmt::Debug for Accepts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Accepts::Type(t) => write!(f, "Type({})", t.name()),
            Accepts::Predicate { label, .. } => write!(f, "Predicate({label})"),
        }
    }
}

impl Accepts {
    /// Builds a predicate acceptor that tests for a named capability tag.
    pub fn capability(tag: impl Into<String>) -> Self {
        let tag = tag.into();
        let label: Arc<str> = Arc::from(format!("has capability {tag:?}"));
        Accepts::Predicate {
            label,
            test: Arc::new(move |ty| ty.has_capability(&tag)),
        }
    }

    /// `true` if a producer output of the given concrete type satisfies this
    /// acceptor.
    pub fn accepts(&self, ty: &SampleType) -> bool {
        match self {
            Accepts::Type(t) => t == ty,
            Accepts::Predicate { test, .. } => test(ty),
        }
    }

    /// The concrete type, if this acceptor is not a predicate.
    pub fn concrete(&self) -> Option<&SampleType> {
        match self {
            Accepts::Type(t) => Some(t),
            Accepts::Predicate { .. } => None,
        }
    }
}

/// The direction of a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Input,
    Output,
}

/// A named endpoint on a block.
#[derive(Debug, Clone)]
pub struct PortSpec {
    pub name: Arc<str>,
    pub direction: Direction,
    /// The minimum number of samples this input needs available before a
    /// reader will call `process` (default 1, per the block contract).
    pub min_input: usize,
}

impl PortSpec {
    /// Creates an input port spec with the default minimum of one sample.
    pub fn input(name: impl Into<String>) -> Self {
        Self {
            name: Arc::from(name.into()),
            direction: Direction::Input,
            min_input: 1,
        }
    }

    /// Creates an input port spec requiring at least `min_input` samples
    /// before `process` is invoked.
    pub fn input_with_min(name: impl Into<String>, min_input: usize) -> Self {
        Self {
            name: Arc::from(name.into()),
            direction: Direction::Input,
            min_input,
        }
    }

    /// Creates an output port spec.
    pub fn output(name: impl Into<String>) -> Self {
        Self {
            name: Arc::from(name.into()),
            direction: Direction::Output,
            min_input: 0,
        }
    }
}
