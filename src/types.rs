//! The sample type registry (component A).
//!
//! A [`SampleType`] is either a fixed-size numeric record or a variable-sized
//! structured object with a total, inverse codec pair. Identity is the type's
//! name: two types compare equal iff their names match, regardless of how
//! each was constructed.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use downcast_rs::{impl_downcast, Downcast};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::error::GraphConstructionError;

/// A value carried by a structured-object stream.
///
/// Block authors that exchange structured objects implement this for their
/// own payload type; the registry only ever touches it through the
/// `encode`/`decode` pair supplied at registration, never by inspecting the
/// value itself.
pub trait ObjectValue: Downcast + fmt::Debug + Send + Sync {}
impl_downcast!(ObjectValue);

type EncodeFn = dyn Fn(&dyn ObjectValue) -> Vec<u8> + Send + Sync;
type DecodeFn = dyn Fn(&[u8]) -> Box<dyn ObjectValue> + Send + Sync;

/// A complex single-precision sample, the in-memory form of the `complex32`
/// fixed type.
#[derive(Clone, Copy, Debug, PartialEq)]
#[repr(C)]
pub struct Complex32 {
    pub re: f32,
    pub im: f32,
}

impl Complex32 {
    pub fn new(re: f32, im: f32) -> Self {
        Self { re, im }
    }
}

impl std::ops::Mul for Complex32 {
    type Output = Complex32;
    fn mul(self, rhs: Complex32) -> Complex32 {
        Complex32::new(
            self.re * rhs.re - self.im * rhs.im,
            self.re * rhs.im + self.im * rhs.re,
        )
    }
}

/// A fixed-size numeric record type: all samples are identical-sized,
/// contiguous, and addressable by index.
#[derive(Clone)]
pub struct FixedType {
    pub(crate) name: Arc<str>,
    pub size: usize,
    pub align: usize,
}

impl fmt::Debug for FixedType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FixedType")
            .field("name", &self.name)
            .field("size", &self.size)
            .field("align", &self.align)
            .finish()
    }
}

/// A variable-sized structured-object type with a total, inverse codec.
#[derive(Clone)]
pub struct ObjectType {
    pub(crate) name: Arc<str>,
    pub(crate) capabilities: Arc<HashSet<String>>,
    encode: Arc<EncodeFn>,
    decode: Arc<DecodeFn>,
}

impl fmt::Debug for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectType")
            .field("name", &self.name)
            .field("capabilities", &self.capabilities)
            .finish()
    }
}

impl ObjectType {
    /// Encodes a value into its on-wire byte form.
    pub fn encode(&self, value: &dyn ObjectValue) -> Vec<u8> {
        (self.encode)(value)
    }

    /// Decodes a byte form back into a value.
    pub fn decode(&self, bytes: &[u8]) -> Box<dyn ObjectValue> {
        (self.decode)(bytes)
    }

    /// Returns `true` if this type was registered with the given capability
    /// tag (e.g. `"json"`), the mechanism predicate-typed ports test against.
    pub fn has_capability(&self, tag: &str) -> bool {
        self.capabilities.contains(tag)
    }
}

/// One registered sample type: a fixed record or a structured object.
#[derive(Clone, Debug)]
pub enum SampleType {
    /// A fixed-size numeric record.
    Fixed(FixedType),
    /// A variable-sized structured object.
    Object(ObjectType),
}

impl SampleType {
    /// The type's name, which is also its identity.
    pub fn name(&self) -> &str {
        match self {
            SampleType::Fixed(f) => &f.name,
            SampleType::Object(o) => &o.name,
        }
    }

    /// The byte size of one sample, for fixed types only.
    pub fn fixed_size(&self) -> Option<usize> {
        match self {
            SampleType::Fixed(f) => Some(f.size),
            SampleType::Object(_) => None,
        }
    }

    /// `true` if this type carries the given capability tag. Fixed types
    /// never carry capability tags.
    pub fn has_capability(&self, tag: &str) -> bool {
        match self {
            SampleType::Fixed(_) => false,
            SampleType::Object(o) => o.has_capability(tag),
        }
    }

    fn same_definition(&self, other: &SampleType) -> bool {
        match (self, other) {
            (SampleType::Fixed(a), SampleType::Fixed(b)) => {
                a.size == b.size && a.align == b.align
            }
            (SampleType::Object(a), SampleType::Object(b)) => a.capabilities == b.capabilities,
            _ => false,
        }
    }
}

impl PartialEq for SampleType {
    /// Two types compare equal iff their names match. This is the identity
    /// rule the signature resolver relies on when unifying producer and
    /// consumer types across an edge.
    fn eq(&self, other: &Self) -> bool {
        self.name() == other.name()
    }
}
impl Eq for SampleType {}

/// The process-wide, append-only table of registered sample types.
///
/// Registration is idempotent for identical definitions; registering the
/// same name with a different shape is rejected with
/// [`GraphConstructionError::TypeConflict`]. Lookups are O(1).
pub struct TypeRegistry {
    types: RwLock<FxHashMap<Arc<str>, SampleType>>,
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TypeRegistry {
    /// Creates a registry pre-seeded with the common fixed numeric
    /// primitives named in the data model: `real32`, `complex32`, `byte`,
    /// `bit`.
    pub fn new() -> Self {
        let registry = Self {
            types: RwLock::new(FxHashMap::default()),
        };
        registry
            .register_fixed("real32", 4, 4)
            .expect("built-in type registration cannot conflict");
        registry
            .register_fixed("complex32", 8, 4)
            .expect("built-in type registration cannot conflict");
        registry
            .register_fixed("byte", 1, 1)
            .expect("built-in type registration cannot conflict");
        registry
            .register_fixed("bit", 1, 1)
            .expect("built-in type registration cannot conflict");
        registry
    }

    /// Registers a fixed-size numeric record type.
    pub fn register_fixed(
        &self,
        name: impl Into<String>,
        size: usize,
        align: usize,
    ) -> Result<SampleType, GraphConstructionError> {
        let name: Arc<str> = Arc::from(name.into());
        let candidate = SampleType::Fixed(FixedType {
            name: name.clone(),
            size,
            align,
        });
        self.insert_or_check(name, candidate)
    }

    /// Registers a structured-object type with a total, inverse codec and an
    /// optional set of capability tags used by predicate-typed input ports.
    pub fn register_object<E, D>(
        &self,
        name: impl Into<String>,
        capabilities: impl IntoIterator<Item = impl Into<String>>,
        encode: E,
        decode: D,
    ) -> Result<SampleType, GraphConstructionError>
    where
        E: Fn(&dyn ObjectValue) -> Vec<u8> + Send + Sync + 'static,
        D: Fn(&[u8]) -> Box<dyn ObjectValue> + Send + Sync + 'static,
    {
        let name: Arc<str> = Arc::from(name.into());
        let candidate = SampleType::Object(ObjectType {
            name: name.clone(),
            capabilities: Arc::new(capabilities.into_iter().map(Into::into).collect()),
            encode: Arc::new(encode),
            decode: Arc::new(decode),
        });
        self.insert_or_check(name, candidate)
    }

    fn insert_or_check(
        &self,
        name: Arc<str>,
        candidate: SampleType,
    ) -> Result<SampleType, GraphConstructionError> {
        let mut types = self.types.write();
        match types.get(&name) {
            Some(existing) if existing.same_definition(&candidate) => Ok(existing.clone()),
            Some(_) => Err(GraphConstructionError::TypeConflict {
                name: name.to_string(),
            }),
            None => {
                types.insert(name, candidate.clone());
                Ok(candidate)
            }
        }
    }

    /// Looks up a registered type by name.
    pub fn lookup(&self, name: &str) -> Option<SampleType> {
        self.types.read().get(name).cloned()
    }
}
