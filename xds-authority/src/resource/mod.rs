//! Resource types, decoding, and the injected type lookup.
//!
//! The authority never understands resource kinds. It carries a
//! [`ResourceType`] handle (type URL, wire semantics, decoder) obtained from
//! an explicitly constructed [`TypeRegistry`] that the caller injects at
//! authority construction. This keeps resource-kind registration out of
//! process-global state.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::error::Error;
use crate::message::ResourceAny;

/// The opaque payload of a decoded resource.
///
/// Implementations are the typed resource structs of an outer layer; the
/// authority only moves them around behind an `Arc`.
pub trait ResourceData: Send + Sync + 'static {
    /// Upcast for downcasting back to the concrete resource type.
    fn as_any(&self) -> &dyn Any;
}

/// A decoded resource: its name plus a type-erased payload.
#[derive(Clone)]
pub struct DecodedResource {
    name: String,
    data: Arc<dyn ResourceData>,
}

impl DecodedResource {
    /// Create a decoded resource from its name and payload.
    pub fn new(name: impl Into<String>, data: Arc<dyn ResourceData>) -> Self {
        Self {
            name: name.into(),
            data,
        }
    }

    /// The resource name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The type-erased payload.
    pub fn data(&self) -> &Arc<dyn ResourceData> {
        &self.data
    }

    /// Downcast the payload to a concrete resource type.
    pub fn downcast_ref<T: ResourceData>(&self) -> Option<&T> {
        self.data.as_any().downcast_ref()
    }
}

impl fmt::Debug for DecodedResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecodedResource")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Outcome of decoding a single wrapped resource.
#[derive(Debug)]
pub enum DecodeResult {
    /// The resource decoded and validated successfully.
    Resource(DecodedResource),
    /// The resource failed validation, but its name could be extracted.
    ResourceError {
        /// Name of the failed resource.
        name: String,
        /// What went wrong.
        error: Error,
    },
    /// The payload could not be deserialized at all; no name is known.
    TopLevelError(Error),
}

/// Decodes and validates one resource kind.
pub trait Decoder: Send + Sync + 'static {
    /// Decode a single wrapped resource from a discovery response.
    fn decode(&self, resource: ResourceAny) -> DecodeResult;
}

struct TypeInner {
    type_url: String,
    full_state_on_wire: bool,
    decoder: Arc<dyn Decoder>,
}

/// A handle to one resource kind: its type URL, wire semantics, and decoder.
///
/// Cheap to clone. Equality and hashing consider only the type URL, so the
/// handle can key subscription maps.
#[derive(Clone)]
pub struct ResourceType {
    inner: Arc<TypeInner>,
}

impl ResourceType {
    /// Create a resource type.
    ///
    /// `full_state_on_wire` declares that every response for this type
    /// enumerates the complete resource set, making the omission of a
    /// subscribed name an authoritative statement that it does not exist.
    pub fn new(
        type_url: impl Into<String>,
        full_state_on_wire: bool,
        decoder: impl Decoder,
    ) -> Self {
        Self {
            inner: Arc::new(TypeInner {
                type_url: type_url.into(),
                full_state_on_wire,
                decoder: Arc::new(decoder),
            }),
        }
    }

    /// The type URL identifying this resource kind.
    pub fn type_url(&self) -> &str {
        &self.inner.type_url
    }

    /// Whether responses for this type carry the complete resource set.
    pub fn full_state_on_wire(&self) -> bool {
        self.inner.full_state_on_wire
    }

    /// Decode a single wrapped resource of this type.
    pub fn decode(&self, resource: ResourceAny) -> DecodeResult {
        self.inner.decoder.decode(resource)
    }
}

impl PartialEq for ResourceType {
    fn eq(&self, other: &Self) -> bool {
        self.inner.type_url == other.inner.type_url
    }
}

impl Eq for ResourceType {}

impl Hash for ResourceType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.type_url.hash(state);
    }
}

impl fmt::Debug for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceType")
            .field("type_url", &self.inner.type_url)
            .field("full_state_on_wire", &self.inner.full_state_on_wire)
            .finish_non_exhaustive()
    }
}

/// Lookup from type URL to [`ResourceType`], injected into the authority.
///
/// Built once by the caller from the resource kinds it understands, then
/// shared behind an `Arc`. Responses for type URLs absent from the registry
/// are ignored by the stream coordinator.
#[derive(Default)]
pub struct TypeRegistry {
    types: HashMap<String, ResourceType>,
}

impl TypeRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a resource type, replacing any previous entry for its URL.
    pub fn register(&mut self, rtype: ResourceType) {
        self.types.insert(rtype.type_url().to_string(), rtype);
    }

    /// Look up the resource type for a type URL.
    pub fn get(&self, type_url: &str) -> Option<&ResourceType> {
        self.types.get(type_url)
    }
}

impl fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeRegistry")
            .field("types", &self.types.keys().collect::<Vec<_>>())
            .finish()
    }
}
