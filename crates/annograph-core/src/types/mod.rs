//! # Core Type Definitions
//!
//! This module contains the shared vocabulary of the annotation graph:
//! - Identifiers (`AnchorId`, `AnnotationId`, `LayerId`)
//! - Layer alignment kinds (`Alignment`)
//! - The custom attribute side table (`Attributes`)
//! - Error types (`GraphError`)
//!
//! ## Determinism Guarantees
//!
//! All identifiers implement `Ord` so that they can key `BTreeMap`/`BTreeSet`
//! collections. Iteration order over any graph table is therefore a function
//! of the ids alone, never of insertion or hashing.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

// =============================================================================
// IDENTIFIERS
// =============================================================================

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            /// Create an identifier from anything string-like.
            #[must_use]
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Get the identifier as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// True if no identifier has been assigned yet.
            #[must_use]
            pub fn is_unassigned(&self) -> bool {
                self.0.is_empty()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }

        impl From<&$name> for $name {
            fn from(id: &$name) -> Self {
                id.clone()
            }
        }
    };
}

string_id!(
    /// Identifier of an anchor (a node of the temporal graph).
    AnchorId
);

string_id!(
    /// Identifier of an annotation. The graph's own id is also an
    /// `AnnotationId`: it is the parent of every top-level annotation.
    AnnotationId
);

string_id!(
    /// Identifier of a layer in the schema.
    LayerId
);

// =============================================================================
// ALIGNMENT
// =============================================================================

/// How annotations on a layer relate to the timeline.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(into = "u8", try_from = "u8")]
pub enum Alignment {
    /// Unaligned "tag" layer: annotations share their parent's anchors.
    #[default]
    None,
    /// Point alignment: start and end anchor are the same instant.
    Instant,
    /// Interval alignment: independent start and end anchors.
    Interval,
}

impl Alignment {
    /// True for layers whose annotations carry their own anchors.
    #[must_use]
    pub const fn is_aligned(self) -> bool {
        !matches!(self, Self::None)
    }
}

impl From<Alignment> for u8 {
    fn from(alignment: Alignment) -> Self {
        match alignment {
            Alignment::None => 0,
            Alignment::Instant => 1,
            Alignment::Interval => 2,
        }
    }
}

impl TryFrom<u8> for Alignment {
    type Error = GraphError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::None),
            1 => Ok(Self::Instant),
            2 => Ok(Self::Interval),
            other => Err(GraphError::SerializationError(format!(
                "Unknown alignment: {other}"
            ))),
        }
    }
}

// =============================================================================
// ATTRIBUTES SIDE TABLE
// =============================================================================

/// True if `key` names a transient attribute.
///
/// Transient keys start with anything other than an ASCII letter or digit
/// (e.g. `@offsetMin`). They are scratch state: never serialized, never copied.
#[must_use]
pub fn is_transient_key(key: &str) -> bool {
    !key.chars()
        .next()
        .is_some_and(|first| first.is_ascii_alphanumeric())
}

/// Custom attributes attached to an anchor, annotation or graph.
///
/// Serializable keys and transient keys live in separate maps. Only the
/// serializable map takes part in serde and in `Clone`-for-copy operations
/// performed through [`Attributes::copy_serializable`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(
    from = "BTreeMap<String, serde_json::Value>",
    into = "BTreeMap<String, serde_json::Value>"
)]
pub struct Attributes {
    custom: BTreeMap<String, serde_json::Value>,
    transient: BTreeMap<String, serde_json::Value>,
}

impl Attributes {
    /// Create an empty side table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set an attribute, routing it to the transient map when the key says so.
    pub fn set(&mut self, key: impl Into<String>, value: serde_json::Value) {
        let key = key.into();
        if is_transient_key(&key) {
            self.transient.insert(key, value);
        } else {
            self.custom.insert(key, value);
        }
    }

    /// Look up an attribute of either kind.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        if is_transient_key(key) {
            self.transient.get(key)
        } else {
            self.custom.get(key)
        }
    }

    /// Remove an attribute of either kind.
    pub fn remove(&mut self, key: &str) -> Option<serde_json::Value> {
        if is_transient_key(key) {
            self.transient.remove(key)
        } else {
            self.custom.remove(key)
        }
    }

    /// Serializable attributes, in key order.
    pub fn custom(&self) -> impl Iterator<Item = (&String, &serde_json::Value)> {
        self.custom.iter()
    }

    /// Number of serializable attributes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.custom.len()
    }

    /// True if there are no serializable attributes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.custom.is_empty()
    }

    /// Copy of the serializable attributes only.
    #[must_use]
    pub fn copy_serializable(&self) -> Self {
        Self {
            custom: self.custom.clone(),
            transient: BTreeMap::new(),
        }
    }
}

impl From<BTreeMap<String, serde_json::Value>> for Attributes {
    fn from(map: BTreeMap<String, serde_json::Value>) -> Self {
        let mut attributes = Self::new();
        for (key, value) in map {
            if !is_transient_key(&key) {
                attributes.custom.insert(key, value);
            }
        }
        attributes
    }
}

impl From<Attributes> for BTreeMap<String, serde_json::Value> {
    fn from(attributes: Attributes) -> Self {
        attributes.custom
    }
}

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Errors that can occur while building or editing an annotation graph.
///
/// - Unresolved references are *not* errors: they are deferred.
/// - Navigation misses are *not* errors: they return `None` or an empty `Vec`.
/// - Everything else uses `Result<T, GraphError>`; the library never panics.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GraphError {
    /// The anchor id is not present in the graph.
    #[error("Anchor not found: {0}")]
    AnchorNotFound(AnchorId),

    /// The annotation id is not present in the graph.
    #[error("Annotation not found: {0}")]
    AnnotationNotFound(AnnotationId),

    /// The layer id is not present in the schema.
    #[error("Layer not found: {0}")]
    LayerNotFound(LayerId),

    /// An anchor with the same id is already in the graph.
    #[error("Duplicate anchor id: {0}")]
    DuplicateAnchor(AnchorId),

    /// An annotation with the same id is already in the graph.
    #[error("Duplicate annotation id: {0}")]
    DuplicateAnnotation(AnnotationId),

    /// A structural invariant would be broken by the requested operation.
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// A serialization or deserialization error occurred.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Configuration could not be loaded or is inconsistent.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// A repository operation failed.
    #[error("Store error: {0}")]
    StoreError(String),
}

impl From<serde_json::Error> for GraphError {
    fn from(error: serde_json::Error) -> Self {
        Self::SerializationError(error.to_string())
    }
}

// =============================================================================
// TESTS
// =============================================================================
