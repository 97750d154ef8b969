//! # annograph-core
//!
//! The in-memory annotation graph engine.
//!
//! An annotation graph superimposes two structures over one set of
//! annotations:
//! - a temporal graph, where anchors (points in time or text) are the nodes
//!   and annotations are the edges between them
//! - an ownership tree, where every annotation belongs to a parent on the
//!   parent layer, all the way up to the graph itself
//!
//! This crate keeps both consistent under edits made in any order, answers
//! hierarchy and interval queries, extracts fragments, and records changes
//! so that only deltas need to reach a store.
//!
//! ## Architectural Constraints
//!
//! - Pure Rust: no async, no network, no file system outside `config`
//! - Deterministic: `BTreeMap`/`BTreeSet` everywhere results are ordered
//! - Single writer: every mutation goes through `&mut Graph`
//! - Storage agnostic: repositories sit behind [`GraphStore`]

// =============================================================================
// MODULES
// =============================================================================

pub mod anchor;
pub mod annotation;
pub mod chain;
pub mod change;
pub mod config;
pub mod formats;
pub mod fragment;
pub mod graph;
pub mod interchange;
pub mod layer;
pub mod mutation;
pub mod navigation;
pub mod primitives;
pub mod schema;
pub mod store;
pub mod tracking;
pub mod types;

// =============================================================================
// RE-EXPORTS: Core Types (from types module)
// =============================================================================

pub use types::{Alignment, AnchorId, AnnotationId, Attributes, GraphError, LayerId};

// =============================================================================
// RE-EXPORTS: Graph Model
// =============================================================================

pub use anchor::Anchor;
pub use annotation::Annotation;
pub use chain::AnchorChain;
pub use change::{
    Change, ChangeState, ChangeTracker, EntityRef, Operation, TrackedAttribute, TrackedValue,
};
pub use fragment::{FragmentId, fragment_id, parse_fragment_id};
pub use graph::{Graph, Side};
pub use layer::Layer;
pub use schema::Schema;

// =============================================================================
// RE-EXPORTS: Boundaries
// =============================================================================

pub use config::GraphConfig;
pub use formats::{SerializableGraph, SnapshotHeader, graph_from_bytes, graph_to_bytes};
pub use interchange::{AnchorObject, AnnotationObject, GraphObject, LayerNode, SchemaObject};
pub use store::{GraphStore, InMemoryStore, Page};
