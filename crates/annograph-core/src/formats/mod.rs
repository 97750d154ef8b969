//! # Formats
//!
//! Byte-level encodings of a graph. Text interchange (JSON) lives in
//! [`crate::interchange`].

pub mod persistence;

pub use persistence::{
    MAX_SNAPSHOT_SIZE, SerializableAnchor, SerializableAnnotation, SerializableGraph,
    SnapshotHeader, graph_from_bytes, graph_to_bytes,
};
