//! # Snapshot Format
//!
//! Binary snapshot of a whole graph.
//!
//! Format: Header (5 bytes) + postcard-serialized graph data.
//! - 4 bytes: Magic ("AGRF")
//! - 1 byte: Version
//!
//! This is a pure transformation. File I/O belongs to the caller.
//!
//! ## Validation
//!
//! The payload size and the header are checked before anything is decoded,
//! so corrupted or hostile input fails fast without large allocations.
//!
//! Annotations are written in tree order (parents first) so a snapshot can be
//! replayed into an empty graph. Entities marked for destruction are left
//! out, and change state is not part of a snapshot: a loaded graph has no
//! pending changes.

use crate::anchor::Anchor;
use crate::annotation::Annotation;
use crate::graph::{Graph, Visit};
use crate::primitives;
use crate::schema::Schema;
use crate::types::{Attributes, GraphError};
use serde::{Deserialize, Serialize};

// =============================================================================
// LIMITS
// =============================================================================

/// Maximum accepted snapshot size, header included.
///
/// Checked before decoding so a bogus length prefix cannot drive a huge
/// allocation.
pub const MAX_SNAPSHOT_SIZE: usize = 256 * 1024 * 1024; // 256 MB

// =============================================================================
// FILE HEADER
// =============================================================================

/// The snapshot header precedes all graph data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotHeader {
    pub magic: [u8; 4],
    pub version: u8,
}

impl SnapshotHeader {
    /// Header with the current format version.
    #[must_use]
    pub fn new() -> Self {
        Self {
            magic: *primitives::MAGIC_BYTES,
            version: primitives::FORMAT_VERSION,
        }
    }

    pub fn validate(&self) -> Result<(), GraphError> {
        if &self.magic != primitives::MAGIC_BYTES {
            return Err(GraphError::SerializationError(
                "Invalid magic bytes".to_string(),
            ));
        }
        if self.version != primitives::FORMAT_VERSION {
            return Err(GraphError::SerializationError(format!(
                "Unsupported version: {} (expected {})",
                self.version,
                primitives::FORMAT_VERSION
            )));
        }
        Ok(())
    }

    #[must_use]
    pub fn to_bytes(&self) -> [u8; primitives::HEADER_LEN] {
        let mut bytes = [0u8; primitives::HEADER_LEN];
        bytes[0..4].copy_from_slice(&self.magic);
        bytes[4] = self.version;
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, GraphError> {
        let Some(header) = bytes.get(..primitives::HEADER_LEN) else {
            return Err(GraphError::SerializationError(
                "Header too short".to_string(),
            ));
        };
        let mut magic = [0u8; 4];
        magic.copy_from_slice(&header[0..4]);
        Ok(Self {
            magic,
            version: header[4],
        })
    }
}

impl Default for SnapshotHeader {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// SERIALIZABLE FORM
// =============================================================================

/// Flat, order-stable representation of a graph.
///
/// Custom attributes travel as JSON text, since postcard is not
/// self-describing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerializableGraph {
    pub id: String,
    pub source_id: Option<String>,
    pub offset_units: String,
    pub offset_granularity: Option<f64>,
    pub schema: Schema,
    pub anchors: Vec<SerializableAnchor>,
    pub annotations: Vec<SerializableAnnotation>,
    /// (parent, layer, minimum)
    pub ordinal_minima: Vec<(String, String, i32)>,
    pub attributes: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerializableAnchor {
    pub id: String,
    pub offset: Option<f64>,
    pub confidence: Option<i32>,
    pub annotator: Option<String>,
    pub when: Option<String>,
    pub attributes: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerializableAnnotation {
    pub id: String,
    pub label: String,
    pub layer_id: String,
    pub start_id: Option<String>,
    pub end_id: Option<String>,
    pub parent_id: Option<String>,
    pub ordinal: i32,
    pub confidence: Option<i32>,
    pub annotator: Option<String>,
    pub when: Option<String>,
    pub attributes: String,
}

fn attributes_text(attributes: &Attributes) -> Result<String, GraphError> {
    Ok(serde_json::to_string(attributes)?)
}

fn attributes_from_text(text: &str) -> Result<Attributes, GraphError> {
    Ok(serde_json::from_str(text)?)
}

impl TryFrom<&Graph> for SerializableGraph {
    type Error = GraphError;

    fn try_from(graph: &Graph) -> Result<Self, Self::Error> {
        let anchors = graph
            .anchors()
            .filter(|a| !a.is_destroyed())
            .map(|a| {
                Ok(SerializableAnchor {
                    id: a.id().to_string(),
                    offset: a.offset(),
                    confidence: a.confidence,
                    annotator: a.annotator.clone(),
                    when: a.when.clone(),
                    attributes: attributes_text(&a.attributes)?,
                })
            })
            .collect::<Result<Vec<_>, GraphError>>()?;

        let mut order = Vec::new();
        graph.walk_tree(&mut |annotation, visit| {
            if visit == Visit::Pre && !annotation.is_destroyed() {
                order.push(annotation.id().clone());
            }
        });
        let annotations = order
            .iter()
            .filter_map(|id| graph.annotation(id))
            .map(|a| {
                Ok(SerializableAnnotation {
                    id: a.id().to_string(),
                    label: a.label().to_string(),
                    layer_id: a.layer_id().to_string(),
                    start_id: a.start_id().map(ToString::to_string),
                    end_id: a.end_id().map(ToString::to_string),
                    parent_id: a.parent_id().map(ToString::to_string),
                    ordinal: graph.ordinal(a.id()),
                    confidence: a.confidence,
                    annotator: a.annotator.clone(),
                    when: a.when.clone(),
                    attributes: attributes_text(&a.attributes)?,
                })
            })
            .collect::<Result<Vec<_>, GraphError>>()?;

        let ordinal_minima = graph
            .ordinal_minima
            .iter()
            .flat_map(|(parent, layers)| {
                layers
                    .iter()
                    .map(move |(layer, minimum)| (parent.to_string(), layer.to_string(), *minimum))
            })
            .collect();

        Ok(Self {
            id: graph.id().to_string(),
            source_id: graph.source_id().map(ToString::to_string),
            offset_units: graph.offset_units().to_string(),
            offset_granularity: graph.offset_granularity(),
            schema: graph.schema().clone(),
            anchors,
            annotations,
            ordinal_minima,
            attributes: attributes_text(&graph.attributes)?,
        })
    }
}

impl TryFrom<SerializableGraph> for Graph {
    type Error = GraphError;

    fn try_from(sg: SerializableGraph) -> Result<Self, Self::Error> {
        let mut graph = Graph::new(sg.id);
        graph.source_id = sg.source_id.map(Into::into);
        graph.set_offset_units(sg.offset_units);
        graph.set_offset_granularity(sg.offset_granularity);
        graph.set_schema(sg.schema);
        graph.attributes = attributes_from_text(&sg.attributes)?;
        for (parent, layer, minimum) in sg.ordinal_minima {
            graph.set_ordinal_minimum(&parent.into(), &layer.into(), minimum);
        }

        for a in sg.anchors {
            let mut anchor = Anchor::new(a.id, a.offset);
            anchor.confidence = a.confidence;
            anchor.annotator = a.annotator;
            anchor.when = a.when;
            anchor.attributes = attributes_from_text(&a.attributes)?;
            graph.add_anchor(anchor)?;
        }

        for a in sg.annotations {
            let mut annotation = Annotation::new(a.layer_id, a.label)
                .with_id(a.id)
                .with_ordinal(a.ordinal);
            annotation.start_id = a.start_id.map(Into::into);
            annotation.end_id = a.end_id.map(Into::into);
            annotation.parent_id = a.parent_id.map(Into::into);
            annotation.confidence = a.confidence;
            annotation.annotator = a.annotator;
            annotation.when = a.when;
            annotation.attributes = attributes_from_text(&a.attributes)?;
            graph.add_unanchored(annotation)?;
        }

        Ok(graph)
    }
}

// =============================================================================
// SERIALIZATION FUNCTIONS
// =============================================================================

/// Serialize a graph to bytes (header + payload).
pub fn graph_to_bytes(graph: &Graph) -> Result<Vec<u8>, GraphError> {
    let header = SnapshotHeader::new();
    let serializable = SerializableGraph::try_from(graph)?;

    let payload = postcard::to_stdvec(&serializable)
        .map_err(|e| GraphError::SerializationError(e.to_string()))?;

    let mut result = Vec::with_capacity(primitives::HEADER_LEN + payload.len());
    result.extend_from_slice(&header.to_bytes());
    result.extend_from_slice(&payload);

    tracing::debug!(graph = %graph.id(), bytes = result.len(), "graph snapshot written");
    Ok(result)
}

/// Deserialize a graph from bytes.
///
/// Checks, in order and before decoding the payload:
/// 1. the data holds at least a header
/// 2. the data is not larger than [`MAX_SNAPSHOT_SIZE`]
/// 3. magic bytes and version
pub fn graph_from_bytes(bytes: &[u8]) -> Result<Graph, GraphError> {
    if bytes.len() < primitives::HEADER_LEN {
        return Err(GraphError::SerializationError(format!(
            "Data too short: minimum {} bytes required",
            primitives::HEADER_LEN
        )));
    }

    if bytes.len() > MAX_SNAPSHOT_SIZE {
        return Err(GraphError::SerializationError(format!(
            "Data size {} bytes exceeds maximum allowed {} bytes",
            bytes.len(),
            MAX_SNAPSHOT_SIZE
        )));
    }

    let header = SnapshotHeader::from_bytes(bytes)?;
    header.validate()?;

    let payload = &bytes[primitives::HEADER_LEN..];
    let serializable: SerializableGraph = postcard::from_bytes(payload).map_err(|e| {
        GraphError::SerializationError(format!("Failed to deserialize graph data: {}", e))
    })?;

    Graph::try_from(serializable)
}

// =============================================================================
// TESTS
// =============================================================================
