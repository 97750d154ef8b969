//! # Graph Stores
//!
//! The repository boundary. A [`GraphStore`] loads whole graphs or fragments
//! of them, answers typed queries across graphs and persists the changes a
//! caller made to a loaded graph.
//!
//! Query filters are plain closures. How a backend evaluates them (scan,
//! index, translation to its own query language) is its own business.
//!
//! [`InMemoryStore`] keeps committed graphs in a `BTreeMap` and is the
//! reference implementation used by the tests.

use crate::annotation::Annotation;
use crate::change::Operation;
use crate::graph::Graph;
use crate::layer::Layer;
use crate::schema::Schema;
use crate::types::{AnnotationId, GraphError, LayerId};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

/// Predicate over whole graphs.
pub type GraphFilter<'a> = &'a dyn Fn(&Graph) -> bool;

/// Predicate over single annotations.
pub type AnnotationFilter<'a> = &'a dyn Fn(&Annotation) -> bool;

/// A window over an ordered result list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    /// Zero-based page number.
    pub number: usize,
    /// Results per page. Zero means no results.
    pub length: usize,
}

impl Page {
    #[must_use]
    pub const fn new(number: usize, length: usize) -> Self {
        Self { number, length }
    }

    fn slice<T>(self, items: Vec<T>) -> Vec<T> {
        items
            .into_iter()
            .skip(self.number.saturating_mul(self.length))
            .take(self.length)
            .collect()
    }
}

// =============================================================================
// GRAPH STORE TRAIT
// =============================================================================

/// A repository of annotation graphs sharing one schema.
///
/// Methods take `&self` for reads and `&mut self` for writes, and every
/// method returns `Result` so that backends with I/O can report failures.
/// The trait is object safe.
pub trait GraphStore {
    /// Ids of every layer in the store's schema, top-down.
    fn layer_ids(&self) -> Result<Vec<LayerId>, GraphError>;

    /// Definition of one layer.
    fn layer(&self, id: &LayerId) -> Result<Option<Layer>, GraphError>;

    /// The store's schema.
    fn schema(&self) -> Result<Schema, GraphError>;

    /// Ids of every stored graph, in id order.
    fn graph_ids(&self) -> Result<Vec<AnnotationId>, GraphError>;

    /// Ids of the stored graphs accepted by `filter`, in id order.
    fn graph_ids_matching(&self, filter: GraphFilter<'_>) -> Result<Vec<AnnotationId>, GraphError>;

    /// Number of annotations, across all graphs, accepted by `filter`.
    fn count_matching_annotations(&self, filter: AnnotationFilter<'_>)
    -> Result<usize, GraphError>;

    /// Annotations accepted by `filter`, ordered by graph id then annotation
    /// id, optionally limited to one page. Returns owned copies.
    fn matching_annotations(
        &self,
        filter: AnnotationFilter<'_>,
        page: Option<Page>,
    ) -> Result<Vec<Annotation>, GraphError>;

    /// Load a graph with the annotations on `layers` and on the layers
    /// they depend on. An empty `layers` loads everything.
    fn graph(&self, id: &AnnotationId, layers: &[LayerId]) -> Result<Graph, GraphError>;

    /// Load the fragment of a graph defined by one of its annotations.
    fn fragment(
        &self,
        graph_id: &AnnotationId,
        annotation_id: &AnnotationId,
        layers: &[LayerId],
    ) -> Result<Graph, GraphError>;

    /// Load the fragment of a graph between two offsets.
    fn fragment_by_offsets(
        &self,
        graph_id: &AnnotationId,
        start: f64,
        end: f64,
        layers: &[LayerId],
    ) -> Result<Graph, GraphError>;

    /// Persist the uncommitted changes of `graph` (a whole graph or a
    /// fragment), then commit them in `graph`.
    ///
    /// Returns the number of changes persisted.
    fn save_graph(&mut self, graph: &mut Graph) -> Result<usize, GraphError>;

    /// Add one annotation to a stored graph.
    fn create_annotation(
        &mut self,
        graph_id: &AnnotationId,
        annotation: Annotation,
    ) -> Result<AnnotationId, GraphError>;

    /// Remove one annotation, and everything it owns, from a stored graph.
    fn destroy_annotation(
        &mut self,
        graph_id: &AnnotationId,
        annotation_id: &AnnotationId,
    ) -> Result<(), GraphError>;

    /// Remove a graph and its media.
    fn delete_graph(&mut self, id: &AnnotationId) -> Result<(), GraphError>;

    /// Location of a graph's media for the given track.
    fn media_url(&self, graph_id: &AnnotationId, track: &str)
    -> Result<Option<String>, GraphError>;

    /// Record the location of a graph's media for the given track.
    fn save_media(
        &mut self,
        graph_id: &AnnotationId,
        track: &str,
        url: &str,
    ) -> Result<(), GraphError>;
}

// =============================================================================
// IN-MEMORY STORE
// =============================================================================

/// Committed graphs held in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    schema: Schema,
    graphs: BTreeMap<AnnotationId, Graph>,
    media: BTreeMap<AnnotationId, BTreeMap<String, String>>,
}

impl InMemoryStore {
    #[must_use]
    pub fn new(schema: Schema) -> Self {
        Self {
            schema,
            graphs: BTreeMap::new(),
            media: BTreeMap::new(),
        }
    }

    /// Number of stored graphs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.graphs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.graphs.is_empty()
    }

    fn stored(&self, id: &AnnotationId) -> Result<&Graph, GraphError> {
        self.graphs
            .get(id)
            .ok_or_else(|| GraphError::StoreError(format!("Graph not found: {id}")))
    }

    fn stored_mut(&mut self, id: &AnnotationId) -> Result<&mut Graph, GraphError> {
        self.graphs
            .get_mut(id)
            .ok_or_else(|| GraphError::StoreError(format!("Graph not found: {id}")))
    }

    fn live_annotations(&self) -> impl Iterator<Item = &Annotation> {
        self.graphs
            .values()
            .flat_map(|graph| graph.annotations())
            .filter(|a| !a.is_destroyed())
    }

    /// Requested layers plus their ancestors and graph tag layers.
    fn closure_of(schema: &Schema, layers: &[LayerId]) -> BTreeSet<LayerId> {
        let mut wanted = BTreeSet::new();
        for layer in layers {
            wanted.insert(layer.clone());
            wanted.extend(schema.ancestors(layer));
        }
        wanted.extend(schema.matching_layers(|l| schema.is_graph_tag_layer(&l.id)));
        wanted
    }
}

impl GraphStore for InMemoryStore {
    fn layer_ids(&self) -> Result<Vec<LayerId>, GraphError> {
        Ok(self.schema.layers_top_down())
    }

    fn layer(&self, id: &LayerId) -> Result<Option<Layer>, GraphError> {
        Ok(self.schema.layer(id).cloned())
    }

    fn schema(&self) -> Result<Schema, GraphError> {
        Ok(self.schema.clone())
    }

    fn graph_ids(&self) -> Result<Vec<AnnotationId>, GraphError> {
        Ok(self.graphs.keys().cloned().collect())
    }

    fn graph_ids_matching(&self, filter: GraphFilter<'_>) -> Result<Vec<AnnotationId>, GraphError> {
        Ok(self
            .graphs
            .iter()
            .filter(|(_, graph)| filter(graph))
            .map(|(id, _)| id.clone())
            .collect())
    }

    fn count_matching_annotations(
        &self,
        filter: AnnotationFilter<'_>,
    ) -> Result<usize, GraphError> {
        Ok(self.live_annotations().filter(|a| filter(a)).count())
    }

    fn matching_annotations(
        &self,
        filter: AnnotationFilter<'_>,
        page: Option<Page>,
    ) -> Result<Vec<Annotation>, GraphError> {
        let matching: Vec<Annotation> = self
            .live_annotations()
            .filter(|a| filter(a))
            .map(Annotation::copy)
            .collect();
        Ok(match page {
            Some(page) => page.slice(matching),
            None => matching,
        })
    }

    fn graph(&self, id: &AnnotationId, layers: &[LayerId]) -> Result<Graph, GraphError> {
        let mut graph = self.stored(id)?.clone();
        if layers.is_empty() {
            return Ok(graph);
        }
        let wanted = Self::closure_of(graph.schema(), layers);
        let unwanted: Vec<AnnotationId> = graph
            .annotations()
            .filter(|a| !wanted.contains(a.layer_id()))
            .map(|a| a.id().clone())
            .collect();
        for annotation in &unwanted {
            graph.remove_annotation(annotation);
        }
        debug!(graph = %id, layers = wanted.len(), skipped = unwanted.len(), "graph loaded");
        Ok(graph)
    }

    fn fragment(
        &self,
        graph_id: &AnnotationId,
        annotation_id: &AnnotationId,
        layers: &[LayerId],
    ) -> Result<Graph, GraphError> {
        self.stored(graph_id)?
            .fragment_by_annotation(annotation_id, layers)
    }

    fn fragment_by_offsets(
        &self,
        graph_id: &AnnotationId,
        start: f64,
        end: f64,
        layers: &[LayerId],
    ) -> Result<Graph, GraphError> {
        self.stored(graph_id)?
            .fragment_by_offsets(start, end, layers)
    }

    fn save_graph(&mut self, graph: &mut Graph) -> Result<usize, GraphError> {
        let changes = graph.get_changes();
        let id = graph.id().clone();

        if graph.is_fragment() {
            let source = graph
                .source_id()
                .cloned()
                .ok_or_else(|| GraphError::StoreError(format!("Fragment without source: {id}")))?;
            let stored = self.stored_mut(&source)?;
            let touched = stored.apply_changes_from_fragment(graph, &[])?;
            stored.commit();
            graph.commit();
            debug!(graph = %source, fragment = %id, changes = changes.len(), touched, "fragment saved");
            return Ok(changes.len());
        }

        if graph.change() == Operation::Destroy {
            self.delete_graph(&id)?;
            graph.commit();
            return Ok(changes.len());
        }

        if changes.is_empty() && self.graphs.contains_key(&id) {
            return Ok(0);
        }
        graph.commit();
        let mut stored = graph.clone();
        stored.tracker = None;
        self.graphs.insert(id.clone(), stored);
        debug!(graph = %id, changes = changes.len(), "graph saved");
        Ok(changes.len())
    }

    fn create_annotation(
        &mut self,
        graph_id: &AnnotationId,
        annotation: Annotation,
    ) -> Result<AnnotationId, GraphError> {
        let graph = self.stored_mut(graph_id)?;
        let id = graph.add_annotation(annotation)?;
        graph.commit();
        debug!(graph = %graph_id, annotation = %id, "annotation stored");
        Ok(id)
    }

    fn destroy_annotation(
        &mut self,
        graph_id: &AnnotationId,
        annotation_id: &AnnotationId,
    ) -> Result<(), GraphError> {
        let graph = self.stored_mut(graph_id)?;
        graph.destroy_subtree(annotation_id)?;
        graph.commit();
        debug!(graph = %graph_id, annotation = %annotation_id, "annotation removed");
        Ok(())
    }

    fn delete_graph(&mut self, id: &AnnotationId) -> Result<(), GraphError> {
        if self.graphs.remove(id).is_none() {
            warn!(graph = %id, "delete of unknown graph");
            return Err(GraphError::StoreError(format!("Graph not found: {id}")));
        }
        self.media.remove(id);
        debug!(graph = %id, "graph deleted");
        Ok(())
    }

    fn media_url(
        &self,
        graph_id: &AnnotationId,
        track: &str,
    ) -> Result<Option<String>, GraphError> {
        self.stored(graph_id)?;
        Ok(self
            .media
            .get(graph_id)
            .and_then(|tracks| tracks.get(track))
            .cloned())
    }

    fn save_media(
        &mut self,
        graph_id: &AnnotationId,
        track: &str,
        url: &str,
    ) -> Result<(), GraphError> {
        self.stored(graph_id)?;
        self.media
            .entry(graph_id.clone())
            .or_default()
            .insert(track.to_string(), url.to_string());
        Ok(())
    }
}

// =============================================================================
// TESTS
// =============================================================================
