//! # Editing Helpers
//!
//! Higher-level edits built on the structural mutators of [`Graph`]:
//! creating spans, tags and subdivisions, inserting annotations into a
//! chain, bulk destruction and anchor moves.
//!
//! Every helper is deterministic and leaves the graph's invariants intact:
//! ordinals stay contiguous, tag annotations keep their parent's anchors,
//! and new entities are marked as created.

use crate::anchor::Anchor;
use crate::annotation::Annotation;
use crate::graph::{Graph, Visit};
use crate::types::{AnchorId, AnnotationId, GraphError, LayerId};
use std::collections::BTreeSet;
use tracing::debug;

impl Graph {
    /// Create an annotation from `start` to `end` under `parent`, appended
    /// after its existing siblings.
    pub fn create_annotation(
        &mut self,
        start: &AnchorId,
        end: &AnchorId,
        layer: &LayerId,
        label: impl Into<String>,
        parent: &AnnotationId,
    ) -> Result<AnnotationId, GraphError> {
        if !self.contains_node(parent) {
            return Err(GraphError::AnnotationNotFound(parent.clone()));
        }
        let annotation = Annotation::new(layer.clone(), label)
            .with_anchors(start.clone(), end.clone())
            .with_parent(parent.clone());
        self.add_annotation(annotation)
    }

    /// Create an annotation running from the start of `from` to the end of
    /// `to`.
    ///
    /// Without an explicit parent one is found among the parents and
    /// ancestors of `from` and `to`. An explicit parent on a peer layer of
    /// the span's parent layer is replaced by its own parent.
    pub fn create_span(
        &mut self,
        from: &AnnotationId,
        to: &AnnotationId,
        layer: &LayerId,
        label: impl Into<String>,
        parent: Option<&AnnotationId>,
    ) -> Result<AnnotationId, GraphError> {
        let span_parent_layer = self
            .schema
            .layer(layer)
            .ok_or_else(|| GraphError::LayerNotFound(layer.clone()))?
            .parent_id
            .clone();
        let from_annotation = self
            .annotation(from)
            .ok_or_else(|| GraphError::AnnotationNotFound(from.clone()))?;
        let to_annotation = self
            .annotation(to)
            .ok_or_else(|| GraphError::AnnotationNotFound(to.clone()))?;
        let start = from_annotation.start_id.clone().ok_or_else(|| {
            GraphError::InvalidOperation(format!("annotation {from} has no start anchor"))
        })?;
        let end = to_annotation.end_id.clone().ok_or_else(|| {
            GraphError::InvalidOperation(format!("annotation {to} has no end anchor"))
        })?;

        let parent = match parent {
            Some(parent) => {
                let parent_layer = self.layer_id_of(parent);
                let grandparent_layer = parent_layer
                    .and_then(|l| self.schema.layer(l))
                    .and_then(|l| l.parent_id.as_ref());
                if span_parent_layer.is_some()
                    && span_parent_layer.as_ref() != parent_layer
                    && span_parent_layer.as_ref() == grandparent_layer
                {
                    self.parent_id_of(parent).cloned()
                } else {
                    Some(parent.clone())
                }
            }
            None => span_parent_layer
                .as_ref()
                .and_then(|wanted| self.infer_span_parent(from, to, wanted)),
        };

        let mut span = Annotation::new(layer.clone(), label).with_anchors(start, end);
        span.parent_id = parent;
        let id = self.add_annotation(span)?;
        debug!(graph = %self.id, annotation = %id, layer = %layer, "span created");
        Ok(id)
    }

    fn infer_span_parent(
        &self,
        from: &AnnotationId,
        to: &AnnotationId,
        wanted: &LayerId,
    ) -> Option<AnnotationId> {
        if wanted == self.schema.root_id() {
            return Some(self.id.clone());
        }
        let parent_layer_of = |id: &AnnotationId| {
            self.layer_id_of(id)
                .and_then(|l| self.schema.layer(l))
                .and_then(|l| l.parent_id.clone())
        };
        let from_parent = self.parent_id_of(from);
        let to_parent = self.parent_id_of(to);
        if parent_layer_of(from).as_ref() == Some(wanted) {
            return from_parent.cloned();
        }
        if from_parent != to_parent && parent_layer_of(to).as_ref() == Some(wanted) {
            return to_parent.cloned();
        }
        if self.layer_id_of(from) == Some(wanted) {
            return Some(from.clone());
        }
        self.ancestors(from)
            .into_iter()
            .chain(self.ancestors(to))
            .find(|a| a.layer_id == *wanted)
            .map(|a| a.id.clone())
    }

    /// Tag an annotation (or the graph) with a new annotation on `layer`.
    ///
    /// - A child layer: the tag is a child of the annotation.
    /// - A peer layer: the tag is a child of the annotation's parent.
    /// - A top-level layer: the tag is a child of the graph.
    ///
    /// The tag shares the annotation's anchors.
    pub fn create_tag(
        &mut self,
        id: &AnnotationId,
        layer: &LayerId,
        label: impl Into<String>,
    ) -> Result<AnnotationId, GraphError> {
        let own_layer = self
            .layer_id_of(id)
            .cloned()
            .ok_or_else(|| GraphError::AnnotationNotFound(id.clone()))?;
        let tag_parent_layer = self
            .schema
            .layer(layer)
            .ok_or_else(|| GraphError::LayerNotFound(layer.clone()))?
            .parent_id
            .clone();
        let own_parent_layer = self
            .schema
            .layer(&own_layer)
            .and_then(|l| l.parent_id.clone());

        let parent = if tag_parent_layer.as_ref() == Some(&own_layer) {
            id.clone()
        } else if tag_parent_layer.is_some() && tag_parent_layer == own_parent_layer {
            self.parent_id_of(id)
                .cloned()
                .ok_or_else(|| GraphError::InvalidOperation(format!("annotation {id} has no parent")))?
        } else if tag_parent_layer.as_ref() == Some(self.schema.root_id()) {
            self.id.clone()
        } else {
            return Err(GraphError::InvalidOperation(format!(
                "layer {layer} cannot tag layer {own_layer}"
            )));
        };

        let mut tag = Annotation::new(layer.clone(), label).with_parent(parent);
        if let Some(annotation) = self.annotation(id) {
            tag.start_id = annotation.start_id.clone();
            tag.end_id = annotation.end_id.clone();
        }
        let tag_id = self.add_annotation(tag)?;
        debug!(graph = %self.id, annotation = %id, tag = %tag_id, layer = %layer, "tag created");
        Ok(tag_id)
    }

    /// Add a subdivision of an annotation on `layer`.
    ///
    /// The first subdivision is a tag spanning the whole annotation. Later
    /// ones split the last subdivision (the one ending where the annotation
    /// ends), and annotations on peer layers tagging the split subdivision
    /// keep its new end.
    pub fn create_subdivision(
        &mut self,
        id: &AnnotationId,
        layer: &LayerId,
        label: impl Into<String>,
    ) -> Result<AnnotationId, GraphError> {
        let annotation = self
            .annotation(id)
            .ok_or_else(|| GraphError::AnnotationNotFound(id.clone()))?;
        let own_layer = annotation.layer_id.clone();
        let existing = annotation
            .end_id
            .as_ref()
            .map(|end| self.end_of(end, layer))
            .unwrap_or_default()
            .into_iter()
            .find(|a| !a.is_destroyed())
            .map(|a| a.id.clone());
        let Some(before) = existing else {
            return self.create_tag(id, layer, label);
        };

        let before_annotation = self
            .annotation(&before)
            .ok_or_else(|| GraphError::AnnotationNotFound(before.clone()))?;
        let before_parent_layer = self
            .schema
            .layer(&before_annotation.layer_id)
            .and_then(|l| l.parent_id.clone());
        let peer_tags: Vec<AnnotationId> = match (&before_annotation.start_id, before_parent_layer) {
            (Some(start), Some(parent_layer)) => self
                .starting_annotations(start)
                .into_iter()
                .filter(|a| !a.is_destroyed() && a.id != before)
                .filter(|a| a.tags(before_annotation))
                .filter(|a| a.layer_id != *layer && a.layer_id != own_layer)
                .filter(|a| {
                    self.schema
                        .layer(&a.layer_id)
                        .is_some_and(|l| l.parent_id.as_ref() == Some(&parent_layer))
                })
                .map(|a| a.id.clone())
                .collect(),
            _ => Vec::new(),
        };

        let after = self.insert_after(&before, layer, label)?;
        let new_end = self.annotation(&before).and_then(|a| a.end_id.clone());
        for tag in &peer_tags {
            self.set_end_id(tag, new_end.clone())?;
        }
        Ok(after)
    }

    /// Insert a new annotation after `before`, splitting its span at a new
    /// floating anchor. On the same layer the new annotation becomes the
    /// next sibling of `before`.
    pub fn insert_after(
        &mut self,
        before: &AnnotationId,
        layer: &LayerId,
        label: impl Into<String>,
    ) -> Result<AnnotationId, GraphError> {
        let existing = self
            .annotation(before)
            .ok_or_else(|| GraphError::AnnotationNotFound(before.clone()))?;
        let old_end = existing.end_id.clone();
        let same_layer = existing.layer_id == *layer;
        let parent = existing.parent_id.clone();
        let ordinal = self.ordinal(before);

        let middle = self.add_anchor(Anchor::at(None))?;
        let mut after = Annotation::new(layer.clone(), label).with_start(middle.clone());
        after.end_id = old_end;
        if same_layer {
            after.parent_id = parent;
        }
        self.set_end_id(before, Some(middle))?;
        let id = self.add_annotation(after)?;
        if same_layer {
            self.set_ordinal(&id, ordinal + 1)?;
        }
        Ok(id)
    }

    /// Insert a new annotation before `after`, splitting its span at a new
    /// floating anchor. On the same layer the new annotation becomes the
    /// previous sibling of `after`.
    pub fn insert_before(
        &mut self,
        after: &AnnotationId,
        layer: &LayerId,
        label: impl Into<String>,
    ) -> Result<AnnotationId, GraphError> {
        let existing = self
            .annotation(after)
            .ok_or_else(|| GraphError::AnnotationNotFound(after.clone()))?;
        let old_start = existing.start_id.clone();
        let same_layer = existing.layer_id == *layer;
        let parent = existing.parent_id.clone();
        let ordinal = self.ordinal(after);

        let middle = self.add_anchor(Anchor::at(None))?;
        let mut before = Annotation::new(layer.clone(), label).with_end(middle.clone());
        before.start_id = old_start;
        if same_layer {
            before.parent_id = parent;
        }
        self.set_start_id(after, Some(middle))?;
        let id = self.add_annotation(before)?;
        if same_layer {
            self.set_ordinal(&id, ordinal)?;
        }
        Ok(id)
    }

    /// Mark an annotation and all its descendants for destruction.
    pub fn destroy_subtree(&mut self, id: &AnnotationId) -> Result<(), GraphError> {
        let mut descendants = Vec::new();
        let mut visited = BTreeSet::new();
        self.walk_from(id, &mut visited, &mut |annotation, visit| {
            if visit == Visit::Post {
                descendants.push(annotation.id.clone());
            }
        });
        for descendant in &descendants {
            self.destroy_annotation(descendant)?;
        }
        self.destroy_annotation(id)
    }

    /// Mark every annotation on `layer` for destruction. Returns whether
    /// there was anything to destroy.
    pub fn destroy_all(&mut self, layer: &LayerId) -> Result<bool, GraphError> {
        let targets: Vec<AnnotationId> = self
            .layer_annotations(layer)
            .into_iter()
            .filter(|a| !a.is_destroyed())
            .map(|a| a.id.clone())
            .collect();
        for id in &targets {
            self.destroy_annotation(id)?;
        }
        debug!(graph = %self.id, layer = %layer, count = targets.len(), "layer cleared");
        Ok(!targets.is_empty())
    }

    /// Add `delta` to every anchor offset that is set.
    pub fn shift_anchors(&mut self, delta: f64) -> Result<(), GraphError> {
        if delta == 0.0 {
            return Ok(());
        }
        let shifted: Vec<(AnchorId, f64)> = self
            .anchors()
            .filter_map(|a| a.offset().map(|o| (a.id().clone(), o + delta)))
            .collect();
        for (id, offset) in shifted {
            self.set_offset(&id, Some(offset))?;
        }
        Ok(())
    }

    /// Make every live annotation starting at `from` start at `to` instead.
    pub fn move_starting_annotations(
        &mut self,
        from: &AnchorId,
        to: &AnchorId,
    ) -> Result<(), GraphError> {
        let moving: Vec<AnnotationId> = self
            .starting_annotations(from)
            .into_iter()
            .filter(|a| !a.is_destroyed())
            .map(|a| a.id.clone())
            .collect();
        for id in moving {
            self.set_start_id(&id, Some(to.clone()))?;
        }
        Ok(())
    }

    /// Make every live annotation ending at `from` end at `to` instead.
    pub fn move_ending_annotations(
        &mut self,
        from: &AnchorId,
        to: &AnchorId,
    ) -> Result<(), GraphError> {
        let moving: Vec<AnnotationId> = self
            .ending_annotations(from)
            .into_iter()
            .filter(|a| !a.is_destroyed())
            .map(|a| a.id.clone())
            .collect();
        for id in moving {
            self.set_end_id(&id, Some(to.clone()))?;
        }
        Ok(())
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use crate::anchor::Anchor;
    use crate::annotation::Annotation;
    use crate::change::Operation;
    use crate::graph::Graph;
    use crate::layer::Layer;
    use crate::types::{Alignment, AnchorId, AnnotationId, LayerId};

    fn graph_with_words() -> Graph {
        let mut graph = Graph::new("g1");
        graph
            .add_layer(Layer::new("turn", "Turns").with_alignment(Alignment::Interval))
            .expect("turn");
        graph
            .add_layer(
                Layer::new("word", "Words")
                    .with_parent("turn")
                    .with_alignment(Alignment::Interval),
            )
            .expect("word");
        graph
            .add_layer(
                Layer::new("phrase", "Phrases")
                    .with_parent("turn")
                    .with_alignment(Alignment::Interval),
            )
            .expect("phrase");
        graph
            .add_layer(Layer::new("pos", "POS").with_parent("word"))
            .expect("pos");
        graph
            .add_layer(
                Layer::new("segment", "Segments")
                    .with_parent("word")
                    .with_alignment(Alignment::Interval),
            )
            .expect("segment");
        graph
            .add_layer(Layer::new("lang", "Language"))
            .expect("lang");
        for (id, offset) in [("a0", 0.0), ("a1", 1.0), ("a2", 2.0)] {
            graph.add_anchor(Anchor::new(id, Some(offset))).expect("anchor");
        }
        graph
            .add_annotation(Annotation::new("turn", "t").with_id("t1").with_anchors("a0", "a2"))
            .expect("turn");
        graph
            .create_annotation(&"a0".into(), &"a1".into(), &"word".into(), "hello", &"t1".into())
            .expect("w1");
        graph
            .create_annotation(&"a1".into(), &"a2".into(), &"word".into(), "world", &"t1".into())
            .expect("w2");
        graph
    }

    fn word(graph: &Graph, ordinal: i32) -> AnnotationId {
        graph
            .children(&"t1".into(), &"word".into())
            .into_iter()
            .find(|w| w.ordinal() == ordinal)
            .map(|w| w.id().clone())
            .expect("word with ordinal")
    }

    #[test]
    fn created_annotations_are_appended() {
        let graph = graph_with_words();
        assert_eq!(graph.labels(&"word".into()), vec!["hello", "world"]);
        let w2 = graph.annotation(&word(&graph, 2)).expect("w2");
        assert_eq!(w2.change(), Operation::Create);
    }

    #[test]
    fn span_finds_its_parent() {
        let mut graph = graph_with_words();
        let w1 = word(&graph, 1);
        let w2 = word(&graph, 2);
        let span = graph
            .create_span(&w1, &w2, &"phrase".into(), "NP", None)
            .expect("span");
        let span = graph.annotation(&span).expect("span");
        assert_eq!(span.parent_id().map(AnnotationId::as_str), Some("t1"));
        assert_eq!(span.start_id().map(AnchorId::as_str), Some("a0"));
        assert_eq!(span.end_id().map(AnchorId::as_str), Some("a2"));
    }

    #[test]
    fn tags_on_child_peer_and_top_layers() {
        let mut graph = graph_with_words();
        let w1 = word(&graph, 1);
        let pos = graph.create_tag(&w1, &"pos".into(), "UH").expect("pos");
        let pos = graph.annotation(&pos).expect("pos");
        assert_eq!(pos.parent_id(), Some(&w1));
        assert_eq!(pos.start_id().map(AnchorId::as_str), Some("a0"));

        let phrase = graph.create_tag(&w1, &"phrase".into(), "INTJ").expect("phrase");
        let phrase = graph.annotation(&phrase).expect("phrase");
        assert_eq!(phrase.parent_id().map(AnnotationId::as_str), Some("t1"));

        let lang = graph.create_tag(&"g1".into(), &"lang".into(), "en").expect("lang");
        let lang = graph.annotation(&lang).expect("lang");
        assert_eq!(lang.parent_id().map(AnnotationId::as_str), Some("g1"));
        assert_eq!(lang.start_id().map(AnchorId::as_str), Some("a0"));
        assert_eq!(lang.end_id().map(AnchorId::as_str), Some("a2"));

        assert!(graph.create_tag(&"t1".into(), &"segment".into(), "x").is_err());
    }

    #[test]
    fn subdivisions_split_the_last_piece() {
        let mut graph = graph_with_words();
        let w1 = word(&graph, 1);
        let segment: LayerId = "segment".into();
        let first = graph.create_subdivision(&w1, &segment, "h").expect("first");
        let second = graph.create_subdivision(&w1, &segment, "i").expect("second");

        let pieces = graph.children(&w1, &segment);
        let labels: Vec<&str> = pieces.iter().map(|a| a.label()).collect();
        assert_eq!(labels, vec!["h", "i"]);
        let first = graph.annotation(&first).expect("first");
        let second = graph.annotation(&second).expect("second");
        assert_eq!(first.end_id(), second.start_id());
        assert_eq!(second.end_id().map(AnchorId::as_str), Some("a1"));
    }

    #[test]
    fn insert_before_and_after_keep_ordinals() {
        let mut graph = graph_with_words();
        let w1 = word(&graph, 1);
        let w2 = word(&graph, 2);
        let middle = graph.insert_after(&w1, &"word".into(), "there").expect("after");
        assert_eq!(graph.labels(&"word".into()), vec!["hello", "there", "world"]);
        assert_eq!(graph.annotation(&middle).map(Annotation::ordinal), Some(2));
        assert_eq!(graph.annotation(&w2).map(Annotation::ordinal), Some(3));

        let first = graph.insert_before(&w1, &"word".into(), "oh").expect("before");
        assert_eq!(graph.annotation(&first).map(Annotation::ordinal), Some(1));
        assert_eq!(graph.annotation(&w1).map(Annotation::ordinal), Some(2));
        assert_eq!(
            graph.annotation(&first).and_then(|a| a.start_id()).map(AnchorId::as_str),
            Some("a0")
        );
    }

    #[test]
    fn bulk_destruction_and_anchor_moves() {
        let mut graph = graph_with_words();
        graph.shift_anchors(10.0).expect("shift");
        assert_eq!(graph.anchor(&"a1".into()).and_then(Anchor::offset), Some(11.0));

        graph
            .move_ending_annotations(&"a2".into(), &"a1".into())
            .expect("move");
        let t1 = graph.annotation(&"t1".into()).expect("t1");
        assert_eq!(t1.end_id().map(AnchorId::as_str), Some("a1"));

        assert!(graph.destroy_all(&"word".into()).expect("destroy"));
        assert!(graph.list(&"word".into()).is_empty());
        assert!(!graph.destroy_all(&"word".into()).expect("again"));

        graph.destroy_subtree(&"t1".into()).expect("subtree");
        assert!(graph.annotation(&"t1".into()).is_some_and(Annotation::is_destroyed));
    }
}
