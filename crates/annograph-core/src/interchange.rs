//! # JSON Interchange
//!
//! Object forms of anchors, annotations, layers, schemas and whole graphs,
//! for exchange with other tools.
//!
//! Annotations are nested: every annotation object carries its children
//! keyed by layer id, and a graph object carries its top-level annotations
//! the same way. Custom attributes appear as extra keys; transient ones
//! (see [`crate::types::is_transient_key`]) never do. Annotations marked
//! for destruction are left out.

use crate::anchor::Anchor;
use crate::annotation::Annotation;
use crate::graph::Graph;
use crate::layer::Layer;
use crate::schema::Schema;
use crate::types::{AnchorId, AnnotationId, Attributes, GraphError, LayerId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

// =============================================================================
// OBJECT FORMS
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnchorObject {
    pub id: AnchorId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotator: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub when: Option<String>,
    #[serde(flatten)]
    pub attributes: Attributes,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnnotationObject {
    pub id: AnnotationId,
    #[serde(default)]
    pub label: String,
    pub layer_id: LayerId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_id: Option<AnchorId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_id: Option<AnchorId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<AnnotationId>,
    #[serde(default)]
    pub ordinal: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotator: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub when: Option<String>,
    /// Children, by layer id.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<LayerId, Vec<AnnotationObject>>,
    #[serde(flatten)]
    pub attributes: Attributes,
}

/// A layer with its child layers nested by id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerNode {
    #[serde(flatten)]
    pub layer: Layer,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub children: BTreeMap<LayerId, LayerNode>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaObject {
    pub root: LayerNode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub participant_layer_id: Option<LayerId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub turn_layer_id: Option<LayerId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub utterance_layer_id: Option<LayerId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub word_layer_id: Option<LayerId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub episode_layer_id: Option<LayerId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub corpus_layer_id: Option<LayerId>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub categories: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphObject {
    pub id: AnnotationId,
    pub offset_units: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset_granularity: Option<f64>,
    pub schema: SchemaObject,
    #[serde(default)]
    pub anchors: BTreeMap<AnchorId, AnchorObject>,
    /// Top-level annotations, by layer id.
    #[serde(default)]
    pub annotations: BTreeMap<LayerId, Vec<AnnotationObject>>,
    /// Annotations whose parent is not in the graph.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub orphans: Vec<AnnotationObject>,
    #[serde(flatten)]
    pub attributes: Attributes,
}

// =============================================================================
// ANCHORS & LAYERS
// =============================================================================

impl From<&Anchor> for AnchorObject {
    fn from(anchor: &Anchor) -> Self {
        Self {
            id: anchor.id.clone(),
            offset: anchor.offset,
            confidence: anchor.confidence,
            annotator: anchor.annotator.clone(),
            when: anchor.when.clone(),
            attributes: anchor.attributes.copy_serializable(),
        }
    }
}

impl From<AnchorObject> for Anchor {
    fn from(object: AnchorObject) -> Self {
        let mut anchor = Self::new(object.id, object.offset);
        anchor.confidence = object.confidence;
        anchor.annotator = object.annotator;
        anchor.when = object.when;
        anchor.attributes = object.attributes;
        anchor
    }
}

impl From<&Schema> for SchemaObject {
    fn from(schema: &Schema) -> Self {
        Self {
            root: layer_node(schema, schema.root()),
            participant_layer_id: schema.participant_layer_id().cloned(),
            turn_layer_id: schema.turn_layer_id().cloned(),
            utterance_layer_id: schema.utterance_layer_id().cloned(),
            word_layer_id: schema.word_layer_id().cloned(),
            episode_layer_id: schema.episode_layer_id().cloned(),
            corpus_layer_id: schema.corpus_layer_id().cloned(),
            categories: schema.categories().clone(),
        }
    }
}

fn layer_node(schema: &Schema, layer: &Layer) -> LayerNode {
    let children = schema
        .children_of(&layer.id)
        .into_iter()
        .filter_map(|id| schema.layer(&id))
        .map(|child| (child.id.clone(), layer_node(schema, child)))
        .collect();
    LayerNode {
        layer: layer.clone(),
        children,
    }
}

impl TryFrom<SchemaObject> for Schema {
    type Error = GraphError;

    /// The root layer's own definition is fixed; only its children are read.
    fn try_from(object: SchemaObject) -> Result<Self, Self::Error> {
        let mut schema = Self::new();
        let root = schema.root_id().clone();
        let mut pending: Vec<(LayerId, LayerNode)> = object
            .root
            .children
            .into_values()
            .map(|node| (root.clone(), node))
            .collect();
        while !pending.is_empty() {
            let mut next = Vec::new();
            for (parent, node) in pending {
                let mut layer = node.layer;
                layer.parent_id = Some(parent);
                let id = layer.id.clone();
                schema.add_layer(layer)?;
                next.extend(node.children.into_values().map(|child| (id.clone(), child)));
            }
            pending = next;
        }
        schema.set_participant_layer_id(object.participant_layer_id);
        schema.set_turn_layer_id(object.turn_layer_id);
        schema.set_utterance_layer_id(object.utterance_layer_id);
        schema.set_word_layer_id(object.word_layer_id);
        schema.set_episode_layer_id(object.episode_layer_id);
        schema.set_corpus_layer_id(object.corpus_layer_id);
        for (name, description) in object.categories {
            schema.set_category(name, description);
        }
        Ok(schema)
    }
}

// =============================================================================
// ANNOTATIONS & GRAPHS
// =============================================================================

impl Graph {
    /// Object form of an annotation with its live descendants nested.
    #[must_use]
    pub fn annotation_object(&self, id: &AnnotationId) -> Option<AnnotationObject> {
        let mut visited = BTreeSet::new();
        self.nested_object(id, &mut visited)
    }

    fn nested_object(
        &self,
        id: &AnnotationId,
        visited: &mut BTreeSet<AnnotationId>,
    ) -> Option<AnnotationObject> {
        let annotation = self.annotation(id).filter(|a| !a.is_destroyed())?;
        if !visited.insert(id.clone()) {
            return None;
        }
        let children = self.nested_children(id, visited);
        let ordinal = self.ordinal(id);
        Some(AnnotationObject {
            id: annotation.id.clone(),
            label: annotation.label.clone(),
            layer_id: annotation.layer_id.clone(),
            start_id: annotation.start_id.clone(),
            end_id: annotation.end_id.clone(),
            parent_id: annotation.parent_id.clone(),
            ordinal,
            confidence: annotation.confidence,
            annotator: annotation.annotator.clone(),
            when: annotation.when.clone(),
            annotations: children,
            attributes: annotation.attributes.copy_serializable(),
        })
    }

    fn nested_children(
        &self,
        parent: &AnnotationId,
        visited: &mut BTreeSet<AnnotationId>,
    ) -> BTreeMap<LayerId, Vec<AnnotationObject>> {
        let mut nested = BTreeMap::new();
        for layer in self.child_layers(parent) {
            let children: Vec<AnnotationObject> = self
                .child_ids(parent, &layer)
                .iter()
                .filter_map(|child| self.nested_object(child, visited))
                .collect();
            if !children.is_empty() {
                nested.insert(layer, children);
            }
        }
        nested
    }

    /// Object form of the whole graph.
    #[must_use]
    pub fn to_object(&self) -> GraphObject {
        let mut visited = BTreeSet::new();
        let annotations = self.nested_children(&self.id, &mut visited);
        let orphans = self
            .annotations()
            .filter(|a| !a.is_destroyed() && !visited.contains(&a.id))
            .map(|a| a.id.clone())
            .collect::<Vec<_>>()
            .iter()
            .filter_map(|id| self.nested_object(id, &mut visited))
            .collect();
        GraphObject {
            id: self.id.clone(),
            offset_units: self.offset_units().to_string(),
            offset_granularity: self.offset_granularity(),
            schema: SchemaObject::from(&self.schema),
            anchors: self
                .anchors()
                .filter(|a| !a.is_destroyed())
                .map(|a| (a.id.clone(), AnchorObject::from(a)))
                .collect(),
            annotations,
            orphans,
            attributes: self.attributes.copy_serializable(),
        }
    }

    /// Rebuild a graph from its object form. Nothing is marked as changed.
    pub fn from_object(object: GraphObject) -> Result<Self, GraphError> {
        let mut graph = Self::new(object.id);
        graph.set_offset_units(object.offset_units);
        graph.set_offset_granularity(object.offset_granularity);
        graph.set_schema(Schema::try_from(object.schema)?);
        graph.attributes = object.attributes;
        for (_, anchor) in object.anchors {
            graph.add_anchor(Anchor::from(anchor))?;
        }
        let top = graph.id.clone();
        let mut pending: Vec<(Option<AnnotationId>, AnnotationObject)> = object
            .annotations
            .into_values()
            .flatten()
            .map(|a| (Some(top.clone()), a))
            .chain(object.orphans.into_iter().map(|a| (None, a)))
            .collect();
        // parents before children
        while !pending.is_empty() {
            let mut next = Vec::new();
            for (parent, object) in pending {
                let id = object.id.clone();
                let mut annotation =
                    Annotation::new(object.layer_id, object.label).with_id(id.clone());
                annotation.start_id = object.start_id;
                annotation.end_id = object.end_id;
                annotation.parent_id = object.parent_id.or(parent);
                annotation.ordinal = object.ordinal;
                annotation.confidence = object.confidence;
                annotation.annotator = object.annotator;
                annotation.when = object.when;
                annotation.attributes = object.attributes;
                graph.add_unanchored(annotation)?;
                next.extend(
                    object
                        .annotations
                        .into_values()
                        .flatten()
                        .map(|child| (Some(id.clone()), child)),
                );
            }
            pending = next;
        }
        debug!(
            graph = %graph.id,
            anchors = graph.anchor_count(),
            annotations = graph.annotation_count(),
            "graph read from object form"
        );
        Ok(graph)
    }

    /// JSON text of [`Graph::to_object`].
    pub fn to_json(&self) -> Result<String, GraphError> {
        Ok(serde_json::to_string(&self.to_object())?)
    }

    /// Read a graph from JSON text.
    pub fn from_json(text: &str) -> Result<Self, GraphError> {
        let object: GraphObject = serde_json::from_str(text)?;
        Self::from_object(object)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Alignment;
    use serde_json::json;

    fn sample() -> Graph {
        let mut graph = Graph::new("g1");
        graph
            .add_layer(Layer::new("who", "Participants"))
            .expect("who");
        graph.schema_mut().set_participant_layer_id(Some("who".into()));
        graph
            .add_layer(
                Layer::new("word", "Words")
                    .with_parent("who")
                    .with_alignment(Alignment::Interval),
            )
            .expect("word");
        graph
            .add_layer(Layer::new("pos", "POS").with_parent("word"))
            .expect("pos");
        graph.add_anchor(Anchor::new("a1", Some(0.0))).expect("a1");
        graph.add_anchor(Anchor::new("a2", Some(0.5))).expect("a2");
        graph.add_anchor(Anchor::new("a3", None)).expect("a3");
        graph
            .add_annotation(Annotation::new("who", "Ann").with_id("p1"))
            .expect("p1");
        let mut word = Annotation::new("word", "hello")
            .with_id("w1")
            .with_anchors("a1", "a2")
            .with_parent("p1");
        word.attributes.set("stress", json!(1));
        word.attributes.set("@scratch", json!(true));
        graph.add_annotation(word).expect("w1");
        graph
            .add_annotation(
                Annotation::new("word", "there")
                    .with_id("w2")
                    .with_anchors("a2", "a3")
                    .with_parent("p1"),
            )
            .expect("w2");
        graph
            .add_annotation(Annotation::new("pos", "UH").with_id("x1").with_parent("w1"))
            .expect("x1");
        graph
    }

    #[test]
    fn annotation_object_nests_children_by_layer() {
        let graph = sample();
        let object = graph.annotation_object(&"p1".into()).expect("p1");
        let value = serde_json::to_value(&object).expect("json");

        assert_eq!(value["layerId"], json!("who"));
        let words = value["annotations"]["word"].as_array().expect("words");
        assert_eq!(words.len(), 2);
        assert_eq!(words[0]["label"], json!("hello"));
        assert_eq!(words[0]["stress"], json!(1));
        assert!(words[0].get("@scratch").is_none());
        assert_eq!(words[0]["annotations"]["pos"][0]["startId"], json!("a1"));
        assert_eq!(words[1]["ordinal"], json!(2));
    }

    #[test]
    fn layer_object_uses_interchange_names() {
        let layer = Layer::new("word", "Words")
            .with_parent("turn")
            .with_alignment(Alignment::Interval)
            .with_peers_overlap(false);
        let value = serde_json::to_value(&layer).expect("json");
        assert_eq!(value["parentId"], json!("turn"));
        assert_eq!(value["alignment"], json!(2));
        assert_eq!(value["peersOverlap"], json!(false));
        assert_eq!(value["type"], json!("string"));
    }

    #[test]
    fn schema_object_nests_layers_from_the_root() {
        let graph = sample();
        let object = SchemaObject::from(graph.schema());
        assert!(object.root.children.contains_key(&LayerId::from("who")));
        let who = &object.root.children[&LayerId::from("who")];
        assert!(who.children.contains_key(&LayerId::from("word")));

        let schema = Schema::try_from(object).expect("schema");
        assert_eq!(schema.participant_layer_id().map(LayerId::as_str), Some("who"));
        assert!(schema.is_child_layer(&"word".into(), &"pos".into()));
    }

    #[test]
    fn graph_round_trips_through_json() {
        let graph = sample();
        let text = graph.to_json().expect("to json");
        let back = Graph::from_json(&text).expect("from json");

        assert_eq!(back.id(), graph.id());
        assert_eq!(back.anchor_count(), 3);
        assert_eq!(back.labels(&"word".into()), vec!["hello", "there"]);
        assert_eq!(
            back.annotation(&"w1".into())
                .and_then(|a| a.attributes.get("stress")),
            Some(&json!(1))
        );
        let tag = back.annotation(&"x1".into()).expect("tag");
        assert_eq!(tag.start_id().map(AnchorId::as_str), Some("a1"));
        assert!(!back.has_changes());
        assert_eq!(back.to_json().expect("again"), text);
    }

    #[test]
    fn orphans_survive_the_round_trip() {
        let mut graph = sample();
        graph
            .add_annotation(
                Annotation::new("word", "lost")
                    .with_id("w9")
                    .with_anchors("a1", "a3")
                    .with_parent("p9"),
            )
            .expect("orphan");
        let object = graph.to_object();
        assert_eq!(object.orphans.len(), 1);

        let back = Graph::from_object(object).expect("from object");
        assert_eq!(back.orphans(&"word".into()).len(), 1);
    }
}
