//! # Schema
//!
//! The layer tree of a graph, rooted at the implicit `transcript` layer,
//! plus the distinguished layer roles (participant, turn, utterance, word,
//! episode, corpus) that navigation shortcuts rely on.
//!
//! Child lists are derived from each layer's `parent_id`, so a layer may be
//! added before its parent: it simply hangs loose until the parent arrives.

use crate::layer::{Layer, compare_peer_layers};
use crate::primitives::ROOT_LAYER_ID;
use crate::types::{Alignment, GraphError, LayerId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

// =============================================================================
// SCHEMA
// =============================================================================

/// Layer definitions and roles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "StoredSchema")]
pub struct Schema {
    layers: BTreeMap<LayerId, Layer>,
    root_id: LayerId,
    participant_layer_id: Option<LayerId>,
    turn_layer_id: Option<LayerId>,
    utterance_layer_id: Option<LayerId>,
    word_layer_id: Option<LayerId>,
    episode_layer_id: Option<LayerId>,
    corpus_layer_id: Option<LayerId>,
    categories: BTreeMap<String, String>,
}

/// Schema as read from storage, before the root layer is checked.
#[derive(Deserialize)]
struct StoredSchema {
    layers: BTreeMap<LayerId, Layer>,
    root_id: LayerId,
    participant_layer_id: Option<LayerId>,
    turn_layer_id: Option<LayerId>,
    utterance_layer_id: Option<LayerId>,
    word_layer_id: Option<LayerId>,
    episode_layer_id: Option<LayerId>,
    corpus_layer_id: Option<LayerId>,
    categories: BTreeMap<String, String>,
}

impl From<StoredSchema> for Schema {
    fn from(stored: StoredSchema) -> Self {
        let mut layers = stored.layers;
        if !layers.contains_key(&stored.root_id) {
            let mut root = Self::new().root().clone();
            root.id = stored.root_id.clone();
            layers.insert(stored.root_id.clone(), root);
        }
        Self {
            layers,
            root_id: stored.root_id,
            participant_layer_id: stored.participant_layer_id,
            turn_layer_id: stored.turn_layer_id,
            utterance_layer_id: stored.utterance_layer_id,
            word_layer_id: stored.word_layer_id,
            episode_layer_id: stored.episode_layer_id,
            corpus_layer_id: stored.corpus_layer_id,
            categories: stored.categories,
        }
    }
}

impl Default for Schema {
    fn default() -> Self {
        Self::new()
    }
}

impl Schema {
    /// Create a schema holding only the root layer.
    #[must_use]
    pub fn new() -> Self {
        let root = Layer::new(ROOT_LAYER_ID, "Graph")
            .with_alignment(Alignment::Interval)
            .with_peers(false)
            .with_peers_overlap(false)
            .with_saturated(true);
        let mut layers = BTreeMap::new();
        let root_id = root.id.clone();
        layers.insert(root_id.clone(), root);
        Self {
            layers,
            root_id,
            participant_layer_id: None,
            turn_layer_id: None,
            utterance_layer_id: None,
            word_layer_id: None,
            episode_layer_id: None,
            corpus_layer_id: None,
            categories: BTreeMap::new(),
        }
    }

    /// The root layer, which the graph itself belongs to.
    #[must_use]
    pub fn root(&self) -> &Layer {
        // inserted by the constructor and on deserialization, never removed
        &self.layers[&self.root_id]
    }

    #[must_use]
    pub fn root_id(&self) -> &LayerId {
        &self.root_id
    }

    /// Add (or replace) a layer. A layer without a parent hangs off the root.
    pub fn add_layer(&mut self, mut layer: Layer) -> Result<(), GraphError> {
        if layer.id.is_unassigned() {
            return Err(GraphError::InvalidOperation(
                "layer has no id".to_string(),
            ));
        }
        if layer.id == self.root_id {
            return Err(GraphError::InvalidOperation(format!(
                "layer {} would replace the root",
                layer.id
            )));
        }
        if layer.parent_id.is_none() {
            layer.parent_id = Some(self.root_id.clone());
        }
        // walking up from the new parent must never reach the new layer
        let mut ancestor = layer.parent_id.clone();
        let mut seen = BTreeSet::new();
        while let Some(id) = ancestor {
            if id == layer.id {
                return Err(GraphError::InvalidOperation(format!(
                    "layer {} would be its own ancestor",
                    layer.id
                )));
            }
            if !seen.insert(id.clone()) {
                break;
            }
            ancestor = self.layers.get(&id).and_then(|l| l.parent_id.clone());
        }
        self.layers.insert(layer.id.clone(), layer);
        Ok(())
    }

    #[must_use]
    pub fn layer(&self, id: &LayerId) -> Option<&Layer> {
        self.layers.get(id)
    }

    pub fn layer_mut(&mut self, id: &LayerId) -> Option<&mut Layer> {
        self.layers.get_mut(id)
    }

    /// All layers, in id order, root included.
    pub fn layers(&self) -> impl Iterator<Item = &Layer> {
        self.layers.values()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.layers.len()
    }

    /// True if only the root layer is defined.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.layers.len() <= 1
    }

    /// Ids of the direct child layers of `id`, in peer order.
    #[must_use]
    pub fn children_of(&self, id: &LayerId) -> Vec<LayerId> {
        let mut children: Vec<&Layer> = self
            .layers
            .values()
            .filter(|l| l.parent_id.as_ref() == Some(id) && l.id != *id)
            .collect();
        children.sort_by(|a, b| {
            compare_peer_layers(
                a,
                self.child_count(&a.id),
                b,
                self.child_count(&b.id),
            )
        });
        children.into_iter().map(|l| l.id.clone()).collect()
    }

    fn child_count(&self, id: &LayerId) -> usize {
        self.layers
            .values()
            .filter(|l| l.parent_id.as_ref() == Some(id))
            .count()
    }

    /// True if `child` is a direct child layer of `parent`.
    #[must_use]
    pub fn is_child_layer(&self, parent: &LayerId, child: &LayerId) -> bool {
        self.layers
            .get(child)
            .is_some_and(|l| l.parent_id.as_ref() == Some(parent))
    }

    /// Ancestors of a layer, nearest first, ending with the root when the
    /// chain is complete.
    #[must_use]
    pub fn ancestors(&self, id: &LayerId) -> Vec<LayerId> {
        let mut ancestors = Vec::new();
        let mut current = self.layers.get(id).and_then(|l| l.parent_id.clone());
        while let Some(parent) = current {
            if ancestors.contains(&parent) {
                break;
            }
            current = self.layers.get(&parent).and_then(|l| l.parent_id.clone());
            ancestors.push(parent);
        }
        ancestors
    }

    /// True if `ancestor` is a (strict) ancestor of `id`.
    #[must_use]
    pub fn is_ancestor(&self, ancestor: &LayerId, id: &LayerId) -> bool {
        self.ancestors(id).contains(ancestor)
    }

    /// True if `descendant` is a (strict) descendant of `id`.
    #[must_use]
    pub fn is_descendant(&self, descendant: &LayerId, id: &LayerId) -> bool {
        self.is_ancestor(id, descendant)
    }

    /// Number of generations between a layer and one of its descendants.
    #[must_use]
    pub fn descendant_depth(&self, id: &LayerId, descendant: &LayerId) -> Option<usize> {
        self.ancestors(descendant)
            .iter()
            .position(|a| a == id)
            .map(|p| p + 1)
    }

    /// Nearest layer that is `a` or an ancestor of `a`, and also `b` or an
    /// ancestor of `b`.
    #[must_use]
    pub fn first_common_ancestor(&self, a: &LayerId, b: &LayerId) -> Option<LayerId> {
        if !self.layers.contains_key(a) || !self.layers.contains_key(b) {
            return None;
        }
        let mut ours: BTreeSet<LayerId> = self.ancestors(a).into_iter().collect();
        ours.insert(a.clone());
        std::iter::once(b.clone())
            .chain(self.ancestors(b))
            .find(|candidate| ours.contains(candidate))
    }

    /// All layer ids, parents before children, siblings in peer order.
    ///
    /// Layers whose parent chain does not reach the root follow at the end,
    /// in id order.
    #[must_use]
    pub fn layers_top_down(&self) -> Vec<LayerId> {
        let mut order = Vec::with_capacity(self.layers.len());
        let mut stack = vec![self.root_id.clone()];
        while let Some(id) = stack.pop() {
            if order.contains(&id) {
                continue;
            }
            let children = self.children_of(&id);
            order.push(id);
            stack.extend(children.into_iter().rev());
        }
        for id in self.layers.keys() {
            if !order.contains(id) {
                order.push(id.clone());
            }
        }
        order
    }

    /// Ids of the layers satisfying `predicate`, in top-down order.
    #[must_use]
    pub fn matching_layers(&self, predicate: impl Fn(&Layer) -> bool) -> Vec<LayerId> {
        self.layers_top_down()
            .into_iter()
            .filter(|id| self.layers.get(id).is_some_and(&predicate))
            .collect()
    }

    /// True for unaligned layers hanging directly off the root, other than
    /// the participant layer: graph-wide attributes such as corpus or episode.
    #[must_use]
    pub fn is_graph_tag_layer(&self, id: &LayerId) -> bool {
        self.layers.get(id).is_some_and(|l| {
            l.parent_id.as_ref() == Some(&self.root_id)
                && !l.is_aligned()
                && self.participant_layer_id.as_ref() != Some(id)
        })
    }

    // =========================================================================
    // ROLES
    // =========================================================================

    #[must_use]
    pub fn participant_layer_id(&self) -> Option<&LayerId> {
        self.participant_layer_id.as_ref()
    }

    pub fn set_participant_layer_id(&mut self, id: Option<LayerId>) {
        self.participant_layer_id = id;
    }

    #[must_use]
    pub fn turn_layer_id(&self) -> Option<&LayerId> {
        self.turn_layer_id.as_ref()
    }

    pub fn set_turn_layer_id(&mut self, id: Option<LayerId>) {
        self.turn_layer_id = id;
    }

    #[must_use]
    pub fn utterance_layer_id(&self) -> Option<&LayerId> {
        self.utterance_layer_id.as_ref()
    }

    pub fn set_utterance_layer_id(&mut self, id: Option<LayerId>) {
        self.utterance_layer_id = id;
    }

    #[must_use]
    pub fn word_layer_id(&self) -> Option<&LayerId> {
        self.word_layer_id.as_ref()
    }

    pub fn set_word_layer_id(&mut self, id: Option<LayerId>) {
        self.word_layer_id = id;
    }

    #[must_use]
    pub fn episode_layer_id(&self) -> Option<&LayerId> {
        self.episode_layer_id.as_ref()
    }

    pub fn set_episode_layer_id(&mut self, id: Option<LayerId>) {
        self.episode_layer_id = id;
    }

    #[must_use]
    pub fn corpus_layer_id(&self) -> Option<&LayerId> {
        self.corpus_layer_id.as_ref()
    }

    pub fn set_corpus_layer_id(&mut self, id: Option<LayerId>) {
        self.corpus_layer_id = id;
    }

    /// Copy the six role ids from another schema.
    pub fn copy_roles_from(&mut self, other: &Self) {
        self.participant_layer_id = other.participant_layer_id.clone();
        self.turn_layer_id = other.turn_layer_id.clone();
        self.utterance_layer_id = other.utterance_layer_id.clone();
        self.word_layer_id = other.word_layer_id.clone();
        self.episode_layer_id = other.episode_layer_id.clone();
        self.corpus_layer_id = other.corpus_layer_id.clone();
    }

    /// Layer categories: category name to description.
    #[must_use]
    pub fn categories(&self) -> &BTreeMap<String, String> {
        &self.categories
    }

    pub fn set_category(&mut self, name: impl Into<String>, description: impl Into<String>) {
        self.categories.insert(name.into(), description.into());
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn transcript_schema() -> Schema {
        let mut schema = Schema::new();
        schema
            .add_layer(Layer::new("who", "Participants").with_peers(true))
            .expect("who");
        schema
            .add_layer(
                Layer::new("turn", "Turns")
                    .with_parent("who")
                    .with_alignment(Alignment::Interval),
            )
            .expect("turn");
        schema
            .add_layer(
                Layer::new("word", "Words")
                    .with_parent("turn")
                    .with_alignment(Alignment::Interval),
            )
            .expect("word");
        schema
            .add_layer(
                Layer::new("utterance", "Utterances")
                    .with_parent("turn")
                    .with_alignment(Alignment::Interval),
            )
            .expect("utterance");
        schema
            .add_layer(Layer::new("pos", "Part of speech").with_parent("word"))
            .expect("pos");
        schema
            .add_layer(Layer::new("topic", "Topics").with_alignment(Alignment::Interval))
            .expect("topic");
        schema.add_layer(Layer::new("lang", "Language")).expect("lang");
        schema.set_participant_layer_id(Some("who".into()));
        schema
    }

    #[test]
    fn stored_schema_without_root_gets_one() {
        let mut value = serde_json::to_value(transcript_schema()).expect("serialize");
        let removed = value
            .get_mut("layers")
            .and_then(|layers| layers.as_object_mut())
            .and_then(|layers| layers.remove("transcript"));
        assert!(removed.is_some());

        let schema: Schema = serde_json::from_value(value).expect("deserialize");
        assert_eq!(schema.root().id.as_str(), "transcript");
        assert!(schema.layer(&"word".into()).is_some());
    }

    #[test]
    fn root_layer_is_transcript() {
        let schema = Schema::new();
        assert_eq!(schema.root().id.as_str(), "transcript");
        assert!(!schema.root().peers);
        assert!(schema.is_empty());
    }

    #[test]
    fn parentless_layers_hang_off_root() {
        let schema = transcript_schema();
        let topic = schema.layer(&"topic".into()).expect("topic");
        assert_eq!(topic.parent_id.as_ref().map(LayerId::as_str), Some("transcript"));
    }

    #[test]
    fn ancestors_run_nearest_first() {
        let schema = transcript_schema();
        let ancestors = schema.ancestors(&"pos".into());
        let names: Vec<_> = ancestors.iter().map(LayerId::as_str).collect();
        assert_eq!(names, vec!["word", "turn", "who", "transcript"]);
        assert!(schema.is_ancestor(&"turn".into(), &"pos".into()));
        assert!(schema.is_descendant(&"pos".into(), &"who".into()));
        assert_eq!(schema.descendant_depth(&"turn".into(), &"pos".into()), Some(2));
    }

    #[test]
    fn common_ancestor_of_cousins() {
        let schema = transcript_schema();
        assert_eq!(
            schema.first_common_ancestor(&"pos".into(), &"utterance".into()),
            Some("turn".into())
        );
        assert_eq!(
            schema.first_common_ancestor(&"word".into(), &"topic".into()),
            Some("transcript".into())
        );
        assert_eq!(
            schema.first_common_ancestor(&"word".into(), &"turn".into()),
            Some("turn".into())
        );
        assert_eq!(schema.first_common_ancestor(&"word".into(), &"nope".into()), None);
    }

    #[test]
    fn top_down_puts_parents_first() {
        let schema = transcript_schema();
        let order = schema.layers_top_down();
        let position = |id: &str| {
            order
                .iter()
                .position(|l| l.as_str() == id)
                .expect("layer present")
        };
        assert_eq!(position("transcript"), 0);
        assert!(position("who") < position("turn"));
        assert!(position("turn") < position("word"));
        assert!(position("word") < position("pos"));
        // unaligned tag layers sort before aligned siblings
        assert!(position("lang") < position("topic"));
    }

    #[test]
    fn layers_may_arrive_before_their_parent() {
        let mut schema = Schema::new();
        schema
            .add_layer(Layer::new("phone", "Phones").with_parent("segment"))
            .expect("phone");
        assert!(schema.ancestors(&"phone".into()).len() == 1);
        schema.add_layer(Layer::new("segment", "Segments")).expect("segment");
        assert_eq!(schema.ancestors(&"phone".into()).len(), 2);
    }

    #[test]
    fn cycles_are_rejected() {
        let mut schema = Schema::new();
        schema
            .add_layer(Layer::new("a", "A").with_parent("b"))
            .expect("a");
        let result = schema.add_layer(Layer::new("b", "B").with_parent("a"));
        assert!(matches!(result, Err(GraphError::InvalidOperation(_))));
    }

    #[test]
    fn graph_tag_layers_exclude_participants() {
        let schema = transcript_schema();
        assert!(schema.is_graph_tag_layer(&"lang".into()));
        assert!(!schema.is_graph_tag_layer(&"who".into()));
        assert!(!schema.is_graph_tag_layer(&"topic".into()));
        let aligned = schema.matching_layers(|l| l.is_aligned());
        assert!(aligned.iter().any(|l| l.as_str() == "word"));
    }
}
