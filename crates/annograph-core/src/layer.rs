//! # Layer
//!
//! A layer is a typed category of annotations: its place in the layer tree,
//! its alignment kind, and the policies its annotations follow among peers.

use crate::primitives::DEFAULT_LAYER_TYPE;
use crate::types::{Alignment, LayerId};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Definition of one annotation layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Layer {
    pub id: LayerId,
    /// Parent layer; `None` only for the root layer.
    pub parent_id: Option<LayerId>,
    pub description: String,
    pub alignment: Alignment,
    /// Whether a parent may have more than one child on this layer.
    pub peers: bool,
    /// Whether children on this layer may overlap each other.
    pub peers_overlap: bool,
    /// Whether the parent's span must include each child's span.
    pub parent_includes: bool,
    /// Whether children must tile the parent's full extent.
    pub saturated: bool,
    #[serde(rename = "type")]
    pub data_type: String,
    /// Permitted labels and their descriptions. Empty means unrestricted.
    pub valid_labels: BTreeMap<String, String>,
    pub category: Option<String>,
}

impl Default for Layer {
    fn default() -> Self {
        Self {
            id: LayerId::default(),
            parent_id: None,
            description: String::new(),
            alignment: Alignment::None,
            peers: true,
            peers_overlap: true,
            parent_includes: true,
            saturated: true,
            data_type: DEFAULT_LAYER_TYPE.to_string(),
            valid_labels: BTreeMap::new(),
            category: None,
        }
    }
}

impl Layer {
    /// Create an unaligned layer with default policies.
    #[must_use]
    pub fn new(id: impl Into<LayerId>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_parent(mut self, parent_id: impl Into<LayerId>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    #[must_use]
    pub const fn with_alignment(mut self, alignment: Alignment) -> Self {
        self.alignment = alignment;
        self
    }

    #[must_use]
    pub const fn with_peers(mut self, peers: bool) -> Self {
        self.peers = peers;
        self
    }

    #[must_use]
    pub const fn with_peers_overlap(mut self, peers_overlap: bool) -> Self {
        self.peers_overlap = peers_overlap;
        self
    }

    #[must_use]
    pub const fn with_parent_includes(mut self, parent_includes: bool) -> Self {
        self.parent_includes = parent_includes;
        self
    }

    #[must_use]
    pub const fn with_saturated(mut self, saturated: bool) -> Self {
        self.saturated = saturated;
        self
    }

    #[must_use]
    pub fn with_type(mut self, data_type: impl Into<String>) -> Self {
        self.data_type = data_type.into();
        self
    }

    #[must_use]
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    #[must_use]
    pub fn with_valid_label(
        mut self,
        label: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        self.valid_labels.insert(label.into(), description.into());
        self
    }

    /// True if annotations on this layer have their own anchors.
    #[must_use]
    pub const fn is_aligned(&self) -> bool {
        self.alignment.is_aligned()
    }

    /// True if `label` is acceptable on this layer.
    #[must_use]
    pub fn accepts_label(&self, label: &str) -> bool {
        self.valid_labels.is_empty() || self.valid_labels.contains_key(label)
    }
}

/// Order of sibling layers in a top-down walk.
///
/// Layers that are not contained by their parent come first, then lower
/// alignment, then non-peer layers, then layers with fewer child layers,
/// then saturated layers, then layers whose peers overlap, then by id.
#[must_use]
pub fn compare_peer_layers(
    a: &Layer,
    a_children: usize,
    b: &Layer,
    b_children: usize,
) -> Ordering {
    a.parent_includes
        .cmp(&b.parent_includes)
        .then_with(|| a.alignment.cmp(&b.alignment))
        .then_with(|| a.peers.cmp(&b.peers))
        .then_with(|| a_children.cmp(&b_children))
        .then_with(|| b.saturated.cmp(&a.saturated))
        .then_with(|| b.peers_overlap.cmp(&a.peers_overlap))
        .then_with(|| a.id.cmp(&b.id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_follow_layer_conventions() {
        let layer = Layer::new("pos", "Part of speech");
        assert!(layer.peers);
        assert!(layer.peers_overlap);
        assert!(layer.parent_includes);
        assert!(layer.saturated);
        assert_eq!(layer.data_type, "string");
        assert!(!layer.is_aligned());
    }

    #[test]
    fn valid_labels_restrict_only_when_present() {
        let open = Layer::new("word", "Words");
        assert!(open.accepts_label("anything"));

        let closed = Layer::new("noise", "Noise").with_valid_label("laugh", "Laughter");
        assert!(closed.accepts_label("laugh"));
        assert!(!closed.accepts_label("cough"));
    }

    #[test]
    fn peer_order_prefers_unaligned_single_layers() {
        let tag = Layer::new("lang", "Language").with_peers(false);
        let span = Layer::new("phrase", "Phrases").with_alignment(Alignment::Interval);
        assert_eq!(compare_peer_layers(&tag, 0, &span, 0), Ordering::Less);

        let busy = Layer::new("a", "A");
        let quiet = Layer::new("b", "B");
        assert_eq!(compare_peer_layers(&busy, 3, &quiet, 0), Ordering::Greater);
    }

    #[test]
    fn layer_json_uses_camel_case() {
        let layer = Layer::new("word", "Words")
            .with_parent("turn")
            .with_alignment(Alignment::Interval);
        let value = serde_json::to_value(&layer).expect("serialize");
        assert_eq!(value["parentId"], "turn");
        assert_eq!(value["alignment"], 2);
        assert_eq!(value["peersOverlap"], true);
        assert_eq!(value["type"], "string");

        let back: Layer = serde_json::from_value(value).expect("deserialize");
        assert_eq!(back, layer);
    }
}
