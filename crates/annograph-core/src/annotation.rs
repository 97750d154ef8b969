//! # Annotation
//!
//! A labelled edge between two anchors that is also a node of the ownership
//! tree: it has a parent annotation on the parent layer and an ordinal among
//! its siblings.
//!
//! Structural fields (start, end, parent, ordinal) and the label are tracked,
//! so they can only change through [`crate::Graph`], which keeps its link
//! indices and change records in step. Untracked fields are public.

use crate::change::{ChangeState, Operation, TrackedAttribute, TrackedValue};
use crate::primitives::UNASSIGNED_ORDINAL;
use crate::types::{AnchorId, AnnotationId, Attributes, LayerId};

/// One annotation on one layer.
#[derive(Debug, Clone, PartialEq)]
pub struct Annotation {
    pub(crate) id: AnnotationId,
    pub(crate) label: String,
    pub(crate) layer_id: LayerId,
    pub(crate) start_id: Option<AnchorId>,
    pub(crate) end_id: Option<AnchorId>,
    pub(crate) parent_id: Option<AnnotationId>,
    pub(crate) ordinal: i32,
    pub(crate) change: ChangeState,
    pub confidence: Option<i32>,
    pub annotator: Option<String>,
    pub when: Option<String>,
    pub attributes: Attributes,
}

impl Annotation {
    /// Create an annotation whose id will be assigned by the graph.
    #[must_use]
    pub fn new(layer_id: impl Into<LayerId>, label: impl Into<String>) -> Self {
        Self {
            id: AnnotationId::default(),
            label: label.into(),
            layer_id: layer_id.into(),
            start_id: None,
            end_id: None,
            parent_id: None,
            ordinal: UNASSIGNED_ORDINAL,
            change: ChangeState::default(),
            confidence: None,
            annotator: None,
            when: None,
            attributes: Attributes::new(),
        }
    }

    #[must_use]
    pub fn with_id(mut self, id: impl Into<AnnotationId>) -> Self {
        self.id = id.into();
        self
    }

    #[must_use]
    pub fn with_anchors(mut self, start: impl Into<AnchorId>, end: impl Into<AnchorId>) -> Self {
        self.start_id = Some(start.into());
        self.end_id = Some(end.into());
        self
    }

    #[must_use]
    pub fn with_start(mut self, start: impl Into<AnchorId>) -> Self {
        self.start_id = Some(start.into());
        self
    }

    #[must_use]
    pub fn with_end(mut self, end: impl Into<AnchorId>) -> Self {
        self.end_id = Some(end.into());
        self
    }

    #[must_use]
    pub fn with_parent(mut self, parent: impl Into<AnnotationId>) -> Self {
        self.parent_id = Some(parent.into());
        self
    }

    #[must_use]
    pub const fn with_ordinal(mut self, ordinal: i32) -> Self {
        self.ordinal = ordinal;
        self
    }

    #[must_use]
    pub const fn with_confidence(mut self, confidence: i32) -> Self {
        self.confidence = Some(confidence);
        self
    }

    #[must_use]
    pub fn id(&self) -> &AnnotationId {
        &self.id
    }

    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    #[must_use]
    pub fn layer_id(&self) -> &LayerId {
        &self.layer_id
    }

    #[must_use]
    pub fn start_id(&self) -> Option<&AnchorId> {
        self.start_id.as_ref()
    }

    #[must_use]
    pub fn end_id(&self) -> Option<&AnchorId> {
        self.end_id.as_ref()
    }

    #[must_use]
    pub fn parent_id(&self) -> Option<&AnnotationId> {
        self.parent_id.as_ref()
    }

    /// Stored ordinal; 0 means not assigned yet.
    #[must_use]
    pub const fn ordinal(&self) -> i32 {
        self.ordinal
    }

    /// Current lifecycle operation.
    #[must_use]
    pub fn change(&self) -> Operation {
        self.change.operation()
    }

    #[must_use]
    pub const fn change_state(&self) -> &ChangeState {
        &self.change
    }

    #[must_use]
    pub const fn is_destroyed(&self) -> bool {
        self.change.is_destroyed()
    }

    /// True if the annotation starts and ends at the same anchor.
    #[must_use]
    pub fn is_instantaneous(&self) -> bool {
        self.start_id.is_some() && self.start_id == self.end_id
    }

    /// True if both annotations share the same start and end anchors.
    #[must_use]
    pub fn tags(&self, other: &Self) -> bool {
        self.start_id.is_some()
            && self.start_id == other.start_id
            && self.end_id.is_some()
            && self.end_id == other.end_id
    }

    /// Present value of a tracked attribute.
    #[must_use]
    pub fn tracked_value(&self, attribute: TrackedAttribute) -> TrackedValue {
        match attribute {
            TrackedAttribute::Label => TrackedValue::Text(self.label.clone()),
            TrackedAttribute::StartId => self.start_id.as_ref().map(AnchorId::as_str).into(),
            TrackedAttribute::EndId => self.end_id.as_ref().map(AnchorId::as_str).into(),
            TrackedAttribute::ParentId => {
                self.parent_id.as_ref().map(AnnotationId::as_str).into()
            }
            TrackedAttribute::Ordinal => self.ordinal.into(),
            TrackedAttribute::Offset => TrackedValue::Null,
        }
    }

    /// Copy with the same tracked attributes and serializable custom
    /// attributes, and a fresh change state.
    #[must_use]
    pub fn copy(&self) -> Self {
        Self {
            id: self.id.clone(),
            label: self.label.clone(),
            layer_id: self.layer_id.clone(),
            start_id: self.start_id.clone(),
            end_id: self.end_id.clone(),
            parent_id: self.parent_id.clone(),
            ordinal: self.ordinal,
            change: ChangeState::default(),
            confidence: self.confidence,
            annotator: self.annotator.clone(),
            when: self.when.clone(),
            attributes: self.attributes.copy_serializable(),
        }
    }
}
