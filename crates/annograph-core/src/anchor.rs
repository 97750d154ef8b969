//! # Anchor
//!
//! A node of the temporal graph: an id, an optional offset, and provenance.
//!
//! Which annotations start or end at an anchor is *not* stored here. The
//! owning [`crate::Graph`] derives it from the annotations' own start and end
//! ids (see `Graph::start_of` / `Graph::end_of`).

use crate::change::{ChangeState, Operation};
use crate::types::{AnchorId, Attributes};

/// A graph node with an optional offset.
///
/// Anchors without an offset are legal ("floating"); they are positioned
/// logically by the annotations that link them to anchors with offsets.
#[derive(Debug, Clone, PartialEq)]
pub struct Anchor {
    pub(crate) id: AnchorId,
    pub(crate) offset: Option<f64>,
    pub(crate) change: ChangeState,
    /// Confidence in the offset (see the `CONFIDENCE_*` primitives).
    pub confidence: Option<i32>,
    /// Who or what set the offset.
    pub annotator: Option<String>,
    /// When the offset was set.
    pub when: Option<String>,
    pub attributes: Attributes,
}

impl Anchor {
    /// Create an anchor. A NaN offset is treated as no offset.
    #[must_use]
    pub fn new(id: impl Into<AnchorId>, offset: Option<f64>) -> Self {
        Self {
            id: id.into(),
            offset: sanitize_offset(offset),
            change: ChangeState::default(),
            confidence: None,
            annotator: None,
            when: None,
            attributes: Attributes::new(),
        }
    }

    /// Create an anchor whose id will be assigned by the graph.
    #[must_use]
    pub fn at(offset: Option<f64>) -> Self {
        Self::new(AnchorId::default(), offset)
    }

    #[must_use]
    pub const fn with_confidence(mut self, confidence: i32) -> Self {
        self.confidence = Some(confidence);
        self
    }

    #[must_use]
    pub fn with_annotator(mut self, annotator: impl Into<String>) -> Self {
        self.annotator = Some(annotator.into());
        self
    }

    #[must_use]
    pub fn id(&self) -> &AnchorId {
        &self.id
    }

    #[must_use]
    pub const fn offset(&self) -> Option<f64> {
        self.offset
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

    /// Copy with the same id, offset and serializable attributes, and a
    /// fresh change state.
    #[must_use]
    pub fn copy(&self) -> Self {
        Self {
            id: self.id.clone(),
            offset: self.offset,
            change: ChangeState::default(),
            confidence: self.confidence,
            annotator: self.annotator.clone(),
            when: self.when.clone(),
            attributes: self.attributes.copy_serializable(),
        }
    }
}

pub(crate) fn sanitize_offset(offset: Option<f64>) -> Option<f64> {
    offset.filter(|o| !o.is_nan())
}
