//! # Fragments
//!
//! Bounded sub-graphs carved out of a graph for windowed processing, and
//! the way back: re-applying a fragment's edits to the graph it came from.
//!
//! A fragment never shares entities with its source. Every annotation and
//! anchor is a fresh copy, and reconciliation happens strictly by id in
//! [`Graph::apply_changes_from_fragment`].
//!
//! ## Shared Extraction Rules
//!
//! - Only the requested layers are copied, plus every ancestor layer so that
//!   parent chains stay resolvable. Ancestor annotations are copied without
//!   their anchors.
//! - Graph tag layers (unaligned layers directly under the root, other than
//!   the participant layer) are copied whole when requested, whatever the
//!   bounds.
//! - An annotation's ancestors are in the fragment before the annotation.
//!   Each (parent, layer) ordinal minimum is the lowest source ordinal among
//!   the copied children, so a partial child set keeps its source numbering.
//! - The fragment id is `{source}__{start}-{end}` with three decimals.

use crate::anchor::Anchor;
use crate::annotation::Annotation;
use crate::change::Operation;
use crate::graph::{Graph, Visit};
use crate::primitives::{FRAGMENT_OFFSET_DECIMALS, FRAGMENT_SEPARATOR, UNASSIGNED_ORDINAL};
use crate::types::{AnchorId, AnnotationId, GraphError, LayerId};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

// =============================================================================
// FRAGMENT IDS
// =============================================================================

/// The parts of a fragment id.
#[derive(Debug, Clone, PartialEq)]
pub struct FragmentId {
    /// Source graph id, without extension.
    pub graph_id: String,
    pub start: f64,
    pub end: f64,
}

/// Build the id of the fragment of `source_id` between `start` and `end`.
///
/// A trailing file extension on the source id is dropped.
#[must_use]
pub fn fragment_id(source_id: &str, start: f64, end: f64) -> String {
    format!(
        "{}{}{:.prec$}-{:.prec$}",
        strip_extension(source_id),
        FRAGMENT_SEPARATOR,
        start,
        end,
        prec = FRAGMENT_OFFSET_DECIMALS
    )
}

/// Split a fragment id into graph id and offsets. A trailing `.extension`
/// is accepted. Anything that isn't a fragment id gives `None`.
#[must_use]
pub fn parse_fragment_id(id: &str) -> Option<FragmentId> {
    let id = strip_extension(id);
    let (graph_id, range) = id.rsplit_once(FRAGMENT_SEPARATOR)?;
    if graph_id.is_empty() {
        return None;
    }
    range
        .match_indices('-')
        .filter(|(i, _)| *i > 0)
        .find_map(|(i, _)| {
            let start = parse_offset(&range[..i])?;
            let end = parse_offset(&range[i + 1..])?;
            Some(FragmentId {
                graph_id: graph_id.to_string(),
                start,
                end,
            })
        })
}

// `name.ext` where ext is alphanumeric with at least one letter; a numeric
// tail like `1.000` is an offset, not an extension
fn strip_extension(id: &str) -> &str {
    match id.rsplit_once('.') {
        Some((stem, ext))
            if !stem.is_empty()
                && !ext.is_empty()
                && ext.chars().all(|c| c.is_ascii_alphanumeric())
                && ext.chars().any(|c| c.is_ascii_alphabetic()) =>
        {
            stem
        }
        _ => id,
    }
}

// [-]digits.digits
fn parse_offset(text: &str) -> Option<f64> {
    let unsigned = text.strip_prefix('-').unwrap_or(text);
    let (whole, fraction) = unsigned.split_once('.')?;
    let digits = |s: &str| !s.is_empty() && s.chars().all(|c| c.is_ascii_digit());
    if !digits(whole) || !digits(fraction) {
        return None;
    }
    text.parse().ok()
}

// =============================================================================
// EXTRACTION
// =============================================================================

/// Which source annotations a fragment takes on its requested layers.
enum Selection<'a> {
    Window { start: f64, end: f64 },
    Members(&'a BTreeSet<AnnotationId>),
    WindowUnder { start: f64, end: f64, ancestor: &'a AnnotationId },
}

impl Graph {
    /// Fragment holding the annotations on `layers` that lie within
    /// `[start, end]`, judged by the offset bounds of their anchors.
    ///
    /// The fragment always has anchors at `start` and `end`: the source's
    /// if it has them, new ones otherwise.
    pub fn fragment_by_offsets(
        &self,
        start: f64,
        end: f64,
        layers: &[LayerId],
    ) -> Result<Self, GraphError> {
        let id = fragment_id(self.id.as_str(), start, end);
        self.extract(id, &Selection::Window { start, end }, layers, None)
    }

    /// Fragment holding `defining` and the annotations on `layers` related
    /// to it (see [`Graph::all`]).
    ///
    /// Descendants are always taken. Other relations, such as words of the
    /// same turn under an utterance, are taken only when they lie within the
    /// defining annotation's span. The id uses the defining annotation's
    /// offset bounds. Without them the fragment is still built, under the id
    /// `{source}__{defining}`.
    pub fn fragment_by_annotation(
        &self,
        defining: &AnnotationId,
        layers: &[LayerId],
    ) -> Result<Self, GraphError> {
        let annotation = self
            .annotation(defining)
            .ok_or_else(|| GraphError::AnnotationNotFound(defining.clone()))?;
        let id = self.annotation_fragment_id(annotation);
        let span = self
            .start_offset(annotation)
            .zip(self.end_offset(annotation));
        let mut members = BTreeSet::from([defining.clone()]);
        for layer in layers {
            for related in self.all(defining, layer) {
                let inside =
                    span.is_some_and(|(start, end)| self.lies_within(related, start, end));
                if inside || self.descends_from(related, defining) {
                    members.insert(related.id.clone());
                }
            }
        }
        self.extract(id, &Selection::Members(&members), layers, Some(defining))
    }

    /// Fragment holding the annotations on `layers` that lie within the
    /// span of `bounds` and descend from `ancestor`.
    ///
    /// If `bounds` has no offsets the fragment is empty.
    pub fn fragment_by_bounds_and_ancestor(
        &self,
        bounds: &AnnotationId,
        ancestor: &AnnotationId,
        layers: &[LayerId],
    ) -> Result<Self, GraphError> {
        let annotation = self
            .annotation(bounds)
            .ok_or_else(|| GraphError::AnnotationNotFound(bounds.clone()))?;
        let id = self.annotation_fragment_id(annotation);
        let (Some(start), Some(end)) = (
            self.start_offset(annotation),
            self.end_offset(annotation),
        ) else {
            debug!(graph = %self.id, annotation = %bounds, "fragment bounds have no offsets");
            let mut fragment = self.empty_like(id);
            fragment.source_id = Some(self.id.clone());
            return Ok(fragment);
        };
        self.extract(
            id,
            &Selection::WindowUnder {
                start,
                end,
                ancestor,
            },
            layers,
            None,
        )
    }

    fn annotation_fragment_id(&self, annotation: &Annotation) -> String {
        let start = annotation.start_id.as_ref().and_then(|a| self.offset_min(a));
        let end = annotation.end_id.as_ref().and_then(|a| self.offset_max(a));
        match (start, end) {
            (Some(start), Some(end)) => fragment_id(self.id.as_str(), start, end),
            _ => format!(
                "{}{}{}",
                strip_extension(self.id.as_str()),
                FRAGMENT_SEPARATOR,
                annotation.id
            ),
        }
    }

    fn lies_within(&self, annotation: &Annotation, start: f64, end: f64) -> bool {
        let min = annotation.start_id.as_ref().and_then(|a| self.offset_min(a));
        let max = annotation.end_id.as_ref().and_then(|a| self.offset_max(a));
        min.is_some_and(|m| m >= start) && max.is_some_and(|m| m <= end)
    }

    fn descends_from(&self, annotation: &Annotation, ancestor: &AnnotationId) -> bool {
        self.ancestors(&annotation.id)
            .iter()
            .any(|a| a.id == *ancestor)
    }

    fn selects(&self, annotation: &Annotation, selection: &Selection<'_>) -> bool {
        match selection {
            Selection::Window { start, end } => self.lies_within(annotation, *start, *end),
            Selection::Members(ids) => ids.contains(&annotation.id),
            Selection::WindowUnder {
                start,
                end,
                ancestor,
            } => {
                self.lies_within(annotation, *start, *end)
                    && self.descends_from(annotation, ancestor)
            }
        }
    }

    // an anchor of the fragment at `offset`, copied from the source when the
    // source has one there
    fn pin_boundary(&self, fragment: &mut Self, offset: f64) -> Result<(), GraphError> {
        if fragment.get_anchor_at(offset).is_some() {
            return Ok(());
        }
        match self.get_anchor_at(offset).filter(|a| !a.is_destroyed()) {
            Some(anchor) => fragment.add_anchor(anchor.copy())?,
            None => fragment.create_anchor_at(offset, None)?,
        };
        Ok(())
    }

    fn extract(
        &self,
        id: String,
        selection: &Selection<'_>,
        layers: &[LayerId],
        defining: Option<&AnnotationId>,
    ) -> Result<Self, GraphError> {
        let mut fragment = self.empty_like(id);
        fragment.source_id = Some(self.id.clone());
        fragment.schema.copy_roles_from(&self.schema);

        let mut wanted: BTreeSet<LayerId> = layers
            .iter()
            .filter(|l| self.schema.layer(l).is_some())
            .cloned()
            .collect();
        if let Some(layer) = defining.and_then(|d| self.layer_id_of(d)) {
            wanted.insert(layer.clone());
        }
        let graph_tags: Vec<LayerId> = self
            .schema
            .layers_top_down()
            .into_iter()
            .filter(|l| wanted.contains(l) && self.schema.is_graph_tag_layer(l))
            .collect();
        let mut included = wanted.clone();
        for layer in &wanted {
            included.extend(self.schema.ancestors(layer));
        }
        let root = self.schema.root_id();
        for layer in self.schema.layers_top_down() {
            if &layer != root && included.contains(&layer) {
                if let Some(definition) = self.schema.layer(&layer) {
                    fragment.add_layer(definition.clone())?;
                }
            }
        }

        for layer in self.schema.layers_top_down() {
            if !wanted.contains(&layer) || graph_tags.contains(&layer) {
                continue;
            }
            let selected: Vec<&Annotation> = self
                .list(&layer)
                .into_iter()
                .filter(|a| self.selects(a, selection))
                .collect();
            for annotation in selected {
                self.copy_into(&mut fragment, annotation, true)?;
            }
        }

        if let Selection::Window { start, end } = selection {
            self.pin_boundary(&mut fragment, *start)?;
            self.pin_boundary(&mut fragment, *end)?;
        }

        // graph tags take the fragment's own bounds, so they go in last
        for layer in &graph_tags {
            for annotation in self.children(&self.id, layer) {
                if annotation.is_destroyed() || fragment.contains_node(&annotation.id) {
                    continue;
                }
                let mut tag = annotation.copy();
                tag.start_id = None;
                tag.end_id = None;
                tag.parent_id = Some(fragment.id.clone());
                self.note_ordinal(&mut fragment, &mut tag);
                fragment.add_annotation(tag)?;
            }
        }

        debug!(
            graph = %self.id,
            fragment = %fragment.id,
            anchors = fragment.anchor_count(),
            annotations = fragment.annotation_count(),
            "fragment extracted"
        );
        Ok(fragment)
    }

    /// Copy `annotation` (and, first, its missing ancestors) into `fragment`.
    fn copy_into(
        &self,
        fragment: &mut Self,
        annotation: &Annotation,
        with_anchors: bool,
    ) -> Result<(), GraphError> {
        if fragment.contains_node(&annotation.id) {
            return Ok(());
        }
        let mut ancestors = self.ancestors(&annotation.id);
        ancestors.reverse();
        for ancestor in ancestors {
            if !fragment.contains_node(&ancestor.id) {
                self.copy_into(fragment, ancestor, false)?;
            }
        }

        let mut copy = annotation.copy();
        if with_anchors {
            for anchor in [&annotation.start_id, &annotation.end_id].into_iter().flatten() {
                if fragment.anchor(anchor).is_none() {
                    if let Some(source) = self.anchor(anchor) {
                        fragment.add_anchor(source.copy())?;
                    }
                }
            }
        } else {
            copy.start_id = None;
            copy.end_id = None;
        }
        if copy.parent_id.as_ref() == Some(&self.id) {
            copy.parent_id = Some(fragment.id.clone());
        }
        self.note_ordinal(fragment, &mut copy);
        fragment.add_unanchored(copy)?;
        Ok(())
    }

    // pin the copy to its source ordinal and lower the parent's minimum to it
    fn note_ordinal(&self, fragment: &mut Self, copy: &mut Annotation) {
        let ordinal = self.ordinal(&copy.id);
        if ordinal == UNASSIGNED_ORDINAL {
            return;
        }
        copy.ordinal = ordinal;
        if let Some(parent) = &copy.parent_id {
            let current = fragment
                .ordinal_minima
                .get(parent)
                .and_then(|minima| minima.get(&copy.layer_id))
                .copied();
            if current.is_none_or(|m| ordinal < m) {
                fragment.set_ordinal_minimum(parent, &copy.layer_id, ordinal);
            }
        }
    }

    // =========================================================================
    // RE-APPLICATION
    // =========================================================================

    /// Re-apply the edits made in `fragment` to this graph, its source.
    ///
    /// - Created anchors are added under fresh ids, unless nothing in the
    ///   fragment links to them; updated anchors take the fragment's offset.
    ///   Anchors are never destroyed.
    /// - Annotations on `layers` (every layer if empty) are created under
    ///   fresh ids, updated or destroyed to match the fragment. References
    ///   to entities created in the fragment are re-pointed to their new ids.
    ///
    /// Returns the number of entities touched.
    pub fn apply_changes_from_fragment(
        &mut self,
        fragment: &Self,
        layers: &[LayerId],
    ) -> Result<usize, GraphError> {
        let mut touched = 0;
        let mut anchor_ids: BTreeMap<AnchorId, AnchorId> = BTreeMap::new();
        let mut annotation_ids: BTreeMap<AnnotationId, AnnotationId> =
            BTreeMap::from([(fragment.id.clone(), self.id.clone())]);

        for anchor in fragment.anchors() {
            match anchor.change() {
                Operation::Create if fragment.is_linked(&anchor.id) => {
                    let mut copy = Anchor::at(anchor.offset);
                    copy.confidence = anchor.confidence;
                    copy.annotator.clone_from(&anchor.annotator);
                    copy.when.clone_from(&anchor.when);
                    copy.attributes = anchor.attributes.copy_serializable();
                    let id = self.add_anchor(copy)?;
                    anchor_ids.insert(anchor.id.clone(), id);
                    touched += 1;
                }
                Operation::Update if self.anchor(&anchor.id).is_some() => {
                    self.set_offset(&anchor.id, anchor.offset)?;
                    if let Some(target) = self.anchor_mut(&anchor.id) {
                        target.confidence = anchor.confidence;
                        target.annotator.clone_from(&anchor.annotator);
                        target.when.clone_from(&anchor.when);
                    }
                    touched += 1;
                }
                _ => {}
            }
        }

        let in_scope =
            |annotation: &Annotation| layers.is_empty() || layers.contains(&annotation.layer_id);
        let mut order: Vec<AnnotationId> = Vec::new();
        fragment.walk_tree(&mut |annotation, visit| {
            if visit == Visit::Pre && in_scope(annotation) {
                order.push(annotation.id.clone());
            }
        });

        let mut destroyed = Vec::new();
        for id in &order {
            let Some(annotation) = fragment.annotation(id) else {
                continue;
            };
            let anchor = |reference: &Option<AnchorId>| {
                reference
                    .as_ref()
                    .map(|a| anchor_ids.get(a).cloned().unwrap_or_else(|| a.clone()))
            };
            let start = anchor(&annotation.start_id);
            let end = anchor(&annotation.end_id);
            let parent = annotation
                .parent_id
                .as_ref()
                .map(|p| annotation_ids.get(p).cloned().unwrap_or_else(|| p.clone()));
            match annotation.change() {
                Operation::Create => {
                    let mut copy =
                        Annotation::new(annotation.layer_id.clone(), annotation.label.clone());
                    copy.start_id = start;
                    copy.end_id = end;
                    copy.parent_id = parent;
                    copy.confidence = annotation.confidence;
                    copy.annotator.clone_from(&annotation.annotator);
                    copy.when.clone_from(&annotation.when);
                    copy.attributes = annotation.attributes.copy_serializable();
                    let new_id = self.add_unanchored(copy)?;
                    if annotation.ordinal != UNASSIGNED_ORDINAL {
                        self.set_ordinal(&new_id, annotation.ordinal)?;
                    }
                    annotation_ids.insert(annotation.id.clone(), new_id);
                    touched += 1;
                }
                Operation::Update if self.annotation(id).is_some() => {
                    self.set_label(id, annotation.label.clone())?;
                    self.set_start_id(id, start)?;
                    self.set_end_id(id, end)?;
                    if self.parent_id_of(id) != parent.as_ref() {
                        self.set_parent(id, parent, false)?;
                    }
                    self.set_ordinal(id, annotation.ordinal)?;
                    if let Some(target) = self.annotation_mut(id) {
                        target.confidence = annotation.confidence;
                        target.annotator.clone_from(&annotation.annotator);
                        target.when.clone_from(&annotation.when);
                    }
                    touched += 1;
                }
                Operation::Destroy if self.annotation(id).is_some() => {
                    destroyed.push(id.clone());
                }
                _ => {}
            }
        }
        // children before parents
        for id in destroyed.iter().rev() {
            self.destroy_annotation(id)?;
            touched += 1;
        }

        debug!(
            graph = %self.id,
            fragment = %fragment.id,
            touched,
            "fragment changes applied"
        );
        Ok(touched)
    }
}

// =============================================================================
// TESTS
// =============================================================================
