//! # Graph Container
//!
//! The arena that owns every anchor and annotation of one annotation graph,
//! together with the indices that make the two superimposed structures
//! (the temporal graph and the ownership tree) cheap to navigate.
//!
//! All cross references are ids resolved through the graph. Index entries
//! are updated eagerly by the structural mutators in this module, and every
//! read filters them against the entities' current fields, so a stale entry
//! can never leak into a result.
//!
//! The graph is also the root of the ownership tree: its id is the parent id
//! of every top-level annotation, and navigation treats it as an annotation
//! on the root layer.

use crate::anchor::{Anchor, sanitize_offset};
use crate::annotation::Annotation;
use crate::change::{
    Change, ChangeState, ChangeTracker, EntityRef, Operation, TrackedAttribute, TrackedValue,
};
use crate::config::GraphConfig;
use crate::layer::Layer;
use crate::primitives::UNASSIGNED_ORDINAL;
use crate::schema::Schema;
use crate::types::{AnchorId, AnnotationId, Attributes, GraphError, LayerId};
use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use tracing::{debug, trace};

type LayerLinks = BTreeMap<LayerId, BTreeSet<AnnotationId>>;

/// Which end of an annotation an operation concerns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Start,
    End,
}

impl Side {
    pub(crate) const fn attribute(self) -> TrackedAttribute {
        match self {
            Self::Start => TrackedAttribute::StartId,
            Self::End => TrackedAttribute::EndId,
        }
    }
}

/// Visit order for [`Graph::walk_tree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Visit {
    Pre,
    Post,
}

// =============================================================================
// OFFSET INDEX
// =============================================================================

/// Anchors bucketed by quantized offset.
///
/// With a granularity `g` the bucket is the nearest multiple of `g`, and a
/// lookup also inspects the two neighbouring buckets, so any two offsets
/// closer than `g` always meet. Without a granularity the bucket is the
/// integer part and lookups require exact equality.
#[derive(Debug, Clone, Default)]
struct OffsetIndex {
    buckets: BTreeMap<i64, BTreeSet<AnchorId>>,
}

impl OffsetIndex {
    fn key(offset: f64, granularity: Option<f64>) -> i64 {
        match granularity {
            Some(g) => (offset / g).round_ties_even() as i64,
            None => offset.floor() as i64,
        }
    }

    fn insert(&mut self, offset: Option<f64>, id: &AnchorId, granularity: Option<f64>) {
        if let Some(offset) = offset {
            self.buckets
                .entry(Self::key(offset, granularity))
                .or_default()
                .insert(id.clone());
        }
    }

    fn remove(&mut self, offset: Option<f64>, id: &AnchorId, granularity: Option<f64>) {
        if let Some(offset) = offset {
            let key = Self::key(offset, granularity);
            if let Some(bucket) = self.buckets.get_mut(&key) {
                bucket.remove(id);
                if bucket.is_empty() {
                    self.buckets.remove(&key);
                }
            }
        }
    }

    fn candidates(&self, offset: f64, granularity: Option<f64>) -> Vec<&AnchorId> {
        let key = Self::key(offset, granularity);
        let keys = match granularity {
            Some(_) => vec![key.saturating_sub(1), key, key.saturating_add(1)],
            None => vec![key],
        };
        keys.iter()
            .filter_map(|k| self.buckets.get(k))
            .flatten()
            .collect()
    }
}

// =============================================================================
// GRAPH
// =============================================================================

/// An annotation graph: anchors, annotations, schema and indices.
#[derive(Debug, Clone)]
pub struct Graph {
    pub(crate) id: AnnotationId,
    pub(crate) source_id: Option<AnnotationId>,
    pub(crate) schema: Schema,
    pub(crate) anchors: BTreeMap<AnchorId, Anchor>,
    pub(crate) annotations: BTreeMap<AnnotationId, Annotation>,
    pub(crate) change: ChangeState,
    pub(crate) tracker: Option<ChangeTracker>,
    pub(crate) ordinal_minima: BTreeMap<AnnotationId, BTreeMap<LayerId, i32>>,
    pub attributes: Attributes,
    starts: BTreeMap<AnchorId, LayerLinks>,
    ends: BTreeMap<AnchorId, LayerLinks>,
    pending_starts: BTreeMap<AnchorId, BTreeSet<AnnotationId>>,
    pending_ends: BTreeMap<AnchorId, BTreeSet<AnnotationId>>,
    children: BTreeMap<AnnotationId, LayerLinks>,
    orphans: LayerLinks,
    layer_members: LayerLinks,
    offset_index: OffsetIndex,
    locality: RefCell<BTreeMap<LayerId, Vec<UnitSpan>>>,
    offset_min_memo: RefCell<BTreeMap<AnchorId, Option<f64>>>,
    offset_max_memo: RefCell<BTreeMap<AnchorId, Option<f64>>>,
    offset_units: String,
    offset_granularity: Option<f64>,
    default_ordinal_minimum: i32,
    default_confidence: i32,
    last_added_anchor_id: Option<AnchorId>,
    last_id: u64,
}

/// Whole units an anchored annotation touches, plus one unit of slack at
/// the end.
#[derive(Debug, Clone)]
struct UnitSpan {
    first: i64,
    last: i64,
    id: AnnotationId,
}

impl Graph {
    /// Create an empty graph with default configuration.
    #[must_use]
    pub fn new(id: impl Into<AnnotationId>) -> Self {
        Self::with_config(id, &GraphConfig::default())
    }

    /// Create an empty graph using the given configuration.
    #[must_use]
    pub fn with_config(id: impl Into<AnnotationId>, config: &GraphConfig) -> Self {
        Self {
            id: id.into(),
            source_id: None,
            schema: Schema::new(),
            anchors: BTreeMap::new(),
            annotations: BTreeMap::new(),
            change: ChangeState::default(),
            tracker: None,
            ordinal_minima: BTreeMap::new(),
            attributes: Attributes::new(),
            starts: BTreeMap::new(),
            ends: BTreeMap::new(),
            pending_starts: BTreeMap::new(),
            pending_ends: BTreeMap::new(),
            children: BTreeMap::new(),
            orphans: BTreeMap::new(),
            layer_members: BTreeMap::new(),
            offset_index: OffsetIndex::default(),
            locality: RefCell::new(BTreeMap::new()),
            offset_min_memo: RefCell::new(BTreeMap::new()),
            offset_max_memo: RefCell::new(BTreeMap::new()),
            offset_units: config.offset_units.clone(),
            offset_granularity: config.offset_granularity,
            default_ordinal_minimum: config.ordinal_minimum,
            default_confidence: config.default_confidence,
            last_added_anchor_id: None,
            last_id: 0,
        }
    }

    /// An empty graph with this graph's offset and ordinal settings.
    pub(crate) fn empty_like(&self, id: impl Into<AnnotationId>) -> Self {
        let mut graph = Self::new(id);
        graph.offset_units = self.offset_units.clone();
        graph.offset_granularity = self.offset_granularity;
        graph.default_ordinal_minimum = self.default_ordinal_minimum;
        graph.default_confidence = self.default_confidence;
        graph
    }

    // =========================================================================
    // IDENTITY & METADATA
    // =========================================================================

    #[must_use]
    pub fn id(&self) -> &AnnotationId {
        &self.id
    }

    /// Id of the graph this one was extracted from, if it is a fragment.
    #[must_use]
    pub fn source_id(&self) -> Option<&AnnotationId> {
        self.source_id.as_ref()
    }

    #[must_use]
    pub const fn is_fragment(&self) -> bool {
        self.source_id.is_some()
    }

    #[must_use]
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Mutable schema access, for role assignment and layer tweaks.
    pub fn schema_mut(&mut self) -> &mut Schema {
        &mut self.schema
    }

    /// Replace the whole schema.
    pub fn set_schema(&mut self, schema: Schema) {
        self.schema = schema;
        self.invalidate_all();
    }

    pub fn add_layer(&mut self, layer: Layer) -> Result<(), GraphError> {
        let id = layer.id.clone();
        self.schema.add_layer(layer)?;
        self.invalidate_layer(&id);
        Ok(())
    }

    #[must_use]
    pub fn layer(&self, id: &LayerId) -> Option<&Layer> {
        self.schema.layer(id)
    }

    #[must_use]
    pub fn offset_units(&self) -> &str {
        &self.offset_units
    }

    pub fn set_offset_units(&mut self, units: impl Into<String>) {
        self.offset_units = units.into();
    }

    #[must_use]
    pub const fn offset_granularity(&self) -> Option<f64> {
        self.offset_granularity
    }

    /// Change the granularity and rebuild the offset index.
    pub fn set_offset_granularity(&mut self, granularity: Option<f64>) {
        self.offset_granularity = granularity.filter(|g| *g > 0.0);
        self.offset_index = OffsetIndex::default();
        for anchor in self.anchors.values() {
            self.offset_index
                .insert(anchor.offset, &anchor.id, self.offset_granularity);
        }
    }

    /// Generate an id not used by any anchor or annotation.
    pub fn new_id(&mut self) -> String {
        loop {
            self.last_id = self.last_id.saturating_add(1);
            let candidate = to_base36(self.last_id);
            if candidate != self.id.as_str()
                && !self.anchors.contains_key(&AnchorId::new(candidate.as_str()))
                && !self
                    .annotations
                    .contains_key(&AnnotationId::new(candidate.as_str()))
            {
                return candidate;
            }
        }
    }

    // =========================================================================
    // LOOKUP
    // =========================================================================

    #[must_use]
    pub fn anchor(&self, id: &AnchorId) -> Option<&Anchor> {
        self.anchors.get(id)
    }

    /// Mutable access to an anchor's untracked fields.
    pub fn anchor_mut(&mut self, id: &AnchorId) -> Option<&mut Anchor> {
        self.anchors.get_mut(id)
    }

    #[must_use]
    pub fn annotation(&self, id: &AnnotationId) -> Option<&Annotation> {
        self.annotations.get(id)
    }

    /// Mutable access to an annotation's untracked fields.
    pub fn annotation_mut(&mut self, id: &AnnotationId) -> Option<&mut Annotation> {
        self.annotations.get_mut(id)
    }

    /// All anchors, in id order.
    pub fn anchors(&self) -> impl Iterator<Item = &Anchor> {
        self.anchors.values()
    }

    /// All annotations, in id order.
    pub fn annotations(&self) -> impl Iterator<Item = &Annotation> {
        self.annotations.values()
    }

    #[must_use]
    pub fn anchor_count(&self) -> usize {
        self.anchors.len()
    }

    #[must_use]
    pub fn annotation_count(&self) -> usize {
        self.annotations.len()
    }

    /// True if `id` is the graph itself or one of its annotations.
    #[must_use]
    pub fn contains_node(&self, id: &AnnotationId) -> bool {
        *id == self.id || self.annotations.contains_key(id)
    }

    /// Layer of an annotation; the graph itself is on the root layer.
    #[must_use]
    pub fn layer_id_of(&self, id: &AnnotationId) -> Option<&LayerId> {
        if *id == self.id {
            Some(self.schema.root_id())
        } else {
            self.annotations.get(id).map(|a| &a.layer_id)
        }
    }

    /// Parent id of an annotation; the graph has none.
    #[must_use]
    pub fn parent_id_of(&self, id: &AnnotationId) -> Option<&AnnotationId> {
        self.annotations.get(id).and_then(|a| a.parent_id.as_ref())
    }

    /// Annotations on a layer, in id order, destroyed ones included.
    #[must_use]
    pub fn layer_annotations(&self, layer: &LayerId) -> Vec<&Annotation> {
        self.layer_members
            .get(layer)
            .into_iter()
            .flatten()
            .filter_map(|id| self.annotations.get(id))
            .filter(|a| a.layer_id == *layer)
            .collect()
    }

    /// Annotations on a layer whose parent is unknown.
    #[must_use]
    pub fn orphans(&self, layer: &LayerId) -> Vec<&Annotation> {
        self.orphans
            .get(layer)
            .into_iter()
            .flatten()
            .filter_map(|id| self.annotations.get(id))
            .filter(|a| !self.parent_is_resolved(a))
            .collect()
    }

    /// Anchor ids referenced by annotations but not present in the graph.
    #[must_use]
    pub fn pending_anchor_ids(&self) -> BTreeSet<AnchorId> {
        self.pending_starts
            .keys()
            .chain(self.pending_ends.keys())
            .cloned()
            .collect()
    }

    pub(crate) fn is_live(&self, id: &AnnotationId) -> bool {
        self.annotations.get(id).is_some_and(|a| !a.is_destroyed())
    }

    fn parent_is_resolved(&self, annotation: &Annotation) -> bool {
        annotation
            .parent_id
            .as_ref()
            .is_some_and(|p| self.contains_node(p))
    }

    // =========================================================================
    // ADDING ENTITIES
    // =========================================================================

    /// Add an anchor. An anchor without an id gets a fresh one and is
    /// marked as created. Annotations waiting for this id are linked to it.
    pub fn add_anchor(&mut self, mut anchor: Anchor) -> Result<AnchorId, GraphError> {
        if anchor.id.is_unassigned() {
            anchor.id = AnchorId::new(self.new_id());
            anchor.change.mark_created();
        } else if self.anchors.contains_key(&anchor.id) {
            return Err(GraphError::DuplicateAnchor(anchor.id));
        }
        let id = anchor.id.clone();
        let offset = anchor.offset;
        let created = anchor.change.is_created();
        self.offset_index
            .insert(offset, &id, self.offset_granularity);
        self.anchors.insert(id.clone(), anchor);
        if created {
            self.log(Change::create(EntityRef::Anchor(id.clone())));
            self.log(Change::update(
                EntityRef::Anchor(id.clone()),
                TrackedAttribute::Offset,
                TrackedValue::Null,
                offset.into(),
            ));
        }
        self.resolve_pending(&id);
        self.last_added_anchor_id = Some(id.clone());
        self.invalidate_offset_bounds();
        trace!(graph = %self.id, anchor = %id, ?offset, "anchor added");
        Ok(id)
    }

    fn resolve_pending(&mut self, anchor: &AnchorId) {
        for side in [Side::Start, Side::End] {
            let waiting = match side {
                Side::Start => self.pending_starts.remove(anchor),
                Side::End => self.pending_ends.remove(anchor),
            };
            for id in waiting.into_iter().flatten() {
                let layer = match self.annotations.get(&id) {
                    Some(a) if self.anchor_ref(a, side) == Some(anchor) => a.layer_id.clone(),
                    _ => continue,
                };
                trace!(graph = %self.id, annotation = %id, anchor = %anchor, "pending anchor resolved");
                self.link(side, anchor, &layer, &id);
                self.invalidate_layer(&layer);
            }
        }
    }

    /// Add an annotation.
    ///
    /// - An annotation without an id gets a fresh one and is marked as created.
    /// - Annotations on top-level layers become children of the graph.
    /// - A parent that is not in the graph yet leaves the annotation an
    ///   orphan until the parent arrives; orphans waiting for this
    ///   annotation are adopted.
    /// - On aligned (or unknown) layers a missing start chains onto the last
    ///   added anchor, and a missing end gets a new anchor. Anchor ids not in
    ///   the graph yet are queued and linked when the anchor is added.
    pub fn add_annotation(&mut self, annotation: Annotation) -> Result<AnnotationId, GraphError> {
        self.insert_annotation(annotation, true)
    }

    /// Add an annotation exactly as given, without inventing anchors for
    /// missing start or end ids.
    pub(crate) fn add_unanchored(&mut self, annotation: Annotation) -> Result<AnnotationId, GraphError> {
        self.insert_annotation(annotation, false)
    }

    fn insert_annotation(
        &mut self,
        mut annotation: Annotation,
        fill_anchors: bool,
    ) -> Result<AnnotationId, GraphError> {
        if annotation.id.is_unassigned() {
            annotation.id = AnnotationId::new(self.new_id());
            annotation.change.mark_created();
        } else if self.contains_node(&annotation.id) {
            return Err(GraphError::DuplicateAnnotation(annotation.id));
        }
        let id = annotation.id.clone();
        let layer_id = annotation.layer_id.clone();
        let layer = self.schema.layer(&layer_id).cloned();
        let top_level = layer
            .as_ref()
            .and_then(|l| l.parent_id.as_ref())
            .is_none_or(|p| p == self.schema.root_id());
        if top_level && annotation.parent_id.is_none() {
            annotation.parent_id = Some(self.id.clone());
        }

        let aligned = layer.as_ref().is_none_or(Layer::is_aligned);
        if aligned && fill_anchors {
            if annotation.start_id.is_none() {
                let start = match self
                    .last_added_anchor_id
                    .clone()
                    .filter(|a| self.anchors.contains_key(a))
                {
                    Some(last) => last,
                    None => self.add_anchor(Anchor::at(None))?,
                };
                annotation.start_id = Some(start);
            }
            if annotation.end_id.is_none() {
                annotation.end_id = Some(self.add_anchor(Anchor::at(None))?);
            }
        }

        let start = annotation.start_id.clone();
        let end = annotation.end_id.clone();
        let created = annotation.change.is_created();
        self.annotations.insert(id.clone(), annotation);
        self.layer_members
            .entry(layer_id.clone())
            .or_default()
            .insert(id.clone());
        if let Some(start) = &start {
            self.link(Side::Start, start, &layer_id, &id);
        }
        if let Some(end) = &end {
            self.link(Side::End, end, &layer_id, &id);
        }
        if aligned && end.is_some() {
            self.last_added_anchor_id = end;
        }

        self.attach(&id, false)?;
        self.adopt_orphans(&id)?;
        self.invalidate_layer(&layer_id);

        if created {
            self.log_creation(&id);
        }
        trace!(graph = %self.id, annotation = %id, layer = %layer_id, "annotation added");
        Ok(id)
    }

    fn log_creation(&mut self, id: &AnnotationId) {
        if self.tracker.is_none() {
            return;
        }
        let Some(annotation) = self.annotations.get(id) else {
            return;
        };
        let entity = EntityRef::Annotation(id.clone());
        let mut changes = vec![Change::create(entity.clone())];
        for attribute in TrackedAttribute::ANNOTATION {
            let value = annotation.tracked_value(attribute);
            if !value.is_null() {
                changes.push(Change::update(
                    entity.clone(),
                    attribute,
                    TrackedValue::Null,
                    value,
                ));
            }
        }
        for change in changes {
            self.log(change);
        }
    }

    /// Put an annotation in its parent's child set (or the orphan table),
    /// assign an ordinal if needed, and glue tag annotations to the parent.
    fn attach(&mut self, id: &AnnotationId, append: bool) -> Result<(), GraphError> {
        let Some(annotation) = self.annotations.get(id) else {
            return Err(GraphError::AnnotationNotFound(id.clone()));
        };
        let layer_id = annotation.layer_id.clone();
        let ordinal = annotation.ordinal;
        let parent = annotation
            .parent_id
            .clone()
            .filter(|p| self.contains_node(p));
        let Some(parent) = parent else {
            self.orphans.entry(layer_id).or_default().insert(id.clone());
            return Ok(());
        };
        if let Some(orphans) = self.orphans.get_mut(&layer_id) {
            orphans.remove(id);
        }
        self.children
            .entry(parent.clone())
            .or_default()
            .entry(layer_id.clone())
            .or_default()
            .insert(id.clone());
        if append || ordinal == UNASSIGNED_ORDINAL {
            let peers = self
                .child_ids(&parent, &layer_id)
                .into_iter()
                .filter(|p| p != id && self.is_live(p))
                .count() as i32;
            let next = peers + self.ordinal_minimum(&parent, &layer_id);
            self.assign_ordinal(id, next);
        }

        let unaligned = self
            .schema
            .layer(&layer_id)
            .is_some_and(|l| !l.is_aligned());
        let graph_tag = parent == self.id && self.schema.is_graph_tag_layer(&layer_id);
        if unaligned && (parent != self.id || graph_tag) {
            let (start, end) = if graph_tag {
                let annotation = self.annotations.get(id);
                (
                    annotation
                        .and_then(|a| a.start_id.clone())
                        .or_else(|| self.start_id()),
                    annotation
                        .and_then(|a| a.end_id.clone())
                        .or_else(|| self.end_id()),
                )
            } else {
                let parent = self.annotations.get(&parent);
                (
                    parent.and_then(|p| p.start_id.clone()),
                    parent.and_then(|p| p.end_id.clone()),
                )
            };
            // an anchorless parent (e.g. a fragment ancestor) leaves tags alone
            if start.is_none() && end.is_none() {
                return Ok(());
            }
            self.relink(id, Side::Start, start, true)?;
            self.relink(id, Side::End, end, true)?;
        }
        Ok(())
    }

    fn adopt_orphans(&mut self, parent: &AnnotationId) -> Result<(), GraphError> {
        let Some(layer) = self.layer_id_of(parent).cloned() else {
            return Ok(());
        };
        for child_layer in self.schema.children_of(&layer) {
            let waiting: Vec<AnnotationId> = self
                .orphans
                .get(&child_layer)
                .into_iter()
                .flatten()
                .filter(|o| {
                    self.annotations
                        .get(*o)
                        .is_some_and(|a| a.parent_id.as_ref() == Some(parent))
                })
                .cloned()
                .collect();
            for orphan in waiting {
                trace!(graph = %self.id, annotation = %orphan, parent = %parent, "orphan adopted");
                self.attach(&orphan, false)?;
            }
        }
        Ok(())
    }

    // =========================================================================
    // STRUCTURAL MUTATORS
    // =========================================================================

    /// Change an anchor's offset. A NaN offset clears it.
    pub fn set_offset(&mut self, id: &AnchorId, offset: Option<f64>) -> Result<(), GraphError> {
        let offset = sanitize_offset(offset);
        let anchor = self
            .anchors
            .get_mut(id)
            .ok_or_else(|| GraphError::AnchorNotFound(id.clone()))?;
        if anchor.offset == offset {
            return Ok(());
        }
        let old = anchor.offset;
        let old_value = TrackedValue::from(old);
        let new_value = TrackedValue::from(offset);
        anchor
            .change
            .record(TrackedAttribute::Offset, &old_value, &new_value);
        anchor.offset = offset;
        let created = anchor.change.is_created();
        self.offset_index.remove(old, id, self.offset_granularity);
        self.offset_index.insert(offset, id, self.offset_granularity);
        self.log_update(
            EntityRef::Anchor(id.clone()),
            TrackedAttribute::Offset,
            old_value,
            new_value,
            created,
        );
        let layers: BTreeSet<LayerId> = self
            .starts
            .get(id)
            .into_iter()
            .chain(self.ends.get(id))
            .flat_map(|links| links.keys().cloned())
            .collect();
        for layer in &layers {
            self.invalidate_layer(layer);
        }
        self.invalidate_offset_bounds();
        trace!(graph = %self.id, anchor = %id, ?old, ?offset, "offset changed");
        Ok(())
    }

    pub fn set_label(&mut self, id: &AnnotationId, label: impl Into<String>) -> Result<(), GraphError> {
        let label = label.into();
        let annotation = self
            .annotations
            .get_mut(id)
            .ok_or_else(|| GraphError::AnnotationNotFound(id.clone()))?;
        if annotation.label == label {
            return Ok(());
        }
        let old_value = TrackedValue::Text(annotation.label.clone());
        let new_value = TrackedValue::Text(label.clone());
        annotation
            .change
            .record(TrackedAttribute::Label, &old_value, &new_value);
        annotation.label = label;
        let created = annotation.change.is_created();
        self.log_update(
            EntityRef::Annotation(id.clone()),
            TrackedAttribute::Label,
            old_value,
            new_value,
            created,
        );
        Ok(())
    }

    /// Set the start anchor. Unaligned children follow.
    pub fn set_start_id(
        &mut self,
        id: &AnnotationId,
        start: Option<AnchorId>,
    ) -> Result<(), GraphError> {
        self.relink(id, Side::Start, start, false)
    }

    /// Set the end anchor. Unaligned children follow.
    pub fn set_end_id(&mut self, id: &AnnotationId, end: Option<AnchorId>) -> Result<(), GraphError> {
        self.relink(id, Side::End, end, false)
    }

    /// Point one side of an annotation at `value`. With `attaching`, filling
    /// an unset side is part of building the annotation, not an edit.
    fn relink(
        &mut self,
        id: &AnnotationId,
        side: Side,
        value: Option<AnchorId>,
        attaching: bool,
    ) -> Result<(), GraphError> {
        let annotation = self
            .annotations
            .get_mut(id)
            .ok_or_else(|| GraphError::AnnotationNotFound(id.clone()))?;
        let slot = match side {
            Side::Start => &mut annotation.start_id,
            Side::End => &mut annotation.end_id,
        };
        if *slot == value {
            return Ok(());
        }
        let old = std::mem::replace(slot, value.clone());
        let attribute = side.attribute();
        let old_value = TrackedValue::from(old.as_ref().map(AnchorId::as_str));
        let new_value = TrackedValue::from(value.as_ref().map(AnchorId::as_str));
        let filling = attaching && old.is_none();
        if !filling {
            annotation.change.record(attribute, &old_value, &new_value);
        }
        let created = annotation.change.is_created();
        let layer_id = annotation.layer_id.clone();

        if let Some(old) = &old {
            self.unlink(side, old, &layer_id, id);
        }
        if let Some(new) = &value {
            self.link(side, new, &layer_id, id);
        }
        if !filling || created {
            self.log_update(
                EntityRef::Annotation(id.clone()),
                attribute,
                old_value,
                new_value,
                created,
            );
        }
        self.invalidate_layer(&layer_id);

        // tag children share this annotation's anchors
        let tag_layers: Vec<LayerId> = self
            .schema
            .layers()
            .filter(|l| l.parent_id.as_ref() == Some(&layer_id) && !l.is_aligned())
            .map(|l| l.id.clone())
            .collect();
        for tag_layer in tag_layers {
            let tags: Vec<AnnotationId> = self
                .child_ids(id, &tag_layer)
                .into_iter()
                .filter(|c| self.is_live(c))
                .collect();
            for tag in tags {
                self.relink(&tag, side, value.clone(), attaching)?;
            }
        }
        Ok(())
    }

    /// Move an annotation under a new parent (or none).
    ///
    /// With `append` the annotation becomes the last of its new siblings;
    /// otherwise it keeps its ordinal, unless it has none yet.
    pub fn set_parent(
        &mut self,
        id: &AnnotationId,
        parent: Option<AnnotationId>,
        append: bool,
    ) -> Result<(), GraphError> {
        let annotation = self
            .annotations
            .get(id)
            .ok_or_else(|| GraphError::AnnotationNotFound(id.clone()))?;
        if annotation.parent_id == parent {
            return Ok(());
        }
        let layer_id = annotation.layer_id.clone();
        let old = annotation.parent_id.clone();

        if let Some(old) = &old {
            if let Some(siblings) = self
                .children
                .get_mut(old)
                .and_then(|layers| layers.get_mut(&layer_id))
            {
                siblings.remove(id);
            }
        }
        if let Some(orphans) = self.orphans.get_mut(&layer_id) {
            orphans.remove(id);
        }

        let old_value = TrackedValue::from(old.as_ref().map(AnnotationId::as_str));
        let new_value = TrackedValue::from(parent.as_ref().map(AnnotationId::as_str));
        let created = match self.annotations.get_mut(id) {
            Some(annotation) => {
                annotation
                    .change
                    .record(TrackedAttribute::ParentId, &old_value, &new_value);
                annotation.parent_id = parent.clone();
                annotation.change.is_created()
            }
            None => return Err(GraphError::AnnotationNotFound(id.clone())),
        };
        self.log_update(
            EntityRef::Annotation(id.clone()),
            TrackedAttribute::ParentId,
            old_value,
            new_value,
            created,
        );

        self.attach(id, append)?;
        if let Some(old) = old.filter(|o| self.contains_node(o)) {
            self.correct_ordinals(&old, &layer_id);
        }
        debug!(graph = %self.id, annotation = %id, parent = ?parent, "parent changed");
        Ok(())
    }

    /// Move an annotation to position `ordinal` among its live siblings,
    /// shifting the others to keep the sequence contiguous.
    pub fn set_ordinal(&mut self, id: &AnnotationId, ordinal: i32) -> Result<(), GraphError> {
        let annotation = self
            .annotations
            .get(id)
            .ok_or_else(|| GraphError::AnnotationNotFound(id.clone()))?;
        if annotation.ordinal == ordinal {
            return Ok(());
        }
        let layer_id = annotation.layer_id.clone();
        let parent = annotation
            .parent_id
            .clone()
            .filter(|p| self.contains_node(p));
        let Some(parent) = parent else {
            self.assign_ordinal(id, ordinal);
            return Ok(());
        };
        let minimum = self.ordinal_minimum(&parent, &layer_id);
        let mut peers: Vec<AnnotationId> = self
            .child_ids(&parent, &layer_id)
            .into_iter()
            .filter(|p| p != id && self.is_live(p))
            .collect();
        let index = ordinal.saturating_sub(minimum).clamp(0, peers.len() as i32) as usize;
        peers.insert(index, id.clone());
        for (position, peer) in peers.iter().enumerate() {
            self.assign_ordinal(peer, minimum + position as i32);
        }
        Ok(())
    }

    /// Renumber the live children of `parent` on `layer` contiguously from
    /// the layer's ordinal minimum, keeping their current order.
    pub fn correct_ordinals(&mut self, parent: &AnnotationId, layer: &LayerId) {
        let minimum = self.ordinal_minimum(parent, layer);
        let peers: Vec<AnnotationId> = self
            .child_ids(parent, layer)
            .into_iter()
            .filter(|p| self.is_live(p))
            .collect();
        for (position, peer) in peers.iter().enumerate() {
            self.assign_ordinal(peer, minimum + position as i32);
        }
    }

    pub(crate) fn assign_ordinal(&mut self, id: &AnnotationId, ordinal: i32) {
        let Some(annotation) = self.annotations.get_mut(id) else {
            return;
        };
        if annotation.ordinal == ordinal {
            return;
        }
        let old_value = TrackedValue::from(annotation.ordinal);
        let new_value = TrackedValue::from(ordinal);
        annotation
            .change
            .record(TrackedAttribute::Ordinal, &old_value, &new_value);
        annotation.ordinal = ordinal;
        let created = annotation.change.is_created();
        self.log_update(
            EntityRef::Annotation(id.clone()),
            TrackedAttribute::Ordinal,
            old_value,
            new_value,
            created,
        );
    }

    /// Minimum ordinal of the children of `parent` on `layer`.
    #[must_use]
    pub fn ordinal_minimum(&self, parent: &AnnotationId, layer: &LayerId) -> i32 {
        self.ordinal_minima
            .get(parent)
            .and_then(|minima| minima.get(layer))
            .copied()
            .unwrap_or(self.default_ordinal_minimum)
    }

    /// Set the minimum ordinal of the children of `parent` on `layer`.
    pub fn set_ordinal_minimum(&mut self, parent: &AnnotationId, layer: &LayerId, minimum: i32) {
        self.ordinal_minima
            .entry(parent.clone())
            .or_default()
            .insert(layer.clone(), minimum);
    }

    /// Ordinal of an annotation; an unassigned ordinal is derived from the
    /// annotation's position among its live siblings.
    #[must_use]
    pub fn ordinal(&self, id: &AnnotationId) -> i32 {
        let Some(annotation) = self.annotations.get(id) else {
            return UNASSIGNED_ORDINAL;
        };
        if annotation.ordinal != UNASSIGNED_ORDINAL {
            return annotation.ordinal;
        }
        let Some(parent) = annotation
            .parent_id
            .as_ref()
            .filter(|p| self.contains_node(p))
        else {
            return UNASSIGNED_ORDINAL;
        };
        let prior = self
            .child_ids(parent, &annotation.layer_id)
            .into_iter()
            .take_while(|p| p != id)
            .filter(|p| self.is_live(p))
            .count() as i32;
        prior + self.ordinal_minimum(parent, &annotation.layer_id)
    }

    // =========================================================================
    // LIFECYCLE MARKS
    // =========================================================================

    /// Mark an annotation for destruction. It stays in the graph until
    /// `commit`, and its live siblings are renumbered.
    pub fn destroy_annotation(&mut self, id: &AnnotationId) -> Result<(), GraphError> {
        let annotation = self
            .annotations
            .get_mut(id)
            .ok_or_else(|| GraphError::AnnotationNotFound(id.clone()))?;
        if annotation.is_destroyed() {
            return Ok(());
        }
        annotation.change.mark_destroyed();
        let layer_id = annotation.layer_id.clone();
        let parent = annotation.parent_id.clone();
        self.log(Change::destroy(EntityRef::Annotation(id.clone())));
        if let Some(parent) = parent.filter(|p| self.contains_node(p)) {
            self.correct_ordinals(&parent, &layer_id);
        }
        self.invalidate_layer(&layer_id);
        debug!(graph = %self.id, annotation = %id, "annotation destroyed");
        Ok(())
    }

    /// Mark an anchor for destruction.
    pub fn destroy_anchor(&mut self, id: &AnchorId) -> Result<(), GraphError> {
        let anchor = self
            .anchors
            .get_mut(id)
            .ok_or_else(|| GraphError::AnchorNotFound(id.clone()))?;
        if anchor.is_destroyed() {
            return Ok(());
        }
        anchor.change.mark_destroyed();
        self.log(Change::destroy(EntityRef::Anchor(id.clone())));
        self.invalidate_offset_bounds();
        debug!(graph = %self.id, anchor = %id, "anchor destroyed");
        Ok(())
    }

    /// Mark an existing annotation as newly created.
    pub fn mark_annotation_created(&mut self, id: &AnnotationId) -> Result<(), GraphError> {
        let annotation = self
            .annotations
            .get_mut(id)
            .ok_or_else(|| GraphError::AnnotationNotFound(id.clone()))?;
        annotation.change.mark_created();
        self.log_creation(id);
        Ok(())
    }

    /// Mark an existing anchor as newly created.
    pub fn mark_anchor_created(&mut self, id: &AnchorId) -> Result<(), GraphError> {
        let anchor = self
            .anchors
            .get_mut(id)
            .ok_or_else(|| GraphError::AnchorNotFound(id.clone()))?;
        anchor.change.mark_created();
        let offset = anchor.offset;
        self.log(Change::create(EntityRef::Anchor(id.clone())));
        self.log(Change::update(
            EntityRef::Anchor(id.clone()),
            TrackedAttribute::Offset,
            TrackedValue::Null,
            offset.into(),
        ));
        Ok(())
    }

    /// Mark the graph itself as newly created: everything in it will be
    /// reported as a creation.
    pub fn create(&mut self) {
        self.change.mark_created();
        self.log(Change::create(EntityRef::Graph(self.id.clone())));
    }

    /// Mark the graph itself for destruction: everything in it will be
    /// reported as destroyed.
    pub fn destroy(&mut self) {
        self.change.mark_destroyed();
        self.log(Change::destroy(EntityRef::Graph(self.id.clone())));
    }

    // =========================================================================
    // CHANGE LOG
    // =========================================================================

    /// Start recording changes in a per-graph log.
    pub fn track_changes(&mut self) {
        if self.tracker.is_none() {
            self.tracker = Some(ChangeTracker::new());
        }
    }

    /// The change log, if tracking is on.
    #[must_use]
    pub fn tracker(&self) -> Option<&ChangeTracker> {
        self.tracker.as_ref()
    }

    pub(crate) fn log(&mut self, change: Change) {
        if let Some(tracker) = &mut self.tracker {
            tracker.record(change);
        }
    }

    fn log_update(
        &mut self,
        entity: EntityRef,
        attribute: TrackedAttribute,
        old: TrackedValue,
        new: TrackedValue,
        created: bool,
    ) {
        // a first ordinal is only news for an entity being created
        let first_ordinal = attribute == TrackedAttribute::Ordinal && old.is_null();
        if !first_ordinal || created {
            self.log(Change::update(entity, attribute, old, new));
        }
    }

    // =========================================================================
    // LINKS
    // =========================================================================

    fn anchor_ref<'a>(&self, annotation: &'a Annotation, side: Side) -> Option<&'a AnchorId> {
        match side {
            Side::Start => annotation.start_id.as_ref(),
            Side::End => annotation.end_id.as_ref(),
        }
    }

    fn link(&mut self, side: Side, anchor: &AnchorId, layer: &LayerId, id: &AnnotationId) {
        if self.anchors.contains_key(anchor) {
            let links = match side {
                Side::Start => &mut self.starts,
                Side::End => &mut self.ends,
            };
            links
                .entry(anchor.clone())
                .or_default()
                .entry(layer.clone())
                .or_default()
                .insert(id.clone());
        } else {
            trace!(graph = %self.id, annotation = %id, anchor = %anchor, "anchor pending");
            let pending = match side {
                Side::Start => &mut self.pending_starts,
                Side::End => &mut self.pending_ends,
            };
            pending.entry(anchor.clone()).or_default().insert(id.clone());
        }
        self.invalidate_offset_bounds();
    }

    fn unlink(&mut self, side: Side, anchor: &AnchorId, layer: &LayerId, id: &AnnotationId) {
        let (links, pending) = match side {
            Side::Start => (&mut self.starts, &mut self.pending_starts),
            Side::End => (&mut self.ends, &mut self.pending_ends),
        };
        if let Some(layers) = links.get_mut(anchor) {
            if let Some(set) = layers.get_mut(layer) {
                set.remove(id);
                if set.is_empty() {
                    layers.remove(layer);
                }
            }
            if layers.is_empty() {
                links.remove(anchor);
            }
        }
        if let Some(set) = pending.get_mut(anchor) {
            set.remove(id);
            if set.is_empty() {
                pending.remove(anchor);
            }
        }
        self.invalidate_offset_bounds();
    }

    fn linked(&self, side: Side, anchor: &AnchorId, layer: Option<&LayerId>) -> Vec<&Annotation> {
        let links = match side {
            Side::Start => &self.starts,
            Side::End => &self.ends,
        };
        let Some(layers) = links.get(anchor) else {
            return Vec::new();
        };
        layers
            .iter()
            .filter(|(l, _)| layer.is_none_or(|wanted| *l == wanted))
            .flat_map(|(_, ids)| ids)
            .filter_map(|id| self.annotations.get(id))
            .filter(|a| self.anchor_ref(a, side) == Some(anchor))
            .collect()
    }

    /// Annotations on `layer` that start at `anchor`.
    #[must_use]
    pub fn start_of(&self, anchor: &AnchorId, layer: &LayerId) -> Vec<&Annotation> {
        self.linked(Side::Start, anchor, Some(layer))
    }

    /// Annotations on `layer` that end at `anchor`.
    #[must_use]
    pub fn end_of(&self, anchor: &AnchorId, layer: &LayerId) -> Vec<&Annotation> {
        self.linked(Side::End, anchor, Some(layer))
    }

    /// Annotations on any layer that start at `anchor`, grouped by layer id.
    #[must_use]
    pub fn starting_annotations(&self, anchor: &AnchorId) -> Vec<&Annotation> {
        self.linked(Side::Start, anchor, None)
    }

    /// Annotations on any layer that end at `anchor`, grouped by layer id.
    #[must_use]
    pub fn ending_annotations(&self, anchor: &AnchorId) -> Vec<&Annotation> {
        self.linked(Side::End, anchor, None)
    }

    /// Ids of the layers with annotations starting at `anchor`.
    #[must_use]
    pub fn starting_layers(&self, anchor: &AnchorId) -> Vec<LayerId> {
        let layers: BTreeSet<LayerId> = self
            .starting_annotations(anchor)
            .into_iter()
            .map(|a| a.layer_id.clone())
            .collect();
        layers.into_iter().collect()
    }

    /// Ids of the layers with annotations ending at `anchor`.
    #[must_use]
    pub fn ending_layers(&self, anchor: &AnchorId) -> Vec<LayerId> {
        let layers: BTreeSet<LayerId> = self
            .ending_annotations(anchor)
            .into_iter()
            .map(|a| a.layer_id.clone())
            .collect();
        layers.into_iter().collect()
    }

    /// True if a live annotation starts or ends at `anchor`.
    #[must_use]
    pub fn is_linked(&self, anchor: &AnchorId) -> bool {
        self.starting_annotations(anchor)
            .into_iter()
            .chain(self.ending_annotations(anchor))
            .any(|a| !a.is_destroyed())
    }

    /// First annotation (on `layer`, or any layer) running from `start` to `end`.
    #[must_use]
    pub fn annotation_to(
        &self,
        start: &AnchorId,
        end: &AnchorId,
        layer: Option<&LayerId>,
    ) -> Option<&Annotation> {
        self.linked(Side::Start, start, layer)
            .into_iter()
            .find(|a| a.end_id.as_ref() == Some(end))
    }

    /// Child ids of `parent` on `layer`, by ordinal then id. Unassigned
    /// ordinals sort last. Destroyed children are included.
    pub(crate) fn child_ids(&self, parent: &AnnotationId, layer: &LayerId) -> Vec<AnnotationId> {
        let mut children: Vec<&Annotation> = self
            .children
            .get(parent)
            .and_then(|layers| layers.get(layer))
            .into_iter()
            .flatten()
            .filter_map(|id| self.annotations.get(id))
            .filter(|a| a.parent_id.as_ref() == Some(parent))
            .collect();
        children.sort_by(|a, b| compare_siblings(a, b));
        children.into_iter().map(|a| a.id.clone()).collect()
    }

    /// Children of `parent` on `layer`, in ordinal order, destroyed ones
    /// included.
    #[must_use]
    pub fn children(&self, parent: &AnnotationId, layer: &LayerId) -> Vec<&Annotation> {
        self.child_ids(parent, layer)
            .iter()
            .filter_map(|id| self.annotations.get(id))
            .collect()
    }

    /// Layers on which `parent` has children.
    #[must_use]
    pub fn child_layers(&self, parent: &AnnotationId) -> Vec<LayerId> {
        self.children
            .get(parent)
            .map(|layers| {
                layers
                    .iter()
                    .filter(|(_, ids)| !ids.is_empty())
                    .map(|(layer, _)| layer.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    // =========================================================================
    // OFFSETS
    // =========================================================================

    /// Compare two offsets, treating offsets closer than the granularity
    /// as equal.
    #[must_use]
    pub fn compare_offsets(&self, a: f64, b: f64) -> Ordering {
        if let Some(g) = self.offset_granularity {
            if (a - b).abs() < g {
                return Ordering::Equal;
            }
        }
        a.total_cmp(&b)
    }

    /// The offset rounded to the nearest multiple of the granularity.
    #[must_use]
    pub fn quantum_offset(&self, offset: f64) -> f64 {
        match self.offset_granularity {
            Some(g) => offset - ieee_remainder(offset, g),
            None => offset,
        }
    }

    /// The anchor at `offset`, within the granularity if one is set.
    #[must_use]
    pub fn get_anchor_at(&self, offset: f64) -> Option<&Anchor> {
        self.offset_index
            .candidates(offset, self.offset_granularity)
            .into_iter()
            .filter_map(|id| self.anchors.get(id))
            .filter(|a| !a.is_destroyed())
            .filter_map(|a| a.offset.map(|o| (a, (o - offset).abs())))
            .filter(|(_, distance)| match self.offset_granularity {
                Some(g) => *distance < g,
                None => *distance == 0.0,
            })
            .min_by(|(a, x), (b, y)| x.total_cmp(y).then_with(|| a.id.cmp(&b.id)))
            .map(|(a, _)| a)
    }

    /// The anchor at `offset`, creating it if there isn't one.
    pub fn get_or_create_anchor_at(
        &mut self,
        offset: f64,
        confidence: Option<i32>,
    ) -> Result<AnchorId, GraphError> {
        if let Some(anchor) = self.get_anchor_at(offset) {
            return Ok(anchor.id.clone());
        }
        self.create_anchor_at(offset, confidence)
    }

    /// A new anchor at `offset`, even if one exists there already. Without
    /// a confidence the graph's default confidence is used.
    pub fn create_anchor_at(
        &mut self,
        offset: f64,
        confidence: Option<i32>,
    ) -> Result<AnchorId, GraphError> {
        let mut anchor = Anchor::at(Some(offset));
        anchor.confidence = Some(confidence.unwrap_or(self.default_confidence));
        self.add_anchor(anchor)
    }

    /// Anchors with an offset, in offset order (ties by id).
    #[must_use]
    pub fn sorted_anchors(&self) -> Vec<&Anchor> {
        let mut anchors: Vec<&Anchor> = self
            .anchors
            .values()
            .filter(|a| a.offset.is_some())
            .collect();
        anchors.sort_by(|a, b| compare_anchors(a, b));
        anchors
    }

    /// Order two anchors by offset, falling back to id when either offset
    /// is unset or they are equal.
    #[must_use]
    pub fn compare_anchors(&self, a: &AnchorId, b: &AnchorId) -> Ordering {
        match (self.anchors.get(a), self.anchors.get(b)) {
            (Some(x), Some(y)) => compare_anchors(x, y),
            _ => a.cmp(b),
        }
    }

    /// Lowest offset an anchor can have: its own, or the greatest lower
    /// bound reachable backwards through non-instantaneous annotations.
    #[must_use]
    pub fn offset_min(&self, anchor: &AnchorId) -> Option<f64> {
        let mut visiting = BTreeSet::new();
        self.offset_bound(anchor, Side::Start, &mut visiting)
    }

    /// Highest offset an anchor can have: its own, or the least upper
    /// bound reachable forwards through non-instantaneous annotations.
    #[must_use]
    pub fn offset_max(&self, anchor: &AnchorId) -> Option<f64> {
        let mut visiting = BTreeSet::new();
        self.offset_bound(anchor, Side::End, &mut visiting)
    }

    // Side::Start walks backwards (minimum), Side::End walks forwards (maximum).
    fn offset_bound(
        &self,
        anchor: &AnchorId,
        side: Side,
        visiting: &mut BTreeSet<AnchorId>,
    ) -> Option<f64> {
        let a = self.anchors.get(anchor)?;
        if a.offset.is_some() {
            return a.offset;
        }
        let memo = match side {
            Side::Start => &self.offset_min_memo,
            Side::End => &self.offset_max_memo,
        };
        if let Some(bound) = memo.borrow().get(anchor) {
            return *bound;
        }
        if !visiting.insert(anchor.clone()) {
            return None;
        }
        let neighbours: Vec<AnchorId> = match side {
            Side::Start => self
                .ending_annotations(anchor)
                .into_iter()
                .filter(|a| !a.is_destroyed() && !a.is_instantaneous())
                .filter_map(|a| a.start_id.clone())
                .collect(),
            Side::End => self
                .starting_annotations(anchor)
                .into_iter()
                .filter(|a| !a.is_destroyed() && !a.is_instantaneous())
                .filter_map(|a| a.end_id.clone())
                .collect(),
        };
        let mut bound: Option<f64> = None;
        for neighbour in neighbours {
            if let Some(candidate) = self.offset_bound(&neighbour, side, visiting) {
                bound = Some(match (bound, side) {
                    (None, _) => candidate,
                    (Some(b), Side::Start) => b.max(candidate),
                    (Some(b), Side::End) => b.min(candidate),
                });
            }
        }
        visiting.remove(anchor);
        memo.borrow_mut().insert(anchor.clone(), bound);
        bound
    }

    /// Anchors reachable backwards from `anchor` through live annotations.
    #[must_use]
    pub fn preceding(&self, anchor: &AnchorId) -> BTreeSet<AnchorId> {
        self.reachable(anchor, Side::Start)
    }

    /// Anchors reachable forwards from `anchor` through live annotations.
    #[must_use]
    pub fn following(&self, anchor: &AnchorId) -> BTreeSet<AnchorId> {
        self.reachable(anchor, Side::End)
    }

    fn reachable(&self, anchor: &AnchorId, direction: Side) -> BTreeSet<AnchorId> {
        let mut seen = BTreeSet::new();
        let mut queue = VecDeque::from([anchor.clone()]);
        while let Some(current) = queue.pop_front() {
            let next: Vec<AnchorId> = match direction {
                Side::Start => self
                    .ending_annotations(&current)
                    .into_iter()
                    .filter(|a| !a.is_destroyed())
                    .filter_map(|a| a.start_id.clone())
                    .collect(),
                Side::End => self
                    .starting_annotations(&current)
                    .into_iter()
                    .filter(|a| !a.is_destroyed())
                    .filter_map(|a| a.end_id.clone())
                    .collect(),
            };
            for n in next {
                if n != *anchor && seen.insert(n.clone()) {
                    queue.push_back(n);
                }
            }
        }
        seen
    }

    /// True if `b` can be reached forwards from `a`.
    #[must_use]
    pub fn precedes(&self, a: &AnchorId, b: &AnchorId) -> bool {
        a != b && self.following(a).contains(b)
    }

    /// True if `b` can be reached backwards from `a`.
    #[must_use]
    pub fn follows(&self, a: &AnchorId, b: &AnchorId) -> bool {
        a != b && self.preceding(a).contains(b)
    }

    // =========================================================================
    // GRAPH BOUNDS
    // =========================================================================

    /// The anchor where the graph starts.
    ///
    /// Anchors with offsets beat anchors without; lower offsets win. On a
    /// tie the anchor linked to the shallowest aligned annotation wins, and
    /// on equal depth the first in id order stays.
    #[must_use]
    pub fn start_id(&self) -> Option<AnchorId> {
        self.bound(Side::Start)
    }

    /// The anchor where the graph ends.
    ///
    /// Anchors with offsets beat anchors without; higher offsets win. On a
    /// tie the anchor linked to the shallowest aligned annotation wins, and
    /// on equal depth the last in id order takes over.
    #[must_use]
    pub fn end_id(&self) -> Option<AnchorId> {
        self.bound(Side::End)
    }

    fn bound(&self, side: Side) -> Option<AnchorId> {
        let mut best: Option<(&Anchor, usize)> = None;
        for anchor in self.anchors.values().filter(|a| !a.is_destroyed()) {
            let depth = self.anchor_depth(&anchor.id);
            let replace = match best {
                None => true,
                Some((current, current_depth)) => match (anchor.offset, current.offset) {
                    (Some(_), None) => true,
                    (None, Some(_)) => false,
                    (Some(o), Some(c)) if o != c => match side {
                        Side::Start => o < c,
                        Side::End => o > c,
                    },
                    _ => match side {
                        Side::Start => depth < current_depth,
                        Side::End => depth <= current_depth,
                    },
                },
            };
            if replace {
                best = Some((anchor, depth));
            }
        }
        best.map(|(anchor, _)| anchor.id.clone())
    }

    /// Fewest ancestors among the live aligned annotations linked at `anchor`.
    fn anchor_depth(&self, anchor: &AnchorId) -> usize {
        self.starting_annotations(anchor)
            .into_iter()
            .chain(self.ending_annotations(anchor))
            .filter(|a| !a.is_destroyed())
            .filter(|a| self.schema.layer(&a.layer_id).is_some_and(Layer::is_aligned))
            .map(|a| self.ancestor_count(&a.id))
            .min()
            .unwrap_or(usize::MAX)
    }

    pub(crate) fn ancestor_count(&self, id: &AnnotationId) -> usize {
        let mut count = 0;
        let mut seen = BTreeSet::new();
        let mut current = self.parent_id_of(id);
        while let Some(parent) = current {
            if !seen.insert(parent) {
                break;
            }
            count += 1;
            current = self.parent_id_of(parent);
        }
        count
    }

    // =========================================================================
    // LOCALITY INDEX
    // =========================================================================

    /// Live anchored annotations on `layer` whose span comes within about
    /// one unit of `offset`. A cheap candidate set for "near" queries.
    #[must_use]
    pub fn list_near(&self, layer: &LayerId, offset: f64) -> Vec<&Annotation> {
        let mut locality = self.locality.borrow_mut();
        let spans = locality.entry(layer.clone()).or_insert_with(|| {
            let mut spans: Vec<UnitSpan> = self
                .layer_annotations(layer)
                .into_iter()
                .filter(|a| !a.is_destroyed())
                .filter_map(|a| {
                    let start = self.annotation_offset(a, Side::Start)?;
                    let end = self.annotation_offset(a, Side::End)?;
                    Some(UnitSpan {
                        first: start.floor() as i64,
                        last: (end.floor() as i64).saturating_add(1),
                        id: a.id.clone(),
                    })
                })
                .collect();
            spans.sort_by(|a, b| a.first.cmp(&b.first).then_with(|| a.id.cmp(&b.id)));
            spans
        });
        // units `unit` and `unit + 1` are near
        let unit = offset.floor() as i64;
        let ids: BTreeSet<AnnotationId> = spans
            .iter()
            .take_while(|span| span.first <= unit.saturating_add(1))
            .filter(|span| span.last >= unit)
            .map(|span| span.id.clone())
            .collect();
        drop(locality);
        ids.iter()
            .filter_map(|id| self.annotations.get(id))
            .filter(|a| !a.is_destroyed())
            .collect()
    }

    pub(crate) fn annotation_offset(&self, annotation: &Annotation, side: Side) -> Option<f64> {
        self.anchor_ref(annotation, side)
            .and_then(|a| self.anchors.get(a))
            .and_then(|a| a.offset)
    }

    pub(crate) fn invalidate_layer(&self, layer: &LayerId) {
        self.locality.borrow_mut().remove(layer);
        self.invalidate_offset_bounds();
    }

    fn invalidate_offset_bounds(&self) {
        self.offset_min_memo.borrow_mut().clear();
        self.offset_max_memo.borrow_mut().clear();
    }

    fn invalidate_all(&self) {
        self.locality.borrow_mut().clear();
        self.invalidate_offset_bounds();
    }

    // =========================================================================
    // REMOVAL (commit / rollback only)
    // =========================================================================

    /// Physically remove an annotation, severing every index entry.
    /// Its children become orphans.
    pub(crate) fn remove_annotation(&mut self, id: &AnnotationId) -> Option<Annotation> {
        let annotation = self.annotations.remove(id)?;
        let layer = annotation.layer_id.clone();
        if let Some(start) = &annotation.start_id {
            self.unlink(Side::Start, start, &layer, id);
        }
        if let Some(end) = &annotation.end_id {
            self.unlink(Side::End, end, &layer, id);
        }
        if let Some(parent) = &annotation.parent_id {
            if let Some(siblings) = self
                .children
                .get_mut(parent)
                .and_then(|layers| layers.get_mut(&layer))
            {
                siblings.remove(id);
            }
        }
        if let Some(orphans) = self.orphans.get_mut(&layer) {
            orphans.remove(id);
        }
        if let Some(members) = self.layer_members.get_mut(&layer) {
            members.remove(id);
        }
        if let Some(children) = self.children.remove(id) {
            for (child_layer, ids) in children {
                self.orphans.entry(child_layer).or_default().extend(ids);
            }
        }
        self.ordinal_minima.remove(id);
        self.invalidate_layer(&layer);
        Some(annotation)
    }

    /// Physically remove an anchor. Annotations still referring to it go
    /// back to waiting for it.
    pub(crate) fn remove_anchor(&mut self, id: &AnchorId) -> Option<Anchor> {
        let anchor = self.anchors.remove(id)?;
        self.offset_index
            .remove(anchor.offset, id, self.offset_granularity);
        for (links, pending) in [
            (&mut self.starts, &mut self.pending_starts),
            (&mut self.ends, &mut self.pending_ends),
        ] {
            if let Some(layers) = links.remove(id) {
                let waiting = pending.entry(id.clone()).or_default();
                waiting.extend(layers.into_values().flatten());
            }
        }
        if self.last_added_anchor_id.as_ref() == Some(id) {
            self.last_added_anchor_id = None;
        }
        self.invalidate_all();
        Some(anchor)
    }

    // =========================================================================
    // TREE WALK
    // =========================================================================

    /// Depth-first walk of the ownership tree from the graph: child layers
    /// in top-down schema order, children by ordinal. Annotations the walk
    /// cannot reach (orphans, unknown layers) are visited afterwards in id
    /// order.
    pub(crate) fn walk_tree(&self, visit: &mut impl FnMut(&Annotation, Visit)) {
        let mut visited = BTreeSet::new();
        self.walk_from(&self.id, &mut visited, visit);
        for annotation in self.annotations.values() {
            if !visited.contains(&annotation.id) {
                visited.insert(annotation.id.clone());
                visit(annotation, Visit::Pre);
                visit(annotation, Visit::Post);
            }
        }
    }

    /// Walk the subtree below `id` (excluding `id` itself).
    pub(crate) fn walk_from(
        &self,
        id: &AnnotationId,
        visited: &mut BTreeSet<AnnotationId>,
        visit: &mut impl FnMut(&Annotation, Visit),
    ) {
        let Some(layer) = self.layer_id_of(id) else {
            return;
        };
        for child_layer in self.schema.children_of(layer) {
            for child in self.child_ids(id, &child_layer) {
                if !visited.insert(child.clone()) {
                    continue;
                }
                if let Some(annotation) = self.annotations.get(&child) {
                    visit(annotation, Visit::Pre);
                    self.walk_from(&child, visited, visit);
                    visit(annotation, Visit::Post);
                }
            }
        }
    }
}

// =============================================================================
// HELPERS
// =============================================================================

/// Sibling order: ordinal (unassigned last), then id.
pub(crate) fn compare_siblings(a: &Annotation, b: &Annotation) -> Ordering {
    let key = |x: &Annotation| {
        if x.ordinal == UNASSIGNED_ORDINAL {
            i32::MAX
        } else {
            x.ordinal
        }
    };
    key(a).cmp(&key(b)).then_with(|| a.id.cmp(&b.id))
}

/// Offset order, falling back to id when either offset is unset or equal.
pub(crate) fn compare_anchors(a: &Anchor, b: &Anchor) -> Ordering {
    match (a.offset, b.offset) {
        (Some(x), Some(y)) if x != y => x.total_cmp(&y),
        _ => a.id.cmp(&b.id),
    }
}

fn ieee_remainder(x: f64, y: f64) -> f64 {
    x - y * (x / y).round_ties_even()
}

fn to_base36(mut value: u64) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if value == 0 {
        return "0".to_string();
    }
    let mut digits = Vec::new();
    while value > 0 {
        digits.push(char::from(DIGITS[(value % 36) as usize]));
        value /= 36;
    }
    digits.iter().rev().collect()
}

// =============================================================================
// TESTS
// =============================================================================
