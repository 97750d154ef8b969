//! # Change Tracking
//!
//! Attribute-level records of what happened to anchors, annotations and the
//! graph since the last commit.
//!
//! Two pieces cooperate:
//! - [`ChangeState`] lives on every entity. It knows whether the entity is
//!   being created or destroyed and remembers the *original* value of every
//!   tracked attribute that has changed. It is what `commit`, `rollback` and
//!   `Graph::get_changes` work from.
//! - [`ChangeTracker`] is the optional per-graph recorder switched on with
//!   `Graph::track_changes`. It keeps a compact log of [`Change`] records in
//!   the order they happened, one record per (entity, attribute).

use crate::types::{AnchorId, AnnotationId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// =============================================================================
// OPERATIONS & ATTRIBUTES
// =============================================================================

/// Lifecycle state of a tracked entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Operation {
    NoChange,
    Create,
    Update,
    Destroy,
}

/// Tracked attributes, in declared order.
///
/// Anchors track `Offset` only. Annotations track the other five, and their
/// updates are always reported in this order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TrackedAttribute {
    Offset,
    Label,
    StartId,
    EndId,
    ParentId,
    Ordinal,
}

impl TrackedAttribute {
    /// Tracked attributes of an anchor.
    pub const ANCHOR: [Self; 1] = [Self::Offset];

    /// Tracked attributes of an annotation.
    pub const ANNOTATION: [Self; 5] = [
        Self::Label,
        Self::StartId,
        Self::EndId,
        Self::ParentId,
        Self::Ordinal,
    ];

    /// Name used in the interchange form.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Offset => "offset",
            Self::Label => "label",
            Self::StartId => "startId",
            Self::EndId => "endId",
            Self::ParentId => "parentId",
            Self::Ordinal => "ordinal",
        }
    }
}

impl fmt::Display for TrackedAttribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Value of a tracked attribute.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub enum TrackedValue {
    /// Unset: no offset, no anchor, no parent, or ordinal 0.
    #[default]
    Null,
    Number(f64),
    Integer(i32),
    Text(String),
}

impl TrackedValue {
    /// True if the value is unset.
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// The value as an offset, if it is numeric.
    #[must_use]
    pub const fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// The value as an ordinal; unset reads as 0.
    #[must_use]
    pub const fn as_integer(&self) -> i32 {
        match self {
            Self::Integer(n) => *n,
            _ => 0,
        }
    }

    /// The value as text, if it is textual.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl From<Option<f64>> for TrackedValue {
    fn from(value: Option<f64>) -> Self {
        value.map_or(Self::Null, Self::Number)
    }
}

impl From<i32> for TrackedValue {
    fn from(value: i32) -> Self {
        if value == 0 {
            Self::Null
        } else {
            Self::Integer(value)
        }
    }
}

impl From<Option<&str>> for TrackedValue {
    fn from(value: Option<&str>) -> Self {
        value.map_or(Self::Null, |s| Self::Text(s.to_string()))
    }
}

impl fmt::Display for TrackedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Number(n) => write!(f, "{n}"),
            Self::Integer(n) => write!(f, "{n}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

// =============================================================================
// CHANGE RECORDS
// =============================================================================

/// The entity a change refers to.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EntityRef {
    Graph(AnnotationId),
    Anchor(AnchorId),
    Annotation(AnnotationId),
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Graph(id) => write!(f, "graph {id}"),
            Self::Anchor(id) => write!(f, "anchor {id}"),
            Self::Annotation(id) => write!(f, "annotation {id}"),
        }
    }
}

/// An immutable record of one change.
///
/// Create and Destroy records have no attribute. Update records carry the
/// attribute together with its value before and after.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Change {
    pub operation: Operation,
    pub entity: EntityRef,
    pub attribute: Option<TrackedAttribute>,
    pub old_value: TrackedValue,
    pub new_value: TrackedValue,
}

impl Change {
    #[must_use]
    pub const fn create(entity: EntityRef) -> Self {
        Self {
            operation: Operation::Create,
            entity,
            attribute: None,
            old_value: TrackedValue::Null,
            new_value: TrackedValue::Null,
        }
    }

    #[must_use]
    pub const fn destroy(entity: EntityRef) -> Self {
        Self {
            operation: Operation::Destroy,
            entity,
            attribute: None,
            old_value: TrackedValue::Null,
            new_value: TrackedValue::Null,
        }
    }

    #[must_use]
    pub const fn update(
        entity: EntityRef,
        attribute: TrackedAttribute,
        old_value: TrackedValue,
        new_value: TrackedValue,
    ) -> Self {
        Self {
            operation: Operation::Update,
            entity,
            attribute: Some(attribute),
            old_value,
            new_value,
        }
    }
}

impl fmt::Display for Change {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.attribute {
            Some(attribute) => write!(
                f,
                "{:?} {} {}: {} -> {}",
                self.operation, self.entity, attribute, self.old_value, self.new_value
            ),
            None => write!(f, "{:?} {}", self.operation, self.entity),
        }
    }
}

// =============================================================================
// PER-ENTITY STATE
// =============================================================================

/// Change state carried by each anchor and annotation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeState {
    created: bool,
    destroyed: bool,
    originals: BTreeMap<TrackedAttribute, TrackedValue>,
}

impl ChangeState {
    /// Current lifecycle operation: Destroy wins over Create, Create over Update.
    #[must_use]
    pub fn operation(&self) -> Operation {
        if self.destroyed {
            Operation::Destroy
        } else if self.created {
            Operation::Create
        } else if !self.originals.is_empty() {
            Operation::Update
        } else {
            Operation::NoChange
        }
    }

    /// True once the entity has been marked for creation.
    #[must_use]
    pub const fn is_created(&self) -> bool {
        self.created
    }

    /// True once the entity has been marked for destruction.
    #[must_use]
    pub const fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    /// Value the attribute had at the last commit, if it has changed since.
    #[must_use]
    pub fn original(&self, attribute: TrackedAttribute) -> Option<&TrackedValue> {
        self.originals.get(&attribute)
    }

    pub(crate) fn mark_created(&mut self) {
        self.created = true;
    }

    pub(crate) fn mark_destroyed(&mut self) {
        self.destroyed = true;
    }

    /// Note that `attribute` is changing from `old` to `new`.
    ///
    /// An unset value is a valid original, except for the ordinal: giving an
    /// annotation its first ordinal is not a change. Once an original is
    /// remembered it is kept until commit or rollback, unless the value
    /// returns to it.
    pub(crate) fn record(
        &mut self,
        attribute: TrackedAttribute,
        old: &TrackedValue,
        new: &TrackedValue,
    ) {
        match self.originals.get(&attribute) {
            Some(original) if original == new => {
                self.originals.remove(&attribute);
            }
            Some(_) => {}
            None => {
                let first_ordinal = attribute == TrackedAttribute::Ordinal && old.is_null();
                if !first_ordinal && old != new {
                    self.originals.insert(attribute, old.clone());
                }
            }
        }
    }

    /// Forget everything: the current values become the originals.
    pub(crate) fn commit(&mut self) {
        self.created = false;
        self.destroyed = false;
        self.originals.clear();
    }

    /// Drop the destroy mark and hand back the originals to restore.
    pub(crate) fn rollback(&mut self) -> BTreeMap<TrackedAttribute, TrackedValue> {
        self.destroyed = false;
        std::mem::take(&mut self.originals)
    }

    /// Change records for this entity.
    ///
    /// `current` supplies the present value of each attribute in `attributes`.
    pub(crate) fn changes(
        &self,
        entity: &EntityRef,
        attributes: &[TrackedAttribute],
        current: impl Fn(TrackedAttribute) -> TrackedValue,
    ) -> Vec<Change> {
        let mut changes = Vec::new();
        match self.operation() {
            Operation::Destroy => {
                // destroying something never committed cancels out
                if !self.created {
                    changes.push(Change::destroy(entity.clone()));
                }
            }
            Operation::Create => {
                changes.push(Change::create(entity.clone()));
                for &attribute in attributes {
                    let value = current(attribute);
                    if !value.is_null() {
                        changes.push(Change::update(
                            entity.clone(),
                            attribute,
                            TrackedValue::Null,
                            value,
                        ));
                    }
                }
            }
            Operation::Update => {
                for &attribute in attributes {
                    if let Some(original) = self.originals.get(&attribute) {
                        changes.push(Change::update(
                            entity.clone(),
                            attribute,
                            original.clone(),
                            current(attribute),
                        ));
                    }
                }
            }
            Operation::NoChange => {}
        }
        changes
    }
}

// =============================================================================
// PER-GRAPH RECORDER
// =============================================================================

/// Compact, ordered log of changes made to one graph.
///
/// Successive updates of the same attribute collapse into one record holding
/// the earliest old value and the latest new value. Destroying an entity
/// created since the last reset removes every record about it.
#[derive(Debug, Clone, Default)]
pub struct ChangeTracker {
    log: Vec<Change>,
}

impl ChangeTracker {
    /// Create an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a change, merging it with earlier records where possible.
    pub fn record(&mut self, change: Change) {
        match change.operation {
            Operation::Update => {
                let existing = self.log.iter().position(|c| {
                    c.operation == Operation::Update
                        && c.entity == change.entity
                        && c.attribute == change.attribute
                });
                match existing {
                    Some(index) => {
                        if self.log[index].old_value == change.new_value {
                            self.log.remove(index);
                        } else {
                            self.log[index].new_value = change.new_value;
                        }
                    }
                    None => {
                        if change.old_value != change.new_value {
                            self.log.push(change);
                        }
                    }
                }
            }
            Operation::Destroy => {
                let created = self
                    .log
                    .iter()
                    .any(|c| c.operation == Operation::Create && c.entity == change.entity);
                self.log.retain(|c| c.entity != change.entity);
                if !created {
                    self.log.push(change);
                }
            }
            Operation::Create => self.log.push(change),
            Operation::NoChange => {}
        }
    }

    /// Recorded changes, oldest first.
    #[must_use]
    pub fn changes(&self) -> &[Change] {
        &self.log
    }

    /// Recorded changes for one entity, oldest first.
    #[must_use]
    pub fn changes_for(&self, entity: &EntityRef) -> Vec<&Change> {
        self.log.iter().filter(|c| &c.entity == entity).collect()
    }

    /// True if anything has been recorded since the last reset.
    #[must_use]
    pub fn has_changes(&self) -> bool {
        !self.log.is_empty()
    }

    /// Number of recorded changes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.log.len()
    }

    /// True if nothing has been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.log.is_empty()
    }

    /// Forget everything recorded so far.
    pub fn reset(&mut self) {
        self.log.clear();
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn word(id: &str) -> EntityRef {
        EntityRef::Annotation(AnnotationId::from(id))
    }

    #[test]
    fn first_ordinal_is_not_an_update() {
        let mut state = ChangeState::default();
        state.record(
            TrackedAttribute::Ordinal,
            &TrackedValue::Null,
            &TrackedValue::Integer(1),
        );
        assert_eq!(state.operation(), Operation::NoChange);
    }

    #[test]
    fn unset_value_is_an_original() {
        let mut state = ChangeState::default();
        state.record(
            TrackedAttribute::Offset,
            &TrackedValue::Null,
            &TrackedValue::Number(1.5),
        );
        assert_eq!(state.operation(), Operation::Update);
        assert_eq!(
            state.original(TrackedAttribute::Offset),
            Some(&TrackedValue::Null)
        );

        state.record(
            TrackedAttribute::Offset,
            &TrackedValue::Number(1.5),
            &TrackedValue::Null,
        );
        assert_eq!(state.operation(), Operation::NoChange);
    }

    #[test]
    fn update_keeps_the_earliest_original() {
        let mut state = ChangeState::default();
        let a = TrackedValue::Text("a".into());
        let b = TrackedValue::Text("b".into());
        let c = TrackedValue::Text("c".into());
        state.record(TrackedAttribute::Label, &a, &b);
        state.record(TrackedAttribute::Label, &b, &c);

        assert_eq!(state.operation(), Operation::Update);
        assert_eq!(state.original(TrackedAttribute::Label), Some(&a));

        // back to where it started
        state.record(TrackedAttribute::Label, &c, &a);
        assert_eq!(state.operation(), Operation::NoChange);
    }

    #[test]
    fn created_then_destroyed_reports_nothing() {
        let mut state = ChangeState::default();
        state.mark_created();
        state.mark_destroyed();
        let changes = state.changes(&word("w1"), &TrackedAttribute::ANNOTATION, |_| {
            TrackedValue::Null
        });
        assert!(changes.is_empty());
    }

    #[test]
    fn create_reports_non_null_attributes_in_order() {
        let mut state = ChangeState::default();
        state.mark_created();
        let changes = state.changes(&word("w1"), &TrackedAttribute::ANNOTATION, |a| match a {
            TrackedAttribute::Label => TrackedValue::Text("hello".into()),
            TrackedAttribute::Ordinal => TrackedValue::Integer(2),
            _ => TrackedValue::Null,
        });
        let attributes: Vec<_> = changes.iter().map(|c| c.attribute).collect();
        assert_eq!(
            attributes,
            vec![
                None,
                Some(TrackedAttribute::Label),
                Some(TrackedAttribute::Ordinal)
            ]
        );
        assert_eq!(changes[0].operation, Operation::Create);
    }

    #[test]
    fn rollback_returns_originals() {
        let mut state = ChangeState::default();
        state.record(
            TrackedAttribute::Offset,
            &TrackedValue::Number(1.0),
            &TrackedValue::Number(2.0),
        );
        state.mark_destroyed();
        let originals = state.rollback();
        assert_eq!(
            originals.get(&TrackedAttribute::Offset),
            Some(&TrackedValue::Number(1.0))
        );
        assert_eq!(state.operation(), Operation::NoChange);
    }

    #[test]
    fn tracker_merges_updates() {
        let mut tracker = ChangeTracker::new();
        tracker.record(Change::update(
            word("w1"),
            TrackedAttribute::Label,
            TrackedValue::Text("a".into()),
            TrackedValue::Text("b".into()),
        ));
        tracker.record(Change::update(
            word("w1"),
            TrackedAttribute::Label,
            TrackedValue::Text("b".into()),
            TrackedValue::Text("c".into()),
        ));
        assert_eq!(tracker.len(), 1);
        assert_eq!(tracker.changes()[0].old_value, TrackedValue::Text("a".into()));
        assert_eq!(tracker.changes()[0].new_value, TrackedValue::Text("c".into()));

        tracker.record(Change::update(
            word("w1"),
            TrackedAttribute::Label,
            TrackedValue::Text("c".into()),
            TrackedValue::Text("a".into()),
        ));
        assert!(tracker.is_empty());
    }

    #[test]
    fn tracker_destroy_cancels_create() {
        let mut tracker = ChangeTracker::new();
        tracker.record(Change::create(word("w2")));
        tracker.record(Change::update(
            word("w2"),
            TrackedAttribute::Label,
            TrackedValue::Null,
            TrackedValue::Text("x".into()),
        ));
        tracker.record(Change::destroy(word("w2")));
        assert!(!tracker.has_changes());

        tracker.record(Change::destroy(word("w3")));
        assert_eq!(tracker.changes_for(&word("w3")).len(), 1);
        tracker.reset();
        assert!(tracker.is_empty());
    }
}
