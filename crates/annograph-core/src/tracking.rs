//! # Change Tracking
//!
//! Graph-wide view of the per-entity change states: the ordered change
//! list a store persists, and the `commit` / `rollback` lifecycle.
//!
//! Order of [`Graph::get_changes`]:
//!
//! 1. the graph's own creation
//! 2. anchor creations and updates
//! 3. annotation creations, parents before children
//! 4. annotation updates, parents before children
//! 5. annotation destructions, children before parents
//! 6. anchor destructions
//! 7. the graph's own destruction
//!
//! Within one entity, attribute updates follow the declared attribute
//! order and carry only the original and the latest value.

use crate::change::{Change, ChangeState, EntityRef, Operation, TrackedAttribute, TrackedValue};
use crate::graph::{Graph, Visit};
use crate::types::{AnchorId, AnnotationId, GraphError};
use tracing::debug;

impl Graph {
    /// Lifecycle operation of the graph as a whole.
    ///
    /// Create or Destroy when the graph itself is marked, otherwise Update
    /// when any anchor or annotation has changed.
    #[must_use]
    pub fn change(&self) -> Operation {
        match self.change.operation() {
            Operation::NoChange if self.entities_changed() => Operation::Update,
            operation => operation,
        }
    }

    /// True if anything in the graph has uncommitted changes.
    #[must_use]
    pub fn has_changes(&self) -> bool {
        self.change() != Operation::NoChange
    }

    fn entities_changed(&self) -> bool {
        self.anchors
            .values()
            .any(|a| a.change.operation() != Operation::NoChange)
            || self
                .annotations
                .values()
                .any(|a| a.change.operation() != Operation::NoChange)
    }

    /// Every uncommitted change in the graph, in persistence order.
    #[must_use]
    pub fn get_changes(&self) -> Vec<Change> {
        let graph_operation = self.change.operation();
        let forced = match graph_operation {
            Operation::Create | Operation::Destroy => Some(graph_operation),
            _ => None,
        };
        let effective = |state: &ChangeState| -> ChangeState {
            let mut state = state.clone();
            match forced {
                Some(Operation::Create) => state.mark_created(),
                Some(Operation::Destroy) => state.mark_destroyed(),
                _ => {}
            }
            state
        };

        let mut changes = Vec::new();
        if graph_operation == Operation::Create {
            changes.push(Change::create(EntityRef::Graph(self.id.clone())));
        }

        let mut anchor_destroys = Vec::new();
        for anchor in self.anchors.values() {
            let state = effective(&anchor.change);
            let entity = EntityRef::Anchor(anchor.id.clone());
            let offset = anchor.offset;
            let anchor_changes =
                state.changes(&entity, &TrackedAttribute::ANCHOR, |_| TrackedValue::from(offset));
            if state.is_destroyed() {
                anchor_destroys.extend(anchor_changes);
            } else {
                changes.extend(anchor_changes);
            }
        }

        let mut creates = Vec::new();
        let mut updates = Vec::new();
        let mut destroys = Vec::new();
        self.walk_tree(&mut |annotation, visit| {
            let state = effective(&annotation.change);
            let entity = EntityRef::Annotation(annotation.id.clone());
            let operation = state.operation();
            let wanted = match visit {
                Visit::Pre => operation == Operation::Create || operation == Operation::Update,
                Visit::Post => operation == Operation::Destroy,
            };
            if !wanted {
                return;
            }
            let records = state.changes(&entity, &TrackedAttribute::ANNOTATION, |attribute| {
                annotation.tracked_value(attribute)
            });
            match operation {
                Operation::Create => creates.extend(records),
                Operation::Update => updates.extend(records),
                _ => destroys.extend(records),
            }
        });
        changes.extend(creates);
        changes.extend(updates);
        changes.extend(destroys);
        changes.extend(anchor_destroys);

        if graph_operation == Operation::Destroy {
            changes.push(Change::destroy(EntityRef::Graph(self.id.clone())));
        }
        changes
    }

    /// Make the current state the committed state.
    ///
    /// Destroyed annotations and anchors are removed from the graph, every
    /// change state is cleared and the change log is reset.
    pub fn commit(&mut self) {
        let doomed_annotations: Vec<AnnotationId> = self
            .annotations
            .values()
            .filter(|a| a.is_destroyed())
            .map(|a| a.id.clone())
            .collect();
        for id in &doomed_annotations {
            self.remove_annotation(id);
        }
        let doomed_anchors: Vec<AnchorId> = self
            .anchors
            .values()
            .filter(|a| a.is_destroyed())
            .map(|a| a.id.clone())
            .collect();
        for id in &doomed_anchors {
            self.remove_anchor(id);
        }
        for anchor in self.anchors.values_mut() {
            anchor.change.commit();
        }
        for annotation in self.annotations.values_mut() {
            annotation.change.commit();
        }
        self.change.commit();
        if let Some(tracker) = &mut self.tracker {
            tracker.reset();
        }
        debug!(
            graph = %self.id,
            annotations_removed = doomed_annotations.len(),
            anchors_removed = doomed_anchors.len(),
            "changes committed"
        );
    }

    /// Return to the committed state.
    ///
    /// Created annotations and anchors are removed, original attribute
    /// values are restored and destroy marks are dropped.
    pub fn rollback(&mut self) -> Result<(), GraphError> {
        let created_annotations: Vec<AnnotationId> = self
            .annotations
            .values()
            .filter(|a| a.change.is_created())
            .map(|a| a.id.clone())
            .collect();
        for id in &created_annotations {
            self.remove_annotation(id);
        }
        let created_anchors: Vec<AnchorId> = self
            .anchors
            .values()
            .filter(|a| a.change.is_created())
            .map(|a| a.id.clone())
            .collect();
        for id in &created_anchors {
            self.remove_anchor(id);
        }

        let anchor_originals: Vec<(AnchorId, Option<f64>)> = self
            .anchors
            .values_mut()
            .filter_map(|a| {
                let mut originals = a.change.rollback();
                originals
                    .remove(&TrackedAttribute::Offset)
                    .map(|o| (a.id.clone(), o.as_number()))
            })
            .collect();
        for (id, offset) in anchor_originals {
            self.set_offset(&id, offset)?;
        }

        let annotation_originals: Vec<(AnnotationId, Vec<(TrackedAttribute, TrackedValue)>)> = self
            .annotations
            .values_mut()
            .map(|a| (a.id.clone(), a.change.rollback().into_iter().collect::<Vec<_>>()))
            .filter(|(_, originals)| !originals.is_empty())
            .collect();
        for (id, originals) in &annotation_originals {
            for (attribute, value) in originals {
                self.restore(id, *attribute, value)?;
            }
        }

        for anchor in self.anchors.values_mut() {
            anchor.change.commit();
        }
        for annotation in self.annotations.values_mut() {
            annotation.change.commit();
        }
        self.change.commit();
        if let Some(tracker) = &mut self.tracker {
            tracker.reset();
        }
        debug!(
            graph = %self.id,
            annotations_removed = created_annotations.len(),
            anchors_removed = created_anchors.len(),
            annotations_restored = annotation_originals.len(),
            "changes rolled back"
        );
        Ok(())
    }

    fn restore(
        &mut self,
        id: &AnnotationId,
        attribute: TrackedAttribute,
        value: &TrackedValue,
    ) -> Result<(), GraphError> {
        match attribute {
            TrackedAttribute::Label => {
                self.set_label(id, value.as_text().unwrap_or_default().to_string())
            }
            TrackedAttribute::StartId => {
                self.set_start_id(id, value.as_text().map(AnchorId::from))
            }
            TrackedAttribute::EndId => self.set_end_id(id, value.as_text().map(AnchorId::from)),
            TrackedAttribute::ParentId => {
                self.set_parent(id, value.as_text().map(AnnotationId::from), false)
            }
            TrackedAttribute::Ordinal => {
                self.assign_ordinal(id, value.as_integer());
                Ok(())
            }
            TrackedAttribute::Offset => Ok(()),
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
