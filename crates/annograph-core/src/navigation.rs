//! # Navigation
//!
//! Relationship queries between annotations: the hierarchy (`first`, `all`,
//! ancestors, siblings, descendants) and interval algebra over anchors
//! (`includes`, `distance`, ...).
//!
//! Every query is answered by the graph from ids, and every miss is an
//! absent value or an empty list. Destroyed annotations are never returned.
//!
//! Cross-layer questions are answered with the schema: "the turn containing
//! this word" walks up the ownership tree, "the words of this turn" walks
//! down it, and "the phrases overlapping this word" goes through the
//! nearest common ancestor and filters by interval inclusion.

use crate::annotation::Annotation;
use crate::graph::{Graph, Side, compare_siblings};
use crate::layer::Layer;
use crate::types::{AnnotationId, LayerId};
use std::cmp::Ordering;
use std::collections::BTreeSet;

impl Graph {
    // =========================================================================
    // HIERARCHY
    // =========================================================================

    /// Live annotations on `layer` in tree order under the graph, followed by
    /// live orphans on that layer.
    #[must_use]
    pub fn list(&self, layer: &LayerId) -> Vec<&Annotation> {
        let mut list = self.all(&self.id, layer);
        let seen: BTreeSet<&AnnotationId> = list.iter().map(|a| &a.id).collect();
        let orphans: Vec<&Annotation> = self
            .layer_annotations(layer)
            .into_iter()
            .filter(|a| !a.is_destroyed() && !seen.contains(&a.id))
            .collect();
        list.extend(orphans);
        list
    }

    /// Labels of [`Graph::list`].
    #[must_use]
    pub fn labels(&self, layer: &LayerId) -> Vec<String> {
        self.list(layer)
            .into_iter()
            .map(|a| a.label.clone())
            .collect()
    }

    /// The first annotation on `layer` related to `id`.
    ///
    /// - Own layer: the annotation itself.
    /// - Ancestor layer: the ancestor on that layer.
    /// - Descendant layer: the earliest descendant on that layer.
    /// - Anything else: the first related annotation found through the
    ///   common ancestor, by interval inclusion.
    #[must_use]
    pub fn first(&self, id: &AnnotationId, layer: &LayerId) -> Option<&Annotation> {
        let own = self.layer_id_of(id)?;
        if own == layer {
            return self.live(id);
        }
        let target = self.schema.layer(layer)?;
        if self.schema.layer(own).is_none() {
            return self.all(id, layer).into_iter().next();
        }
        if target.id == *self.schema.root_id() {
            return None;
        }
        if self.schema.is_ancestor(layer, own) {
            return self.ancestor(id, layer);
        }
        if self.schema.is_ancestor(own, layer) {
            return self.descendants_on(id, layer).into_iter().next();
        }
        let common = self.schema.first_common_ancestor(own, layer)?;
        if common == *self.schema.root_id() {
            return self
                .including_annotations_on(id, layer)
                .into_iter()
                .next()
                .or_else(|| self.included_annotations_on(id, layer).into_iter().next());
        }
        self.all(id, layer).into_iter().next()
    }

    /// The last annotation on `layer` related to `id`.
    #[must_use]
    pub fn last(&self, id: &AnnotationId, layer: &LayerId) -> Option<&Annotation> {
        self.all(id, layer).into_iter().last()
    }

    /// All annotations on `layer` related to `id`, in order.
    ///
    /// Descendants come in temporal order of their highest aligned
    /// ancestor below the starting point, then tree order. Cousins are the
    /// descendants of the common ancestor that include, or are included by,
    /// the annotation.
    #[must_use]
    pub fn all(&self, id: &AnnotationId, layer: &LayerId) -> Vec<&Annotation> {
        let Some(own) = self.layer_id_of(id) else {
            return Vec::new();
        };
        if own == layer {
            return self.live(id).into_iter().collect();
        }
        if self.schema.layer(layer).is_none() {
            return Vec::new();
        }
        if self.schema.layer(own).is_none() {
            // only direct relations resolve without a layer definition
            if let Some(parent) = self.parent_id_of(id).and_then(|p| self.live(p)) {
                if parent.layer_id == *layer {
                    return vec![parent];
                }
            }
            return self.live_children(id, layer);
        }
        if self.schema.is_child_layer(own, layer) {
            return self.live_children(id, layer);
        }
        if self.schema.is_ancestor(own, layer) {
            return self.descendants_on(id, layer);
        }
        if self.schema.is_ancestor(layer, own) {
            return self.ancestor(id, layer).into_iter().collect();
        }
        let Some(common_layer) = self.schema.first_common_ancestor(own, layer) else {
            return Vec::new();
        };
        let common = if common_layer == *self.schema.root_id() {
            Some(self.id.clone())
        } else {
            self.ancestor(id, &common_layer).map(|a| a.id.clone())
        };
        let Some(common) = common else {
            return Vec::new();
        };
        let Some(this) = self.annotation(id) else {
            return Vec::new();
        };
        self.descendants_on(&common, layer)
            .into_iter()
            .filter(|other| self.includes(other, this) || self.includes(this, other))
            .collect()
    }

    /// Live children of `id` on `layer`, in ordinal order.
    #[must_use]
    pub fn live_children(&self, id: &AnnotationId, layer: &LayerId) -> Vec<&Annotation> {
        self.children(id, layer)
            .into_iter()
            .filter(|a| !a.is_destroyed())
            .collect()
    }

    /// Descendants of `id` on a descendant layer of its own.
    fn descendants_on(&self, id: &AnnotationId, layer: &LayerId) -> Vec<&Annotation> {
        let Some(own) = self.layer_id_of(id) else {
            return Vec::new();
        };
        let mut path: Vec<LayerId> = self
            .schema
            .ancestors(layer)
            .into_iter()
            .take_while(|l| l != own)
            .collect();
        path.reverse();
        path.push(layer.clone());

        let root = self.schema.root_id();
        let highest_aligned = path.iter().position(|l| {
            l != root && self.schema.layer(l).is_some_and(Layer::is_aligned)
        });

        let mut level: Vec<&AnnotationId> = vec![id];
        let mut current: Vec<&Annotation> = Vec::new();
        for (depth, step) in path.iter().enumerate() {
            current = level
                .iter()
                .flat_map(|parent| self.live_children(parent, step))
                .collect();
            if Some(depth) == highest_aligned {
                current.sort_by(|a, b| self.compare_by_anchor(a, b));
            }
            level = current.iter().map(|a| &a.id).collect();
        }
        current
    }

    /// Temporal order of annotations.
    ///
    /// Earlier start first; at the same start, instantaneous before
    /// spanning and longer spans before shorter ones; an annotation ending
    /// where the other starts comes first; then layer, ordinal and id.
    #[must_use]
    pub fn compare_by_anchor(&self, a: &Annotation, b: &Annotation) -> Ordering {
        let start = |x: &Annotation| x.start_id.as_ref().and_then(|s| self.offset_min(s));
        let end = |x: &Annotation| x.end_id.as_ref().and_then(|e| self.offset_max(e));
        compare_optional(start(a), start(b))
            .then_with(|| b.is_instantaneous().cmp(&a.is_instantaneous()))
            .then_with(|| compare_optional(end(b), end(a)))
            .then_with(|| {
                if a.end_id.is_some() && a.end_id == b.start_id {
                    Ordering::Less
                } else if b.end_id.is_some() && b.end_id == a.start_id {
                    Ordering::Greater
                } else {
                    Ordering::Equal
                }
            })
            .then_with(|| a.layer_id.cmp(&b.layer_id))
            .then_with(|| {
                if a.parent_id == b.parent_id {
                    compare_siblings(a, b)
                } else {
                    Ordering::Equal
                }
            })
            .then_with(|| a.id.cmp(&b.id))
    }

    /// Ancestors of `id`, nearest first. The graph itself is not included.
    #[must_use]
    pub fn ancestors(&self, id: &AnnotationId) -> Vec<&Annotation> {
        let mut ancestors = Vec::new();
        let mut seen = BTreeSet::new();
        let mut current = self.parent_id_of(id);
        while let Some(parent) = current {
            if !seen.insert(parent) {
                break;
            }
            let Some(annotation) = self.annotation(parent) else {
                break;
            };
            ancestors.push(annotation);
            current = annotation.parent_id.as_ref();
        }
        ancestors
    }

    /// The ancestor of `id` on `layer`.
    #[must_use]
    pub fn ancestor(&self, id: &AnnotationId, layer: &LayerId) -> Option<&Annotation> {
        self.ancestors(id)
            .into_iter()
            .find(|a| a.layer_id == *layer)
            .filter(|a| !a.is_destroyed())
    }

    /// The nearest annotation that is `a` or an ancestor of `a`, and also
    /// `b` or an ancestor of `b`. May be the graph id.
    #[must_use]
    pub fn first_common_ancestor(&self, a: &AnnotationId, b: &AnnotationId) -> Option<AnnotationId> {
        let mut ours: BTreeSet<&AnnotationId> = BTreeSet::new();
        let mut current = Some(a);
        while let Some(id) = current {
            if !ours.insert(id) {
                break;
            }
            current = self.parent_id_of(id);
        }
        let mut seen = BTreeSet::new();
        let mut current = Some(b);
        while let Some(id) = current {
            if ours.contains(id) {
                return Some(id.clone());
            }
            if !seen.insert(id) {
                break;
            }
            current = self.parent_id_of(id);
        }
        None
    }

    /// The live sibling before `id` (same parent, same layer).
    #[must_use]
    pub fn previous(&self, id: &AnnotationId) -> Option<&Annotation> {
        self.sibling(id, -1)
    }

    /// The live sibling after `id` (same parent, same layer).
    #[must_use]
    pub fn next(&self, id: &AnnotationId) -> Option<&Annotation> {
        self.sibling(id, 1)
    }

    fn sibling(&self, id: &AnnotationId, step: isize) -> Option<&Annotation> {
        let annotation = self.annotation(id)?;
        let parent = annotation.parent_id.as_ref()?;
        let siblings = self.live_children(parent, &annotation.layer_id);
        let position = siblings.iter().position(|s| s.id == *id)?;
        let wanted = position.checked_add_signed(step)?;
        siblings.get(wanted).copied()
    }

    /// Descendant (on aligned child layers the parent includes) with the
    /// earliest start, or the annotation itself.
    #[must_use]
    pub fn earliest_descendant(&self, id: &AnnotationId) -> Option<&Annotation> {
        self.extreme_descendant(id, Side::Start)
    }

    /// Descendant (on aligned child layers the parent includes) with the
    /// latest end, or the annotation itself.
    #[must_use]
    pub fn latest_descendant(&self, id: &AnnotationId) -> Option<&Annotation> {
        self.extreme_descendant(id, Side::End)
    }

    fn extreme_descendant(&self, id: &AnnotationId, side: Side) -> Option<&Annotation> {
        let mut best = self.annotation(id)?;
        let mut best_offset = self.annotation_offset(best, side);
        let layer = best.layer_id.clone();
        let child_layers: Vec<LayerId> = self
            .schema
            .children_of(&layer)
            .into_iter()
            .filter(|l| {
                self.schema
                    .layer(l)
                    .is_some_and(|l| l.is_aligned() && l.parent_includes)
            })
            .collect();
        for child_layer in &child_layers {
            for child in self.live_children(id, child_layer) {
                let Some(candidate) = self.extreme_descendant(&child.id, side) else {
                    continue;
                };
                let offset = self.annotation_offset(candidate, side);
                let better = match (offset, best_offset) {
                    (Some(o), Some(b)) => match side {
                        Side::Start => o < b,
                        Side::End => o > b,
                    },
                    (Some(_), None) => true,
                    _ => false,
                };
                if better {
                    best = candidate;
                    best_offset = offset;
                }
            }
        }
        Some(best)
    }

    fn live(&self, id: &AnnotationId) -> Option<&Annotation> {
        self.annotation(id).filter(|a| !a.is_destroyed())
    }

    // =========================================================================
    // INTERVALS
    // =========================================================================

    /// Offset of the start anchor.
    #[must_use]
    pub fn start_offset(&self, annotation: &Annotation) -> Option<f64> {
        self.annotation_offset(annotation, Side::Start)
    }

    /// Offset of the end anchor.
    #[must_use]
    pub fn end_offset(&self, annotation: &Annotation) -> Option<f64> {
        self.annotation_offset(annotation, Side::End)
    }

    /// True if both anchors have offsets.
    #[must_use]
    pub fn anchored(&self, annotation: &Annotation) -> bool {
        self.start_offset(annotation).is_some() && self.end_offset(annotation).is_some()
    }

    #[must_use]
    pub fn duration(&self, annotation: &Annotation) -> Option<f64> {
        Some(self.end_offset(annotation)? - self.start_offset(annotation)?)
    }

    #[must_use]
    pub fn midpoint(&self, annotation: &Annotation) -> Option<f64> {
        let start = self.start_offset(annotation)?;
        Some(start + self.duration(annotation)? / 2.0)
    }

    /// True if `start <= offset < end`.
    #[must_use]
    pub fn includes_offset(&self, annotation: &Annotation, offset: f64) -> bool {
        match (self.start_offset(annotation), self.end_offset(annotation)) {
            (Some(start), Some(end)) => start <= offset && offset < end,
            _ => false,
        }
    }

    /// True if `other` lies within `annotation`.
    ///
    /// Uses the lowest possible start and highest possible end of `other`,
    /// and allows `other` to end exactly where `annotation` ends.
    #[must_use]
    pub fn includes(&self, annotation: &Annotation, other: &Annotation) -> bool {
        let Some(end) = self.end_offset(annotation) else {
            return false;
        };
        let other_start = other.start_id.as_ref().and_then(|s| self.offset_min(s));
        let other_end = other.end_id.as_ref().and_then(|e| self.offset_max(e));
        let (Some(other_start), Some(other_end)) = (other_start, other_end) else {
            return false;
        };
        self.includes_offset(annotation, other_start)
            && (self.includes_offset(annotation, other_end) || end == other_end)
    }

    /// True if the midpoint of `other` lies within `annotation`, or they
    /// share both anchors.
    #[must_use]
    pub fn includes_midpoint_of(&self, annotation: &Annotation, other: &Annotation) -> bool {
        annotation.tags(other)
            || self
                .midpoint(other)
                .is_some_and(|m| self.includes_offset(annotation, m))
    }

    /// Gap between two annotations; negative when they overlap.
    ///
    /// When one includes the other, the distance is minus the duration of
    /// the included one.
    #[must_use]
    pub fn distance(&self, annotation: &Annotation, other: &Annotation) -> Option<f64> {
        let (start, end) = (self.start_offset(annotation)?, self.end_offset(annotation)?);
        let (other_start, other_end) = (self.start_offset(other)?, self.end_offset(other)?);
        if self.includes(annotation, other) {
            return Some(-(other_end - other_start));
        }
        if self.includes(other, annotation) {
            return Some(-(end - start));
        }
        let gap = (start - other_end).abs().min((end - other_start).abs());
        Some(if overlaps(start, end, other_start, other_end) {
            -gap
        } else {
            gap
        })
    }

    /// Largest difference between corresponding anchors; negative when the
    /// annotations overlap.
    #[must_use]
    pub fn max_paired_distance(&self, annotation: &Annotation, other: &Annotation) -> Option<f64> {
        let (start, end) = (self.start_offset(annotation)?, self.end_offset(annotation)?);
        let (other_start, other_end) = (self.start_offset(other)?, self.end_offset(other)?);
        let distance = (start - other_start).abs().max((end - other_end).abs());
        Some(if overlaps(start, end, other_start, other_end) {
            -distance
        } else {
            distance
        })
    }

    /// Live annotations on `layer` sharing both anchors with `annotation`.
    #[must_use]
    pub fn tags_on(&self, annotation: &Annotation, layer: &LayerId) -> Vec<&Annotation> {
        let Some(start) = &annotation.start_id else {
            return Vec::new();
        };
        self.start_of(start, layer)
            .into_iter()
            .filter(|a| a.id != annotation.id && !a.is_destroyed())
            .filter(|a| a.end_id == annotation.end_id)
            .collect()
    }

    /// Live annotations on `layer` that include `annotation`.
    #[must_use]
    pub fn including_annotations_on(&self, id: &AnnotationId, layer: &LayerId) -> Vec<&Annotation> {
        let Some(this) = self.annotation(id).filter(|a| self.anchored(a)) else {
            return Vec::new();
        };
        self.layer_annotations(layer)
            .into_iter()
            .filter(|a| a.id != *id && !a.is_destroyed())
            .filter(|a| self.includes(a, this))
            .collect()
    }

    /// Live annotations on `layer` included by `annotation`.
    #[must_use]
    pub fn included_annotations_on(&self, id: &AnnotationId, layer: &LayerId) -> Vec<&Annotation> {
        let Some(this) = self.annotation(id).filter(|a| self.anchored(a)) else {
            return Vec::new();
        };
        self.layer_annotations(layer)
            .into_iter()
            .filter(|a| a.id != *id && !a.is_destroyed())
            .filter(|a| self.includes(this, a))
            .collect()
    }

    /// Live annotations on `layer` that include the midpoint of `annotation`.
    #[must_use]
    pub fn midpoint_including_annotations_on(
        &self,
        id: &AnnotationId,
        layer: &LayerId,
    ) -> Vec<&Annotation> {
        let Some(midpoint) = self.annotation(id).and_then(|a| self.midpoint(a)) else {
            return Vec::new();
        };
        self.list_near(layer, midpoint)
            .into_iter()
            .filter(|a| a.id != *id)
            .filter(|a| self.includes_offset(a, midpoint))
            .collect()
    }

    /// Live annotations on `layer` overlapping `[start, end)`, in temporal
    /// order.
    #[must_use]
    pub fn overlapping_annotations(&self, layer: &LayerId, start: f64, end: f64) -> Vec<&Annotation> {
        let mut overlapping: Vec<&Annotation> = self
            .layer_annotations(layer)
            .into_iter()
            .filter(|a| !a.is_destroyed())
            .filter(|a| {
                let from = a.start_id.as_ref().and_then(|s| self.offset_min(s));
                let to = a.end_id.as_ref().and_then(|e| self.offset_max(e));
                match (from, to) {
                    (Some(from), Some(to)) => from < end && to > start,
                    _ => false,
                }
            })
            .collect();
        overlapping.sort_by(|a, b| self.compare_by_anchor(a, b));
        overlapping
    }
}

fn overlaps(start: f64, end: f64, other_start: f64, other_end: f64) -> bool {
    start < other_end && other_start < end
}

fn compare_optional(a: Option<f64>, b: Option<f64>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.total_cmp(&b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

#[cfg(test)]
mod tests {
    use crate::anchor::Anchor;
    use crate::annotation::Annotation;
    use crate::graph::Graph;
    use crate::layer::Layer;
    use crate::types::{Alignment, AnnotationId};

    /// who > turn > word > pos, plus phrase under turn.
    ///
    /// p1 speaks t1 (0-3): w1 "the" (0-1), w2 "cat" (1-2), w3 "sat" (2-3).
    /// phrase ph1 covers w1..w2.
    fn transcript() -> Graph {
        let mut graph = Graph::new("g1");
        graph.add_layer(Layer::new("who", "Participants")).expect("who");
        graph.schema_mut().set_participant_layer_id(Some("who".into()));
        graph
            .add_layer(
                Layer::new("turn", "Turns")
                    .with_parent("who")
                    .with_alignment(Alignment::Interval),
            )
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
        for (id, offset) in [("a0", 0.0), ("a1", 1.0), ("a2", 2.0), ("a3", 3.0)] {
            graph.add_anchor(Anchor::new(id, Some(offset))).expect("anchor");
        }
        graph
            .add_annotation(Annotation::new("who", "alice").with_id("p1"))
            .expect("p1");
        graph
            .add_annotation(
                Annotation::new("turn", "t")
                    .with_id("t1")
                    .with_anchors("a0", "a3")
                    .with_parent("p1"),
            )
            .expect("t1");
        for (id, label, start, end) in [
            ("w1", "the", "a0", "a1"),
            ("w2", "cat", "a1", "a2"),
            ("w3", "sat", "a2", "a3"),
        ] {
            graph
                .add_annotation(
                    Annotation::new("word", label)
                        .with_id(id)
                        .with_anchors(start, end)
                        .with_parent("t1"),
                )
                .expect("word");
        }
        graph
            .add_annotation(
                Annotation::new("phrase", "NP")
                    .with_id("ph1")
                    .with_anchors("a0", "a2")
                    .with_parent("t1"),
            )
            .expect("phrase");
        graph
            .add_annotation(Annotation::new("pos", "N").with_id("pos2").with_parent("w2"))
            .expect("pos");
        graph
    }

    fn ids(annotations: Vec<&Annotation>) -> Vec<String> {
        annotations
            .into_iter()
            .map(|a| a.id().as_str().to_string())
            .collect()
    }

    #[test]
    fn first_walks_up_and_down() {
        let graph = transcript();
        let w2: AnnotationId = "w2".into();
        assert_eq!(
            graph.first(&w2, &"turn".into()).map(|a| a.id().as_str()),
            Some("t1")
        );
        assert_eq!(
            graph.first(&w2, &"who".into()).map(|a| a.id().as_str()),
            Some("p1")
        );
        assert_eq!(
            graph.first(&"t1".into(), &"word".into()).map(|a| a.id().as_str()),
            Some("w1")
        );
        assert_eq!(
            graph.first(&"p1".into(), &"pos".into()).map(|a| a.id().as_str()),
            Some("pos2")
        );
        assert!(graph.first(&w2, &"nonexistent".into()).is_none());
    }

    #[test]
    fn all_words_of_a_participant_in_time_order() {
        let graph = transcript();
        assert_eq!(
            ids(graph.all(&"p1".into(), &"word".into())),
            vec!["w1", "w2", "w3"]
        );
        assert_eq!(graph.labels(&"word".into()), vec!["the", "cat", "sat"]);
    }

    #[test]
    fn cousins_are_related_by_inclusion() {
        let graph = transcript();
        assert_eq!(
            ids(graph.all(&"ph1".into(), &"word".into())),
            vec!["w1", "w2"]
        );
        assert_eq!(ids(graph.all(&"w3".into(), &"phrase".into())), Vec::<String>::new());
        assert_eq!(
            graph.first(&"w1".into(), &"phrase".into()).map(|a| a.id().as_str()),
            Some("ph1")
        );
    }

    #[test]
    fn siblings_and_descendants() {
        let mut graph = transcript();
        assert_eq!(graph.next(&"w1".into()).map(|a| a.id().as_str()), Some("w2"));
        assert_eq!(graph.previous(&"w1".into()).map(|a| a.id().as_str()), None);

        graph.destroy_annotation(&"w2".into()).expect("destroy");
        assert_eq!(graph.next(&"w1".into()).map(|a| a.id().as_str()), Some("w3"));
        assert_eq!(
            graph.latest_descendant(&"t1".into()).map(|a| a.id().as_str()),
            Some("t1")
        );
        assert_eq!(
            graph
                .earliest_descendant(&"p1".into())
                .map(|a| a.id().as_str()),
            Some("t1")
        );
    }

    #[test]
    fn common_ancestors() {
        let graph = transcript();
        assert_eq!(
            graph.first_common_ancestor(&"w1".into(), &"ph1".into()),
            Some("t1".into())
        );
        assert_eq!(
            graph.first_common_ancestor(&"w1".into(), &"w1".into()),
            Some("w1".into())
        );
        assert_eq!(ids(graph.ancestors(&"pos2".into())), vec!["w2", "t1", "p1"]);
    }

    #[test]
    fn interval_predicates() {
        let graph = transcript();
        let t1 = graph.annotation(&"t1".into()).expect("t1");
        let w1 = graph.annotation(&"w1".into()).expect("w1");
        let w3 = graph.annotation(&"w3".into()).expect("w3");
        let ph1 = graph.annotation(&"ph1".into()).expect("ph1");
        assert!(graph.includes(t1, w3));
        assert!(!graph.includes(w3, t1));
        assert!(graph.includes_offset(w1, 0.0));
        assert!(!graph.includes_offset(w1, 1.0));
        assert_eq!(graph.midpoint(t1), Some(1.5));
        assert_eq!(graph.distance(w1, w3), Some(1.0));
        assert_eq!(graph.distance(t1, w1), Some(-1.0));
        assert_eq!(graph.max_paired_distance(ph1, w3), Some(2.0));
        assert!(graph.includes_midpoint_of(ph1, w1));
        assert_eq!(
            ids(graph.tags_on(graph.annotation(&"w2".into()).expect("w2"), &"pos".into())),
            vec!["pos2"]
        );
        assert_eq!(
            ids(graph.including_annotations_on(&"w1".into(), &"phrase".into())),
            vec!["ph1"]
        );
        assert_eq!(
            ids(graph.midpoint_including_annotations_on(&"w2".into(), &"turn".into())),
            vec!["t1"]
        );
        assert_eq!(
            ids(graph.overlapping_annotations(&"word".into(), 0.5, 1.5)),
            vec!["w1", "w2"]
        );
    }
}
