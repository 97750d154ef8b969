//! # Validation Tier Tests (T0-T3)
//!
//! If ANY tier fails, the graph engine is INVALID.
//!
//! ## Tiers
//! - T0: Identity
//! - T1: Structural Linkage
//! - T2: Navigation
//! - T3: Change Lifecycle

use annograph_core::{
    Alignment, Anchor, AnchorId, Annotation, AnnotationId, Graph, GraphError, Layer, LayerId,
};

fn layer(id: &str) -> LayerId {
    LayerId::from(id)
}

/// turn > word > pos (tag), three words over one turn.
fn transcript() -> Graph {
    let mut graph = Graph::new("g1");
    graph
        .add_layer(Layer::new("turn", "Turns").with_alignment(Alignment::Interval))
        .expect("turn");
    graph
        .add_layer(
            Layer::new("word", "Words")
                .with_parent("turn")
                .with_alignment(Alignment::Interval),
        )
        .expect("word");
    graph
        .add_layer(Layer::new("pos", "POS").with_parent("word"))
        .expect("pos");
    for (id, offset) in [("a0", 0.0), ("a1", 1.0), ("a2", 2.0), ("a3", 3.0)] {
        graph.add_anchor(Anchor::new(id, Some(offset))).expect("anchor");
    }
    graph
        .add_annotation(Annotation::new("turn", "t").with_id("t1").with_anchors("a0", "a3"))
        .expect("turn");
    for (id, label, start, end) in [
        ("w1", "the", "a0", "a1"),
        ("w2", "quick", "a1", "a2"),
        ("w3", "fox", "a2", "a3"),
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
        .add_annotation(Annotation::new("pos", "ADJ").with_id("p2").with_parent("w2"))
        .expect("pos");
    graph
}

// =============================================================================
// TIER T0: IDENTITY
// =============================================================================

mod t0_identity {
    use super::*;

    /// T0.1: Generated ids never collide with existing ones.
    #[test]
    fn generated_ids_skip_used_ids() {
        let mut graph = Graph::new("g1");
        graph.add_anchor(Anchor::new("1", Some(0.0))).expect("anchor");
        graph
            .add_annotation(Annotation::new("word", "x").with_id("2").with_anchors("1", "1"))
            .expect("annotation");

        assert_eq!(graph.new_id(), "3");
    }

    /// T0.2: Duplicate ids are rejected.
    #[test]
    fn duplicates_rejected() {
        let mut graph = transcript();
        assert!(matches!(
            graph.add_anchor(Anchor::new("a1", Some(5.0))),
            Err(GraphError::DuplicateAnchor(_))
        ));
        assert!(matches!(
            graph.add_annotation(Annotation::new("word", "again").with_id("w1")),
            Err(GraphError::DuplicateAnnotation(_))
        ));
    }

    /// T0.3: A NaN offset is no offset.
    #[test]
    fn nan_offset_is_unset() {
        let anchor = Anchor::new("a", Some(f64::NAN));
        assert_eq!(anchor.offset(), None);
    }

    /// T0.4: The graph id is the root of the ownership tree.
    #[test]
    fn graph_id_is_top_level_parent() {
        let graph = transcript();
        let turn = graph.annotation(&"t1".into()).expect("turn");
        assert_eq!(turn.parent_id().map(AnnotationId::as_str), Some("g1"));
    }
}

// =============================================================================
// TIER T1: STRUCTURAL LINKAGE
// =============================================================================

mod t1_linkage {
    use super::*;

    /// T1.1: References to anchors not yet added are resolved on arrival.
    #[test]
    fn pending_anchors_resolve() {
        let mut graph = transcript();
        graph
            .add_annotation(
                Annotation::new("word", "jumps")
                    .with_id("w4")
                    .with_anchors("a3", "a4")
                    .with_parent("t1"),
            )
            .expect("word");
        assert!(graph.pending_anchor_ids().contains(&AnchorId::from("a4")));

        graph.add_anchor(Anchor::new("a4", Some(4.0))).expect("anchor");

        assert!(graph.pending_anchor_ids().is_empty());
        let ending = graph.end_of(&"a4".into(), &layer("word"));
        assert_eq!(ending.len(), 1);
        assert_eq!(ending[0].id().as_str(), "w4");
    }

    /// T1.2: Orphans are adopted when their parent arrives.
    #[test]
    fn orphans_adopted() {
        let mut graph = transcript();
        graph
            .add_annotation(
                Annotation::new("word", "later")
                    .with_id("w9")
                    .with_anchors("a3", "a3")
                    .with_parent("t9"),
            )
            .expect("orphan");
        assert_eq!(graph.orphans(&layer("word")).len(), 1);

        graph
            .add_annotation(Annotation::new("turn", "t").with_id("t9").with_anchors("a3", "a3"))
            .expect("parent");

        assert!(graph.orphans(&layer("word")).is_empty());
        let children = graph.children(&"t9".into(), &layer("word"));
        assert_eq!(children.len(), 1);
        assert_eq!(graph.ordinal(&"w9".into()), 1);
    }

    /// T1.3: Tags take their parent's anchors.
    #[test]
    fn tags_inherit_anchors() {
        let graph = transcript();
        let tag = graph.annotation(&"p2".into()).expect("tag");
        assert_eq!(tag.start_id().map(AnchorId::as_str), Some("a1"));
        assert_eq!(tag.end_id().map(AnchorId::as_str), Some("a2"));
    }

    /// T1.4: Commit removes destroyed entities and their links.
    #[test]
    fn commit_severs_destroyed() {
        let mut graph = transcript();
        graph.destroy_subtree(&"w2".into()).expect("destroy");
        assert!(
            graph
                .annotation(&"w2".into())
                .is_some_and(Annotation::is_destroyed)
        );

        graph.commit();

        assert!(graph.annotation(&"w2".into()).is_none());
        assert!(graph.annotation(&"p2".into()).is_none());
        assert!(graph.start_of(&"a1".into(), &layer("word")).is_empty());
        assert_eq!(graph.ordinal(&"w3".into()), 2);
    }
}

// =============================================================================
// TIER T2: NAVIGATION
// =============================================================================

mod t2_navigation {
    use super::*;

    /// T2.1: Siblings in ordinal order.
    #[test]
    fn previous_and_next() {
        let graph = transcript();
        assert_eq!(graph.next(&"w1".into()).map(|a| a.label()), Some("quick"));
        assert_eq!(graph.previous(&"w3".into()).map(|a| a.label()), Some("quick"));
        assert!(graph.previous(&"w1".into()).is_none());
        assert!(graph.next(&"w3".into()).is_none());
    }

    /// T2.2: Relations across layers.
    #[test]
    fn first_and_all_across_layers() {
        let graph = transcript();
        assert_eq!(
            graph.first(&"p2".into(), &layer("turn")).map(|a| a.id().as_str()),
            Some("t1")
        );
        assert_eq!(graph.labels(&layer("word")), vec!["the", "quick", "fox"]);
        assert_eq!(graph.all(&"t1".into(), &layer("pos")).len(), 1);
        assert!(graph.first(&"w1".into(), &layer("nope")).is_none());
    }

    /// T2.3: Graph bounds are the extreme anchors.
    #[test]
    fn bounds() {
        let graph = transcript();
        assert_eq!(graph.start_id().map(|a| a.to_string()), Some("a0".to_string()));
        assert_eq!(graph.end_id().map(|a| a.to_string()), Some("a3".to_string()));
    }

    /// T2.4: Interval predicates.
    #[test]
    fn interval_predicates() {
        let graph = transcript();
        let turn = graph.annotation(&"t1".into()).expect("turn");
        let word = graph.annotation(&"w2".into()).expect("word");
        assert!(graph.includes(turn, word));
        assert!(!graph.includes(word, turn));
        assert_eq!(graph.duration(word), Some(1.0));
        assert_eq!(graph.midpoint(word), Some(1.5));
        assert!(graph.includes_offset(word, 1.5));
    }

    /// T2.5: Anchor chains follow the word layer.
    #[test]
    fn chains() {
        let graph = transcript();
        let chain = graph.chain_forward(&"a0".into());
        assert_eq!(chain.last().map(AnchorId::as_str), Some("a3"));
    }
}

// =============================================================================
// TIER T3: CHANGE LIFECYCLE
// =============================================================================

mod t3_lifecycle {
    use super::*;
    use annograph_core::{GraphStore, InMemoryStore, Operation};

    /// T3.1: Rollback restores values and drops creations.
    #[test]
    fn rollback_restores() {
        let mut graph = transcript();
        graph.set_label(&"w1".into(), "a").expect("label");
        let created = graph
            .add_annotation(Annotation::new("pos", "DET").with_parent("w1"))
            .expect("tag");
        assert!(graph.has_changes());

        graph.rollback().expect("rollback");

        assert!(!graph.has_changes());
        assert_eq!(graph.annotation(&"w1".into()).map(|a| a.label()), Some("the"));
        assert!(graph.annotation(&created).is_none());
    }

    /// T3.2: The graph-level operation reflects entity changes.
    #[test]
    fn graph_operation() {
        let mut graph = transcript();
        assert_eq!(graph.change(), Operation::NoChange);
        graph.set_label(&"w3".into(), "dog").expect("label");
        assert_eq!(graph.change(), Operation::Update);
        graph.destroy();
        assert_eq!(graph.change(), Operation::Destroy);
    }

    /// T3.3: A graph survives a store round trip.
    #[test]
    fn store_round_trip() {
        let mut graph = transcript();
        let mut store = InMemoryStore::new(graph.schema().clone());
        graph.create();
        store.save_graph(&mut graph).expect("save");

        let loaded = store.graph(&"g1".into(), &[]).expect("load");
        assert_eq!(loaded.labels(&layer("word")), graph.labels(&layer("word")));
        assert!(!loaded.has_changes());
    }
}
