//! # Property-Based Tests
//!
//! Structural invariants of the annotation graph, checked with proptest.
//!
//! These tests ensure index consistency, ordering and determinism.

use annograph_core::{
    Alignment, Anchor, AnchorId, Annotation, AnnotationId, AnnotationObject, EntityRef, Graph,
    Layer, LayerId, Operation, TrackedAttribute, TrackedValue, graph_from_bytes, graph_to_bytes,
};
use proptest::collection::vec;
use proptest::prelude::*;
use serde_json::json;

// =============================================================================
// FIXTURES
// =============================================================================

fn layer(id: &str) -> LayerId {
    LayerId::from(id)
}

/// turn > word > pos, with pos a tag layer.
fn schema_graph(id: &str) -> Graph {
    let mut graph = Graph::new(id);
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
    graph
}

/// One turn over `words` consecutive words, each 0.5 long, each tagged.
fn transcript(words: usize) -> Graph {
    let mut graph = schema_graph("g1");
    for i in 0..=words {
        graph
            .add_anchor(Anchor::new(format!("a{i:02}"), Some(i as f64 * 0.5)))
            .expect("anchor");
    }
    graph
        .add_annotation(
            Annotation::new("turn", "turn")
                .with_id("t1")
                .with_anchors("a00", format!("a{words:02}")),
        )
        .expect("turn");
    for i in 0..words {
        graph
            .add_annotation(
                Annotation::new("word", format!("word{i}"))
                    .with_id(format!("w{i:02}"))
                    .with_anchors(format!("a{i:02}"), format!("a{:02}", i + 1))
                    .with_parent("t1"),
            )
            .expect("word");
        graph
            .add_annotation(
                Annotation::new("pos", "N")
                    .with_id(format!("p{i:02}"))
                    .with_parent(format!("w{i:02}")),
            )
            .expect("pos");
    }
    graph
}

// =============================================================================
// PROPERTY TESTS
// =============================================================================

proptest! {
    /// Re-pointing an annotation's start moves it between the anchors'
    /// link indices: only the new start lists it.
    #[test]
    fn anchor_links_follow_start_changes(
        anchors in 3usize..12,
        start in 0usize..12,
        moved_to in 0usize..12,
    ) {
        let mut graph = schema_graph("g1");
        let ids: Vec<AnchorId> = (0..anchors).map(|i| AnchorId::from(format!("a{i}"))).collect();
        for (i, id) in ids.iter().enumerate() {
            graph.add_anchor(Anchor::new(id.clone(), Some(i as f64))).expect("anchor");
        }
        let start = start % anchors;
        let moved_to = moved_to % anchors;
        let word = graph
            .add_annotation(
                Annotation::new("word", "w")
                    .with_anchors(ids[start].clone(), ids[anchors - 1].clone()),
            )
            .expect("word");

        graph.set_start_id(&word, Some(ids[moved_to].clone())).expect("move");

        for (i, id) in ids.iter().enumerate() {
            let listed = graph.start_of(id, &layer("word")).iter().any(|a| a.id() == &word);
            prop_assert_eq!(listed, i == moved_to);
        }
    }

    /// Live children of one parent on one layer always number
    /// `minimum, minimum + 1, ...` without gaps or duplicates.
    #[test]
    fn ordinals_stay_contiguous(
        words in 1usize..10,
        edits in vec((any::<bool>(), 0usize..10, 1i32..12), 0..20),
    ) {
        let mut graph = transcript(words);
        for (destroy, index, ordinal) in edits {
            let id = AnnotationId::from(format!("w{:02}", index % words));
            if graph.annotation(&id).is_some_and(Annotation::is_destroyed) {
                continue;
            }
            if destroy {
                graph.destroy_annotation(&id).expect("destroy");
            } else {
                graph.set_ordinal(&id, ordinal).expect("ordinal");
            }
        }

        let parent = AnnotationId::from("t1");
        let minimum = graph.ordinal_minimum(&parent, &layer("word"));
        let mut ordinals: Vec<i32> = graph
            .live_children(&parent, &layer("word"))
            .iter()
            .map(|a| graph.ordinal(a.id()))
            .collect();
        ordinals.sort_unstable();
        let expected: Vec<i32> = (0..ordinals.len() as i32).map(|i| minimum + i).collect();
        prop_assert_eq!(ordinals, expected);
    }

    /// Tags keep sharing their parent's anchors through any sequence of
    /// anchor edits on the parent.
    #[test]
    fn tags_share_parent_anchors(
        edits in vec((any::<bool>(), 0usize..6), 1..16),
    ) {
        let mut graph = transcript(5);
        let word = AnnotationId::from("w02");
        let tag = AnnotationId::from("p02");
        for (start, index) in edits {
            let anchor = Some(AnchorId::from(format!("a{index:02}")));
            if start {
                graph.set_start_id(&word, anchor).expect("start");
            } else {
                graph.set_end_id(&word, anchor).expect("end");
            }
            let parent = graph.annotation(&word).expect("word");
            let child = graph.annotation(&tag).expect("tag");
            prop_assert_eq!(child.start_id(), parent.start_id());
            prop_assert_eq!(child.end_id(), parent.end_id());
        }
    }

    /// Destroying a subtree reports every descendant before the root of
    /// the subtree.
    #[test]
    fn subtree_destroys_are_bottom_up(words in 1usize..8) {
        let mut graph = transcript(words);
        graph.track_changes();
        graph.destroy_subtree(&"t1".into()).expect("destroy");

        let changes = graph.get_changes();
        let position = |id: &str| {
            changes.iter().position(|c| {
                c.operation == Operation::Destroy
                    && c.entity == EntityRef::Annotation(AnnotationId::from(id))
            })
        };
        let turn = position("t1").expect("turn destroyed");
        for i in 0..words {
            let word = position(&format!("w{i:02}")).expect("word destroyed");
            let tag = position(&format!("p{i:02}")).expect("tag destroyed");
            prop_assert!(tag < word);
            prop_assert!(word < turn);
        }
    }

    /// A new parent's creation is reported before its new child's.
    #[test]
    fn creates_are_top_down(label in "[a-z]{1,8}") {
        let mut graph = transcript(2);
        graph.track_changes();
        let turn = graph.add_annotation(Annotation::new("turn", label.clone())).expect("turn");
        let word = graph
            .add_annotation(Annotation::new("word", label).with_parent(turn.clone()))
            .expect("word");

        let changes = graph.get_changes();
        let created = |id: &AnnotationId| {
            changes.iter().position(|c| {
                c.operation == Operation::Create
                    && c.entity == EntityRef::Annotation(id.clone())
            })
        };
        let turn_at = created(&turn).expect("turn created");
        let word_at = created(&word).expect("word created");
        prop_assert!(turn_at < word_at);
    }

    /// An annotation and its children survive the JSON object form, minus
    /// transient attributes.
    #[test]
    fn annotation_objects_round_trip(
        label in "[a-zA-Z ]{0,12}",
        tag in "[A-Z]{1,4}",
        note in "[a-z0-9]{0,12}",
        confidence in 0i32..=100,
    ) {
        let mut graph = transcript(3);
        graph.set_label(&"w01".into(), label.clone()).expect("label");
        graph.set_label(&"p01".into(), tag.clone()).expect("tag");
        let word = graph.annotation_mut(&"w01".into()).expect("word");
        word.confidence = Some(confidence);
        word.attributes.set("note", json!(note));
        word.attributes.set("@scratch", json!(true));

        let object = graph.annotation_object(&"w01".into()).expect("object");
        let text = serde_json::to_string(&object).expect("serialize");
        let parsed: AnnotationObject = serde_json::from_str(&text).expect("parse");

        prop_assert_eq!(&parsed, &object);
        prop_assert_eq!(parsed.label, label);
        prop_assert_eq!(parsed.confidence, Some(confidence));
        prop_assert_eq!(parsed.attributes.get("note"), Some(&json!(note)));
        prop_assert!(parsed.attributes.get("@scratch").is_none());
        let tags = parsed.annotations.get(&layer("pos")).expect("children");
        prop_assert_eq!(tags.len(), 1);
        prop_assert_eq!(&tags[0].label, &tag);
    }

    /// An offset fragment holds exactly the words inside the window, in
    /// order, each able to reach its turn.
    #[test]
    fn offset_fragments_are_bounded(
        words in 1usize..12,
        from in 0usize..13,
        to in 0usize..13,
    ) {
        let graph = transcript(words);
        let (from, to) = (from.min(to) % (words + 1), from.max(to) % (words + 1));
        let (from, to) = (from.min(to), from.max(to));
        let (start, end) = (from as f64 * 0.5, to as f64 * 0.5);

        let fragment = graph
            .fragment_by_offsets(start, end, &[layer("word")])
            .expect("fragment");

        let expected: Vec<String> = (from..to).map(|i| format!("w{i:02}")).collect();
        let actual: Vec<String> = fragment
            .list(&layer("word"))
            .iter()
            .map(|a| a.id().to_string())
            .collect();
        prop_assert_eq!(actual, expected);
        for word in fragment.list(&layer("word")) {
            let turn = fragment.first(word.id(), &layer("turn"));
            prop_assert_eq!(turn.map(|t| t.id().as_str()), Some("t1"));
        }
    }

    /// Whatever the window, an offset fragment starts and ends exactly on
    /// its edges.
    #[test]
    fn offset_fragments_have_anchors_at_their_edges(
        words in 1usize..10,
        from in 0.0f64..5.0,
        length in 0.0f64..5.0,
    ) {
        let graph = transcript(words);
        let (start, end) = (from, from + length);

        let fragment = graph
            .fragment_by_offsets(start, end, &[layer("word")])
            .expect("fragment");

        prop_assert!(fragment.get_anchor_at(start).is_some());
        prop_assert!(fragment.get_anchor_at(end).is_some());
        let offset = |id: Option<AnchorId>| {
            id.and_then(|a| fragment.anchor(&a).and_then(Anchor::offset))
        };
        prop_assert_eq!(offset(fragment.start_id()), Some(start));
        prop_assert_eq!(offset(fragment.end_id()), Some(end));
    }

    /// Giving a floating anchor its first offset after a commit is an
    /// update from no value.
    #[test]
    fn first_offsets_after_commit_are_updates(offset in 0.0f64..100.0) {
        let mut graph = transcript(2);
        graph.add_anchor(Anchor::new("float", None)).expect("anchor");
        graph.commit();

        graph.set_offset(&"float".into(), Some(offset)).expect("offset");

        prop_assert_eq!(graph.change(), Operation::Update);
        let changes = graph.get_changes();
        prop_assert_eq!(changes.len(), 1);
        prop_assert_eq!(&changes[0].entity, &EntityRef::Anchor("float".into()));
        prop_assert_eq!(changes[0].attribute, Some(TrackedAttribute::Offset));
        prop_assert_eq!(&changes[0].old_value, &TrackedValue::Null);
        prop_assert_eq!(&changes[0].new_value, &TrackedValue::Number(offset));
    }

    /// Offsets closer than the granularity resolve to the same anchor.
    #[test]
    fn close_offsets_share_an_anchor(
        granularity in prop::sample::select(vec![0.001, 0.01, 0.1, 1.0]),
        offset in 0.0f64..1000.0,
        fraction in 0.0f64..0.9,
    ) {
        let mut graph = Graph::new("g1");
        graph.set_offset_granularity(Some(granularity));

        let first = graph.get_or_create_anchor_at(offset, None).expect("first");
        let second = graph
            .get_or_create_anchor_at(offset + fraction * granularity, None)
            .expect("second");

        prop_assert_eq!(first, second);
        prop_assert_eq!(graph.anchor_count(), 1);
    }

    /// Snapshots are deterministic: save, load, save gives the same bytes.
    #[test]
    fn snapshots_are_stable(words in 0usize..10, labels in vec("[a-z]{1,6}", 10)) {
        let mut graph = transcript(words);
        for (i, label) in labels.iter().enumerate().take(words) {
            graph.set_label(&format!("w{i:02}").into(), label.clone()).expect("label");
        }

        let bytes = graph_to_bytes(&graph).expect("save");
        let restored = graph_from_bytes(&bytes).expect("load");
        prop_assert_eq!(graph_to_bytes(&restored).expect("resave"), bytes);
        prop_assert_eq!(restored.labels(&layer("word")), graph.labels(&layer("word")));
    }
}
