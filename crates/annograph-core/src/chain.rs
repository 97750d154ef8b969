//! # Anchor Chains
//!
//! Greedy walks along the temporal graph, one anchor at a time.
//!
//! At each step the walk takes the first live annotation leaving the current
//! anchor (forwards: starting there; backwards: ending there) that passes
//! the `follow` predicate and is not instantaneous, trying the preferred
//! layers in order before any other layer. It stops after the first anchor
//! satisfying `boundary`, or when there is nowhere left to go.
//!
//! The walk never backtracks: the same graph and the same preferences always
//! give the same chain.

use crate::anchor::Anchor;
use crate::annotation::Annotation;
use crate::graph::{Graph, Side};
use crate::types::{AnchorId, LayerId};
use std::collections::BTreeSet;
use tracing::trace;

/// Anchors visited by a walk, in temporal order. The starting anchor is
/// not included.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnchorChain {
    anchors: Vec<AnchorId>,
}

impl AnchorChain {
    #[must_use]
    pub fn anchors(&self) -> &[AnchorId] {
        &self.anchors
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.anchors.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.anchors.is_empty()
    }

    #[must_use]
    pub fn first(&self) -> Option<&AnchorId> {
        self.anchors.first()
    }

    #[must_use]
    pub fn last(&self) -> Option<&AnchorId> {
        self.anchors.last()
    }

    pub fn iter(&self) -> impl Iterator<Item = &AnchorId> {
        self.anchors.iter()
    }

    #[must_use]
    pub fn into_vec(self) -> Vec<AnchorId> {
        self.anchors
    }
}

impl Graph {
    /// Walk forwards from `start` until `boundary` holds.
    pub fn chain_forward_until(
        &self,
        start: &AnchorId,
        prefer: &[LayerId],
        follow: impl Fn(&Annotation) -> bool,
        boundary: impl Fn(&Anchor) -> bool,
    ) -> AnchorChain {
        let anchors = self.walk_chain(start, Side::End, prefer, &follow, &boundary);
        trace!(graph = %self.id, anchor = %start, length = anchors.len(), "forward chain");
        AnchorChain { anchors }
    }

    /// Walk backwards from `start` until `boundary` holds.
    pub fn chain_backward_until(
        &self,
        start: &AnchorId,
        prefer: &[LayerId],
        follow: impl Fn(&Annotation) -> bool,
        boundary: impl Fn(&Anchor) -> bool,
    ) -> AnchorChain {
        let mut anchors = self.walk_chain(start, Side::Start, prefer, &follow, &boundary);
        trace!(graph = %self.id, anchor = %start, length = anchors.len(), "backward chain");
        anchors.reverse();
        AnchorChain { anchors }
    }

    /// Walk forwards from `start` as far as possible.
    #[must_use]
    pub fn chain_forward(&self, start: &AnchorId) -> AnchorChain {
        self.chain_forward_until(start, &[], |_| true, |_| false)
    }

    /// Walk backwards from `start` as far as possible.
    #[must_use]
    pub fn chain_backward(&self, start: &AnchorId) -> AnchorChain {
        self.chain_backward_until(start, &[], |_| true, |_| false)
    }

    // `toward` names the annotation end the walk moves to.
    fn walk_chain(
        &self,
        start: &AnchorId,
        toward: Side,
        prefer: &[LayerId],
        follow: &impl Fn(&Annotation) -> bool,
        boundary: &impl Fn(&Anchor) -> bool,
    ) -> Vec<AnchorId> {
        let mut chain = Vec::new();
        let mut visited = BTreeSet::from([start.clone()]);
        let mut current = start.clone();
        while let Some(next) = self.next_in_chain(&current, toward, prefer, follow) {
            // a cycle would never end
            if !visited.insert(next.clone()) {
                break;
            }
            chain.push(next.clone());
            let stop = self.anchor(&next).is_some_and(boundary);
            current = next;
            if stop {
                break;
            }
        }
        chain
    }

    fn next_in_chain(
        &self,
        current: &AnchorId,
        toward: Side,
        prefer: &[LayerId],
        follow: &impl Fn(&Annotation) -> bool,
    ) -> Option<AnchorId> {
        let leaving = |layer: Option<&LayerId>| match (toward, layer) {
            (Side::End, Some(layer)) => self.start_of(current, layer),
            (Side::End, None) => self.starting_annotations(current),
            (Side::Start, Some(layer)) => self.end_of(current, layer),
            (Side::Start, None) => self.ending_annotations(current),
        };
        let step = |annotation: &Annotation| -> Option<AnchorId> {
            if annotation.is_destroyed() || !follow(annotation) {
                return None;
            }
            let next = match toward {
                Side::End => annotation.end_id.as_ref(),
                Side::Start => annotation.start_id.as_ref(),
            }?;
            (next != current).then(|| next.clone())
        };
        prefer
            .iter()
            .find_map(|layer| leaving(Some(layer)).into_iter().find_map(step))
            .or_else(|| leaving(None).into_iter().find_map(step))
    }
}
