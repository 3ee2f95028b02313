//! Edges and edge groups: the delivery rules between executors.
//!
//! An [`Edge`] is a directed delivery rule from one executor to another,
//! optionally gated by a predicate over the message. Edges are grouped
//! into [`EdgeGroup`]s:
//!
//! - `Single` — one source, one target.
//! - `FanOut` — one source, many targets; the message is delivered to
//!   every target whose predicate passes, or a selector picks the
//!   subset.
//! - `FanIn` — many sources, one target; the target receives a
//!   list-typed message assembled from each source's contribution once
//!   every declared source has contributed (per source, the last message
//!   in the accumulation window wins).
//!
//! Cyclic edges are permitted; the run's iteration cap bounds
//! termination.

use crate::envelope::Envelope;
use std::sync::Arc;

/// Predicate over a message; delivery is skipped when it returns false.
pub type EdgePredicate = Arc<dyn Fn(&Envelope) -> bool + Send + Sync>;

/// Selector for fan-out groups: picks the subset of targets that receive
/// the message.
pub type FanOutSelector = Arc<dyn Fn(&Envelope, &[String]) -> Vec<String> + Send + Sync>;

/// A directed delivery rule between two executors.
#[derive(Clone)]
pub struct Edge {
    /// Source executor id.
    pub source: String,
    /// Target executor id.
    pub target: String,
    /// Optional delivery predicate.
    pub predicate: Option<EdgePredicate>,
}

impl Edge {
    /// Unconditional edge.
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            predicate: None,
        }
    }

    /// Conditional edge.
    pub fn with_predicate(
        source: impl Into<String>,
        target: impl Into<String>,
        predicate: EdgePredicate,
    ) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            predicate: Some(predicate),
        }
    }

    /// Does the predicate admit this message? Unconditional edges admit
    /// everything.
    pub fn admits(&self, envelope: &Envelope) -> bool {
        self.predicate.as_ref().map_or(true, |p| p(envelope))
    }
}

impl std::fmt::Debug for Edge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Edge")
            .field("source", &self.source)
            .field("target", &self.target)
            .field("conditional", &self.predicate.is_some())
            .finish()
    }
}

/// A group of edges sharing delivery semantics.
#[derive(Clone)]
pub enum EdgeGroup {
    /// One source, one target.
    Single(Edge),
    /// One source, many targets.
    FanOut {
        /// Source executor id.
        source: String,
        /// Per-target edges (predicates allowed).
        edges: Vec<Edge>,
        /// Optional selector deciding the target subset.
        selector: Option<FanOutSelector>,
    },
    /// Many sources, one target.
    FanIn {
        /// Stable group id, used to key accumulation state.
        id: String,
        /// Source executor ids.
        sources: Vec<String>,
        /// Target executor id.
        target: String,
    },
}

impl EdgeGroup {
    /// Ids of the source executors feeding this group.
    pub fn sources(&self) -> Vec<&str> {
        match self {
            EdgeGroup::Single(edge) => vec![edge.source.as_str()],
            EdgeGroup::FanOut { source, .. } => vec![source.as_str()],
            EdgeGroup::FanIn { sources, .. } => sources.iter().map(String::as_str).collect(),
        }
    }

    /// Ids of the target executors this group can deliver to.
    pub fn targets(&self) -> Vec<&str> {
        match self {
            EdgeGroup::Single(edge) => vec![edge.target.as_str()],
            EdgeGroup::FanOut { edges, .. } => edges.iter().map(|e| e.target.as_str()).collect(),
            EdgeGroup::FanIn { target, .. } => vec![target.as_str()],
        }
    }

    /// True if this group can carry messages from `source_id`.
    pub fn has_source(&self, source_id: &str) -> bool {
        self.sources().contains(&source_id)
    }
}

impl std::fmt::Debug for EdgeGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EdgeGroup::Single(edge) => f.debug_tuple("Single").field(edge).finish(),
            EdgeGroup::FanOut { source, edges, selector } => f
                .debug_struct("FanOut")
                .field("source", source)
                .field("targets", &edges.iter().map(|e| &e.target).collect::<Vec<_>>())
                .field("selector", &selector.is_some())
                .finish(),
            EdgeGroup::FanIn { id, sources, target } => f
                .debug_struct("FanIn")
                .field("id", id)
                .field("sources", sources)
                .field("target", target)
                .finish(),
        }
    }
}
