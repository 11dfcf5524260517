pub mod tag;

use std::collections::{BTreeSet, HashMap, HashSet};

use serde::Serialize;
use thiserror::Error;

pub use tag::{Tag, normalize};

/// Returned by [`TagGraph::average_degree`] when the graph has no vertices.
pub const EMPTY_GRAPH_DEGREE: f64 = -1.0;

/// How a delete treats tags the graph has never seen (or already reclaimed).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeletePolicy {
    /// Any unknown tag turns the whole delete into a no-op.
    #[default]
    Strict,
    /// Unknown tags are dropped; the delete applies to the known ones.
    Lenient,
}

impl DeletePolicy {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Strict => "strict",
            Self::Lenient => "lenient",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GraphStats {
    pub vertices: usize,
    pub total_edges: usize,
    pub total_degree_sum: usize,
    pub average_degree: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvariantViolation {
    #[error("edge {from} -> {to} has no reverse entry")]
    Asymmetric { from: Tag, to: Tag },
    #[error("tag {0} is its own neighbor")]
    SelfLoop(Tag),
    #[error("degree sum is {tracked} but adjacency holds {actual}")]
    DegreeSumDrift { tracked: usize, actual: usize },
    #[error("edge count is {tracked} but adjacency holds {actual}")]
    EdgeCountDrift { tracked: usize, actual: usize },
    #[error("vertex {0} has no live reference")]
    VertexWithoutReference(Tag),
    #[error("tag {0} is referenced but has no vertex")]
    ReferenceWithoutVertex(Tag),
}

/// Undirected hashtag co-occurrence graph with a running average degree.
///
/// Each record contributes a clique over its (case-folded, deduplicated)
/// tags. Per-tag reference counts track how many live records mention a tag,
/// so deleting a record reclaims exactly the vertices nothing else backs.
///
/// `total_edges` and `total_degree_sum` both count directed adjacency
/// entries: every unordered connection is charged once per direction.
#[derive(Debug, Clone, Default)]
pub struct TagGraph {
    adjacency: HashMap<Tag, HashSet<Tag>>,
    references: HashMap<Tag, usize>,
    total_edges: usize,
    total_degree_sum: usize,
    policy: DeletePolicy,
}

impl TagGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_policy(policy: DeletePolicy) -> Self {
        Self {
            policy,
            ..Self::default()
        }
    }

    pub fn policy(&self) -> DeletePolicy {
        self.policy
    }

    pub fn apply_insert<I, S>(&mut self, tags: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let tags = normalize(tags);
        if tags.is_empty() {
            return;
        }

        for tag in &tags {
            *self.references.entry(tag.clone()).or_insert(0) += 1;
            self.adjacency.entry(tag.clone()).or_default();
        }

        for (a, b) in pairs(&tags) {
            self.add_edge(a, b);
            self.add_edge(b, a);
        }
    }

    pub fn apply_delete<I, S>(&mut self, tags: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut tags = normalize(tags);
        if tags.is_empty() {
            return;
        }

        match self.policy {
            DeletePolicy::Strict => {
                if let Some(unknown) = tags.iter().find(|tag| !self.adjacency.contains_key(*tag))
                {
                    tracing::debug!(tag = %unknown, "delete references unknown tag; ignoring record");
                    return;
                }
            }
            DeletePolicy::Lenient => {
                tags.retain(|tag| {
                    let known = self.adjacency.contains_key(tag);
                    if !known {
                        tracing::debug!(tag = %tag, "delete references unknown tag; dropping it");
                    }
                    known
                });
                if tags.is_empty() {
                    return;
                }
            }
        }

        for tag in &tags {
            if let Some(count) = self.references.get_mut(tag) {
                *count = count.saturating_sub(1);
            }
        }

        for (a, b) in pairs(&tags) {
            self.remove_edge(a, b);
            self.remove_edge(b, a);
        }

        for tag in &tags {
            if self.references.get(tag).copied().unwrap_or(0) == 0 {
                self.reclaim(tag);
            }
        }
    }

    /// Inserts every record in order, pulling them one at a time.
    pub fn load<R, I, S>(&mut self, records: R) -> usize
    where
        R: IntoIterator<Item = I>,
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut applied = 0usize;
        for record in records {
            self.apply_insert(record);
            applied += 1;
        }
        applied
    }

    /// Deletes every record in order, pulling them one at a time.
    pub fn unload<R, I, S>(&mut self, records: R) -> usize
    where
        R: IntoIterator<Item = I>,
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut applied = 0usize;
        for record in records {
            self.apply_delete(record);
            applied += 1;
        }
        applied
    }

    /// Like [`TagGraph::load`] for fallible sources; records before the first
    /// error stay applied.
    pub fn try_load<R, I, S, E>(&mut self, records: R) -> Result<usize, E>
    where
        R: IntoIterator<Item = Result<I, E>>,
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut applied = 0usize;
        for record in records {
            self.apply_insert(record?);
            applied += 1;
        }
        Ok(applied)
    }

    pub fn try_unload<R, I, S, E>(&mut self, records: R) -> Result<usize, E>
    where
        R: IntoIterator<Item = Result<I, E>>,
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut applied = 0usize;
        for record in records {
            self.apply_delete(record?);
            applied += 1;
        }
        Ok(applied)
    }

    pub fn average_degree(&self) -> f64 {
        if self.adjacency.is_empty() {
            return EMPTY_GRAPH_DEGREE;
        }
        self.total_degree_sum as f64 / self.adjacency.len() as f64
    }

    pub fn reset(&mut self) {
        self.adjacency.clear();
        self.references.clear();
        self.total_edges = 0;
        self.total_degree_sum = 0;
    }

    pub fn vertex_count(&self) -> usize {
        self.adjacency.len()
    }

    pub fn total_edges(&self) -> usize {
        self.total_edges
    }

    pub fn total_degree_sum(&self) -> usize {
        self.total_degree_sum
    }

    pub fn is_empty(&self) -> bool {
        self.adjacency.is_empty()
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.adjacency.contains_key(Tag::new(tag).as_str())
    }

    /// Sorted neighbors of `tag`, or `None` when the tag has no vertex.
    pub fn neighbors(&self, tag: &str) -> Option<Vec<&Tag>> {
        let set = self.adjacency.get(Tag::new(tag).as_str())?;
        let mut out = set.iter().collect::<Vec<_>>();
        out.sort();
        Some(out)
    }

    pub fn reference_count(&self, tag: &str) -> usize {
        self.references
            .get(Tag::new(tag).as_str())
            .copied()
            .unwrap_or(0)
    }

    pub fn stats(&self) -> GraphStats {
        GraphStats {
            vertices: self.vertex_count(),
            total_edges: self.total_edges,
            total_degree_sum: self.total_degree_sum,
            average_degree: self.average_degree(),
        }
    }

    /// Full scan of the adjacency against the incremental counters.
    pub fn verify(&self) -> Result<(), InvariantViolation> {
        let mut actual = 0usize;
        for (vertex, neighbors) in &self.adjacency {
            if neighbors.contains(vertex) {
                return Err(InvariantViolation::SelfLoop(vertex.clone()));
            }
            for neighbor in neighbors {
                let mirrored = self
                    .adjacency
                    .get(neighbor)
                    .is_some_and(|back| back.contains(vertex));
                if !mirrored {
                    return Err(InvariantViolation::Asymmetric {
                        from: vertex.clone(),
                        to: neighbor.clone(),
                    });
                }
            }
            if self.references.get(vertex).copied().unwrap_or(0) == 0 {
                return Err(InvariantViolation::VertexWithoutReference(vertex.clone()));
            }
            actual += neighbors.len();
        }

        if let Some(tag) = self
            .references
            .keys()
            .find(|tag| !self.adjacency.contains_key(*tag))
        {
            return Err(InvariantViolation::ReferenceWithoutVertex(tag.clone()));
        }
        if self.total_degree_sum != actual {
            return Err(InvariantViolation::DegreeSumDrift {
                tracked: self.total_degree_sum,
                actual,
            });
        }
        if self.total_edges != actual {
            return Err(InvariantViolation::EdgeCountDrift {
                tracked: self.total_edges,
                actual,
            });
        }
        Ok(())
    }

    fn add_edge(&mut self, from: &Tag, to: &Tag) {
        let Some(neighbors) = self.adjacency.get_mut(from) else {
            return;
        };
        if neighbors.insert(to.clone()) {
            self.total_edges += 1;
            self.total_degree_sum += 1;
        }
    }

    fn remove_edge(&mut self, from: &Tag, to: &Tag) {
        let Some(neighbors) = self.adjacency.get_mut(from) else {
            return;
        };
        if neighbors.remove(to) {
            self.total_edges -= 1;
            self.total_degree_sum -= 1;
        }
    }

    fn reclaim(&mut self, tag: &Tag) {
        self.references.remove(tag);
        let Some(neighbors) = self.adjacency.remove(tag) else {
            return;
        };
        // Pairs the delete loop never visited, e.g. a record that was never inserted.
        let dangling = neighbors.len();
        self.total_edges -= dangling;
        self.total_degree_sum -= dangling;
        for neighbor in &neighbors {
            self.remove_edge(neighbor, tag);
        }
    }
}

fn pairs(tags: &BTreeSet<Tag>) -> impl Iterator<Item = (&Tag, &Tag)> {
    tags.iter()
        .enumerate()
        .flat_map(move |(idx, a)| tags.iter().skip(idx + 1).map(move |b| (a, b)))
}
