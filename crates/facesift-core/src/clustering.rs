//! Single-pass online identity clustering.
//!
//! Detections are visited in insertion order. Each one joins the first
//! existing cluster whose representative has a dot product strictly above
//! the threshold, or founds a new cluster whose representative is frozen to
//! its own embedding. This is first-match, not best-match, and the
//! representative never moves: the grouping is order-sensitive, and cluster
//! numbering downstream depends on it.

use crate::types::Embedding;

/// Default similarity threshold for joining a cluster.
pub const DEFAULT_CLUSTER_THRESHOLD: f32 = 0.65;

/// One detection as seen by the clustering pass.
#[derive(Debug, Clone, Copy)]
pub struct ClusterInput<'a> {
    pub id: i64,
    pub document: &'a str,
    pub embedding: &'a Embedding,
}

/// A group of detections believed to belong to one person.
#[derive(Debug, Clone)]
pub struct IdentityCluster {
    /// Embedding of the first member, fixed at creation.
    pub representative: Embedding,
    /// Member detection ids, in assignment order.
    pub members: Vec<i64>,
    /// Distinct source documents, in first-seen order.
    pub documents: Vec<String>,
}

impl IdentityCluster {
    fn found(input: &ClusterInput<'_>) -> Self {
        Self {
            representative: input.embedding.clone(),
            members: vec![input.id],
            documents: vec![input.document.to_string()],
        }
    }

    fn admit(&mut self, input: &ClusterInput<'_>) {
        self.members.push(input.id);
        if !self.documents.iter().any(|d| d == input.document) {
            self.documents.push(input.document.to_string());
        }
    }

    fn accepts(&self, embedding: &Embedding, threshold: f32) -> bool {
        self.representative.dot(embedding) > threshold
    }
}

/// Partition `inputs` into identity clusters. O(n·k) in detections × clusters.
pub fn cluster<'a, I>(inputs: I, threshold: f32) -> Vec<IdentityCluster>
where
    I: IntoIterator<Item = ClusterInput<'a>>,
{
    let mut clusters: Vec<IdentityCluster> = Vec::new();

    for input in inputs {
        match clusters
            .iter_mut()
            .find(|c| c.accepts(input.embedding, threshold))
        {
            Some(existing) => existing.admit(&input),
            None => clusters.push(IdentityCluster::found(&input)),
        }
    }

    tracing::debug!(clusters = clusters.len(), threshold, "clustering complete");
    clusters
}
