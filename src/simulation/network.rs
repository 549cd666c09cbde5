//! The semantic network: a static, weighted graph over concepts.
//!
//! Concepts are drawn at random with probability proportional to a
//! transform of their degree. The network never changes after
//! [`NetworkBuilder::build`], so the cumulative weight table used for
//! sampling is computed once and shared freely between threads.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::NetworkError;

/// Connection strength between adjacent concepts of raw edge weight 1.
pub const DEFAULT_NEIGHBOR_FACTOR: f64 = 0.004;

/// Index of a concept in its [`SemanticNetwork`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConceptId(u32);

impl ConceptId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ConceptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// How a concept's sampling weight follows from its degree.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum ConceptWeight {
    /// Every concept weighs 1.
    One,
    /// Weight is the degree.
    Degree,
    /// Weight is the squared degree.
    #[default]
    Square,
    /// Weight is 2 to the power of the degree.
    Exponential,
}

impl ConceptWeight {
    pub fn apply(self, degree: usize) -> f64 {
        match self {
            ConceptWeight::One => 1.0,
            ConceptWeight::Degree => degree as f64,
            ConceptWeight::Square => (degree as f64).powi(2),
            ConceptWeight::Exponential => 2f64.powi(degree.min(i32::MAX as usize) as i32),
        }
    }
}

/// Collects concepts and edges before the network is frozen.
#[derive(Debug, Clone)]
pub struct NetworkBuilder {
    labels: Vec<String>,
    index: HashMap<String, ConceptId>,
    neighbors: Vec<BTreeMap<ConceptId, f64>>,
    neighbor_factor: f64,
    concept_weight: ConceptWeight,
}

impl Default for NetworkBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl NetworkBuilder {
    pub fn new() -> Self {
        NetworkBuilder {
            labels: Vec::new(),
            index: HashMap::new(),
            neighbors: Vec::new(),
            neighbor_factor: DEFAULT_NEIGHBOR_FACTOR,
            concept_weight: ConceptWeight::default(),
        }
    }

    pub fn neighbor_factor(mut self, factor: f64) -> Self {
        self.neighbor_factor = factor;
        self
    }

    pub fn concept_weight(mut self, transform: ConceptWeight) -> Self {
        self.concept_weight = transform;
        self
    }

    /// Returns the id of `label`, adding the concept if it is new.
    pub fn add_concept(&mut self, label: &str) -> ConceptId {
        if let Some(id) = self.index.get(label) {
            return *id;
        }
        let id = ConceptId(self.labels.len() as u32);
        self.labels.push(label.to_string());
        self.index.insert(label.to_string(), id);
        self.neighbors.push(BTreeMap::new());
        id
    }

    /// Adds a concept that must not exist yet.
    pub fn add_new_concept(&mut self, label: &str) -> Result<ConceptId, NetworkError> {
        if self.index.contains_key(label) {
            return Err(NetworkError::DuplicateConcept(label.to_string()));
        }
        Ok(self.add_concept(label))
    }

    /// Connects two concepts. A missing raw weight counts as 1; adding the
    /// same edge twice keeps the later weight.
    pub fn add_edge(
        &mut self,
        a: ConceptId,
        b: ConceptId,
        raw_weight: Option<f64>,
    ) -> Result<(), NetworkError> {
        let weight = raw_weight.unwrap_or(1.0);
        if !weight.is_finite() || weight < 0.0 {
            return Err(NetworkError::InvalidEdgeWeight {
                a: self.label_of(a)?.to_string(),
                b: self.label_of(b)?.to_string(),
                weight,
            });
        }
        self.label_of(a)?;
        self.label_of(b)?;
        self.neighbors[a.index()].insert(b, weight);
        self.neighbors[b.index()].insert(a, weight);
        Ok(())
    }

    /// Convenience for tests and small hand-built networks.
    pub fn add_labeled_edge(
        &mut self,
        a: &str,
        b: &str,
        raw_weight: Option<f64>,
    ) -> Result<(), NetworkError> {
        let a = self.add_concept(a);
        let b = self.add_concept(b);
        self.add_edge(a, b, raw_weight)
    }

    fn label_of(&self, id: ConceptId) -> Result<&str, NetworkError> {
        self.labels
            .get(id.index())
            .map(String::as_str)
            .ok_or_else(|| NetworkError::UnknownConcept(id.to_string()))
    }

    /// Freezes the network and precomputes its sampling table.
    pub fn build(self) -> Result<SemanticNetwork, NetworkError> {
        if !self.neighbor_factor.is_finite() || self.neighbor_factor < 0.0 {
            return Err(NetworkError::InvalidNeighborFactor(self.neighbor_factor));
        }

        let mut cumulative = Vec::with_capacity(self.labels.len());
        let mut total = 0.0;
        let mut weighted = 0;
        let mut last_weighted = 0;
        for (i, adjacent) in self.neighbors.iter().enumerate() {
            let weight = self.concept_weight.apply(adjacent.len());
            if weight > 0.0 {
                weighted += 1;
                last_weighted = i;
            }
            total += weight;
            cumulative.push(total);
        }
        if weighted < 2 || !total.is_finite() {
            return Err(NetworkError::Degenerate {
                weighted,
                total: self.labels.len(),
            });
        }

        debug!(
            concepts = self.labels.len(),
            weighted,
            total_weight = total,
            "built semantic network"
        );

        Ok(SemanticNetwork {
            labels: self.labels,
            index: self.index,
            neighbors: self.neighbors,
            neighbor_factor: self.neighbor_factor,
            concept_weight: self.concept_weight,
            cumulative,
            last_weighted: ConceptId(last_weighted as u32),
        })
    }
}

/// Undirected weighted graph over concepts, immutable once built.
///
/// Lookups by [`ConceptId`] expect ids issued by this network and panic
/// on any other, like slice indexing. Use [`SemanticNetwork::concept`]
/// to resolve labels from outside.
#[derive(Debug, Clone)]
pub struct SemanticNetwork {
    labels: Vec<String>,
    index: HashMap<String, ConceptId>,
    neighbors: Vec<BTreeMap<ConceptId, f64>>,
    neighbor_factor: f64,
    concept_weight: ConceptWeight,
    cumulative: Vec<f64>,
    last_weighted: ConceptId,
}

impl SemanticNetwork {
    pub fn builder() -> NetworkBuilder {
        NetworkBuilder::new()
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn concepts(&self) -> impl Iterator<Item = ConceptId> + '_ {
        (0..self.labels.len() as u32).map(ConceptId)
    }

    pub fn concept(&self, label: &str) -> Option<ConceptId> {
        self.index.get(label).copied()
    }

    pub fn label(&self, concept: ConceptId) -> &str {
        &self.labels[concept.index()]
    }

    pub fn neighbor_factor(&self) -> f64 {
        self.neighbor_factor
    }

    pub fn degree(&self, concept: ConceptId) -> usize {
        self.neighbors[concept.index()].len()
    }

    /// Semantic neighbors of `concept` with their raw edge weights.
    pub fn neighbors(&self, concept: ConceptId) -> impl Iterator<Item = (ConceptId, f64)> + '_ {
        self.neighbors[concept.index()]
            .iter()
            .map(|(&other, &raw)| (other, raw))
    }

    /// `neighbor_factor × raw weight` if the concepts are adjacent, else 0.
    pub fn edge_weight(&self, a: ConceptId, b: ConceptId) -> f64 {
        self.neighbors[a.index()]
            .get(&b)
            .map_or(0.0, |raw| self.neighbor_factor * raw)
    }

    pub fn concept_weight(&self, concept: ConceptId) -> f64 {
        self.concept_weight.apply(self.degree(concept))
    }

    /// Draws a concept with probability proportional to its concept weight.
    pub fn random_concept<R: Rng + ?Sized>(&self, rng: &mut R) -> ConceptId {
        let total = self.cumulative[self.cumulative.len() - 1];
        let target = rng.gen::<f64>() * total;
        let index = self.cumulative.partition_point(|&c| c <= target);
        if index >= self.cumulative.len() {
            // Only reachable through rounding at the very top of the range.
            return self.last_weighted;
        }
        ConceptId(index as u32)
    }
}
