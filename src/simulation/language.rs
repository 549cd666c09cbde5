//! Languages as weighted concept↔word associations, and the stochastic
//! step that evolves them.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use rand::Rng;
use tracing::trace;

use super::network::{ConceptId, SemanticNetwork};
use crate::error::SimulationError;

/// Opaque identifier of a lexical form.
///
/// Fresh words are drawn uniformly from the full 64-bit range of the
/// node-local random stream, so independently running workers do not
/// need to coordinate on a counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WordId(pub u64);

impl WordId {
    pub fn mint<R: Rng + ?Sized>(rng: &mut R) -> Self {
        WordId(rng.gen())
    }

    /// Maps an arbitrary cognate-set label onto a word id. Integer labels
    /// keep their value; anything else is hashed.
    pub fn from_label(label: &str) -> Self {
        match label.trim().parse::<u64>() {
            Ok(id) => WordId(id),
            Err(_) => {
                let hash = blake3::hash(label.trim().as_bytes());
                let mut bytes = [0u8; 8];
                bytes.copy_from_slice(&hash.as_bytes()[..8]);
                WordId(u64::from_le_bytes(bytes))
            }
        }
    }
}

impl fmt::Display for WordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A weighted bipartite graph between the concepts of a semantic network
/// and words.
///
/// Only positive weights are stored; a concept with no words has no entry
/// at all, so two languages with the same associations compare equal no
/// matter how they were built.
#[derive(Clone)]
pub struct Language {
    weights: BTreeMap<ConceptId, BTreeMap<WordId, u64>>,
    network: Arc<SemanticNetwork>,
}

impl Language {
    pub fn new(network: Arc<SemanticNetwork>) -> Self {
        Language {
            weights: BTreeMap::new(),
            network,
        }
    }

    pub fn from_records<I>(network: Arc<SemanticNetwork>, records: I) -> Self
    where
        I: IntoIterator<Item = (ConceptId, WordId, u64)>,
    {
        let mut language = Language::new(network);
        for (concept, word, weight) in records {
            language.set_weight(concept, word, weight);
        }
        language
    }

    pub fn network(&self) -> &Arc<SemanticNetwork> {
        &self.network
    }

    /// Current weight of a pair; absent pairs weigh 0.
    pub fn weight(&self, concept: ConceptId, word: WordId) -> u64 {
        self.weights
            .get(&concept)
            .and_then(|words| words.get(&word))
            .copied()
            .unwrap_or(0)
    }

    /// Sets a pair's weight. Setting 0 removes the pair.
    pub fn set_weight(&mut self, concept: ConceptId, word: WordId, weight: u64) {
        if weight == 0 {
            self.remove(concept, word);
            return;
        }
        self.weights.entry(concept).or_default().insert(word, weight);
    }

    pub fn words(&self, concept: ConceptId) -> Option<&BTreeMap<WordId, u64>> {
        self.weights.get(&concept)
    }

    pub fn total_weight(&self) -> u64 {
        self.weights.values().flat_map(|words| words.values()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }

    /// All positive `(concept, word, weight)` entries in canonical order.
    pub fn records(&self) -> impl Iterator<Item = (ConceptId, WordId, u64)> + '_ {
        self.weights.iter().flat_map(|(&concept, words)| {
            words.iter().map(move |(&word, &weight)| (concept, word, weight))
        })
    }

    /// The concept itself with weight 1, plus every semantic neighbor with
    /// its scaled edge weight.
    pub fn weighted_neighbors(&self, concept: ConceptId) -> BTreeMap<ConceptId, f64> {
        let mut weights: BTreeMap<ConceptId, f64> = self
            .network
            .neighbors(concept)
            .map(|(neighbor, _)| (neighbor, self.network.edge_weight(concept, neighbor)))
            .collect();
        weights.insert(concept, 1.0);
        weights
    }

    /// Salience of every word for `concept`, including what leaks in from
    /// semantically adjacent concepts.
    pub fn calculate_scores(&self, concept: ConceptId) -> BTreeMap<WordId, f64> {
        let mut scores = BTreeMap::new();
        for (neighbor, neighbor_weight) in self.weighted_neighbors(concept) {
            let Some(words) = self.weights.get(&neighbor) else {
                continue;
            };
            for (&word, &weight) in words {
                *scores.entry(word).or_insert(0.0) += weight as f64 * neighbor_weight;
            }
        }
        scores
    }

    /// Draws a `(concept, word)` pair with probability proportional to its
    /// weight. `None` for an empty language.
    pub fn random_edge<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<(ConceptId, WordId)> {
        let mut edges = Vec::new();
        let mut cumulative = Vec::new();
        let mut total = 0u64;
        for (concept, word, weight) in self.records() {
            total += weight;
            edges.push((concept, word));
            cumulative.push(total);
        }
        if total == 0 {
            return None;
        }
        let target = rng.gen_range(0..total);
        let index = cumulative.partition_point(|&c| c <= target);
        edges.get(index).copied()
    }

    /// One stochastic transition. Two words gain a unit of weight and two
    /// lose one, so the total weight never changes.
    pub fn step<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Result<(), SimulationError> {
        let concept_1 = self.network.random_concept(rng);
        let mut concept_2 = self.network.random_concept(rng);
        while concept_2 == concept_1 {
            concept_2 = self.network.random_concept(rng);
        }

        let scores_1 = self.calculate_scores(concept_1);
        let scores_2 = self.calculate_scores(concept_2);

        self.reinforce(concept_1, &scores_1, &scores_2, rng);
        self.reinforce(concept_2, &scores_2, &scores_1, rng);

        // Reduce the most confusing word.
        let mut all_neighbors = self.weighted_neighbors(concept_1);
        for (neighbor, weight) in self.weighted_neighbors(concept_2) {
            *all_neighbors.entry(neighbor).or_insert(0.0) += weight;
        }

        let mut confusing = None;
        let mut confusing_weight = 0.0;
        for word in scores_1.keys().filter(|word| scores_2.contains_key(word)) {
            for (&target, &neighbor_weight) in &all_neighbors {
                let weight = self.weight(target, *word) as f64 * neighbor_weight;
                if weight > confusing_weight {
                    confusing = Some((target, *word));
                    confusing_weight = weight;
                }
            }
        }
        let (concept, word) = match confusing {
            Some(pair) => pair,
            None => self
                .random_edge(rng)
                .ok_or(SimulationError::EmptyLanguage)?,
        };
        self.decrement(concept, word);

        // Remove a unit of weight.
        let (concept, word) = self
            .random_edge(rng)
            .ok_or(SimulationError::EmptyLanguage)?;
        self.decrement(concept, word);

        Ok(())
    }

    /// Strengthens the best word used for `concept` but not for the other
    /// concept, or coins a new word when there is none.
    fn reinforce<R: Rng + ?Sized>(
        &mut self,
        concept: ConceptId,
        scores: &BTreeMap<WordId, f64>,
        other_scores: &BTreeMap<WordId, f64>,
        rng: &mut R,
    ) {
        let mut incumbent: Option<(WordId, f64)> = None;
        for (&word, &score) in scores {
            if other_scores.contains_key(&word) {
                continue;
            }
            if incumbent.map_or(true, |(_, best)| score > best) {
                incumbent = Some((word, score));
            }
        }
        let word = match incumbent {
            Some((word, _)) => word,
            None => {
                let word = WordId::mint(rng);
                trace!(concept = %concept, word = %word, "minted word");
                word
            }
        };
        let words = self.weights.entry(concept).or_default();
        *words.entry(word).or_insert(0) += 1;
    }

    fn decrement(&mut self, concept: ConceptId, word: WordId) {
        let weight = self.weight(concept, word);
        debug_assert!(weight > 0, "decrementing an absent pair");
        self.set_weight(concept, word, weight.saturating_sub(1));
    }

    fn remove(&mut self, concept: ConceptId, word: WordId) {
        if let Some(words) = self.weights.get_mut(&concept) {
            words.remove(&word);
            if words.is_empty() {
                self.weights.remove(&concept);
            }
        }
    }
}

impl PartialEq for Language {
    fn eq(&self, other: &Self) -> bool {
        self.weights == other.weights
    }
}

impl Eq for Language {}

impl fmt::Debug for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Language")
            .field("concepts", &self.weights.len())
            .field("total_weight", &self.total_weight())
            .finish()
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (&concept, words)) in self.weights.iter().enumerate() {
            if i > 0 {
                writeln!(f, ",")?;
            }
            write!(f, "{}: {{", self.network.label(concept))?;
            for (j, (word, weight)) in words.iter().enumerate() {
                if j > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}: {}", word, weight)?;
            }
            write!(f, "}}")?;
        }
        Ok(())
    }
}
