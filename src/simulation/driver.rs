//! Sequential simulation of a language down a phylogeny.

use tracing::{debug, info};

use super::language::Language;
use super::phylogeny::{NodeId, Phylogeny};
use super::seeding::node_stream;
use crate::error::SimulationError;
use crate::io::wordlist::LanguageSink;

/// Applies the branch's steps to `language`, drawing from the stream that
/// belongs to `name` under `seed`.
pub fn evolve_branch(
    language: &mut Language,
    name: &str,
    steps: usize,
    seed: u64,
) -> Result<(), SimulationError> {
    let mut rng = node_stream(name, seed);
    for _ in 0..steps {
        language.step(&mut rng)?;
    }
    debug!(node = name, steps, total_weight = language.total_weight(), "evolved branch");
    Ok(())
}

/// Lazy pre-order walk yielding `(name, language)` for every named node.
///
/// Each node starts from an independent copy of its ancestor's language,
/// and its random stream depends only on its name and the seed.
pub struct Simulation<'a> {
    tree: &'a Phylogeny,
    seed: u64,
    stack: Vec<(NodeId, Language)>,
    failure: Option<SimulationError>,
}

/// Simulates `language` down `tree`, starting at the root. A tree with
/// duplicate node names yields a single error and nothing else.
pub fn simulate(tree: &Phylogeny, language: Language, seed: u64) -> Simulation<'_> {
    info!(nodes = tree.len(), seed, "starting sequential simulation");
    match tree.check_unique_names() {
        Ok(()) => Simulation {
            tree,
            seed,
            stack: vec![(tree.root(), language)],
            failure: None,
        },
        Err(err) => Simulation {
            tree,
            seed,
            stack: Vec::new(),
            failure: Some(err.into()),
        },
    }
}

impl Iterator for Simulation<'_> {
    type Item = Result<(String, Language), SimulationError>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(err) = self.failure.take() {
            return Some(Err(err));
        }
        loop {
            let (id, mut language) = self.stack.pop()?;
            let node = self.tree.node(id);
            let name = node.name().unwrap_or("");
            if let Err(err) = evolve_branch(&mut language, name, node.steps(), self.seed) {
                self.stack.clear();
                return Some(Err(err));
            }
            for &child in node.children.iter().rev() {
                self.stack.push((child, language.clone()));
            }
            if let Some(name) = node.name() {
                return Some(Ok((name.to_string(), language)));
            }
        }
    }
}

/// Runs the whole sequential simulation, writing every language to `sink`
/// as soon as it is computed.
pub fn simulate_into(
    tree: &Phylogeny,
    language: Language,
    seed: u64,
    sink: &mut dyn LanguageSink,
) -> Result<Vec<(String, Language)>, SimulationError> {
    let mut results = Vec::new();
    for result in simulate(tree, language, seed) {
        let (name, language) = result?;
        sink.write_language(&name, &language)?;
        results.push((name, language));
    }
    Ok(results)
}
