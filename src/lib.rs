//! Stochastic simulation of lexical change down a phylogeny.
//!
//! A language associates the concepts of a semantic network with words.
//! Each step strengthens some associations, lets words spread to related
//! concepts and weakens others; the number of steps along a branch is its
//! length. Simulations run sequentially or on a pool of workers and give
//! the same result either way.

pub mod config;
pub mod error;
pub mod initial;
pub mod io {
    pub mod gml;
    pub mod newick;
    pub mod wordlist;
}
pub mod simulation {
    pub mod coordinator;
    pub mod driver;
    pub mod language;
    pub mod network;
    pub mod phylogeny;
    pub mod seeding;
}

pub use error::{ConfigError, NetworkError, PhylogenyError, SimulationError, WordlistError};
pub use simulation::coordinator::{Coordinator, GeneratedLanguages};
pub use simulation::language::{Language, WordId};
pub use simulation::network::{ConceptId, ConceptWeight, SemanticNetwork};
pub use simulation::phylogeny::Phylogeny;
