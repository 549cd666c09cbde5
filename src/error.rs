//! Error types for the lexical simulation.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Problems building or sampling from a semantic network.
#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("unknown concept: {0}")]
    UnknownConcept(String),

    #[error("duplicate concept: {0}")]
    DuplicateConcept(String),

    #[error("neighbor factor must be finite and non-negative, got {0}")]
    InvalidNeighborFactor(f64),

    #[error("edge weight between {a} and {b} must be finite and non-negative, got {weight}")]
    InvalidEdgeWeight { a: String, b: String, weight: f64 },

    /// Fewer than two concepts carry positive weight, so two distinct
    /// concepts can never be drawn.
    #[error("degenerate semantic network: {weighted} of {total} concepts carry positive weight, need at least 2")]
    Degenerate { weighted: usize, total: usize },

    #[error("GML syntax error at token {position}: {message}")]
    GmlSyntax { position: usize, message: String },

    #[error("failed to read semantic network {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Problems reading or validating a phylogeny.
#[derive(Debug, Error)]
pub enum PhylogenyError {
    #[error("Newick syntax error at byte {position}: {message}")]
    Syntax { position: usize, message: String },

    #[error("invalid branch length {length:?} for node {node:?}")]
    InvalidLength { node: String, length: String },

    #[error("duplicate node name: {0}")]
    DuplicateName(String),

    #[error("unnamed node (child {index} of {parent:?})")]
    UnnamedNode { parent: Option<String>, index: usize },

    #[error("failed to read tree {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Problems reading or writing a wordlist.
#[derive(Debug, Error)]
pub enum WordlistError {
    #[error("wordlist I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("wordlist line {line}: {message}")]
    Malformed { line: usize, message: String },

    #[error("wordlist is missing column {0}")]
    MissingColumn(&'static str),

    #[error("wordlist line {line}: concept {concept:?} is not in the semantic network")]
    UnknownConcept { line: usize, concept: String },

    #[error("wordlist mentions language {0:?}, which is not a node of the tree")]
    UnknownLanguage(String),

    #[error("wordlist line {line}: rows of {language:?} are not closed by an end-of-node marker")]
    IncompleteBlock { line: usize, language: String },

    #[error("wordlist contains no language {0:?}")]
    MissingLanguage(String),

    #[error("wordlist contains no records")]
    Empty,

    #[error("invalid weight distribution {0:?}")]
    InvalidDistribution(String),
}

/// Problems raised while running a simulation.
#[derive(Debug, Error)]
pub enum SimulationError {
    #[error("language for {0:?} was already generated (duplicate node name)")]
    DuplicatePublish(String),

    #[error("node {0:?} has no name; concurrent simulation needs unique node names")]
    UnnamedNode(String),

    #[error("ancestor {ancestor:?} of {node:?} is neither generated nor scheduled")]
    MissingAncestor { node: String, ancestor: String },

    #[error("timed out after {waited:?} waiting for ancestor {ancestor:?} of {node:?}")]
    AncestorTimeout {
        node: String,
        ancestor: String,
        waited: Duration,
    },

    #[error("simulation aborted because another worker failed")]
    Aborted,

    #[error("cannot draw an edge from an empty language")]
    EmptyLanguage,

    #[error("worker thread panicked")]
    WorkerPanicked,

    #[error(transparent)]
    Phylogeny(#[from] PhylogenyError),

    #[error(transparent)]
    Network(#[from] NetworkError),

    #[error(transparent)]
    Wordlist(#[from] WordlistError),
}

/// Problems loading the run configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path:?}: {source}. Please ensure it exists.")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}
