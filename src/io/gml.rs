//! Reader for semantic networks stored as GML graphs.
//!
//! Nodes are keyed by their `label` (falling back to `id`), edges refer to
//! node ids, and the raw edge weight comes from a configurable attribute.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;
use tracing::debug;

use crate::error::NetworkError;
use crate::simulation::network::{ConceptWeight, NetworkBuilder, SemanticNetwork};

#[derive(Debug, Clone, PartialEq)]
enum Value {
    Text(String),
    List(Vec<(String, Value)>),
}

impl Value {
    fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(text) => Some(text),
            Value::List(_) => None,
        }
    }
}

fn token_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"\[|\]|"[^"]*"|[^\s\[\]"]+"#).expect("GML token pattern is valid")
    })
}

struct Tokens<'a> {
    tokens: Vec<&'a str>,
    pos: usize,
}

impl<'a> Tokens<'a> {
    fn error(&self, message: impl Into<String>) -> NetworkError {
        NetworkError::GmlSyntax {
            position: self.pos,
            message: message.into(),
        }
    }

    /// Reads `key value` pairs until a closing bracket or end of input.
    fn list(&mut self, nested: bool) -> Result<Vec<(String, Value)>, NetworkError> {
        let mut entries = Vec::new();
        loop {
            let Some(&key) = self.tokens.get(self.pos) else {
                if nested {
                    return Err(self.error("unexpected end of input, expected ']'"));
                }
                return Ok(entries);
            };
            self.pos += 1;
            if key == "]" {
                if nested {
                    return Ok(entries);
                }
                return Err(self.error("unbalanced ']'"));
            }
            let Some(&value) = self.tokens.get(self.pos) else {
                return Err(self.error(format!("missing value for key {:?}", key)));
            };
            self.pos += 1;
            let value = match value {
                "[" => Value::List(self.list(true)?),
                "]" => return Err(self.error(format!("missing value for key {:?}", key))),
                text => Value::Text(text.trim_matches('"').to_string()),
            };
            entries.push((key.to_string(), value));
        }
    }
}

/// Parses GML text into a semantic network.
pub fn parse_gml(
    text: &str,
    weight_attribute: &str,
    neighbor_factor: f64,
    concept_weight: ConceptWeight,
) -> Result<SemanticNetwork, NetworkError> {
    let mut tokens = Tokens {
        tokens: token_pattern()
            .find_iter(text)
            .map(|m| m.as_str())
            .collect(),
        pos: 0,
    };
    let document = tokens.list(false)?;
    let graph = document
        .iter()
        .find_map(|(key, value)| match (key.as_str(), value) {
            ("graph", Value::List(entries)) => Some(entries),
            _ => None,
        })
        .ok_or_else(|| tokens.error("no graph [...] block"))?;

    let mut builder = NetworkBuilder::new()
        .neighbor_factor(neighbor_factor)
        .concept_weight(concept_weight);
    let mut ids = HashMap::new();
    let mut edges = 0usize;

    for (key, value) in graph {
        let (key, Value::List(entries)) = (key.as_str(), value) else {
            continue;
        };
        let field = |name: &str| {
            entries
                .iter()
                .find(|(k, _)| k == name)
                .and_then(|(_, v)| v.as_text())
        };
        match key {
            "node" => {
                let id = field("id").ok_or_else(|| tokens.error("node without id"))?;
                let label = field("label").unwrap_or(id);
                let concept = builder.add_new_concept(label)?;
                ids.insert(id.to_string(), concept);
            }
            "edge" => {
                let endpoint = |name: &str| {
                    let id = field(name)
                        .ok_or_else(|| tokens.error(format!("edge without {}", name)))?;
                    ids.get(id)
                        .copied()
                        .ok_or_else(|| NetworkError::UnknownConcept(id.to_string()))
                };
                let source = endpoint("source")?;
                let target = endpoint("target")?;
                let raw_weight = match field(weight_attribute) {
                    Some(raw) => Some(raw.parse::<f64>().map_err(|_| {
                        tokens.error(format!("non-numeric {} {:?}", weight_attribute, raw))
                    })?),
                    None => None,
                };
                builder.add_edge(source, target, raw_weight)?;
                edges += 1;
            }
            _ => {}
        }
    }

    debug!(nodes = ids.len(), edges, "parsed GML network");
    builder.build()
}

/// Reads a GML semantic network from disk.
pub fn load_gml(
    path: &Path,
    weight_attribute: &str,
    neighbor_factor: f64,
    concept_weight: ConceptWeight,
) -> Result<SemanticNetwork, NetworkError> {
    let text = fs::read_to_string(path).map_err(|source| NetworkError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_gml(&text, weight_attribute, neighbor_factor, concept_weight)
}
