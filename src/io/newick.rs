//! Reader for trees in Newick format, e.g. `(A:2,B:2)C:2;`.
//!
//! Supports unquoted labels, optional branch lengths and `[...]`
//! comments. A missing branch length counts as 0.

use std::fs;
use std::path::Path;

use crate::error::PhylogenyError;
use crate::simulation::phylogeny::{NodeId, Phylogeny};

struct RawNode {
    name: Option<String>,
    length: f64,
    children: Vec<RawNode>,
}

struct Parser<'a> {
    text: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn error(&self, message: impl Into<String>) -> PhylogenyError {
        PhylogenyError::Syntax {
            position: self.pos,
            message: message.into(),
        }
    }

    fn peek(&self) -> Option<char> {
        self.text[self.pos..].chars().next()
    }

    fn skip_blank(&mut self) -> Result<(), PhylogenyError> {
        loop {
            match self.peek() {
                Some(c) if c.is_whitespace() => self.pos += c.len_utf8(),
                Some('[') => match self.text[self.pos..].find(']') {
                    Some(end) => self.pos += end + 1,
                    None => return Err(self.error("unterminated comment")),
                },
                _ => return Ok(()),
            }
        }
    }

    fn label(&mut self) -> &'a str {
        let text: &'a str = self.text;
        let rest = &text[self.pos..];
        let end = rest
            .find(|c: char| matches!(c, '(' | ')' | ',' | ':' | ';' | '['))
            .unwrap_or(rest.len());
        self.pos += end;
        rest[..end].trim()
    }

    fn subtree(&mut self) -> Result<RawNode, PhylogenyError> {
        self.skip_blank()?;
        let mut children = Vec::new();
        if self.peek() == Some('(') {
            self.pos += 1;
            loop {
                children.push(self.subtree()?);
                self.skip_blank()?;
                match self.peek() {
                    Some(',') => self.pos += 1,
                    Some(')') => {
                        self.pos += 1;
                        break;
                    }
                    _ => return Err(self.error("expected ',' or ')'")),
                }
            }
        }
        self.skip_blank()?;
        let name = self.label();
        let name = (!name.is_empty()).then(|| name.to_string());
        self.skip_blank()?;

        let mut length = 0.0;
        if self.peek() == Some(':') {
            self.pos += 1;
            self.skip_blank()?;
            let raw = self.label();
            length = match raw.parse::<f64>() {
                Ok(value) if value.is_finite() && value >= 0.0 => value,
                _ => {
                    return Err(PhylogenyError::InvalidLength {
                        node: name.clone().unwrap_or_default(),
                        length: raw.to_string(),
                    })
                }
            };
        }
        Ok(RawNode {
            name,
            length,
            children,
        })
    }
}

fn attach(tree: &mut Phylogeny, parent: NodeId, raw: RawNode) {
    let id = tree.add_child(parent, raw.name.as_deref(), raw.length);
    for child in raw.children {
        attach(tree, id, child);
    }
}

/// Parses the first tree of a Newick string.
pub fn parse_newick(text: &str) -> Result<Phylogeny, PhylogenyError> {
    let mut parser = Parser { text, pos: 0 };
    let raw = parser.subtree()?;
    parser.skip_blank()?;
    match parser.peek() {
        Some(';') | None => {}
        Some(other) => return Err(parser.error(format!("unexpected {:?}", other))),
    }

    let mut tree = Phylogeny::new(raw.name.as_deref(), raw.length);
    let root = tree.root();
    for child in raw.children {
        attach(&mut tree, root, child);
    }
    Ok(tree)
}

/// Reads a tree from `source`, which is either a path to a Newick file or a
/// Newick string.
pub fn load_tree(source: &str) -> Result<Phylogeny, PhylogenyError> {
    let path = Path::new(source);
    if path.is_file() {
        let text = fs::read_to_string(path).map_err(|source| PhylogenyError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        return parse_newick(&text);
    }
    if source.contains(':') || source.contains('(') {
        return parse_newick(source);
    }
    Err(PhylogenyError::Io {
        path: path.to_path_buf(),
        source: std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "looks like a file name, not a Newick tree, but no such file exists",
        ),
    })
}
