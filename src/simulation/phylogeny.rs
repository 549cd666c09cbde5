//! Rooted phylogenies and the depth-ordered walk used for scheduling.

use std::collections::HashSet;
use std::fmt::Write as _;

use crate::error::PhylogenyError;

/// Index of a node inside its [`Phylogeny`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PhylogenyNode {
    pub name: Option<String>,
    /// Branch length from the ancestor; its integer part is the number of
    /// mutation steps applied along the branch.
    pub length: f64,
    pub ancestor: Option<NodeId>,
    pub children: Vec<NodeId>,
}

impl PhylogenyNode {
    pub fn steps(&self) -> usize {
        if self.length.is_finite() && self.length > 0.0 {
            self.length.trunc() as usize
        } else {
            0
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }
}

/// A rooted tree stored as an arena. The root is always node 0.
#[derive(Debug, Clone, PartialEq)]
pub struct Phylogeny {
    nodes: Vec<PhylogenyNode>,
}

impl Phylogeny {
    pub fn new(root_name: Option<&str>, root_length: f64) -> Self {
        Phylogeny {
            nodes: vec![PhylogenyNode {
                name: clean_name(root_name),
                length: root_length,
                ancestor: None,
                children: Vec::new(),
            }],
        }
    }

    /// Appends a child; children keep their insertion order.
    pub fn add_child(&mut self, parent: NodeId, name: Option<&str>, length: f64) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(PhylogenyNode {
            name: clean_name(name),
            length,
            ancestor: Some(parent),
            children: Vec::new(),
        });
        self.nodes[parent.0].children.push(id);
        id
    }

    /// A single long branch with nodes after 0, 1, 2, 4, …, 2^`exponent`
    /// steps, each named by its distance from the root.
    pub fn long_branch(exponent: u32) -> Self {
        let mut tree = Phylogeny::new(Some("0"), 0.0);
        let mut parent = tree.root();
        let mut previous = 0u64;
        for i in 0..=exponent.min(62) {
            let distance = 1u64 << i;
            parent = tree.add_child(
                parent,
                Some(&distance.to_string()),
                (distance - previous) as f64,
            );
            previous = distance;
        }
        tree
    }

    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    pub fn node(&self, id: NodeId) -> &PhylogenyNode {
        &self.nodes[id.0]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> {
        (0..self.nodes.len()).map(NodeId)
    }

    pub fn find(&self, name: &str) -> Option<NodeId> {
        self.node_ids()
            .find(|&id| self.node(id).name() == Some(name))
    }

    /// Names of all named nodes.
    pub fn names(&self) -> HashSet<&str> {
        self.nodes.iter().filter_map(PhylogenyNode::name).collect()
    }

    /// Name of the ancestor of `id`, `None` for the root.
    pub fn ancestor_name(&self, id: NodeId) -> Option<&str> {
        self.node(id)
            .ancestor
            .and_then(|ancestor| self.node(ancestor).name())
    }

    /// Named nodes must not share a name; unnamed nodes are allowed.
    pub fn check_unique_names(&self) -> Result<(), PhylogenyError> {
        let mut seen = HashSet::new();
        for name in self.nodes.iter().filter_map(PhylogenyNode::name) {
            if !seen.insert(name) {
                return Err(PhylogenyError::DuplicateName(name.to_string()));
            }
        }
        Ok(())
    }

    /// Every node must carry a unique, non-empty name, since names key
    /// the generated languages.
    pub fn validate_names(&self) -> Result<(), PhylogenyError> {
        let mut seen = HashSet::new();
        for id in self.node_ids() {
            let node = self.node(id);
            let Some(name) = node.name() else {
                let (parent, index) = match node.ancestor {
                    Some(parent) => (
                        self.node(parent).name.clone(),
                        self.node(parent)
                            .children
                            .iter()
                            .position(|&child| child == id)
                            .unwrap_or(0),
                    ),
                    None => (None, 0),
                };
                return Err(PhylogenyError::UnnamedNode { parent, index });
            };
            if !seen.insert(name) {
                return Err(PhylogenyError::DuplicateName(name.to_string()));
            }
        }
        Ok(())
    }

    /// Nodes by ascending cumulative depth from the root.
    pub fn depth_order(&self) -> DepthOrder<'_> {
        DepthOrder::new(self, self.root(), 0.0)
    }

    /// Newick rendering, used to echo the tree into output files.
    pub fn to_newick(&self) -> String {
        let mut out = String::new();
        self.write_newick(self.root(), &mut out);
        out.push(';');
        out
    }

    fn write_newick(&self, id: NodeId, out: &mut String) {
        let node = self.node(id);
        if !node.children.is_empty() {
            out.push('(');
            for (i, &child) in node.children.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                self.write_newick(child, out);
            }
            out.push(')');
        }
        if let Some(name) = node.name() {
            out.push_str(name);
        }
        if node.length != 0.0 {
            let _ = write!(out, ":{}", node.length);
        }
    }
}

fn clean_name(name: Option<&str>) -> Option<String> {
    name.map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
}

/// Lazy k-way merge over the depth-ordered walks of each subtree.
///
/// A node is yielded before any of its descendants, and among pending
/// subtrees the lowest depth goes first; equal depths go to the subtree
/// discovered first.
pub struct DepthOrder<'a> {
    tree: &'a Phylogeny,
    start: Option<(NodeId, f64)>,
    heads: Vec<((NodeId, f64), DepthOrder<'a>)>,
}

impl<'a> DepthOrder<'a> {
    fn new(tree: &'a Phylogeny, node: NodeId, depth: f64) -> Self {
        DepthOrder {
            tree,
            start: Some((node, depth)),
            heads: Vec::new(),
        }
    }
}

impl Iterator for DepthOrder<'_> {
    type Item = (NodeId, f64);

    fn next(&mut self) -> Option<Self::Item> {
        if let Some((node, depth)) = self.start.take() {
            for &child in &self.tree.node(node).children {
                let child_depth = depth + self.tree.node(child).length;
                let mut walker = DepthOrder::new(self.tree, child, child_depth);
                if let Some(head) = walker.next() {
                    self.heads.push((head, walker));
                }
            }
            return Some((node, depth));
        }

        let mut lowest: Option<usize> = None;
        for (i, ((_, depth), _)) in self.heads.iter().enumerate() {
            if lowest.map_or(true, |j| *depth < self.heads[j].0 .1) {
                lowest = Some(i);
            }
        }
        let i = lowest?;
        let result = self.heads[i].0;
        match self.heads[i].1.next() {
            Some(next) => self.heads[i].0 = next,
            None => {
                self.heads.remove(i);
            }
        }
        Some(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::newick::parse_newick;

    fn names(tree: &Phylogeny) -> Vec<String> {
        tree.depth_order()
            .map(|(id, _)| tree.node(id).name().unwrap_or("").to_string())
            .collect()
    }

    #[test]
    fn depth_order_merges_subtrees() {
        let tree = parse_newick(
            "((((A:1.9,B:1.8)K:5,(C:4.7,D:4.6)N:2)P:1,(E:2.5,F:2.4)L:5)Q:2,\
             ((G:5.3,H:5.2)O:3,(I:3.1,J:3.0)M:5)R:1)S;",
        )
        .unwrap();
        assert_eq!(
            names(&tree),
            vec![
                "S", "R", "Q", "P", "O", "N", "M", "L", "K", "J", "I", "H", "G", "F", "E", "D",
                "C", "B", "A"
            ]
        );
    }

    #[test]
    fn depth_order_ties_prefer_first_subtree() {
        let tree = parse_newick("((A:1,B:1)X:1,(C:1,D:1)Y:1)R;").unwrap();
        assert_eq!(names(&tree), vec!["R", "X", "Y", "A", "B", "C", "D"]);
    }

    #[test]
    fn depth_order_yields_ancestors_first() {
        let tree = parse_newick("((A:0,B:3)X:0,C:0)R:0;").unwrap();
        let order: Vec<NodeId> = tree.depth_order().map(|(id, _)| id).collect();
        assert_eq!(order.len(), tree.len());
        for (position, &id) in order.iter().enumerate() {
            if let Some(ancestor) = tree.node(id).ancestor {
                let ancestor_position = order.iter().position(|&o| o == ancestor).unwrap();
                assert!(ancestor_position < position);
            }
        }
    }

    #[test]
    fn depths_accumulate_branch_lengths() {
        let tree = parse_newick("(A:2,B:3)C:2;").unwrap();
        let depths: Vec<(String, f64)> = tree
            .depth_order()
            .map(|(id, depth)| (tree.node(id).name().unwrap().to_string(), depth))
            .collect();
        assert_eq!(
            depths,
            vec![
                ("C".to_string(), 0.0),
                ("A".to_string(), 2.0),
                ("B".to_string(), 3.0)
            ]
        );
    }

    #[test]
    fn long_branch_shape() {
        let tree = Phylogeny::long_branch(3);
        let order: Vec<(String, usize)> = tree
            .depth_order()
            .map(|(id, _)| (tree.node(id).name().unwrap().to_string(), tree.node(id).steps()))
            .collect();
        assert_eq!(
            order,
            vec![
                ("0".to_string(), 0),
                ("1".to_string(), 1),
                ("2".to_string(), 1),
                ("4".to_string(), 2),
                ("8".to_string(), 4)
            ]
        );
    }

    #[test]
    fn steps_truncate_lengths() {
        let tree = parse_newick("(A:2.9,B:0.5)C;").unwrap();
        assert_eq!(tree.node(tree.find("A").unwrap()).steps(), 2);
        assert_eq!(tree.node(tree.find("B").unwrap()).steps(), 0);
    }

    #[test]
    fn name_validation() {
        assert!(parse_newick("(A:1,B:1)C;").unwrap().validate_names().is_ok());
        assert!(matches!(
            parse_newick("(A:1,A:1)C;").unwrap().validate_names(),
            Err(PhylogenyError::DuplicateName(name)) if name == "A"
        ));
        assert!(matches!(
            parse_newick("(A:1,:1)C;").unwrap().validate_names(),
            Err(PhylogenyError::UnnamedNode { index: 1, .. })
        ));
    }

    #[test]
    fn newick_rendering() {
        let tree = parse_newick("(A:2,B:2)C:2;").unwrap();
        assert_eq!(tree.to_newick(), "(A:2,B:2)C:2;");
    }
}
