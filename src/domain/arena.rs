use generational_arena::{Arena, Index};
use std::fmt;
use termtree::Tree;
use tracing::instrument;

use crate::domain::value::Fields;

/// Tree node in the arena-based hierarchy structure.
#[derive(Debug)]
pub struct TreeNode {
    /// Row payload for this node, bound fields removed
    pub value: Fields,
    /// Index of parent node in the arena, None for the root
    pub parent: Option<Index>,
    /// Indices of child nodes in the arena, in row order
    pub children: Vec<Index>,
}

/// Arena-based ordered n-ary tree.
///
/// Uses generational arena for memory-safe node references and O(1) lookups.
/// Nodes are only ever added, so every index handed out stays valid for the
/// lifetime of the tree.
#[derive(Debug)]
pub struct TreeArena {
    /// Label of the whole tree
    name: String,
    /// Arena storage for all tree nodes
    arena: Arena<TreeNode>,
    /// Index of the root node, None for empty trees
    root: Option<Index>,
}

impl TreeArena {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            arena: Arena::new(),
            root: None,
        }
    }

    /// Add a node as the last child of `parent`, or as the root when
    /// `parent` is None.
    #[instrument(level = "trace", skip(self, value))]
    pub fn insert_node(&mut self, value: Fields, parent: Option<Index>) -> Index {
        let node = TreeNode {
            value,
            parent,
            children: Vec::new(),
        };
        let node_idx = self.arena.insert(node);

        if let Some(parent_idx) = parent {
            if let Some(parent) = self.arena.get_mut(parent_idx) {
                parent.children.push(node_idx);
            }
        } else {
            self.root = Some(node_idx);
        }

        node_idx
    }

    pub fn get_node(&self, idx: Index) -> Option<&TreeNode> {
        self.arena.get(idx)
    }

    pub fn root(&self) -> Option<Index> {
        self.root
    }

    pub fn root_node(&self) -> Option<&TreeNode> {
        self.root.and_then(|idx| self.get_node(idx))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.arena.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arena.is_empty()
    }

    /// Direct children of `idx`, in order.
    pub fn children(&self, idx: Index) -> impl Iterator<Item = &TreeNode> + '_ {
        self.get_node(idx)
            .into_iter()
            .flat_map(|node| node.children.iter())
            .filter_map(move |&child| self.get_node(child))
    }

    /// Pre-order traversal; every call starts a fresh walk from the root.
    pub fn iter(&self) -> Walk<'_> {
        Walk::new(self, WalkOrder::Pre)
    }

    /// Post-order traversal, children before their parent.
    pub fn iter_postorder(&self) -> Walk<'_> {
        Walk::new(self, WalkOrder::Post)
    }

    #[instrument(level = "debug", skip(self))]
    pub fn depth(&self) -> usize {
        if let Some(root) = self.root {
            self.calculate_depth(root)
        } else {
            0
        }
    }

    fn calculate_depth(&self, node_idx: Index) -> usize {
        if let Some(node) = self.get_node(node_idx) {
            1 + node
                .children
                .iter()
                .map(|&child| self.calculate_depth(child))
                .max()
                .unwrap_or(0)
        } else {
            0
        }
    }

    /// Collects all leaf nodes (nodes with no children), left to right.
    pub fn leaf_nodes(&self) -> Vec<&TreeNode> {
        self.iter()
            .filter(|(_, node)| node.children.is_empty())
            .map(|(_, node)| node)
            .collect()
    }

    /// Text rendering of the tree; the root is shown by the tree name.
    pub fn to_tree_string(&self) -> Tree<String> {
        fn build_tree(arena: &TreeArena, node_idx: Index, parent_tree: &mut Tree<String>) {
            for &child_idx in arena.get_node(node_idx).map(|n| n.children.as_slice()).unwrap_or(&[]) {
                if let Some(child) = arena.get_node(child_idx) {
                    let mut child_tree = Tree::new(child.value.to_string());
                    build_tree(arena, child_idx, &mut child_tree);
                    parent_tree.push(child_tree);
                }
            }
        }

        let mut tree = Tree::new(self.name.clone());
        if let Some(root_idx) = self.root {
            build_tree(self, root_idx, &mut tree);
        }
        tree
    }
}

impl fmt::Display for TreeArena {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_tree_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkOrder {
    Pre,
    Post,
}

/// Depth-first walk over a [`TreeArena`], left to right.
///
/// Stack entries carry whether their children have been expanded already;
/// only post-order revisits a node after its subtree.
pub struct Walk<'a> {
    tree: &'a TreeArena,
    order: WalkOrder,
    pending: Vec<(Index, bool)>,
}

impl<'a> Walk<'a> {
    fn new(tree: &'a TreeArena, order: WalkOrder) -> Self {
        Self {
            tree,
            order,
            pending: tree.root().map(|root| (root, false)).into_iter().collect(),
        }
    }

    fn expand(&mut self, node: &TreeNode) {
        self.pending
            .extend(node.children.iter().rev().map(|&child| (child, false)));
    }
}

impl<'a> Iterator for Walk<'a> {
    type Item = (Index, &'a TreeNode);

    fn next(&mut self) -> Option<Self::Item> {
        while let Some((idx, expanded)) = self.pending.pop() {
            let Some(node) = self.tree.get_node(idx) else {
                continue;
            };
            if expanded {
                return Some((idx, node));
            }
            match self.order {
                WalkOrder::Pre => {
                    self.expand(node);
                    return Some((idx, node));
                }
                WalkOrder::Post => {
                    self.pending.push((idx, true));
                    self.expand(node);
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::value::FlatRow;

    fn named(name: &str) -> Fields {
        FlatRow::new().with("name", name)
    }

    //      root
    //      /  \
    //     a    b
    //     |
    //     c
    fn sample() -> TreeArena {
        let mut tree = TreeArena::new("sample");
        let root = tree.insert_node(named("root"), None);
        let a = tree.insert_node(named("a"), Some(root));
        tree.insert_node(named("b"), Some(root));
        tree.insert_node(named("c"), Some(a));
        tree
    }

    fn names<'a>(nodes: impl Iterator<Item = &'a TreeNode>) -> Vec<String> {
        nodes
            .map(|n| n.value.get("name").map(|v| v.to_string()).unwrap_or_default())
            .collect()
    }

    #[test]
    fn given_tree_when_iterating_twice_then_same_preorder() {
        let tree = sample();
        let first = names(tree.iter().map(|(_, n)| n));
        let second = names(tree.iter().map(|(_, n)| n));
        assert_eq!(first, vec!["root", "a", "c", "b"]);
        assert_eq!(first, second);
    }

    #[test]
    fn given_tree_when_postorder_then_children_first() {
        let tree = sample();
        assert_eq!(
            names(tree.iter_postorder().map(|(_, n)| n)),
            vec!["c", "a", "b", "root"]
        );
    }

    #[test]
    fn given_tree_when_depth_and_leaves_then_match_shape() {
        let tree = sample();
        assert_eq!(tree.depth(), 3);
        assert_eq!(tree.len(), 4);
        assert_eq!(names(tree.leaf_nodes().into_iter()), vec!["c", "b"]);
        let root = tree.root().unwrap();
        assert_eq!(names(tree.children(root)), vec!["a", "b"]);
    }

    #[test]
    fn given_tree_when_displayed_then_shows_name_and_payloads() {
        let rendered = sample().to_string();
        assert!(rendered.starts_with("sample"));
        assert!(rendered.contains("{name=c}"));
    }
}
