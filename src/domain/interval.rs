//! Rebuild an ordered tree from nested-interval (MPTT) rows.
//!
//! Rows arrive in pre-order, each carrying a left and right bound. A node
//! with bounds `(l, r)` has `(r - l - 1) / 2` descendants, so the builder
//! only needs to count: every new row is a child of the innermost interval
//! that still has descendants outstanding.

use generational_arena::Index;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, trace};

use crate::domain::arena::TreeArena;
use crate::domain::error::{DomainError, DomainResult};
use crate::domain::value::{Fields, FlatRow, Value};

pub const DEFAULT_LEFT: &str = "lft";
pub const DEFAULT_RIGHT: &str = "rgt";

/// How interval widths are turned into descendant counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WidthPolicy {
    /// Every interval must enclose an even number of inner slots.
    #[default]
    Strict,
    /// Odd inner widths are rounded down.
    Truncate,
}

#[derive(Debug, Clone)]
pub struct IntervalTreeBuilder {
    left: String,
    right: String,
    width_policy: WidthPolicy,
}

impl Default for IntervalTreeBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_LEFT, DEFAULT_RIGHT)
    }
}

impl IntervalTreeBuilder {
    pub fn new(left: impl Into<String>, right: impl Into<String>) -> Self {
        Self {
            left: left.into(),
            right: right.into(),
            width_policy: WidthPolicy::default(),
        }
    }

    pub fn with_width_policy(mut self, policy: WidthPolicy) -> Self {
        self.width_policy = policy;
        self
    }

    /// Build the tree named `name` from pre-ordered interval rows.
    ///
    /// Row 0 is the root. Bound fields are removed from every node's value.
    /// Nothing is returned on failure.
    #[instrument(level = "debug", skip(self, rows), fields(rows = rows.len()))]
    pub fn build(&self, name: &str, rows: &[FlatRow]) -> DomainResult<TreeArena> {
        let root_row = rows.first().ok_or(DomainError::EmptyInput)?;
        let (root_value, root_descendants) = self.split_bounds(0, root_row)?;

        let mut tree = TreeArena::new(name);
        let root = tree.insert_node(root_value, None);

        // Open intervals, innermost last, with their outstanding descendants
        let mut open: Vec<(Index, usize)> = Vec::new();
        if root_descendants > 0 {
            open.push((root, root_descendants));
        }

        for (row_no, row) in rows.iter().enumerate().skip(1) {
            let (value, descendants) = self.split_bounds(row_no, row)?;
            let &(parent, _) = open.last().ok_or_else(|| DomainError::UnbalancedInterval {
                row: row_no,
                reason: "row lies outside every open interval".to_string(),
            })?;

            let node = tree.insert_node(value, Some(parent));
            for level in open.iter_mut() {
                level.1 -= 1;
            }

            let room = open.last().map(|&(_, remaining)| remaining).unwrap_or(0);
            if descendants > room {
                return Err(DomainError::UnbalancedInterval {
                    row: row_no,
                    reason: format!(
                        "claims {descendants} descendant(s) but its parent has room for {room}"
                    ),
                });
            }

            while open.last().is_some_and(|&(_, remaining)| remaining == 0) {
                open.pop();
            }
            if descendants > 0 {
                open.push((node, descendants));
            }
            trace!(row = row_no, depth = open.len(), "placed node");
        }

        if let Some(&(_, remaining)) = open.last() {
            return Err(DomainError::UnbalancedInterval {
                row: rows.len(),
                reason: format!("input ended with {remaining} descendant(s) missing"),
            });
        }

        debug!(nodes = tree.len(), depth = tree.depth(), "built tree");
        Ok(tree)
    }

    /// Split a row into its payload and its descendant count.
    fn split_bounds(&self, row_no: usize, row: &FlatRow) -> DomainResult<(Fields, usize)> {
        let mut value = row.clone();
        let left = take_bound(row_no, &mut value, &self.left)?;
        let right = take_bound(row_no, &mut value, &self.right)?;

        if left >= right {
            return Err(DomainError::InvalidBounds {
                row: row_no,
                reason: format!("{}={left} is not below {}={right}", self.left, self.right),
            });
        }
        let inner = right.abs_diff(left) - 1;
        if self.width_policy == WidthPolicy::Strict && inner % 2 != 0 {
            return Err(DomainError::InvalidBounds {
                row: row_no,
                reason: format!("interval {left}..{right} has an odd inner width"),
            });
        }
        let descendants = usize::try_from(inner / 2).map_err(|e| DomainError::InvalidBounds {
            row: row_no,
            reason: e.to_string(),
        })?;
        Ok((value, descendants))
    }
}

fn take_bound(row_no: usize, value: &mut Fields, field: &str) -> DomainResult<i64> {
    match value.remove(field) {
        None | Some(Value::Null) => Err(DomainError::MissingBounds {
            row: row_no,
            field: field.to_string(),
        }),
        Some(bound) => bound.as_i64().ok_or_else(|| DomainError::InvalidBounds {
            row: row_no,
            reason: format!("{field}={bound} is not an integer"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(name: &str, lft: i64, rgt: i64) -> FlatRow {
        FlatRow::new().with("name", name).with("lft", lft).with("rgt", rgt)
    }

    #[test]
    fn given_odd_width_when_strict_then_invalid_bounds() {
        let rows = vec![node("root", 1, 5), node("a", 2, 3)];
        let err = IntervalTreeBuilder::default().build("t", &rows).unwrap_err();
        assert!(matches!(err, DomainError::InvalidBounds { row: 0, .. }));
    }

    #[test]
    fn given_odd_width_when_truncate_then_rounds_down() {
        let rows = vec![node("root", 1, 5), node("a", 2, 3)];
        let tree = IntervalTreeBuilder::default()
            .with_width_policy(WidthPolicy::Truncate)
            .build("t", &rows)
            .unwrap();
        assert_eq!(tree.len(), 2);
        assert_eq!(tree.depth(), 2);
    }

    #[test]
    fn given_text_bounds_when_building_then_parsed() {
        let rows = vec![FlatRow::new().with("lft", "1").with("rgt", "2")];
        let tree = IntervalTreeBuilder::default().build("t", &rows).unwrap();
        assert!(tree.root_node().unwrap().value.is_empty());
    }

    #[test]
    fn given_child_wider_than_parent_when_building_then_unbalanced() {
        // a claims two descendants but root only has room for one more
        let rows = vec![node("root", 1, 6), node("a", 2, 7)];
        let err = IntervalTreeBuilder::default()
            .with_width_policy(WidthPolicy::Truncate)
            .build("t", &rows)
            .unwrap_err();
        assert!(matches!(err, DomainError::UnbalancedInterval { row: 1, .. }));
    }
}
