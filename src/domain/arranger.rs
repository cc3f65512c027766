//! Arrange flat joined rows into nested records following a [`JoinTree`].

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, trace};

use crate::domain::error::{DomainError, DomainResult};
use crate::domain::join::JoinTree;
use crate::domain::record::{RecordMap, RowIdentity};
use crate::domain::value::FlatRow;

/// What to do when a row has no data for an entity but does have data for
/// one of the entity's descendant joins.
///
/// There is no parent record to attach such data to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrphanPolicy {
    /// Fail the whole call with [`DomainError::OrphanedData`].
    #[default]
    Reject,
    /// Discard the descendant data.
    Drop,
}

/// Builds nested [`RecordMap`]s from flat rows.
///
/// Stateless apart from its policy; one arranger can serve any number of
/// join trees and threads.
#[derive(Debug, Clone, Copy, Default)]
pub struct RowArranger {
    orphan_policy: OrphanPolicy,
}

impl RowArranger {
    pub fn new(orphan_policy: OrphanPolicy) -> Self {
        Self { orphan_policy }
    }

    pub fn orphan_policy(&self) -> OrphanPolicy {
        self.orphan_policy
    }

    /// Arrange `rows` into a fresh map.
    pub fn arrange(&self, tree: &JoinTree, rows: &[FlatRow]) -> DomainResult<RecordMap> {
        self.arrange_into(tree, rows, RecordMap::new())
    }

    /// Arrange `rows` on top of an already arranged map.
    ///
    /// Identities already in `existing` keep their fields; new child data is
    /// merged under them. Rows are processed in order and new identities are
    /// appended in first-seen order.
    #[instrument(
        level = "debug",
        skip(self, tree, rows, existing),
        fields(entity = %tree.spec().entity(), rows = rows.len())
    )]
    pub fn arrange_into(
        &self,
        tree: &JoinTree,
        rows: &[FlatRow],
        existing: RecordMap,
    ) -> DomainResult<RecordMap> {
        tree.validate()?;
        let arranged = rows
            .iter()
            .try_fold(existing, |acc, row| self.arrange_row(tree, row, acc))?;
        debug!(entities = arranged.len(), "arranged rows");
        Ok(arranged)
    }

    /// Arrange independent batches in parallel, one result per batch in
    /// batch order.
    #[instrument(level = "debug", skip_all, fields(batches = batches.len()))]
    pub fn arrange_batches(
        &self,
        tree: &JoinTree,
        batches: &[Vec<FlatRow>],
    ) -> Vec<DomainResult<RecordMap>> {
        batches
            .par_iter()
            .map(|rows| self.arrange(tree, rows))
            .collect()
    }

    fn arrange_row(
        &self,
        tree: &JoinTree,
        row: &FlatRow,
        mut acc: RecordMap,
    ) -> DomainResult<RecordMap> {
        let Some(extracted) = tree.spec().extract(row)? else {
            self.check_orphans(tree, row)?;
            return Ok(acc);
        };

        let id = match extracted.identity {
            Some(key) => {
                let id = RowIdentity::Key(key);
                if !acc.insert_if_absent(id.clone(), extracted.fields) {
                    trace!(%id, "identity already arranged");
                }
                id
            }
            None => match acc.find_by_fields(&extracted.fields) {
                Some(id) => {
                    trace!(%id, "matched existing entry by value");
                    id
                }
                None => acc.push_positional(extracted.fields),
            },
        };

        if tree.is_leaf() {
            return Ok(acc);
        }
        if let Some(record) = acc.get_mut(&id) {
            for (join_id, child) in tree.children() {
                let joint = record.take_joint(join_id);
                let joint = self.arrange_row(child, row, joint)?;
                record.put_joint(join_id, joint);
            }
        }
        Ok(acc)
    }

    /// Apply the orphan policy to the descendants of an entity that has no
    /// data in `row`.
    fn check_orphans(&self, tree: &JoinTree, row: &FlatRow) -> DomainResult<()> {
        if tree.is_leaf() {
            return Ok(());
        }
        match self.orphan_policy {
            OrphanPolicy::Drop => {
                trace!(entity = %tree.spec().entity(), "ignoring descendants of absent entity");
                Ok(())
            }
            OrphanPolicy::Reject => {
                for (join_id, child) in tree.children() {
                    if has_live_data(child, row)? {
                        return Err(DomainError::OrphanedData {
                            entity: tree.spec().entity(),
                            join: join_id.to_string(),
                        });
                    }
                }
                Ok(())
            }
        }
    }
}

/// Whether `tree` or any of its descendants has data in `row`.
fn has_live_data(tree: &JoinTree, row: &FlatRow) -> DomainResult<bool> {
    if tree.spec().extract(row)?.is_some() {
        return Ok(true);
    }
    for (_, child) in tree.children() {
        if has_live_data(child, row)? {
            return Ok(true);
        }
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::join::JoinSpec;
    use crate::domain::value::Value;

    fn three_levels() -> JoinTree {
        JoinTree::new(JoinSpec::tabular("a")).with_join(
            "b",
            JoinTree::new(JoinSpec::tabular("b")).with_join("c", JoinTree::new(JoinSpec::tabular("c"))),
        )
    }

    fn orphan_row() -> FlatRow {
        FlatRow::new()
            .with("a_t_id", 1)
            .with("b_t_id", Value::Null)
            .with("c_t_id", 7)
    }

    #[test]
    fn given_orphaned_grandchild_when_reject_then_errors() {
        let err = RowArranger::new(OrphanPolicy::Reject)
            .arrange(&three_levels(), &[orphan_row()])
            .unwrap_err();
        assert_eq!(
            err,
            DomainError::OrphanedData {
                entity: "b".to_string(),
                join: "c".to_string()
            }
        );
    }

    #[test]
    fn given_orphaned_grandchild_when_drop_then_parent_kept_without_joint_data() {
        let out = RowArranger::new(OrphanPolicy::Drop)
            .arrange(&three_levels(), &[orphan_row()])
            .unwrap();
        assert_eq!(out.len(), 1);
        assert!(!out.get_key("1").unwrap().has_joint_data());
    }

    #[test]
    fn given_existing_accumulator_when_arranging_then_merges_children() {
        let tree = JoinTree::new(JoinSpec::tabular("a")).with_join("b", JoinTree::new(JoinSpec::tabular("b")));
        let arranger = RowArranger::default();
        let first = arranger
            .arrange(&tree, &[FlatRow::new().with("a_t_id", 1).with("b_t_id", 1)])
            .unwrap();
        let merged = arranger
            .arrange_into(&tree, &[FlatRow::new().with("a_t_id", 1).with("b_t_id", 2)], first)
            .unwrap();

        let b = merged.get_key("1").unwrap().joint("b").unwrap();
        assert_eq!(b.keys().map(|k| k.to_string()).collect::<Vec<_>>(), vec!["1", "2"]);
    }
}
