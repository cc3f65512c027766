//! Rebuild hierarchies from flattened rows.
//!
//! Two independent engines live in [`domain`]:
//!
//! - [`RowArranger`] turns denormalised rows from relational joins into nested
//!   records, following a declarative [`JoinTree`].
//! - [`IntervalTreeBuilder`] rebuilds an ordered tree from rows carrying
//!   nested-interval (MPTT) bounds.
//!
//! ```
//! use rowtree::{FlatRow, JoinSpec, JoinTree, RowArranger};
//!
//! let tree = JoinTree::new(JoinSpec::tabular("product"))
//!     .with_join("image", JoinTree::new(JoinSpec::tabular("image")));
//! let rows = vec![
//!     FlatRow::new()
//!         .with("product_t_id", 3)
//!         .with("product_t_name", "P_Three")
//!         .with("image_t_id", 2)
//!         .with("image_t_name", "I_One.png"),
//! ];
//!
//! let arranged = RowArranger::default().arrange(&tree, &rows)?;
//! let images = arranged.get_key("3").and_then(|p| p.joint("image"));
//! assert_eq!(images.map(|m| m.len()), Some(1));
//! # Ok::<(), rowtree::DomainError>(())
//! ```

pub mod config;
pub mod domain;
pub mod errors;
pub mod util;

pub use config::Settings;
pub use domain::{
    DomainError, DomainResult, FlatRow, HierRecord, IntervalTreeBuilder, JoinSpec, JoinTree,
    OrphanPolicy, RecordMap, RowArranger, RowIdentity, TreeArena, TreeNode, Value, WidthPolicy,
};
pub use errors::{RowTreeError, RowTreeResult};
