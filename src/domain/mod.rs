//! Domain layer: hierarchy reconstruction from flat rows
//!
//! This layer is independent of external concerns (no I/O, no config loading).

pub mod arena;
pub mod arranger;
pub mod error;
pub mod interval;
pub mod join;
pub mod record;
pub mod value;

pub use arena::{TreeArena, TreeNode};
pub use arranger::{OrphanPolicy, RowArranger};
pub use error::{DomainError, DomainResult};
pub use interval::{IntervalTreeBuilder, WidthPolicy};
pub use join::{Extracted, Extraction, JoinSpec, JoinTree};
pub use record::{HierRecord, RecordMap, RowIdentity, DEFAULT_JOINT_KEY};
pub use value::{Fields, FlatRow, Value};
