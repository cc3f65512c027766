//! Join specifications and join trees.
//!
//! A [`JoinSpec`] describes how to pick one entity's fields and identity out
//! of a flat row. A [`JoinTree`] nests specs into the join hierarchy that the
//! [`RowArranger`](crate::domain::RowArranger) walks.

use itertools::Itertools;
use tracing::{instrument, trace};

use crate::domain::error::{DomainError, DomainResult};
use crate::domain::record::DEFAULT_JOINT_KEY;
use crate::domain::value::{Fields, FlatRow};

pub const DEFAULT_SEPARATOR: &str = "_t_";
pub const DEFAULT_KEY_SEPARATOR: &str = "_";

/// How the columns of an entity are recognised in a flat row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Extraction {
    /// Columns are named `<table><separator><field>`.
    Tabular {
        table: String,
        separator: String,
        /// Fail on columns that cannot be split, instead of ignoring them
        require_all_fields: bool,
    },
    /// Columns are listed explicitly.
    Columnar { fields: Vec<String> },
}

/// Fields and identity of one entity, taken from one flat row.
#[derive(Debug, Clone, PartialEq)]
pub struct Extracted {
    /// Entity fields, identity fields removed
    pub fields: Fields,
    /// Joined identity values; `None` only for columnar entities lacking keys
    pub identity: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinSpec {
    pub extraction: Extraction,
    /// Identity fields, in identity order
    pub keys: Vec<String>,
    /// Separator between identity values in a row identity
    pub key_separator: String,
    /// Reserved key for nested child joins when rendering
    pub joint_key: String,
}

impl JoinSpec {
    /// Tabular spec for `table` with the default `id` key and `_t_` separator.
    pub fn tabular(table: impl Into<String>) -> Self {
        Self {
            extraction: Extraction::Tabular {
                table: table.into(),
                separator: DEFAULT_SEPARATOR.to_string(),
                require_all_fields: true,
            },
            keys: vec!["id".to_string()],
            key_separator: DEFAULT_KEY_SEPARATOR.to_string(),
            joint_key: DEFAULT_JOINT_KEY.to_string(),
        }
    }

    /// Columnar spec over an explicit list of included columns.
    pub fn columnar<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            extraction: Extraction::Columnar {
                fields: fields.into_iter().map(Into::into).collect(),
            },
            keys: vec!["id".to_string()],
            key_separator: DEFAULT_KEY_SEPARATOR.to_string(),
            joint_key: DEFAULT_JOINT_KEY.to_string(),
        }
    }

    pub fn with_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keys = keys.into_iter().map(Into::into).collect();
        self
    }

    /// Table separator; no effect on columnar specs.
    pub fn with_separator(mut self, sep: impl Into<String>) -> Self {
        if let Extraction::Tabular { separator, .. } = &mut self.extraction {
            *separator = sep.into();
        }
        self
    }

    /// Whether unsplittable columns are fatal; no effect on columnar specs.
    pub fn require_all_tabular(mut self, required: bool) -> Self {
        if let Extraction::Tabular {
            require_all_fields, ..
        } = &mut self.extraction
        {
            *require_all_fields = required;
        }
        self
    }

    pub fn with_key_separator(mut self, sep: impl Into<String>) -> Self {
        self.key_separator = sep.into();
        self
    }

    pub fn with_joint_key(mut self, key: impl Into<String>) -> Self {
        self.joint_key = key.into();
        self
    }

    /// Human readable entity name used in errors and logs.
    pub fn entity(&self) -> String {
        match &self.extraction {
            Extraction::Tabular { table, .. } => table.clone(),
            Extraction::Columnar { fields } => fields.join(","),
        }
    }

    pub fn validate(&self) -> DomainResult<()> {
        if self.keys.is_empty() || self.keys.iter().any(|k| k.is_empty()) {
            return Err(DomainError::InvalidSpec {
                reason: format!("entity {:?} needs non-empty identity fields", self.entity()),
            });
        }
        if let Extraction::Tabular {
            table, separator, ..
        } = &self.extraction
        {
            if separator.is_empty() {
                return Err(DomainError::InvalidSpec {
                    reason: format!("table {table:?} needs a non-empty separator"),
                });
            }
            if table.is_empty() {
                return Err(DomainError::InvalidSpec {
                    reason: "tabular spec needs a table name".to_string(),
                });
            }
        }
        Ok(())
    }

    /// Pull this entity out of `row`.
    ///
    /// `Ok(None)` means the row carries no data for the entity (every
    /// extracted column is null), the outer-join gap case.
    #[instrument(level = "trace", skip(self, row), fields(entity = %self.entity()))]
    pub fn extract(&self, row: &FlatRow) -> DomainResult<Option<Extracted>> {
        match &self.extraction {
            Extraction::Tabular {
                table,
                separator,
                require_all_fields,
            } => {
                let columns = split_table_columns(row, table, separator, *require_all_fields)?;
                if columns.all_null() {
                    trace!("no data for table");
                    return Ok(None);
                }
                let identity = self.identity_of(&columns, true)?;
                Ok(Some(Extracted {
                    fields: self.strip_keys(columns),
                    identity,
                }))
            }
            Extraction::Columnar { fields } => {
                let columns: Fields = row
                    .iter()
                    .filter(|(c, _)| fields.iter().any(|f| f == *c))
                    .map(|(c, v)| (c.to_string(), v.clone()))
                    .collect();
                if columns.all_null() {
                    trace!("no data for columns");
                    return Ok(None);
                }
                let identity = self.identity_of(row, false)?;
                Ok(Some(Extracted {
                    fields: self.strip_keys(columns),
                    identity,
                }))
            }
        }
    }

    /// Join the identity values in key order.
    ///
    /// A missing or null key is fatal when `strict`, otherwise the entity has
    /// no identity.
    fn identity_of(&self, source: &FlatRow, strict: bool) -> DomainResult<Option<String>> {
        let mut parts = Vec::with_capacity(self.keys.len());
        for key in &self.keys {
            match source.get(key) {
                Some(v) if !v.is_null() => parts.push(v.to_string()),
                _ if strict => {
                    return Err(DomainError::MissingIdentity {
                        entity: self.entity(),
                        field: key.clone(),
                    })
                }
                _ => return Ok(None),
            }
        }
        Ok(Some(parts.iter().join(&self.key_separator)))
    }

    fn strip_keys(&self, columns: Fields) -> Fields {
        columns
            .into_iter()
            .filter(|(c, _)| !self.keys.contains(c))
            .collect()
    }
}

/// Columns of `row` belonging to `table`, with the table prefix removed.
fn split_table_columns(
    row: &FlatRow,
    table: &str,
    separator: &str,
    require_all_fields: bool,
) -> DomainResult<Fields> {
    let mut columns = Fields::new();
    for (name, value) in row.iter() {
        let parts: Vec<&str> = name.split(separator).collect();
        match parts.as_slice() {
            [t, field] => {
                if *t == table {
                    columns.insert(*field, value.clone());
                }
            }
            _ if require_all_fields => {
                return Err(DomainError::MalformedField {
                    field: name.to_string(),
                    separator: separator.to_string(),
                })
            }
            _ => trace!(column = name, "skipping non tabular column"),
        }
    }
    Ok(columns)
}

/// A join spec plus its child joins, keyed by join id in declaration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinTree {
    spec: JoinSpec,
    children: Vec<(String, JoinTree)>,
    alpha_num_match: bool,
}

impl JoinTree {
    pub fn new(spec: JoinSpec) -> Self {
        Self {
            spec,
            children: Vec::new(),
            alpha_num_match: true,
        }
    }

    /// Builder-style [`add_join`](Self::add_join).
    pub fn with_join(mut self, join_id: impl Into<String>, child: JoinTree) -> Self {
        self.add_join(join_id, child);
        self
    }

    /// Add a child join; an existing join with the same id is replaced in place.
    pub fn add_join(&mut self, join_id: impl Into<String>, child: JoinTree) {
        let join_id = join_id.into();
        match self.children.iter_mut().find(|(id, _)| *id == join_id) {
            Some((_, slot)) => *slot = child,
            None => self.children.push((join_id, child)),
        }
    }

    /// Whether join names may be matched case-insensitively on alphanumerics only.
    pub fn with_alpha_num_match(mut self, enabled: bool) -> Self {
        self.alpha_num_match = enabled;
        self
    }

    pub fn spec(&self) -> &JoinSpec {
        &self.spec
    }

    pub fn children(&self) -> impl Iterator<Item = (&str, &JoinTree)> {
        self.children.iter().map(|(id, t)| (id.as_str(), t))
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    /// Resolve `name` to the id of a child join.
    ///
    /// Exact ids always match. With alphanumeric matching enabled, `name` also
    /// matches an id that is equal after dropping non-alphanumerics and
    /// lowercasing (`"Image_List"` finds `"imagelist"`).
    pub fn join_id(&self, name: &str) -> DomainResult<&str> {
        if let Some((id, _)) = self.children.iter().find(|(id, _)| id == name) {
            return Ok(id.as_str());
        }
        if self.alpha_num_match {
            let wanted = alpha_num(name);
            if let Some((id, _)) = self.children.iter().find(|(id, _)| alpha_num(id) == wanted) {
                return Ok(id.as_str());
            }
        }
        Err(DomainError::UnknownJoin(name.to_string()))
    }

    /// Child join tree found through [`join_id`](Self::join_id).
    pub fn child(&self, name: &str) -> DomainResult<&JoinTree> {
        let id = self.join_id(name)?;
        self.children
            .iter()
            .find(|(cid, _)| cid == id)
            .map(|(_, t)| t)
            .ok_or_else(|| DomainError::UnknownJoin(name.to_string()))
    }

    /// Validate every spec in the tree.
    pub fn validate(&self) -> DomainResult<()> {
        self.spec.validate()?;
        self.children.iter().try_for_each(|(_, c)| c.validate())
    }
}

fn alpha_num(s: &str) -> String {
    s.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::value::Value;

    fn product_row() -> FlatRow {
        FlatRow::new()
            .with("product_t_id", 3)
            .with("product_t_name", "P_Three")
            .with("image_t_id", 2)
            .with("image_t_name", "I_One.png")
    }

    #[test]
    fn given_tabular_row_when_extracting_then_strips_prefix_and_keys() {
        let spec = JoinSpec::tabular("image");
        let got = spec.extract(&product_row()).unwrap().unwrap();
        assert_eq!(got.identity.as_deref(), Some("2"));
        assert_eq!(got.fields, FlatRow::new().with("name", "I_One.png"));
    }

    #[test]
    fn given_composite_keys_when_extracting_then_joins_in_declared_order() {
        let spec = JoinSpec::tabular("image").with_keys(["name", "id"]);
        let got = spec.extract(&product_row()).unwrap().unwrap();
        assert_eq!(got.identity.as_deref(), Some("I_One.png_2"));
        assert!(got.fields.is_empty());
    }

    #[test]
    fn given_unsplittable_column_when_strict_then_malformed_field() {
        let row = product_row().with("extra", 1);
        let err = JoinSpec::tabular("product").extract(&row).unwrap_err();
        assert!(matches!(err, DomainError::MalformedField { field, .. } if field == "extra"));
    }

    #[test]
    fn given_unsplittable_column_when_lenient_then_ignored() {
        let row = product_row().with("a_t_b_t_c", 1).with("extra", 1);
        let got = JoinSpec::tabular("product")
            .require_all_tabular(false)
            .extract(&row)
            .unwrap()
            .unwrap();
        assert_eq!(got.fields, FlatRow::new().with("name", "P_Three"));
    }

    #[test]
    fn given_columnar_row_without_keys_when_extracting_then_identity_none() {
        let spec = JoinSpec::columnar(["title", "year"]).with_keys(["isbn"]);
        let row = FlatRow::new()
            .with("title", "Dune")
            .with("year", 1965)
            .with("other", "x");
        let got = spec.extract(&row).unwrap().unwrap();
        assert_eq!(got.identity, None);
        assert_eq!(got.fields.len(), 2);
    }

    #[test]
    fn given_all_null_columns_when_extracting_then_none() {
        let spec = JoinSpec::columnar(["title"]);
        let row = FlatRow::new().with("title", Value::Null).with("id", 1);
        assert_eq!(spec.extract(&row).unwrap(), None);
    }

    #[test]
    fn given_mixed_case_join_name_when_alpha_num_match_then_resolves() {
        let tree = JoinTree::new(JoinSpec::tabular("product"))
            .with_join("image_list", JoinTree::new(JoinSpec::tabular("image")));
        assert_eq!(tree.join_id("ImageList").unwrap(), "image_list");
        assert!(tree.child("IMAGE-LIST").is_ok());

        let strict = tree.clone().with_alpha_num_match(false);
        assert_eq!(
            strict.join_id("ImageList").unwrap_err(),
            DomainError::UnknownJoin("ImageList".to_string())
        );
    }

    #[test]
    fn given_empty_separator_when_validating_then_invalid_spec() {
        let tree = JoinTree::new(JoinSpec::tabular("p"))
            .with_join("i", JoinTree::new(JoinSpec::tabular("i").with_separator("")));
        assert!(matches!(tree.validate(), Err(DomainError::InvalidSpec { .. })));
    }
}
