//! Configuration management with layered loading
//!
//! Precedence (lowest to highest):
//! 1. Compiled defaults
//! 2. Global config: `$XDG_CONFIG_HOME/rowtree/rowtree.toml`
//! 3. Local config: `<dir>/.rowtree.toml`
//! 4. Environment variables: `ROWTREE_<SECTION>__<KEY>`, e.g. `ROWTREE_JOIN__SEPARATOR`

use std::path::{Path, PathBuf};

use config::{Config, ConfigError, Environment};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::domain::{
    IntervalTreeBuilder, JoinSpec, JoinTree, OrphanPolicy, RowArranger, WidthPolicy,
    DEFAULT_JOINT_KEY,
};
use crate::domain::interval::{DEFAULT_LEFT, DEFAULT_RIGHT};
use crate::domain::join::{DEFAULT_KEY_SEPARATOR, DEFAULT_SEPARATOR};
use crate::errors::{RowTreeError, RowTreeResult};

/// Settings for join specs and the row arranger.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct JoinSettings {
    /// Separator between table and field in tabular column names
    pub separator: String,
    /// Reserved key for nested child joins in rendered output
    pub joint_key: String,
    /// Separator between identity values in a row identity
    pub key_separator: String,
    /// Whether every column must be splittable into table and field
    pub require_all_tabular: bool,
    /// Whether join names match case-insensitively on alphanumerics
    pub alpha_num_match: bool,
    /// Handling of descendant data under an absent entity
    pub orphan_policy: OrphanPolicy,
}

impl Default for JoinSettings {
    fn default() -> Self {
        Self {
            separator: DEFAULT_SEPARATOR.into(),
            joint_key: DEFAULT_JOINT_KEY.into(),
            key_separator: DEFAULT_KEY_SEPARATOR.into(),
            require_all_tabular: true,
            alpha_num_match: true,
            orphan_policy: OrphanPolicy::default(),
        }
    }
}

/// Settings for the nested-interval tree builder.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct IntervalSettings {
    /// Left bound field name
    pub left: String,
    /// Right bound field name
    pub right: String,
    pub width_policy: WidthPolicy,
}

impl Default for IntervalSettings {
    fn default() -> Self {
        Self {
            left: DEFAULT_LEFT.into(),
            right: DEFAULT_RIGHT.into(),
            width_policy: WidthPolicy::default(),
        }
    }
}

/// Raw join settings for intermediate parsing (Option to detect "not specified").
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct RawJoinSettings {
    pub separator: Option<String>,
    pub joint_key: Option<String>,
    pub key_separator: Option<String>,
    pub require_all_tabular: Option<bool>,
    pub alpha_num_match: Option<bool>,
    pub orphan_policy: Option<OrphanPolicy>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct RawIntervalSettings {
    pub left: Option<String>,
    pub right: Option<String>,
    pub width_policy: Option<WidthPolicy>,
}

/// Raw settings for intermediate parsing.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct RawSettings {
    pub join: RawJoinSettings,
    pub interval: RawIntervalSettings,
}

impl JoinSettings {
    /// Overlay wins for every field it specifies.
    fn merge(&self, overlay: &RawJoinSettings) -> Self {
        Self {
            separator: overlay
                .separator
                .clone()
                .unwrap_or_else(|| self.separator.clone()),
            joint_key: overlay
                .joint_key
                .clone()
                .unwrap_or_else(|| self.joint_key.clone()),
            key_separator: overlay
                .key_separator
                .clone()
                .unwrap_or_else(|| self.key_separator.clone()),
            require_all_tabular: overlay
                .require_all_tabular
                .unwrap_or(self.require_all_tabular),
            alpha_num_match: overlay.alpha_num_match.unwrap_or(self.alpha_num_match),
            orphan_policy: overlay.orphan_policy.unwrap_or(self.orphan_policy),
        }
    }
}

impl IntervalSettings {
    fn merge(&self, overlay: &RawIntervalSettings) -> Self {
        Self {
            left: overlay.left.clone().unwrap_or_else(|| self.left.clone()),
            right: overlay.right.clone().unwrap_or_else(|| self.right.clone()),
            width_policy: overlay.width_policy.unwrap_or(self.width_policy),
        }
    }
}

/// Unified configuration for rowtree.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct Settings {
    pub join: JoinSettings,
    pub interval: IntervalSettings,
}

/// Get the XDG config directory for rowtree.
pub fn global_config_dir() -> Option<PathBuf> {
    ProjectDirs::from("", "", "rowtree").map(|dirs| dirs.config_dir().to_path_buf())
}

/// Get the path to the global config file.
pub fn global_config_path() -> Option<PathBuf> {
    global_config_dir().map(|dir| dir.join("rowtree.toml"))
}

/// Get the path to the local config file in a directory.
pub fn local_config_path(dir: &Path) -> PathBuf {
    dir.join(".rowtree.toml")
}

/// Load a TOML file into RawSettings for manual merging.
fn load_raw_settings(path: &Path) -> RowTreeResult<RawSettings> {
    let content = std::fs::read_to_string(path).map_err(|e| RowTreeError::Config {
        message: format!("read {}: {}", path.display(), e),
    })?;
    toml::from_str(&content).map_err(|e| RowTreeError::Config {
        message: format!("parse {}: {}", path.display(), e),
    })
}

impl Settings {
    fn merge_with(&self, overlay: &RawSettings) -> Self {
        Self {
            join: self.join.merge(&overlay.join),
            interval: self.interval.merge(&overlay.interval),
        }
    }

    /// Load settings with layered precedence.
    ///
    /// # Arguments
    /// * `local_dir` - Optional directory holding a `.rowtree.toml`
    pub fn load(local_dir: Option<&Path>) -> RowTreeResult<Self> {
        let mut current = Self::default();

        if let Some(global_path) = global_config_path() {
            if global_path.exists() {
                current = current.merge_with(&load_raw_settings(&global_path)?);
            }
        }

        if let Some(dir) = local_dir {
            let local_path = local_config_path(dir);
            if local_path.exists() {
                current = current.merge_with(&load_raw_settings(&local_path)?);
            }
        }

        Self::apply_env_overrides(current, env_source())
    }

    /// Apply `ROWTREE_*` environment variables as explicit overrides.
    fn apply_env_overrides(mut settings: Self, env: Environment) -> RowTreeResult<Self> {
        let config = Config::builder()
            .add_source(env)
            .build()
            .map_err(config_err)?;

        if let Ok(val) = config.get_string("join.separator") {
            settings.join.separator = val;
        }
        if let Ok(val) = config.get_string("join.joint_key") {
            settings.join.joint_key = val;
        }
        if let Ok(val) = config.get_string("join.key_separator") {
            settings.join.key_separator = val;
        }
        if let Ok(val) = config.get_bool("join.require_all_tabular") {
            settings.join.require_all_tabular = val;
        }
        if let Ok(val) = config.get_bool("join.alpha_num_match") {
            settings.join.alpha_num_match = val;
        }
        if let Ok(val) = config.get::<OrphanPolicy>("join.orphan_policy") {
            settings.join.orphan_policy = val;
        }
        if let Ok(val) = config.get_string("interval.left") {
            settings.interval.left = val;
        }
        if let Ok(val) = config.get_string("interval.right") {
            settings.interval.right = val;
        }
        if let Ok(val) = config.get::<WidthPolicy>("interval.width_policy") {
            settings.interval.width_policy = val;
        }

        Ok(settings)
    }

    /// Tabular join spec for `table` using the configured separators.
    pub fn tabular(&self, table: &str) -> JoinSpec {
        JoinSpec::tabular(table)
            .with_separator(self.join.separator.as_str())
            .with_key_separator(self.join.key_separator.as_str())
            .require_all_tabular(self.join.require_all_tabular)
            .with_joint_key(self.join.joint_key.as_str())
    }

    /// Columnar join spec over `fields` using the configured key separator.
    pub fn columnar(&self, fields: &[&str]) -> JoinSpec {
        JoinSpec::columnar(fields.iter().copied())
            .with_key_separator(self.join.key_separator.as_str())
            .with_joint_key(self.join.joint_key.as_str())
    }

    /// Leaf join tree for `spec` using the configured name matching.
    pub fn join_tree(&self, spec: JoinSpec) -> JoinTree {
        JoinTree::new(spec).with_alpha_num_match(self.join.alpha_num_match)
    }

    pub fn arranger(&self) -> RowArranger {
        RowArranger::new(self.join.orphan_policy)
    }

    pub fn interval_builder(&self) -> IntervalTreeBuilder {
        IntervalTreeBuilder::new(self.interval.left.as_str(), self.interval.right.as_str())
            .with_width_policy(self.interval.width_policy)
    }

    /// Show the effective configuration as TOML.
    pub fn to_toml(&self) -> RowTreeResult<String> {
        toml::to_string_pretty(self).map_err(|e| RowTreeError::Config {
            message: format!("serialize config: {e}"),
        })
    }

    /// Generate a template config file.
    pub fn template() -> String {
        r#"# rowtree configuration
#
# Locations (by precedence, lowest to highest):
#   Global: ~/.config/rowtree/rowtree.toml
#   Local:  <dir>/.rowtree.toml
#   Env:    ROWTREE_<SECTION>__<KEY>, e.g. ROWTREE_JOIN__SEPARATOR

[join]
# separator = "_t_"
# joint_key = "joint_data"
# key_separator = "_"
# require_all_tabular = true
# alpha_num_match = true
# orphan_policy = "reject"   # or "drop"

[interval]
# left = "lft"
# right = "rgt"
# width_policy = "strict"    # or "truncate"
"#
        .to_string()
    }
}

fn env_source() -> Environment {
    Environment::with_prefix("ROWTREE")
        .prefix_separator("_")
        .separator("__")
}

fn config_err(e: ConfigError) -> RowTreeError {
    RowTreeError::Config {
        message: e.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env_with(vars: &[(&str, &str)]) -> Environment {
        let map: config::Map<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        env_source().source(Some(map))
    }

    #[test]
    fn given_env_overrides_when_applied_then_replace_values() {
        let settings = Settings::apply_env_overrides(
            Settings::default(),
            env_with(&[
                ("ROWTREE_JOIN__SEPARATOR", "__"),
                ("ROWTREE_JOIN__REQUIRE_ALL_TABULAR", "false"),
                ("ROWTREE_JOIN__ORPHAN_POLICY", "drop"),
                ("ROWTREE_INTERVAL__WIDTH_POLICY", "truncate"),
            ]),
        )
        .expect("apply env");

        assert_eq!(settings.join.separator, "__");
        assert!(!settings.join.require_all_tabular);
        assert_eq!(settings.join.orphan_policy, OrphanPolicy::Drop);
        assert_eq!(settings.interval.width_policy, WidthPolicy::Truncate);
        assert_eq!(settings.interval.left, "lft");
    }

    #[test]
    fn given_no_env_when_applied_then_defaults_kept() {
        let settings =
            Settings::apply_env_overrides(Settings::default(), env_with(&[])).expect("apply env");
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn given_partial_overlay_when_merging_then_unspecified_fields_kept() {
        let raw: RawSettings = toml::from_str("[join]\njoint_key = \"children\"\n").unwrap();
        let merged = Settings::default().merge_with(&raw);
        assert_eq!(merged.join.joint_key, "children");
        assert_eq!(merged.join.separator, DEFAULT_SEPARATOR);
        assert_eq!(merged.interval, IntervalSettings::default());
    }

    #[test]
    fn given_template_when_parsed_then_yields_defaults() {
        let raw: RawSettings = toml::from_str(&Settings::template()).unwrap();
        assert_eq!(Settings::default().merge_with(&raw), Settings::default());
    }
}
