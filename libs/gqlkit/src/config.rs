use serde::{Deserialize, Serialize};

use crate::registry::MergePolicy;

/// Composition settings, usually the `graphql` section of the app config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ComposerConfig {
    /// Custom scalars registered before any module type.
    pub scalars: Vec<ScalarConfig>,
    pub timestamps: TimestampConfig,
    pub resolver_conflicts: ResolverConflictPolicy,
    /// Query field synthesized when no module contributes one.
    pub placeholder_field: String,
    pub max_depth: Option<usize>,
    pub max_complexity: Option<usize>,
    pub introspection: bool,
    pub merge_policy: MergePolicy,
}

impl Default for ComposerConfig {
    fn default() -> Self {
        Self {
            scalars: Vec::new(),
            timestamps: TimestampConfig::default(),
            resolver_conflicts: ResolverConflictPolicy::default(),
            placeholder_field: default_placeholder_field(),
            max_depth: None,
            max_complexity: None,
            introspection: true,
            merge_policy: MergePolicy::default(),
        }
    }
}

fn default_placeholder_field() -> String {
    "_empty".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScalarConfig {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// Audit timestamp fields added to every object type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TimestampConfig {
    pub enabled: bool,
    pub created_field: String,
    pub updated_field: String,
    /// Object type names left untouched.
    pub exclude: Vec<String>,
}

impl Default for TimestampConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            created_field: "createdAt".to_string(),
            updated_field: "updatedAt".to_string(),
            exclude: Vec::new(),
        }
    }
}

/// What happens when two modules contribute the same root field name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolverConflictPolicy {
    /// The later module (in load order) replaces the field; a warning is logged.
    #[default]
    LastWriterWins,
    /// Composition fails with `ComposeError::ResolverConflict`.
    Reject,
}
