use serde::{Deserialize, Serialize};

/// Configuration for the user module (`modules.user`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct UserConfig {
    /// Role given to users created without one.
    #[serde(default = "default_role")]
    pub default_role: String,
    /// Users inserted during `init`.
    #[serde(default)]
    pub seed: Vec<SeedUser>,
}

impl Default for UserConfig {
    fn default() -> Self {
        Self {
            default_role: default_role(),
            seed: Vec::new(),
        }
    }
}

fn default_role() -> String {
    "member".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct SeedUser {
    #[serde(default)]
    pub id: Option<String>,
    pub email: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
}
