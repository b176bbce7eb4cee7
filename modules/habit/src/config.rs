use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Frequency {
    #[default]
    Daily,
    Weekly,
    Monthly,
}

impl Frequency {
    pub const ALL: [Frequency; 3] = [Frequency::Daily, Frequency::Weekly, Frequency::Monthly];

    pub fn as_str(self) -> &'static str {
        match self {
            Frequency::Daily => "DAILY",
            Frequency::Weekly => "WEEKLY",
            Frequency::Monthly => "MONTHLY",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.as_str() == s)
    }
}

/// Configuration for the habit module (`modules.habit`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct HabitConfig {
    #[serde(default)]
    pub default_frequency: Frequency,
    #[serde(default = "default_max_title_len")]
    pub max_title_len: usize,
}

impl Default for HabitConfig {
    fn default() -> Self {
        Self {
            default_frequency: Frequency::default(),
            max_title_len: default_max_title_len(),
        }
    }
}

fn default_max_title_len() -> usize {
    120
}
