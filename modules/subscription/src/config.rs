use serde::{Deserialize, Serialize};

/// Configuration for the subscription module (`modules.subscription`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct SubscriptionConfig {
    /// Plan used when `subscribe` is called without one.
    #[serde(default = "default_plan")]
    pub default_plan: String,
    /// Plans `subscribe` accepts.
    #[serde(default = "default_plans")]
    pub plans: Vec<String>,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            default_plan: default_plan(),
            plans: default_plans(),
        }
    }
}

fn default_plan() -> String {
    "free".to_string()
}

fn default_plans() -> Vec<String> {
    vec!["free".to_string(), "pro".to_string(), "team".to_string()]
}

impl SubscriptionConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if !self.plans.contains(&self.default_plan) {
            anyhow::bail!(
                "default_plan '{}' is not one of the configured plans {:?}",
                self.default_plan,
                self.plans
            );
        }
        Ok(())
    }

    pub fn accepts(&self, plan: &str) -> bool {
        self.plans.iter().any(|p| p == plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_plan_must_be_listed() {
        assert!(SubscriptionConfig::default().validate().is_ok());

        let cfg = SubscriptionConfig {
            default_plan: "enterprise".into(),
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }
}
