use crate::config::AppConfig;
use gqlkit::ConfigProvider;
use std::sync::Arc;

/// Serves the `modules` section of an [`AppConfig`] to the application context.
#[derive(Debug, Clone)]
pub struct AppConfigProvider(Arc<AppConfig>);

impl AppConfigProvider {
    pub fn new(config: AppConfig) -> Self {
        Self(Arc::new(config))
    }

    pub fn from_arc(config: Arc<AppConfig>) -> Self {
        Self(config)
    }

    pub fn inner(&self) -> &AppConfig {
        &self.0
    }
}

impl ConfigProvider for AppConfigProvider {
    fn get_module_config(&self, module_id: &str) -> Option<&serde_json::Value> {
        self.0.modules.get(module_id)
    }
}
