//! Application context shared by the host, the composer and every module.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use anyhow::Context as _;
use dashmap::DashMap;
use serde::de::DeserializeOwned;

use crate::config::ComposerConfig;
use crate::host::{HostHandle, HostState};
use crate::model::Model;
use crate::registry::AssetRegistry;
use crate::types::TypeComposer;

/// Source of per-module configuration bags.
pub trait ConfigProvider: Send + Sync {
    /// Raw configuration for `module_id`, if any was provided.
    fn get_module_config(&self, module_id: &str) -> Option<&serde_json::Value>;
}

/// Provider that has no module configuration at all.
pub struct EmptyConfigProvider;

impl ConfigProvider for EmptyConfigProvider {
    fn get_module_config(&self, _module_id: &str) -> Option<&serde_json::Value> {
        None
    }
}

impl ConfigProvider for HashMap<String, serde_json::Value> {
    fn get_module_config(&self, module_id: &str) -> Option<&serde_json::Value> {
        self.get(module_id)
    }
}

/// Global index of composed types, keyed by GraphQL type name.
///
/// Filled with each module's type composers as it loads, then with every type
/// installed during composition. The first publication of a name wins. Serves as the fallback when a relation cannot reach a type
/// through its owning module.
#[derive(Default)]
pub struct TypeIndex {
    types: DashMap<String, TypeComposer>,
}

impl TypeIndex {
    /// Records `tc` under its type name. An existing entry is kept.
    pub fn publish(&self, tc: TypeComposer) -> bool {
        let name = tc.name();
        match self.types.entry(name) {
            dashmap::mapref::entry::Entry::Occupied(_) => false,
            dashmap::mapref::entry::Entry::Vacant(v) => {
                v.insert(tc);
                true
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<TypeComposer> {
        self.types.get(name).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.types.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

struct ContextInner {
    assets: AssetRegistry,
    types: TypeIndex,
    config: ComposerConfig,
    settings: Arc<dyn ConfigProvider>,
    host: OnceLock<Arc<HostState>>,
}

/// Cheap-clone handle to the shared application state.
#[derive(Clone)]
pub struct AppContext {
    inner: Arc<ContextInner>,
}

impl std::fmt::Debug for AppContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppContext")
            .field("assets", &self.inner.assets)
            .field("composed_types", &self.inner.types.len())
            .field("has_host", &self.inner.host.get().is_some())
            .finish()
    }
}

impl Default for AppContext {
    fn default() -> Self {
        AppContextBuilder::default().build()
    }
}

impl AppContext {
    pub fn new(config: ComposerConfig) -> Self {
        AppContextBuilder::default().config(config).build()
    }

    pub fn builder() -> AppContextBuilder {
        AppContextBuilder::default()
    }

    pub fn assets(&self) -> &AssetRegistry {
        &self.inner.assets
    }

    pub fn types(&self) -> &TypeIndex {
        &self.inner.types
    }

    pub fn config(&self) -> &ComposerConfig {
        &self.inner.config
    }

    /// The application host this context is attached to, if any.
    pub fn host(&self) -> Option<HostHandle> {
        self.inner
            .host
            .get()
            .cloned()
            .map(|state| HostHandle::new(state, self.clone()))
    }

    pub(crate) fn attach_host(&self, state: Arc<HostState>) -> bool {
        self.inner.host.set(state).is_ok()
    }

    /// Typed configuration for `module_id`; `T::default()` when none was provided.
    pub fn module_config<T>(&self, module_id: &str) -> anyhow::Result<T>
    where
        T: DeserializeOwned + Default,
    {
        match self.inner.settings.get_module_config(module_id) {
            Some(raw) => serde_json::from_value(raw.clone())
                .with_context(|| format!("invalid configuration for module '{module_id}'")),
            None => Ok(T::default()),
        }
    }

    /// Looks a composer up in the asset registry, then in the composed-type index.
    pub fn type_composer(&self, name: &str) -> Option<TypeComposer> {
        self.inner
            .assets
            .find_type_composer(name)
            .or_else(|| self.inner.types.get(name))
    }

    /// First registered model named `name`, across all modules.
    pub fn model(&self, name: &str) -> Option<Arc<dyn Model>> {
        self.inner
            .assets
            .get_models()
            .into_values()
            .find_map(|models| models.get(name).cloned())
    }
}

#[derive(Default)]
pub struct AppContextBuilder {
    config: Option<ComposerConfig>,
    settings: Option<Arc<dyn ConfigProvider>>,
}

impl AppContextBuilder {
    pub fn config(mut self, config: ComposerConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn settings(mut self, settings: Arc<dyn ConfigProvider>) -> Self {
        self.settings = Some(settings);
        self
    }

    pub fn build(self) -> AppContext {
        let config = self.config.unwrap_or_default();
        AppContext {
            inner: Arc::new(ContextInner {
                assets: AssetRegistry::new(config.merge_policy.clone()),
                types: TypeIndex::default(),
                settings: self
                    .settings
                    .unwrap_or_else(|| Arc::new(EmptyConfigProvider)),
                config,
                host: OnceLock::new(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ModuleAssets;
    use serde::Deserialize;

    #[derive(Debug, Default, Deserialize, PartialEq)]
    struct SeedConfig {
        #[serde(default)]
        seed: Vec<String>,
    }

    #[test]
    fn module_config_defaults_when_absent() {
        let ctx = AppContext::default();
        let cfg: SeedConfig = ctx.module_config("user").unwrap();
        assert_eq!(cfg, SeedConfig::default());
    }

    #[test]
    fn module_config_reads_bag() {
        let mut bag = HashMap::new();
        bag.insert("user".to_string(), serde_json::json!({"seed": ["ada"]}));
        let ctx = AppContext::builder().settings(Arc::new(bag)).build();

        let cfg: SeedConfig = ctx.module_config("user").unwrap();
        assert_eq!(cfg.seed, vec!["ada".to_string()]);
    }

    #[test]
    fn module_config_reports_invalid_shape() {
        let mut bag = HashMap::new();
        bag.insert("user".to_string(), serde_json::json!({"seed": 42}));
        let ctx = AppContext::builder().settings(Arc::new(bag)).build();

        let err = ctx.module_config::<SeedConfig>("user").unwrap_err();
        assert!(err.to_string().contains("user"));
    }

    #[test]
    fn type_index_keeps_first_publication() {
        let index = TypeIndex::default();
        let first = TypeComposer::object("User");
        assert!(index.publish(first.clone()));
        assert!(!index.publish(TypeComposer::object("User")));
        assert!(index.get("User").unwrap().ptr_eq(&first));
    }

    #[test]
    fn type_composer_falls_back_to_index() {
        let ctx = AppContext::default();
        ctx.types().publish(TypeComposer::object("Orphan"));
        let mut tcs = crate::descriptor::TypeComposerMap::new();
        tcs.insert("UserTC".into(), TypeComposer::object("User"));
        ctx.assets()
            .register("user", ModuleAssets::new().with_type_composers(tcs))
            .unwrap();

        assert!(ctx.type_composer("UserTC").is_some());
        assert!(ctx.type_composer("Orphan").is_some());
        assert!(ctx.type_composer("Nope").is_none());
        assert!(ctx.host().is_none());
    }
}
