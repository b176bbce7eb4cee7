//! Module descriptors: what a module factory hands to the host.

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::context::AppContext;
use crate::model::Model;
use crate::registry::ModuleAssets;
use crate::types::{FieldSpec, TypeComposer};

pub type ModelMap = IndexMap<String, Arc<dyn Model>>;
pub type TypeComposerMap = IndexMap<String, TypeComposer>;
pub type FieldMap = IndexMap<String, FieldSpec>;
pub type ServiceMap = IndexMap<String, Arc<dyn Any + Send + Sync>>;
pub type ActionMap = IndexMap<String, Action>;
pub type ValidatorMap = IndexMap<String, Validator>;

/// Named domain operation a module exposes to other modules.
pub type Action = Arc<
    dyn Fn(serde_json::Value) -> BoxFuture<'static, anyhow::Result<serde_json::Value>>
        + Send
        + Sync,
>;

/// Validates a document before it reaches a model.
pub type Validator = Arc<dyn Fn(&serde_json::Value) -> Result<(), String> + Send + Sync>;

/// The loaded module list, in load order.
pub type ModuleSet = Arc<[Arc<ModuleDescriptor>]>;

/// Synchronous asset registration, run once when the module is loaded.
pub type OnLoadFn = Arc<dyn Fn(&AppContext, &ModuleDescriptor) -> anyhow::Result<()> + Send + Sync>;

/// Post-load callback (`relations`, `hooks`, `init`).
pub type LifecycleFn =
    Arc<dyn Fn(AppContext, ModuleSet) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Advisory module metadata. Nothing here is enforced by the composer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ModuleMeta {
    pub version: Option<String>,
    pub scope: Option<String>,
    pub description: Option<String>,
    pub enabled: bool,
    pub dependencies: Vec<String>,
}

impl Default for ModuleMeta {
    fn default() -> Self {
        Self {
            version: None,
            scope: None,
            description: None,
            enabled: true,
            dependencies: Vec::new(),
        }
    }
}

/// Root resolver buckets of one module.
#[derive(Clone, Debug, Default)]
pub struct ResolverMap {
    pub query: Option<FieldMap>,
    pub mutation: Option<FieldMap>,
}

impl ResolverMap {
    pub fn add_query(&mut self, field: FieldSpec) {
        self.query
            .get_or_insert_with(FieldMap::new)
            .insert(field.name.clone(), field);
    }

    pub fn add_mutation(&mut self, field: FieldSpec) {
        self.mutation
            .get_or_insert_with(FieldMap::new)
            .insert(field.name.clone(), field);
    }

    pub fn query_fields(&self) -> impl Iterator<Item = &FieldSpec> {
        self.query.iter().flat_map(|m| m.values())
    }

    pub fn mutation_fields(&self) -> impl Iterator<Item = &FieldSpec> {
        self.mutation.iter().flat_map(|m| m.values())
    }

    pub fn is_empty(&self) -> bool {
        self.query.as_ref().map_or(true, |m| m.is_empty())
            && self.mutation.as_ref().map_or(true, |m| m.is_empty())
    }
}

/// A module as seen by the host: id, declared assets and lifecycle callbacks.
pub struct ModuleDescriptor {
    pub id: String,
    pub meta: ModuleMeta,
    pub models: ModelMap,
    pub type_composers: TypeComposerMap,
    pub resolvers: ResolverMap,
    pub services: ServiceMap,
    pub actions: ActionMap,
    pub validators: ValidatorMap,
    pub on_load: Option<OnLoadFn>,
    pub relations: Option<LifecycleFn>,
    pub hooks: Option<LifecycleFn>,
    pub init: Option<LifecycleFn>,
}

impl fmt::Debug for ModuleDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleDescriptor")
            .field("id", &self.id)
            .field("meta", &self.meta)
            .field("models", &self.models.keys().collect::<Vec<_>>())
            .field("type_composers", &self.type_composers.keys().collect::<Vec<_>>())
            .field("has_on_load", &self.on_load.is_some())
            .field("has_relations", &self.relations.is_some())
            .field("has_hooks", &self.hooks.is_some())
            .field("has_init", &self.init.is_some())
            .finish()
    }
}

fn lifecycle<F, Fut>(f: F) -> LifecycleFn
where
    F: Fn(AppContext, ModuleSet) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(
        move |ctx: AppContext, modules: ModuleSet| -> BoxFuture<'static, anyhow::Result<()>> {
            Box::pin(f(ctx, modules))
        },
    )
}

impl ModuleDescriptor {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            meta: ModuleMeta::default(),
            models: ModelMap::new(),
            type_composers: TypeComposerMap::new(),
            resolvers: ResolverMap::default(),
            services: ServiceMap::new(),
            actions: ActionMap::new(),
            validators: ValidatorMap::new(),
            on_load: None,
            relations: None,
            hooks: None,
            init: None,
        }
    }

    pub fn with_meta(mut self, meta: ModuleMeta) -> Self {
        self.meta = meta;
        self
    }

    pub fn with_model(mut self, name: impl Into<String>, model: Arc<dyn Model>) -> Self {
        self.models.insert(name.into(), model);
        self
    }

    /// Registers a composer under `name` (by convention `<Name>TC`).
    pub fn with_type_composer(mut self, name: impl Into<String>, tc: TypeComposer) -> Self {
        self.type_composers.insert(name.into(), tc);
        self
    }

    pub fn with_query(mut self, field: FieldSpec) -> Self {
        self.resolvers.add_query(field);
        self
    }

    pub fn with_mutation(mut self, field: FieldSpec) -> Self {
        self.resolvers.add_mutation(field);
        self
    }

    pub fn with_service<T: Any + Send + Sync>(mut self, name: impl Into<String>, svc: Arc<T>) -> Self {
        self.services.insert(name.into(), svc);
        self
    }

    pub fn with_action(mut self, name: impl Into<String>, action: Action) -> Self {
        self.actions.insert(name.into(), action);
        self
    }

    pub fn with_validator(mut self, name: impl Into<String>, validator: Validator) -> Self {
        self.validators.insert(name.into(), validator);
        self
    }

    pub fn with_on_load<F>(mut self, f: F) -> Self
    where
        F: Fn(&AppContext, &ModuleDescriptor) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.on_load = Some(Arc::new(f));
        self
    }

    /// `on_load` that registers the descriptor's own assets under its id.
    pub fn with_default_on_load(self) -> Self {
        self.with_on_load(|ctx, module| {
            ctx.assets().register(&module.id, module.assets())?;
            Ok(())
        })
    }

    pub fn with_relations<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(AppContext, ModuleSet) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.relations = Some(lifecycle(f));
        self
    }

    pub fn with_hooks<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(AppContext, ModuleSet) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.hooks = Some(lifecycle(f));
        self
    }

    pub fn with_init<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(AppContext, ModuleSet) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.init = Some(lifecycle(f));
        self
    }

    pub fn model(&self, name: &str) -> Option<Arc<dyn Model>> {
        self.models.get(name).cloned()
    }

    /// Looks a composer up by registration key first, then by GraphQL type name.
    pub fn type_composer(&self, name: &str) -> Option<TypeComposer> {
        self.type_composers
            .get(name)
            .or_else(|| self.type_composers.values().find(|tc| tc.name() == name))
            .cloned()
    }

    /// Bundles the declared assets for the asset registry. Empty buckets are omitted.
    pub fn assets(&self) -> ModuleAssets {
        fn non_empty<T: Clone>(map: &IndexMap<String, T>) -> Option<IndexMap<String, T>> {
            (!map.is_empty()).then(|| map.clone())
        }

        ModuleAssets {
            models: non_empty(&self.models),
            type_composers: non_empty(&self.type_composers),
            resolvers: (!self.resolvers.is_empty()).then(|| self.resolvers.clone()),
            services: non_empty(&self.services),
            actions: non_empty(&self.actions),
            validators: non_empty(&self.validators),
        }
    }
}
