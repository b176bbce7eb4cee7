//! Application host: loads modules, tracks their state and drives post-load.
//!
//! Lifecycle per module: `Unloaded → Loaded → PostLoaded`.
//! `load` runs each factory and its `on_load` synchronously, in call order.
//! `post_load` then walks the loaded modules in the same order and runs
//! `relations`, `hooks` and `init`, isolating failures per callback.

use std::collections::HashMap;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use indexmap::IndexMap;
use parking_lot::RwLock;
use thiserror::Error;

use crate::context::AppContext;
use crate::descriptor::{
    ActionMap, LifecycleFn, ModelMap, ModuleDescriptor, ModuleSet, ResolverMap, ServiceMap,
    TypeComposerMap, ValidatorMap,
};
use crate::discovery::{self, DiscoveryError, ModuleFactory};
use crate::registry::ModuleAssets;
use crate::types::TypeComposer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleState {
    Unloaded,
    Loaded,
    PostLoaded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecyclePhase {
    Relations,
    Hooks,
    Init,
}

impl fmt::Display for LifecyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LifecyclePhase::Relations => "relations",
            LifecyclePhase::Hooks => "hooks",
            LifecyclePhase::Init => "init",
        })
    }
}

#[derive(Debug, Error)]
pub enum HostError {
    #[error("the application context already has a host attached")]
    HostAlreadyAttached,
    #[error("module factory failed")]
    Factory(#[source] anyhow::Error),
    #[error("module factory returned a descriptor without an id")]
    InvalidModuleId,
    #[error("module '{0}' is already loaded")]
    DuplicateModule(String),
    #[error("on_load failed for module '{module}'")]
    OnLoad {
        module: String,
        #[source]
        source: anyhow::Error,
    },
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),
}

#[derive(Debug)]
pub struct PostLoadFailure {
    pub module: String,
    pub phase: LifecyclePhase,
    pub error: anyhow::Error,
}

/// What `post_load` ran and what failed.
#[derive(Debug, Default)]
pub struct PostLoadReport {
    pub executed: Vec<(String, LifecyclePhase)>,
    pub failures: Vec<PostLoadFailure>,
}

impl PostLoadReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

#[derive(Default)]
pub(crate) struct HostState {
    modules: RwLock<Vec<Arc<ModuleDescriptor>>>,
    states: RwLock<HashMap<String, ModuleState>>,
}

/// Read access to the host's loaded modules. Obtained from [`AppContext::host`].
#[derive(Clone)]
pub struct HostHandle {
    state: Arc<HostState>,
    ctx: AppContext,
}

impl fmt::Debug for HostHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostHandle")
            .field(
                "modules",
                &self.state.modules.read().iter().map(|m| m.id.clone()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl HostHandle {
    pub(crate) fn new(state: Arc<HostState>, ctx: AppContext) -> Self {
        Self { state, ctx }
    }

    /// Loaded modules in load order.
    pub fn modules(&self) -> ModuleSet {
        self.state.modules.read().iter().cloned().collect()
    }

    pub fn module(&self, id: &str) -> Option<Arc<ModuleDescriptor>> {
        self.state.modules.read().iter().find(|m| m.id == id).cloned()
    }

    pub fn state(&self, id: &str) -> ModuleState {
        self.state
            .states
            .read()
            .get(id)
            .copied()
            .unwrap_or(ModuleState::Unloaded)
    }

    pub fn len(&self) -> usize {
        self.state.modules.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.modules.read().is_empty()
    }

    /// Effective assets of a loaded module: what its descriptor declares, with
    /// anything registered under its id in the asset registry merged on top.
    pub fn assets(&self, id: &str) -> Option<ModuleAssets> {
        let module = self.module(id)?;
        Some(effective_assets(&module, &self.ctx))
    }

    fn fold<T>(&self, pick: impl Fn(ModuleAssets) -> Option<T>) -> IndexMap<String, T> {
        self.modules()
            .iter()
            .filter_map(|m| pick(effective_assets(m, &self.ctx)).map(|bucket| (m.id.clone(), bucket)))
            .collect()
    }

    pub fn models(&self) -> IndexMap<String, ModelMap> {
        self.fold(|a| a.models)
    }

    pub fn type_composers(&self) -> IndexMap<String, TypeComposerMap> {
        self.fold(|a| a.type_composers)
    }

    pub fn resolvers(&self) -> IndexMap<String, ResolverMap> {
        self.fold(|a| a.resolvers)
    }

    pub fn services(&self) -> IndexMap<String, ServiceMap> {
        self.fold(|a| a.services)
    }

    pub fn actions(&self) -> IndexMap<String, ActionMap> {
        self.fold(|a| a.actions)
    }

    pub fn validators(&self) -> IndexMap<String, ValidatorMap> {
        self.fold(|a| a.validators)
    }

    /// A composer of one loaded module, by registration key or type name.
    pub fn type_composer(&self, module_id: &str, name: &str) -> Option<TypeComposer> {
        let tcs = self.assets(module_id)?.type_composers?;
        tcs.get(name)
            .or_else(|| tcs.values().find(|tc| tc.name() == name))
            .cloned()
    }
}

fn effective_assets(module: &ModuleDescriptor, ctx: &AppContext) -> ModuleAssets {
    let mut assets = module.assets();
    if let Some(registered) = ctx.assets().get_module(&module.id) {
        assets.merge_from(registered, ctx.assets().policy());
    }
    assets
}

/// Owns the module list and drives loading and post-load.
pub struct ModuleHost {
    ctx: AppContext,
    state: Arc<HostState>,
}

impl ModuleHost {
    /// Creates a host and attaches it to `ctx`. A context accepts one host.
    pub fn new(ctx: AppContext) -> Result<Self, HostError> {
        let state = Arc::new(HostState::default());
        if !ctx.attach_host(Arc::clone(&state)) {
            return Err(HostError::HostAlreadyAttached);
        }
        Ok(Self { ctx, state })
    }

    pub fn context(&self) -> &AppContext {
        &self.ctx
    }

    pub fn handle(&self) -> HostHandle {
        HostHandle::new(Arc::clone(&self.state), self.ctx.clone())
    }

    /// Runs `factory`, validates the descriptor, runs its `on_load`, indexes its
    /// type composers and appends it.
    pub fn load<F>(&self, factory: F) -> Result<Arc<ModuleDescriptor>, HostError>
    where
        F: FnOnce(&AppContext) -> anyhow::Result<ModuleDescriptor>,
    {
        let descriptor = factory(&self.ctx).map_err(HostError::Factory)?;
        if descriptor.id.trim().is_empty() {
            return Err(HostError::InvalidModuleId);
        }
        let id = descriptor.id.clone();
        if self.state.states.read().contains_key(&id) {
            return Err(HostError::DuplicateModule(id));
        }

        match &descriptor.on_load {
            Some(on_load) => {
                tracing::debug!(module = %id, "Running on_load");
                on_load(&self.ctx, &descriptor).map_err(|source| HostError::OnLoad {
                    module: id.clone(),
                    source,
                })?;
            }
            None => tracing::warn!(module = %id, "Module has no on_load; nothing registered"),
        }

        for tc in descriptor.type_composers.values() {
            if !self.ctx.types().publish(tc.clone()) {
                tracing::debug!(module = %id, type_name = %tc.name(), "Type already indexed by an earlier module");
            }
        }

        let descriptor = Arc::new(descriptor);
        self.state.modules.write().push(Arc::clone(&descriptor));
        self.state.states.write().insert(id.clone(), ModuleState::Loaded);
        tracing::info!(module = %id, version = ?descriptor.meta.version, "Module loaded");
        Ok(descriptor)
    }

    /// Loads factories in order, stopping at the first error.
    pub fn load_all<I>(&self, factories: I) -> Result<Vec<Arc<ModuleDescriptor>>, HostError>
    where
        I: IntoIterator<Item = ModuleFactory>,
    {
        factories.into_iter().map(|f| self.load(f)).collect()
    }

    /// Loads every module submitted through `register_module!`, dependencies first.
    pub fn load_registered(&self) -> Result<Vec<Arc<ModuleDescriptor>>, HostError> {
        tracing::info!("Phase: load");
        let registrations = discovery::discover()?;
        let mut loaded = Vec::with_capacity(registrations.len());
        for reg in registrations {
            let module = self.load(reg.factory)?;
            if module.id != reg.id {
                tracing::warn!(
                    registered = reg.id,
                    module = %module.id,
                    "Module id differs from its registration id"
                );
            }
            loaded.push(module);
        }
        Ok(loaded)
    }

    /// Runs `relations`, `hooks` and `init` for every loaded module.
    ///
    /// A failing or panicking callback is logged and recorded; the remaining
    /// callbacks still run. Calling this twice re-runs every callback.
    pub async fn post_load(&self) -> PostLoadReport {
        tracing::info!("Phase: post_load");
        let modules = self.handle().modules();
        let mut report = PostLoadReport::default();

        for module in modules.iter() {
            let phases: [(LifecyclePhase, Option<&LifecycleFn>); 3] = [
                (LifecyclePhase::Relations, module.relations.as_ref()),
                (LifecyclePhase::Hooks, module.hooks.as_ref()),
                (LifecyclePhase::Init, module.init.as_ref()),
            ];
            for (phase, callback) in phases {
                let Some(callback) = callback else {
                    continue;
                };
                tracing::debug!(module = %module.id, %phase, "Running post-load callback");
                let outcome = run_guarded(callback, self.ctx.clone(), Arc::clone(&modules)).await;
                report.executed.push((module.id.clone(), phase));
                if let Err(error) = outcome {
                    tracing::error!(module = %module.id, %phase, error = %error, "Post-load callback failed");
                    report.failures.push(PostLoadFailure {
                        module: module.id.clone(),
                        phase,
                        error,
                    });
                }
            }
            self.state
                .states
                .write()
                .insert(module.id.clone(), ModuleState::PostLoaded);
        }

        tracing::info!(
            executed = report.executed.len(),
            failed = report.failures.len(),
            "Post-load finished"
        );
        report
    }
}

/// Invokes `callback` and awaits its future. A panic in either the call
/// itself or the future becomes an error.
async fn run_guarded(
    callback: &LifecycleFn,
    ctx: AppContext,
    modules: ModuleSet,
) -> anyhow::Result<()> {
    let fut = std::panic::catch_unwind(AssertUnwindSafe(|| callback(ctx, modules)))
        .map_err(|panic| anyhow::anyhow!("panicked: {}", panic_message(&*panic)))?;
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(res) => res,
        Err(panic) => Err(anyhow::anyhow!("panicked: {}", panic_message(&*panic))),
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
