//! gqlkit: modular GraphQL schema composition.
//!
//! Feature modules describe themselves with a [`ModuleDescriptor`]: models,
//! type composers, root resolvers and lifecycle callbacks. A [`ModuleHost`]
//! loads them against a shared [`AppContext`], runs the post-load phase where
//! modules wire relations into each other's types, and the
//! [`SchemaComposer`] folds everything into one `async-graphql` dynamic schema.
//!
//! ```ignore
//! let ctx = AppContext::new(ComposerConfig::default());
//! let host = ModuleHost::new(ctx.clone())?;
//! host.load_registered()?;
//! host.post_load().await;
//! let schema = compose_schema(&ctx, &mut SchemaNamespace::new())?;
//! ```

pub mod composer;
pub mod config;
pub mod context;
pub mod descriptor;
pub mod discovery;
pub mod host;
pub mod model;
pub mod namespace;
pub mod registry;
pub mod relation;
pub mod types;

pub use composer::{
    compose_schema, CompositionReport, ComposeError, SchemaComposer, TimestampDecorator,
    TypeDecorator,
};
pub use config::{ComposerConfig, ResolverConflictPolicy, ScalarConfig, TimestampConfig};
pub use context::{AppContext, AppContextBuilder, ConfigProvider, TypeIndex};
pub use descriptor::{ModuleDescriptor, ModuleMeta, ModuleSet, ResolverMap};
pub use discovery::{ModuleFactory, ModuleRegistration};
pub use host::{HostError, HostHandle, LifecyclePhase, ModuleHost, ModuleState, PostLoadReport};
pub use model::{Document, Filter, MemoryModel, Model, ModelError};
pub use namespace::SchemaNamespace;
pub use registry::{AssetRegistry, MergePolicy, MergeStrategy, ModuleAssets, RegistryError};
pub use relation::{attach_relation, belongs_to, has_many, LookupStrategy, TypeResolver};
pub use types::{ArgSpec, FieldSpec, TypeComposer, TypeKind};

// Used by `register_module!` expansions in module crates.
pub use inventory;

pub use async_graphql;
