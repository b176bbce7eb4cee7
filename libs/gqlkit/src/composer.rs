//! Schema composition: turns the loaded modules into one executable schema.

use std::sync::Arc;

use async_graphql::dynamic::{FieldFuture, Schema, SchemaError, TypeRef};
use async_graphql::Value;
use indexmap::IndexMap;
use thiserror::Error;

use crate::config::{ComposerConfig, ResolverConflictPolicy, TimestampConfig};
use crate::context::AppContext;
use crate::namespace::{Install, SchemaNamespace, MUTATION, QUERY};
use crate::types::{FieldSpec, ObjectType, TypeComposer, TypeKind};

const BUILTIN_SCALARS: [&str; 5] = ["String", "Int", "Float", "Boolean", "ID"];
const SCALAR_OWNER: &str = "<scalars>";

#[derive(Debug, Error)]
pub enum ComposeError {
    #[error("no application host is attached to the context")]
    MissingHost,
    #[error("{root}.{field} is provided by both '{first}' and '{second}'")]
    ResolverConflict {
        root: &'static str,
        field: String,
        first: String,
        second: String,
    },
    #[error("schema build failed")]
    Build(#[source] SchemaError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeCollision {
    pub type_name: String,
    pub kept_from: String,
    pub dropped_from: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolverOverride {
    pub root: &'static str,
    pub field: String,
    pub previous: String,
    pub winner: String,
}

/// What one composition pass did.
#[derive(Debug, Clone, Default)]
pub struct CompositionReport {
    pub installed: Vec<String>,
    pub collisions: Vec<TypeCollision>,
    pub skipped_scalars: Vec<String>,
    pub resolver_overrides: Vec<ResolverOverride>,
    pub placeholder_added: bool,
}

/// Post-processing step applied to every installed object type.
///
/// Runs on every composition, so implementations must be idempotent.
pub trait TypeDecorator: Send + Sync {
    fn name(&self) -> &str;

    fn decorate(&self, object: &mut ObjectType);
}

/// Adds audit timestamp fields (`createdAt`/`updatedAt` by default).
#[derive(Debug, Clone)]
pub struct TimestampDecorator {
    config: TimestampConfig,
}

impl TimestampDecorator {
    pub fn new(config: TimestampConfig) -> Self {
        Self { config }
    }
}

impl Default for TimestampDecorator {
    fn default() -> Self {
        Self::new(TimestampConfig::default())
    }
}

impl TypeDecorator for TimestampDecorator {
    fn name(&self) -> &str {
        "timestamps"
    }

    fn decorate(&self, object: &mut ObjectType) {
        if self.config.exclude.iter().any(|t| t == &object.name) {
            return;
        }
        for field in [&self.config.created_field, &self.config.updated_field] {
            object
                .fields
                .entry(field.clone())
                .or_insert_with(|| FieldSpec::property(field.as_str(), TypeRef::named(TypeRef::STRING)));
        }
    }
}

/// Whether `name` is a legal GraphQL type name outside the reserved `__` space.
pub fn is_valid_type_name(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    (first.is_ascii_alphabetic() || first == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !name.starts_with("__")
}

/// Composes schemas from the modules loaded into the context's host.
#[derive(Default, Clone)]
pub struct SchemaComposer {
    decorators: Vec<Arc<dyn TypeDecorator>>,
    scalars: Vec<TypeComposer>,
}

impl std::fmt::Debug for SchemaComposer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaComposer")
            .field(
                "decorators",
                &self.decorators.iter().map(|d| d.name().to_string()).collect::<Vec<_>>(),
            )
            .field("scalars", &self.scalars)
            .finish()
    }
}

impl SchemaComposer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Composer with the decorators enabled in `config`.
    pub fn from_config(config: &ComposerConfig) -> Self {
        let composer = Self::new();
        if config.timestamps.enabled {
            composer.with_decorator(TimestampDecorator::new(config.timestamps.clone()))
        } else {
            composer
        }
    }

    pub fn with_decorator(mut self, decorator: impl TypeDecorator + 'static) -> Self {
        self.decorators.push(Arc::new(decorator));
        self
    }

    /// Registers a scalar composer in addition to the configured scalars.
    pub fn with_scalar(mut self, scalar: TypeComposer) -> Self {
        self.scalars.push(scalar);
        self
    }

    pub fn compose(
        &self,
        ctx: &AppContext,
        namespace: &mut SchemaNamespace,
    ) -> Result<Schema, ComposeError> {
        self.compose_with_report(ctx, namespace).map(|(schema, _)| schema)
    }

    pub fn compose_with_report(
        &self,
        ctx: &AppContext,
        namespace: &mut SchemaNamespace,
    ) -> Result<(Schema, CompositionReport), ComposeError> {
        tracing::info!("Phase: compose");
        let host = ctx.host().ok_or(ComposeError::MissingHost)?;
        let config = ctx.config();
        let mut report = CompositionReport::default();

        namespace.reset();

        self.install_scalars(config, namespace, &mut report);

        let modules = host.modules();
        for module in modules.iter() {
            let Some(tcs) = host.assets(&module.id).and_then(|a| a.type_composers) else {
                continue;
            };
            for tc in tcs.into_values() {
                install(ctx, namespace, &module.id, tc, &mut report);
            }
        }

        let mut query: IndexMap<String, (String, FieldSpec)> = IndexMap::new();
        let mut mutation: IndexMap<String, (String, FieldSpec)> = IndexMap::new();
        for module in modules.iter() {
            let Some(resolvers) = host.assets(&module.id).and_then(|a| a.resolvers) else {
                continue;
            };
            for field in resolvers.query_fields() {
                accumulate(config, &mut query, QUERY, &module.id, field, &mut report)?;
            }
            for field in resolvers.mutation_fields() {
                accumulate(config, &mut mutation, MUTATION, &module.id, field, &mut report)?;
            }
            namespace.record_resolvers(&module.id, resolvers);
        }

        for (_, (_, field)) in query {
            add_root_field(namespace.query(), field);
        }
        if !mutation.is_empty() {
            let root = namespace.ensure_mutation().clone();
            for (_, (_, field)) in mutation {
                add_root_field(&root, field);
            }
        }

        for decorator in &self.decorators {
            for tc in namespace.types() {
                if tc.with_object_mut(|object| decorator.decorate(object)).is_some() {
                    tracing::trace!(decorator = decorator.name(), type_name = %tc.name(), "Type decorated");
                }
            }
        }

        if namespace.query().field_count() == 0 {
            tracing::warn!(
                field = %config.placeholder_field,
                "No module contributed a query field; adding placeholder"
            );
            add_root_field(
                namespace.query(),
                FieldSpec::new(
                    config.placeholder_field.as_str(),
                    TypeRef::named(TypeRef::STRING),
                    |_| FieldFuture::new(async { Ok(None::<Value>) }),
                ),
            );
            report.placeholder_added = true;
        }

        let schema = build(config, namespace)?;
        tracing::info!(
            types = report.installed.len(),
            collisions = report.collisions.len(),
            "Schema composed"
        );
        Ok((schema, report))
    }

    fn install_scalars(
        &self,
        config: &ComposerConfig,
        namespace: &mut SchemaNamespace,
        report: &mut CompositionReport,
    ) {
        let configured = config.scalars.iter().map(|s| {
            let tc = TypeComposer::scalar(s.name.as_str());
            match &s.description {
                Some(d) => tc.with_description(d.as_str()),
                None => tc,
            }
        });

        for tc in configured.chain(self.scalars.iter().cloned()) {
            let name = tc.name();
            let reason = if tc.kind() != TypeKind::Scalar {
                Some("not a scalar composer")
            } else if !is_valid_type_name(&name) {
                Some("invalid type name")
            } else if BUILTIN_SCALARS.contains(&name.as_str()) {
                Some("shadows a builtin scalar")
            } else {
                None
            };
            if let Some(reason) = reason {
                tracing::warn!(scalar = %name, reason, "Skipping custom scalar");
                report.skipped_scalars.push(name);
                continue;
            }
            match namespace.install(SCALAR_OWNER, tc) {
                Install::Installed => report.installed.push(name),
                Install::Collision { .. } => {
                    tracing::warn!(scalar = %name, "Duplicate custom scalar; skipping");
                    report.skipped_scalars.push(name);
                }
            }
        }
    }
}

fn install(
    ctx: &AppContext,
    namespace: &mut SchemaNamespace,
    module_id: &str,
    tc: TypeComposer,
    report: &mut CompositionReport,
) {
    let name = tc.name();
    if namespace.get(&name).is_some_and(|existing| existing.ptr_eq(&tc)) {
        return;
    }
    match namespace.install(module_id, tc.clone()) {
        Install::Installed => {
            ctx.types().publish(tc);
            report.installed.push(name);
        }
        Install::Collision { existing_owner } => {
            tracing::warn!(
                type_name = %name,
                kept_from = %existing_owner,
                dropped_from = module_id,
                "Type name collision; keeping the first definition"
            );
            report.collisions.push(TypeCollision {
                type_name: name,
                kept_from: existing_owner,
                dropped_from: module_id.to_string(),
            });
        }
    }
}

fn accumulate(
    config: &ComposerConfig,
    acc: &mut IndexMap<String, (String, FieldSpec)>,
    root: &'static str,
    module_id: &str,
    field: &FieldSpec,
    report: &mut CompositionReport,
) -> Result<(), ComposeError> {
    if let Some((previous, _)) = acc.get(&field.name) {
        if previous != module_id {
            match config.resolver_conflicts {
                ResolverConflictPolicy::Reject => {
                    return Err(ComposeError::ResolverConflict {
                        root,
                        field: field.name.clone(),
                        first: previous.clone(),
                        second: module_id.to_string(),
                    });
                }
                ResolverConflictPolicy::LastWriterWins => {
                    tracing::warn!(
                        root,
                        field = %field.name,
                        previous = %previous,
                        winner = module_id,
                        "Root field defined by more than one module; last one wins"
                    );
                    report.resolver_overrides.push(ResolverOverride {
                        root,
                        field: field.name.clone(),
                        previous: previous.clone(),
                        winner: module_id.to_string(),
                    });
                }
            }
        }
    }
    acc.insert(field.name.clone(), (module_id.to_string(), field.clone()));
    Ok(())
}

fn add_root_field(root: &TypeComposer, field: FieldSpec) {
    if let Err(e) = root.add_field(field) {
        tracing::error!(error = %e, "Root type rejected field");
    }
}

fn build(config: &ComposerConfig, namespace: &SchemaNamespace) -> Result<Schema, ComposeError> {
    let mut builder = Schema::build(
        QUERY,
        namespace.mutation().map(|_| MUTATION),
        None,
    );
    for tc in namespace.types() {
        builder = builder.register(tc.to_dynamic());
    }
    builder = builder.register(namespace.query().to_dynamic());
    if let Some(mutation) = namespace.mutation() {
        builder = builder.register(mutation.to_dynamic());
    }

    if let Some(depth) = config.max_depth {
        builder = builder.limit_depth(depth);
    }
    if let Some(complexity) = config.max_complexity {
        builder = builder.limit_complexity(complexity);
    }
    if !config.introspection {
        builder = builder.disable_introspection();
    }

    builder.finish().map_err(|e| {
        tracing::error!(error = %e, "Schema build failed");
        ComposeError::Build(e)
    })
}

/// Composes with the decorators enabled in the context's configuration.
pub fn compose_schema(
    ctx: &AppContext,
    namespace: &mut SchemaNamespace,
) -> Result<Schema, ComposeError> {
    SchemaComposer::from_config(ctx.config()).compose(ctx, namespace)
}
