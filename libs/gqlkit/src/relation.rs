//! Cross-module relations.
//!
//! A module's `relations` callback finds a type composer owned by another
//! module and attaches a field to it. Lookups go through a [`TypeResolver`]
//! that tries each [`LookupStrategy`] in order. A miss is a warning, never an
//! error: the relation is skipped and the rest of post-load carries on.

use std::fmt;
use std::sync::Arc;

use async_graphql::dynamic::{FieldFuture, FieldValue, TypeRef};
use async_graphql::Value;

use crate::context::AppContext;
use crate::model::{to_graphql, Filter, Model};
use crate::types::{parent_value, FieldSpec, TypeComposer};

/// One place to look for a type composer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupStrategy {
    /// The composers of a loaded module, via the attached host.
    ModuleRegistry { module_id: String },
    /// Flat search over every module in the asset registry.
    AssetRegistry,
    /// The global composed-type index.
    Composed,
}

impl fmt::Display for LookupStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LookupStrategy::ModuleRegistry { module_id } => write!(f, "module:{module_id}"),
            LookupStrategy::AssetRegistry => f.write_str("assets"),
            LookupStrategy::Composed => f.write_str("composed"),
        }
    }
}

impl LookupStrategy {
    fn lookup(&self, ctx: &AppContext, name: &str) -> Option<TypeComposer> {
        match self {
            LookupStrategy::ModuleRegistry { module_id } => {
                ctx.host()?.type_composer(module_id, name)
            }
            LookupStrategy::AssetRegistry => ctx.assets().find_type_composer(name),
            LookupStrategy::Composed => ctx.types().get(name),
        }
    }
}

/// Ordered list of lookup strategies. The first hit wins.
#[derive(Debug, Clone, Default)]
pub struct TypeResolver {
    strategies: Vec<LookupStrategy>,
}

impl TypeResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn then(mut self, strategy: LookupStrategy) -> Self {
        self.strategies.push(strategy);
        self
    }

    /// The owning module first, then the global composed-type index.
    pub fn for_module(module_id: impl Into<String>) -> Self {
        Self::new()
            .then(LookupStrategy::ModuleRegistry {
                module_id: module_id.into(),
            })
            .then(LookupStrategy::Composed)
    }

    pub fn strategies(&self) -> &[LookupStrategy] {
        &self.strategies
    }

    pub fn resolve(&self, ctx: &AppContext, name: &str) -> Option<TypeComposer> {
        for strategy in &self.strategies {
            if let Some(tc) = strategy.lookup(ctx, name) {
                tracing::trace!(type_name = name, %strategy, "Type resolved");
                return Some(tc);
            }
            tracing::debug!(type_name = name, %strategy, "Type lookup missed");
        }
        None
    }
}

/// Resolves `type_name` and adds `field` to it. Returns `false` (with a
/// warning) when the type cannot be found or is not an object type.
pub fn attach_relation(
    ctx: &AppContext,
    resolver: &TypeResolver,
    type_name: &str,
    field: FieldSpec,
) -> bool {
    let Some(tc) = resolver.resolve(ctx, type_name) else {
        tracing::warn!(
            type_name,
            field = %field.name,
            "Relation target type not found; skipping"
        );
        return false;
    };
    let field_name = field.name.clone();
    match tc.add_field(field) {
        Ok(()) => {
            tracing::debug!(type_name, field = %field_name, "Relation attached");
            true
        }
        Err(e) => {
            tracing::warn!(type_name, field = %field_name, error = %e, "Relation not attached");
            false
        }
    }
}

fn key_of(value: Value) -> Option<serde_json::Value> {
    match value.into_json().ok()? {
        serde_json::Value::Null => None,
        other => Some(other),
    }
}

fn id_string(key: &serde_json::Value) -> String {
    match key {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// List field returning every `child_type` record whose `foreign_key` equals
/// the parent's `local_key`. Lookup failures resolve to an empty list.
pub fn has_many(
    name: impl Into<String>,
    child_type: &str,
    model: Arc<dyn Model>,
    foreign_key: impl Into<String>,
    local_key: impl Into<String>,
) -> FieldSpec {
    let name = name.into();
    let field_name = name.clone();
    let foreign_key = foreign_key.into();
    let local_key = local_key.into();

    FieldSpec::new(name, TypeRef::named_nn_list_nn(child_type), move |ctx| {
        let key = parent_value(&ctx, &local_key).and_then(key_of);
        let model = Arc::clone(&model);
        let foreign_key = foreign_key.clone();
        let field_name = field_name.clone();
        FieldFuture::new(async move {
            let Some(key) = key else {
                return Ok(Some(FieldValue::list(Vec::<FieldValue>::new())));
            };
            let docs = match model.find_many(&Filter::eq(foreign_key, key)).await {
                Ok(docs) => docs,
                Err(e) => {
                    tracing::warn!(
                        field = %field_name,
                        model = model.name(),
                        error = %e,
                        "has_many lookup failed; returning empty list"
                    );
                    Vec::new()
                }
            };
            Ok(Some(FieldValue::list(
                docs.into_iter().map(|d| FieldValue::value(to_graphql(d))),
            )))
        })
    })
}

/// Nullable field returning the `parent_type` record whose id equals the
/// parent's `local_key`. Lookup failures resolve to `null`.
pub fn belongs_to(
    name: impl Into<String>,
    parent_type: &str,
    model: Arc<dyn Model>,
    local_key: impl Into<String>,
) -> FieldSpec {
    let name = name.into();
    let field_name = name.clone();
    let local_key = local_key.into();

    FieldSpec::new(name, TypeRef::named(parent_type), move |ctx| {
        let key = parent_value(&ctx, &local_key).and_then(key_of);
        let model = Arc::clone(&model);
        let field_name = field_name.clone();
        FieldFuture::new(async move {
            let Some(key) = key else {
                return Ok(None::<FieldValue>);
            };
            match model.find_by_id(&id_string(&key)).await {
                Ok(doc) => Ok(doc.map(|d| FieldValue::value(to_graphql(d)))),
                Err(e) => {
                    tracing::warn!(
                        field = %field_name,
                        model = model.name(),
                        error = %e,
                        "belongs_to lookup failed; returning null"
                    );
                    Ok(None)
                }
            }
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::ModuleDescriptor;
    use crate::host::ModuleHost;

    fn string_field(name: &str) -> FieldSpec {
        FieldSpec::property(name, TypeRef::named(TypeRef::STRING))
    }

    #[test]
    fn module_strategy_requires_host() {
        let ctx = AppContext::default();
        let resolver = TypeResolver::for_module("user");
        assert!(resolver.resolve(&ctx, "User").is_none());

        ctx.types().publish(TypeComposer::object("User"));
        assert!(resolver.resolve(&ctx, "User").is_some());
    }

    #[test]
    fn module_strategy_wins_over_composed_index() {
        let ctx = AppContext::default();
        let host = ModuleHost::new(ctx.clone()).unwrap();
        let owned = TypeComposer::object("User");
        let owned_clone = owned.clone();
        host.load(move |_| {
            Ok(ModuleDescriptor::new("user")
                .with_type_composer("UserTC", owned_clone)
                .with_default_on_load())
        })
        .unwrap();
        ctx.types().publish(TypeComposer::object("User"));

        let tc = TypeResolver::for_module("user").resolve(&ctx, "UserTC").unwrap();
        assert!(tc.ptr_eq(&owned));
    }

    #[test]
    fn attach_relation_adds_field_or_reports_miss() {
        let ctx = AppContext::default();
        let user = TypeComposer::object("User");
        ctx.types().publish(user.clone());
        let resolver = TypeResolver::new().then(LookupStrategy::Composed);

        assert!(attach_relation(&ctx, &resolver, "User", string_field("nickname")));
        assert!(user.has_field("nickname"));

        assert!(!attach_relation(&ctx, &resolver, "Ghost", string_field("x")));

        ctx.types().publish(TypeComposer::scalar("Date"));
        assert!(!attach_relation(&ctx, &resolver, "Date", string_field("x")));
    }

    #[test]
    fn strategies_display() {
        let resolver = TypeResolver::for_module("habit").then(LookupStrategy::AssetRegistry);
        let names: Vec<_> = resolver.strategies().iter().map(ToString::to_string).collect();
        assert_eq!(names, vec!["module:habit", "composed", "assets"]);
    }
}
