//! Asset registry: per-module buckets merged across registration calls.

use indexmap::IndexMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::descriptor::{
    ActionMap, ModelMap, ResolverMap, ServiceMap, TypeComposerMap, ValidatorMap,
};
use crate::types::TypeComposer;

/// Named asset buckets of one module. `None` means the module declared no such bucket.
#[derive(Clone, Default)]
pub struct ModuleAssets {
    pub models: Option<ModelMap>,
    pub type_composers: Option<TypeComposerMap>,
    pub resolvers: Option<ResolverMap>,
    pub services: Option<ServiceMap>,
    pub actions: Option<ActionMap>,
    pub validators: Option<ValidatorMap>,
}

impl std::fmt::Debug for ModuleAssets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fn keys<T>(m: &Option<IndexMap<String, T>>) -> Option<Vec<&String>> {
            m.as_ref().map(|m| m.keys().collect())
        }
        f.debug_struct("ModuleAssets")
            .field("models", &keys(&self.models))
            .field("type_composers", &keys(&self.type_composers))
            .field("has_resolvers", &self.resolvers.is_some())
            .field("services", &keys(&self.services))
            .field("actions", &keys(&self.actions))
            .field("validators", &keys(&self.validators))
            .finish()
    }
}

impl ModuleAssets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_models(mut self, models: ModelMap) -> Self {
        self.models = Some(models);
        self
    }

    pub fn with_type_composers(mut self, tcs: TypeComposerMap) -> Self {
        self.type_composers = Some(tcs);
        self
    }

    pub fn with_resolvers(mut self, resolvers: ResolverMap) -> Self {
        self.resolvers = Some(resolvers);
        self
    }

    pub fn with_services(mut self, services: ServiceMap) -> Self {
        self.services = Some(services);
        self
    }

    pub fn with_actions(mut self, actions: ActionMap) -> Self {
        self.actions = Some(actions);
        self
    }

    pub fn with_validators(mut self, validators: ValidatorMap) -> Self {
        self.validators = Some(validators);
        self
    }
}

/// How an incoming bucket combines with the stored one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
    /// Union of keys; incoming values win on conflicts.
    #[default]
    KeyUnion,
    /// Incoming bucket replaces the stored one wholesale.
    Replace,
}

/// Merge strategy per bucket, declared once for the registry.
///
/// For `resolvers`, `KeyUnion` works one level down: each incoming root
/// (`query`, `mutation`) replaces the stored root of the same name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MergePolicy {
    pub models: MergeStrategy,
    pub type_composers: MergeStrategy,
    pub resolvers: MergeStrategy,
    pub services: MergeStrategy,
    pub actions: MergeStrategy,
    pub validators: MergeStrategy,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("asset registration requires a non-empty module id")]
    MissingModuleId,
}

fn merge_keyed<T>(
    existing: &mut Option<IndexMap<String, T>>,
    incoming: Option<IndexMap<String, T>>,
    strategy: MergeStrategy,
) {
    let Some(incoming) = incoming else {
        return;
    };
    match (strategy, existing.as_mut()) {
        (MergeStrategy::KeyUnion, Some(current)) => current.extend(incoming),
        _ => *existing = Some(incoming),
    }
}

fn merge_resolvers(
    existing: &mut Option<ResolverMap>,
    incoming: Option<ResolverMap>,
    strategy: MergeStrategy,
) {
    let Some(incoming) = incoming else {
        return;
    };
    match (strategy, existing.as_mut()) {
        (MergeStrategy::KeyUnion, Some(current)) => {
            if incoming.query.is_some() {
                current.query = incoming.query;
            }
            if incoming.mutation.is_some() {
                current.mutation = incoming.mutation;
            }
        }
        _ => *existing = Some(incoming),
    }
}

impl ModuleAssets {
    pub(crate) fn merge_from(&mut self, incoming: ModuleAssets, policy: &MergePolicy) {
        merge_keyed(&mut self.models, incoming.models, policy.models);
        merge_keyed(
            &mut self.type_composers,
            incoming.type_composers,
            policy.type_composers,
        );
        merge_resolvers(&mut self.resolvers, incoming.resolvers, policy.resolvers);
        merge_keyed(&mut self.services, incoming.services, policy.services);
        merge_keyed(&mut self.actions, incoming.actions, policy.actions);
        merge_keyed(&mut self.validators, incoming.validators, policy.validators);
    }
}

/// Shared store of merged module assets, keyed by module id in registration order.
#[derive(Default)]
pub struct AssetRegistry {
    entries: RwLock<IndexMap<String, ModuleAssets>>,
    policy: MergePolicy,
}

impl std::fmt::Debug for AssetRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssetRegistry")
            .field("modules", &self.module_ids())
            .field("policy", &self.policy)
            .finish()
    }
}

impl AssetRegistry {
    pub fn new(policy: MergePolicy) -> Self {
        Self {
            entries: RwLock::new(IndexMap::new()),
            policy,
        }
    }

    pub fn policy(&self) -> &MergePolicy {
        &self.policy
    }

    /// Merges `assets` into the entry for `id`, creating it on first use.
    pub fn register(&self, id: &str, assets: ModuleAssets) -> Result<(), RegistryError> {
        if id.trim().is_empty() {
            return Err(RegistryError::MissingModuleId);
        }
        let mut entries = self.entries.write();
        match entries.get_mut(id) {
            Some(current) => {
                tracing::debug!(module = id, "Merging additional assets");
                current.merge_from(assets, &self.policy);
            }
            None => {
                tracing::debug!(module = id, ?assets, "Registering module assets");
                entries.insert(id.to_string(), assets);
            }
        }
        Ok(())
    }

    pub fn get_module(&self, id: &str) -> Option<ModuleAssets> {
        self.entries.read().get(id).cloned()
    }

    pub fn get_all_assets(&self) -> Vec<(String, ModuleAssets)> {
        self.entries
            .read()
            .iter()
            .map(|(id, assets)| (id.clone(), assets.clone()))
            .collect()
    }

    pub fn module_ids(&self) -> Vec<String> {
        self.entries.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    fn fold<T: Clone>(&self, pick: impl Fn(&ModuleAssets) -> Option<&T>) -> IndexMap<String, T> {
        self.entries
            .read()
            .iter()
            .filter_map(|(id, assets)| pick(assets).map(|bucket| (id.clone(), bucket.clone())))
            .collect()
    }

    pub fn get_models(&self) -> IndexMap<String, ModelMap> {
        self.fold(|a| a.models.as_ref())
    }

    pub fn get_type_composers(&self) -> IndexMap<String, TypeComposerMap> {
        self.fold(|a| a.type_composers.as_ref())
    }

    pub fn get_resolvers(&self) -> IndexMap<String, ResolverMap> {
        self.fold(|a| a.resolvers.as_ref())
    }

    pub fn get_services(&self) -> IndexMap<String, ServiceMap> {
        self.fold(|a| a.services.as_ref())
    }

    pub fn get_actions(&self) -> IndexMap<String, ActionMap> {
        self.fold(|a| a.actions.as_ref())
    }

    pub fn get_validators(&self) -> IndexMap<String, ValidatorMap> {
        self.fold(|a| a.validators.as_ref())
    }

    /// Flat lookup across all modules by registration key, then by GraphQL type name.
    /// The earliest registered module wins.
    pub fn find_type_composer(&self, name: &str) -> Option<TypeComposer> {
        let entries = self.entries.read();
        let map: &IndexMap<String, ModuleAssets> = &entries;
        let buckets = || map.values().filter_map(|a| a.type_composers.as_ref());
        buckets()
            .find_map(|tcs| tcs.get(name).cloned())
            .or_else(|| buckets().find_map(|tcs| tcs.values().find(|tc| tc.name() == name).cloned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MemoryModel;
    use crate::types::FieldSpec;
    use async_graphql::dynamic::TypeRef;
    use std::sync::Arc;

    fn tcs(entries: &[(&str, &str)]) -> TypeComposerMap {
        entries
            .iter()
            .map(|(key, name)| (key.to_string(), TypeComposer::object(*name)))
            .collect()
    }

    fn query(names: &[&str]) -> ResolverMap {
        let mut map = ResolverMap::default();
        for name in names {
            map.add_query(FieldSpec::property(*name, TypeRef::named(TypeRef::STRING)));
        }
        map
    }

    #[test]
    fn register_requires_id() {
        let reg = AssetRegistry::default();
        assert_eq!(
            reg.register("", ModuleAssets::new()),
            Err(RegistryError::MissingModuleId)
        );
        assert_eq!(
            reg.register("   ", ModuleAssets::new()),
            Err(RegistryError::MissingModuleId)
        );
        assert!(reg.is_empty());
    }

    #[test]
    fn repeated_registration_unions_keys() {
        let reg = AssetRegistry::default();
        reg.register(
            "user",
            ModuleAssets::new().with_type_composers(tcs(&[("UserTC", "User")])),
        )
        .unwrap();
        reg.register(
            "user",
            ModuleAssets::new().with_type_composers(tcs(&[("ProfileTC", "Profile")])),
        )
        .unwrap();

        let entry = reg.get_module("user").unwrap();
        let keys: Vec<_> = entry.type_composers.unwrap().keys().cloned().collect();
        assert_eq!(keys, vec!["UserTC".to_string(), "ProfileTC".to_string()]);
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn incoming_value_wins_on_key_conflict() {
        let reg = AssetRegistry::default();
        reg.register(
            "user",
            ModuleAssets::new().with_type_composers(tcs(&[("UserTC", "User")])),
        )
        .unwrap();
        reg.register(
            "user",
            ModuleAssets::new().with_type_composers(tcs(&[("UserTC", "Account")])),
        )
        .unwrap();

        let tc = reg.find_type_composer("UserTC").unwrap();
        assert_eq!(tc.name(), "Account");
    }

    #[test]
    fn replace_strategy_overwrites_bucket() {
        let policy = MergePolicy {
            type_composers: MergeStrategy::Replace,
            ..MergePolicy::default()
        };
        let reg = AssetRegistry::new(policy);
        reg.register(
            "user",
            ModuleAssets::new().with_type_composers(tcs(&[("UserTC", "User")])),
        )
        .unwrap();
        reg.register(
            "user",
            ModuleAssets::new().with_type_composers(tcs(&[("ProfileTC", "Profile")])),
        )
        .unwrap();

        let entry = reg.get_module("user").unwrap();
        let keys: Vec<_> = entry.type_composers.unwrap().keys().cloned().collect();
        assert_eq!(keys, vec!["ProfileTC".to_string()]);
    }

    #[test]
    fn resolvers_merge_one_level_down() {
        let reg = AssetRegistry::default();
        let mut first = query(&["a", "b"]);
        first.add_mutation(FieldSpec::property("m", TypeRef::named(TypeRef::STRING)));
        reg.register("habit", ModuleAssets::new().with_resolvers(first))
            .unwrap();
        reg.register("habit", ModuleAssets::new().with_resolvers(query(&["c"])))
            .unwrap();

        let resolvers = reg.get_module("habit").unwrap().resolvers.unwrap();
        let query_names: Vec<_> = resolvers.query_fields().map(|f| f.name.clone()).collect();
        assert_eq!(query_names, vec!["c".to_string()]);
        assert_eq!(resolvers.mutation_fields().count(), 1);
    }

    #[test]
    fn folds_omit_modules_without_bucket() {
        let reg = AssetRegistry::default();
        let mut models = ModelMap::new();
        models.insert("users".into(), Arc::new(MemoryModel::new("users")));
        reg.register("user", ModuleAssets::new().with_models(models))
            .unwrap();
        reg.register(
            "habit",
            ModuleAssets::new().with_type_composers(tcs(&[("HabitTC", "Habit")])),
        )
        .unwrap();

        let models = reg.get_models();
        assert_eq!(models.keys().collect::<Vec<_>>(), vec!["user"]);
        let tcs = reg.get_type_composers();
        assert_eq!(tcs.keys().collect::<Vec<_>>(), vec!["habit"]);
        assert!(reg.get_services().is_empty());

        let all: Vec<_> = reg.get_all_assets().into_iter().map(|(id, _)| id).collect();
        assert_eq!(all, vec!["user".to_string(), "habit".to_string()]);
    }

    #[test]
    fn find_type_composer_by_type_name() {
        let reg = AssetRegistry::default();
        reg.register(
            "user",
            ModuleAssets::new().with_type_composers(tcs(&[("UserTC", "User")])),
        )
        .unwrap();
        assert!(reg.find_type_composer("User").is_some());
        assert!(reg.find_type_composer("Missing").is_none());
    }
}
