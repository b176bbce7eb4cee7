//! The schema namespace: type composers installed for one composition pass.

use std::collections::HashMap;

use indexmap::IndexMap;

use crate::descriptor::ResolverMap;
use crate::types::TypeComposer;

pub const QUERY: &str = "Query";
pub const MUTATION: &str = "Mutation";

const ROOT_OWNER: &str = "<root>";

/// Outcome of [`SchemaNamespace::install`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Install {
    Installed,
    /// The name was already taken; the incoming composer was dropped.
    Collision { existing_owner: String },
}

/// Composition-scoped type table. Owned by the caller and reset at the start of
/// every `compose`.
#[derive(Debug)]
pub struct SchemaNamespace {
    types: IndexMap<String, TypeComposer>,
    origins: HashMap<String, String>,
    query: TypeComposer,
    mutation: Option<TypeComposer>,
    resolvers: IndexMap<String, ResolverMap>,
}

impl Default for SchemaNamespace {
    fn default() -> Self {
        Self::new()
    }
}

impl SchemaNamespace {
    pub fn new() -> Self {
        Self {
            types: IndexMap::new(),
            origins: HashMap::new(),
            query: TypeComposer::object(QUERY),
            mutation: None,
            resolvers: IndexMap::new(),
        }
    }

    /// Drops every installed type and starts over with an empty `Query` root.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Installs `tc` under its type name unless the name is taken. First writer wins.
    pub fn install(&mut self, module_id: &str, tc: TypeComposer) -> Install {
        let name = tc.name();
        if name == QUERY || name == MUTATION {
            return Install::Collision {
                existing_owner: ROOT_OWNER.to_string(),
            };
        }
        if let Some(owner) = self.origins.get(&name) {
            return Install::Collision {
                existing_owner: owner.clone(),
            };
        }
        self.origins.insert(name.clone(), module_id.to_string());
        self.types.insert(name, tc);
        Install::Installed
    }

    pub fn get(&self, name: &str) -> Option<&TypeComposer> {
        match name {
            QUERY => Some(&self.query),
            MUTATION => self.mutation.as_ref(),
            _ => self.types.get(name),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Module that installed `name`.
    pub fn owner(&self, name: &str) -> Option<&str> {
        self.origins.get(name).map(String::as_str)
    }

    /// Installed non-root types, in installation order.
    pub fn types(&self) -> impl Iterator<Item = &TypeComposer> {
        self.types.values()
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    pub fn query(&self) -> &TypeComposer {
        &self.query
    }

    pub fn mutation(&self) -> Option<&TypeComposer> {
        self.mutation.as_ref()
    }

    /// The `Mutation` root, created on first use.
    pub fn ensure_mutation(&mut self) -> &TypeComposer {
        self.mutation
            .get_or_insert_with(|| TypeComposer::object(MUTATION))
    }

    /// Keeps the raw resolver bucket a module contributed during this pass.
    pub fn record_resolvers(&mut self, module_id: &str, resolvers: ResolverMap) {
        self.resolvers.insert(module_id.to_string(), resolvers);
    }

    pub fn module_resolvers(&self) -> &IndexMap<String, ResolverMap> {
        &self.resolvers
    }
}
