//! Link-time module discovery.
//!
//! Module crates submit a [`ModuleRegistration`] through [`register_module!`];
//! the host collects them with `inventory` and loads them in dependency order.

use std::collections::{HashMap, VecDeque};

use thiserror::Error;

use crate::context::AppContext;
use crate::descriptor::ModuleDescriptor;

/// Builds a module descriptor against the shared context.
pub type ModuleFactory = fn(&AppContext) -> anyhow::Result<ModuleDescriptor>;

/// What a module crate submits to the link-time registry.
#[derive(Debug, Clone, Copy)]
pub struct ModuleRegistration {
    pub id: &'static str,
    /// Modules whose factories must run first.
    pub dependencies: &'static [&'static str],
    pub factory: ModuleFactory,
}

inventory::collect!(ModuleRegistration);

/// Submits a module factory for discovery by `ModuleHost::load_registered`.
///
/// ```ignore
/// gqlkit::register_module!("subscription", deps = ["user"], crate::module::build);
/// ```
#[macro_export]
macro_rules! register_module {
    ($id:literal, deps = [$($dep:literal),* $(,)?], $factory:path) => {
        $crate::inventory::submit! {
            $crate::ModuleRegistration {
                id: $id,
                dependencies: &[$($dep),*],
                factory: $factory,
            }
        }
    };
    ($id:literal, $factory:path) => {
        $crate::register_module!($id, deps = [], $factory);
    };
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DiscoveryError {
    #[error("module '{0}' is registered more than once")]
    DuplicateRegistration(String),
    #[error("module '{module}' depends on unknown '{depends_on}'")]
    UnknownDependency { module: String, depends_on: String },
    #[error("cyclic dependency detected: {}", path.join(" -> "))]
    CycleDetected { path: Vec<&'static str> },
}

/// All registrations linked into the binary, dependency-ordered.
pub fn discover() -> Result<Vec<ModuleRegistration>, DiscoveryError> {
    sort_registrations(inventory::iter::<ModuleRegistration>.into_iter().copied().collect())
}

/// Orders registrations so that dependencies come first. Ties break by id.
pub fn sort_registrations(
    mut regs: Vec<ModuleRegistration>,
) -> Result<Vec<ModuleRegistration>, DiscoveryError> {
    regs.sort_by(|a, b| a.id.cmp(b.id));

    let mut idx: HashMap<&'static str, usize> = HashMap::new();
    for (i, reg) in regs.iter().enumerate() {
        if idx.insert(reg.id, i).is_some() {
            return Err(DiscoveryError::DuplicateRegistration(reg.id.to_string()));
        }
    }

    // edge dep -> module
    let mut adj = vec![Vec::<usize>::new(); regs.len()];
    for (u, reg) in regs.iter().enumerate() {
        for &dep in reg.dependencies {
            let v = *idx.get(dep).ok_or_else(|| DiscoveryError::UnknownDependency {
                module: reg.id.to_string(),
                depends_on: dep.to_string(),
            })?;
            adj[v].push(u);
        }
    }

    let mut indeg = vec![0usize; regs.len()];
    for targets in &adj {
        for &t in targets {
            indeg[t] += 1;
        }
    }
    let mut queue: VecDeque<usize> = indeg
        .iter()
        .enumerate()
        .filter(|(_, d)| **d == 0)
        .map(|(i, _)| i)
        .collect();

    let mut order = Vec::with_capacity(regs.len());
    while let Some(u) = queue.pop_front() {
        order.push(regs[u]);
        for &w in &adj[u] {
            indeg[w] -= 1;
            if indeg[w] == 0 {
                queue.push_back(w);
            }
        }
    }

    if order.len() < regs.len() {
        return Err(DiscoveryError::CycleDetected {
            path: trace_cycle(&regs, &idx, &indeg),
        });
    }

    tracing::info!(
        modules = ?order.iter().map(|r| r.id).collect::<Vec<_>>(),
        "Module load order resolved"
    );
    Ok(order)
}

/// Walks unresolved dependencies from the first module left unsorted until a
/// module repeats. Every unsorted module has at least one unsorted dependency,
/// so the walk always closes. The path reads `a -> b` as "a depends on b".
fn trace_cycle(
    regs: &[ModuleRegistration],
    idx: &HashMap<&'static str, usize>,
    indeg: &[usize],
) -> Vec<&'static str> {
    let unsorted = |i: usize| indeg[i] > 0;
    let Some(mut current) = (0..regs.len()).find(|&i| unsorted(i)) else {
        return Vec::new();
    };

    let mut walk: Vec<usize> = Vec::new();
    loop {
        if let Some(start) = walk.iter().position(|&i| i == current) {
            let mut path: Vec<&'static str> = walk[start..].iter().map(|&i| regs[i].id).collect();
            path.push(regs[current].id);
            return path;
        }
        walk.push(current);
        let next = regs[current]
            .dependencies
            .iter()
            .filter_map(|dep| idx.get(dep).copied())
            .find(|&i| unsorted(i));
        match next {
            Some(i) => current = i,
            None => return walk.iter().map(|&i| regs[i].id).collect(),
        }
    }
}
