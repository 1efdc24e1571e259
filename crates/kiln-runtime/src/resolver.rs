//! Activation order from manifests.
//!
//! A module with a dependency absent from the input is excluded before
//! ordering. Modules that depend on an excluded module, directly or not,
//! are excluded as blocked. The remainder is ordered with Kahn's algorithm;
//! whenever several modules are ready the one discovered first goes next.
//! Modules still unordered at the end form, or hang off, a cycle and are
//! reported together.

use std::collections::{BTreeSet, HashMap, HashSet};

use kiln_workspace::{Manifest, ModuleId};

/// A module excluded for missing dependencies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingDependency {
    /// Excluded module.
    pub id: ModuleId,
    /// Dependencies absent from the input.
    pub missing: Vec<ModuleId>,
}

/// A module excluded because a dependency of it was excluded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockedDependency {
    /// Excluded module.
    pub id: ModuleId,
    /// Dependencies that are present but excluded themselves.
    pub excluded: Vec<ModuleId>,
}

/// Output of [`resolve`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resolution {
    /// Safe activation order.
    pub order: Vec<ModuleId>,
    /// Modules excluded for missing dependencies, in discovery order.
    pub missing: Vec<MissingDependency>,
    /// Modules excluded because they depend on an excluded module, in
    /// discovery order.
    pub blocked: Vec<BlockedDependency>,
    /// Modules involved in a cycle, in discovery order.
    pub cyclic: Vec<ModuleId>,
}

/// Compute the activation order of `manifests`, given in discovery order.
///
/// Pure: no I/O, and the same input always yields the same output.
pub fn resolve<'a, I>(manifests: I) -> Resolution
where
    I: IntoIterator<Item = &'a Manifest>,
{
    let nodes: Vec<(&ModuleId, Vec<&ModuleId>)> = manifests
        .into_iter()
        .map(|m| {
            let mut seen = HashSet::new();
            let deps = m.depends.iter().filter(|d| seen.insert(*d)).collect();
            (&m.id, deps)
        })
        .collect();

    let mut resolution = Resolution::default();

    let present: HashSet<&ModuleId> = nodes.iter().map(|(id, _)| *id).collect();
    let mut excluded = vec![false; nodes.len()];
    for (i, (id, deps)) in nodes.iter().enumerate() {
        let missing: Vec<ModuleId> = deps
            .iter()
            .filter(|d| !present.contains(**d))
            .map(|d| (*d).clone())
            .collect();
        if !missing.is_empty() {
            excluded[i] = true;
            resolution.missing.push(MissingDependency {
                id: (*id).clone(),
                missing,
            });
        }
    }

    // Spread exclusion to dependents until nothing changes.
    let mut gone: HashSet<&ModuleId> = nodes
        .iter()
        .zip(&excluded)
        .filter(|(_, ex)| **ex)
        .map(|((id, _), _)| *id)
        .collect();
    let mut blocked_at = Vec::new();
    loop {
        let mut changed = false;
        for (i, (id, deps)) in nodes.iter().enumerate() {
            if excluded[i] {
                continue;
            }
            let blockers: Vec<ModuleId> = deps
                .iter()
                .filter(|d| gone.contains(**d))
                .map(|d| (*d).clone())
                .collect();
            if !blockers.is_empty() {
                excluded[i] = true;
                gone.insert(*id);
                blocked_at.push((i, BlockedDependency {
                    id: (*id).clone(),
                    excluded: blockers,
                }));
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }
    blocked_at.sort_by_key(|(i, _)| *i);
    resolution.blocked = blocked_at.into_iter().map(|(_, b)| b).collect();

    // Kahn over what is left.
    let index: HashMap<&ModuleId, usize> = nodes
        .iter()
        .enumerate()
        .filter(|(i, _)| !excluded[*i])
        .map(|(i, (id, _))| (*id, i))
        .collect();
    let mut indegree = vec![0usize; nodes.len()];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); nodes.len()];
    for (i, (_, deps)) in nodes.iter().enumerate() {
        if excluded[i] {
            continue;
        }
        for dep in deps {
            if let Some(&d) = index.get(*dep) {
                dependents[d].push(i);
                indegree[i] = indegree[i].saturating_add(1);
            }
        }
    }

    let mut ready: BTreeSet<usize> = (0..nodes.len())
        .filter(|&i| !excluded[i] && indegree[i] == 0)
        .collect();
    let mut placed = vec![false; nodes.len()];
    while let Some(next) = ready.pop_first() {
        placed[next] = true;
        resolution.order.push(nodes[next].0.clone());
        for &dependent in &dependents[next] {
            indegree[dependent] = indegree[dependent].saturating_sub(1);
            if indegree[dependent] == 0 {
                ready.insert(dependent);
            }
        }
    }

    resolution.cyclic = (0..nodes.len())
        .filter(|&i| !excluded[i] && !placed[i])
        .map(|i| nodes[i].0.clone())
        .collect();
    resolution
}
