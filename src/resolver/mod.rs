use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use log::{debug, info};
use thiserror::Error;

use crate::model::{
    catalog::{Catalog, ProvidedSet},
    record::{DependencyRecord, DependencySelection, PackageName},
};

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ResolveError {
    #[error("{package} is assigned to both level {first} and level {second}, something went wrong")]
    ConsistencyViolation {
        package: PackageName,
        first: usize,
        second: usize,
    },
}

/// Packages that can be built together once every earlier level is built.
///
/// Packages are listed in catalog insertion order. Only membership is
/// meaningful; consumers must not rely on the order within a level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Level {
    pub index: usize,
    pub packages: Vec<PackageName>,
}

impl Level {
    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    pub fn contains(&self, name: &PackageName) -> bool {
        self.packages.contains(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Resolution {
    pub levels: Vec<Level>,
    /// Packages whose dependencies never became available.
    pub unresolved: BTreeSet<PackageName>,
    /// Catalog packages left out because the base platform provides them.
    pub already_provided: BTreeSet<PackageName>,
    /// For each unresolved package, the selected dependencies that never
    /// became available.
    pub missing_dependencies: BTreeMap<PackageName, BTreeSet<PackageName>>,
}

impl Resolution {
    pub fn scheduled_count(&self) -> usize {
        self.levels.iter().map(Level::len).sum()
    }

    pub fn level_of(&self, name: &PackageName) -> Option<usize> {
        self.levels
            .iter()
            .find(|level| level.contains(name))
            .map(|level| level.index)
    }
}

/// Orders a catalog into build levels.
///
/// Level 0 holds the packages whose selected dependencies are all provided;
/// level `k` holds the packages whose selected dependencies are provided or
/// in a level below `k`. Whatever never qualifies is unresolved: dependency
/// cycles and references to unknown packages end up there instead of
/// preventing termination.
#[derive(Debug, Clone, Default)]
pub struct LevelResolver {
    selection: DependencySelection,
}

impl LevelResolver {
    pub fn new(selection: DependencySelection) -> Self {
        LevelResolver { selection }
    }

    pub fn selection(&self) -> &DependencySelection {
        &self.selection
    }

    pub fn resolve(
        &self,
        catalog: &Catalog,
        provided: &ProvidedSet,
    ) -> Result<Resolution, ResolveError> {
        let mut known: HashSet<&PackageName> = provided.iter().collect();
        let mut already_provided = BTreeSet::new();
        let mut pending: Vec<usize> = Vec::with_capacity(catalog.len());

        for position in 0..catalog.len() {
            let name = catalog.record_at(position).name();
            if provided.contains(name) {
                debug!("{} is already provided", name);
                already_provided.insert(name.clone());
            } else {
                pending.push(position);
            }
        }

        let mut assigned: HashMap<&PackageName, usize> = HashMap::new();
        let mut levels: Vec<Level> = Vec::new();

        loop {
            let index = levels.len();
            let start = pending.len();
            // `known` is only extended after the whole pass, so a package
            // never lands in the same level as one of its dependencies.
            let (ready, rest): (Vec<usize>, Vec<usize>) =
                pending.into_iter().partition(|&position| {
                    self.is_satisfied(catalog.record_at(position), &known)
                });
            pending = rest;

            info!(
                "Loop: {}, started with {} and ending with {} (added {})",
                index,
                start,
                pending.len(),
                ready.len()
            );

            if ready.is_empty() {
                info!("Could not add any more packages to build, stopping");
                break;
            }

            let mut packages = Vec::with_capacity(ready.len());
            for position in ready {
                let name = catalog.record_at(position).name();
                if let Some(first) = assigned.insert(name, index) {
                    return Err(ResolveError::ConsistencyViolation {
                        package: name.clone(),
                        first,
                        second: index,
                    });
                }
                known.insert(name);
                packages.push(name.clone());
            }
            levels.push(Level { index, packages });
        }

        let mut unresolved = BTreeSet::new();
        let mut missing_dependencies = BTreeMap::new();
        for position in pending {
            let record = catalog.record_at(position);
            let missing: BTreeSet<PackageName> = record
                .selected_dependencies(&self.selection)
                .into_iter()
                .filter(|dependency| !known.contains(dependency))
                .cloned()
                .collect();
            debug!(
                "{} has missing dependencies: {}",
                record.name(),
                missing
                    .iter()
                    .map(PackageName::as_str)
                    .collect::<Vec<_>>()
                    .join(", ")
            );
            missing_dependencies.insert(record.name().clone(), missing);
            unresolved.insert(record.name().clone());
        }

        let resolution = Resolution {
            levels,
            unresolved,
            already_provided,
            missing_dependencies,
        };
        info!("{} packages are provided", provided.len());
        info!("{} packages can be built", resolution.scheduled_count());
        info!(
            "{} packages had missing dependencies",
            resolution.unresolved.len()
        );
        Ok(resolution)
    }

    fn is_satisfied(&self, record: &DependencyRecord, known: &HashSet<&PackageName>) -> bool {
        record
            .selected_dependencies(&self.selection)
            .iter()
            .all(|dependency| known.contains(dependency))
    }
}
