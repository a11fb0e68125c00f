use std::{collections::BTreeMap, fmt::Display};

use crate::{
    model::task::{Arch, OutcomeKind},
    store::ResultStore,
};

/// End of run summary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildReport {
    /// Number of packages in each level, by level index.
    pub level_sizes: Vec<usize>,
    pub unresolved: usize,
    pub counts: BTreeMap<Arch, BTreeMap<OutcomeKind, usize>>,
    /// The run was stopped before every batch was built.
    pub cancelled: bool,
}

impl BuildReport {
    pub(super) fn new(
        level_sizes: Vec<usize>,
        unresolved: usize,
        architectures: &[Arch],
        store: &ResultStore,
        cancelled: bool,
    ) -> Self {
        let counts = architectures
            .iter()
            .map(|arch| {
                let per_kind = OutcomeKind::ALL
                    .into_iter()
                    .map(|kind| (kind, store.count(arch, kind)))
                    .collect();
                (arch.clone(), per_kind)
            })
            .collect();
        BuildReport {
            level_sizes,
            unresolved,
            counts,
            cancelled,
        }
    }

    pub fn count(&self, arch: &Arch, kind: OutcomeKind) -> usize {
        self.counts
            .get(arch)
            .and_then(|per_kind| per_kind.get(&kind))
            .copied()
            .unwrap_or(0)
    }

    /// Total number of outcomes recorded across architectures.
    pub fn total(&self) -> usize {
        self.counts.values().flat_map(BTreeMap::values).sum()
    }
}

impl Display for BuildReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (index, size) in self.level_sizes.iter().enumerate() {
            writeln!(f, "Level {index}: {size} packages")?;
        }
        writeln!(f, "{} packages had missing dependencies", self.unresolved)?;
        for (arch, per_kind) in &self.counts {
            let counts: Vec<String> = per_kind
                .iter()
                .map(|(kind, count)| format!("{count} {kind}"))
                .collect();
            writeln!(f, "{arch}: {}", counts.join(", "))?;
        }
        if self.cancelled {
            writeln!(f, "Run cancelled before completion")?;
        }
        Ok(())
    }
}
