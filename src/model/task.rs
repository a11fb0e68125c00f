use std::{collections::BTreeMap, fmt::Display, sync::Arc, time::Duration};

use serde::{Deserialize, Serialize};

use super::record::{DependencyRecord, PackageName};

/// Target architecture of a build, e.g. `x86_64`.
#[derive(Clone, Hash, Deserialize, Serialize, Debug, PartialEq, Eq, Ord, PartialOrd)]
#[serde(transparent)]
pub struct Arch(String);

impl Arch {
    pub fn new(s: impl Into<String>) -> Self {
        Arch(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for Arch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Arch {
    fn from(s: &str) -> Self {
        Arch(s.to_string())
    }
}

/// What an availability check is asked about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target<'a> {
    Arch(&'a Arch),
    /// An architecture-independent artifact, which satisfies every architecture.
    NoArch,
}

impl Display for Target<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Target::Arch(arch) => write!(f, "{arch}"),
            Target::NoArch => f.write_str("noarch"),
        }
    }
}

/// Build configuration profile, e.g. the name of a chroot configuration.
///
/// The per-architecture profile is `<name>-<arch>` where the architecture may
/// be renamed through `arch_aliases` (`i686` builds in an `i386` root).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BuildProfile {
    pub name: String,
    pub arch_aliases: BTreeMap<Arch, String>,
}

impl BuildProfile {
    pub fn new(name: impl Into<String>) -> Self {
        BuildProfile {
            name: name.into(),
            arch_aliases: BTreeMap::new(),
        }
    }

    pub fn with_alias(mut self, arch: impl Into<Arch>, alias: impl Into<String>) -> Self {
        self.arch_aliases.insert(arch.into(), alias.into());
        self
    }

    pub fn for_arch(&self, arch: &Arch) -> String {
        let arch = self
            .arch_aliases
            .get(arch)
            .map(String::as_str)
            .unwrap_or(arch.as_str());
        if self.name.is_empty() {
            arch.to_string()
        } else {
            format!("{}-{}", self.name, arch)
        }
    }
}

/// Correlation key of a scheduled build.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Ord, PartialOrd)]
pub struct TaskId {
    pub package: PackageName,
    pub arch: Arch,
}

impl TaskId {
    pub fn new(package: PackageName, arch: Arch) -> Self {
        TaskId { package, arch }
    }
}

impl Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.package, self.arch)
    }
}

/// One package to build for one architecture with one profile.
#[derive(Debug, Clone)]
pub struct BuildTask {
    pub id: TaskId,
    /// Profile for this architecture, as computed by [`BuildProfile::for_arch`].
    pub profile: String,
    /// `None` when the package was scheduled from a plain list and is not in
    /// the catalog.
    pub record: Option<Arc<DependencyRecord>>,
}

impl BuildTask {
    pub fn package(&self) -> &PackageName {
        &self.id.package
    }

    pub fn arch(&self) -> &Arch {
        &self.id.arch
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// An artifact for the target architecture already exists.
    AlreadyBuilt,
    /// An architecture-independent artifact already exists.
    ArchIndependent,
    /// Recorded as succeeded by an earlier run writing to the same output.
    PreviousRun,
}

impl Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::AlreadyBuilt => f.write_str("already built"),
            SkipReason::ArchIndependent => f.write_str("architecture independent build exists"),
            SkipReason::PreviousRun => f.write_str("succeeded in a previous run"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildOutcome {
    Succeeded,
    Failed { reason: String },
    Skipped { reason: SkipReason },
    TimedOut { after: Duration },
    Cancelled,
}

impl BuildOutcome {
    pub fn failed(reason: impl Into<String>) -> Self {
        BuildOutcome::Failed {
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> OutcomeKind {
        match self {
            BuildOutcome::Succeeded => OutcomeKind::Succeeded,
            BuildOutcome::Failed { .. } => OutcomeKind::Failed,
            BuildOutcome::Skipped { .. } => OutcomeKind::Skipped,
            BuildOutcome::TimedOut { .. } => OutcomeKind::TimedOut,
            BuildOutcome::Cancelled => OutcomeKind::Cancelled,
        }
    }
}

impl Display for BuildOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BuildOutcome::Succeeded => f.write_str("succeeded"),
            BuildOutcome::Failed { reason } => write!(f, "failed: {reason}"),
            BuildOutcome::Skipped { reason } => write!(f, "skipped: {reason}"),
            BuildOutcome::TimedOut { after } => write!(f, "timed out after {}s", after.as_secs()),
            BuildOutcome::Cancelled => f.write_str("cancelled"),
        }
    }
}

/// Outcome without its payload, used to partition results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd)]
pub enum OutcomeKind {
    Succeeded,
    Failed,
    Skipped,
    TimedOut,
    Cancelled,
}

impl OutcomeKind {
    pub const ALL: [OutcomeKind; 5] = [
        OutcomeKind::Succeeded,
        OutcomeKind::Failed,
        OutcomeKind::Skipped,
        OutcomeKind::TimedOut,
        OutcomeKind::Cancelled,
    ];

    /// Prefix of the per-architecture result file, if this kind is persisted.
    /// Cancelled builds are not written so that a resumed run retries them.
    pub fn file_prefix(&self) -> Option<&'static str> {
        match self {
            OutcomeKind::Succeeded => Some("succeeded"),
            OutcomeKind::Failed => Some("failed"),
            OutcomeKind::Skipped => Some("skipped"),
            OutcomeKind::TimedOut => Some("timed_out"),
            OutcomeKind::Cancelled => None,
        }
    }
}

impl Display for OutcomeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutcomeKind::Succeeded => f.write_str("succeeded"),
            OutcomeKind::Failed => f.write_str("failed"),
            OutcomeKind::Skipped => f.write_str("skipped"),
            OutcomeKind::TimedOut => f.write_str("timed out"),
            OutcomeKind::Cancelled => f.write_str("cancelled"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;

    #[test]
    fn profile_for_arch_uses_aliases() {
        let profile = BuildProfile::new("fedora-rawhide").with_alias("i686", "i386");
        assert_eq!(profile.for_arch(&Arch::from("i686")), "fedora-rawhide-i386");
        assert_eq!(
            profile.for_arch(&Arch::from("x86_64")),
            "fedora-rawhide-x86_64"
        );
        assert_eq!(
            BuildProfile::default().for_arch(&Arch::from("x86_64")),
            "x86_64"
        );
    }
}
