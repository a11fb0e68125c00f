//! Interfaces to the outside world the scheduler depends on.
//!
//! Implementations must be safe to call concurrently from several build
//! workers.

mod command;
mod provided;

use async_trait::async_trait;

use crate::model::{
    catalog::ProvidedSet,
    record::PackageName,
    task::{BuildOutcome, BuildTask, Target},
};

pub use command::{CommandAvailability, CommandExecutor, CommandTemplate};
pub use provided::{CommandProvided, FileProvided, StaticProvided};

/// Answers whether an artifact already exists for a package.
#[async_trait]
pub trait AvailabilityCheck: Send + Sync {
    async fn is_built(&self, package: &PackageName, target: Target<'_>) -> anyhow::Result<bool>;
}

/// Builds the artifact for one task.
///
/// An `Err` is recorded as a failed build of that task only.
#[async_trait]
pub trait BuildExecutor: Send + Sync {
    async fn execute(&self, task: &BuildTask) -> anyhow::Result<BuildOutcome>;
}

/// Lists the packages the base platform already provides.
#[async_trait]
pub trait ProvidedSource: Send + Sync {
    async fn provided(&self) -> anyhow::Result<ProvidedSet>;

    /// Human readable origin, used when reporting an unavailable source.
    fn origin(&self) -> String;
}

/// Availability check for setups that have no repository to query: nothing
/// is ever built yet.
pub struct NoAvailabilityCheck;

#[async_trait]
impl AvailabilityCheck for NoAvailabilityCheck {
    async fn is_built(&self, _package: &PackageName, _target: Target<'_>) -> anyhow::Result<bool> {
        Ok(false)
    }
}
