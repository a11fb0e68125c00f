use std::{path::Path, sync::Arc};

use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::{
    capability::{AvailabilityCheck, BuildExecutor, ProvidedSource},
    cli::command_handlers::{do_build, do_resolve, do_run},
    config::{ConfigError, RepobuildConfig},
    model::{catalog::read_package_list, record::PackageName, ParseError},
    resolver::{ResolveError, Resolution},
    scheduler::{BuildReport, SchedulerError},
    store::StoreError,
};

mod builder;

pub use builder::RepobuildBuilder;

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("Invalid {what} command: {reason}")]
    InvalidCommand { what: &'static str, reason: String },
    #[error("No build command configured")]
    NoBuildCommand,
    #[error("No catalog configured")]
    NoCatalog,
    #[error(transparent)]
    Input(#[from] ParseError),
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
}

/// Resolves catalogs into build levels and rebuilds them.
pub struct Repobuild {
    config: RepobuildConfig,
    availability: Arc<dyn AvailabilityCheck>,
    executor: Option<Arc<dyn BuildExecutor>>,
    provided: Option<Arc<dyn ProvidedSource>>,
    cancellation: CancellationToken,
}

impl Repobuild {
    pub fn builder() -> RepobuildBuilder {
        RepobuildBuilder::default()
    }

    pub fn config(&self) -> &RepobuildConfig {
        &self.config
    }

    /// Cancelling this token stops a running build: nothing new is started
    /// and running builds are reported as cancelled.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Computes the build levels and writes the level files and the list of
    /// packages with missing dependencies to the output directory.
    pub async fn resolve(&self) -> Result<Resolution, Error> {
        do_resolve(&self.config, self.provided.as_deref(), &self.cancellation).await
    }

    /// Builds the given packages as a single batch, without resolving.
    pub async fn build(&self, packages: &[PackageName]) -> Result<BuildReport, Error> {
        do_build(
            &self.config,
            self.availability.clone(),
            self.executor()?,
            self.cancellation.clone(),
            packages,
        )
        .await
    }

    /// Builds the packages listed in a newline separated file.
    pub async fn build_list(&self, path: impl AsRef<Path>) -> Result<BuildReport, Error> {
        let packages = read_package_list(path.as_ref())?;
        self.build(&packages).await
    }

    /// Resolves, then builds every level in order.
    pub async fn run(&self) -> Result<BuildReport, Error> {
        do_run(
            &self.config,
            self.provided.as_deref(),
            self.availability.clone(),
            self.executor()?,
            self.cancellation.clone(),
        )
        .await
    }

    fn executor(&self) -> Result<Arc<dyn BuildExecutor>, Error> {
        self.executor.clone().ok_or(Error::NoBuildCommand)
    }
}
