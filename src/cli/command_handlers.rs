use std::sync::Arc;

use log::{debug, info, warn};
use tokio_util::sync::CancellationToken;

use crate::{
    capability::{AvailabilityCheck, BuildExecutor, ProvidedSource},
    config::RepobuildConfig,
    model::{
        catalog::{Catalog, CatalogUnavailable, ProvidedSet},
        record::PackageName,
    },
    resolver::{LevelResolver, Resolution},
    scheduler::{BuildReport, BuildScheduler, SchedulerSettings},
    store::ResultStore,
    Error,
};

/// Handler to resolve command
/// Loads the catalogs and the provided packages, computes the build levels
/// and writes them to the output directory
pub async fn do_resolve(
    config: &RepobuildConfig,
    provided: Option<&dyn ProvidedSource>,
    cancellation: &CancellationToken,
) -> Result<Resolution, Error> {
    let store = open_store(config, cancellation).await?;
    let (_, resolution) = resolve_into(config, provided, &store).await?;
    Ok(resolution)
}

/// Handler to build command
/// Builds a list of packages as one batch, skipping what is already built
pub async fn do_build(
    config: &RepobuildConfig,
    availability: Arc<dyn AvailabilityCheck>,
    executor: Arc<dyn BuildExecutor>,
    cancellation: CancellationToken,
    packages: &[PackageName],
) -> Result<BuildReport, Error> {
    let mut store = open_store(config, &cancellation).await?;
    // Records are only used to fill in versions, so an absent catalog is fine.
    let catalog = if config.catalogs.is_empty() {
        Catalog::new()
    } else {
        load_catalog(config)
    };
    info!("{} packages to build", packages.len());
    let scheduler = build_scheduler(config, availability, executor, cancellation);
    let report = scheduler.run_batch(packages, &catalog, &mut store).await?;
    Ok(report)
}

/// Handler to run command
/// Resolves the build levels, then builds them one after the other
pub async fn do_run(
    config: &RepobuildConfig,
    provided: Option<&dyn ProvidedSource>,
    availability: Arc<dyn AvailabilityCheck>,
    executor: Arc<dyn BuildExecutor>,
    cancellation: CancellationToken,
) -> Result<BuildReport, Error> {
    let mut store = open_store(config, &cancellation).await?;
    let (catalog, resolution) = resolve_into(config, provided, &store).await?;
    let scheduler = build_scheduler(config, availability, executor, cancellation);
    let report = scheduler.run(&catalog, &resolution, &mut store).await?;
    Ok(report)
}

async fn open_store(
    config: &RepobuildConfig,
    cancellation: &CancellationToken,
) -> Result<ResultStore, Error> {
    let store =
        ResultStore::open_with_wait(&config.output_directory, config.lock_timeout, cancellation)
            .await?;
    Ok(store)
}

async fn resolve_into(
    config: &RepobuildConfig,
    provided: Option<&dyn ProvidedSource>,
    store: &ResultStore,
) -> Result<(Catalog, Resolution), Error> {
    if config.catalogs.is_empty() {
        return Err(Error::NoCatalog);
    }
    let catalog = load_catalog(config);
    let provided = load_provided(provided).await;

    let resolution =
        LevelResolver::new(config.selection.clone()).resolve(&catalog, &provided)?;
    for (package, missing) in &resolution.missing_dependencies {
        debug!(
            "{} is missing {}",
            package,
            missing
                .iter()
                .map(PackageName::as_str)
                .collect::<Vec<_>>()
                .join(", ")
        );
    }

    store.write_resolution(&resolution)?;
    Ok((catalog, resolution))
}

fn load_catalog(config: &RepobuildConfig) -> Catalog {
    let (catalog, unavailable) = Catalog::load_all(&config.catalogs, &config.ignored_dependencies);
    if !unavailable.is_empty() && catalog.is_empty() {
        warn!("None of the {} catalogs could be read", config.catalogs.len());
    }
    catalog
}

/// An unavailable provided-set is reported and treated as empty.
async fn load_provided(source: Option<&dyn ProvidedSource>) -> ProvidedSet {
    let Some(source) = source else {
        return ProvidedSet::new();
    };
    match source.provided().await {
        Ok(provided) => provided,
        Err(error) => {
            let error = CatalogUnavailable {
                origin: source.origin(),
                reason: format!("{error:#}"),
            };
            warn!("{error}");
            ProvidedSet::new()
        }
    }
}

fn build_scheduler(
    config: &RepobuildConfig,
    availability: Arc<dyn AvailabilityCheck>,
    executor: Arc<dyn BuildExecutor>,
    cancellation: CancellationToken,
) -> BuildScheduler {
    let settings = SchedulerSettings {
        workers: config.workers,
        profile: config.profile.clone(),
        task_timeout: config.task_timeout,
        ..SchedulerSettings::new(config.architectures.clone())
    };
    BuildScheduler::new(availability, executor, settings).with_cancellation(cancellation)
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::capability::{FileProvided, StaticProvided};

    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn unavailable_provided_set_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let source = FileProvided::new(dir.path().join("absent"));
        assert_eq!(load_provided(Some(&source)).await, ProvidedSet::new());
        assert_eq!(load_provided(None).await, ProvidedSet::new());

        let source = StaticProvided(ProvidedSet::from([PackageName::from("methods")]));
        assert_eq!(
            load_provided(Some(&source)).await,
            ProvidedSet::from([PackageName::from("methods")])
        );
    }

    #[tokio::test]
    async fn resolve_requires_a_catalog() {
        let dir = tempfile::tempdir().unwrap();
        let config = RepobuildConfig {
            output_directory: dir.path().to_path_buf(),
            ..Default::default()
        };
        let error = do_resolve(&config, None, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(error, Error::NoCatalog));
    }
}
