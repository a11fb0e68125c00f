use std::{path::PathBuf, sync::Arc};

use tokio_util::sync::CancellationToken;

use crate::{
    capability::{
        AvailabilityCheck, BuildExecutor, CommandAvailability, CommandExecutor, CommandProvided,
        CommandTemplate, FileProvided, NoAvailabilityCheck, ProvidedSource,
    },
    config::{ProvidedConfig, RepobuildConfig},
    Error, Repobuild,
};

#[derive(Default)]
pub struct RepobuildBuilder {
    config: Option<RepobuildConfig>,
    config_file: Option<PathBuf>,
    availability: Option<Arc<dyn AvailabilityCheck>>,
    executor: Option<Arc<dyn BuildExecutor>>,
    provided: Option<Arc<dyn ProvidedSource>>,
    cancellation: Option<CancellationToken>,
}

impl RepobuildBuilder {
    /// Use this configuration instead of loading one.
    pub fn config(mut self, config: RepobuildConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Configuration file to load.
    ///
    /// Defaults to `repobuild.toml` in the current directory, if present.
    pub fn config_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_file = Some(path.into());
        self
    }

    /// Replaces the configured availability command.
    pub fn availability(mut self, availability: Arc<dyn AvailabilityCheck>) -> Self {
        self.availability = Some(availability);
        self
    }

    /// Replaces the configured build command.
    pub fn executor(mut self, executor: Arc<dyn BuildExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Replaces the configured provided packages file or command.
    pub fn provided(mut self, provided: Arc<dyn ProvidedSource>) -> Self {
        self.provided = Some(provided);
        self
    }

    pub fn cancellation(mut self, cancellation: CancellationToken) -> Self {
        self.cancellation = Some(cancellation);
        self
    }

    pub fn try_build(self) -> Result<Repobuild, Error> {
        let Self {
            config,
            config_file,
            availability,
            executor,
            provided,
            cancellation,
        } = self;

        let config = match config {
            Some(config) => config,
            None => RepobuildConfig::load(config_file.as_deref())?,
        };

        let availability: Arc<dyn AvailabilityCheck> = match availability {
            Some(availability) => availability,
            None => match &config.availability_command {
                Some(argv) => {
                    let noarch = config
                        .noarch_availability_command
                        .as_ref()
                        .map(|argv| template("noarch availability", argv))
                        .transpose()?;
                    Arc::new(CommandAvailability::new(
                        template("availability", argv)?,
                        noarch,
                    ))
                }
                None => Arc::new(NoAvailabilityCheck),
            },
        };

        let executor = match executor {
            Some(executor) => Some(executor),
            None => match &config.build_command {
                Some(argv) => Some(Arc::new(CommandExecutor::new(
                    template("build", argv)?,
                    config.build_working_directory.clone(),
                )) as Arc<dyn BuildExecutor>),
                None => None,
            },
        };

        let provided = match provided {
            Some(provided) => Some(provided),
            None => match &config.provided {
                ProvidedConfig::None => None,
                ProvidedConfig::File(path) => {
                    Some(Arc::new(FileProvided::new(path)) as Arc<dyn ProvidedSource>)
                }
                ProvidedConfig::Command { argv, prefix } => Some(Arc::new(CommandProvided::new(
                    template("provided packages", argv)?,
                    prefix.clone(),
                ))
                    as Arc<dyn ProvidedSource>),
            },
        };

        Ok(Repobuild {
            config,
            availability,
            executor,
            provided,
            cancellation: cancellation.unwrap_or_default(),
        })
    }
}

fn template(what: &'static str, argv: &[String]) -> Result<CommandTemplate, Error> {
    CommandTemplate::new(argv.to_vec()).map_err(|error| Error::InvalidCommand {
        what,
        reason: format!("{error:#}"),
    })
}
