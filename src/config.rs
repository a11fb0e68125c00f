use std::{
    collections::{BTreeMap, HashMap},
    path::{Path, PathBuf},
    time::Duration,
};

use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;
use thiserror::Error;

use crate::model::{
    record::{DependencyClass, DependencySelection},
    task::{Arch, BuildProfile},
};

/// Configuration file read from the working directory when none is given.
pub const DEFAULT_CONFIG_FILE: &str = "repobuild.toml";

const DEFAULT_OUTPUT_DIRECTORY: &str = "repobuild-output";
const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error(transparent)]
    Load(#[from] config::ConfigError),
    #[error("Unknown dependency class {0:?}, expected one of depends, imports, suggests")]
    DependencyClass(String),
    #[error("{0} must not be an empty command")]
    EmptyCommand(&'static str),
}

/// Where the packages already provided by the base platform come from.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ProvidedConfig {
    #[default]
    None,
    File(PathBuf),
    /// Command printing one provided package per line. Lines starting with
    /// `prefix` have it stripped; others are ignored when a prefix is set.
    Command {
        argv: Vec<String>,
        prefix: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepobuildConfig {
    pub output_directory: PathBuf,
    pub lock_timeout: Duration,

    pub catalogs: Vec<PathBuf>,
    pub selection: DependencySelection,
    /// Dependency names that are dropped while reading catalogs.
    pub ignored_dependencies: Vec<String>,
    pub provided: ProvidedConfig,

    pub architectures: Vec<Arch>,
    /// 0 means one build per logical core.
    pub workers: usize,
    pub profile: BuildProfile,
    pub task_timeout: Option<Duration>,
    pub build_command: Option<Vec<String>>,
    /// Directory the build command runs in. Inherited when unset.
    pub build_working_directory: Option<PathBuf>,
    pub availability_command: Option<Vec<String>>,
    pub noarch_availability_command: Option<Vec<String>>,
}

impl Default for RepobuildConfig {
    fn default() -> Self {
        RepobuildConfig {
            output_directory: PathBuf::from(DEFAULT_OUTPUT_DIRECTORY),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            catalogs: Vec::new(),
            selection: DependencySelection::default(),
            ignored_dependencies: Vec::new(),
            provided: ProvidedConfig::None,
            architectures: Vec::new(),
            workers: 0,
            profile: BuildProfile::default(),
            task_timeout: None,
            build_command: None,
            build_working_directory: None,
            availability_command: None,
            noarch_availability_command: None,
        }
    }
}

impl RepobuildConfig {
    /// Loads `file` (or `repobuild.toml` if it exists) and the `REPOBUILD_`
    /// environment variables on top of it.
    pub fn load(file: Option<&Path>) -> Result<Self, ConfigError> {
        RawConfig::load(file, None)?.try_into()
    }
}

#[derive(Default, Debug, Deserialize, PartialEq, Eq)]
struct RawConfig {
    output_dir: Option<PathBuf>,
    lock_timeout_secs: Option<u64>,
    #[serde(default)]
    resolve: ResolveConfig,
    #[serde(default)]
    build: BuildConfig,
}

#[derive(Default, Debug, Deserialize, PartialEq, Eq)]
struct ResolveConfig {
    #[serde(default)]
    catalogs: Vec<PathBuf>,
    classes: Option<Vec<String>>,
    #[serde(default)]
    ignore: Vec<String>,
    provided_file: Option<PathBuf>,
    provided_command: Option<Vec<String>>,
    provided_prefix: Option<String>,
}

#[derive(Default, Debug, Deserialize, PartialEq, Eq)]
struct BuildConfig {
    #[serde(default)]
    architectures: Vec<String>,
    workers: Option<usize>,
    profile: Option<String>,
    #[serde(default)]
    arch_aliases: BTreeMap<String, String>,
    timeout_secs: Option<u64>,
    command: Option<Vec<String>>,
    working_dir: Option<PathBuf>,
    available_command: Option<Vec<String>>,
    noarch_available_command: Option<Vec<String>>,
}

const LIST_KEYS: [&str; 8] = [
    "resolve.catalogs",
    "resolve.classes",
    "resolve.ignore",
    "resolve.provided_command",
    "build.architectures",
    "build.command",
    "build.available_command",
    "build.noarch_available_command",
];

impl RawConfig {
    fn load(
        file: Option<&Path>,
        env: Option<HashMap<String, String>>,
    ) -> Result<Self, ConfigError> {
        let (path, required) = match file {
            Some(path) => (path.to_string_lossy().into_owned(), true),
            None => (DEFAULT_CONFIG_FILE.to_owned(), false),
        };
        let environment = LIST_KEYS.into_iter().fold(
            Environment::with_prefix("REPOBUILD")
                .prefix_separator("_")
                .separator("__")
                .list_separator(",")
                .try_parsing(true),
            |environment, key| environment.with_list_parse_key(key),
        );
        let raw = Config::builder()
            .add_source(File::new(&path, FileFormat::Toml).required(required))
            .add_source(environment.source(env))
            .build()?
            .try_deserialize()?;
        Ok(raw)
    }
}

impl TryFrom<RawConfig> for RepobuildConfig {
    type Error = ConfigError;

    fn try_from(raw: RawConfig) -> Result<Self, Self::Error> {
        let defaults = RepobuildConfig::default();
        let RawConfig {
            output_dir,
            lock_timeout_secs,
            resolve,
            build,
        } = raw;

        let selection = match resolve.classes {
            Some(classes) => DependencySelection::new(
                classes
                    .iter()
                    .map(|class| {
                        class
                            .parse::<DependencyClass>()
                            .map_err(|_| ConfigError::DependencyClass(class.clone()))
                    })
                    .collect::<Result<Vec<_>, _>>()?,
            ),
            None => defaults.selection,
        };

        let provided = match (resolve.provided_command, resolve.provided_file) {
            (Some(argv), _) => ProvidedConfig::Command {
                argv: non_empty(argv, "resolve.provided_command")?,
                prefix: resolve.provided_prefix,
            },
            (None, Some(path)) => ProvidedConfig::File(path),
            (None, None) => ProvidedConfig::None,
        };

        let profile = build.arch_aliases.into_iter().fold(
            BuildProfile::new(build.profile.unwrap_or_default()),
            |profile, (arch, alias)| profile.with_alias(arch.as_str(), alias),
        );

        Ok(RepobuildConfig {
            output_directory: output_dir.unwrap_or(defaults.output_directory),
            lock_timeout: lock_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.lock_timeout),
            catalogs: resolve.catalogs,
            selection,
            ignored_dependencies: resolve.ignore,
            provided,
            architectures: build
                .architectures
                .iter()
                .map(|arch| Arch::from(arch.as_str()))
                .collect(),
            workers: build.workers.unwrap_or(defaults.workers),
            profile,
            task_timeout: build
                .timeout_secs
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs),
            build_command: build
                .command
                .map(|argv| non_empty(argv, "build.command"))
                .transpose()?,
            build_working_directory: build.working_dir,
            availability_command: build
                .available_command
                .map(|argv| non_empty(argv, "build.available_command"))
                .transpose()?,
            noarch_availability_command: build
                .noarch_available_command
                .map(|argv| non_empty(argv, "build.noarch_available_command"))
                .transpose()?,
        })
    }
}

fn non_empty(argv: Vec<String>, key: &'static str) -> Result<Vec<String>, ConfigError> {
    if argv
        .first()
        .map_or(true, |program| program.trim().is_empty())
    {
        return Err(ConfigError::EmptyCommand(key));
    }
    Ok(argv)
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;

    fn missing_file(dir: &tempfile::TempDir) -> PathBuf {
        dir.path().join("absent.toml")
    }

    fn load(file: Option<&Path>, env: &[(&str, &str)]) -> Result<RawConfig, ConfigError> {
        let env = env
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        RawConfig::load(file, Some(env))
    }

    #[test]
    fn load_empty() {
        let config = load(None, &[]).unwrap();
        assert_eq!(config, RawConfig::default());
        assert_eq!(
            RepobuildConfig::try_from(config).unwrap(),
            RepobuildConfig::default()
        );
    }

    #[test]
    fn explicit_file_must_exist() {
        let dir = tempfile::tempdir().unwrap();
        let error = load(Some(&missing_file(&dir)), &[]).unwrap_err();
        assert!(matches!(error, ConfigError::Load(_)));
    }

    #[test]
    fn load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("repobuild.toml");
        std::fs::write(
            &path,
            r#"
output_dir = "/srv/rebuild"

[resolve]
catalogs = ["cran.toml", "bioc.toml"]
classes = ["depends", "imports", "suggests"]
ignore = ["R"]
provided_command = ["repoquery", "--provides", "R-core"]
provided_prefix = "R-"

[build]
architectures = ["i686", "x86_64"]
workers = 4
profile = "fedora-rawhide"
arch_aliases = { i686 = "i386" }
timeout_secs = 3600
command = ["mock", "-r", "{profile}", "{package}"]
working_dir = "/srv/rebuild/srpms"
"#,
        )
        .unwrap();

        let raw = load(Some(&path), &[]).unwrap();
        let config = RepobuildConfig::try_from(raw).unwrap();
        assert_eq!(
            config,
            RepobuildConfig {
                output_directory: "/srv/rebuild".into(),
                catalogs: vec!["cran.toml".into(), "bioc.toml".into()],
                selection: DependencySelection::all(),
                ignored_dependencies: vec!["R".to_owned()],
                provided: ProvidedConfig::Command {
                    argv: vec!["repoquery".into(), "--provides".into(), "R-core".into()],
                    prefix: Some("R-".to_owned()),
                },
                architectures: vec![Arch::from("i686"), Arch::from("x86_64")],
                workers: 4,
                profile: BuildProfile::new("fedora-rawhide").with_alias("i686", "i386"),
                task_timeout: Some(Duration::from_secs(3600)),
                build_command: Some(vec![
                    "mock".into(),
                    "-r".into(),
                    "{profile}".into(),
                    "{package}".into()
                ]),
                build_working_directory: Some("/srv/rebuild/srpms".into()),
                ..RepobuildConfig::default()
            }
        );
    }

    #[test]
    fn load_environment() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("repobuild.toml");
        std::fs::write(&path, "[build]\nworkers = 4\nprofile = \"epel\"\n").unwrap();

        let config = load(
            Some(&path),
            &[
                ("REPOBUILD_OUTPUT_DIR", "/out"),
                ("REPOBUILD_BUILD__WORKERS", "8"),
                ("REPOBUILD_BUILD__ARCHITECTURES", "x86_64,aarch64"),
                ("REPOBUILD_RESOLVE__PROVIDED_FILE", "/etc/provided"),
                ("REPOBUILD_BUILD__WORKING_DIR", "/srv/srpms"),
            ],
        )
        .unwrap();
        assert_eq!(
            config,
            RawConfig {
                output_dir: Some("/out".into()),
                lock_timeout_secs: None,
                resolve: ResolveConfig {
                    provided_file: Some("/etc/provided".into()),
                    ..Default::default()
                },
                build: BuildConfig {
                    architectures: vec!["x86_64".into(), "aarch64".into()],
                    workers: Some(8),
                    profile: Some("epel".into()),
                    working_dir: Some("/srv/srpms".into()),
                    ..Default::default()
                },
            }
        );
    }

    #[test]
    fn unknown_dependency_class_is_rejected() {
        let raw = RawConfig {
            resolve: ResolveConfig {
                classes: Some(vec!["depends".into(), "enhances".into()]),
                ..Default::default()
            },
            ..Default::default()
        };
        let error = RepobuildConfig::try_from(raw).unwrap_err();
        assert!(matches!(error, ConfigError::DependencyClass(class) if class == "enhances"));
    }

    #[test]
    fn empty_command_is_rejected() {
        let raw = RawConfig {
            build: BuildConfig {
                command: Some(vec![]),
                ..Default::default()
            },
            ..Default::default()
        };
        let error = RepobuildConfig::try_from(raw).unwrap_err();
        assert!(matches!(error, ConfigError::EmptyCommand("build.command")));
    }
}
