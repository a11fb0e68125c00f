use std::{path::PathBuf, time::Duration};

use clap::{ArgAction, Parser, Subcommand};

use crate::{
    config::RepobuildConfig,
    model::{record::DependencySelection, task::Arch},
};

/// Rebuilds a package repository level by level, in dependency order.
#[derive(Debug, Parser)]
#[command(version)]
pub struct CliArgs {
    #[command(subcommand)]
    pub cmd: Command,
    /// Configuration file. Defaults to repobuild.toml when it exists
    #[arg(short, long, env = "REPOBUILD_CONFIG")]
    pub config: Option<PathBuf>,
    /// Directory receiving the level files and the build results
    #[arg(short, long)]
    pub output: Option<PathBuf>,
    /// Catalog to read, may be repeated
    #[arg(long = "catalog")]
    pub catalogs: Vec<PathBuf>,
    /// Architecture to build for, may be repeated. Built in the given order
    #[arg(short, long = "arch")]
    pub architectures: Vec<String>,
    /// Build profile, suffixed with the architecture for each build
    #[arg(short, long)]
    pub profile: Option<String>,
    /// Maximum number of concurrent builds, 0 for one per core
    #[arg(short, long)]
    pub workers: Option<usize>,
    /// Stop builds running longer than this many seconds
    #[arg(long, value_name = "SECONDS")]
    pub timeout: Option<u64>,
    /// Also wait for suggested dependencies
    #[arg(long)]
    pub all_dep: bool,
    /// Log more, repeat for trace output
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    ///Computes the build levels and writes them to the output directory
    Resolve,
    ///Builds the packages listed in a file, one name per line
    Build { list: PathBuf },
    ///Computes the build levels and builds them in order
    Run,
}

impl CliArgs {
    /// Command line flags take precedence over the configuration.
    pub fn apply(&self, config: &mut RepobuildConfig) {
        if let Some(output) = &self.output {
            config.output_directory = output.clone();
        }
        if !self.catalogs.is_empty() {
            config.catalogs = self.catalogs.clone();
        }
        if !self.architectures.is_empty() {
            config.architectures = self
                .architectures
                .iter()
                .map(|arch| Arch::from(arch.as_str()))
                .collect();
        }
        if let Some(profile) = &self.profile {
            config.profile.name = profile.clone();
        }
        if let Some(workers) = self.workers {
            config.workers = workers;
        }
        if let Some(timeout) = self.timeout {
            config.task_timeout = (timeout > 0).then(|| Duration::from_secs(timeout));
        }
        if self.all_dep {
            config.selection = DependencySelection::all();
        }
    }

    pub fn log_filter(&self) -> &'static str {
        match self.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;

    #[test]
    fn flags_override_configuration() {
        let args = CliArgs::parse_from([
            "repobuild",
            "--arch",
            "i686",
            "-a",
            "x86_64",
            "--profile",
            "fedora-rawhide",
            "--workers",
            "3",
            "--timeout",
            "0",
            "--all-dep",
            "-vv",
            "build",
            "packages.txt",
        ]);
        let mut config = RepobuildConfig {
            workers: 8,
            task_timeout: Some(Duration::from_secs(60)),
            ..Default::default()
        };
        args.apply(&mut config);

        assert_eq!(
            config.architectures,
            vec![Arch::from("i686"), Arch::from("x86_64")]
        );
        assert_eq!(config.profile.name, "fedora-rawhide");
        assert_eq!(config.workers, 3);
        assert_eq!(config.task_timeout, None);
        assert_eq!(config.selection, DependencySelection::all());
        assert_eq!(args.log_filter(), "trace");
        assert!(
            matches!(args.cmd, Command::Build { list } if list == PathBuf::from("packages.txt"))
        );
    }

    #[test]
    fn configuration_is_kept_without_flags() {
        let args = CliArgs::parse_from(["repobuild", "run"]);
        let mut config = RepobuildConfig {
            workers: 8,
            ..Default::default()
        };
        args.apply(&mut config);
        assert_eq!(
            config,
            RepobuildConfig {
                workers: 8,
                ..Default::default()
            }
        );
    }
}
