use std::{path::PathBuf, process::Stdio};

use anyhow::{bail, Context};
use async_trait::async_trait;
use log::{debug, info, trace};
use tokio::process::Command;

use super::{AvailabilityCheck, BuildExecutor};
use crate::model::{
    record::PackageName,
    task::{BuildOutcome, BuildTask, Target},
};

const STDERR_TAIL_LINES: usize = 5;

/// A program and its arguments. Arguments may contain the placeholders
/// `{package}`, `{version}`, `{arch}` and `{profile}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandTemplate {
    argv: Vec<String>,
}

#[derive(Debug, Default)]
pub(crate) struct Placeholders<'a> {
    pub package: &'a str,
    pub version: &'a str,
    pub arch: &'a str,
    pub profile: &'a str,
}

impl CommandTemplate {
    pub fn new(argv: Vec<String>) -> anyhow::Result<Self> {
        if argv.is_empty() || argv[0].is_empty() {
            bail!("command must name a program");
        }
        Ok(CommandTemplate { argv })
    }

    pub fn program(&self) -> &str {
        &self.argv[0]
    }

    pub(crate) fn render(&self, values: &Placeholders<'_>) -> Vec<String> {
        self.argv
            .iter()
            .map(|arg| {
                arg.replace("{package}", values.package)
                    .replace("{version}", values.version)
                    .replace("{arch}", values.arch)
                    .replace("{profile}", values.profile)
            })
            .collect()
    }

    pub(crate) fn command(&self, values: &Placeholders<'_>) -> Command {
        let argv = self.render(values);
        trace!("{}", argv.join(" "));
        let mut command = Command::new(&argv[0]);
        command
            .args(&argv[1..])
            .stdin(Stdio::null())
            .kill_on_drop(true);
        command
    }
}

/// Runs a query command; any non-blank output means the artifact exists.
///
/// `noarch` is queried for [`Target::NoArch`]; without it architecture
/// independent artifacts are never reported.
pub struct CommandAvailability {
    arch: CommandTemplate,
    noarch: Option<CommandTemplate>,
}

impl CommandAvailability {
    pub fn new(arch: CommandTemplate, noarch: Option<CommandTemplate>) -> Self {
        CommandAvailability { arch, noarch }
    }
}

#[async_trait]
impl AvailabilityCheck for CommandAvailability {
    async fn is_built(&self, package: &PackageName, target: Target<'_>) -> anyhow::Result<bool> {
        let (template, arch) = match target {
            Target::Arch(arch) => (&self.arch, arch.as_str()),
            Target::NoArch => match &self.noarch {
                Some(template) => (template, "noarch"),
                None => return Ok(false),
            },
        };
        let values = Placeholders {
            package: package.as_str(),
            arch,
            ..Default::default()
        };
        let output = template
            .command(&values)
            .stderr(Stdio::null())
            .output()
            .await
            .with_context(|| format!("could not run {}", template.program()))?;
        if !output.status.success() {
            bail!("{} exited with {}", template.program(), output.status);
        }
        let built = !String::from_utf8_lossy(&output.stdout).trim().is_empty();
        debug!("{} built for {}: {}", package, target, built);
        Ok(built)
    }
}

/// Runs the build command for each task. Exit status 0 is a success.
pub struct CommandExecutor {
    command: CommandTemplate,
    working_directory: Option<PathBuf>,
}

impl CommandExecutor {
    pub fn new(command: CommandTemplate, working_directory: Option<PathBuf>) -> Self {
        CommandExecutor {
            command,
            working_directory,
        }
    }
}

#[async_trait]
impl BuildExecutor for CommandExecutor {
    async fn execute(&self, task: &BuildTask) -> anyhow::Result<BuildOutcome> {
        let version = task
            .record
            .as_ref()
            .map(|record| record.version.as_str())
            .unwrap_or_default();
        let values = Placeholders {
            package: task.package().as_str(),
            version,
            arch: task.arch().as_str(),
            profile: &task.profile,
        };
        info!("  build {} -- {}", task.package(), task.profile);
        let mut command = self.command.command(&values);
        if let Some(directory) = &self.working_directory {
            command.current_dir(directory);
        }
        let output = command
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await
            .with_context(|| format!("could not run {}", self.command.program()))?;

        if output.status.success() {
            return Ok(BuildOutcome::Succeeded);
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        let lines: Vec<&str> = stderr.lines().filter(|l| !l.trim().is_empty()).collect();
        let tail = lines[lines.len().saturating_sub(STDERR_TAIL_LINES)..].join("\n");
        Ok(BuildOutcome::failed(if tail.is_empty() {
            format!("{} exited with {}", self.command.program(), output.status)
        } else {
            format!(
                "{} exited with {}: {}",
                self.command.program(),
                output.status,
                tail
            )
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;

    #[test]
    fn render_placeholders() {
        let template = CommandTemplate::new(
            ["mock", "-r", "{profile}", "--define", "pkg {package}-{version}.{arch}"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        )
        .unwrap();
        let values = Placeholders {
            package: "ggplot2",
            version: "3.4.0",
            arch: "x86_64",
            profile: "fedora-rawhide-x86_64",
        };
        assert_eq!(
            template.render(&values),
            vec![
                "mock",
                "-r",
                "fedora-rawhide-x86_64",
                "--define",
                "pkg ggplot2-3.4.0.x86_64"
            ]
        );
    }

    #[test]
    fn empty_command_is_rejected() {
        CommandTemplate::new(vec![]).expect_err("no program");
        CommandTemplate::new(vec![String::new()]).expect_err("empty program");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn build_runs_in_working_directory() {
        use crate::model::task::{Arch, TaskId};

        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("ggplot2.spec"), "").unwrap();
        let template = CommandTemplate::new(
            ["sh", "-c", "test -f {package}.spec"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        )
        .unwrap();
        let task = BuildTask {
            id: TaskId::new(PackageName::from("ggplot2"), Arch::from("x86_64")),
            profile: "fedora-rawhide-x86_64".to_owned(),
            record: None,
        };

        let inside = CommandExecutor::new(template.clone(), Some(dir.path().to_path_buf()));
        assert_eq!(
            inside.execute(&task).await.unwrap(),
            BuildOutcome::Succeeded
        );

        let elsewhere = CommandExecutor::new(template, Some(std::env::temp_dir()));
        assert!(matches!(
            elsewhere.execute(&task).await.unwrap(),
            BuildOutcome::Failed { .. }
        ));
    }
}
