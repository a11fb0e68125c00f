use std::{path::PathBuf, process::Stdio};

use anyhow::{bail, Context};
use async_trait::async_trait;
use log::debug;

use super::{command::Placeholders, CommandTemplate, ProvidedSource};
use crate::model::{
    catalog::{read_package_list, ProvidedSet},
    record::PackageName,
};

/// Provided-set read from a newline separated file.
pub struct FileProvided {
    path: PathBuf,
}

impl FileProvided {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        FileProvided { path: path.into() }
    }
}

#[async_trait]
impl ProvidedSource for FileProvided {
    async fn provided(&self) -> anyhow::Result<ProvidedSet> {
        Ok(read_package_list(&self.path)?.into_iter().collect())
    }

    fn origin(&self) -> String {
        self.path.display().to_string()
    }
}

/// Provided-set taken from the output of a command, one entry per line.
///
/// Only the first word of a line is used. With a `prefix`, lines without it
/// are ignored and the prefix is stripped, so `R-methods = 4.3.1` becomes
/// `methods`.
pub struct CommandProvided {
    command: CommandTemplate,
    prefix: Option<String>,
}

impl CommandProvided {
    pub fn new(command: CommandTemplate, prefix: Option<String>) -> Self {
        CommandProvided { command, prefix }
    }

    fn parse(&self, output: &str) -> ProvidedSet {
        output
            .lines()
            .filter_map(|line| line.split_whitespace().next())
            .filter_map(|word| match &self.prefix {
                Some(prefix) => word.strip_prefix(prefix.as_str()),
                None => Some(word),
            })
            .filter(|name| !name.is_empty())
            .map(PackageName::from)
            .collect()
    }
}

#[async_trait]
impl ProvidedSource for CommandProvided {
    async fn provided(&self) -> anyhow::Result<ProvidedSet> {
        let output = self
            .command
            .command(&Placeholders::default())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .output()
            .await
            .with_context(|| format!("could not run {}", self.command.program()))?;
        if !output.status.success() {
            bail!("{} exited with {}", self.command.program(), output.status);
        }
        let provided = self.parse(&String::from_utf8_lossy(&output.stdout));
        debug!("{} packages provided by the base platform", provided.len());
        Ok(provided)
    }

    fn origin(&self) -> String {
        format!("command `{}`", self.command.program())
    }
}

/// Fixed provided-set, mostly useful in tests and for an empty base.
#[derive(Default)]
pub struct StaticProvided(pub ProvidedSet);

#[async_trait]
impl ProvidedSource for StaticProvided {
    async fn provided(&self) -> anyhow::Result<ProvidedSet> {
        Ok(self.0.clone())
    }

    fn origin(&self) -> String {
        "static provided-set".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;

    #[test]
    fn parse_prefixed_provides() {
        let source = CommandProvided::new(
            CommandTemplate::new(vec!["repoquery".to_string()]).unwrap(),
            Some("R-".to_string()),
        );
        let output = "R-core = 4.3.1\nR-methods = 4.3.1\nlibR.so()(64bit)\nR-stats\n\n";
        assert_eq!(
            source.parse(output),
            ["core", "methods", "stats"]
                .into_iter()
                .map(PackageName::from)
                .collect::<ProvidedSet>()
        );
    }

    #[tokio::test]
    async fn file_provided_reads_names() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("provided");
        std::fs::write(&path, "base\n\nmethods\n").unwrap();
        let provided = FileProvided::new(&path).provided().await.unwrap();
        assert_eq!(provided.len(), 2);
        assert!(provided.contains(&PackageName::from("methods")));
    }

    #[tokio::test]
    async fn missing_file_is_an_error() {
        FileProvided::new("/nonexistent/provided")
            .provided()
            .await
            .expect_err("file does not exist");
    }
}
