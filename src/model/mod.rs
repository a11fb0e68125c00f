use thiserror::Error;

pub mod catalog;
pub mod record;
pub mod task;

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("IO error reading {path}: {source}")]
    IO {
        path: String,
        source: std::io::Error,
    },
    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Missing TOML key `{0}` while parsing")]
    MissingKey(String),
    #[error("Invalid package name `{0}`")]
    InvalidPackageName(String),
    #[error("Invalid dependency field `{field}` for package {package}: expected string or list")]
    InvalidDependencyField { package: String, field: String },
}

impl ParseError {
    pub(crate) fn io(path: &std::path::Path, source: std::io::Error) -> Self {
        ParseError::IO {
            path: path.display().to_string(),
            source,
        }
    }
}
