use std::{
    collections::{BTreeSet, HashMap},
    path::{Path, PathBuf},
    sync::Arc,
};

use log::{debug, info, warn};
use serde::Deserialize;
use thiserror::Error;

use super::{
    record::{parse_dependency_field, DependencyClass, DependencyRecord, PackageName, Version},
    ParseError,
};

/// Package names satisfied by the base platform. They are never scheduled.
pub type ProvidedSet = BTreeSet<PackageName>;

/// A catalog or the provided-set could not be loaded. The run goes on without
/// it, which may shrink the dependency graph, so it is always reported.
#[derive(Error, Debug)]
#[error("Catalog {origin} is unavailable: {reason}")]
pub struct CatalogUnavailable {
    pub origin: String,
    pub reason: String,
}

/// What happened to a record offered to [`Catalog::insert`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Merge {
    Added,
    /// The new record had a newer version and took the place of `previous`.
    Replaced { previous: Version },
    /// A record with the same or a newer version was already present.
    Kept { rejected: Version },
}

/// Insertion-ordered collection of dependency records keyed by package name.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    records: Vec<Arc<DependencyRecord>>,
    index: HashMap<PackageName, usize>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a record. An existing record with the same name is replaced only
    /// when the new one has a strictly greater version; the replacement keeps
    /// the original position.
    pub fn insert(&mut self, record: DependencyRecord) -> Merge {
        match self.index.get(record.name()) {
            None => {
                self.index.insert(record.name().clone(), self.records.len());
                self.records.push(Arc::new(record));
                Merge::Added
            }
            Some(&position) => {
                let existing = &self.records[position];
                if record.version > existing.version {
                    debug!(
                        "Using {} {} from {} over {} from {}",
                        record.name(),
                        record.version,
                        record.source.as_deref().unwrap_or("<unknown>"),
                        existing.version,
                        existing.source.as_deref().unwrap_or("<unknown>"),
                    );
                    let previous = existing.version.clone();
                    self.records[position] = Arc::new(record);
                    Merge::Replaced { previous }
                } else {
                    debug!(
                        "{} {} already in the catalog, ignoring {}",
                        record.name(),
                        existing.version,
                        record.version
                    );
                    Merge::Kept {
                        rejected: record.version,
                    }
                }
            }
        }
    }

    pub fn extend(&mut self, other: Catalog) {
        for record in other.records {
            let record = match Arc::try_unwrap(record) {
                Ok(record) => record,
                Err(shared) => DependencyRecord::clone(&shared),
            };
            self.insert(record);
        }
    }

    pub fn get(&self, name: &PackageName) -> Option<&Arc<DependencyRecord>> {
        let position = *self.index.get(name)?;
        self.records.get(position)
    }

    pub fn contains(&self, name: &PackageName) -> bool {
        self.index.contains_key(name)
    }

    /// Arena access used by the resolver.
    pub(crate) fn record_at(&self, position: usize) -> &DependencyRecord {
        &self.records[position]
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DependencyRecord> {
        self.records.iter().map(AsRef::as_ref)
    }

    pub fn names(&self) -> impl Iterator<Item = &PackageName> {
        self.iter().map(DependencyRecord::name)
    }

    pub fn from_file(path: &Path, ignored: &[String]) -> Result<Catalog, ParseError> {
        debug!("Attempting to read catalog from {}", path.display());
        let contents = std::fs::read_to_string(path).map_err(|e| ParseError::io(path, e))?;
        Catalog::from_toml_str(&contents, &path.display().to_string(), ignored)
    }

    /// Parses a catalog document:
    ///
    /// ```toml
    /// [[package]]
    /// name = "B"
    /// version = "1.2-3"
    /// depends = ["A"]
    /// imports = "C (>= 1.0), R"
    /// ```
    ///
    /// Dependency fields take either a list of names or a raw comma separated
    /// field. Names in `ignored` are dropped from every dependency list.
    pub fn from_toml_str(
        data: &str,
        origin: &str,
        ignored: &[String],
    ) -> Result<Catalog, ParseError> {
        let document = toml::from_str::<CatalogDocument>(data)?;
        let mut catalog = Catalog::new();
        for raw in document.package {
            let record = raw.into_record(origin, ignored)?;
            catalog.insert(record);
        }
        Ok(catalog)
    }

    /// Loads and merges every catalog in order. Catalogs that cannot be read
    /// are logged and returned next to the merged result.
    pub fn load_all(paths: &[PathBuf], ignored: &[String]) -> (Catalog, Vec<CatalogUnavailable>) {
        let mut catalog = Catalog::new();
        let mut unavailable = Vec::new();
        for path in paths {
            match Catalog::from_file(path, ignored) {
                Ok(loaded) => {
                    debug!("{} packages read from {}", loaded.len(), path.display());
                    catalog.extend(loaded);
                }
                Err(error) => {
                    let error = CatalogUnavailable {
                        origin: path.display().to_string(),
                        reason: error.to_string(),
                    };
                    warn!("{error}");
                    unavailable.push(error);
                }
            }
        }
        info!("TOTAL: {} packages in the catalog", catalog.len());
        (catalog, unavailable)
    }
}

#[derive(Debug, Deserialize)]
struct CatalogDocument {
    #[serde(default)]
    package: Vec<RawRecord>,
}

#[derive(Debug, Deserialize)]
struct RawRecord {
    name: Option<String>,
    #[serde(default)]
    version: Option<String>,
    #[serde(default)]
    depends: Option<toml::Value>,
    #[serde(default)]
    imports: Option<toml::Value>,
    #[serde(default)]
    suggests: Option<toml::Value>,
}

impl RawRecord {
    fn into_record(self, origin: &str, ignored: &[String]) -> Result<DependencyRecord, ParseError> {
        let name: PackageName = self
            .name
            .ok_or_else(|| ParseError::MissingKey("name".to_string()))?
            .parse()?;
        let mut record = DependencyRecord::new(name, Version::new(self.version.unwrap_or_default()))
            .with_source(origin);
        for (class, value) in [
            (DependencyClass::Depends, self.depends),
            (DependencyClass::Imports, self.imports),
            (DependencyClass::Suggests, self.suggests),
        ] {
            if let Some(value) = value {
                let names = parse_field_value(record.name(), class, &value, ignored)?;
                record.add_dependencies(class, names);
            }
        }
        Ok(record)
    }
}

fn parse_field_value(
    package: &PackageName,
    class: DependencyClass,
    value: &toml::Value,
    ignored: &[String],
) -> Result<Vec<PackageName>, ParseError> {
    let invalid = || ParseError::InvalidDependencyField {
        package: package.to_string(),
        field: class.to_string(),
    };
    match value {
        toml::Value::String(field) => Ok(parse_dependency_field(field, ignored)),
        toml::Value::Array(entries) => {
            let mut names = Vec::new();
            for entry in entries {
                let entry = entry.as_str().ok_or_else(invalid)?;
                names.extend(parse_dependency_field(entry, ignored));
            }
            Ok(names)
        }
        _ => Err(invalid()),
    }
}

/// Reads a newline separated list of package names. Blank lines and lines
/// starting with `#` are skipped.
pub fn read_package_list(path: &Path) -> Result<Vec<PackageName>, ParseError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ParseError::io(path, e))?;
    parse_package_list(&contents)
}

pub fn parse_package_list(contents: &str) -> Result<Vec<PackageName>, ParseError> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::parse)
        .collect()
}
