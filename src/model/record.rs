use std::{
    cmp::Ordering,
    collections::{BTreeSet, HashSet},
    fmt::Display,
    str::FromStr,
    sync::OnceLock,
};

use regex_lite::Regex;
use serde::{Deserialize, Serialize};

use crate::model::ParseError;

#[derive(Clone, Hash, Deserialize, Serialize, Debug, PartialEq, Eq, Ord, PartialOrd)]
#[serde(transparent)]
pub struct PackageName(String);

impl PackageName {
    pub fn new(s: impl Into<String>) -> Self {
        PackageName(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for PackageName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for PackageName {
    fn from(s: String) -> Self {
        PackageName(s)
    }
}

impl From<&str> for PackageName {
    fn from(s: &str) -> Self {
        PackageName(s.to_string())
    }
}

impl FromStr for PackageName {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() || s.chars().any(char::is_whitespace) {
            Err(ParseError::InvalidPackageName(s.to_string()))
        } else {
            Ok(PackageName(s.to_string()))
        }
    }
}

/// The independent kinds of dependency a package can declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DependencyClass {
    /// Needed at build and run time.
    Depends,
    /// Needed at build time.
    Imports,
    /// Optional.
    Suggests,
}

impl DependencyClass {
    pub const ALL: [DependencyClass; 3] = [
        DependencyClass::Depends,
        DependencyClass::Imports,
        DependencyClass::Suggests,
    ];
}

impl FromStr for DependencyClass {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "depends" => Ok(DependencyClass::Depends),
            "imports" => Ok(DependencyClass::Imports),
            "suggests" => Ok(DependencyClass::Suggests),
            other => Err(format!("unknown dependency class `{other}`")),
        }
    }
}

impl Display for DependencyClass {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            DependencyClass::Depends => f.write_str("depends"),
            DependencyClass::Imports => f.write_str("imports"),
            DependencyClass::Suggests => f.write_str("suggests"),
        }
    }
}

/// Which dependency classes must be satisfied before a package can be leveled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencySelection {
    classes: BTreeSet<DependencyClass>,
}

impl DependencySelection {
    pub fn new(classes: impl IntoIterator<Item = DependencyClass>) -> Self {
        DependencySelection {
            classes: classes.into_iter().collect(),
        }
    }

    /// `depends` and `imports`.
    pub fn required() -> Self {
        Self::new([DependencyClass::Depends, DependencyClass::Imports])
    }

    pub fn all() -> Self {
        Self::new(DependencyClass::ALL)
    }

    pub fn includes(&self, class: DependencyClass) -> bool {
        self.classes.contains(&class)
    }

    pub fn classes(&self) -> impl Iterator<Item = DependencyClass> + '_ {
        self.classes.iter().copied()
    }
}

impl Default for DependencySelection {
    fn default() -> Self {
        Self::required()
    }
}

/// A loosely ordered version string.
///
/// `-` separates components just like `.`, so `1.2-3` and `1.2.3` are the same
/// version. Numeric components compare numerically, alphabetic ones lexically,
/// and a numeric component sorts before an alphabetic one.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Version(String);

#[derive(Debug, PartialEq, Eq)]
enum VersionComponent<'a> {
    Number(&'a str),
    Text(&'a str),
}

impl Version {
    pub fn new(s: impl Into<String>) -> Self {
        Version(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn components(&self) -> Vec<VersionComponent<'_>> {
        let mut components = Vec::new();
        let mut rest = self.0.as_str();
        while let Some(start) = rest.find(|c: char| c.is_ascii_alphanumeric()) {
            rest = &rest[start..];
            let numeric = rest.starts_with(|c: char| c.is_ascii_digit());
            let end = rest
                .find(|c: char| {
                    if numeric {
                        !c.is_ascii_digit()
                    } else {
                        !c.is_ascii_alphabetic()
                    }
                })
                .unwrap_or(rest.len());
            let (token, tail) = rest.split_at(end);
            components.push(if numeric {
                VersionComponent::Number(token.trim_start_matches('0'))
            } else {
                VersionComponent::Text(token)
            });
            rest = tail;
        }
        components
    }
}

impl Ord for VersionComponent<'_> {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (VersionComponent::Number(a), VersionComponent::Number(b)) => {
                a.len().cmp(&b.len()).then_with(|| a.cmp(b))
            }
            (VersionComponent::Number(_), VersionComponent::Text(_)) => Ordering::Less,
            (VersionComponent::Text(_), VersionComponent::Number(_)) => Ordering::Greater,
            (VersionComponent::Text(a), VersionComponent::Text(b)) => a.cmp(b),
        }
    }
}

impl PartialOrd for VersionComponent<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.components().cmp(&other.components())
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Version {}

impl Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Version {
    fn from(s: &str) -> Self {
        Version(s.to_string())
    }
}

/// One package and the names it depends on, split by dependency class.
///
/// The name is fixed at construction. Dependency lists keep declaration order
/// and never contain the same name twice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyRecord {
    name: PackageName,
    pub version: Version,
    depends: Vec<PackageName>,
    imports: Vec<PackageName>,
    suggests: Vec<PackageName>,
    /// Label of the catalog this record was loaded from.
    pub source: Option<String>,
}

impl DependencyRecord {
    pub fn new(name: impl Into<PackageName>, version: impl Into<Version>) -> Self {
        DependencyRecord {
            name: name.into(),
            version: version.into(),
            depends: Vec::new(),
            imports: Vec::new(),
            suggests: Vec::new(),
            source: None,
        }
    }

    pub fn name(&self) -> &PackageName {
        &self.name
    }

    pub fn with_dependencies<I, N>(mut self, class: DependencyClass, names: I) -> Self
    where
        I: IntoIterator<Item = N>,
        N: Into<PackageName>,
    {
        self.add_dependencies(class, names);
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Appends names to the given class, skipping names already present.
    pub fn add_dependencies<I, N>(&mut self, class: DependencyClass, names: I)
    where
        I: IntoIterator<Item = N>,
        N: Into<PackageName>,
    {
        let list = self.list_mut(class);
        for name in names {
            let name = name.into();
            if !list.contains(&name) {
                list.push(name);
            }
        }
    }

    pub fn dependencies(&self, class: DependencyClass) -> &[PackageName] {
        match class {
            DependencyClass::Depends => self.depends.as_slice(),
            DependencyClass::Imports => self.imports.as_slice(),
            DependencyClass::Suggests => self.suggests.as_slice(),
        }
    }

    /// Union of the dependency classes included in `selection`.
    pub fn selected_dependencies(&self, selection: &DependencySelection) -> HashSet<&PackageName> {
        selection
            .classes()
            .flat_map(|class| self.dependencies(class))
            .collect()
    }

    fn list_mut(&mut self, class: DependencyClass) -> &mut Vec<PackageName> {
        match class {
            DependencyClass::Depends => &mut self.depends,
            DependencyClass::Imports => &mut self.imports,
            DependencyClass::Suggests => &mut self.suggests,
        }
    }
}

fn version_constraint() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\([^)]*\)").unwrap())
}

/// Turns a raw dependency field such as `"Rcpp (>= 0.11.0), methods,\n stats"`
/// into plain package names.
///
/// Version constraints are dropped, and so are names listed in `ignored`
/// (typically the language runtime itself, which every package depends on).
pub fn parse_dependency_field(value: &str, ignored: &[String]) -> Vec<PackageName> {
    let stripped = version_constraint().replace_all(value, " ");
    let mut names: Vec<PackageName> = Vec::new();
    for entry in stripped.split(',') {
        let Some(token) = entry.split_whitespace().next() else {
            continue;
        };
        if token.contains(['<', '>', '=']) || ignored.iter().any(|i| i == token) {
            continue;
        }
        let name = PackageName::from(token);
        if !names.contains(&name) {
            names.push(name);
        }
    }
    names
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;

    fn names(names: &[&str]) -> Vec<PackageName> {
        names.iter().map(|n| PackageName::from(*n)).collect()
    }

    #[test]
    fn version_ordering() {
        assert!(Version::from("1.10") > Version::from("1.9"));
        assert!(Version::from("1.2-3") > Version::from("1.2-2"));
        assert!(Version::from("1.2.1") > Version::from("1.2"));
        assert!(Version::from("0.9.10") < Version::from("0.10"));
        assert!(Version::from("1.0a") > Version::from("1.0"));
        assert!(Version::from("2.0") > Version::from("1.0beta"));
        assert_eq!(Version::from("1.2-3"), Version::from("1.2.3"));
        assert_eq!(Version::from("1.02"), Version::from("1.2"));
    }

    #[test]
    fn parse_field_drops_constraints_and_ignored_names() {
        let field = "R (>= 2.10), Rcpp (>= 0.11.0), methods,\n    stats";
        let parsed = parse_dependency_field(field, &["R".to_string()]);
        assert_eq!(parsed, names(&["Rcpp", "methods", "stats"]));
    }

    #[test]
    fn parse_field_deduplicates() {
        let parsed = parse_dependency_field("MASS, lattice, MASS (>= 7.3)", &[]);
        assert_eq!(parsed, names(&["MASS", "lattice"]));
    }

    #[test]
    fn parse_empty_field() {
        assert!(parse_dependency_field("", &[]).is_empty());
        assert!(parse_dependency_field(" , ,", &[]).is_empty());
    }

    #[test]
    fn selected_dependencies_follow_selection() {
        let record = DependencyRecord::new("pkg", "1.0")
            .with_dependencies(DependencyClass::Depends, ["a", "b"])
            .with_dependencies(DependencyClass::Imports, ["b", "c"])
            .with_dependencies(DependencyClass::Suggests, ["d"]);

        let mut required: Vec<_> = record
            .selected_dependencies(&DependencySelection::required())
            .into_iter()
            .cloned()
            .collect();
        required.sort();
        assert_eq!(required, names(&["a", "b", "c"]));

        let all = record.selected_dependencies(&DependencySelection::all());
        assert_eq!(all.len(), 4);
        assert!(all.contains(&PackageName::from("d")));

        let depends_only = DependencySelection::new([DependencyClass::Depends]);
        assert_eq!(record.selected_dependencies(&depends_only).len(), 2);
    }

    #[test]
    fn add_dependencies_keeps_lists_distinct() {
        let mut record = DependencyRecord::new("pkg", "1.0");
        record.add_dependencies(DependencyClass::Depends, ["a"]);
        record.add_dependencies(DependencyClass::Depends, ["a", "b"]);
        assert_eq!(
            record.dependencies(DependencyClass::Depends),
            names(&["a", "b"])
        );
        assert!(record.dependencies(DependencyClass::Suggests).is_empty());
    }

    #[test]
    fn package_name_from_str() {
        assert_eq!(
            " foo ".parse::<PackageName>().unwrap(),
            PackageName::from("foo")
        );
        "".parse::<PackageName>().expect_err("empty name");
        "foo bar".parse::<PackageName>().expect_err("name with a space");
    }
}
