use std::{
    collections::{BTreeMap, HashMap, HashSet},
    fs::OpenOptions,
    io::Write,
    path::{Path, PathBuf},
    time::Duration,
};

use log::{debug, info};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::{
    flock::FileLock,
    model::{
        catalog::parse_package_list,
        record::PackageName,
        task::{Arch, BuildOutcome, OutcomeKind, TaskId},
    },
    resolver::Resolution,
};

pub const UNRESOLVED_FILE_NAME: &str = "package_with_missing_dependencies";
const LOCK_FILE_NAME: &str = ".lock";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error on {path}: {source}")]
    IO {
        path: String,
        source: std::io::Error,
    },
    #[error("Output directory {0} is not a directory")]
    BadLocation(String),
    #[error("Output directory lock cannot be acquired: {0}")]
    Lock(#[from] crate::flock::Error),
    #[error("Could not parse {path}: {source}")]
    Parse {
        path: String,
        source: crate::model::ParseError,
    },
    #[error("A second outcome was recorded for {0}")]
    DuplicateOutcome(TaskId),
    #[error("Cancelled while waiting for the output directory lock")]
    Cancelled,
}

/// Creates the output directory if needed and returns its lock file path.
fn prepare_directory(directory: &Path) -> Result<PathBuf, StoreError> {
    if directory.exists() {
        if !directory.is_dir() {
            return Err(StoreError::BadLocation(directory.display().to_string()));
        }
    } else {
        std::fs::create_dir_all(directory).map_err(io_error(directory))?;
    }
    let lock_path = directory.join(LOCK_FILE_NAME);
    debug!("Acquiring a lock on the output directory: {}", lock_path.display());
    Ok(lock_path)
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> StoreError + '_ {
    move |source| StoreError::IO {
        path: path.display().to_string(),
        source,
    }
}

/// Collects every outcome of a run and persists it in an output directory.
///
/// Level and unresolved files are rewritten on each resolution. Outcome files
/// (`succeeded_<arch>`, `failed_<arch>`, ...) are only ever appended to, so a
/// resumed run adds to what an interrupted one left behind. The directory is
/// locked for the lifetime of the store.
pub struct ResultStore {
    directory: PathBuf,
    outcomes: BTreeMap<TaskId, BuildOutcome>,
    unflushed: Vec<TaskId>,
    previous: HashMap<Arch, HashSet<PackageName>>,
    _lock: FileLock,
}

impl ResultStore {
    /// Opens `directory`, failing right away when another process holds it.
    pub fn open(directory: &Path) -> Result<Self, StoreError> {
        let lock_path = prepare_directory(directory)?;
        let lock = FileLock::new(&lock_path)?;
        debug!("Acquired a lock on the output directory");
        Ok(Self::with_lock(directory, lock))
    }

    /// Opens `directory`, waiting up to `lock_timeout` for another process
    /// to release it. Cancelling the token ends the wait.
    pub async fn open_with_wait(
        directory: &Path,
        lock_timeout: Duration,
        cancellation: &CancellationToken,
    ) -> Result<Self, StoreError> {
        let lock_path = prepare_directory(directory)?;
        let lock = FileLock::acquire(&lock_path, lock_timeout, cancellation)
            .await
            .map_err(|error| match error {
                crate::flock::Error::Cancelled { .. } => StoreError::Cancelled,
                error => StoreError::Lock(error),
            })?;
        debug!("Acquired a lock on the output directory");
        Ok(Self::with_lock(directory, lock))
    }

    fn with_lock(directory: &Path, lock: FileLock) -> Self {
        ResultStore {
            directory: directory.to_path_buf(),
            outcomes: BTreeMap::new(),
            unflushed: Vec::new(),
            previous: HashMap::new(),
            _lock: lock,
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Writes `level_<k>_packages` for every level and the sorted unresolved
    /// list. Level files left over from an earlier, deeper resolution are
    /// removed.
    pub fn write_resolution(&self, resolution: &Resolution) -> Result<(), StoreError> {
        for level in &resolution.levels {
            self.write_list(&level_file_name(level.index), level.packages.iter())?;
        }
        let mut stale = resolution.levels.len();
        loop {
            let path = self.directory.join(level_file_name(stale));
            if !path.exists() {
                break;
            }
            debug!("Removing stale {}", path.display());
            std::fs::remove_file(&path).map_err(io_error(&path))?;
            stale += 1;
        }
        // BTreeSet iteration is sorted
        self.write_list(UNRESOLVED_FILE_NAME, resolution.unresolved.iter())?;
        info!(
            "Wrote {} level files and {} to {}",
            resolution.levels.len(),
            UNRESOLVED_FILE_NAME,
            self.directory.display()
        );
        Ok(())
    }

    /// Whether `succeeded_<arch>` from an earlier run lists the package.
    pub fn succeeded_previously(
        &mut self,
        package: &PackageName,
        arch: &Arch,
    ) -> Result<bool, StoreError> {
        if !self.previous.contains_key(arch) {
            let loaded = self.load_previous(arch)?;
            self.previous.insert(arch.clone(), loaded);
        }
        Ok(self
            .previous
            .get(arch)
            .is_some_and(|succeeded| succeeded.contains(package)))
    }

    /// Records the outcome of a task. Each task may be recorded once.
    pub fn record(&mut self, id: TaskId, outcome: BuildOutcome) -> Result<(), StoreError> {
        if self.outcomes.contains_key(&id) {
            return Err(StoreError::DuplicateOutcome(id));
        }
        debug!("{}: {}", id, outcome);
        self.unflushed.push(id.clone());
        self.outcomes.insert(id, outcome);
        Ok(())
    }

    /// Appends every outcome recorded since the last flush to its file.
    pub fn flush(&mut self) -> Result<(), StoreError> {
        let mut files: BTreeMap<String, Vec<&PackageName>> = BTreeMap::new();
        for id in &self.unflushed {
            let kind = self.outcomes[id].kind();
            if let Some(prefix) = kind.file_prefix() {
                files
                    .entry(format!("{}_{}", prefix, id.arch))
                    .or_default()
                    .push(&id.package);
            }
        }
        for (file_name, names) in files {
            let path = self.directory.join(&file_name);
            let mut file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .map_err(io_error(&path))?;
            let mut contents = String::new();
            for name in names {
                contents.push_str(name.as_str());
                contents.push('\n');
            }
            file.write_all(contents.as_bytes()).map_err(io_error(&path))?;
        }
        self.unflushed.clear();
        Ok(())
    }

    pub fn outcomes(&self) -> &BTreeMap<TaskId, BuildOutcome> {
        &self.outcomes
    }

    pub fn outcome(&self, id: &TaskId) -> Option<&BuildOutcome> {
        self.outcomes.get(id)
    }

    /// Number of recorded outcomes of `kind` for `arch`.
    pub fn count(&self, arch: &Arch, kind: OutcomeKind) -> usize {
        self.outcomes
            .iter()
            .filter(|(id, outcome)| &id.arch == arch && outcome.kind() == kind)
            .count()
    }

    fn load_previous(&self, arch: &Arch) -> Result<HashSet<PackageName>, StoreError> {
        let Some(prefix) = OutcomeKind::Succeeded.file_prefix() else {
            return Ok(HashSet::new());
        };
        let path = self.directory.join(format!("{prefix}_{arch}"));
        if !path.exists() {
            return Ok(HashSet::new());
        }
        let contents = std::fs::read_to_string(&path).map_err(io_error(&path))?;
        let names = parse_package_list(&contents).map_err(|source| StoreError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        debug!("{} packages already succeeded for {}", names.len(), arch);
        Ok(names.into_iter().collect())
    }

    fn write_list<'a>(
        &self,
        file_name: &str,
        names: impl Iterator<Item = &'a PackageName>,
    ) -> Result<(), StoreError> {
        let path = self.directory.join(file_name);
        let mut contents = String::new();
        for name in names {
            contents.push_str(name.as_str());
            contents.push('\n');
        }
        std::fs::write(&path, contents).map_err(io_error(&path))
    }
}

pub fn level_file_name(index: usize) -> String {
    format!("level_{index}_packages")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{model::task::SkipReason, resolver::Level};

    use pretty_assertions::assert_eq;
    use std::collections::BTreeSet;

    fn id(package: &str, arch: &str) -> TaskId {
        TaskId::new(PackageName::from(package), Arch::from(arch))
    }

    fn read(dir: &Path, file_name: &str) -> String {
        std::fs::read_to_string(dir.join(file_name)).unwrap()
    }

    #[test]
    fn write_resolution_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = ResultStore::open(dir.path()).unwrap();
        for stale in [5, 2] {
            std::fs::write(dir.path().join(level_file_name(stale)), "old\n").unwrap();
        }

        let resolution = Resolution {
            levels: vec![
                Level {
                    index: 0,
                    packages: vec!["A".into(), "E".into()],
                },
                Level {
                    index: 1,
                    packages: vec!["B".into()],
                },
            ],
            unresolved: BTreeSet::from(["Z".into(), "D".into()]),
            ..Default::default()
        };
        store.write_resolution(&resolution).unwrap();

        assert_eq!(read(dir.path(), "level_0_packages"), "A\nE\n");
        assert_eq!(read(dir.path(), "level_1_packages"), "B\n");
        assert_eq!(read(dir.path(), UNRESOLVED_FILE_NAME), "D\nZ\n");
        assert!(!dir.path().join(level_file_name(2)).exists());
        // only the contiguous run after the last level is cleaned up
        assert!(dir.path().join(level_file_name(5)).exists());
    }

    #[test]
    fn outcomes_are_appended_per_arch() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut store = ResultStore::open(dir.path()).unwrap();
            store.record(id("A", "i686"), BuildOutcome::Succeeded).unwrap();
            store.record(id("B", "i686"), BuildOutcome::failed("boom")).unwrap();
            store.record(id("A", "x86_64"), BuildOutcome::Succeeded).unwrap();
            store
                .record(
                    id("C", "x86_64"),
                    BuildOutcome::Skipped {
                        reason: SkipReason::AlreadyBuilt,
                    },
                )
                .unwrap();
            store.record(id("D", "x86_64"), BuildOutcome::Cancelled).unwrap();
            store
                .record(
                    id("E", "x86_64"),
                    BuildOutcome::TimedOut {
                        after: Duration::from_secs(1),
                    },
                )
                .unwrap();
            store.flush().unwrap();
            assert_eq!(
                store.count(&Arch::from("x86_64"), OutcomeKind::Succeeded),
                1
            );
            assert_eq!(store.count(&Arch::from("i686"), OutcomeKind::Failed), 1);
        }
        {
            let mut store = ResultStore::open(dir.path()).unwrap();
            assert!(store
                .succeeded_previously(&PackageName::from("A"), &Arch::from("i686"))
                .unwrap());
            assert!(!store
                .succeeded_previously(&PackageName::from("B"), &Arch::from("i686"))
                .unwrap());
            store.record(id("B", "i686"), BuildOutcome::Succeeded).unwrap();
            store.flush().unwrap();
            // a second flush has nothing new to write
            store.flush().unwrap();
        }

        assert_eq!(read(dir.path(), "succeeded_i686"), "A\nB\n");
        assert_eq!(read(dir.path(), "failed_i686"), "B\n");
        assert_eq!(read(dir.path(), "succeeded_x86_64"), "A\n");
        assert_eq!(read(dir.path(), "skipped_x86_64"), "C\n");
        assert_eq!(read(dir.path(), "timed_out_x86_64"), "E\n");
        assert!(!dir.path().join("cancelled_x86_64").exists());
    }

    #[test]
    fn duplicate_outcome_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = ResultStore::open(dir.path()).unwrap();
        store.record(id("A", "i686"), BuildOutcome::Succeeded).unwrap();
        let error = store
            .record(id("A", "i686"), BuildOutcome::failed("again"))
            .unwrap_err();
        assert!(matches!(error, StoreError::DuplicateOutcome(task) if task == id("A", "i686")));
        assert_eq!(
            store.outcome(&id("A", "i686")),
            Some(&BuildOutcome::Succeeded)
        );
    }

    #[test]
    fn output_directory_is_exclusive() {
        let dir = tempfile::tempdir().unwrap();
        let _store = ResultStore::open(dir.path()).unwrap();
        let second = ResultStore::open(dir.path());
        assert!(matches!(second, Err(StoreError::Lock(_))));
    }

    #[tokio::test]
    async fn cancelled_lock_wait_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let _store = ResultStore::open(dir.path()).unwrap();
        let cancellation = CancellationToken::new();
        cancellation.cancel();
        let timeout = Duration::from_secs(60);
        let second = ResultStore::open_with_wait(dir.path(), timeout, &cancellation).await;
        assert!(matches!(second, Err(StoreError::Cancelled)));
    }

    #[test]
    fn output_location_must_be_a_directory() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("file");
        std::fs::write(&file, "").unwrap();
        assert!(matches!(
            ResultStore::open(&file),
            Err(StoreError::BadLocation(_))
        ));
    }
}
