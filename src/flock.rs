use std::{
    fs::File,
    path::Path,
    time::{Duration, Instant},
};

use fs4::fs_std::FileExt;
use log::debug;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

const RETRY_INTERVAL: Duration = Duration::from_secs(1);

/// Exclusive advisory lock held for as long as the value lives.
pub struct FileLock {
    _file: File,
}

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    IO(#[from] std::io::Error),
    #[error("{path} is still locked by another process after {waited:?}")]
    Contended { path: String, waited: Duration },
    #[error("Cancelled while waiting for the lock on {path}")]
    Cancelled { path: String },
}

impl FileLock {
    /// Takes the lock on `path` if it is free, creating the file if needed.
    pub fn new(path: &Path) -> Result<Self, Error> {
        let file = File::create(path)?;
        if file.try_lock_exclusive()? {
            Ok(Self { _file: file })
        } else {
            Err(Error::Contended {
                path: path.display().to_string(),
                waited: Duration::ZERO,
            })
        }
    }

    /// Takes the lock on `path`, retrying every second until `timeout` has
    /// passed. The wait stops as soon as `cancellation` fires.
    pub async fn acquire(
        path: &Path,
        timeout: Duration,
        cancellation: &CancellationToken,
    ) -> Result<Self, Error> {
        let file = File::create(path)?;
        let start = Instant::now();
        loop {
            if file.try_lock_exclusive()? {
                return Ok(Self { _file: file });
            }
            let waited = start.elapsed();
            if waited >= timeout {
                return Err(Error::Contended {
                    path: path.display().to_string(),
                    waited,
                });
            }
            debug!("Failed to acquire a lock on {}, retrying", path.display());
            tokio::select! {
                biased;
                _ = cancellation.cancelled() => {
                    return Err(Error::Cancelled {
                        path: path.display().to_string(),
                    });
                }
                _ = tokio::time::sleep(RETRY_INTERVAL.min(timeout - waited)) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_lock_is_contended() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".lock");
        let _first = FileLock::new(&path).unwrap();
        let second = FileLock::new(&path);
        assert!(matches!(second, Err(Error::Contended { .. })));
    }

    #[test]
    fn lock_is_released_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".lock");
        drop(FileLock::new(&path).unwrap());
        FileLock::new(&path).unwrap();
    }

    #[tokio::test]
    async fn wait_gives_up_after_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".lock");
        let _first = FileLock::new(&path).unwrap();
        let timeout = Duration::from_millis(50);
        let cancellation = CancellationToken::new();
        let second = FileLock::acquire(&path, timeout, &cancellation).await;
        assert!(matches!(second, Err(Error::Contended { .. })));
    }

    #[tokio::test]
    async fn cancellation_stops_the_wait() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".lock");
        let _first = FileLock::new(&path).unwrap();

        let cancellation = CancellationToken::new();
        let canceller = cancellation.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            canceller.cancel();
        });

        let start = Instant::now();
        let timeout = Duration::from_secs(60);
        let second = FileLock::acquire(&path, timeout, &cancellation).await;
        assert!(matches!(second, Err(Error::Cancelled { .. })));
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn free_lock_is_taken_without_waiting() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".lock");
        let cancellation = CancellationToken::new();
        cancellation.cancel();
        let timeout = Duration::from_secs(60);
        FileLock::acquire(&path, timeout, &cancellation)
            .await
            .unwrap();
    }
}
