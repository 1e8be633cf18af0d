//! Optional retention for the upload and processed directories.
//!
//! Nothing is deleted unless the server is started with a maximum age or size.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use fit_summary_api::api::summary_file_name;

use crate::files::NameLocks;

/// Cleanup runs every hour.
const INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Starts periodic cleanup of each directory in `dirs`.
///
/// Runs [`cleanup_dir`] on a background task, the first sweep happens right away.
/// Files of an upload in progress are left alone, see [`NameLocks`].
#[allow(rustdoc::private_intra_doc_links)]
pub fn start_cleanup_task(
    dirs: Vec<PathBuf>,
    locks: Arc<NameLocks>,
    max_age: Option<Duration>,
    max_size: Option<usize>,
) {
    if max_age.is_none() && max_size.is_none() {
        log::debug!("no retention configured, cleanup disabled");
        return;
    }
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(INTERVAL);
        loop {
            interval.tick().await;
            for dir in &dirs {
                if let Err(e) = cleanup_dir(dir, &locks, max_age, max_size).await {
                    log::warn!(dir:debug, e:debug; "cleanup failed");
                }
            }
        }
    });
}

/// Cleans up a single directory.
///
/// - First removes entries older than `max_age`.
/// - Then removes the oldest entries until the directory is under `max_size` bytes.
///
/// Age is determined by [`std::fs::Metadata::modified`].
async fn cleanup_dir(
    dir: &Path,
    locks: &NameLocks,
    max_age: Option<Duration>,
    max_size: Option<usize>,
) -> std::io::Result<()> {
    if let Some(max_age) = max_age {
        let now = SystemTime::now();
        for (path, modified) in entries(dir).await? {
            if now.duration_since(modified).unwrap_or(Duration::ZERO) > max_age {
                if in_use(&path, locks) {
                    log::trace!(path:debug; "skipping artifact of a running upload");
                    continue;
                }
                remove(&path).await?;
                log::trace!(path:debug; "deleted artifact due to max_age");
            }
        }
    }

    if let Some(max_size) = max_size {
        let mut entries = entries(dir).await?;
        // Newest first
        entries.sort_by_key(|(_, modified)| std::cmp::Reverse(*modified));

        // Keep until max_size is exceeded, then delete the rest
        let mut total_size_seen = 0;
        for (path, _) in entries {
            if total_size_seen <= max_size {
                let size = entry_size(path.clone()).await;
                log::trace!(path:debug, size; "found entry");
                total_size_seen += size;
            }
            if total_size_seen > max_size {
                if in_use(&path, locks) {
                    log::trace!(path:debug; "skipping artifact of a running upload");
                    continue;
                }
                remove(&path).await?;
                log::trace!(path:debug; "deleted artifact due to max_size");
            }
        }
    }
    Ok(())
}

/// Whether `path` is an upload or summary an upload currently works on.
///
/// Uploads are locked by their summary name, summaries by their own name.
fn in_use(path: &Path, locks: &NameLocks) -> bool {
    let Some(name) = path.file_name() else {
        return false;
    };
    let name = name.to_string_lossy();
    locks.is_locked(&name) || locks.is_locked(&summary_file_name(&name))
}

/// Lists the direct children of `dir` with their modification time.
async fn entries(dir: &Path) -> std::io::Result<Vec<(PathBuf, SystemTime)>> {
    let mut entries = Vec::new();
    let mut rd = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = rd.next_entry().await? {
        let modified = entry
            .metadata()
            .await?
            .modified()
            .unwrap_or(SystemTime::UNIX_EPOCH);
        entries.push((entry.path(), modified));
    }
    Ok(entries)
}

async fn remove(path: &Path) -> std::io::Result<()> {
    let meta = tokio::fs::symlink_metadata(path).await?;
    if meta.is_dir() {
        tokio::fs::remove_dir_all(path).await
    } else {
        tokio::fs::remove_file(path).await
    }
}

/// Recursively calculates the total size of a file or directory.
///
/// Depth-first and sequential, which is slow but won't stress the system.
#[allow(clippy::cast_possible_truncation)]
fn entry_size(
    path: PathBuf,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = usize> + Send>> {
    Box::pin(async move {
        let Ok(meta) = tokio::fs::metadata(&path).await else {
            log::warn!(path:debug; "failed to read metadata, defaulting to zero");
            return 0;
        };
        if meta.is_file() {
            meta.len() as usize
        } else if meta.is_dir() {
            let Ok(mut rd) = tokio::fs::read_dir(&path).await else {
                log::warn!(path:debug; "failed to read dir, defaulting to zero");
                return 0;
            };
            let mut size = 0;
            while let Some(entry) = rd.next_entry().await.unwrap_or(None) {
                size += entry_size(entry.path()).await;
            }
            size
        } else {
            0
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_aged(dir: &Path, name: &str, len: usize, age: Duration) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, vec![b'x'; len]).unwrap();
        let file = std::fs::File::options().write(true).open(&path).unwrap();
        file.set_modified(SystemTime::now() - age).unwrap();
        path
    }

    #[tokio::test(flavor = "current_thread")]
    async fn removes_by_age() {
        let dir = tempfile::tempdir().unwrap();
        let old = write_aged(dir.path(), "old.fit", 10, Duration::from_secs(7200));
        let new = write_aged(dir.path(), "new.fit", 10, Duration::ZERO);

        cleanup_dir(dir.path(), &NameLocks::default(), Some(Duration::from_secs(3600)), None)
            .await
            .unwrap();
        assert!(!old.exists());
        assert!(new.exists());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn removes_oldest_over_size() {
        let dir = tempfile::tempdir().unwrap();
        let oldest = write_aged(dir.path(), "a_summary.csv", 100, Duration::from_secs(300));
        let middle = write_aged(dir.path(), "b_summary.csv", 100, Duration::from_secs(200));
        let newest = write_aged(dir.path(), "c_summary.csv", 100, Duration::from_secs(100));

        cleanup_dir(dir.path(), &NameLocks::default(), None, Some(250))
            .await
            .unwrap();
        assert!(!oldest.exists());
        assert!(middle.exists());
        assert!(newest.exists());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn nothing_configured_keeps_everything() {
        let dir = tempfile::tempdir().unwrap();
        let file = write_aged(dir.path(), "ride.fit", 10, Duration::from_secs(1_000_000));

        cleanup_dir(dir.path(), &NameLocks::default(), None, None)
            .await
            .unwrap();
        assert!(file.exists());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn running_upload_is_kept() {
        let dir = tempfile::tempdir().unwrap();
        let age = Duration::from_secs(7200);
        let upload = write_aged(dir.path(), "ride.fit", 10, age);
        let summary = write_aged(dir.path(), "ride_summary.csv", 10, age);
        let other = write_aged(dir.path(), "walk.fit", 10, age);

        let locks = NameLocks::default();
        let guard = locks.lock("ride_summary.csv").await;
        cleanup_dir(dir.path(), &locks, Some(Duration::from_secs(3600)), None)
            .await
            .unwrap();
        assert!(upload.exists());
        assert!(summary.exists());
        assert!(!other.exists());

        drop(guard);
        cleanup_dir(dir.path(), &locks, None, Some(0)).await.unwrap();
        assert!(!upload.exists());
        assert!(!summary.exists());
    }
}
