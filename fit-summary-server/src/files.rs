use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::OwnedMutexGuard;

use crate::error::AppError;

/// Longest name most filesystems accept for a single component.
const MAX_NAME_LEN: usize = 255;

/// Accepts only a plain file name, never anything that could leave `base`.
pub fn checked_name(name: &str) -> Result<&str, AppError> {
    let reject = |reason| {
        Err(AppError::InvalidName {
            name: name.to_owned(),
            reason,
        })
    };
    if name.is_empty() {
        return reject("empty");
    }
    if name == "." || name == ".." {
        return reject("relative directory");
    }
    if name.len() > MAX_NAME_LEN {
        return reject("too long");
    }
    if name.contains(['/', '\\']) {
        return reject("contains a path separator");
    }
    if name.chars().any(char::is_control) {
        return reject("contains control characters");
    }
    Ok(name)
}

/// Joins a validated name onto `base`.
pub fn resolve(base: &Path, name: &str) -> Result<PathBuf, AppError> {
    Ok(base.join(checked_name(name)?))
}

/// Serializes uploads that write the same summary.
///
/// Keyed by the summary name: `ride.fit` and `ride.csv` both produce
/// `ride_summary.csv`, so their save, processing and output check must not
/// interleave.
#[derive(Debug, Default)]
pub struct NameLocks {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

/// Held for the duration of one upload.
pub struct NameGuard<'a> {
    owner: &'a NameLocks,
    name: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl NameLocks {
    pub async fn lock(&self, name: &str) -> NameGuard<'_> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(locks.entry(name.to_owned()).or_default())
        };
        NameGuard {
            owner: self,
            name: name.to_owned(),
            guard: Some(lock.lock_owned().await),
        }
    }

    /// Whether an upload currently holds or waits for `name`.
    pub fn is_locked(&self, name: &str) -> bool {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    fn release(&self, name: &str) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        // Only the map holds it: nobody is waiting.
        if locks
            .get(name)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(name);
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl Drop for NameGuard<'_> {
    fn drop(&mut self) {
        // The guard keeps its own Arc, drop it before counting.
        self.guard.take();
        self.owner.release(&self.name);
    }
}
