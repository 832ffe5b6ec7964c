//! Mirror directory naming and per-mirror locking.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use sha2::{Digest, Sha256};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Directory name of the mirror for `locator`.
///
/// The readable part strips a trailing `.git` and maps `://`, `:` and `/`
/// to `_`; the 12-hex-digit SHA-256 suffix keeps distinct locators apart
/// even when their readable parts collide.
pub fn mirror_dir_name(locator: &str) -> String {
    let locator = locator.trim();
    let readable = locator.trim_end_matches('/');
    let readable = readable.strip_suffix(".git").unwrap_or(readable);
    let readable: String = readable
        .replace("://", "_")
        .chars()
        .map(|c| match c {
            ':' | '/' | '\\' => '_',
            c => c,
        })
        .collect();

    let digest = hex::encode(Sha256::digest(locator.as_bytes()));
    format!("{}-{}", readable.trim_matches('_'), &digest[..12])
}

/// Hands out one async mutex per mirror path.
///
/// Two trackings pointing at the same upstream share a mirror; fetch, walk
/// and diff must not interleave on it.
#[derive(Clone, Default)]
pub struct MirrorLocks {
    locks: Arc<Mutex<HashMap<PathBuf, Arc<AsyncMutex<()>>>>>,
}

impl MirrorLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to the mirror at `path`.
    pub async fn lock(&self, path: &Path) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self
                .locks
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            Arc::clone(locks.entry(path.to_path_buf()).or_default())
        };
        lock.lock_owned().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn readable_part_of_mirror_name() {
        let name = mirror_dir_name("https://github.com/madler/zlib.git");
        assert!(name.starts_with("https_github.com_madler_zlib-"), "{name}");
        assert_eq!(name.len(), "https_github.com_madler_zlib-".len() + 12);
    }

    #[test]
    fn mirror_name_keeps_trailing_letters() {
        // Only the literal `.git` suffix is removed, not trailing g/i/t chars.
        let name = mirror_dir_name("https://example.com/org/digit");
        assert!(name.starts_with("https_example.com_org_digit-"), "{name}");
    }

    #[test]
    fn colliding_readable_parts_get_distinct_names() {
        let a = mirror_dir_name("https://host/a/b");
        let b = mirror_dir_name("https://host/a_b");
        assert_ne!(a, b);
        assert_eq!(mirror_dir_name("https://host/a/b"), a);
    }

    #[tokio::test(start_paused = true)]
    async fn same_path_is_serialized() {
        let locks = MirrorLocks::new();
        let path = PathBuf::from("/tmp/mirror");

        let guard = locks.lock(&path).await;
        let contender = {
            let locks = locks.clone();
            let path = path.clone();
            tokio::spawn(async move {
                let _guard = locks.lock(&path).await;
            })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!contender.is_finished());

        drop(guard);
        contender.await.unwrap();
    }

    #[tokio::test]
    async fn distinct_paths_do_not_block() {
        let locks = MirrorLocks::new();
        let _a = locks.lock(Path::new("/tmp/a")).await;
        let _b = locks.lock(Path::new("/tmp/b")).await;
    }
}
