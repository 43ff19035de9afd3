//! Advisory cross-process locks guarding read-modify-write of state files.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use fs2::FileExt;

/// Exclusive advisory lock on a `<file>.lock` sibling of a state file.
///
/// Held for the duration of a read-modify-write so that the daemon and a CLI
/// invocation never interleave updates to the same file. Released on drop.
#[derive(Debug)]
pub struct FileLock {
    file: File,
    path: PathBuf,
}

impl FileLock {
    /// Blocks until the lock for `target` is acquired.
    pub fn acquire(target: &Path) -> io::Result<Self> {
        let path = lock_path(target);
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)?;
        file.lock_exclusive()?;
        Ok(Self { file, path })
    }

    /// The lock file on disk.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

fn lock_path(target: &Path) -> PathBuf {
    let mut name = target
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".lock");
    target.with_file_name(name)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;
    use tempfile::tempdir;

    #[test]
    fn lock_file_sits_next_to_the_target() {
        let dir = tempdir().unwrap();
        let lock = FileLock::acquire(&dir.path().join("state/review.json")).unwrap();
        assert_eq!(lock.path(), dir.path().join("state/review.json.lock"));
        assert!(lock.path().exists());
    }

    #[test]
    fn second_holder_waits_for_release() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("ledger.json");
        let first = FileLock::acquire(&target).unwrap();

        let (tx, rx) = mpsc::channel();
        let waiter = {
            let target = target.clone();
            thread::spawn(move || {
                let _second = FileLock::acquire(&target).unwrap();
                tx.send(()).unwrap();
            })
        };

        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
        drop(first);
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        waiter.join().unwrap();
    }
}
