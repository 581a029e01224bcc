use crate::CoreError;
use aid_store::StoreLayout;
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, warn};

/// Exclusive advisory lock on one identifier, e.g. `container-4f1c2a9be0`.
///
/// Backed by `<home>/store/locks/<key>.lock`, so it serialises threads of
/// one process as well as separate processes sharing a home. Released on
/// drop.
pub struct KeyedLock {
    lock_file: File,
    path: PathBuf,
    key: String,
}

fn validate_key(key: &str) -> Result<(), CoreError> {
    let valid = !key.is_empty()
        && !key.starts_with('.')
        && key
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'-' | b'.'));
    if valid {
        Ok(())
    } else {
        Err(CoreError::InvalidArgument(format!("invalid identifier '{key}'")))
    }
}

fn open_lock_file(path: &Path) -> Result<File, CoreError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    Ok(OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(false)
        .open(path)?)
}

impl KeyedLock {
    /// Block until the lock for `key` is held.
    pub fn acquire(layout: &StoreLayout, key: &str) -> Result<Self, CoreError> {
        validate_key(key)?;
        let path = layout.lock_file(key);
        let file = open_lock_file(&path)?;
        file.lock_exclusive()?;
        debug!("acquired lock {key}");
        Ok(Self {
            lock_file: file,
            path,
            key: key.to_owned(),
        })
    }

    /// Release the lock and delete its file. For identifiers whose entity
    /// has just been removed: a waiter already blocked on the old file
    /// still gets the lock and then finds the entity gone.
    pub fn release_and_remove(self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("could not delete lock file {}: {e}", self.path.display()),
        }
    }
}

impl Drop for KeyedLock {
    fn drop(&mut self) {
        let _ = self.lock_file.unlock();
        debug!("released lock {}", self.key);
    }
}

static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);

/// First Ctrl-C requests a graceful shutdown, the second exits.
pub fn install_signal_handler() {
    let _ = ctrlc::set_handler(move || {
        if SHUTDOWN_REQUESTED.load(Ordering::SeqCst) {
            std::process::exit(1);
        }
        SHUTDOWN_REQUESTED.store(true, Ordering::SeqCst);
        eprintln!("\nshutdown requested, finishing in-flight requests...");
    });
}

pub fn shutdown_requested() -> bool {
    SHUTDOWN_REQUESTED.load(Ordering::SeqCst)
}
