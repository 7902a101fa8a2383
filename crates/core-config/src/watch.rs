//! Hot-reload plumbing: a `notify` watch on the config file's parent
//! directory, reporting changes that touch the file itself so the caller
//! can attempt a reload. `watch` only ever signals "try again" — it never
//! swaps a `Keymap` in by itself, so a bad edit can't half-apply.

use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver};
use std::time::Duration;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum WatchError {
    #[error("starting config watcher: {0}")]
    Init(#[from] notify::Error),
}

/// Keeps the underlying OS watch alive; dropping this stops delivery.
pub struct ConfigWatcher {
    _inner: RecommendedWatcher,
}

/// Watches `path`'s parent directory and returns a receiver that fires
/// with `path` itself whenever a create/modify/remove touches it.
///
/// The parent directory is watched rather than the file directly because
/// editors commonly replace a file via rename-into-place rather than an
/// in-place write, which some platforms report against the old inode
/// rather than the new path if the file itself is the watch target.
pub fn watch(path: &Path) -> Result<(ConfigWatcher, Receiver<PathBuf>), WatchError> {
    let target = path.to_path_buf();
    let parent = target
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));

    let (tx, rx) = mpsc::channel();
    let watched = target.clone();
    let mut watcher = notify::recommended_watcher(move |res: Result<Event, notify::Error>| {
        let event = match res {
            Ok(event) => event,
            Err(err) => {
                warn!(target = "config.watch", %err, "watch_error");
                return;
            }
        };
        if !matches!(
            event.kind,
            EventKind::Modify(_) | EventKind::Create(_) | EventKind::Remove(_)
        ) {
            return;
        }
        if !event.paths.iter().any(|p| p == &watched) {
            return;
        }
        debug!(target = "config.watch", path = %watched.display(), "config_changed");
        let _ = tx.send(watched.clone());
    })?;

    watcher.watch(&parent, RecursiveMode::NonRecursive)?;
    Ok((ConfigWatcher { _inner: watcher }, rx))
}

/// Blocks up to `timeout` for a reload signal, draining any further
/// signals that land in the same window so one editor save (which can
/// touch the file several times, e.g. write-then-rename) triggers a
/// single reload rather than one per underlying filesystem event.
pub fn recv_coalesced(rx: &Receiver<PathBuf>, timeout: Duration) -> Option<PathBuf> {
    let first = rx.recv_timeout(timeout).ok()?;
    while rx.try_recv().is_ok() {}
    Some(first)
}
