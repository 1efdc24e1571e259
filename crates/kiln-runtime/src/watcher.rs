//! Source watcher that turns workspace edits into single-module reloads.
//!
//! ```text
//! notify events
//!   -> drop ignored dirs and the storage file
//!   -> map to the owning workspace (nearest module.toml)
//!   -> debounce per workspace
//!   -> blake3 over the source tree, skip if unchanged
//!   -> WatchEvent::WorkspaceChanged
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use kiln_context::DATA_FILE_NAME;
use kiln_workspace::{MANIFEST_FILE_NAME, Workspace};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::{RuntimeError, RuntimeResult};
use crate::host::ModuleHost;

/// Default debounce interval for file change events.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(500);

/// Directory names never watched or hashed.
pub const IGNORED_DIRS: &[&str] = &[".git", "target", "_build"];

/// Events emitted by [`WorkspaceWatcher`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    /// A workspace's sources changed.
    WorkspaceChanged {
        /// Directory holding the workspace manifest.
        workspace_dir: PathBuf,
        /// blake3 hash of the source tree after the change.
        source_hash: String,
    },
    /// Non-fatal watcher error.
    Error(String),
}

/// Watcher settings.
#[derive(Debug, Clone)]
pub struct WatcherConfig {
    /// Root containing the workspace directories.
    pub root: PathBuf,
    /// Changes to one workspace inside this window are coalesced.
    pub debounce: Duration,
}

impl WatcherConfig {
    /// Watch `root` with the default debounce.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            debounce: DEFAULT_DEBOUNCE,
        }
    }

    /// Override the debounce interval.
    #[must_use]
    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }
}

/// Watches the workspaces root and reports which workspace changed.
pub struct WorkspaceWatcher {
    config: WatcherConfig,
    hash_cache: HashMap<PathBuf, String>,
    /// Dropping this stops filesystem monitoring.
    watcher: RecommendedWatcher,
    raw_rx: mpsc::UnboundedReceiver<notify::Result<Event>>,
    event_tx: mpsc::Sender<WatchEvent>,
}

impl std::fmt::Debug for WorkspaceWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkspaceWatcher")
            .field("config", &self.config)
            .field("tracked", &self.hash_cache.len())
            .finish_non_exhaustive()
    }
}

impl WorkspaceWatcher {
    /// Create the watcher and the receiver for its events. Nothing is
    /// watched until [`run`](Self::run) is awaited.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::Watch`] if the platform watcher cannot be
    /// created.
    pub fn new(config: WatcherConfig) -> RuntimeResult<(Self, mpsc::Receiver<WatchEvent>)> {
        let (raw_tx, raw_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::channel(64);

        let watcher = RecommendedWatcher::new(
            move |res| {
                let _ = raw_tx.send(res);
            },
            notify::Config::default(),
        )
        .map_err(|e| RuntimeError::Watch(e.to_string()))?;

        Ok((
            Self {
                config,
                hash_cache: HashMap::new(),
                watcher,
                raw_rx,
                event_tx,
            },
            event_rx,
        ))
    }

    /// Run until the event receiver is dropped or the platform watcher
    /// stops.
    pub async fn run(mut self) {
        let root = self.config.root.clone();
        match self.watcher.watch(&root, RecursiveMode::Recursive) {
            Ok(()) => info!(root = %root.display(), "Watching workspaces"),
            Err(e) => {
                warn!(root = %root.display(), error = %e, "Failed to watch workspaces root");
                let _ = self.event_tx.send(WatchEvent::Error(e.to_string())).await;
                return;
            },
        }

        let debounce = self.config.debounce;
        let mut pending: HashMap<PathBuf, tokio::time::Instant> = HashMap::new();

        loop {
            let next_deadline = pending.values().copied().min();

            tokio::select! {
                biased;

                () = async {
                    match next_deadline {
                        Some(deadline) => tokio::time::sleep_until(deadline).await,
                        None => std::future::pending::<()>().await,
                    }
                } => {
                    let now = tokio::time::Instant::now();
                    let ready: Vec<PathBuf> = pending
                        .iter()
                        .filter(|(_, deadline)| **deadline <= now)
                        .map(|(dir, _)| dir.clone())
                        .collect();

                    for dir in ready {
                        pending.remove(&dir);
                        if !self.process_change(&dir).await {
                            return;
                        }
                    }
                }

                event = self.raw_rx.recv() => {
                    match event {
                        Some(Ok(ev)) => self.handle_raw_event(&ev, &mut pending, debounce),
                        Some(Err(e)) => {
                            warn!(error = %e, "Filesystem watcher error");
                            if self.event_tx.send(WatchEvent::Error(e.to_string())).await.is_err() {
                                return;
                            }
                        }
                        None => {
                            debug!("Filesystem watcher channel closed, stopping");
                            break;
                        }
                    }
                }
            }
        }
    }

    fn handle_raw_event(
        &self,
        event: &Event,
        pending: &mut HashMap<PathBuf, tokio::time::Instant>,
        debounce: Duration,
    ) {
        match event.kind {
            EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_) => {},
            _ => return,
        }

        for path in &event.paths {
            if is_ignored(&self.config.root, path) {
                continue;
            }
            if let Some(dir) = resolve_workspace_dir(&self.config.root, path) {
                debug!(
                    path = %path.display(),
                    workspace_dir = %dir.display(),
                    kind = ?event.kind,
                    "Workspace file changed"
                );
                #[allow(clippy::arithmetic_side_effects)] // Instant + Duration cannot overflow in practice
                let deadline = tokio::time::Instant::now() + debounce;
                pending.insert(dir, deadline);
            }
        }
    }

    /// Returns `false` once the event receiver is gone.
    async fn process_change(&mut self, dir: &Path) -> bool {
        let owned = dir.to_path_buf();
        let hashed = match tokio::task::spawn_blocking(move || compute_source_hash(&owned)).await {
            Ok(result) => result,
            Err(e) => {
                warn!(error = %e, "Hash task was cancelled");
                return true;
            },
        };

        let event = match hashed {
            Ok(hash) => {
                if self.hash_cache.get(dir).is_some_and(|h| h == &hash) {
                    debug!(workspace_dir = %dir.display(), "Source hash unchanged");
                    return true;
                }
                info!(workspace_dir = %dir.display(), hash = %hash, "Workspace sources changed");
                self.hash_cache.insert(dir.to_path_buf(), hash.clone());
                WatchEvent::WorkspaceChanged {
                    workspace_dir: dir.to_path_buf(),
                    source_hash: hash,
                }
            },
            Err(e) => {
                warn!(workspace_dir = %dir.display(), error = %e, "Failed to hash workspace");
                WatchEvent::Error(format!("hash failed for {}: {e}", dir.display()))
            },
        };
        self.event_tx.send(event).await.is_ok()
    }
}

/// Forward watcher events to [`ModuleHost::reload_one`] until either side
/// stops.
pub async fn reload_on_change(host: ModuleHost, mut events: mpsc::Receiver<WatchEvent>) {
    while let Some(event) = events.recv().await {
        let WatchEvent::WorkspaceChanged { workspace_dir, .. } = event else {
            continue;
        };
        let workspace = match Workspace::load(workspace_dir.clone()) {
            Ok(ws) => ws,
            Err(e) => {
                warn!(workspace_dir = %workspace_dir.display(), error = %e, "Changed workspace is invalid");
                continue;
            },
        };
        let id = workspace.id().clone();
        let logged = id.clone();
        let sent = host.reload_one(id, move |outcome| {
            if outcome.success {
                info!(module_id = %logged, message = %outcome.message, "Reloaded after change");
            } else {
                warn!(module_id = %logged, message = %outcome.message, "Reload after change failed");
            }
        });
        if sent.is_err() {
            debug!("Module host stopped, ending watch loop");
            return;
        }
    }
}

/// Whether `path` is storage or lies in an ignored directory. Only the
/// components below `base` are considered.
fn is_ignored(base: &Path, path: &Path) -> bool {
    let relative = path.strip_prefix(base).unwrap_or(path);
    relative.file_name().is_some_and(|n| n == DATA_FILE_NAME)
        || relative.components().any(|c| {
            c.as_os_str()
                .to_str()
                .is_some_and(|s| IGNORED_DIRS.contains(&s))
        })
}

/// Walk up from a changed path to the directory holding a manifest,
/// stopping at `root`.
fn resolve_workspace_dir(root: &Path, path: &Path) -> Option<PathBuf> {
    let mut current = path.parent()?.to_path_buf();
    loop {
        if current.components().eq(root.components()) {
            return None;
        }
        if current.join(MANIFEST_FILE_NAME).is_file() {
            return Some(current);
        }
        current = current.parent()?.to_path_buf();
    }
}

/// Deterministic blake3 hash over every file in a workspace, covering
/// relative paths and contents.
///
/// # Errors
///
/// Returns an error if `dir` cannot be read.
pub fn compute_source_hash(dir: &Path) -> std::io::Result<String> {
    let mut paths = Vec::new();
    collect_paths(dir, dir, &mut paths)?;
    paths.sort();

    let mut hasher = blake3::Hasher::new();
    for path in &paths {
        let Ok(rel) = path.strip_prefix(dir) else {
            continue;
        };
        match std::fs::read(path) {
            Ok(content) => {
                let rel = rel.to_string_lossy();
                hasher.update(&(rel.len() as u64).to_le_bytes());
                hasher.update(rel.as_bytes());
                hasher.update(&(content.len() as u64).to_le_bytes());
                hasher.update(&content);
            },
            Err(e) => {
                debug!(path = %path.display(), error = %e, "Skipping unreadable file in hash");
            },
        }
    }
    Ok(hasher.finalize().to_hex().to_string())
}

fn collect_paths(base: &Path, dir: &Path, paths: &mut Vec<PathBuf>) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let Ok(entry) = entry else { continue };
        let Ok(file_type) = entry.file_type() else {
            continue;
        };
        let path = entry.path();
        if file_type.is_symlink() || is_ignored(base, &path) {
            continue;
        }
        if file_type.is_dir() {
            collect_paths(base, &path, paths)?;
        } else if file_type.is_file() {
            paths.push(path);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn workspace(root: &Path, name: &str) -> PathBuf {
        let dir = root.join(name);
        std::fs::create_dir_all(dir.join("src")).unwrap();
        std::fs::write(dir.join(MANIFEST_FILE_NAME), "id = \"a\"\n").unwrap();
        std::fs::write(dir.join("src/main.ks"), "init\n").unwrap();
        dir
    }

    #[test]
    fn hash_ignores_storage_and_build_dirs() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = workspace(tmp.path(), "a");
        let before = compute_source_hash(&dir).unwrap();

        std::fs::write(dir.join(DATA_FILE_NAME), "[values]\n").unwrap();
        std::fs::create_dir_all(dir.join("target")).unwrap();
        std::fs::write(dir.join("target/out"), "x").unwrap();
        assert_eq!(compute_source_hash(&dir).unwrap(), before);

        std::fs::write(dir.join("src/main.ks"), "init changed\n").unwrap();
        assert_ne!(compute_source_hash(&dir).unwrap(), before);
    }

    #[test]
    fn hash_covers_renames() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = workspace(tmp.path(), "a");
        let before = compute_source_hash(&dir).unwrap();
        std::fs::rename(dir.join("src/main.ks"), dir.join("src/other.ks")).unwrap();
        assert_ne!(compute_source_hash(&dir).unwrap(), before);
    }

    #[test]
    fn resolves_nearest_workspace() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = workspace(tmp.path(), "a");
        assert_eq!(
            resolve_workspace_dir(tmp.path(), &dir.join("src/main.ks")),
            Some(dir.clone())
        );
        assert_eq!(
            resolve_workspace_dir(tmp.path(), &dir.join(MANIFEST_FILE_NAME)),
            Some(dir)
        );
        assert_eq!(resolve_workspace_dir(tmp.path(), &tmp.path().join("stray.txt")), None);
    }

    #[test]
    fn ignored_paths() {
        let root = Path::new("/w");
        assert!(is_ignored(root, Path::new("/w/a/.git/HEAD")));
        assert!(is_ignored(root, Path::new("/w/a/data.toml")));
        assert!(is_ignored(root, Path::new("/w/a/target/out.wasm")));
        assert!(!is_ignored(root, Path::new("/w/a/src/main.ks")));
    }

    #[test]
    fn ignored_names_above_the_root_do_not_count() {
        let root = Path::new("/home/dev/target/_build/modules");
        assert!(!is_ignored(root, &root.join("a/src/main.ks")));
        assert!(is_ignored(root, &root.join("a/_build/x")));
    }

    #[test]
    fn hash_works_under_an_ignored_directory_name() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("target");
        let dir = workspace(&root, "a");
        let before = compute_source_hash(&dir).unwrap();
        std::fs::write(dir.join("src/main.ks"), "init changed\n").unwrap();
        assert_ne!(compute_source_hash(&dir).unwrap(), before);
    }
}
