//! Workspace discovery.
//!
//! Every immediate subdirectory of the workspaces root that contains a
//! `module.toml` is a candidate. Candidates are visited in lexicographic
//! order of their directory names so that a load cycle is reproducible:
//! when two directories declare the same id, the first one visited keeps it.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::{debug, error, info, warn};

use crate::error::{ManifestError, WorkspaceResult};
use crate::id::ModuleId;
use crate::manifest::LoadMode;
use crate::workspace::{MANIFEST_FILE_NAME, Workspace};

/// A candidate directory that could not be used.
#[derive(Debug)]
pub struct RejectedWorkspace {
    /// Workspace directory.
    pub path: PathBuf,
    /// Why it was rejected.
    pub error: ManifestError,
}

/// Outcome of scanning a workspaces root.
#[derive(Debug, Default)]
pub struct Discovery {
    /// Loadable workspaces in discovery order, ids unique.
    pub workspaces: Vec<Workspace>,
    /// Valid workspaces whose manifest says `load = "disable"`.
    pub disabled: Vec<Workspace>,
    /// Directories with an unusable manifest, or a duplicated id.
    pub rejected: Vec<RejectedWorkspace>,
}

impl Discovery {
    /// Find a workspace by id, looking at loadable workspaces first.
    #[must_use]
    pub fn get(&self, id: &ModuleId) -> Option<&Workspace> {
        self.workspaces
            .iter()
            .chain(self.disabled.iter())
            .find(|ws| ws.id() == id)
    }
}

/// Scan `root` for workspaces.
///
/// Per-directory problems are collected in [`Discovery::rejected`] and never
/// abort the scan.
///
/// # Errors
///
/// Returns [`ManifestError::Io`] only if `root` itself cannot be listed.
pub fn discover(root: &Path) -> WorkspaceResult<Discovery> {
    let mut candidates = candidate_dirs(root)?;
    candidates.sort_by(|a, b| a.file_name().cmp(&b.file_name()));

    let mut discovery = Discovery::default();
    let mut owners: HashMap<ModuleId, PathBuf> = HashMap::new();

    for dir in candidates {
        let workspace = match Workspace::load(&dir) {
            Ok(ws) => ws,
            Err(e) => {
                warn!(path = %dir.display(), error = %e, "Skipping invalid workspace");
                discovery.rejected.push(RejectedWorkspace { path: dir, error: e });
                continue;
            },
        };

        if workspace.manifest().load == LoadMode::Disable {
            info!(module_id = %workspace.id(), "Workspace is disabled, skipping");
            discovery.disabled.push(workspace);
            continue;
        }

        if let Some(kept) = owners.get(workspace.id()) {
            let e = ManifestError::DuplicateId {
                id: workspace.id().to_string(),
                kept: kept.clone(),
                rejected: dir.clone(),
            };
            error!(error = %e, "Duplicate module id");
            discovery.rejected.push(RejectedWorkspace { path: dir, error: e });
            continue;
        }

        owners.insert(workspace.id().clone(), dir);
        discovery.workspaces.push(workspace);
    }

    info!(
        root = %root.display(),
        loadable = discovery.workspaces.len(),
        disabled = discovery.disabled.len(),
        rejected = discovery.rejected.len(),
        "Discovered workspaces"
    );
    Ok(discovery)
}

/// Locate the workspace that owns `id` under `root`, applying the same
/// ordering and duplicate policy as [`discover`].
///
/// # Errors
///
/// Returns [`ManifestError::Io`] if `root` cannot be listed.
pub fn find_workspace(root: &Path, id: &ModuleId) -> WorkspaceResult<Option<Workspace>> {
    let discovery = discover(root)?;
    Ok(discovery.get(id).cloned())
}

fn candidate_dirs(root: &Path) -> WorkspaceResult<Vec<PathBuf>> {
    let entries = std::fs::read_dir(root).map_err(|source| ManifestError::Io {
        path: root.to_path_buf(),
        source,
    })?;

    let mut dirs = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| ManifestError::Io {
            path: root.to_path_buf(),
            source,
        })?;
        let path = entry.path();
        if path.is_dir() && path.join(MANIFEST_FILE_NAME).is_file() {
            dirs.push(path);
        } else {
            debug!(path = %path.display(), "Not a workspace");
        }
    }
    Ok(dirs)
}
