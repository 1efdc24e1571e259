use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default number of compiles run at once.
pub const DEFAULT_MAX_PARALLEL: usize = 4;

/// Default wait between teardown and the leak scan.
pub const DEFAULT_LEAK_SCAN_DELAY: Duration = Duration::from_millis(500);

/// Settings for a [`ModuleHost`](crate::ModuleHost).
#[derive(Debug, Clone)]
pub struct HostConfig {
    workspaces_root: PathBuf,
    max_parallel: usize,
    leak_scan_delay: Duration,
}

impl HostConfig {
    /// Host discovering workspaces directly under `workspaces_root`.
    #[must_use]
    pub fn new(workspaces_root: impl Into<PathBuf>) -> Self {
        Self {
            workspaces_root: workspaces_root.into(),
            max_parallel: DEFAULT_MAX_PARALLEL,
            leak_scan_delay: DEFAULT_LEAK_SCAN_DELAY,
        }
    }

    /// Bound concurrent compiles. Zero is treated as one.
    #[must_use]
    pub fn with_max_parallel(mut self, max_parallel: usize) -> Self {
        self.max_parallel = max_parallel.max(1);
        self
    }

    /// Delay between a module's teardown and its leak scan.
    #[must_use]
    pub fn with_leak_scan_delay(mut self, delay: Duration) -> Self {
        self.leak_scan_delay = delay;
        self
    }

    /// Directory holding the workspaces.
    #[must_use]
    pub fn workspaces_root(&self) -> &Path {
        &self.workspaces_root
    }

    /// Concurrent compile limit.
    #[must_use]
    pub fn max_parallel(&self) -> usize {
        self.max_parallel
    }

    /// Leak scan delay.
    #[must_use]
    pub fn leak_scan_delay(&self) -> Duration {
        self.leak_scan_delay
    }
}
