//! Module-facing logger.

use kiln_workspace::ModuleId;
use tracing::{debug, error, info, warn};

/// Logger handed to module code. Every line carries the module id; debug
/// lines are dropped unless the manifest enables `options.debug`.
#[derive(Debug, Clone)]
pub struct ModuleLogger {
    module: ModuleId,
    debug: bool,
}

impl ModuleLogger {
    /// Create a logger for `module`.
    #[must_use]
    pub fn new(module: ModuleId, debug: bool) -> Self {
        Self { module, debug }
    }

    /// Whether debug output is enabled.
    #[must_use]
    pub fn debug_enabled(&self) -> bool {
        self.debug
    }

    /// Log at info level.
    pub fn info(&self, message: &str) {
        info!(target: "kiln::module", module = %self.module, "{message}");
    }

    /// Log at warn level.
    pub fn warn(&self, message: &str) {
        warn!(target: "kiln::module", module = %self.module, "{message}");
    }

    /// Log at error level.
    pub fn error(&self, message: &str) {
        error!(target: "kiln::module", module = %self.module, "{message}");
    }

    /// Log at debug level if the module asked for it. Returns whether the
    /// line was emitted.
    pub fn debug(&self, message: &str) -> bool {
        if self.debug {
            debug!(target: "kiln::module", module = %self.module, "{message}");
        }
        self.debug
    }

    /// Log at a level named by module code (`debug`, `info`, `warn`,
    /// `error`). Unknown levels log at info.
    pub fn log(&self, level: &str, message: &str) {
        match level.trim().to_ascii_lowercase().as_str() {
            "debug" | "trace" => {
                self.debug(message);
            },
            "warn" | "warning" => self.warn(message),
            "error" => self.error(message),
            _ => self.info(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_is_gated_by_flag() {
        let quiet = ModuleLogger::new(ModuleId::from_static("a"), false);
        let loud = ModuleLogger::new(ModuleId::from_static("a"), true);
        assert!(!quiet.debug("hidden"));
        assert!(loud.debug("shown"));
    }
}
