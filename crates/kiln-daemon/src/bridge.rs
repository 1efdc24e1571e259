//! Conversion from configuration sections to host components.

use std::path::Path;
use std::sync::Arc;

use kiln_build::{ArtifactCompiler, CacheStore, CommandToolchain, ToolchainInfo};
use kiln_config::{Config, ToolchainSection};
use kiln_loader::{HostSurface, IsolationBoundary, SymbolPolicy, WasmModuleLoader};
use kiln_runtime::{HostConfig, WatcherConfig};

pub(crate) fn toolchain(section: &ToolchainSection) -> CommandToolchain {
    CommandToolchain::new(
        section.program.clone(),
        section.args.clone(),
        ToolchainInfo {
            name: section.name.clone(),
            version: section.version.clone(),
            target: section.target.clone(),
        },
    )
}

pub(crate) fn compiler(config: &Config) -> ArtifactCompiler {
    ArtifactCompiler::new(
        CacheStore::new(config.build_root()),
        Arc::new(toolchain(&config.build.toolchain)),
    )
    .with_namespace_prefix(config.isolation.own_namespace_prefix.clone())
}

pub(crate) fn loader(config: &Config) -> WasmModuleLoader {
    let iso = &config.isolation;
    let policy = SymbolPolicy::new(iso.denied_prefixes.iter().cloned(), &iso.own_namespace_prefix);
    WasmModuleLoader::new()
        .with_boundary(IsolationBoundary::new(policy, HostSurface::kiln_default()))
        .with_namespace_prefix(iso.own_namespace_prefix.clone())
        .with_memory_max_pages(iso.memory_max_pages)
        .with_timeout(iso.call_timeout())
}

pub(crate) fn host_config(config: &Config) -> HostConfig {
    HostConfig::new(&config.workspaces.root).with_max_parallel(config.build.max_parallel)
}

pub(crate) fn watcher_config(config: &Config, root: &Path) -> WatcherConfig {
    WatcherConfig::new(root).with_debounce(config.watch.debounce())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loader_uses_configured_policy() {
        let mut config = Config::default();
        config.isolation.denied_prefixes = vec!["wasi_snapshot_preview1".to_owned()];
        let loader = loader(&config);
        let policy = loader.boundary().policy();
        assert!(policy.is_denied("wasi_snapshot_preview1::fd_write"));
        assert!(!policy.is_denied("kiln:internal/x::y"));
    }

    #[test]
    fn compiler_caches_under_build_root() {
        let mut config = Config::default();
        config.workspaces.root = "/srv/modules".into();
        let compiler = compiler(&config);
        assert_eq!(compiler.store().root(), Path::new("/srv/modules/_build"));
    }

    #[test]
    fn host_config_carries_parallelism() {
        let mut config = Config::default();
        config.build.max_parallel = 7;
        assert_eq!(host_config(&config).max_parallel(), 7);
    }
}
