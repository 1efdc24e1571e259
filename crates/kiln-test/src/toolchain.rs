//! A scriptable in-process toolchain.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Duration;

use kiln_build::{
    BuildResult, CompileError, CompileRequest, ENTRY_FACTORY, ENTRY_UNIT, Toolchain, ToolchainInfo,
};
use kiln_workspace::ModuleId;

use crate::wasm;

/// Blocks compiles of one module until opened.
#[derive(Debug, Default)]
pub struct Gate {
    open: Mutex<bool>,
    cv: Condvar,
    entered: AtomicUsize,
}

impl Gate {
    /// Let every waiting and future compile through.
    pub fn open(&self) {
        let mut open = self.open.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        *open = true;
        self.cv.notify_all();
    }

    /// How many compiles have reached the gate.
    #[must_use]
    pub fn entered(&self) -> usize {
        self.entered.load(Ordering::SeqCst)
    }

    fn wait(&self) {
        self.entered.fetch_add(1, Ordering::SeqCst);
        let mut open = self.open.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        while !*open {
            open = self
                .cv
                .wait(open)
                .unwrap_or_else(std::sync::PoisonError::into_inner);
        }
    }
}

#[derive(Debug, Default)]
struct Script {
    invocations: Vec<ModuleId>,
    delays: HashMap<ModuleId, Duration>,
    gates: HashMap<ModuleId, Arc<Gate>>,
    failures: HashMap<ModuleId, Vec<String>>,
    skipped_outputs: HashMap<ModuleId, String>,
    entry_imports: HashMap<ModuleId, Vec<(String, String)>>,
}

/// Toolchain that writes a minimal unit per generated source.
///
/// The entry unit exports the factory. Per-module delays, gates, failures
/// and extra entry imports can be scripted; every invocation is recorded.
/// Clones share their script.
#[derive(Debug, Clone)]
pub struct FakeToolchain {
    info: ToolchainInfo,
    script: Arc<Mutex<Script>>,
}

impl Default for FakeToolchain {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeToolchain {
    /// A toolchain reporting [`wasm::test_toolchain_info`].
    #[must_use]
    pub fn new() -> Self {
        Self {
            info: wasm::test_toolchain_info(),
            script: Arc::default(),
        }
    }

    /// Report a different version; changes every cache key.
    #[must_use]
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.info.version = version.into();
        self
    }

    fn script(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Sleep for `delay` before compiling `module`.
    pub fn delay(&self, module: &str, delay: Duration) {
        self.script().delays.insert(ModuleId::from_static(module), delay);
    }

    /// Block compiles of `module` until the returned gate is opened.
    pub fn gate(&self, module: &str) -> Arc<Gate> {
        let gate = Arc::new(Gate::default());
        self.script()
            .gates
            .insert(ModuleId::from_static(module), Arc::clone(&gate));
        gate
    }

    /// Fail compiles of `module` with `diagnostics`.
    pub fn fail(&self, module: &str, diagnostics: &[&str]) {
        self.script().failures.insert(
            ModuleId::from_static(module),
            diagnostics.iter().map(|d| (*d).to_string()).collect(),
        );
    }

    /// Stop failing compiles of `module`.
    pub fn heal(&self, module: &str) {
        self.script().failures.remove(&ModuleId::from_static(module));
    }

    /// Do not write the output of `unit` when compiling `module`.
    pub fn skip_output(&self, module: &str, unit: &str) {
        self.script()
            .skipped_outputs
            .insert(ModuleId::from_static(module), unit.to_string());
    }

    /// Make `module`'s entry unit import `namespace::name`.
    pub fn import_from_entry(&self, module: &str, namespace: &str, name: &str) {
        self.script()
            .entry_imports
            .entry(ModuleId::from_static(module))
            .or_default()
            .push((namespace.to_string(), name.to_string()));
    }

    /// Total number of compiles.
    #[must_use]
    pub fn invocations(&self) -> usize {
        self.script().invocations.len()
    }

    /// Number of compiles of `module`.
    #[must_use]
    pub fn invocations_for(&self, module: &str) -> usize {
        self.script()
            .invocations
            .iter()
            .filter(|m| m.as_str() == module)
            .count()
    }

    /// Modules in the order their compiles started.
    #[must_use]
    pub fn compile_order(&self) -> Vec<String> {
        self.script()
            .invocations
            .iter()
            .map(ToString::to_string)
            .collect()
    }
}

impl Toolchain for FakeToolchain {
    fn info(&self) -> &ToolchainInfo {
        &self.info
    }

    fn compile(&self, request: &CompileRequest) -> BuildResult<()> {
        let (delay, gate, failure, skipped, imports) = {
            let mut script = self.script();
            script.invocations.push(request.module.clone());
            (
                script.delays.get(&request.module).copied(),
                script.gates.get(&request.module).cloned(),
                script.failures.get(&request.module).cloned(),
                script.skipped_outputs.get(&request.module).cloned(),
                script.entry_imports.get(&request.module).cloned().unwrap_or_default(),
            )
        };

        if let Some(gate) = gate {
            gate.wait();
        }
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }
        if let Some(diagnostics) = failure {
            return Err(CompileError::Toolchain {
                module: request.module.to_string(),
                diagnostics,
            });
        }

        for unit in &request.units {
            if skipped.as_deref() == Some(unit.name.as_str()) {
                continue;
            }
            let bytes = if unit.name == ENTRY_UNIT {
                let imports: Vec<(&str, &str)> = imports
                    .iter()
                    .map(|(ns, name)| (ns.as_str(), name.as_str()))
                    .collect();
                wasm::unit(&imports, &[ENTRY_FACTORY])
            } else {
                wasm::unit(&[], &[])
            };
            let path = request.out_dir.join(format!("{}.wasm", unit.name));
            std::fs::write(&path, bytes).map_err(|e| CompileError::Io { path, source: e })?;
        }
        Ok(())
    }
}
