use std::sync::Arc;
use std::time::Duration;

use extism::{Manifest, PluginBuilder, UserData, Wasm};
use kiln_build::ENTRY_FACTORY;
use kiln_context::ModuleContext;
use kiln_workspace::ModuleId;
use tracing::{debug, warn};

use super::host::{HostState, register_host_functions};
use super::{ON_DISABLE_EXPORT, ON_ENABLE_EXPORT};
use crate::boundary::ResolvedBundle;
use crate::error::{LoadError, LoadResult};
use crate::module::{CallbackError, ModuleHandle, ModuleInstance};

/// Name Extism gives the main module.
const MAIN_MODULE: &str = "main";

/// A bundle that passed the boundary, ready to be instantiated.
#[derive(Debug)]
pub struct WasmModuleHandle {
    module: ModuleId,
    bundle: ResolvedBundle,
    memory_max_pages: u32,
    call_timeout: Duration,
}

impl WasmModuleHandle {
    pub(crate) fn new(
        module: ModuleId,
        bundle: ResolvedBundle,
        memory_max_pages: u32,
        call_timeout: Duration,
    ) -> Self {
        Self {
            module,
            bundle,
            memory_max_pages,
            call_timeout,
        }
    }

    /// The resolved bundle.
    #[must_use]
    pub fn bundle(&self) -> &ResolvedBundle {
        &self.bundle
    }

    fn manifest(&self) -> Manifest {
        let entry = self.bundle.entry;
        let mut wasm: Vec<Wasm> = self
            .bundle
            .units
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != entry)
            .map(|(_, u)| Wasm::data(u.bytes.clone()).with_name(u.link_name.clone()))
            .collect();
        wasm.push(Wasm::data(self.bundle.entry_unit().bytes.clone()).with_name(MAIN_MODULE));

        Manifest::new(wasm)
            .with_timeout(self.call_timeout)
            .with_memory_max(self.memory_max_pages)
    }
}

impl ModuleHandle for WasmModuleHandle {
    fn module(&self) -> &ModuleId {
        &self.module
    }

    fn instantiate(&mut self, ctx: Arc<ModuleContext>) -> LoadResult<Box<dyn ModuleInstance>> {
        let user_data = UserData::new(HostState { ctx });
        let builder = PluginBuilder::new(self.manifest()).with_wasi(true);
        let mut plugin = register_host_functions(builder, user_data)
            .build()
            .map_err(|e| LoadError::Instantiate(e.to_string()))?;

        plugin
            .call::<&str, String>(ENTRY_FACTORY, "")
            .map_err(|e| LoadError::FactoryFailed(e.to_string()))?;

        let has_enable = plugin.function_exists(ON_ENABLE_EXPORT);
        let has_disable = plugin.function_exists(ON_DISABLE_EXPORT);
        debug!(
            module_id = %self.module,
            has_enable,
            has_disable,
            "Module instantiated"
        );

        Ok(Box::new(WasmModuleInstance {
            module: self.module.clone(),
            plugin,
            has_enable,
            has_disable,
        }))
    }

    fn release(self: Box<Self>) {
        debug!(module_id = %self.module, units = self.bundle.units.len(), "Released module artifact");
    }
}

/// A live Extism plugin for one module.
pub struct WasmModuleInstance {
    module: ModuleId,
    plugin: extism::Plugin,
    has_enable: bool,
    has_disable: bool,
}

impl std::fmt::Debug for WasmModuleInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WasmModuleInstance")
            .field("module", &self.module)
            .field("has_enable", &self.has_enable)
            .field("has_disable", &self.has_disable)
            .finish_non_exhaustive()
    }
}

impl WasmModuleInstance {
    fn run(&mut self, callback: &str, export: &str) -> Result<(), CallbackError> {
        self.plugin
            .call::<&str, String>(export, "")
            .map(|_| ())
            .map_err(|e| {
                warn!(module_id = %self.module, callback, error = %e, "Module callback failed");
                CallbackError::new(callback, e.to_string())
            })
    }
}

impl ModuleInstance for WasmModuleInstance {
    fn enable(&mut self) -> Result<(), CallbackError> {
        if !self.has_enable {
            return Ok(());
        }
        self.run("enable", ON_ENABLE_EXPORT)
    }

    fn disable(&mut self) -> Result<(), CallbackError> {
        if !self.has_disable {
            return Ok(());
        }
        self.run("disable", ON_DISABLE_EXPORT)
    }
}
