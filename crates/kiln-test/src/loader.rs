//! A loader that runs the real isolation boundary but fakes execution.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use kiln_build::{Artifact, Bundle, DEFAULT_NAMESPACE_PREFIX};
use kiln_context::ModuleContext;
use kiln_loader::{
    CallbackError, IsolationBoundary, LoadError, LoadResult, ModuleHandle, ModuleInstance,
    ModuleLoader,
};
use kiln_workspace::{ModuleId, Workspace};

/// Topic fake instances subscribe to when acquiring resources.
pub const FAKE_TOPIC: &str = "fake.tick";

/// Misbehaviour a fake instance can be scripted with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FakeLeak {
    /// Subscribe again shortly after being disabled.
    LateSubscription,
    /// Run a task that blocks its worker thread for the given time.
    BlockingTask(Duration),
}

#[derive(Debug, Default)]
struct LoaderScript {
    events: Vec<String>,
    factory_failures: HashSet<ModuleId>,
    enable_failures: HashSet<ModuleId>,
    disable_failures: HashSet<ModuleId>,
    enable_panics: HashSet<ModuleId>,
    acquiring: HashSet<ModuleId>,
    leaks: HashMap<ModuleId, FakeLeak>,
}

/// Records `load:`, `instantiate:`, `enable:`, `disable:` and `release:`
/// events per module. Clones share their script and log.
#[derive(Debug, Clone)]
pub struct FakeLoader {
    boundary: IsolationBoundary,
    script: Arc<Mutex<LoaderScript>>,
}

impl Default for FakeLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn lock(script: &Mutex<LoaderScript>) -> MutexGuard<'_, LoaderScript> {
    script.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

impl FakeLoader {
    /// A loader using the default boundary.
    #[must_use]
    pub fn new() -> Self {
        Self {
            boundary: IsolationBoundary::default(),
            script: Arc::default(),
        }
    }

    /// Make the factory of `module` fail.
    pub fn fail_factory(&self, module: &str) {
        lock(&self.script).factory_failures.insert(ModuleId::from_static(module));
    }

    /// Make the enable callback of `module` fail.
    pub fn fail_enable(&self, module: &str) {
        lock(&self.script).enable_failures.insert(ModuleId::from_static(module));
    }

    /// Let the enable callback of `module` succeed again.
    pub fn heal_enable(&self, module: &str) {
        lock(&self.script).enable_failures.remove(&ModuleId::from_static(module));
    }

    /// Make the disable callback of `module` fail.
    pub fn fail_disable(&self, module: &str) {
        lock(&self.script).disable_failures.insert(ModuleId::from_static(module));
    }

    /// Make the enable callback of `module` panic.
    pub fn panic_on_enable(&self, module: &str) {
        lock(&self.script).enable_panics.insert(ModuleId::from_static(module));
    }

    /// Have `module` subscribe to [`FAKE_TOPIC`], register its declared
    /// commands and spawn an idle task when enabled.
    pub fn acquire_on_enable(&self, module: &str) {
        lock(&self.script).acquiring.insert(ModuleId::from_static(module));
    }

    /// Script a leak for `module`.
    pub fn leak(&self, module: &str, leak: FakeLeak) {
        lock(&self.script).leaks.insert(ModuleId::from_static(module), leak);
    }

    /// Every recorded event.
    #[must_use]
    pub fn events(&self) -> Vec<String> {
        lock(&self.script).events.clone()
    }

    /// Modules in the order a callback of `kind` ran for them.
    #[must_use]
    pub fn events_of(&self, kind: &str) -> Vec<String> {
        let prefix = format!("{kind}:");
        lock(&self.script)
            .events
            .iter()
            .filter_map(|e| e.strip_prefix(&prefix).map(str::to_string))
            .collect()
    }

    /// Number of `kind` events for `module`.
    #[must_use]
    pub fn count(&self, kind: &str, module: &str) -> usize {
        self.events_of(kind).iter().filter(|m| *m == module).count()
    }

    /// Forget recorded events.
    pub fn clear_events(&self) {
        lock(&self.script).events.clear();
    }

    fn record(&self, kind: &str, module: &ModuleId) {
        lock(&self.script).events.push(format!("{kind}:{module}"));
    }
}

impl ModuleLoader for FakeLoader {
    fn load(&self, workspace: &Workspace, artifact: &Artifact) -> LoadResult<Box<dyn ModuleHandle>> {
        let bundle = Bundle::read(&artifact.path).map_err(|e| LoadError::Artifact {
            path: artifact.path.clone(),
            message: e.to_string(),
        })?;
        let expected = format!("{DEFAULT_NAMESPACE_PREFIX}{}/", workspace.id().package_part());
        self.boundary.check(bundle, &expected)?;
        self.record("load", workspace.id());
        Ok(Box::new(FakeHandle {
            module: workspace.id().clone(),
            loader: self.clone(),
        }))
    }
}

struct FakeHandle {
    module: ModuleId,
    loader: FakeLoader,
}

impl ModuleHandle for FakeHandle {
    fn module(&self) -> &ModuleId {
        &self.module
    }

    fn instantiate(&mut self, ctx: Arc<ModuleContext>) -> LoadResult<Box<dyn ModuleInstance>> {
        self.loader.record("instantiate", &self.module);
        if lock(&self.loader.script).factory_failures.contains(&self.module) {
            return Err(LoadError::FactoryFailed(format!("{} refused to start", self.module)));
        }
        Ok(Box::new(FakeInstance {
            module: self.module.clone(),
            ctx,
            loader: self.loader.clone(),
        }))
    }

    fn release(self: Box<Self>) {
        self.loader.record("release", &self.module);
    }
}

struct FakeInstance {
    module: ModuleId,
    ctx: Arc<ModuleContext>,
    loader: FakeLoader,
}

impl ModuleInstance for FakeInstance {
    fn enable(&mut self) -> Result<(), CallbackError> {
        self.loader.record("enable", &self.module);
        let (panics, fails, acquires, leak) = {
            let script = lock(&self.loader.script);
            (
                script.enable_panics.contains(&self.module),
                script.enable_failures.contains(&self.module),
                script.acquiring.contains(&self.module),
                script.leaks.get(&self.module).copied(),
            )
        };

        if acquires {
            let err = |e: kiln_context::ContextError| CallbackError::new("enable", e.to_string());
            self.ctx.subscribe(FAKE_TOPIC).map_err(err)?;
            for command in self.ctx.manifest().commands.clone() {
                self.ctx.register_command(&command, None).map_err(err)?;
            }
            self.ctx.spawn(std::future::pending::<()>()).map_err(err)?;
        }
        if let Some(FakeLeak::BlockingTask(duration)) = leak {
            self.ctx
                .spawn(async move { std::thread::sleep(duration) })
                .map_err(|e| CallbackError::new("enable", e.to_string()))?;
        }
        if panics {
            panic!("{} panicked while enabling", self.module);
        }
        if fails {
            return Err(CallbackError::new("enable", format!("{} failed to enable", self.module)));
        }
        Ok(())
    }

    fn disable(&mut self) -> Result<(), CallbackError> {
        self.loader.record("disable", &self.module);
        let (fails, leak) = {
            let script = lock(&self.loader.script);
            (
                script.disable_failures.contains(&self.module),
                script.leaks.get(&self.module).copied(),
            )
        };
        if leak == Some(FakeLeak::LateSubscription) {
            let ctx = Arc::clone(&self.ctx);
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(50));
                let _ = ctx.subscribe(FAKE_TOPIC);
            });
        }
        if fails {
            return Err(CallbackError::new("disable", format!("{} failed to disable", self.module)));
        }
        Ok(())
    }
}
