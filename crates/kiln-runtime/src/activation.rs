//! Activation and teardown of a single module.

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use kiln_build::Artifact;
use kiln_context::{HostServices, ModuleContext};
use kiln_loader::{ModuleHandle, ModuleInstance, ModuleLoader};
use kiln_workspace::{ModuleId, Workspace};
use tracing::{info, warn};

use crate::error::{LifecycleError, ModuleError, ResourceLeakWarning};

/// A module that is live: loaded, instantiated and enabled.
pub(crate) struct LoadedModule {
    workspace: Workspace,
    handle: Box<dyn ModuleHandle>,
    instance: Box<dyn ModuleInstance>,
    ctx: Arc<ModuleContext>,
}

impl LoadedModule {
    pub(crate) fn id(&self) -> &ModuleId {
        self.workspace.id()
    }
}

/// Runs the activation and deactivation steps against a loader.
pub(crate) struct Activator {
    loader: Arc<dyn ModuleLoader>,
    services: HostServices,
    leak_scan_delay: Duration,
    leak_log: Arc<Mutex<Vec<ResourceLeakWarning>>>,
}

impl Activator {
    pub(crate) fn new(
        loader: Arc<dyn ModuleLoader>,
        services: HostServices,
        leak_scan_delay: Duration,
        leak_log: Arc<Mutex<Vec<ResourceLeakWarning>>>,
    ) -> Self {
        Self {
            loader,
            services,
            leak_scan_delay,
            leak_log,
        }
    }

    /// Load, build the context, run the factory, then enable. Any failure
    /// tears down what was built so far.
    pub(crate) fn activate(
        &self,
        workspace: Workspace,
        artifact: &Artifact,
    ) -> Result<LoadedModule, ModuleError> {
        let id = workspace.id().clone();
        let mut handle = self.loader.load(&workspace, artifact)?;

        let ctx = match self.services.create_context(&workspace) {
            Ok(ctx) => ctx,
            Err(source) => {
                handle.release();
                return Err(LifecycleError::Context { module: id, source }.into());
            },
        };

        let instantiated = guarded(&id, "instantiate", || handle.instantiate(Arc::clone(&ctx)));
        let mut instance = match instantiated {
            Ok(Ok(instance)) => instance,
            Ok(Err(e)) => {
                self.abandon(ctx, handle);
                return Err(e.into());
            },
            Err(e) => {
                self.abandon(ctx, handle);
                return Err(e.into());
            },
        };

        let error = match guarded(&id, "enable", || instance.enable()) {
            Ok(Ok(())) => None,
            Ok(Err(source)) => Some(LifecycleError::Callback {
                module: id.clone(),
                source,
            }),
            Err(e) => Some(e),
        };
        if let Some(e) = error {
            drop(instance);
            self.abandon(ctx, handle);
            return Err(e.into());
        }

        info!(module_id = %id, cache_key = %artifact.key, "Module enabled");
        Ok(LoadedModule {
            workspace,
            handle,
            instance,
            ctx,
        })
    }

    /// Disable, then release every tracked resource and the handle whatever
    /// the callback did.
    pub(crate) fn deactivate(&self, module: LoadedModule) {
        let LoadedModule {
            workspace,
            handle,
            mut instance,
            ctx,
        } = module;
        let id = workspace.id();

        let failure = match guarded(id, "disable", || instance.disable()) {
            Ok(Ok(())) => None,
            Ok(Err(source)) => Some(LifecycleError::Callback {
                module: id.clone(),
                source,
            }),
            Err(e) => Some(e),
        };
        if let Some(e) = failure {
            warn!(module_id = %id, error = %e, "Disable callback failed, tearing down anyway");
        }
        drop(instance);

        let report = ctx.close();
        handle.release();
        info!(
            module_id = %id,
            subscriptions = report.subscriptions,
            tasks = report.tasks,
            commands = report.commands,
            storage_flushed = report.storage_flushed,
            "Module disabled"
        );
        self.scan_for_leaks(ctx);
    }

    fn abandon(&self, ctx: Arc<ModuleContext>, handle: Box<dyn ModuleHandle>) {
        ctx.close();
        handle.release();
        self.scan_for_leaks(ctx);
    }

    /// Check the context again once in-flight work had time to stop.
    fn scan_for_leaks(&self, ctx: Arc<ModuleContext>) {
        let delay = self.leak_scan_delay;
        let log = Arc::clone(&self.leak_log);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let leaks = ctx.leaks();
            if leaks.is_empty() {
                return;
            }
            let warning = ResourceLeakWarning {
                module: ctx.id().clone(),
                leaks,
            };
            warn!(module_id = %warning.module, "{warning}");
            log.lock()
                .unwrap_or_else(|e| {
                    warn!("leak log lock poisoned, recovering");
                    e.into_inner()
                })
                .push(warning);
        });
    }
}

fn guarded<T>(
    module: &ModuleId,
    callback: &'static str,
    f: impl FnOnce() -> T,
) -> Result<T, LifecycleError> {
    catch_unwind(AssertUnwindSafe(f)).map_err(|payload| LifecycleError::Panicked {
        module: module.clone(),
        callback,
        message: panic_message(payload.as_ref()),
    })
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
