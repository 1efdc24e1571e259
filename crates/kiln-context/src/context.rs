//! The context object a live module is constructed with.

use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use kiln_workspace::{Manifest, ModuleId, Workspace};
use tokio::runtime::Handle;
use tracing::{debug, warn};

use crate::commands::{CommandRegistry, normalize_command};
use crate::error::{ContextError, ContextResult};
use crate::events::{EventHub, SubscriptionId};
use crate::logger::ModuleLogger;
use crate::resources::{LeakedResource, ResourceId, ResourceKind, ResourceRegistry, TrackedResource};
use crate::storage::{DATA_FILE_NAME, ModuleStorage};
use crate::lock;

/// Host-wide services shared by every module context.
#[derive(Debug, Clone)]
pub struct HostServices {
    commands: Arc<CommandRegistry>,
    events: Arc<EventHub>,
    runtime: Handle,
}

impl HostServices {
    /// Create fresh registries; module tasks are spawned on `runtime`.
    #[must_use]
    pub fn new(runtime: Handle) -> Self {
        Self {
            commands: Arc::new(CommandRegistry::new()),
            events: Arc::new(EventHub::new()),
            runtime,
        }
    }

    /// Shared command registry.
    #[must_use]
    pub fn commands(&self) -> &Arc<CommandRegistry> {
        &self.commands
    }

    /// Shared event hub.
    #[must_use]
    pub fn events(&self) -> &Arc<EventHub> {
        &self.events
    }

    /// Build the context for one activation of `workspace`.
    ///
    /// # Errors
    ///
    /// Returns [`ContextError::Storage`] if the module's storage file is
    /// unreadable.
    pub fn create_context(&self, workspace: &Workspace) -> ContextResult<Arc<ModuleContext>> {
        let manifest = workspace.manifest().clone();
        let storage = ModuleStorage::open(workspace.root().join(DATA_FILE_NAME))?;
        let allowed_commands = manifest
            .commands
            .iter()
            .map(|c| normalize_command(c))
            .collect();
        Ok(Arc::new(ModuleContext {
            logger: ModuleLogger::new(manifest.id.clone(), manifest.debug),
            resources: ResourceRegistry::new(manifest.id.as_str()),
            root: workspace.root().to_path_buf(),
            commands: Arc::clone(&self.commands),
            events: Arc::clone(&self.events),
            runtime: self.runtime.clone(),
            storage,
            allowed_commands,
            handles: Mutex::new(Handles::default()),
            manifest,
        }))
    }
}

/// What teardown released.
#[derive(Debug, Default)]
pub struct TeardownReport {
    /// Event subscriptions removed.
    pub subscriptions: usize,
    /// Tasks aborted.
    pub tasks: usize,
    /// Commands unregistered.
    pub commands: usize,
    /// Whether storage had pending writes that were persisted.
    pub storage_flushed: bool,
    /// Storage flush failure, if any.
    pub storage_error: Option<ContextError>,
}

#[derive(Debug, Default)]
struct Handles {
    subscriptions: BTreeMap<SubscriptionId, ResourceId>,
    commands: BTreeMap<String, ResourceId>,
}

/// Per-activation services for one module.
///
/// Shared between the host and the module instance; everything acquired
/// through it is tracked and given back by [`close`](Self::close).
#[derive(Debug)]
pub struct ModuleContext {
    manifest: Manifest,
    root: PathBuf,
    logger: ModuleLogger,
    resources: ResourceRegistry,
    commands: Arc<CommandRegistry>,
    events: Arc<EventHub>,
    runtime: Handle,
    storage: ModuleStorage,
    allowed_commands: BTreeSet<String>,
    handles: Mutex<Handles>,
}

impl ModuleContext {
    /// Module id.
    #[must_use]
    pub fn id(&self) -> &ModuleId {
        &self.manifest.id
    }

    /// Manifest this context was built from.
    #[must_use]
    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    /// Workspace directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Module configuration (non-reserved manifest keys).
    #[must_use]
    pub fn config(&self) -> &toml::Table {
        &self.manifest.config
    }

    /// Look up a configuration value by dotted path, e.g. `prices.apple`.
    #[must_use]
    pub fn config_value(&self, path: &str) -> Option<&toml::Value> {
        let mut parts = path.split('.');
        let mut value = self.manifest.config.get(parts.next()?)?;
        for part in parts {
            value = value.as_table()?.get(part)?;
        }
        Some(value)
    }

    /// Module logger.
    #[must_use]
    pub fn logger(&self) -> &ModuleLogger {
        &self.logger
    }

    /// Module storage.
    #[must_use]
    pub fn storage(&self) -> &ModuleStorage {
        &self.storage
    }

    /// Resource registry, for inspection.
    #[must_use]
    pub fn resources(&self) -> &ResourceRegistry {
        &self.resources
    }

    /// Whether teardown has run.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.resources.is_closed()
    }

    /// Register a command declared in the manifest, optionally guarded by a
    /// declared permission. Returns the normalized name.
    ///
    /// # Errors
    ///
    /// Fails if the command or permission is undeclared, the name belongs
    /// to another module, or the context is closed.
    pub fn register_command(&self, name: &str, permission: Option<&str>) -> ContextResult<String> {
        let normalized = normalize_command(name);
        if !self.allowed_commands.contains(&normalized) {
            return Err(ContextError::UndeclaredCommand {
                module: self.id().to_string(),
                command: normalized,
            });
        }
        if let Some(permission) = permission
            && !self.manifest.permissions.iter().any(|p| p == permission)
        {
            return Err(ContextError::UndeclaredPermission {
                module: self.id().to_string(),
                permission: permission.to_string(),
            });
        }

        if lock(&self.handles).commands.contains_key(&normalized) {
            self.commands.register(self.id(), &normalized, permission)?;
            return Ok(normalized);
        }

        let normalized = self.commands.register(self.id(), &normalized, permission)?;
        match self
            .resources
            .register(TrackedResource::Command(normalized.clone()))
        {
            Ok(rid) => {
                lock(&self.handles).commands.insert(normalized.clone(), rid);
                Ok(normalized)
            },
            Err(e) => {
                self.commands.unregister(&normalized);
                Err(e)
            },
        }
    }

    /// Unregister one of this module's commands.
    pub fn unregister_command(&self, name: &str) -> bool {
        let normalized = normalize_command(name);
        let Some(rid) = lock(&self.handles).commands.remove(&normalized) else {
            return false;
        };
        self.resources.untrack(rid);
        self.commands.unregister(&normalized).is_some()
    }

    /// Subscribe to an event topic.
    ///
    /// # Errors
    ///
    /// Fails for a blank topic or a closed context.
    pub fn subscribe(&self, topic: &str) -> ContextResult<SubscriptionId> {
        let sub = self.events.subscribe(self.id(), topic)?;
        match self.resources.register(TrackedResource::Subscription(sub)) {
            Ok(rid) => {
                lock(&self.handles).subscriptions.insert(sub, rid);
                Ok(sub)
            },
            Err(e) => {
                self.events.unsubscribe(sub);
                Err(e)
            },
        }
    }

    /// Drop one of this module's subscriptions.
    pub fn unsubscribe(&self, sub: SubscriptionId) -> bool {
        let Some(rid) = lock(&self.handles).subscriptions.remove(&sub) else {
            return false;
        };
        self.resources.untrack(rid);
        self.events.unsubscribe(sub)
    }

    /// Spawn background work owned by this module.
    ///
    /// # Errors
    ///
    /// Returns [`ContextError::Closed`] after teardown; the task is aborted.
    pub fn spawn<F>(&self, future: F) -> ContextResult<ResourceId>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = self.runtime.spawn(future);
        self.resources.register(TrackedResource::Task(handle))
    }

    /// Release everything the module holds: subscriptions, tasks, commands,
    /// then flush storage. Safe to call more than once.
    pub fn close(&self) -> TeardownReport {
        let mut report = TeardownReport {
            tasks: self.resources.count(ResourceKind::Task),
            ..TeardownReport::default()
        };
        if self.resources.is_closed() {
            report.tasks = 0;
            return report;
        }

        for resource in self.resources.release_all() {
            match resource {
                TrackedResource::Subscription(sub) => {
                    if self.events.unsubscribe(sub) {
                        report.subscriptions = report.subscriptions.saturating_add(1);
                    }
                },
                TrackedResource::Command(name) => {
                    if self.commands.unregister(&name).is_some() {
                        report.commands = report.commands.saturating_add(1);
                    }
                },
                TrackedResource::Task(handle) => handle.abort(),
            }
        }
        {
            let mut handles = lock(&self.handles);
            handles.subscriptions.clear();
            handles.commands.clear();
        }

        match self.storage.flush() {
            Ok(flushed) => report.storage_flushed = flushed,
            Err(e) => {
                warn!(module_id = %self.id(), error = %e, "Failed to flush module storage");
                report.storage_error = Some(e);
            },
        }

        debug!(
            module_id = %self.id(),
            subscriptions = report.subscriptions,
            tasks = report.tasks,
            commands = report.commands,
            "Closed module context"
        );
        report
    }

    /// Resources still alive, or acquired, after [`close`](Self::close).
    #[must_use]
    pub fn leaks(&self) -> Vec<LeakedResource> {
        self.resources.leaks()
    }
}
