//! The public handle to the activation authority.

use std::sync::{Arc, Mutex};

use kiln_build::ArtifactCompiler;
use kiln_context::HostServices;
use kiln_loader::ModuleLoader;
use kiln_workspace::ModuleId;
use tokio::sync::{mpsc, oneshot, watch};

use crate::activation::Activator;
use crate::authority::{Authority, Command};
use crate::config::HostConfig;
use crate::error::{ModuleError, ResourceLeakWarning, RuntimeError, RuntimeResult};

/// Message given to a single reload that a newer reload superseded.
pub const CANCELLED_MESSAGE: &str = "cancelled: superseded by a newer reload";

/// Receives the result of a single-module reload. Runs on the activation
/// authority, so it must return quickly.
pub type ReloadCallback = Box<dyn FnOnce(ReloadOutcome) + Send + 'static>;

/// Result reported to a single-reload callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReloadOutcome {
    /// Whether the module ended up in the requested state.
    pub success: bool,
    /// Human-readable detail.
    pub message: String,
}

impl ReloadOutcome {
    /// A successful outcome.
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    /// A failed outcome.
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }

    /// The outcome of a superseded reload.
    #[must_use]
    pub fn cancelled() -> Self {
        Self::failed(CANCELLED_MESSAGE)
    }

    /// Whether this reload was superseded.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        !self.success && self.message == CANCELLED_MESSAGE
    }
}

/// What a full reload did before returning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReloadSummary {
    /// Generation stamped on this cycle.
    pub generation: u64,
    /// Modules deactivated.
    pub disabled: usize,
    /// Compile jobs submitted.
    pub queued: usize,
}

/// A per-workspace failure from the latest cycle.
#[derive(Debug, Clone)]
pub struct ModuleFailure {
    /// Module id, or the workspace path when no id is known.
    pub subject: String,
    /// What went wrong.
    pub error: Arc<ModuleError>,
}

/// Point-in-time view of the authority's state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostSnapshot {
    /// Current generation.
    pub generation: u64,
    /// Active modules in activation order.
    pub active: Vec<ModuleId>,
    /// Compiled modules waiting for dependencies.
    pub pending: Vec<ModuleId>,
    /// Compile jobs not yet returned.
    pub in_flight: usize,
}

/// Cloneable handle to a running module host.
///
/// All state lives in a single authority task; the handle only sends it
/// messages. The task stops after [`shutdown`](Self::shutdown) or once every
/// handle is dropped, deactivating whatever is still active.
#[derive(Clone)]
pub struct ModuleHost {
    tx: mpsc::UnboundedSender<Command>,
    generation: watch::Receiver<u64>,
    leaks: Arc<Mutex<Vec<ResourceLeakWarning>>>,
}

impl std::fmt::Debug for ModuleHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleHost")
            .field("generation", &*self.generation.borrow())
            .field("closed", &self.tx.is_closed())
            .finish_non_exhaustive()
    }
}

impl ModuleHost {
    /// Spawn the authority task on the current Tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    #[must_use]
    pub fn start(
        config: HostConfig,
        compiler: Arc<ArtifactCompiler>,
        loader: Arc<dyn ModuleLoader>,
        services: HostServices,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (generation_tx, generation) = watch::channel(0);
        let leaks = Arc::new(Mutex::new(Vec::new()));

        let activator = Activator::new(
            loader,
            services,
            config.leak_scan_delay(),
            Arc::clone(&leaks),
        );
        let authority = Authority::new(&config, compiler, activator, tx.downgrade(), generation_tx);
        tokio::spawn(authority.run(rx));

        Self {
            tx,
            generation,
            leaks,
        }
    }

    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> RuntimeResult<T> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(make(reply)).map_err(|_| RuntimeError::Shutdown)?;
        rx.await.map_err(|_| RuntimeError::Shutdown)
    }

    /// Deactivate everything, rediscover, and queue a compile for every
    /// resolvable workspace under a new generation. Returns once the jobs
    /// are queued; activation happens as they complete.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::Shutdown`] if the host has stopped.
    pub async fn reload_all(&self) -> RuntimeResult<ReloadSummary> {
        self.request(|reply| Command::ReloadAll { reply }).await
    }

    /// Reload one module without blocking; `callback` receives the result.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::Shutdown`] if the host has stopped; the
    /// callback is then invoked with a failure before returning.
    pub fn reload_one<F>(&self, id: ModuleId, callback: F) -> RuntimeResult<()>
    where
        F: FnOnce(ReloadOutcome) + Send + 'static,
    {
        let command = Command::ReloadOne {
            id,
            callback: Box::new(callback),
        };
        match self.tx.send(command) {
            Ok(()) => Ok(()),
            Err(mpsc::error::SendError(Command::ReloadOne { callback, .. })) => {
                callback(ReloadOutcome::failed(RuntimeError::Shutdown.to_string()));
                Err(RuntimeError::Shutdown)
            },
            Err(_) => Err(RuntimeError::Shutdown),
        }
    }

    /// [`reload_one`](Self::reload_one), awaiting the outcome.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::Shutdown`] if the host has stopped.
    pub async fn reload_one_and_wait(&self, id: ModuleId) -> RuntimeResult<ReloadOutcome> {
        let (tx, rx) = oneshot::channel();
        self.reload_one(id, move |outcome| {
            let _ = tx.send(outcome);
        })?;
        rx.await.map_err(|_| RuntimeError::Shutdown)
    }

    /// Current authority state.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::Shutdown`] if the host has stopped.
    pub async fn snapshot(&self) -> RuntimeResult<HostSnapshot> {
        self.request(|reply| Command::Snapshot { reply }).await
    }

    /// Active modules in activation order.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::Shutdown`] if the host has stopped.
    pub async fn active_modules(&self) -> RuntimeResult<Vec<ModuleId>> {
        Ok(self.snapshot().await?.active)
    }

    /// Failures recorded since the last full reload began.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::Shutdown`] if the host has stopped.
    pub async fn last_failures(&self) -> RuntimeResult<Vec<ModuleFailure>> {
        self.request(|reply| Command::Failures { reply }).await
    }

    /// Wait until no compile job is outstanding.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::Shutdown`] if the host has stopped.
    pub async fn settle(&self) -> RuntimeResult<()> {
        self.request(|reply| Command::Settle { reply }).await
    }

    /// Deactivate every module in reverse activation order and stop.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::Shutdown`] if the host had already stopped.
    pub async fn shutdown(&self) -> RuntimeResult<()> {
        self.request(|reply| Command::Shutdown { reply }).await
    }

    /// Latest generation published by the authority.
    #[must_use]
    pub fn generation(&self) -> u64 {
        *self.generation.borrow()
    }

    /// Leak warnings raised by post-teardown scans so far.
    #[must_use]
    pub fn leak_warnings(&self) -> Vec<ResourceLeakWarning> {
        self.leaks
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }
}
