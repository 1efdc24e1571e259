//! The activation authority.
//!
//! One task owns the active-module table, the pending activations and the
//! generation counter; everything else talks to it through [`Command`]s.
//! Compile jobs run on blocking workers and report back as
//! [`Command::Compiled`], stamped with the generation and the per-module
//! ticket they were submitted under. A result is applied only if both are
//! still current, so a newer full reload or a newer single reload of the
//! same module silently supersedes it.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::PathBuf;
use std::sync::Arc;

use kiln_build::{Artifact, ArtifactCompiler, BuildResult, CompileError};
use kiln_workspace::{LoadMode, ModuleId, Workspace, discover};
use tokio::sync::{Semaphore, mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use crate::activation::{Activator, LoadedModule, panic_message};
use crate::config::HostConfig;
use crate::error::{DependencyError, ModuleError, RuntimeError};
use crate::host::{HostSnapshot, ModuleFailure, ReloadCallback, ReloadOutcome, ReloadSummary};
use crate::resolver::resolve;

// ── Messages ─────────────────────────────────────────────────

pub(crate) enum Command {
    ReloadAll {
        reply: oneshot::Sender<ReloadSummary>,
    },
    ReloadOne {
        id: ModuleId,
        callback: ReloadCallback,
    },
    Compiled(CompiledJob),
    Snapshot {
        reply: oneshot::Sender<HostSnapshot>,
    },
    Failures {
        reply: oneshot::Sender<Vec<ModuleFailure>>,
    },
    Settle {
        reply: oneshot::Sender<()>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

pub(crate) struct CompiledJob {
    generation: u64,
    ticket: u64,
    workspace: Workspace,
    result: BuildResult<Artifact>,
}

/// Compiled, waiting for dependencies to become active.
struct PendingActivation {
    workspace: Workspace,
    artifact: Artifact,
    generation: u64,
    ticket: u64,
}

// ── State ────────────────────────────────────────────────────

pub(crate) struct Authority {
    root: PathBuf,
    compiler: Arc<ArtifactCompiler>,
    activator: Activator,
    semaphore: Arc<Semaphore>,
    commands: mpsc::WeakUnboundedSender<Command>,
    generation: u64,
    generation_tx: watch::Sender<u64>,
    active: Vec<LoadedModule>,
    pending: Vec<PendingActivation>,
    /// Latest ticket issued per module; older jobs are stale.
    tickets: HashMap<ModuleId, u64>,
    next_ticket: u64,
    callbacks: HashMap<u64, ReloadCallback>,
    in_flight: usize,
    settle_waiters: Vec<oneshot::Sender<()>>,
    failures: Vec<ModuleFailure>,
}

impl Authority {
    pub(crate) fn new(
        config: &HostConfig,
        compiler: Arc<ArtifactCompiler>,
        activator: Activator,
        commands: mpsc::WeakUnboundedSender<Command>,
        generation_tx: watch::Sender<u64>,
    ) -> Self {
        Self {
            root: config.workspaces_root().to_path_buf(),
            compiler,
            activator,
            semaphore: Arc::new(Semaphore::new(config.max_parallel())),
            commands,
            generation: 0,
            generation_tx,
            active: Vec::new(),
            pending: Vec::new(),
            tickets: HashMap::new(),
            next_ticket: 0,
            callbacks: HashMap::new(),
            in_flight: 0,
            settle_waiters: Vec::new(),
            failures: Vec::new(),
        }
    }

    pub(crate) async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Command>) {
        while let Some(command) = rx.recv().await {
            match command {
                Command::ReloadAll { reply } => {
                    let summary = self.reload_all();
                    let _ = reply.send(summary);
                },
                Command::ReloadOne { id, callback } => self.reload_one(id, callback),
                Command::Compiled(job) => self.on_compiled(job),
                Command::Snapshot { reply } => {
                    let _ = reply.send(self.snapshot());
                },
                Command::Failures { reply } => {
                    let _ = reply.send(self.failures.clone());
                },
                Command::Settle { reply } => {
                    self.settle_waiters.push(reply);
                    self.notify_settled();
                },
                Command::Shutdown { reply } => {
                    self.shutdown();
                    let _ = reply.send(());
                    return;
                },
            }
        }
        debug!("All host handles dropped");
        self.shutdown();
    }

    // ── Full reload ──────────────────────────────────────────

    fn reload_all(&mut self) -> ReloadSummary {
        self.bump_generation();
        let generation = self.generation;
        info!(generation, "Full reload requested");

        let disabled = self.deactivate_all();
        self.cancel_all_pending();
        self.tickets.clear();
        self.failures.clear();

        let discovery = match discover(&self.root) {
            Ok(discovery) => discovery,
            Err(e) => {
                warn!(root = %self.root.display(), error = %e, "Workspace discovery failed");
                self.record_failure(self.root.display().to_string(), e.into());
                return ReloadSummary {
                    generation,
                    disabled,
                    queued: 0,
                };
            },
        };

        for rejected in discovery.rejected {
            self.record_failure(rejected.path.display().to_string(), rejected.error.into());
        }

        let resolution = resolve(discovery.workspaces.iter().map(Workspace::manifest));
        for missing in resolution.missing {
            warn!(module_id = %missing.id, "Excluded for missing dependencies");
            self.record_failure(
                missing.id.to_string(),
                DependencyError::Missing {
                    id: missing.id,
                    missing: missing.missing,
                }
                .into(),
            );
        }
        for blocked in resolution.blocked {
            warn!(module_id = %blocked.id, "Excluded behind an excluded dependency");
            self.record_failure(
                blocked.id.to_string(),
                DependencyError::Blocked {
                    id: blocked.id,
                    excluded: blocked.excluded,
                }
                .into(),
            );
        }
        for id in &resolution.cyclic {
            warn!(module_id = %id, "Excluded as part of a dependency cycle");
            self.record_failure(
                id.to_string(),
                DependencyError::Cycle {
                    ids: resolution.cyclic.clone(),
                }
                .into(),
            );
        }

        let mut by_id: HashMap<ModuleId, Workspace> = discovery
            .workspaces
            .into_iter()
            .map(|ws| (ws.id().clone(), ws))
            .collect();
        let mut queued = 0usize;
        for id in &resolution.order {
            if let Some(ws) = by_id.remove(id)
                && self.submit(ws).is_some()
            {
                queued = queued.saturating_add(1);
            }
        }

        info!(generation, disabled, queued, "Full reload queued");
        ReloadSummary {
            generation,
            disabled,
            queued,
        }
    }

    // ── Single reload ────────────────────────────────────────

    fn reload_one(&mut self, id: ModuleId, callback: ReloadCallback) {
        let discovery = match discover(&self.root) {
            Ok(discovery) => discovery,
            Err(e) => {
                respond(callback, ReloadOutcome::failed(e.to_string()));
                return;
            },
        };
        let Some(workspace) = discovery.get(&id).cloned() else {
            respond(callback, ReloadOutcome::failed(format!("no workspace declares module {id}")));
            return;
        };
        info!(module_id = %id, generation = self.generation, "Single reload requested");

        if workspace.manifest().load == LoadMode::Disable {
            self.cancel_pending(&id);
            self.tickets.remove(&id);
            let message = if self.deactivate_one(&id) {
                format!("module {id} disabled")
            } else {
                format!("module {id} is disabled")
            };
            respond(callback, ReloadOutcome::ok(message));
            return;
        }

        let inactive: Vec<ModuleId> = workspace
            .manifest()
            .depends
            .iter()
            .filter(|dep| !self.is_active(dep))
            .cloned()
            .collect();
        if !inactive.is_empty() {
            let err = ModuleError::from(DependencyError::Inactive {
                id: id.clone(),
                inactive,
            });
            warn!(module_id = %id, error = %err, "Single reload refused");
            respond(callback, ReloadOutcome::failed(err.report()));
            return;
        }

        self.cancel_pending(&id);
        self.deactivate_one(&id);
        match self.submit(workspace) {
            Some(ticket) => {
                self.callbacks.insert(ticket, callback);
            },
            None => respond(callback, ReloadOutcome::failed(RuntimeError::Shutdown.to_string())),
        }
    }

    // ── Compile jobs ─────────────────────────────────────────

    fn submit(&mut self, workspace: Workspace) -> Option<u64> {
        let tx = self.commands.upgrade()?;
        let id = workspace.id().clone();
        let ticket = self.next_ticket;
        self.next_ticket = self.next_ticket.saturating_add(1);
        self.tickets.insert(id.clone(), ticket);
        self.in_flight = self.in_flight.saturating_add(1);

        let generation = self.generation;
        let compiler = Arc::clone(&self.compiler);
        let semaphore = Arc::clone(&self.semaphore);
        debug!(module_id = %id, generation, ticket, "Compile queued");

        tokio::spawn(async move {
            let result = match semaphore.acquire_owned().await {
                Ok(permit) => {
                    let job_workspace = workspace.clone();
                    let joined =
                        tokio::task::spawn_blocking(move || compiler.compile(&job_workspace)).await;
                    drop(permit);
                    joined.unwrap_or_else(|e| {
                        Err(CompileError::Internal(format!("compile job for {id} failed: {e}")))
                    })
                },
                Err(_) => Err(CompileError::Internal("compile queue closed".into())),
            };
            let _ = tx.send(Command::Compiled(CompiledJob {
                generation,
                ticket,
                workspace,
                result,
            }));
        });
        Some(ticket)
    }

    fn on_compiled(&mut self, job: CompiledJob) {
        self.in_flight = self.in_flight.saturating_sub(1);
        let CompiledJob {
            generation,
            ticket,
            workspace,
            result,
        } = job;
        let id = workspace.id().clone();
        let callback = self.callbacks.remove(&ticket);

        let current =
            generation == self.generation && self.tickets.get(&id).is_some_and(|t| *t == ticket);
        if !current {
            debug!(
                module_id = %id,
                job_generation = generation,
                generation = self.generation,
                "Discarding stale compile result"
            );
            if let Some(callback) = callback {
                respond(callback, ReloadOutcome::cancelled());
            }
            self.notify_settled();
            return;
        }
        self.tickets.remove(&id);

        match result {
            Err(e) => {
                let err = ModuleError::from(e);
                warn!(module_id = %id, error = %err, "Compilation failed");
                if let Some(callback) = callback {
                    respond(callback, ReloadOutcome::failed(err.report()));
                }
                self.record_failure(id.to_string(), err);
            },
            Ok(artifact) => {
                let pending = PendingActivation {
                    workspace,
                    artifact,
                    generation,
                    ticket,
                };
                if self.dependencies_active(&pending.workspace) {
                    if self.activate(pending, callback) {
                        self.activate_ready();
                    }
                } else {
                    debug!(module_id = %id, "Waiting for dependencies");
                    if let Some(callback) = callback {
                        self.callbacks.insert(ticket, callback);
                    }
                    self.pending.push(pending);
                }
            },
        }
        self.notify_settled();
    }

    // ── Activation ───────────────────────────────────────────

    fn activate(&mut self, pending: PendingActivation, callback: Option<ReloadCallback>) -> bool {
        let id = pending.workspace.id().clone();
        self.deactivate_one(&id);

        match self.activator.activate(pending.workspace, &pending.artifact) {
            Ok(module) => {
                self.active.push(module);
                if let Some(callback) = callback {
                    respond(callback, ReloadOutcome::ok(format!("module {id} reloaded")));
                }
                true
            },
            Err(err) => {
                warn!(module_id = %id, error = %err, "Activation failed");
                if let Some(callback) = callback {
                    respond(callback, ReloadOutcome::failed(err.report()));
                }
                self.record_failure(id.to_string(), err);
                false
            },
        }
    }

    /// Activate pending modules whose dependencies are now active, until a
    /// pass makes no progress.
    fn activate_ready(&mut self) {
        loop {
            let generation = self.generation;
            let Some(index) = self
                .pending
                .iter()
                .position(|p| p.generation == generation && self.dependencies_active(&p.workspace))
            else {
                break;
            };
            let pending = self.pending.remove(index);
            let callback = self.callbacks.remove(&pending.ticket);
            self.activate(pending, callback);
        }
    }

    fn dependencies_active(&self, workspace: &Workspace) -> bool {
        workspace
            .manifest()
            .depends
            .iter()
            .all(|dep| self.is_active(dep))
    }

    fn is_active(&self, id: &ModuleId) -> bool {
        self.active.iter().any(|m| m.id() == id)
    }

    // ── Deactivation ─────────────────────────────────────────

    fn deactivate_one(&mut self, id: &ModuleId) -> bool {
        let Some(index) = self.active.iter().position(|m| m.id() == id) else {
            return false;
        };
        let module = self.active.remove(index);
        self.activator.deactivate(module);
        true
    }

    fn deactivate_all(&mut self) -> usize {
        let mut count = 0usize;
        while let Some(module) = self.active.pop() {
            self.activator.deactivate(module);
            count = count.saturating_add(1);
        }
        count
    }

    fn cancel_pending(&mut self, id: &ModuleId) {
        let (cancelled, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.pending)
            .into_iter()
            .partition(|p| p.workspace.id() == id);
        self.pending = kept;
        for pending in cancelled {
            if let Some(callback) = self.callbacks.remove(&pending.ticket) {
                respond(callback, ReloadOutcome::cancelled());
            }
        }
    }

    fn cancel_all_pending(&mut self) {
        for pending in std::mem::take(&mut self.pending) {
            if let Some(callback) = self.callbacks.remove(&pending.ticket) {
                respond(callback, ReloadOutcome::cancelled());
            }
        }
    }

    fn shutdown(&mut self) {
        self.bump_generation();
        let disabled = self.deactivate_all();
        self.pending.clear();
        self.tickets.clear();
        for (_, callback) in self.callbacks.drain() {
            respond(callback, ReloadOutcome::failed(RuntimeError::Shutdown.to_string()));
        }
        for waiter in self.settle_waiters.drain(..) {
            let _ = waiter.send(());
        }
        info!(disabled, "Module host shut down");
    }

    // ── Bookkeeping ──────────────────────────────────────────

    fn bump_generation(&mut self) {
        self.generation = self.generation.saturating_add(1);
        self.generation_tx.send_replace(self.generation);
    }

    fn record_failure(&mut self, subject: String, error: ModuleError) {
        self.failures.push(ModuleFailure {
            subject,
            error: Arc::new(error),
        });
    }

    fn notify_settled(&mut self) {
        if self.in_flight == 0 {
            for waiter in self.settle_waiters.drain(..) {
                let _ = waiter.send(());
            }
        }
    }

    fn snapshot(&self) -> HostSnapshot {
        HostSnapshot {
            generation: self.generation,
            active: self.active.iter().map(|m| m.id().clone()).collect(),
            pending: self.pending.iter().map(|p| p.workspace.id().clone()).collect(),
            in_flight: self.in_flight,
        }
    }
}

/// Run a caller-supplied callback; a panic is logged and swallowed.
fn respond(callback: ReloadCallback, outcome: ReloadOutcome) {
    if let Err(payload) = catch_unwind(AssertUnwindSafe(move || callback(outcome))) {
        warn!(panic = %panic_message(payload.as_ref()), "Reload callback panicked");
    }
}
