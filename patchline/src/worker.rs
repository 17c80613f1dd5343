//! Single background worker driving the pipeline.
//!
//! The presentation layer (CLI today, anything tomorrow) talks to the worker
//! through a small set of idempotent commands and read-only progress
//! queries; these are the only legal cross-thread interactions. Commands
//! queue on a channel and execute strictly sequentially, so no two job
//! processes ever run concurrently. A cancel request is latched and honored
//! only at job boundaries.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;

use anyhow::Result;
use tracing::{debug, error, info};

use crate::core::types::RunPhase;
use crate::io::catalog::Catalog;
use crate::io::launcher::Launcher;
use crate::policy::FailurePolicy;
use crate::run::{RunContext, RunEvent, RunReport};

/// Read-only progress view of the in-flight (or last) run.
#[derive(Debug, Clone)]
pub struct Progress {
    pub phase: RunPhase,
    pub current_job: Option<String>,
    pub completed: usize,
    pub total: usize,
    pub failed: Vec<String>,
}

impl Default for Progress {
    fn default() -> Self {
        Self {
            phase: RunPhase::Idle,
            current_job: None,
            completed: 0,
            total: 0,
            failed: Vec::new(),
        }
    }
}

enum Command {
    StartImport,
    RunChanges,
    Shutdown,
}

/// Handle over the background worker thread.
pub struct Worker {
    sender: Sender<Command>,
    progress: Arc<Mutex<Progress>>,
    cancel: Arc<AtomicBool>,
    active: Arc<AtomicBool>,
    last_report: Arc<Mutex<Option<Result<RunReport>>>>,
    handle: Option<JoinHandle<()>>,
}

impl Worker {
    /// Spawn the worker over a prepared run context.
    pub fn spawn<C, L, P>(mut ctx: RunContext<C>, launcher: L, policy: P) -> Self
    where
        C: Catalog + Send + 'static,
        L: Launcher + Send + 'static,
        P: FailurePolicy + Send + 'static,
    {
        let (sender, receiver) = mpsc::channel::<Command>();
        let progress = Arc::new(Mutex::new(Progress::default()));
        let cancel = Arc::new(AtomicBool::new(false));
        let active = Arc::new(AtomicBool::new(false));
        let last_report: Arc<Mutex<Option<Result<RunReport>>>> = Arc::new(Mutex::new(None));

        let thread_progress = progress.clone();
        let thread_cancel = cancel.clone();
        let thread_active = active.clone();
        let thread_report = last_report.clone();

        let handle = std::thread::spawn(move || {
            while let Ok(command) = receiver.recv() {
                match command {
                    Command::Shutdown => break,
                    Command::StartImport => {
                        thread_active.store(true, Ordering::SeqCst);
                        if let Err(err) = ctx.start_import() {
                            error!(err = %err, "import failed");
                        }
                        thread_active.store(false, Ordering::SeqCst);
                    }
                    Command::RunChanges => {
                        thread_active.store(true, Ordering::SeqCst);
                        let progress = thread_progress.clone();
                        let result = ctx.run_changes(&launcher, &policy, &thread_cancel, |event| {
                            apply_event(&progress, event);
                        });
                        if let Err(err) = &result {
                            error!(err = %err, "run failed");
                        }
                        *lock(&thread_report) = Some(result);
                        thread_active.store(false, Ordering::SeqCst);
                    }
                }
            }
            info!("worker shut down");
        });

        Self {
            sender,
            progress,
            cancel,
            active,
            last_report,
            handle: Some(handle),
        }
    }

    /// Enqueue the import phase. Safe no-op while the worker is active.
    pub fn start_import(&self) {
        if self.active.load(Ordering::SeqCst) {
            debug!("worker active, start_import is a no-op");
            return;
        }
        let _ = self.sender.send(Command::StartImport);
    }

    /// Enqueue a full run. Safe no-op while the worker is active.
    pub fn run_changes(&self) {
        if self.active.load(Ordering::SeqCst) {
            debug!("worker active, run_changes is a no-op");
            return;
        }
        let _ = self.sender.send(Command::RunChanges);
    }

    /// Latch a cancel request; honored only at job boundaries.
    pub fn request_cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    /// Read-only progress snapshot.
    pub fn progress(&self) -> Progress {
        lock(&self.progress).clone()
    }

    /// Take the most recent run's outcome, if one finished.
    pub fn take_report(&self) -> Option<Result<RunReport>> {
        lock(&self.last_report).take()
    }

    /// Drain queued commands, stop the worker thread, and hand back the last
    /// run's outcome (if any run finished).
    pub fn shutdown(mut self) -> Option<Result<RunReport>> {
        let _ = self.sender.send(Command::Shutdown);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        lock(&self.last_report).take()
    }
}

fn apply_event(progress: &Arc<Mutex<Progress>>, event: RunEvent) {
    let mut progress = lock(progress);
    match event {
        RunEvent::Phase(phase) => progress.phase = phase,
        RunEvent::JobStarted { job, total, .. } => {
            progress.current_job = Some(job);
            progress.total = total;
        }
        RunEvent::JobFinished { job, success } => {
            progress.current_job = None;
            progress.completed += 1;
            if !success {
                progress.failed.push(job);
            }
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
