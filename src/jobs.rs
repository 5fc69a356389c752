use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use tracing::{info, warn};

use crate::cancel::CancelFlag;
use crate::compare::Comparison;
use crate::error::{CatalogError, CatalogResult};
use crate::models::CatalogId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Idle,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Failed | JobState::Cancelled
        )
    }

    /// Applies a transition if it is legal: Idle -> Running -> terminal.
    /// Terminal states never change.
    pub fn advance(&mut self, next: JobState) -> bool {
        let ok = match (*self, next) {
            (JobState::Idle, JobState::Running) => true,
            (JobState::Running, n) => n.is_terminal(),
            _ => false,
        };
        if ok {
            *self = next;
        }
        ok
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Progress {
    pub processed: usize,
    pub total: usize,
    pub label: String,
}

impl Progress {
    pub fn percent(&self) -> f32 {
        if self.total == 0 {
            return 0.0;
        }
        (self.processed as f32 / self.total as f32 * 100.0).min(100.0)
    }
}

#[derive(Debug)]
pub enum JobOutput {
    Catalog(CatalogId),
    Comparison(Box<Comparison>),
}

#[derive(Debug)]
pub enum JobOutcome {
    Completed(JobOutput),
    Failed(CatalogError),
    Cancelled,
}

impl JobOutcome {
    fn from_result(res: CatalogResult<JobOutput>) -> Self {
        match res {
            Ok(out) => JobOutcome::Completed(out),
            Err(e) if e.is_cancelled() => JobOutcome::Cancelled,
            Err(e) => JobOutcome::Failed(e),
        }
    }

    fn state(&self) -> JobState {
        match self {
            JobOutcome::Completed(_) => JobState::Completed,
            JobOutcome::Failed(_) => JobState::Failed,
            JobOutcome::Cancelled => JobState::Cancelled,
        }
    }
}

/// Events of one job, in the order the work produced them. `Finished` is
/// always last.
#[derive(Debug)]
pub enum JobEvent {
    Progress(Progress),
    Finished(JobOutcome),
}

/// What a running job body sees: its cancel flag and its progress sink.
pub struct JobContext {
    cancel: CancelFlag,
    tx: Sender<JobEvent>,
}

impl JobContext {
    pub fn cancel_flag(&self) -> &CancelFlag {
        &self.cancel
    }

    pub fn progress(&self, processed: usize, total: usize, label: &str) {
        self.tx
            .send(JobEvent::Progress(Progress {
                processed,
                total,
                label: label.to_string(),
            }))
            .ok();
    }
}

/// A unit of background work, not yet started.
pub struct Job<F> {
    name: String,
    work: F,
    state: JobState,
}

impl<F> Job<F>
where
    F: FnOnce(&JobContext) -> CatalogResult<JobOutput> + Send + 'static,
{
    pub fn new(name: impl Into<String>, work: F) -> Self {
        Job {
            name: name.into(),
            work,
            state: JobState::Idle,
        }
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    /// Moves the work onto its own thread. Consumes the job, so a finished
    /// job can never be restarted.
    pub fn start(mut self) -> JobHandle {
        self.state.advance(JobState::Running);
        let state = Arc::new(Mutex::new(self.state));
        let cancel = CancelFlag::new();
        let (tx, rx) = mpsc::channel();

        let ctx = JobContext {
            cancel: cancel.clone(),
            tx: tx.clone(),
        };
        let worker_state = Arc::clone(&state);
        let name = self.name.clone();
        let work = self.work;

        let thread = thread::spawn(move || {
            info!("job '{name}' started");
            let res = panic::catch_unwind(AssertUnwindSafe(|| work(&ctx)))
                .unwrap_or_else(|_| Err(CatalogError::Worker(format!("job '{name}' panicked"))));
            let outcome = JobOutcome::from_result(res);
            match &outcome {
                JobOutcome::Completed(_) => info!("job '{name}' completed"),
                JobOutcome::Failed(e) => warn!("job '{name}' failed: {e}"),
                JobOutcome::Cancelled => info!("job '{name}' cancelled"),
            }
            if let Ok(mut s) = worker_state.lock() {
                s.advance(outcome.state());
            }
            tx.send(JobEvent::Finished(outcome)).ok();
        });

        JobHandle {
            name: self.name,
            cancel,
            events: rx,
            state,
            thread: Some(thread),
        }
    }
}

/// Caller side of a running job.
pub struct JobHandle {
    name: String,
    cancel: CancelFlag,
    events: Receiver<JobEvent>,
    state: Arc<Mutex<JobState>>,
    thread: Option<JoinHandle<()>>,
}

impl JobHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Requests cancellation. The job stops at its next checkpoint.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn state(&self) -> JobState {
        match self.state.lock() {
            Ok(s) => *s,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    /// Non-blocking poll, for callers driving their own loop.
    pub fn try_next_event(&self) -> Option<JobEvent> {
        match self.events.try_recv() {
            Ok(ev) => Some(ev),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    /// Blocks for the next event; `None` once the job is gone.
    pub fn next_event(&self) -> Option<JobEvent> {
        self.events.recv().ok()
    }

    /// Drains events until the terminal outcome, forwarding progress.
    pub fn wait_with<P>(mut self, mut on_progress: P) -> JobOutcome
    where
        P: FnMut(&Progress),
    {
        let mut outcome = None;
        while let Ok(ev) = self.events.recv() {
            match ev {
                JobEvent::Progress(p) => on_progress(&p),
                JobEvent::Finished(o) => {
                    outcome = Some(o);
                    break;
                }
            }
        }
        if let Some(t) = self.thread.take() {
            t.join().ok();
        }
        outcome.unwrap_or_else(|| {
            JobOutcome::Failed(CatalogError::Worker(format!(
                "job '{}' ended without an outcome",
                self.name
            )))
        })
    }

    pub fn wait(self) -> JobOutcome {
        self.wait_with(|_| {})
    }
}
