//! Single background worker that runs partial reformats

mod request;
mod worker;

pub use request::{
    FormatTicket, FormatterFailure, ReformatOutcome, ReformatRequest, ReformatResult, Recovery,
};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use flume::Sender;
use log::{debug, info, warn};

use crate::document::SharedDocument;
use crate::engine::Transcriber;
use worker::{Job, reformat_worker};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(3000);
pub const DEFAULT_SAFETY_MARGIN: u32 = 2;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Bounds how long the idle worker takes to notice `close`
    pub poll_interval: Duration,
    /// Extra pages regenerated before the views are released
    pub safety_margin: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            safety_margin: DEFAULT_SAFETY_MARGIN,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FormatState {
    Idle,
    Busy,
    Completed,
    Interrupted,
    Failed,
}

#[derive(Debug, thiserror::Error)]
pub enum ReformatError {
    #[error("a reformat is already in flight")]
    IllegalState,

    #[error("the reformat worker is closed")]
    Closed,

    #[error("failed to spawn the reformat worker: {0}")]
    Spawn(#[source] std::io::Error),
}

/// State shared between the scheduler handle and its worker
#[derive(Debug)]
pub(crate) struct SchedulerShared {
    state: Mutex<FormatState>,
    cancel: AtomicBool,
    closed: AtomicBool,
}

impl SchedulerShared {
    fn new() -> Self {
        Self {
            state: Mutex::new(FormatState::Idle),
            cancel: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    fn state(&self) -> FormatState {
        *self
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn set_state(&self, state: FormatState) {
        *self
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = state;
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Acquire)
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// Drives partial runs of the engine on one dedicated thread.
///
/// At most one request is in flight; a second `start_format` while busy is
/// refused. Every accepted request produces exactly one result on its
/// ticket, whether the run completed, was interrupted or failed.
pub struct Reformatter {
    shared: Arc<SchedulerShared>,
    jobs: Option<Sender<Job>>,
    worker: Option<JoinHandle<()>>,
}

impl Reformatter {
    /// Spawn the worker thread for one document
    pub fn spawn(
        engine: Arc<dyn Transcriber>,
        doc: SharedDocument,
        config: SchedulerConfig,
    ) -> Result<Self, ReformatError> {
        let shared = Arc::new(SchedulerShared::new());
        let (jobs_tx, jobs_rx) = flume::unbounded();

        let worker_shared = Arc::clone(&shared);
        let worker = std::thread::Builder::new()
            .name("dotweaver-reformat".into())
            .spawn(move || reformat_worker(engine, doc, jobs_rx, worker_shared, config))
            .map_err(ReformatError::Spawn)?;

        Ok(Self {
            shared,
            jobs: Some(jobs_tx),
            worker: Some(worker),
        })
    }

    /// Hand a request to the worker.
    ///
    /// Fails with `IllegalState` while a run is in flight; callers stop the
    /// current run first.
    pub fn start_format(&self, request: ReformatRequest) -> Result<FormatTicket, ReformatError> {
        let mut state = self
            .shared
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if *state == FormatState::Busy {
            warn!("Refusing reformat from {}: worker busy", request.start);
            return Err(ReformatError::IllegalState);
        }
        let jobs = match &self.jobs {
            Some(jobs) if !self.shared.is_closed() => jobs,
            _ => return Err(ReformatError::Closed),
        };

        self.shared.cancel.store(false, Ordering::Release);
        let (enough_tx, enough_rx) = flume::bounded(1);
        let (resume_tx, resume_rx) = flume::bounded(1);
        let (done_tx, done_rx) = flume::bounded(1);
        debug!("Dispatching reformat from {}", request.start);
        jobs.send(Job {
            request,
            enough: enough_tx,
            resume: resume_rx,
            done: done_tx,
        })
        .map_err(|_| ReformatError::Closed)?;
        *state = FormatState::Busy;

        Ok(FormatTicket {
            enough: enough_rx,
            resume: resume_tx,
            done: done_rx,
        })
    }

    /// Ask the current run to stop at the next node
    pub fn stop_format(&self) {
        if self.is_busy() {
            debug!("Cancelling reformat");
        }
        self.shared.cancel.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.shared.state() == FormatState::Busy
    }

    #[must_use]
    pub fn state(&self) -> FormatState {
        self.shared.state()
    }

    /// Return a finished scheduler to `Idle` once its result was consumed
    pub fn acknowledge(&self) {
        let mut state = self
            .shared
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if *state != FormatState::Busy {
            *state = FormatState::Idle;
        }
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// Cancel any run and terminate the worker. Safe to call repeatedly.
    pub fn close(&mut self) {
        self.shared.closed.store(true, Ordering::Release);
        self.shared.cancel.store(true, Ordering::Release);
        self.jobs.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("Reformat worker terminated by a panic");
            }
            info!("Reformatter closed");
        }
    }
}

impl Drop for Reformatter {
    fn drop(&mut self) {
        self.close();
    }
}
