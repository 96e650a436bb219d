//! Background thread runner for cutout pipeline processing.
//!
//! [`PipelineWorker`] owns a dedicated thread that runs
//! [`cutout_pipeline::process_with`] off the caller's thread. Jobs are
//! submitted with [`submit`](PipelineWorker::submit), which returns a
//! generation number; every [`WorkerEvent`] carries the generation of
//! the job that produced it so callers can drop stale results.
//!
//! Submitting a new job cancels the previous one. Cancellation is
//! cooperative: the pipeline checks its [`CancelFlag`] between stages,
//! so a cancelled run stops at the next stage boundary and reports
//! [`WorkerEvent::Cancelled`].

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use cutout_pipeline::{CancelFlag, PipelineError, ProcessInput, ProcessResult};

/// Errors from talking to the worker thread.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    /// The worker thread could not be started.
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),

    /// The worker thread has exited.
    #[error("worker thread is no longer running")]
    Disconnected,

    /// No event arrived in time.
    #[error("timed out waiting for worker after {0:?}")]
    Timeout(Duration),
}

/// A message from the worker thread.
#[derive(Debug)]
pub enum WorkerEvent {
    /// The job reached a pipeline progress checkpoint (0-100).
    Progress {
        /// Job the event belongs to.
        generation: u64,
        /// Percent complete.
        percent: u8,
    },
    /// The job finished.
    Completed {
        /// Job the event belongs to.
        generation: u64,
        /// Final mask and composited image.
        result: Box<ProcessResult>,
    },
    /// The job failed with a pipeline error or panicked.
    Failed {
        /// Job the event belongs to.
        generation: u64,
        /// Human-readable failure description.
        message: String,
    },
    /// The job was cancelled before it finished.
    Cancelled {
        /// Job the event belongs to.
        generation: u64,
    },
}

impl WorkerEvent {
    /// Generation of the job that produced this event.
    #[must_use]
    pub const fn generation(&self) -> u64 {
        match self {
            Self::Progress { generation, .. }
            | Self::Completed { generation, .. }
            | Self::Failed { generation, .. }
            | Self::Cancelled { generation } => *generation,
        }
    }

    /// Whether this is the last event for its job.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        !matches!(self, Self::Progress { .. })
    }
}

/// A queued pipeline run.
struct Job {
    generation: u64,
    input: ProcessInput,
    cancel: CancelFlag,
}

/// A pipeline runner backed by one dedicated thread.
///
/// Create one per editing session and reuse it for every run. Dropping
/// the worker cancels the current job and joins the thread.
pub struct PipelineWorker {
    jobs: Option<Sender<Job>>,
    events: Receiver<WorkerEvent>,
    current: Option<CancelFlag>,
    generation: u64,
    handle: Option<JoinHandle<()>>,
}

impl PipelineWorker {
    /// Start the worker thread.
    ///
    /// # Errors
    ///
    /// Returns [`WorkerError::Spawn`] if the OS refuses to create the
    /// thread.
    pub fn spawn() -> Result<Self, WorkerError> {
        let (job_tx, job_rx) = mpsc::channel::<Job>();
        let (event_tx, event_rx) = mpsc::channel::<WorkerEvent>();
        let handle = thread::Builder::new()
            .name("cutout-worker".to_string())
            .spawn(move || worker_loop(&job_rx, &event_tx))?;
        tracing::debug!("pipeline worker started");
        Ok(Self {
            jobs: Some(job_tx),
            events: event_rx,
            current: None,
            generation: 0,
            handle: Some(handle),
        })
    }

    /// Queue `input` for processing and return its generation.
    ///
    /// Any job submitted earlier is cancelled; its remaining events still
    /// arrive but carry an older generation.
    ///
    /// # Errors
    ///
    /// Returns [`WorkerError::Disconnected`] if the worker thread has
    /// exited.
    pub fn submit(&mut self, input: ProcessInput) -> Result<u64, WorkerError> {
        self.cancel();
        self.generation += 1;
        let cancel = CancelFlag::new();
        let job = Job {
            generation: self.generation,
            input,
            cancel: cancel.clone(),
        };
        self.jobs
            .as_ref()
            .ok_or(WorkerError::Disconnected)?
            .send(job)
            .map_err(|_| WorkerError::Disconnected)?;
        self.current = Some(cancel);
        Ok(self.generation)
    }

    /// Cancel the current job, if any.
    pub fn cancel(&mut self) {
        if let Some(flag) = self.current.take() {
            flag.cancel();
        }
    }

    /// Generation of the most recently submitted job (0 before any).
    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    /// Whether `event` belongs to the most recent job.
    #[must_use]
    pub const fn is_current(&self, event: &WorkerEvent) -> bool {
        event.generation() == self.generation
    }

    /// Next event, if one is ready.
    #[must_use]
    pub fn try_recv(&self) -> Option<WorkerEvent> {
        self.events.try_recv().ok()
    }

    /// Wait up to `timeout` for the next event.
    ///
    /// # Errors
    ///
    /// Returns [`WorkerError::Timeout`] if nothing arrives in time and
    /// [`WorkerError::Disconnected`] if the worker thread has exited.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<WorkerEvent, WorkerError> {
        self.events.recv_timeout(timeout).map_err(|e| match e {
            RecvTimeoutError::Timeout => WorkerError::Timeout(timeout),
            RecvTimeoutError::Disconnected => WorkerError::Disconnected,
        })
    }

    /// Block until job `generation` finishes, forwarding its progress.
    ///
    /// Events from other generations are discarded. `timeout` bounds the
    /// wait for each individual event, not the whole run.
    ///
    /// # Errors
    ///
    /// Returns [`WorkerError::Timeout`] or [`WorkerError::Disconnected`]
    /// from [`recv_timeout`](Self::recv_timeout).
    pub fn wait(
        &self,
        generation: u64,
        timeout: Duration,
        mut on_progress: impl FnMut(u8),
    ) -> Result<WorkerEvent, WorkerError> {
        loop {
            let event = self.recv_timeout(timeout)?;
            if event.generation() != generation {
                continue;
            }
            match event {
                WorkerEvent::Progress { percent, .. } => on_progress(percent),
                terminal => return Ok(terminal),
            }
        }
    }
}

impl Drop for PipelineWorker {
    fn drop(&mut self) {
        self.cancel();
        // Closing the job channel ends the worker loop.
        self.jobs = None;
        if let Some(handle) = self.handle.take()
            && handle.join().is_err()
        {
            tracing::warn!("pipeline worker thread panicked during shutdown");
        }
    }
}

fn worker_loop(jobs: &Receiver<Job>, events: &Sender<WorkerEvent>) {
    while let Ok(job) = jobs.recv() {
        let event = run_job(job, events);
        if events.send(event).is_err() {
            break;
        }
    }
    tracing::debug!("pipeline worker stopped");
}

/// Run one job to a terminal event, turning panics into failures.
fn run_job(job: Job, events: &Sender<WorkerEvent>) -> WorkerEvent {
    let Job {
        generation,
        input,
        cancel,
    } = job;

    if cancel.is_cancelled() {
        tracing::debug!(generation, "skipping job cancelled while queued");
        return WorkerEvent::Cancelled { generation };
    }

    tracing::info!(
        generation,
        width = input.image.width(),
        height = input.image.height(),
        algorithm = %input.settings.algorithm,
        "processing started",
    );

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        cutout_pipeline::process_with(input, &cancel, |percent| {
            // The receiver only disappears when the worker is dropped.
            let _ = events.send(WorkerEvent::Progress {
                generation,
                percent,
            });
        })
    }));

    match outcome {
        Ok(Ok(result)) => {
            tracing::info!(
                generation,
                foreground = result.mask.foreground_fraction(),
                "processing finished",
            );
            WorkerEvent::Completed {
                generation,
                result: Box::new(result),
            }
        }
        Ok(Err(PipelineError::Cancelled)) => {
            tracing::warn!(generation, "processing cancelled");
            WorkerEvent::Cancelled { generation }
        }
        Ok(Err(e)) => {
            tracing::warn!(generation, error = %e, "processing failed");
            WorkerEvent::Failed {
                generation,
                message: e.to_string(),
            }
        }
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            tracing::warn!(generation, %message, "processing panicked");
            WorkerEvent::Failed {
                generation,
                message: format!("processing panicked: {message}"),
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use cutout_pipeline::{RgbaImage, Settings};

    use super::*;

    const TIMEOUT: Duration = Duration::from_secs(30);

    fn square_input() -> ProcessInput {
        let image = RgbaImage::from_fn(24, 24, |x, y| {
            if (6..18).contains(&x) && (6..18).contains(&y) {
                image::Rgba([20, 40, 200, 255])
            } else {
                image::Rgba([250, 250, 250, 255])
            }
        });
        ProcessInput::with_settings(
            image,
            Settings {
                seed: Some(5),
                ..Settings::default()
            },
        )
    }

    #[test]
    fn completed_job_reports_full_progress() {
        let mut worker = PipelineWorker::spawn().unwrap();
        let generation = worker.submit(square_input()).unwrap();
        assert_eq!(generation, 1);

        let mut seen = Vec::new();
        let event = worker
            .wait(generation, TIMEOUT, |p| seen.push(p))
            .unwrap();
        assert_eq!(seen, vec![0, 10, 30, 50, 80, 100]);
        let WorkerEvent::Completed { result, .. } = event else {
            unreachable!("expected completion, got {event:?}");
        };
        assert_eq!(result.dimensions.width, 24);
        assert!(result.mask.get(12, 12) > 0.5);
        assert!(result.mask.get(0, 0) < 0.5);
    }

    #[test]
    fn invalid_input_reports_failure() {
        let mut worker = PipelineWorker::spawn().unwrap();
        let generation = worker
            .submit(ProcessInput::new(RgbaImage::new(0, 0)))
            .unwrap();
        let event = worker.wait(generation, TIMEOUT, |_| {}).unwrap();
        assert!(
            matches!(&event, WorkerEvent::Failed { message, .. } if message.contains("dimensions")),
            "{event:?}"
        );
    }

    #[test]
    fn resubmitting_supersedes_previous_job() {
        let mut worker = PipelineWorker::spawn().unwrap();
        let first = worker.submit(square_input()).unwrap();
        let second = worker.submit(square_input()).unwrap();
        assert_eq!(second, first + 1);

        let mut first_terminal = None;
        let second_terminal = loop {
            let event = worker.recv_timeout(TIMEOUT).unwrap();
            if !event.is_terminal() {
                continue;
            }
            if event.generation() == first {
                first_terminal = Some(event);
            } else {
                assert!(worker.is_current(&event));
                break event;
            }
        };

        // The first job may finish before the cancel lands, but never fails.
        let first_terminal = first_terminal.unwrap();
        assert!(matches!(
            first_terminal,
            WorkerEvent::Cancelled { .. } | WorkerEvent::Completed { .. }
        ));
        assert!(matches!(second_terminal, WorkerEvent::Completed { .. }));
    }

    #[test]
    fn job_cancelled_before_pickup_is_skipped() {
        let (events, received) = mpsc::channel();
        let cancel = CancelFlag::new();
        cancel.cancel();
        let job = Job {
            generation: 3,
            input: square_input(),
            cancel,
        };
        let event = run_job(job, &events);
        assert!(
            matches!(event, WorkerEvent::Cancelled { generation: 3 }),
            "{event:?}"
        );
        // Skipped jobs emit no progress.
        assert!(received.try_recv().is_err());
    }

    #[test]
    fn uncancelled_job_runs_to_completion() {
        let (events, received) = mpsc::channel();
        let job = Job {
            generation: 4,
            input: square_input(),
            cancel: CancelFlag::new(),
        };
        let event = run_job(job, &events);
        assert!(
            matches!(event, WorkerEvent::Completed { generation: 4, .. }),
            "{event:?}"
        );
        let progress: Vec<_> = received.try_iter().collect();
        assert_eq!(progress.len(), 6);
    }

    #[test]
    fn try_recv_is_empty_before_submit() {
        let worker = PipelineWorker::spawn().unwrap();
        assert_eq!(worker.generation(), 0);
        assert!(worker.try_recv().is_none());
        assert!(matches!(
            worker.recv_timeout(Duration::from_millis(10)),
            Err(WorkerError::Timeout(_))
        ));
    }

    #[test]
    fn panic_payloads_become_messages() {
        let boxed: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(boxed.as_ref()), "boom");
        let boxed: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(boxed.as_ref()), "bang");
        let boxed: Box<dyn Any + Send> = Box::new(7_u8);
        assert_eq!(panic_message(boxed.as_ref()), "unknown panic");
    }
}
