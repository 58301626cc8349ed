//! Async job processing with bounded queues.
//!
//! The key concepts here are borrowed from ["Queues Don't Fix
//! Overload"](https://ferd.ca/queues-don-t-fix-overload.html). We limit the
//! number of jobs that may be running at any one time, and the number that
//! may be waiting. But unlike a batch pipeline, an HTTP server shouldn't make
//! callers wait for queue space: once the queue is full, we reject new jobs
//! and let the caller report the failure.
//!
//! Normally, you will want to create a [`JobQueue`], and pass around
//! [`JobQueueHandle`]s. Submitting a job returns a [`JobHandle`], which can be
//! awaited for the job's output or simply dropped. Dropping a handle does not
//! cancel the job.

use std::{
    panic::AssertUnwindSafe,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use futures::{FutureExt as _, StreamExt as _, channel::oneshot};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_stream::wrappers::ReceiverStream;
use tracing::Instrument as _;

use crate::{
    async_utils::{BoxedFuture, JoinWorker},
    prelude::*,
};

/// An async job function. Jobs never fail; anything that can go wrong must be
/// represented in `Output`.
pub type JobFn<Input, Output> =
    Arc<dyn Fn(Input) -> BoxedFuture<Output> + Send + Sync + 'static>;

/// Options for a [`JobQueue`].
#[derive(Clone, Copy, Debug)]
pub struct JobQueueOpts {
    /// How many jobs may run at the same time?
    pub concurrency_limit: usize,

    /// How many jobs may wait for a free slot before we start rejecting new
    /// ones?
    pub capacity: usize,
}

/// Jobs are processed by a background worker. They contain an input, and a
/// one-shot channel on which to return the result.
struct Job<Input, Output> {
    /// A number identifying this run, for logging.
    run: u64,

    /// The input to the job.
    input: Input,

    /// The one-shot channel on which to return the result.
    tx: oneshot::Sender<Output>,
}

/// A handle to a submitted job.
#[derive(Debug)]
pub struct JobHandle<Output> {
    /// A number identifying this run, for logging.
    run: u64,

    /// Where our result will arrive.
    rx: oneshot::Receiver<Output>,
}

impl<Output> JobHandle<Output> {
    /// The run number of this job.
    pub fn run(&self) -> u64 {
        self.run
    }

    /// Wait for the job to finish.
    ///
    /// This fails if the job panicked, or if the worker was shut down before
    /// the job ran.
    pub async fn result(self) -> Result<Output> {
        self.rx
            .await
            .with_context(|| format!("job run {} did not produce a result", self.run))
    }
}

/// A handle to a [`JobQueue`].
///
/// This is basically just a wrapper around a [`mpsc::Sender`]. It can be
/// cloned cheaply and passed around.
pub struct JobQueueHandle<Input, Output> {
    /// The name of the job this queue runs.
    name: &'static str,

    /// Our sender.
    tx: mpsc::Sender<Job<Input, Output>>,

    /// Counter used to number runs.
    next_run: Arc<AtomicU64>,
}

// Override `Clone` so that `Input` and `Output` are not required to be `Clone`.
impl<Input, Output> Clone for JobQueueHandle<Input, Output> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            tx: self.tx.clone(),
            next_run: self.next_run.clone(),
        }
    }
}

impl<Input, Output> JobQueueHandle<Input, Output>
where
    Input: Send + 'static,
    Output: Send + 'static,
{
    /// The name of the job this queue runs.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Submit a job for background processing.
    ///
    /// This never waits. If the queue is full, or the worker has shut down,
    /// we return an error immediately.
    pub fn submit(&self, input: Input) -> Result<JobHandle<Output>> {
        let run = self.next_run.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        match self.tx.try_send(Job { run, input, tx }) {
            Ok(()) => {
                debug!(job = self.name, run, "Submitted job");
                Ok(JobHandle { run, rx })
            }
            Err(TrySendError::Full(_)) => {
                Err(anyhow!("{} queue is full, rejecting run {}", self.name, run))
            }
            Err(TrySendError::Closed(_)) => {
                Err(anyhow!("{} queue has shut down", self.name))
            }
        }
    }
}

/// A queue of jobs, processed in parallel by a background worker.
pub struct JobQueue<Input, Output> {
    /// Our handle, which we clone for callers.
    handle: JobQueueHandle<Input, Output>,
}

impl<Input, Output> JobQueue<Input, Output>
where
    Input: Send + 'static,
    Output: Send + 'static,
{
    /// Create a new job queue and start its worker.
    ///
    /// The worker exits once the queue and all its handles have been dropped
    /// and every accepted job has finished.
    pub fn new(
        name: &'static str,
        opts: JobQueueOpts,
        job_fn: JobFn<Input, Output>,
    ) -> Result<(Self, JoinWorker)> {
        if opts.concurrency_limit == 0 || opts.capacity == 0 {
            return Err(anyhow!(
                "{} queue needs a non-zero concurrency limit and capacity",
                name
            ));
        }
        let (tx, rx) = mpsc::channel::<Job<Input, Output>>(opts.capacity);
        let worker = tokio::spawn(async move {
            ReceiverStream::new(rx)
                .for_each_concurrent(opts.concurrency_limit, |job| {
                    let job_fn = job_fn.clone();
                    let span = tracing::info_span!("job", job = name, run = job.run);
                    async move {
                        // A panicking job must not take the worker down with
                        // it. Dropping `job.tx` tells the caller what happened.
                        match AssertUnwindSafe(job_fn(job.input)).catch_unwind().await {
                            Ok(output) => {
                                if job.tx.send(output).is_err() {
                                    debug!(
                                        "discarding job result because receiver was dropped"
                                    );
                                }
                            }
                            Err(_) => error!("job panicked"),
                        }
                    }
                    .instrument(span)
                })
                .await;
            debug!(job = name, "Job worker exiting");
            Ok(())
        });
        let handle = JobQueueHandle {
            name,
            tx,
            next_run: Arc::new(AtomicU64::new(1)),
        };
        Ok((Self { handle }, JoinWorker::from_handle(worker)))
    }

    /// Get a handle for submitting jobs to the queue.
    pub fn handle(&self) -> JobQueueHandle<Input, Output> {
        self.handle.clone()
    }
}
