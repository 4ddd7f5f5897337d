//! Single-worker FIFO for everything that touches a transaction.
//!
//! Hardware callbacks never run transaction work inline; they submit a [`Job`]
//! and return. The worker runs jobs one at a time in submission order. A job
//! that panics is handed to [`JobHandler::recover`] and the worker carries on.
//!
//! On shutdown the job in progress runs to completion, then queued jobs that
//! never started are passed to [`JobHandler::discard`].

use std::panic::AssertUnwindSafe;

use async_channel::{Receiver, Sender};
use async_trait::async_trait;
use futures::FutureExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use cashless_icd::cashless_device::CashlessSignal;

use crate::error::{HostError, Result};
use crate::kernel::KernelEvent;

pub enum Job {
    Cashless(CashlessSignal),
    Kernel(KernelEvent),
}

impl Job {
    pub fn name(&self) -> &'static str {
        match self {
            Job::Cashless(signal) => signal.name(),
            Job::Kernel(KernelEvent::Connected(_)) => "kernel_connected",
            Job::Kernel(KernelEvent::Disconnected) => "kernel_disconnected",
        }
    }
}

#[async_trait]
pub trait JobHandler: Send + 'static {
    async fn handle(&mut self, job: Job);

    /// Called after `handle` panicked part way through a job
    fn recover(&mut self, job_name: &'static str);

    /// Called for each job still queued when the worker stops
    fn discard(&mut self, job: Job);
}

/// Cloneable submission side of the queue. Never blocks.
#[derive(Clone)]
pub struct JobSender {
    tx: Sender<Job>,
}

impl JobSender {
    pub fn submit(&self, job: Job) -> Result<()> {
        self.tx.try_send(job).map_err(|_| HostError::SerializerClosed)
    }
}

/// Starts the worker. The handler is given back when the worker exits.
pub fn spawn<H: JobHandler>(handler: H, shutdown: CancellationToken) -> (JobSender, JoinHandle<H>) {
    let (tx, rx) = async_channel::unbounded();
    let worker = tokio::spawn(run(handler, rx, shutdown));
    (JobSender { tx }, worker)
}

async fn run<H: JobHandler>(mut handler: H, rx: Receiver<Job>, shutdown: CancellationToken) -> H {
    info!("Transaction serializer started");
    loop {
        let job = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            job = rx.recv() => match job {
                Ok(job) => job,
                Err(_) => break,
            },
        };
        let name = job.name();
        debug!(job = name, "Running serialized job");
        if AssertUnwindSafe(handler.handle(job)).catch_unwind().await.is_err() {
            error!(job = name, "Serialized job panicked");
            handler.recover(name);
        }
    }

    rx.close();
    while let Ok(job) = rx.try_recv() {
        debug!(job = job.name(), "Discarding job queued at shutdown");
        handler.discard(job);
    }
    info!("Transaction serializer stopped");
    handler
}
