//! Bounded async worker pool.

use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, error, info};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

/// Work executed by the pool's workers.
#[async_trait]
pub trait JobHandler: Send + Sync + 'static {
    type Job: Send + 'static;
    type Output: Send + 'static;

    async fn run(&self, job: Self::Job) -> Self::Output;

    /// Output for a job taken after `should_stop` turned true.
    fn skip(&self, job: Self::Job) -> Self::Output;

    fn should_stop(&self) -> bool;
}

#[derive(Debug, thiserror::Error)]
#[error("Worker pool is closed")]
pub struct PoolClosed;

pub struct WorkerPool<H: JobHandler> {
    job_sender: mpsc::Sender<H::Job>,
    result_receiver: mpsc::UnboundedReceiver<H::Output>,
    workers: Vec<JoinHandle<()>>,
}

impl<H: JobHandler> WorkerPool<H> {
    /// Spawns `worker_count` workers on the current runtime.
    ///
    /// # Panics
    /// Panics if `worker_count` is 0.
    pub fn new(handler: Arc<H>, worker_count: usize) -> Self {
        assert!(worker_count > 0, "worker_count must be > 0");
        let (job_sender, job_receiver) = mpsc::channel::<H::Job>(worker_count * 2);
        let (result_sender, result_receiver) = mpsc::unbounded_channel::<H::Output>();
        let job_receiver = Arc::new(Mutex::new(job_receiver));

        let workers = (0..worker_count)
            .map(|worker_id| {
                let handler = Arc::clone(&handler);
                let jobs = Arc::clone(&job_receiver);
                let results = result_sender.clone();
                tokio::spawn(run_worker(worker_id, handler, jobs, results))
            })
            .collect();

        info!("Started {} workers", worker_count);

        Self {
            job_sender,
            result_receiver,
            workers,
        }
    }

    /// Queues a job, waiting while the queue is full.
    pub async fn submit(&self, job: H::Job) -> Result<(), PoolClosed> {
        self.job_sender.send(job).await.map_err(|_| PoolClosed)
    }

    /// Closes the queue, waits for every worker to drain it and returns all
    /// outputs not yet received.
    pub async fn finish(self) -> Vec<H::Output> {
        let Self {
            job_sender,
            mut result_receiver,
            workers,
        } = self;
        drop(job_sender);

        for (i, worker) in workers.into_iter().enumerate() {
            match worker.await {
                Ok(()) => debug!("Worker {} finished", i),
                Err(e) => error!("Worker {} panicked: {}", i, e),
            }
        }

        let mut outputs = Vec::new();
        while let Ok(output) = result_receiver.try_recv() {
            outputs.push(output);
        }
        info!("All workers have stopped");
        outputs
    }
}

async fn run_worker<H: JobHandler>(
    worker_id: usize,
    handler: Arc<H>,
    jobs: Arc<Mutex<mpsc::Receiver<H::Job>>>,
    results: mpsc::UnboundedSender<H::Output>,
) {
    debug!("Worker {} started", worker_id);

    loop {
        let job = {
            let mut jobs = jobs.lock().await;
            jobs.recv().await
        };
        let Some(job) = job else {
            debug!("Worker {} job channel closed", worker_id);
            break;
        };

        let output = if handler.should_stop() {
            handler.skip(job)
        } else {
            handler.run(job).await
        };

        if results.send(output).is_err() {
            error!("Worker {} failed to send result", worker_id);
            break;
        }
    }

    debug!("Worker {} stopped", worker_id);
}
