//! Concurrent job execution.
//!
//! A fixed number of workers drain one shared job channel. Every job body runs
//! in its own task so a panicking adapter is reported as a failure of that job
//! only; the dispatcher returns once every job has terminated.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use log::{LevelFilter, debug, error, info};

use crate::error::CollectError;
use crate::job::Job;
use crate::logging::HostLog;

/// What a successful collection did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Artifacts written or confirmed unchanged.
    Saved(Vec<PathBuf>),
    /// Collection was not needed this run.
    Skipped(String),
}

/// Runs one job. Implementations must not share mutable state across jobs.
#[async_trait]
pub trait Collector: Send + Sync + 'static {
    async fn collect(&self, job: &Job, log: &HostLog) -> Result<Outcome, CollectError>;
}

/// Per-run bookkeeping.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Summary {
    pub succeeded: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl Summary {
    pub fn total(&self) -> usize {
        self.succeeded + self.skipped + self.failed
    }

    fn merge(&mut self, other: Summary) {
        self.succeeded += other.succeeded;
        self.skipped += other.skipped;
        self.failed += other.failed;
    }
}

pub struct Dispatcher<C> {
    collector: Arc<C>,
    workers: usize,
    log_dir: Option<PathBuf>,
    log_level: LevelFilter,
}

impl<C: Collector> Dispatcher<C> {
    pub fn new(collector: C, workers: usize) -> Self {
        Self {
            collector: Arc::new(collector),
            workers,
            log_dir: None,
            log_level: LevelFilter::Info,
        }
    }

    /// Where per-host logs go, and how verbose they are.
    pub fn with_host_logs(mut self, log_dir: Option<PathBuf>, level: LevelFilter) -> Self {
        self.log_dir = log_dir;
        self.log_level = level;
        self
    }

    /// Runs every job and waits for all of them.
    pub async fn run(&self, jobs: Vec<Job>) -> Summary {
        if jobs.is_empty() {
            return Summary::default();
        }
        let workers = self.workers.clamp(1, jobs.len());
        info!("processing {} jobs with {workers} workers", jobs.len());

        let (job_tx, job_rx) = flume::unbounded::<Job>();
        for job in jobs {
            // The receiver is alive, so this cannot fail.
            let _ = job_tx.send(job);
        }
        drop(job_tx);

        let mut tasks = Vec::with_capacity(workers);
        for worker in 0..workers {
            let job_rx = job_rx.clone();
            let collector = Arc::clone(&self.collector);
            let log_dir = self.log_dir.clone();
            let log_level = self.log_level;
            tasks.push(tokio::spawn(async move {
                let mut summary = Summary::default();
                while let Ok(job) = job_rx.recv_async().await {
                    debug!("worker {worker} takes {}", job.section);
                    let log = Arc::new(HostLog::open(
                        log_dir.as_deref(),
                        job.params.adapter(),
                        job.display_name(),
                        log_level,
                    ));
                    log.begin();
                    let result = run_one(Arc::clone(&collector), job, Arc::clone(&log)).await;
                    match result {
                        Ok(Outcome::Saved(paths)) => {
                            for path in &paths {
                                log.info(format_args!("saved {}", path.display()));
                            }
                            summary.succeeded += 1;
                        }
                        Ok(Outcome::Skipped(reason)) => {
                            log.info(format_args!("skipped: {reason}"));
                            summary.skipped += 1;
                        }
                        Err(err) => {
                            log.error(format_args!("{}: {err}", err.kind()));
                            summary.failed += 1;
                        }
                    }
                    log.end();
                }
                summary
            }));
        }

        let mut summary = Summary::default();
        for task in join_all(tasks).await {
            match task {
                Ok(worker_summary) => summary.merge(worker_summary),
                Err(err) => error!("worker died: {err}"),
            }
        }
        info!(
            "{} jobs processed: {} succeeded, {} skipped, {} failed",
            summary.total(),
            summary.succeeded,
            summary.skipped,
            summary.failed
        );
        summary
    }
}

async fn run_one<C: Collector>(
    collector: Arc<C>,
    job: Job,
    log: Arc<HostLog>,
) -> Result<Outcome, CollectError> {
    let handle = tokio::spawn(async move { collector.collect(&job, &log).await });
    match handle.await {
        Ok(result) => result,
        Err(err) => Err(CollectError::Unhandled(err.to_string())),
    }
}
