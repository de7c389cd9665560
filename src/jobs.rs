use crate::error::RunError;
use crate::models::{ApiKey, OutputFormat, RunOptions, RunReport, RunState};
use crate::services::pipeline::{CancelFlag, Pipeline, ProgressSink, RunOutcome};
use crate::services::source::SourceDocument;
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{RwLock, watch};
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
pub struct JobStatus {
    pub id: Uuid,
    #[serde(flatten)]
    pub state: RunState,
    pub report: Option<RunReport>,
    #[serde(skip)]
    pub output: Option<(PathBuf, OutputFormat)>,
    #[serde(skip)]
    pub finished_at: Option<Instant>,
}

struct Job {
    status: watch::Sender<JobStatus>,
    cancel: CancelFlag,
}

/// Forwards pipeline states into the job's status channel.
struct JobProgress<'a>(&'a watch::Sender<JobStatus>);

impl ProgressSink for JobProgress<'_> {
    fn update(&self, state: RunState) {
        // Terminal states are published by the job together with the report.
        if !state.is_terminal() {
            self.0.send_modify(|status| status.state = state);
        }
    }
}

/// Correction runs handed off from the HTTP surface, one tokio task each.
///
/// Finished jobs are kept for `retention`, then dropped together with their
/// output file by [`JobRegistry::evict_expired`].
pub struct JobRegistry {
    pipeline: Arc<Pipeline>,
    output_dir: PathBuf,
    retention: Duration,
    jobs: RwLock<HashMap<Uuid, Arc<Job>>>,
}

impl JobRegistry {
    pub fn new(pipeline: Arc<Pipeline>, output_dir: PathBuf, retention: Duration) -> Self {
        JobRegistry {
            pipeline,
            output_dir,
            retention,
            jobs: RwLock::new(HashMap::new()),
        }
    }

    pub async fn submit(
        &self,
        source: SourceDocument,
        options: RunOptions,
        key: Option<ApiKey>,
    ) -> Uuid {
        let id = Uuid::new_v4();
        let (status, _) = watch::channel(JobStatus {
            id,
            state: RunState::Idle,
            report: None,
            output: None,
            finished_at: None,
        });
        let job = Arc::new(Job {
            status,
            cancel: CancelFlag::default(),
        });
        self.jobs.write().await.insert(id, job.clone());

        let pipeline = self.pipeline.clone();
        let path = self
            .output_dir
            .join(format!("{id}.{}", options.format.extension()));
        info!(job_id = %id, source = %source.name, "queued correction run");

        tokio::spawn(
            async move {
                run_job(&pipeline, &job, source, options, key, path).await;
            }
            .instrument(info_span!("run", job_id = %id)),
        );

        id
    }

    pub async fn status(&self, id: Uuid) -> Option<JobStatus> {
        let jobs = self.jobs.read().await;
        jobs.get(&id).map(|job| job.status.borrow().clone())
    }

    #[cfg(test)]
    pub async fn subscribe(&self, id: Uuid) -> Option<watch::Receiver<JobStatus>> {
        let jobs = self.jobs.read().await;
        jobs.get(&id).map(|job| job.status.subscribe())
    }

    /// Requests cancellation; the chunk in flight still completes.
    pub async fn cancel(&self, id: Uuid) -> Option<JobStatus> {
        let jobs = self.jobs.read().await;
        let job = jobs.get(&id)?;
        if !job.status.borrow().state.is_terminal() {
            info!(job_id = %id, "cancellation requested");
            job.cancel.cancel();
        }
        Some(job.status.borrow().clone())
    }

    /// Drops jobs that finished more than `retention` ago and deletes their
    /// output files. Returns how many jobs were dropped.
    pub async fn evict_expired(&self) -> usize {
        let expired: Vec<(Uuid, Arc<Job>)> = {
            let mut jobs = self.jobs.write().await;
            let ids: Vec<Uuid> = jobs
                .iter()
                .filter(|(_, job)| {
                    job.status
                        .borrow()
                        .finished_at
                        .is_some_and(|at| at.elapsed() >= self.retention)
                })
                .map(|(id, _)| *id)
                .collect();
            ids.into_iter()
                .filter_map(|id| jobs.remove(&id).map(|job| (id, job)))
                .collect()
        };

        for (id, job) in &expired {
            let output = job.status.borrow().output.clone();
            if let Some((path, _)) = output {
                if let Err(err) = tokio::fs::remove_file(&path).await {
                    warn!(job_id = %id, path = %path.display(), %err, "could not remove output file");
                }
            }
            debug!(job_id = %id, "evicted finished job");
        }
        expired.len()
    }

    /// Runs [`JobRegistry::evict_expired`] on a fixed period, forever.
    pub async fn evict_periodically(self: Arc<Self>, period: Duration) {
        let mut ticker = tokio::time::interval(period);
        loop {
            ticker.tick().await;
            let evicted = self.evict_expired().await;
            if evicted > 0 {
                info!(evicted, "evicted finished jobs");
            }
        }
    }
}

async fn run_job(
    pipeline: &Pipeline,
    job: &Job,
    source: SourceDocument,
    options: RunOptions,
    key: Option<ApiKey>,
    path: PathBuf,
) {
    let progress = JobProgress(&job.status);
    let outcome = pipeline
        .run(&source, &options, key.as_ref(), &job.cancel, &progress)
        .await;

    if let Ok(finished) = &outcome {
        let report = finished.report();
        info!(
            corrected = report.corrected_chunks,
            failed_chunks = ?report.failed_chunks,
            "run finished"
        );
    }

    let (state, report, output) = match outcome {
        Ok(RunOutcome::Completed { document, report }) => {
            match write_output(&path, &document.bytes).await {
                Ok(()) => {
                    info!(path = %path.display(), paragraphs = report.paragraphs_written, "document written");
                    (RunState::Done, Some(report), Some((path, document.format)))
                }
                Err(err) => {
                    error!(%err, "run failed");
                    (RunState::Failed { error: err.to_string() }, Some(report), None)
                }
            }
        }
        Ok(RunOutcome::NothingToWrite { report }) => {
            info!("no chunk was corrected, nothing to write");
            (RunState::NothingToWrite, Some(report), None)
        }
        Ok(RunOutcome::Cancelled { report }) => (RunState::Cancelled, Some(report), None),
        Err(err) => {
            error!(%err, "run failed");
            (RunState::Failed { error: err.to_string() }, None, None)
        }
    };

    job.status.send_modify(|status| {
        status.state = state;
        status.report = report;
        status.output = output;
        status.finished_at = Some(Instant::now());
    });
}

async fn write_output(path: &Path, bytes: &[u8]) -> Result<(), RunError> {
    if let Some(dir) = path.parent() {
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| RunError::output(format!("cannot create {}: {e}", dir.display())))?;
    }
    tokio::fs::write(path, bytes)
        .await
        .map_err(|e| RunError::output(format!("cannot write {}: {e}", path.display())))
}
