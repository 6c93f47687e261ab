use std::any::Any;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};

use camino::Utf8PathBuf;
use tracing::{error, info, warn};

use crate::domain::{ExportFormat, JobId, SearchQuery};
use crate::enrich::RecordStore;
use crate::error::ExportError;
use crate::pipeline::{ExportJob, ExportPipeline};
use crate::progress::{CancelFlag, ErrorInfo, JobState, JobStatus, StatusSink};
use crate::search::SearchClient;
use crate::sequence::SequenceExtractor;

struct JobEntry {
    status: JobStatus,
    cancel: CancelFlag,
    worker: Option<JoinHandle<JobStatus>>,
}

type JobTable = Arc<Mutex<HashMap<JobId, JobEntry>>>;

struct TableSink {
    jobs: JobTable,
    observer: Option<Arc<dyn StatusSink>>,
}

impl StatusSink for TableSink {
    fn publish(&self, status: &JobStatus) {
        if let Some(entry) = lock(&self.jobs).get_mut(&status.job_id) {
            if !entry.status.state.is_terminal() {
                entry.status = status.clone();
            }
        }
        if let Some(observer) = &self.observer {
            observer.publish(status);
        }
    }
}

/// In-process job table: each submitted job runs on its own worker thread and
/// its latest status can be polled at any time.
pub struct JobRegistry<S, R, X>
where
    S: SearchClient + 'static,
    R: RecordStore + 'static,
    X: SequenceExtractor + 'static,
{
    pipeline: Arc<ExportPipeline<S, R, X>>,
    jobs: JobTable,
    observer: Option<Arc<dyn StatusSink>>,
}

impl<S, R, X> JobRegistry<S, R, X>
where
    S: SearchClient + 'static,
    R: RecordStore + 'static,
    X: SequenceExtractor + 'static,
{
    pub fn new(pipeline: ExportPipeline<S, R, X>) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
            jobs: Arc::new(Mutex::new(HashMap::new())),
            observer: None,
        }
    }

    /// Additionally forwards every status update to `observer`.
    pub fn with_observer(mut self, observer: Arc<dyn StatusSink>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn submit(&self, query_url: &str, format: ExportFormat) -> Result<JobId, ExportError> {
        self.submit_with_id(JobId::generate(), query_url, format)
    }

    pub fn submit_with_id(
        &self,
        job_id: JobId,
        query_url: &str,
        format: ExportFormat,
    ) -> Result<JobId, ExportError> {
        let mut jobs = lock(&self.jobs);
        if jobs.contains_key(&job_id) {
            return Err(ExportError::InvalidRequest(format!(
                "job id already in use: {job_id}"
            )));
        }

        let query = match query_url.parse::<SearchQuery>() {
            Ok(query) => query,
            Err(err) => {
                warn!(%job_id, %err, "rejected export request");
                let mut status = JobStatus::submitted(job_id.clone(), String::new(), format);
                status.state = JobState::Failed;
                status.error = Some(ErrorInfo::from(&err));
                jobs.insert(
                    job_id.clone(),
                    JobEntry {
                        status,
                        cancel: CancelFlag::new(),
                        worker: None,
                    },
                );
                return Ok(job_id);
            }
        };

        let job = ExportJob::new(job_id.clone(), query, format);
        let cancel = CancelFlag::new();
        jobs.insert(
            job_id.clone(),
            JobEntry {
                status: job.submitted_status(),
                cancel: cancel.clone(),
                worker: None,
            },
        );
        info!(%job_id, %format, url = job.query.as_str(), "export submitted");

        let pipeline = Arc::clone(&self.pipeline);
        let table = Arc::clone(&self.jobs);
        let observer = self.observer.clone();
        let spawned = thread::Builder::new()
            .name(format!("export-{job_id}"))
            .spawn(move || {
                let sink = TableSink {
                    jobs: Arc::clone(&table),
                    observer,
                };
                let status = match panic::catch_unwind(AssertUnwindSafe(|| {
                    pipeline.run(&job, &sink, &cancel)
                })) {
                    Ok(status) => status,
                    Err(payload) => {
                        let err = ExportError::WorkerPanic(panic_message(payload.as_ref()));
                        error!(job_id = %job.job_id, %err, "export worker panicked");
                        let mut status = lock(&table)
                            .get(&job.job_id)
                            .map(|entry| entry.status.clone())
                            .unwrap_or_else(|| job.submitted_status());
                        status.state = JobState::Failed;
                        status.result_path = None;
                        status.error = Some(ErrorInfo::from(&err));
                        if let Some(observer) = &sink.observer {
                            observer.publish(&status);
                        }
                        status
                    }
                };
                if let Some(entry) = lock(&table).get_mut(&status.job_id) {
                    entry.status = status.clone();
                }
                status
            });

        match spawned {
            Ok(handle) => {
                if let Some(entry) = jobs.get_mut(&job_id) {
                    entry.worker = Some(handle);
                }
                Ok(job_id)
            }
            Err(err) => {
                jobs.remove(&job_id);
                Err(ExportError::Filesystem(format!("spawn worker: {err}")))
            }
        }
    }

    pub fn poll(&self, job_id: &JobId) -> Option<JobStatus> {
        lock(&self.jobs).get(job_id).map(|entry| entry.status.clone())
    }

    pub fn result_path(&self, job_id: &JobId) -> Result<Utf8PathBuf, ExportError> {
        let jobs = lock(&self.jobs);
        let entry = jobs
            .get(job_id)
            .ok_or_else(|| ExportError::JobNotFound(job_id.to_string()))?;
        match (&entry.status.state, &entry.status.result_path) {
            (JobState::Completed, Some(path)) => Ok(path.clone()),
            _ => Err(ExportError::ResultNotReady(job_id.to_string())),
        }
    }

    /// Requests cooperative cancellation. Returns false for unknown or finished jobs.
    pub fn cancel(&self, job_id: &JobId) -> bool {
        match lock(&self.jobs).get(job_id) {
            Some(entry) if !entry.status.state.is_terminal() => {
                entry.cancel.cancel();
                true
            }
            _ => false,
        }
    }

    /// Blocks until the job's worker has finished and returns its terminal status.
    pub fn wait(&self, job_id: &JobId) -> Result<JobStatus, ExportError> {
        let worker = {
            let mut jobs = lock(&self.jobs);
            let entry = jobs
                .get_mut(job_id)
                .ok_or_else(|| ExportError::JobNotFound(job_id.to_string()))?;
            entry.worker.take()
        };
        if let Some(handle) = worker {
            if handle.join().is_err() {
                warn!(%job_id, "export worker panicked");
                if let Some(entry) = lock(&self.jobs).get_mut(job_id) {
                    if !entry.status.state.is_terminal() {
                        let err = ExportError::WorkerPanic("worker thread exited".to_string());
                        entry.status.state = JobState::Failed;
                        entry.status.result_path = None;
                        entry.status.error = Some(ErrorInfo::from(&err));
                    }
                }
            }
        }
        self.poll(job_id)
            .ok_or_else(|| ExportError::JobNotFound(job_id.to_string()))
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn lock(jobs: &JobTable) -> MutexGuard<'_, HashMap<JobId, JobEntry>> {
    jobs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
