use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

use crate::domain::{ExportFormat, JobId};
use crate::error::{ExportError, FailureKind};

/// Identifier collection never reports more than this until it has fully drained.
pub const ID_PCT_CAP: u8 = 95;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    Submitted,
    Running,
    Completed,
    Failed,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StageProgress {
    Structured { enrich_pct: u8 },
    Sequence { extract_pct: u8 },
    List {},
}

impl StageProgress {
    pub fn for_format(format: ExportFormat) -> Self {
        match format {
            ExportFormat::List => StageProgress::List {},
            ExportFormat::Structured => StageProgress::Structured { enrich_pct: 0 },
            ExportFormat::Sequence => StageProgress::Sequence { extract_pct: 0 },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub id_pct: u8,
    #[serde(flatten)]
    pub stage: StageProgress,
}

impl ProgressSnapshot {
    pub fn new(format: ExportFormat) -> Self {
        Self {
            id_pct: 0,
            stage: StageProgress::for_format(format),
        }
    }

    pub fn enrich_pct(&self) -> Option<u8> {
        match self.stage {
            StageProgress::Structured { enrich_pct } => Some(enrich_pct),
            _ => None,
        }
    }

    pub fn extract_pct(&self) -> Option<u8> {
        match self.stage {
            StageProgress::Sequence { extract_pct } => Some(extract_pct),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub kind: FailureKind,
    pub message: String,
}

impl From<&ExportError> for ErrorInfo {
    fn from(err: &ExportError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// Everything a poller may observe about one job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStatus {
    pub job_id: JobId,
    pub state: JobState,
    pub query: String,
    pub format: ExportFormat,
    pub hit_count: Option<u64>,
    pub progress: ProgressSnapshot,
    pub result_path: Option<Utf8PathBuf>,
    pub error: Option<ErrorInfo>,
}

impl JobStatus {
    pub fn submitted(job_id: JobId, query: String, format: ExportFormat) -> Self {
        Self {
            job_id,
            state: JobState::Submitted,
            query,
            format,
            hit_count: None,
            progress: ProgressSnapshot::new(format),
            result_path: None,
            error: None,
        }
    }
}

pub trait StatusSink: Send + Sync {
    fn publish(&self, status: &JobStatus);
}

pub struct NoopSink;

impl StatusSink for NoopSink {
    fn publish(&self, _status: &JobStatus) {}
}

#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn check(&self) -> Result<(), ExportError> {
        if self.is_cancelled() {
            return Err(ExportError::Cancelled);
        }
        Ok(())
    }
}

/// Owns the mutable status of a running job and pushes every change to a sink.
///
/// Percentages only ever move forward, and nothing changes once the job is terminal.
pub struct JobTracker<'a> {
    status: JobStatus,
    sink: &'a dyn StatusSink,
}

impl<'a> JobTracker<'a> {
    pub fn new(status: JobStatus, sink: &'a dyn StatusSink) -> Self {
        Self { status, sink }
    }

    pub fn status(&self) -> &JobStatus {
        &self.status
    }

    pub fn into_status(self) -> JobStatus {
        self.status
    }

    pub fn start(&mut self) {
        if self.status.state == JobState::Submitted {
            self.status.state = JobState::Running;
            self.publish();
        }
    }

    pub fn set_hit_count(&mut self, hit_count: u64) {
        if self.status.state.is_terminal() {
            return;
        }
        self.status.hit_count = Some(hit_count);
        self.enter_running();
        self.publish();
    }

    pub fn set_id_pct(&mut self, pct: u8) {
        if self.status.state.is_terminal() {
            return;
        }
        let pct = pct.min(100);
        if pct > self.status.progress.id_pct {
            self.status.progress.id_pct = pct;
        }
        self.enter_running();
        self.publish();
    }

    pub fn set_enrich_pct(&mut self, pct: u8) {
        if self.status.state.is_terminal() {
            return;
        }
        if let StageProgress::Structured { enrich_pct } = &mut self.status.progress.stage {
            *enrich_pct = (*enrich_pct).max(pct.min(100));
        }
        self.enter_running();
        self.publish();
    }

    pub fn set_extract_pct(&mut self, pct: u8) {
        if self.status.state.is_terminal() {
            return;
        }
        if let StageProgress::Sequence { extract_pct } = &mut self.status.progress.stage {
            *extract_pct = (*extract_pct).max(pct.min(100));
        }
        self.enter_running();
        self.publish();
    }

    pub fn complete(&mut self, result_path: Utf8PathBuf) {
        if self.status.state.is_terminal() {
            return;
        }
        self.status.state = JobState::Completed;
        self.status.result_path = Some(result_path);
        self.publish();
    }

    pub fn fail(&mut self, err: &ExportError) {
        if self.status.state.is_terminal() {
            return;
        }
        self.status.state = JobState::Failed;
        self.status.result_path = None;
        self.status.error = Some(ErrorInfo::from(err));
        self.publish();
    }

    fn enter_running(&mut self) {
        if self.status.state == JobState::Submitted {
            self.status.state = JobState::Running;
        }
    }

    fn publish(&self) {
        self.sink.publish(&self.status);
    }
}

/// Round-to-nearest percentage, 0 when nothing is expected.
pub fn percent(done: usize, total: usize) -> u8 {
    if total == 0 {
        return 0;
    }
    let done = done.min(total) as u128;
    let total = total as u128;
    ((done * 100 + total / 2) / total) as u8
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<JobStatus>>,
    }

    impl StatusSink for Recorder {
        fn publish(&self, status: &JobStatus) {
            self.seen.lock().unwrap().push(status.clone());
        }
    }

    fn submitted(format: ExportFormat) -> JobStatus {
        JobStatus::submitted("job-1".parse().unwrap(), "q".to_string(), format)
    }

    #[test]
    fn percent_rounds_to_nearest() {
        assert_eq!(percent(1, 3), 33);
        assert_eq!(percent(2, 3), 67);
        assert_eq!(percent(5, 5), 100);
        assert_eq!(percent(7, 5), 100);
        assert_eq!(percent(3, 0), 0);
    }

    #[test]
    fn id_pct_never_decreases() {
        let recorder = Recorder::default();
        let mut tracker = JobTracker::new(submitted(ExportFormat::List), &recorder);
        tracker.set_id_pct(40);
        tracker.set_id_pct(20);
        assert_eq!(tracker.status().progress.id_pct, 40);
        assert_eq!(tracker.status().state, JobState::Running);
    }

    #[test]
    fn terminal_state_is_sticky() {
        let recorder = Recorder::default();
        let mut tracker = JobTracker::new(submitted(ExportFormat::List), &recorder);
        tracker.fail(&ExportError::Cancelled);
        tracker.complete(Utf8PathBuf::from("x.txt.gz"));
        tracker.set_id_pct(100);
        let status = tracker.into_status();
        assert_eq!(status.state, JobState::Failed);
        assert!(status.result_path.is_none());
        assert_eq!(recorder.seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn stage_fields_follow_format() {
        let list = serde_json::to_value(ProgressSnapshot::new(ExportFormat::List)).unwrap();
        assert_eq!(list, serde_json::json!({ "id_pct": 0 }));

        let json = serde_json::to_value(ProgressSnapshot::new(ExportFormat::Structured)).unwrap();
        assert_eq!(json, serde_json::json!({ "id_pct": 0, "enrich_pct": 0 }));

        let fasta = serde_json::to_value(ProgressSnapshot::new(ExportFormat::Sequence)).unwrap();
        assert_eq!(fasta, serde_json::json!({ "id_pct": 0, "extract_pct": 0 }));
    }

    #[test]
    fn enrich_pct_is_inert_for_list_jobs() {
        let recorder = Recorder::default();
        let mut tracker = JobTracker::new(submitted(ExportFormat::List), &recorder);
        tracker.set_enrich_pct(50);
        assert_eq!(tracker.status().progress.enrich_pct(), None);
        assert_eq!(tracker.status().progress.extract_pct(), None);
    }
}
