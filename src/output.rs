use std::io::{self, Write};
use std::sync::Mutex;

use serde::Serialize;
use tracing::info;

use crate::progress::{JobState, JobStatus, ProgressSnapshot, StatusSink};

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_status(status: &JobStatus) -> io::Result<()> {
        Self::print_json(status)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

/// Logs a line whenever the state or any percentage of a job changes.
#[derive(Default)]
pub struct LogSink {
    last: Mutex<Option<(JobState, ProgressSnapshot)>>,
}

impl StatusSink for LogSink {
    fn publish(&self, status: &JobStatus) {
        let current = (status.state, status.progress);
        let mut last = self.last.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if last.as_ref() == Some(&current) {
            return;
        }
        *last = Some(current);
        info!(
            job_id = %status.job_id,
            state = ?status.state,
            hit_count = ?status.hit_count,
            id_pct = status.progress.id_pct,
            enrich_pct = ?status.progress.enrich_pct(),
            extract_pct = ?status.progress.extract_pct(),
            "progress"
        );
    }
}
