use std::io::{BufWriter, Write};

use camino::Utf8PathBuf;
use tracing::{debug, error, info, warn};

use crate::collector::{IdCollector, IdentifierSet};
use crate::config::ExportConfig;
use crate::domain::{ExportFormat, JobId, SearchQuery};
use crate::enrich::{RecordEnricher, RecordStore};
use crate::error::ExportError;
use crate::progress::{CancelFlag, JobStatus, JobTracker, StatusSink, percent};
use crate::search::{FIRST_CURSOR, SearchClient, SearchPage};
use crate::sequence::SequenceExtractor;
use crate::writer::{ArtifactWriter, StructuredWriter, write_id_lines};

#[derive(Debug, Clone)]
pub struct ExportJob {
    pub job_id: JobId,
    pub query: SearchQuery,
    pub format: ExportFormat,
}

impl ExportJob {
    pub fn new(job_id: JobId, query: SearchQuery, format: ExportFormat) -> Self {
        Self {
            job_id,
            query,
            format,
        }
    }

    pub fn submitted_status(&self) -> JobStatus {
        JobStatus::submitted(
            self.job_id.clone(),
            self.query.query().to_string(),
            self.format,
        )
    }
}

pub struct ExportPipeline<S: SearchClient, R: RecordStore, X: SequenceExtractor> {
    search: S,
    store: R,
    extractor: X,
    config: ExportConfig,
}

impl<S: SearchClient, R: RecordStore, X: SequenceExtractor> ExportPipeline<S, R, X> {
    pub fn new(search: S, store: R, extractor: X, config: ExportConfig) -> Self {
        Self {
            search,
            store,
            extractor,
            config,
        }
    }

    /// Runs one job to a terminal state. Failures end up on the returned status.
    pub fn run(&self, job: &ExportJob, sink: &dyn StatusSink, cancel: &CancelFlag) -> JobStatus {
        let mut tracker = JobTracker::new(job.submitted_status(), sink);
        info!(job_id = %job.job_id, format = %job.format, query = job.query.query(), "export started");
        tracker.start();

        match self.execute(job, &mut tracker, cancel) {
            Ok(path) => {
                info!(job_id = %job.job_id, path = %path, "export completed");
                tracker.complete(path);
            }
            Err(ExportError::Cancelled) => {
                info!(job_id = %job.job_id, "export cancelled");
                tracker.fail(&ExportError::Cancelled);
            }
            Err(err) => {
                error!(job_id = %job.job_id, kind = ?err.kind(), %err, "export failed");
                tracker.fail(&err);
            }
        }
        tracker.into_status()
    }

    fn execute(
        &self,
        job: &ExportJob,
        tracker: &mut JobTracker<'_>,
        cancel: &CancelFlag,
    ) -> Result<Utf8PathBuf, ExportError> {
        let ids = self.collect_ids(job, tracker, cancel)?;
        match job.format {
            ExportFormat::List => self.write_list(job, &ids),
            ExportFormat::Structured => self.write_structured(job, &ids, tracker, cancel),
            ExportFormat::Sequence => self.write_sequence(job, &ids, tracker, cancel),
        }
    }

    fn collect_ids(
        &self,
        job: &ExportJob,
        tracker: &mut JobTracker<'_>,
        cancel: &CancelFlag,
    ) -> Result<IdentifierSet, ExportError> {
        let url = job.query.url();
        cancel.check()?;
        let mut page = self.search.fetch_page(url, FIRST_CURSOR)?;
        let total_hits = page
            .total_hits
            .ok_or_else(|| ExportError::MalformedResponse("missing hitCount".to_string()))?;
        tracker.set_hit_count(total_hits);

        let mut collector = IdCollector::new(total_hits);
        let mut cursor = FIRST_CURSOR.to_string();
        let mut pages = 0usize;
        while total_hits > 0 {
            let SearchPage {
                ids, next_cursor, ..
            } = page;
            if ids.is_empty() {
                break;
            }
            pages += 1;
            tracker.set_id_pct(collector.push_page(ids));
            debug!(job_id = %job.job_id, pages, collected = collector.len(), "collected page");

            let Some(next) = next_cursor else {
                break;
            };
            if next == cursor {
                warn!(job_id = %job.job_id, %cursor, "search returned the same cursor twice, stopping");
                break;
            }
            cursor = next;
            cancel.check()?;
            page = self.search.fetch_page(url, &cursor)?;
        }

        let ids = collector.finish();
        tracker.set_id_pct(100);
        info!(job_id = %job.job_id, total_hits, unique = ids.len(), "identifier collection finished");
        Ok(ids)
    }

    fn write_list(&self, job: &ExportJob, ids: &IdentifierSet) -> Result<Utf8PathBuf, ExportError> {
        let mut artifact = ArtifactWriter::create(&self.config.results_dir, &job.job_id, job.format)?;
        write_id_lines(&mut artifact, ids.ids())?;
        artifact.persist()
    }

    fn write_structured(
        &self,
        job: &ExportJob,
        ids: &IdentifierSet,
        tracker: &mut JobTracker<'_>,
        cancel: &CancelFlag,
    ) -> Result<Utf8PathBuf, ExportError> {
        let mut artifact = ArtifactWriter::create(&self.config.results_dir, &job.job_id, job.format)?;
        let total = ids.len();
        let mut writer = StructuredWriter::begin(&mut artifact, &job.job_id)?;
        let enricher = RecordEnricher::new(&self.store, self.config.batch_size);
        enricher.enrich(ids.ids(), cancel, |records, processed| {
            for record in &records {
                writer.push(record)?;
            }
            tracker.set_enrich_pct(percent(processed, total));
            Ok(())
        })?;
        let written = writer.finish()?;
        debug!(job_id = %job.job_id, requested = total, written, "structured results written");
        tracker.set_enrich_pct(100);
        artifact.persist()
    }

    fn write_sequence(
        &self,
        job: &ExportJob,
        ids: &IdentifierSet,
        tracker: &mut JobTracker<'_>,
        cancel: &CancelFlag,
    ) -> Result<Utf8PathBuf, ExportError> {
        let mut artifact = ArtifactWriter::create(&self.config.results_dir, &job.job_id, job.format)?;
        let mut id_list = tempfile::Builder::new()
            .prefix(&format!(".{}.ids.", job.job_id))
            .suffix(".txt")
            .tempfile_in(self.config.results_dir.as_std_path())?;
        {
            let mut out = BufWriter::new(id_list.as_file_mut());
            for id in ids.ids() {
                out.write_all(id.as_bytes())?;
                out.write_all(b"\n")?;
            }
            out.flush()?;
        }
        tracker.set_extract_pct(50);

        cancel.check()?;
        if ids.is_empty() {
            debug!(job_id = %job.job_id, "no identifiers, skipping sequence extraction");
        } else {
            self.extractor.extract(id_list.path(), &mut artifact)?;
        }
        id_list.close()?;
        tracker.set_extract_pct(100);
        artifact.persist()
    }
}
