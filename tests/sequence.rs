#![cfg(unix)]

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use assert_matches::assert_matches;
use camino::Utf8PathBuf;
use flate2::read::GzDecoder;
use reqwest::Url;

use rnacentral_export::config::ExportConfig;
use rnacentral_export::domain::{ExportFormat, JobId};
use rnacentral_export::enrich::{EnrichedRecord, RecordStore};
use rnacentral_export::error::{ExportError, FailureKind};
use rnacentral_export::pipeline::{ExportJob, ExportPipeline};
use rnacentral_export::progress::{CancelFlag, JobState, JobStatus, NoopSink};
use rnacentral_export::search::{SearchClient, SearchPage};
use rnacentral_export::sequence::{EslSfetchExtractor, SequenceExtractor};

const URL: &str = "https://www.ebi.ac.uk/ebisearch/ws/rest/rnacentral?query=mirbase&format=json";

struct OnePage(Vec<&'static str>);

impl SearchClient for OnePage {
    fn fetch_page(&self, _base_url: &Url, cursor: &str) -> Result<SearchPage, ExportError> {
        let ids = if cursor == "0" {
            self.0.iter().map(|id| id.to_string()).collect()
        } else {
            Vec::new()
        };
        Ok(SearchPage {
            ids,
            next_cursor: Some("end".to_string()),
            total_hits: Some(self.0.len() as u64),
        })
    }
}

struct NoStore;

impl RecordStore for NoStore {
    fn fetch_records(&self, _ids: &[String]) -> Result<Vec<EnrichedRecord>, ExportError> {
        Ok(Vec::new())
    }
}

/// `sh -f <script> <id list>`: the reference fasta slot carries the script path,
/// so the extractor's argument layout drives a shell script without exec bits.
fn script_extractor(dir: &Path, body: &str) -> EslSfetchExtractor {
    let script = dir.join("fake-sfetch.sh");
    fs::write(&script, body).unwrap();
    EslSfetchExtractor::new(
        Utf8PathBuf::from("/bin/sh"),
        Utf8PathBuf::from_path_buf(script).unwrap(),
    )
}

fn run_sequence_job<X: SequenceExtractor>(
    results: &Path,
    ids: Vec<&'static str>,
    extractor: X,
) -> JobStatus {
    let config = ExportConfig {
        results_dir: Utf8PathBuf::from_path_buf(results.to_path_buf()).unwrap(),
        ..ExportConfig::default()
    };
    let pipeline = ExportPipeline::new(OnePage(ids), NoStore, extractor, config);
    let job = ExportJob::new(JobId::generate(), URL.parse().unwrap(), ExportFormat::Sequence);
    pipeline.run(&job, &NoopSink, &CancelFlag::new())
}

fn entries(dir: &Path) -> Vec<PathBuf> {
    fs::read_dir(dir)
        .map(|entries| entries.map(|entry| entry.unwrap().path()).collect())
        .unwrap_or_default()
}

#[test]
fn failing_extractor_reports_stderr_and_cleans_up() {
    let scratch = tempfile::tempdir().unwrap();
    let results = tempfile::tempdir().unwrap();
    let seen = scratch.path().join("seen-path");
    let copy = scratch.path().join("seen-ids");
    let body = format!(
        "printf '%s' \"$1\" > '{}'\ncp \"$1\" '{}'\necho 'id not found' >&2\nexit 1\n",
        seen.display(),
        copy.display()
    );
    let extractor = script_extractor(scratch.path(), &body);

    let status = run_sequence_job(results.path(), vec!["URS0000000001_9606"], extractor);

    assert_eq!(status.state, JobState::Failed);
    let error = status.error.unwrap();
    assert_eq!(error.kind, FailureKind::ExtractionFailure);
    assert!(error.message.contains("id not found"), "{}", error.message);
    assert_eq!(fs::read_to_string(&copy).unwrap(), "URS0000000001_9606\n");

    let id_list = PathBuf::from(fs::read_to_string(&seen).unwrap());
    assert!(id_list.starts_with(results.path()));
    assert!(!id_list.exists());
    assert!(status.result_path.is_none());
    assert!(entries(results.path()).is_empty());
}

#[test]
fn stderr_output_fails_even_on_zero_exit() {
    let scratch = tempfile::tempdir().unwrap();
    let results = tempfile::tempdir().unwrap();
    let extractor = script_extractor(scratch.path(), "echo '>URS1'\necho 'warning: truncated' >&2\n");

    let status = run_sequence_job(results.path(), vec!["URS1"], extractor);

    assert_eq!(status.state, JobState::Failed);
    let error = status.error.unwrap();
    assert_eq!(error.kind, FailureKind::ExtractionFailure);
    assert!(error.message.ends_with("warning: truncated"), "{}", error.message);
    assert!(entries(results.path()).is_empty());
}

#[test]
fn extractor_stdout_becomes_the_fasta_artifact() {
    let scratch = tempfile::tempdir().unwrap();
    let results = tempfile::tempdir().unwrap();
    let extractor = script_extractor(
        scratch.path(),
        "while read id; do printf '>%s\\nACGU\\n' \"$id\"; done < \"$1\"\n",
    );

    let status = run_sequence_job(results.path(), vec!["URS1", "URS2"], extractor);

    assert_eq!(status.state, JobState::Completed, "{:?}", status.error);
    assert_eq!(status.progress.extract_pct(), Some(100));
    let path = status.result_path.unwrap();
    assert!(path.as_str().ends_with(".fasta.gz"));

    let mut text = String::new();
    GzDecoder::new(fs::File::open(path.as_std_path()).unwrap())
        .read_to_string(&mut text)
        .unwrap();
    assert_eq!(text, ">URS1\nACGU\n>URS2\nACGU\n");
    assert_eq!(entries(results.path()), vec![path.into_std_path_buf()]);
}

#[test]
fn missing_binary_is_an_extraction_failure() {
    let scratch = tempfile::tempdir().unwrap();
    let extractor = EslSfetchExtractor::new(
        Utf8PathBuf::from("/nonexistent/esl-sfetch"),
        Utf8PathBuf::from("/nonexistent/rnacentral.fasta"),
    );
    let id_list = scratch.path().join("ids.txt");
    fs::write(&id_list, "URS1\n").unwrap();

    let mut out = Vec::new();
    let err = extractor.extract(&id_list, &mut out).unwrap_err();
    assert_matches!(err, ExportError::ExtractionFailure(message) if message.contains("/nonexistent/esl-sfetch"));
    assert!(out.is_empty());
}
