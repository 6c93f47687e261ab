use std::fs;
use std::io::{BufWriter, Write};

use camino::{Utf8Path, Utf8PathBuf};
use flate2::Compression;
use flate2::write::GzEncoder;
use serde::Serialize;
use tempfile::NamedTempFile;

use crate::domain::{ExportFormat, JobId};
use crate::enrich::EnrichedRecord;
use crate::error::ExportError;

pub const SCHEMA_VERSION: &str = "1.0";

pub fn artifact_path(results_dir: &Utf8Path, job_id: &JobId, format: ExportFormat) -> Utf8PathBuf {
    results_dir.join(format!("{job_id}.{}", format.extension()))
}

/// A gzip stream into a hidden temporary file next to the final artifact.
///
/// The file only appears under its final name after `persist`; dropping the
/// writer on any other path removes the partial file.
pub struct ArtifactWriter {
    encoder: GzEncoder<BufWriter<NamedTempFile>>,
    final_path: Utf8PathBuf,
}

impl ArtifactWriter {
    pub fn create(results_dir: &Utf8Path, job_id: &JobId, format: ExportFormat) -> Result<Self, ExportError> {
        fs::create_dir_all(results_dir.as_std_path())
            .map_err(|err| ExportError::Filesystem(format!("create {results_dir}: {err}")))?;
        let temp = tempfile::Builder::new()
            .prefix(&format!(".{job_id}."))
            .suffix(".partial")
            .tempfile_in(results_dir.as_std_path())
            .map_err(|err| ExportError::Filesystem(err.to_string()))?;
        Ok(Self {
            encoder: GzEncoder::new(BufWriter::new(temp), Compression::default()),
            final_path: artifact_path(results_dir, job_id, format),
        })
    }

    pub fn persist(self) -> Result<Utf8PathBuf, ExportError> {
        let buffered = self.encoder.finish()?;
        let temp = buffered
            .into_inner()
            .map_err(|err| ExportError::Filesystem(err.error().to_string()))?;
        temp.as_file().sync_all()?;
        temp.persist(self.final_path.as_std_path())
            .map_err(|err| ExportError::Filesystem(err.error.to_string()))?;
        Ok(self.final_path)
    }
}

impl Write for ArtifactWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.encoder.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.encoder.flush()
    }
}

pub fn write_id_lines<W: Write>(out: &mut W, ids: &[String]) -> Result<(), ExportError> {
    for (index, id) in ids.iter().enumerate() {
        if index > 0 {
            out.write_all(b"\n")?;
        }
        out.write_all(id.as_bytes())?;
    }
    Ok(())
}

#[derive(Debug, Serialize)]
pub struct License {
    pub name: &'static str,
    pub url: &'static str,
}

pub const RNACENTRAL_LICENSE: License = License {
    name: "CC0 1.0",
    url: "https://creativecommons.org/publicdomain/zero/1.0/",
};

#[derive(Debug, Serialize)]
struct Envelope<'a> {
    job_id: &'a JobId,
    schema_version: &'static str,
    license: &'a License,
    downloaded_at: String,
}

/// Writes `{ ...metadata, "results": [ ... ] }` one element at a time.
pub struct StructuredWriter<'w, W: Write> {
    out: &'w mut W,
    written: usize,
}

impl<'w, W: Write> StructuredWriter<'w, W> {
    pub fn begin(out: &'w mut W, job_id: &JobId) -> Result<Self, ExportError> {
        let envelope = Envelope {
            job_id,
            schema_version: SCHEMA_VERSION,
            license: &RNACENTRAL_LICENSE,
            downloaded_at: chrono::Utc::now().to_rfc3339(),
        };
        let header = serde_json::to_value(&envelope)
            .map_err(|err| ExportError::Filesystem(err.to_string()))?;
        out.write_all(b"{")?;
        if let serde_json::Value::Object(fields) = header {
            for (key, value) in fields {
                serde_json::to_writer(&mut *out, &key)
                    .map_err(|err| ExportError::Filesystem(err.to_string()))?;
                out.write_all(b":")?;
                serde_json::to_writer(&mut *out, &value)
                    .map_err(|err| ExportError::Filesystem(err.to_string()))?;
                out.write_all(b",")?;
            }
        }
        out.write_all(b"\"results\":[")?;
        Ok(Self { out, written: 0 })
    }

    pub fn push(&mut self, record: &EnrichedRecord) -> Result<(), ExportError> {
        if self.written > 0 {
            self.out.write_all(b",")?;
        }
        serde_json::to_writer(&mut *self.out, record)
            .map_err(|err| ExportError::Filesystem(err.to_string()))?;
        self.written += 1;
        Ok(())
    }

    pub fn finish(self) -> Result<usize, ExportError> {
        self.out.write_all(b"]}")?;
        Ok(self.written)
    }
}
