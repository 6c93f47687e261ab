use std::ffi::OsString;
use std::io::{self, Read, Write};
use std::path::Path;
use std::process::{Command, Stdio};
use std::thread;

use camino::Utf8PathBuf;
use tracing::{debug, error};

use crate::config::SequenceConfig;
use crate::error::ExportError;

/// Fetches sequences for every id listed (one per line) in `id_list`.
pub trait SequenceExtractor: Send + Sync {
    fn extract(&self, id_list: &Path, out: &mut dyn Write) -> Result<(), ExportError>;
}

impl<T: SequenceExtractor + ?Sized> SequenceExtractor for Box<T> {
    fn extract(&self, id_list: &Path, out: &mut dyn Write) -> Result<(), ExportError> {
        (**self).extract(id_list, out)
    }
}

/// Runs `esl-sfetch -f <fasta> <id list>` and streams its stdout into `out`.
#[derive(Debug, Clone)]
pub struct EslSfetchExtractor {
    binary: Utf8PathBuf,
    fasta: Utf8PathBuf,
}

impl EslSfetchExtractor {
    pub fn new(binary: Utf8PathBuf, fasta: Utf8PathBuf) -> Self {
        Self { binary, fasta }
    }

    pub fn from_config(config: &SequenceConfig) -> Result<Self, ExportError> {
        let fasta = config.fasta.clone().ok_or_else(|| {
            ExportError::ExtractionFailure("no reference fasta configured".to_string())
        })?;
        Ok(Self::new(config.esl_binary.clone(), fasta))
    }

    pub fn args(&self, id_list: &Path) -> Vec<OsString> {
        vec![
            OsString::from("-f"),
            OsString::from(self.fasta.as_str()),
            id_list.as_os_str().to_os_string(),
        ]
    }
}

impl SequenceExtractor for EslSfetchExtractor {
    fn extract(&self, id_list: &Path, out: &mut dyn Write) -> Result<(), ExportError> {
        let args = self.args(id_list);
        debug!(binary = %self.binary, ?args, "running sequence extraction");
        let mut child = Command::new(self.binary.as_std_path())
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| ExportError::ExtractionFailure(format!("{}: {err}", self.binary)))?;

        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| ExportError::ExtractionFailure("stderr not captured".to_string()))?;
        let stderr_reader = thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = stderr.read_to_end(&mut buf);
            buf
        });

        let copied = match child.stdout.take() {
            Some(mut stdout) => io::copy(&mut stdout, out).map(|_| ()),
            None => Err(io::Error::other("stdout not captured")),
        };
        if copied.is_err() {
            let _ = child.kill();
        }
        let status = child
            .wait()
            .map_err(|err| ExportError::ExtractionFailure(err.to_string()))?;
        let stderr = stderr_reader.join().unwrap_or_default();
        let diagnostic = String::from_utf8_lossy(&stderr).trim().to_string();

        copied.map_err(|err| ExportError::Filesystem(err.to_string()))?;
        if !status.success() || !diagnostic.is_empty() {
            let message = if diagnostic.is_empty() {
                format!("{} exited with {status}", self.binary)
            } else {
                diagnostic
            };
            error!(binary = %self.binary, %message, "sequence extraction failed");
            return Err(ExportError::ExtractionFailure(message));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn args_are_passed_as_separate_values() {
        let extractor = EslSfetchExtractor::new(
            Utf8PathBuf::from("/opt/infernal/bin/esl-sfetch"),
            Utf8PathBuf::from("/data/rnacentral.fasta"),
        );
        let args = extractor.args(Path::new("/tmp/ids; rm -rf /"));
        assert_eq!(
            args,
            vec![
                OsString::from("-f"),
                OsString::from("/data/rnacentral.fasta"),
                OsString::from("/tmp/ids; rm -rf /"),
            ]
        );
    }

    #[test]
    fn missing_fasta_is_an_extraction_failure() {
        let err = EslSfetchExtractor::from_config(&SequenceConfig::default()).unwrap_err();
        assert!(matches!(err, ExportError::ExtractionFailure(_)));
    }
}
