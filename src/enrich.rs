use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ExportError;
use crate::progress::CancelFlag;

pub const DEFAULT_BATCH_SIZE: usize = 1000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrichedRecord {
    pub rnacentral_id: String,
    pub taxid: Option<i64>,
    pub description: Option<String>,
    pub rna_type: Option<String>,
    pub so_rna_type: Option<String>,
    pub databases: Option<String>,
    pub secondary_structure: Option<String>,
    pub sequence: Option<String>,
}

impl EnrichedRecord {
    pub fn bare(rnacentral_id: impl Into<String>) -> Self {
        Self {
            rnacentral_id: rnacentral_id.into(),
            taxid: None,
            description: None,
            rna_type: None,
            so_rna_type: None,
            databases: None,
            secondary_structure: None,
            sequence: None,
        }
    }
}

/// Read-only bulk lookup of identifiers in the backing store.
///
/// Ids without a match are simply missing from the returned rows.
pub trait RecordStore: Send + Sync {
    fn fetch_records(&self, ids: &[String]) -> Result<Vec<EnrichedRecord>, ExportError>;
}

impl<T: RecordStore + ?Sized> RecordStore for Box<T> {
    fn fetch_records(&self, ids: &[String]) -> Result<Vec<EnrichedRecord>, ExportError> {
        (**self).fetch_records(ids)
    }
}

pub struct RecordEnricher<'a, R: RecordStore + ?Sized> {
    store: &'a R,
    batch_size: usize,
}

impl<'a, R: RecordStore + ?Sized> RecordEnricher<'a, R> {
    pub fn new(store: &'a R, batch_size: usize) -> Self {
        Self {
            store,
            batch_size: batch_size.max(1),
        }
    }

    /// Looks up `ids` one batch at a time, in order, handing each batch's rows and the
    /// number of ids processed so far to `on_batch`.
    pub fn enrich<F>(&self, ids: &[String], cancel: &CancelFlag, mut on_batch: F) -> Result<usize, ExportError>
    where
        F: FnMut(Vec<EnrichedRecord>, usize) -> Result<(), ExportError>,
    {
        let mut processed = 0usize;
        let mut produced = 0usize;
        for batch in ids.chunks(self.batch_size) {
            cancel.check()?;
            let records = self.store.fetch_records(batch)?;
            processed += batch.len();
            produced += records.len();
            debug!(
                requested = batch.len(),
                matched = records.len(),
                processed,
                "enriched batch"
            );
            on_batch(records, processed)?;
        }
        Ok(produced)
    }
}
