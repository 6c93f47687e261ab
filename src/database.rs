use std::time::Duration;

use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use tokio::runtime::{Builder, Runtime};

use crate::enrich::{EnrichedRecord, RecordStore};
use crate::error::ExportError;

const RECORDS_QUERY: &str = r#"
SELECT
    pre.id AS rnacentral_id,
    pre.taxid::bigint AS taxid,
    pre.description,
    pre.rna_type,
    pre.so_rna_type,
    pre.databases,
    r2dt.secondary_structure,
    COALESCE(rna.seq_short, rna.seq_long) AS sequence
FROM rnc_rna_precomputed pre
JOIN rna ON rna.upi = pre.upi
-- not every sequence has an R2DT layout; those rows export with a null secondary_structure
LEFT JOIN r2dt_results r2dt ON r2dt.urs = pre.upi
WHERE pre.id = ANY($1)
"#;

/// Postgres-backed record lookup. Owns a small runtime so the rest of the
/// pipeline can stay blocking.
pub struct PostgresRecordStore {
    runtime: Runtime,
    pool: PgPool,
}

impl PostgresRecordStore {
    pub fn connect_lazy(database_url: &str) -> Result<Self, ExportError> {
        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|err| ExportError::EnrichmentFailure(err.to_string()))?;
        let pool = {
            let _guard = runtime.enter();
            PgPoolOptions::new()
                .max_connections(2)
                .acquire_timeout(Duration::from_secs(30))
                .connect_lazy(database_url)
                .map_err(|err| ExportError::EnrichmentFailure(err.to_string()))?
        };
        Ok(Self { runtime, pool })
    }
}

impl RecordStore for PostgresRecordStore {
    fn fetch_records(&self, ids: &[String]) -> Result<Vec<EnrichedRecord>, ExportError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = self
            .runtime
            .block_on(
                sqlx::query(RECORDS_QUERY)
                    .bind(ids.to_vec())
                    .fetch_all(&self.pool),
            )
            .map_err(|err| ExportError::EnrichmentFailure(err.to_string()))?;
        rows.iter().map(record_from_row).collect()
    }
}

fn record_from_row(row: &PgRow) -> Result<EnrichedRecord, ExportError> {
    let map_err = |err: sqlx::Error| ExportError::EnrichmentFailure(err.to_string());
    Ok(EnrichedRecord {
        rnacentral_id: row.try_get("rnacentral_id").map_err(map_err)?,
        taxid: row.try_get("taxid").map_err(map_err)?,
        description: row.try_get("description").map_err(map_err)?,
        rna_type: row.try_get("rna_type").map_err(map_err)?,
        so_rna_type: row.try_get("so_rna_type").map_err(map_err)?,
        databases: row.try_get("databases").map_err(map_err)?,
        secondary_structure: row.try_get("secondary_structure").map_err(map_err)?,
        sequence: row.try_get("sequence").map_err(map_err)?,
    })
}
