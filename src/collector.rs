use std::collections::HashSet;

use tracing::info;

use crate::progress::{ID_PCT_CAP, percent};

/// Accumulates identifiers across search pages.
#[derive(Debug, Default)]
pub struct IdCollector {
    ids: Vec<String>,
    total_hits: u64,
    id_pct: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentifierSet {
    ids: Vec<String>,
    duplicates: usize,
}

impl IdCollector {
    pub fn new(total_hits: u64) -> Self {
        Self {
            ids: Vec::new(),
            total_hits,
            id_pct: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn id_pct(&self) -> u8 {
        self.id_pct
    }

    /// Adds one page of ids and returns the updated, capped percentage.
    pub fn push_page<I>(&mut self, ids: I) -> u8
    where
        I: IntoIterator<Item = String>,
    {
        self.ids.extend(ids);
        let total = usize::try_from(self.total_hits).unwrap_or(usize::MAX);
        let pct = percent(self.ids.len(), total).min(ID_PCT_CAP);
        self.id_pct = self.id_pct.max(pct);
        self.id_pct
    }

    pub fn finish(self) -> IdentifierSet {
        let collected = self.ids.len();
        let mut seen = HashSet::with_capacity(collected);
        let ids: Vec<String> = self
            .ids
            .into_iter()
            .filter(|id| seen.insert(id.clone()))
            .collect();
        let duplicates = collected - ids.len();
        if duplicates > 0 {
            info!(
                collected,
                unique = ids.len(),
                duplicates,
                "removed duplicate identifiers"
            );
        }
        IdentifierSet { ids, duplicates }
    }
}

impl IdentifierSet {
    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn duplicates(&self) -> usize {
        self.duplicates
    }
}
