use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::domain::{Accession, AccessionNamespace, EntityKind, Partition};
use crate::error::ScryerError;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawRecord {
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
    #[serde(default)]
    pub xrefs: BTreeMap<String, String>,
}

impl RawRecord {
    pub fn from_pairs(pairs: &[(&str, &str)]) -> Self {
        Self {
            fields: pairs
                .iter()
                .map(|(key, value)| (key.to_string(), value.to_string()))
                .collect(),
            xrefs: BTreeMap::new(),
        }
    }

    pub fn with_xref(mut self, db: &str, expression: &str) -> Self {
        self.xrefs.insert(db.to_string(), expression.to_string());
        self
    }

    pub fn text(&self, field: &str) -> Option<String> {
        self.fields
            .get(field)
            .map(|value| value.trim())
            .filter(|value| !value.is_empty())
            .map(str::to_string)
    }

    pub fn xref(&self, db: &str) -> Option<&str> {
        self.xrefs
            .get(db)
            .map(|value| value.trim())
            .filter(|value| !value.is_empty())
    }

    pub fn accession(&self, kind: EntityKind) -> Option<String> {
        self.text(accession_field(kind))
    }
}

pub fn accession_field(kind: EntityKind) -> &'static str {
    match kind {
        EntityKind::Study => "study_accession",
        EntityKind::Sample => "sample_accession",
        EntityKind::Run => "run_accession",
        EntityKind::Publication => "pubmed_id",
    }
}

pub trait RecordSource: Send + Sync {
    fn paged_records(
        &self,
        partition: &Partition,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<RawRecord>, ScryerError>;

    fn linked_records(
        &self,
        kind: EntityKind,
        expression: &str,
    ) -> Result<Vec<RawRecord>, ScryerError>;
}

pub trait CitationSource: Send + Sync {
    fn citation_ids(
        &self,
        namespace: AccessionNamespace,
        accessions: &[Accession],
    ) -> Result<Vec<(Accession, String)>, ScryerError>;
}
