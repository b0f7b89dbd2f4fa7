use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ScryerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Study,
    Sample,
    Run,
    Publication,
}

const STUDY_FIELDS: &[&str] = &["accession", "title", "first_public", "last_update", "status"];

const SAMPLE_FIELDS: &[&str] = &[
    "accession",
    "host",
    "host_body_site",
    "host_tax_id",
    "environment_biome",
    "last_update",
];

const RUN_FIELDS: &[&str] = &[
    "accession",
    "experiment_title",
    "description",
    "instrument_model",
    "instrument_platform",
    "library_source",
    "library_layout",
    "library_strategy",
    "nominal_length",
    "read_count",
    "last_update",
];

const PUBLICATION_FIELDS: &[&str] = &["accession", "source"];

impl EntityKind {
    pub fn table(&self) -> &'static str {
        match self {
            EntityKind::Study => "study",
            EntityKind::Sample => "sample",
            EntityKind::Run => "run",
            EntityKind::Publication => "publication",
        }
    }

    pub fn fields(&self) -> &'static [&'static str] {
        match self {
            EntityKind::Study => STUDY_FIELDS,
            EntityKind::Sample => SAMPLE_FIELDS,
            EntityKind::Run => RUN_FIELDS,
            EntityKind::Publication => PUBLICATION_FIELDS,
        }
    }

    pub fn has_timestamp(&self) -> bool {
        self.fields().contains(&"last_update")
    }

    pub fn xref_db(&self) -> Option<&'static str> {
        match self {
            EntityKind::Sample => Some("ena-sample"),
            EntityKind::Run => Some("ena-run"),
            EntityKind::Study | EntityKind::Publication => None,
        }
    }

    pub fn child(&self) -> Option<EntityKind> {
        match self {
            EntityKind::Study => Some(EntityKind::Sample),
            EntityKind::Sample => Some(EntityKind::Run),
            EntityKind::Run | EntityKind::Publication => None,
        }
    }

    pub fn all() -> [EntityKind; 4] {
        [
            EntityKind::Study,
            EntityKind::Sample,
            EntityKind::Run,
            EntityKind::Publication,
        ]
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.table())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Accession(String);

impl Accession {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn namespace(&self) -> AccessionNamespace {
        if self.0.starts_with("PRJ") {
            AccessionNamespace::Project
        } else {
            AccessionNamespace::Study
        }
    }
}

impl fmt::Display for Accession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Accession {
    type Err = ScryerError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim();
        let is_valid = !normalized.is_empty()
            && normalized
                .chars()
                .all(|ch| ch.is_ascii_alphanumeric() || ch == '_' || ch == '.');
        if !is_valid {
            return Err(ScryerError::InvalidAccession(value.to_string()));
        }
        Ok(Self(normalized.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessionNamespace {
    Project,
    Study,
}

impl fmt::Display for AccessionNamespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccessionNamespace::Project => write!(f, "project"),
            AccessionNamespace::Study => write!(f, "study"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Partition {
    pub tax_id: u32,
    pub label: String,
}

impl Partition {
    pub fn new(tax_id: u32, label: &str) -> Self {
        Self {
            tax_id,
            label: label.to_string(),
        }
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tax_tree({}) [{}]", self.tax_id, self.label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceMode {
    #[default]
    Flat,
    Linked,
}

pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Some(parsed.with_timezone(&Utc));
    }
    for pattern in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(value, pattern) {
            return Some(parsed.and_utc());
        }
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|parsed| parsed.and_utc())
}

/// Ordering rule for `last_update` values: `incoming` wins when it is strictly
/// later than `current`, or when `current` has no usable timestamp at all. An
/// unparseable `incoming` never beats a readable `current`.
pub fn is_newer(incoming: Option<&str>, current: Option<&str>) -> bool {
    match (incoming.and_then(parse_timestamp), current.and_then(parse_timestamp)) {
        (Some(incoming), Some(current)) => incoming > current,
        (_, None) => true,
        (None, Some(_)) => false,
    }
}

pub fn format_timestamp(value: &DateTime<Utc>) -> String {
    value.to_rfc3339()
}
