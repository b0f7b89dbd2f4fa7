use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use crate::domain::{Accession, EntityKind};
use crate::error::ScryerError;
use crate::source::RawRecord;

pub const STUDY_STATUS_OBSERVED: i64 = 1;

pub const PUBMED_SOURCE: &str = "PUBMED";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Text(String),
    Integer(i64),
}

impl Value {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(value) => Some(value),
            _ => None,
        }
    }
}

impl From<Option<String>> for Value {
    fn from(value: Option<String>) -> Self {
        value.map(Value::Text).unwrap_or(Value::Null)
    }
}

impl From<Option<i64>> for Value {
    fn from(value: Option<i64>) -> Self {
        value.map(Value::Integer).unwrap_or(Value::Null)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Text(value) => write!(f, "{value}"),
            Value::Integer(value) => write!(f, "{value}"),
        }
    }
}

pub type Row = BTreeMap<String, Value>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Study {
    pub accession: Accession,
    pub title: Option<String>,
    pub first_public: Option<String>,
    pub last_update: Option<String>,
    pub status: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Sample {
    pub accession: Accession,
    pub host: Option<String>,
    pub host_body_site: Option<String>,
    pub host_tax_id: Option<String>,
    pub environment_biome: Option<String>,
    pub last_update: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Run {
    pub accession: Accession,
    pub experiment_title: Option<String>,
    pub description: Option<String>,
    pub instrument_model: Option<String>,
    pub instrument_platform: Option<String>,
    pub library_source: Option<String>,
    pub library_layout: Option<String>,
    pub library_strategy: Option<String>,
    pub nominal_length: Option<i64>,
    pub read_count: Option<i64>,
    pub last_update: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Publication {
    pub accession: Accession,
    pub source: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Entity {
    Study(Study),
    Sample(Sample),
    Run(Run),
    Publication(Publication),
}

impl Entity {
    pub fn kind(&self) -> EntityKind {
        match self {
            Entity::Study(_) => EntityKind::Study,
            Entity::Sample(_) => EntityKind::Sample,
            Entity::Run(_) => EntityKind::Run,
            Entity::Publication(_) => EntityKind::Publication,
        }
    }

    pub fn accession(&self) -> &Accession {
        match self {
            Entity::Study(study) => &study.accession,
            Entity::Sample(sample) => &sample.accession,
            Entity::Run(run) => &run.accession,
            Entity::Publication(publication) => &publication.accession,
        }
    }

    pub fn last_update(&self) -> Option<&str> {
        match self {
            Entity::Study(study) => study.last_update.as_deref(),
            Entity::Sample(sample) => sample.last_update.as_deref(),
            Entity::Run(run) => run.last_update.as_deref(),
            Entity::Publication(_) => None,
        }
    }

    pub fn values(&self) -> Vec<Value> {
        let accession = Value::Text(self.accession().as_str().to_string());
        match self {
            Entity::Study(study) => vec![
                accession,
                study.title.clone().into(),
                study.first_public.clone().into(),
                study.last_update.clone().into(),
                Value::Integer(study.status),
            ],
            Entity::Sample(sample) => vec![
                accession,
                sample.host.clone().into(),
                sample.host_body_site.clone().into(),
                sample.host_tax_id.clone().into(),
                sample.environment_biome.clone().into(),
                sample.last_update.clone().into(),
            ],
            Entity::Run(run) => vec![
                accession,
                run.experiment_title.clone().into(),
                run.description.clone().into(),
                run.instrument_model.clone().into(),
                run.instrument_platform.clone().into(),
                run.library_source.clone().into(),
                run.library_layout.clone().into(),
                run.library_strategy.clone().into(),
                run.nominal_length.into(),
                run.read_count.into(),
                run.last_update.clone().into(),
            ],
            Entity::Publication(publication) => {
                vec![accession, Value::Text(publication.source.clone())]
            }
        }
    }

    pub fn fields(&self) -> impl Iterator<Item = (&'static str, Value)> {
        self.kind().fields().iter().copied().zip(self.values())
    }

    pub fn to_row(&self) -> Row {
        self.fields()
            .map(|(name, value)| (name.to_string(), value))
            .collect()
    }
}

impl Study {
    pub fn from_record(record: &RawRecord) -> Result<Self, ScryerError> {
        Ok(Self {
            accession: required_accession(record, "study_accession")?,
            title: record.text("study_title"),
            first_public: record.text("first_public"),
            last_update: record.text("last_updated"),
            status: STUDY_STATUS_OBSERVED,
        })
    }
}

impl Sample {
    pub fn from_record(record: &RawRecord) -> Result<Self, ScryerError> {
        Ok(Self {
            accession: required_accession(record, "sample_accession")?,
            host: record.text("host"),
            host_body_site: record.text("host_body_site"),
            host_tax_id: record.text("host_tax_id"),
            environment_biome: record.text("environment_biome"),
            last_update: record.text("last_updated"),
        })
    }
}

impl Run {
    pub fn from_record(record: &RawRecord) -> Result<Self, ScryerError> {
        Ok(Self {
            accession: required_accession(record, "run_accession")?,
            experiment_title: record.text("experiment_title"),
            description: record.text("description"),
            instrument_model: record.text("instrument_model"),
            instrument_platform: record.text("instrument_platform"),
            library_source: record.text("library_source"),
            library_layout: record.text("library_layout"),
            library_strategy: record.text("library_strategy"),
            nominal_length: integer_field(record, "nominal_length")?,
            read_count: integer_field(record, "read_count")?,
            last_update: record.text("last_updated"),
        })
    }
}

impl Publication {
    pub fn pubmed(accession: Accession) -> Self {
        Self {
            accession,
            source: PUBMED_SOURCE.to_string(),
        }
    }
}

pub fn entity_from_record(kind: EntityKind, record: &RawRecord) -> Result<Entity, ScryerError> {
    match kind {
        EntityKind::Study => Study::from_record(record).map(Entity::Study),
        EntityKind::Sample => Sample::from_record(record).map(Entity::Sample),
        EntityKind::Run => Run::from_record(record).map(Entity::Run),
        EntityKind::Publication => Err(ScryerError::MalformedPayload(
            "publications are not carried by record pages".to_string(),
        )),
    }
}

fn required_accession(record: &RawRecord, field: &str) -> Result<Accession, ScryerError> {
    record
        .text(field)
        .ok_or_else(|| ScryerError::MalformedPayload(format!("record without {field}")))?
        .parse()
}

fn integer_field(record: &RawRecord, field: &str) -> Result<Option<i64>, ScryerError> {
    record
        .text(field)
        .map(|value| {
            value.parse::<i64>().map_err(|_| {
                ScryerError::MalformedPayload(format!("{field} is not an integer: {value}"))
            })
        })
        .transpose()
}
