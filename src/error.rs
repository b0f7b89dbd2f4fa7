use std::path::PathBuf;

use miette::Diagnostic;
use serde::Serialize;
use thiserror::Error;

use crate::domain::EntityKind;

#[derive(Debug, Error, Diagnostic)]
pub enum ScryerError {
    #[error("invalid accession: {0}")]
    InvalidAccession(String),

    #[error("invalid cross-reference range: {0}")]
    InvalidRange(String),

    #[error("{kind} {accession} referenced by {parent} is missing from the linked records")]
    MissingLinkedEntity {
        kind: EntityKind,
        accession: String,
        parent: String,
    },

    #[error("malformed remote payload: {0}")]
    MalformedPayload(String),

    #[error("{kind} {accession} already exists")]
    DuplicateKey { kind: EntityKind, accession: String },

    #[error("{kind} {accession} does not exist")]
    NotFound { kind: EntityKind, accession: String },

    #[error("no join relation between {parent} and {child}")]
    InvalidLink { parent: EntityKind, child: EntityKind },

    #[error("ENA request failed: {0}")]
    EnaHttp(String),

    #[error("ENA returned status {status}: {message}")]
    EnaStatus { status: u16, message: String },

    #[error("database error: {0}")]
    Database(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("unsupported config schema version: {0}")]
    UnsupportedSchema(u32),
}

impl ScryerError {
    pub fn is_transport(&self) -> bool {
        matches!(self, ScryerError::EnaHttp(_) | ScryerError::EnaStatus { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntityFailure {
    pub kind: EntityKind,
    pub accession: Option<String>,
    pub error: String,
}

impl EntityFailure {
    pub fn new(kind: EntityKind, accession: Option<&str>, error: &ScryerError) -> Self {
        Self {
            kind,
            accession: accession.map(str::to_string),
            error: error.to_string(),
        }
    }
}

impl From<rusqlite::Error> for ScryerError {
    fn from(err: rusqlite::Error) -> Self {
        ScryerError::Database(err.to_string())
    }
}
