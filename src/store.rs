use camino::Utf8Path;
use chrono::{DateTime, Utc};
use rusqlite::types::{ToSqlOutput, ValueRef};
use rusqlite::{Connection, ErrorCode, OptionalExtension, ToSql, params};

use crate::domain::{Accession, EntityKind, format_timestamp, parse_timestamp};
use crate::entity::{Entity, Row, Value};
use crate::error::ScryerError;

pub trait Store {
    fn lookup(&self, kind: EntityKind, accession: &Accession) -> Result<Option<Row>, ScryerError>;

    fn insert(&mut self, entity: &Entity) -> Result<(), ScryerError>;

    fn update(
        &mut self,
        kind: EntityKind,
        accession: &Accession,
        changes: &[(&'static str, Value)],
    ) -> Result<(), ScryerError>;

    fn link_exists(
        &self,
        parent: EntityKind,
        child: EntityKind,
        parent_id: &Accession,
        child_id: &Accession,
    ) -> Result<bool, ScryerError>;

    fn insert_link(
        &mut self,
        parent: EntityKind,
        child: EntityKind,
        parent_id: &Accession,
        child_id: &Accession,
    ) -> Result<(), ScryerError>;

    fn load_watermark(&self) -> Result<Option<DateTime<Utc>>, ScryerError>;

    fn store_watermark(&mut self, watermark: DateTime<Utc>) -> Result<(), ScryerError>;
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS study (
    accession TEXT PRIMARY KEY,
    title TEXT,
    first_public TEXT,
    last_update TEXT,
    status INTEGER
);
CREATE TABLE IF NOT EXISTS sample (
    accession TEXT PRIMARY KEY,
    host TEXT,
    host_body_site TEXT,
    host_tax_id TEXT,
    environment_biome TEXT,
    last_update TEXT
);
CREATE TABLE IF NOT EXISTS run (
    accession TEXT PRIMARY KEY,
    experiment_title TEXT,
    description TEXT,
    instrument_model TEXT,
    instrument_platform TEXT,
    library_source TEXT,
    library_layout TEXT,
    library_strategy TEXT,
    nominal_length INTEGER,
    read_count INTEGER,
    last_update TEXT
);
CREATE TABLE IF NOT EXISTS publication (
    accession TEXT PRIMARY KEY,
    source TEXT
);
CREATE TABLE IF NOT EXISTS study_sample (
    study_accession TEXT NOT NULL,
    sample_accession TEXT NOT NULL,
    UNIQUE (study_accession, sample_accession)
);
CREATE TABLE IF NOT EXISTS sample_run (
    sample_accession TEXT NOT NULL,
    run_accession TEXT NOT NULL,
    UNIQUE (sample_accession, run_accession)
);
CREATE TABLE IF NOT EXISTS study_publication (
    study_accession TEXT NOT NULL,
    publication_accession TEXT NOT NULL,
    UNIQUE (study_accession, publication_accession)
);
CREATE TABLE IF NOT EXISTS sync_state (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    last_sync TEXT NOT NULL
);
";

pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub fn open(path: &Utf8Path) -> Result<Self, ScryerError> {
        let conn = Connection::open(path.as_std_path())?;
        Self::bootstrap(conn)
    }

    pub fn open_in_memory() -> Result<Self, ScryerError> {
        let conn = Connection::open_in_memory()?;
        Self::bootstrap(conn)
    }

    fn bootstrap(conn: Connection) -> Result<Self, ScryerError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    pub fn count_links(&self, parent: EntityKind, child: EntityKind) -> Result<usize, ScryerError> {
        let table = link_table(parent, child)?;
        let count: i64 = self
            .conn
            .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
                row.get(0)
            })?;
        usize::try_from(count)
            .map_err(|_| ScryerError::Database(format!("link count {count} out of range")))
    }

    pub fn count_rows(&self, kind: EntityKind) -> Result<usize, ScryerError> {
        let count: i64 = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", kind.table()),
            [],
            |row| row.get(0),
        )?;
        usize::try_from(count)
            .map_err(|_| ScryerError::Database(format!("row count {count} out of range")))
    }
}

impl Store for SqliteStore {
    fn lookup(&self, kind: EntityKind, accession: &Accession) -> Result<Option<Row>, ScryerError> {
        let columns = kind.fields();
        let sql = format!(
            "SELECT {} FROM {} WHERE accession = ?1",
            columns.join(", "),
            kind.table()
        );
        let row = self
            .conn
            .query_row(&sql, params![accession.as_str()], |row| {
                let mut values = Row::new();
                for (idx, column) in columns.iter().enumerate() {
                    values.insert(column.to_string(), read_value(row.get_ref(idx)?));
                }
                Ok(values)
            })
            .optional()?;
        Ok(row)
    }

    fn insert(&mut self, entity: &Entity) -> Result<(), ScryerError> {
        let kind = entity.kind();
        let columns = kind.fields();
        let placeholders = (1..=columns.len())
            .map(|idx| format!("?{idx}"))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({placeholders})",
            kind.table(),
            columns.join(", ")
        );
        let values = entity.values();
        let result = self
            .conn
            .execute(&sql, rusqlite::params_from_iter(values.iter()));
        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == ErrorCode::ConstraintViolation =>
            {
                Err(ScryerError::DuplicateKey {
                    kind,
                    accession: entity.accession().to_string(),
                })
            }
            Err(err) => Err(err.into()),
        }
    }

    fn update(
        &mut self,
        kind: EntityKind,
        accession: &Accession,
        changes: &[(&'static str, Value)],
    ) -> Result<(), ScryerError> {
        if changes.is_empty() {
            return Ok(());
        }
        let known = kind.fields();
        if let Some((column, _)) = changes.iter().find(|(column, _)| !known.contains(column)) {
            return Err(ScryerError::Database(format!(
                "{kind} has no column {column}"
            )));
        }
        let assignments = changes
            .iter()
            .enumerate()
            .map(|(idx, (column, _))| format!("{column} = ?{}", idx + 1))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "UPDATE {} SET {assignments} WHERE accession = ?{}",
            kind.table(),
            changes.len() + 1
        );
        let key = accession.as_str();
        let mut values: Vec<&dyn ToSql> = changes
            .iter()
            .map(|(_, value)| value as &dyn ToSql)
            .collect();
        values.push(&key);
        let affected = self
            .conn
            .execute(&sql, rusqlite::params_from_iter(values))?;
        if affected == 0 {
            return Err(ScryerError::NotFound {
                kind,
                accession: accession.to_string(),
            });
        }
        Ok(())
    }

    fn link_exists(
        &self,
        parent: EntityKind,
        child: EntityKind,
        parent_id: &Accession,
        child_id: &Accession,
    ) -> Result<bool, ScryerError> {
        let table = link_table(parent, child)?;
        let sql = format!(
            "SELECT 1 FROM {table} WHERE {parent}_accession = ?1 AND {child}_accession = ?2"
        );
        let found = self
            .conn
            .query_row(
                &sql,
                params![parent_id.as_str(), child_id.as_str()],
                |row| row.get::<_, i64>(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn insert_link(
        &mut self,
        parent: EntityKind,
        child: EntityKind,
        parent_id: &Accession,
        child_id: &Accession,
    ) -> Result<(), ScryerError> {
        let table = link_table(parent, child)?;
        let sql = format!(
            "INSERT OR IGNORE INTO {table} ({parent}_accession, {child}_accession) VALUES (?1, ?2)"
        );
        self.conn
            .execute(&sql, params![parent_id.as_str(), child_id.as_str()])?;
        Ok(())
    }

    fn load_watermark(&self) -> Result<Option<DateTime<Utc>>, ScryerError> {
        let stored: Option<String> = self
            .conn
            .query_row("SELECT last_sync FROM sync_state WHERE id = 1", [], |row| {
                row.get(0)
            })
            .optional()?;
        match stored {
            None => Ok(None),
            Some(value) => parse_timestamp(&value)
                .map(Some)
                .ok_or_else(|| ScryerError::Database(format!("unreadable watermark: {value}"))),
        }
    }

    fn store_watermark(&mut self, watermark: DateTime<Utc>) -> Result<(), ScryerError> {
        self.conn.execute(
            "INSERT INTO sync_state (id, last_sync) VALUES (1, ?1)
             ON CONFLICT (id) DO UPDATE SET last_sync = excluded.last_sync",
            params![format_timestamp(&watermark)],
        )?;
        Ok(())
    }
}

pub fn link_table(parent: EntityKind, child: EntityKind) -> Result<&'static str, ScryerError> {
    match (parent, child) {
        (EntityKind::Study, EntityKind::Sample) => Ok("study_sample"),
        (EntityKind::Sample, EntityKind::Run) => Ok("sample_run"),
        (EntityKind::Study, EntityKind::Publication) => Ok("study_publication"),
        _ => Err(ScryerError::InvalidLink { parent, child }),
    }
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        match self {
            Value::Null => Ok(ToSqlOutput::Borrowed(ValueRef::Null)),
            Value::Text(value) => Ok(ToSqlOutput::Borrowed(ValueRef::Text(value.as_bytes()))),
            Value::Integer(value) => Ok(ToSqlOutput::Borrowed(ValueRef::Integer(*value))),
        }
    }
}

fn read_value(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(value) => Value::Integer(value),
        ValueRef::Real(value) => Value::Text(value.to_string()),
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
            Value::Text(String::from_utf8_lossy(bytes).into_owned())
        }
    }
}
