use serde::Serialize;

use crate::entity::{Entity, Row, Value};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "columns", rename_all = "lowercase")]
pub enum Classification {
    New,
    Updated(Vec<&'static str>),
    Unchanged,
}

impl Classification {
    pub fn changed_columns(&self) -> &[&'static str] {
        match self {
            Classification::Updated(columns) => columns,
            Classification::New | Classification::Unchanged => &[],
        }
    }
}

/// Columns are visited in declared order and compared without coercion, so
/// `Text("200")` differs from `Integer(200)`. A column missing from the stored
/// row compares as NULL. Timestamps get no special treatment here.
pub fn classify(entity: &Entity, stored: Option<&Row>) -> Classification {
    let Some(stored) = stored else {
        return Classification::New;
    };
    let changed: Vec<&'static str> = entity
        .fields()
        .filter(|(name, value)| stored.get(*name).unwrap_or(&Value::Null) != value)
        .map(|(name, _)| name)
        .collect();
    if changed.is_empty() {
        Classification::Unchanged
    } else {
        Classification::Updated(changed)
    }
}

pub fn changed_values(entity: &Entity, columns: &[&'static str]) -> Vec<(&'static str, Value)> {
    entity
        .fields()
        .filter(|(name, _)| columns.contains(name))
        .collect()
}
