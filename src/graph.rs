use std::collections::{HashMap, HashSet};

use serde::Serialize;
use tracing::{debug, warn};

use crate::domain::{Accession, EntityKind, is_newer};
use crate::entity::{Entity, Run, Sample, Study, entity_from_record};
use crate::error::{EntityFailure, ScryerError};
use crate::source::{RawRecord, RecordSource};

pub const MAX_RANGE_LEN: u64 = 100_000;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct EntityKey {
    pub kind: EntityKind,
    pub accession: Accession,
}

impl EntityKey {
    pub fn of(entity: &Entity) -> Self {
        Self {
            kind: entity.kind(),
            accession: entity.accession().clone(),
        }
    }
}

#[derive(Debug)]
struct Node {
    entity: Entity,
    children: Vec<EntityKey>,
}

#[derive(Debug, Default)]
pub struct EntityGraph {
    nodes: Vec<Node>,
    index: HashMap<EntityKey, usize>,
    edges: HashSet<(EntityKey, EntityKey)>,
    roots: Vec<EntityKey>,
}

impl EntityGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn roots(&self) -> &[EntityKey] {
        &self.roots
    }

    pub fn get(&self, key: &EntityKey) -> Option<&Entity> {
        self.index.get(key).map(|idx| &self.nodes[*idx].entity)
    }

    pub fn children(&self, key: &EntityKey) -> &[EntityKey] {
        self.index
            .get(key)
            .map(|idx| self.nodes[*idx].children.as_slice())
            .unwrap_or(&[])
    }

    pub fn add(&mut self, entity: Entity, parent: Option<&EntityKey>) -> EntityKey {
        let key = EntityKey::of(&entity);
        match self.index.get(&key) {
            Some(idx) => {
                let node = &mut self.nodes[*idx];
                if is_newer(entity.last_update(), node.entity.last_update()) {
                    node.entity = entity;
                }
            }
            None => {
                self.index.insert(key.clone(), self.nodes.len());
                self.nodes.push(Node {
                    entity,
                    children: Vec::new(),
                });
            }
        }

        match parent {
            Some(parent) => {
                let edge = (parent.clone(), key.clone());
                if !self.edges.contains(&edge) {
                    if let Some(idx) = self.index.get(parent) {
                        self.nodes[*idx].children.push(key.clone());
                        self.edges.insert(edge);
                    }
                }
            }
            None => {
                if !self.roots.contains(&key) {
                    self.roots.push(key.clone());
                }
            }
        }
        key
    }

    pub fn parent_first(&self) -> Vec<EntityKey> {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut seen = HashSet::new();
        let mut stack: Vec<&EntityKey> = self.roots.iter().rev().collect();
        while let Some(key) = stack.pop() {
            if !seen.insert(key) {
                continue;
            }
            order.push(key.clone());
            stack.extend(self.children(key).iter().rev());
        }
        order
    }

    pub fn edges(&self) -> Vec<(EntityKey, EntityKey)> {
        self.parent_first()
            .into_iter()
            .flat_map(|parent| {
                self.children(&parent)
                    .iter()
                    .map(|child| (parent.clone(), child.clone()))
                    .collect::<Vec<_>>()
            })
            .collect()
    }
}

#[derive(Debug, Default)]
pub struct BuildOutput {
    pub graph: EntityGraph,
    pub failures: Vec<EntityFailure>,
}

impl BuildOutput {
    fn fail(&mut self, kind: EntityKind, accession: Option<&str>, error: &ScryerError) {
        warn!(%kind, accession = accession.unwrap_or("?"), %error, "dropping entity");
        self.failures
            .push(EntityFailure::new(kind, accession, error));
    }
}

pub fn build_flat(records: &[RawRecord]) -> BuildOutput {
    let mut output = BuildOutput::default();
    for record in records {
        let study = match Study::from_record(record) {
            Ok(study) => Entity::Study(study),
            Err(err) => {
                let accession = record.accession(EntityKind::Study);
                output.fail(EntityKind::Study, accession.as_deref(), &err);
                continue;
            }
        };
        let study_key = output.graph.add(study, None);

        let sample = match Sample::from_record(record) {
            Ok(sample) => Entity::Sample(sample),
            Err(err) => {
                let accession = record.accession(EntityKind::Sample);
                output.fail(EntityKind::Sample, accession.as_deref(), &err);
                continue;
            }
        };
        let sample_key = output.graph.add(sample, Some(&study_key));

        match Run::from_record(record) {
            Ok(run) => {
                output.graph.add(Entity::Run(run), Some(&sample_key));
            }
            Err(err) => {
                let accession = record.accession(EntityKind::Run);
                output.fail(EntityKind::Run, accession.as_deref(), &err);
            }
        }
    }
    output
}

/// A child set that cannot be fully resolved is discarded for that parent
/// only; the parent itself stays in the graph. Transport errors abort.
pub fn build_linked<R: RecordSource + ?Sized>(
    source: &R,
    records: &[RawRecord],
) -> Result<BuildOutput, ScryerError> {
    let mut output = BuildOutput::default();
    for record in records {
        let study = match Study::from_record(record) {
            Ok(study) => Entity::Study(study),
            Err(err) => {
                let accession = record.accession(EntityKind::Study);
                output.fail(EntityKind::Study, accession.as_deref(), &err);
                continue;
            }
        };
        let key = output.graph.add(study, None);
        attach_linked(source, &mut output, &key, record)?;
    }
    Ok(output)
}

fn attach_linked<R: RecordSource + ?Sized>(
    source: &R,
    output: &mut BuildOutput,
    parent: &EntityKey,
    record: &RawRecord,
) -> Result<(), ScryerError> {
    let Some(kind) = parent.kind.child() else {
        return Ok(());
    };
    let Some(expression) = kind.xref_db().and_then(|db| record.xref(db)) else {
        return Ok(());
    };
    debug!(parent = %parent.accession, %kind, expression, "resolving linked records");

    match resolve_linked(source, kind, parent, expression) {
        Ok(children) => {
            for (child_record, child) in children {
                let child_key = output.graph.add(child, Some(parent));
                attach_linked(source, output, &child_key, &child_record)?;
            }
            Ok(())
        }
        Err(err) if err.is_transport() => Err(err),
        Err(err) => {
            output.fail(parent.kind, Some(parent.accession.as_str()), &err);
            Ok(())
        }
    }
}

fn resolve_linked<R: RecordSource + ?Sized>(
    source: &R,
    kind: EntityKind,
    parent: &EntityKey,
    expression: &str,
) -> Result<Vec<(RawRecord, Entity)>, ScryerError> {
    let mut expected = parse_xlink_ids(expression)?;
    let mut seen = HashSet::new();
    expected.retain(|accession| seen.insert(accession.clone()));

    let mut fetched: HashMap<String, RawRecord> = source
        .linked_records(kind, expression)?
        .into_iter()
        .filter_map(|record| record.accession(kind).map(|accession| (accession, record)))
        .collect();

    let mut resolved = Vec::with_capacity(expected.len());
    for accession in expected {
        let record = fetched.remove(accession.as_str()).ok_or_else(|| {
            ScryerError::MissingLinkedEntity {
                kind,
                accession: accession.to_string(),
                parent: parent.accession.to_string(),
            }
        })?;
        let entity = entity_from_record(kind, &record)?;
        resolved.push((record, entity));
    }
    Ok(resolved)
}

/// Expands a cross-reference list such as `"ERR1000-ERR1002,ERR2000"` into
/// single accessions. Range bounds share an alphabetic prefix; the numeric
/// suffix keeps the zero padding of the lower bound.
pub fn parse_xlink_ids(expression: &str) -> Result<Vec<Accession>, ScryerError> {
    let mut ids = Vec::new();
    for part in expression.split(',').map(str::trim).filter(|part| !part.is_empty()) {
        match part.split_once('-') {
            Some((start, end)) => ids.extend(expand_range(start.trim(), end.trim())?),
            None => ids.push(part.parse()?),
        }
    }
    Ok(ids)
}

fn expand_range(start: &str, end: &str) -> Result<Vec<Accession>, ScryerError> {
    let invalid = || ScryerError::InvalidRange(format!("{start}-{end}"));
    let (prefix, start_digits) = split_accession(start).ok_or_else(invalid)?;
    let (end_prefix, end_digits) = split_accession(end).ok_or_else(invalid)?;
    if prefix != end_prefix {
        return Err(invalid());
    }
    let width = start_digits.len();
    let first: u64 = start_digits.parse().map_err(|_| invalid())?;
    let last: u64 = end_digits.parse().map_err(|_| invalid())?;
    if last < first || last - first >= MAX_RANGE_LEN {
        return Err(invalid());
    }
    (first..=last)
        .map(|number| format!("{prefix}{number:0width$}").parse())
        .collect()
}

fn split_accession(value: &str) -> Option<(&str, &str)> {
    let at = value.find(|ch: char| ch.is_ascii_digit())?;
    let (prefix, digits) = value.split_at(at);
    let valid = !prefix.is_empty()
        && prefix.chars().all(|ch| ch.is_ascii_alphabetic())
        && digits.chars().all(|ch| ch.is_ascii_digit());
    valid.then_some((prefix, digits))
}
