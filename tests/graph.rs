use std::collections::BTreeMap;
use std::sync::Mutex;

use assert_matches::assert_matches;

use mgscryer::domain::{EntityKind, Partition};
use mgscryer::entity::Entity;
use mgscryer::error::ScryerError;
use mgscryer::graph::{EntityKey, build_flat, build_linked};
use mgscryer::source::{RawRecord, RecordSource};

fn key(kind: EntityKind, accession: &str) -> EntityKey {
    EntityKey {
        kind,
        accession: accession.parse().unwrap(),
    }
}

fn wide_row(study: &str, sample: &str, run: &str, host: &str, updated: &str) -> RawRecord {
    RawRecord::from_pairs(&[
        ("study_accession", study),
        ("study_title", "Human gut metagenome"),
        ("last_updated", updated),
        ("sample_accession", sample),
        ("host", host),
        ("run_accession", run),
        ("read_count", "1000"),
    ])
}

#[derive(Default)]
struct MockLinked {
    records: BTreeMap<String, Vec<RawRecord>>,
    transport_error: bool,
    calls: Mutex<Vec<(EntityKind, String)>>,
}

impl RecordSource for MockLinked {
    fn paged_records(
        &self,
        _partition: &Partition,
        _offset: usize,
        _limit: usize,
    ) -> Result<Vec<RawRecord>, ScryerError> {
        Ok(Vec::new())
    }

    fn linked_records(
        &self,
        kind: EntityKind,
        expression: &str,
    ) -> Result<Vec<RawRecord>, ScryerError> {
        self.calls
            .lock()
            .unwrap()
            .push((kind, expression.to_string()));
        if self.transport_error {
            return Err(ScryerError::EnaStatus {
                status: 503,
                message: "unavailable".to_string(),
            });
        }
        Ok(self.records.get(expression).cloned().unwrap_or_default())
    }
}

#[test]
fn flat_rows_fan_out_into_a_tree() {
    let rows = vec![
        wide_row("PRJEB1", "SAMEA1", "ERR1", "Homo sapiens", "2021-01-01"),
        wide_row("PRJEB1", "SAMEA1", "ERR2", "Homo sapiens", "2021-01-01"),
        wide_row("PRJEB1", "SAMEA2", "ERR3", "Homo sapiens", "2021-01-01"),
    ];
    let output = build_flat(&rows);
    let graph = output.graph;

    assert!(output.failures.is_empty());
    assert_eq!(graph.len(), 6);
    assert_eq!(graph.roots(), [key(EntityKind::Study, "PRJEB1")]);
    assert_eq!(
        graph.children(&key(EntityKind::Study, "PRJEB1")),
        [key(EntityKind::Sample, "SAMEA1"), key(EntityKind::Sample, "SAMEA2")]
    );
    assert_eq!(
        graph.parent_first(),
        vec![
            key(EntityKind::Study, "PRJEB1"),
            key(EntityKind::Sample, "SAMEA1"),
            key(EntityKind::Run, "ERR1"),
            key(EntityKind::Run, "ERR2"),
            key(EntityKind::Sample, "SAMEA2"),
            key(EntityKind::Run, "ERR3"),
        ]
    );
    assert_eq!(graph.edges().len(), 5);
}

#[test]
fn newer_duplicate_replaces_values() {
    let rows = vec![
        wide_row("PRJEB1", "SAMEA1", "ERR1", "Homo sapiens", "2021-01-01"),
        wide_row("PRJEB1", "SAMEA1", "ERR2", "Mus musculus", "2021-03-01"),
        wide_row("PRJEB1", "SAMEA1", "ERR3", "Rattus", "2021-02-01"),
    ];
    let graph = build_flat(&rows).graph;

    let sample = graph.get(&key(EntityKind::Sample, "SAMEA1")).unwrap();
    assert_matches!(sample, Entity::Sample(sample) if sample.host.as_deref() == Some("Mus musculus"));
    assert_eq!(graph.children(&key(EntityKind::Study, "PRJEB1")).len(), 1);
}

#[test]
fn malformed_run_keeps_its_parents() {
    let mut row = wide_row("PRJEB1", "SAMEA1", "ERR1", "Homo sapiens", "2021-01-01");
    row.fields
        .insert("read_count".to_string(), "lots".to_string());
    let output = build_flat(&[row]);

    assert_eq!(output.graph.len(), 2);
    assert_eq!(output.failures.len(), 1);
    assert_eq!(output.failures[0].kind, EntityKind::Run);
    assert_eq!(output.failures[0].accession.as_deref(), Some("ERR1"));
}

#[test]
fn row_without_study_is_dropped() {
    let row = RawRecord::from_pairs(&[("sample_accession", "SAMEA1"), ("run_accession", "ERR1")]);
    let output = build_flat(&[row]);
    assert!(output.graph.is_empty());
    assert_eq!(output.failures[0].kind, EntityKind::Study);
    assert_eq!(output.failures[0].accession, None);
}

fn linked_source() -> MockLinked {
    let mut records = BTreeMap::new();
    records.insert(
        "SAMEA001-SAMEA002".to_string(),
        vec![
            RawRecord::from_pairs(&[("sample_accession", "SAMEA002"), ("host", "Homo sapiens")]),
            RawRecord::from_pairs(&[("sample_accession", "SAMEA001"), ("host", "Homo sapiens")])
                .with_xref("ena-run", "ERR01-ERR02"),
        ],
    );
    records.insert(
        "ERR01-ERR02".to_string(),
        vec![
            RawRecord::from_pairs(&[("run_accession", "ERR01")]),
            RawRecord::from_pairs(&[("run_accession", "ERR02")]),
        ],
    );
    records.insert(
        "SAMEA010,SAMEA011".to_string(),
        vec![RawRecord::from_pairs(&[("sample_accession", "SAMEA010")])],
    );
    MockLinked {
        records,
        ..MockLinked::default()
    }
}

#[test]
fn linked_records_resolve_by_accession() {
    let source = linked_source();
    let studies = vec![
        RawRecord::from_pairs(&[("study_accession", "PRJEB1")])
            .with_xref("ena-sample", "SAMEA001-SAMEA002"),
    ];
    let output = build_linked(&source, &studies).unwrap();
    let graph = output.graph;

    assert!(output.failures.is_empty());
    assert_eq!(
        graph.children(&key(EntityKind::Study, "PRJEB1")),
        [key(EntityKind::Sample, "SAMEA001"), key(EntityKind::Sample, "SAMEA002")]
    );
    assert_eq!(
        graph.children(&key(EntityKind::Sample, "SAMEA001")),
        [key(EntityKind::Run, "ERR01"), key(EntityKind::Run, "ERR02")]
    );
    assert!(graph.children(&key(EntityKind::Sample, "SAMEA002")).is_empty());

    let calls = source.calls.lock().unwrap();
    assert_eq!(
        *calls,
        vec![
            (EntityKind::Sample, "SAMEA001-SAMEA002".to_string()),
            (EntityKind::Run, "ERR01-ERR02".to_string()),
        ]
    );
}

#[test]
fn missing_linked_entity_drops_only_that_child_set() {
    let source = linked_source();
    let studies = vec![
        RawRecord::from_pairs(&[("study_accession", "PRJEB2")])
            .with_xref("ena-sample", "SAMEA010,SAMEA011"),
        RawRecord::from_pairs(&[("study_accession", "PRJEB1")])
            .with_xref("ena-sample", "SAMEA001-SAMEA002"),
    ];
    let output = build_linked(&source, &studies).unwrap();
    let graph = output.graph;

    assert!(graph.get(&key(EntityKind::Study, "PRJEB2")).is_some());
    assert!(graph.children(&key(EntityKind::Study, "PRJEB2")).is_empty());
    assert!(graph.get(&key(EntityKind::Sample, "SAMEA010")).is_none());
    assert_eq!(graph.children(&key(EntityKind::Study, "PRJEB1")).len(), 2);

    assert_eq!(output.failures.len(), 1);
    assert_eq!(output.failures[0].kind, EntityKind::Study);
    assert_eq!(output.failures[0].accession.as_deref(), Some("PRJEB2"));
    assert!(output.failures[0].error.contains("SAMEA011"));
}

#[test]
fn linked_transport_failure_aborts() {
    let source = MockLinked {
        transport_error: true,
        ..MockLinked::default()
    };
    let studies = vec![
        RawRecord::from_pairs(&[("study_accession", "PRJEB1")]).with_xref("ena-sample", "SAMEA1"),
    ];
    let err = build_linked(&source, &studies).unwrap_err();
    assert_matches!(err, ScryerError::EnaStatus { status: 503, .. });
}

#[test]
fn invalid_range_is_recorded_against_parent() {
    let source = MockLinked::default();
    let studies = vec![
        RawRecord::from_pairs(&[("study_accession", "PRJEB1")])
            .with_xref("ena-sample", "SAMEA9-SAMEA1"),
    ];
    let output = build_linked(&source, &studies).unwrap();
    assert_eq!(output.graph.len(), 1);
    assert_eq!(output.failures.len(), 1);
    assert!(source.calls.lock().unwrap().is_empty());
}
