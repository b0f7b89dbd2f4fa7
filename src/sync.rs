use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;
use std::time::{Duration, Instant};

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use tracing::{debug, info, trace, warn};

use crate::change::{Classification, changed_values, classify};
use crate::config::SyncConfig;
use crate::domain::{
    Accession, AccessionNamespace, EntityKind, Partition, SourceMode, format_timestamp, is_newer,
    parse_timestamp,
};
use crate::entity::{Entity, Publication, Value};
use crate::error::{EntityFailure, ScryerError};
use crate::graph::{BuildOutput, EntityKey, build_flat, build_linked};
use crate::source::{CitationSource, RawRecord, RecordSource};
use crate::store::Store;

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum SyncState {
    Idle,
    Fetching { partition: Partition },
    Reconciling { kind: EntityKind, accession: Accession },
    Linking { parent: EntityKey, child: EntityKey },
    Summarizing,
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncState::Idle => write!(f, "phase=Idle"),
            SyncState::Fetching { partition } => write!(f, "phase=Fetching; {partition}"),
            SyncState::Reconciling { kind, accession } => {
                write!(f, "phase=Reconciling; {kind} {accession}")
            }
            SyncState::Linking { parent, child } => write!(
                f,
                "phase=Linking; {} {} -> {} {}",
                parent.kind, parent.accession, child.kind, child.accession
            ),
            SyncState::Summarizing => write!(f, "phase=Summarizing"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "columns", rename_all = "lowercase")]
pub enum Outcome {
    New,
    Updated(Vec<&'static str>),
    Unchanged,
    Stale,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct KindCounts {
    pub new: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub stale: usize,
}

impl KindCounts {
    pub fn record(&mut self, outcome: &Outcome) {
        match outcome {
            Outcome::New => self.new += 1,
            Outcome::Updated(_) => self.updated += 1,
            Outcome::Unchanged => self.unchanged += 1,
            Outcome::Stale => self.stale += 1,
        }
    }

    fn add(&mut self, other: &KindCounts) {
        self.new += other.new;
        self.updated += other.updated;
        self.unchanged += other.unchanged;
        self.stale += other.stale;
    }
}

pub type Tally = BTreeMap<EntityKind, KindCounts>;

#[derive(Debug, Clone, Serialize)]
pub struct PartitionSummary {
    pub partition: Partition,
    pub pages: usize,
    pub records: usize,
    pub skipped: usize,
    pub malformed_page: Option<String>,
    pub counts: Tally,
    pub links_created: usize,
    pub failures: Vec<EntityFailure>,
}

impl PartitionSummary {
    fn new(partition: Partition) -> Self {
        Self {
            partition,
            pages: 0,
            records: 0,
            skipped: 0,
            malformed_page: None,
            counts: Tally::new(),
            links_created: 0,
            failures: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncSummary {
    pub partitions: Vec<PartitionSummary>,
    pub totals: Tally,
    pub publications_linked: usize,
    pub enrichment_failures: Vec<EntityFailure>,
    pub previous_watermark: Option<String>,
    pub watermark: String,
    pub elapsed_ms: u128,
}

impl SyncSummary {
    pub fn failure_count(&self) -> usize {
        self.partitions
            .iter()
            .map(|partition| partition.failures.len())
            .sum::<usize>()
            + self.enrichment_failures.len()
    }

    pub fn total(&self, kind: EntityKind) -> KindCounts {
        self.totals.get(&kind).copied().unwrap_or_default()
    }
}

pub struct SyncDriver<S: Store, R: RecordSource, C: CitationSource> {
    config: SyncConfig,
    store: S,
    source: R,
    citations: C,
    state: SyncState,
    started: Instant,
}

impl<S: Store, R: RecordSource, C: CitationSource> SyncDriver<S, R, C> {
    pub fn new(config: SyncConfig, store: S, source: R, citations: C) -> Self {
        Self {
            config,
            store,
            source,
            citations,
            state: SyncState::Idle,
            started: Instant::now(),
        }
    }

    pub fn state(&self) -> &SyncState {
        &self.state
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }

    pub fn run(&mut self, sink: &dyn ProgressSink) -> Result<SyncSummary, ScryerError> {
        self.started = Instant::now();
        let result = self.run_pass(sink);
        if let Err(err) = &result {
            warn!(error = %err, "sync pass aborted, watermark left unchanged");
        }
        self.set_state(SyncState::Idle, sink);
        result
    }

    fn run_pass(&mut self, sink: &dyn ProgressSink) -> Result<SyncSummary, ScryerError> {
        let pass_start = Utc::now();
        let previous = self.store.load_watermark()?;
        let previous_label = previous
            .as_ref()
            .map(format_timestamp)
            .unwrap_or_else(|| "none".to_string());
        info!(
            watermark = %previous_label,
            partitions = self.config.partitions.len(),
            mode = ?self.config.mode,
            "starting sync pass"
        );

        let mut studies = BTreeSet::new();
        let mut partitions = Vec::with_capacity(self.config.partitions.len());
        for partition in self.config.partitions.clone() {
            partitions.push(self.sync_partition(partition, previous, &mut studies, sink)?);
        }

        let mut publications = KindCounts::default();
        let (publications_linked, enrichment_failures) =
            self.enrich_publications(&studies, &mut publications, sink);

        self.set_state(SyncState::Summarizing, sink);
        let mut totals = Tally::new();
        for partition in &partitions {
            for (kind, counts) in &partition.counts {
                totals.entry(*kind).or_default().add(counts);
            }
        }
        if publications != KindCounts::default() {
            totals
                .entry(EntityKind::Publication)
                .or_default()
                .add(&publications);
        }

        self.store.store_watermark(pass_start)?;
        let summary = SyncSummary {
            partitions,
            totals,
            publications_linked,
            enrichment_failures,
            previous_watermark: previous.as_ref().map(format_timestamp),
            watermark: format_timestamp(&pass_start),
            elapsed_ms: self.started.elapsed().as_millis(),
        };
        info!(
            watermark = %summary.watermark,
            failures = summary.failure_count(),
            publications_linked = summary.publications_linked,
            "sync pass complete"
        );
        Ok(summary)
    }

    fn sync_partition(
        &mut self,
        partition: Partition,
        watermark: Option<DateTime<Utc>>,
        studies: &mut BTreeSet<Accession>,
        sink: &dyn ProgressSink,
    ) -> Result<PartitionSummary, ScryerError> {
        let mut summary = PartitionSummary::new(partition.clone());
        let limit = self.config.page_size.max(1);
        let mut offset = 0;
        loop {
            self.set_state(
                SyncState::Fetching {
                    partition: partition.clone(),
                },
                sink,
            );
            let page = match self.source.paged_records(&partition, offset, limit) {
                Ok(page) => page,
                Err(err) if err.is_transport() => return Err(err),
                Err(err) => {
                    warn!(%partition, offset, error = %err, "ending partition on undecodable page");
                    summary.malformed_page = Some(err.to_string());
                    break;
                }
            };
            debug!(%partition, offset, records = page.len(), "page fetched");
            summary.pages += 1;
            summary.records += page.len();

            let fresh: Vec<RawRecord> = page
                .iter()
                .filter(|record| !already_synced(record, watermark))
                .cloned()
                .collect();
            summary.skipped += page.len() - fresh.len();

            let built = match self.config.mode {
                SourceMode::Flat => build_flat(&fresh),
                SourceMode::Linked => build_linked(&self.source, &fresh)?,
            };
            self.apply(built, &mut summary, studies, sink);

            if page.len() < limit {
                break;
            }
            offset += limit;
        }
        info!(
            %partition,
            pages = summary.pages,
            records = summary.records,
            skipped = summary.skipped,
            failures = summary.failures.len(),
            "partition done"
        );
        Ok(summary)
    }

    fn apply(
        &mut self,
        built: BuildOutput,
        summary: &mut PartitionSummary,
        studies: &mut BTreeSet<Accession>,
        sink: &dyn ProgressSink,
    ) {
        let BuildOutput { graph, failures } = built;
        summary.failures.extend(failures);

        let mut reconciled = HashSet::new();
        for key in graph.parent_first() {
            let Some(entity) = graph.get(&key) else {
                continue;
            };
            self.set_state(
                SyncState::Reconciling {
                    kind: key.kind,
                    accession: key.accession.clone(),
                },
                sink,
            );
            match self.reconcile(entity) {
                Ok(outcome) => {
                    trace!(kind = %key.kind, accession = %key.accession, ?outcome, "reconciled");
                    summary.counts.entry(key.kind).or_default().record(&outcome);
                    if key.kind == EntityKind::Study {
                        studies.insert(key.accession.clone());
                    }
                    reconciled.insert(key);
                }
                Err(err) => {
                    warn!(
                        kind = %key.kind,
                        accession = %key.accession,
                        entity = ?entity,
                        error = %err,
                        "failed to reconcile entity"
                    );
                    summary.failures.push(EntityFailure::new(
                        key.kind,
                        Some(key.accession.as_str()),
                        &err,
                    ));
                }
            }
        }

        for (parent, child) in graph.edges() {
            if !(reconciled.contains(&parent) && reconciled.contains(&child)) {
                continue;
            }
            match self.link(&parent, &child, sink) {
                Ok(true) => summary.links_created += 1,
                Ok(false) => {}
                Err(err) => {
                    warn!(parent = %parent.accession, child = %child.accession, error = %err, "failed to link");
                    summary.failures.push(EntityFailure::new(
                        child.kind,
                        Some(child.accession.as_str()),
                        &err,
                    ));
                }
            }
        }
    }

    fn reconcile(&mut self, entity: &Entity) -> Result<Outcome, ScryerError> {
        let kind = entity.kind();
        let stored = self.store.lookup(kind, entity.accession())?;
        match classify(entity, stored.as_ref()) {
            Classification::New => match self.store.insert(entity) {
                Ok(()) => Ok(Outcome::New),
                Err(ScryerError::DuplicateKey { .. }) => {
                    debug!(%kind, accession = %entity.accession(), "insert raced an existing row");
                    Ok(Outcome::Unchanged)
                }
                Err(err) => Err(err),
            },
            Classification::Unchanged => Ok(Outcome::Unchanged),
            Classification::Updated(columns) => {
                if kind.has_timestamp() {
                    let stored_update = stored
                        .as_ref()
                        .and_then(|row| row.get("last_update"))
                        .and_then(Value::as_text);
                    if !is_newer(entity.last_update(), stored_update) {
                        return Ok(Outcome::Stale);
                    }
                }
                let changes = changed_values(entity, &columns);
                self.store.update(kind, entity.accession(), &changes)?;
                Ok(Outcome::Updated(columns))
            }
        }
    }

    fn link(
        &mut self,
        parent: &EntityKey,
        child: &EntityKey,
        sink: &dyn ProgressSink,
    ) -> Result<bool, ScryerError> {
        self.set_state(
            SyncState::Linking {
                parent: parent.clone(),
                child: child.clone(),
            },
            sink,
        );
        if self
            .store
            .link_exists(parent.kind, child.kind, &parent.accession, &child.accession)?
        {
            return Ok(false);
        }
        self.store
            .insert_link(parent.kind, child.kind, &parent.accession, &child.accession)?;
        Ok(true)
    }

    fn enrich_publications(
        &mut self,
        studies: &BTreeSet<Accession>,
        counts: &mut KindCounts,
        sink: &dyn ProgressSink,
    ) -> (usize, Vec<EntityFailure>) {
        let mut by_namespace: BTreeMap<AccessionNamespace, Vec<Accession>> = BTreeMap::new();
        for study in studies {
            by_namespace
                .entry(study.namespace())
                .or_default()
                .push(study.clone());
        }

        let mut linked = 0;
        let mut failures = Vec::new();
        for (namespace, accessions) in by_namespace {
            sink.event(ProgressEvent {
                message: format!(
                    "phase=Enriching; {} {namespace} accessions",
                    accessions.len()
                ),
                elapsed: Some(self.started.elapsed()),
            });
            let citations = match self.citations.citation_ids(namespace, &accessions) {
                Ok(citations) => citations,
                Err(err) => {
                    warn!(%namespace, error = %err, "citation lookup failed");
                    failures.push(EntityFailure::new(EntityKind::Publication, None, &err));
                    continue;
                }
            };

            for (study, citation) in citations {
                if !studies.contains(&study) {
                    debug!(%study, citation, "ignoring citation for a study outside this pass");
                    continue;
                }
                let publication = match citation.parse::<Accession>() {
                    Ok(accession) => Entity::Publication(Publication::pubmed(accession)),
                    Err(err) => {
                        warn!(%study, citation, error = %err, "unusable citation id");
                        failures.push(EntityFailure::new(
                            EntityKind::Publication,
                            Some(citation.as_str()),
                            &err,
                        ));
                        continue;
                    }
                };
                let child = EntityKey::of(&publication);
                self.set_state(
                    SyncState::Reconciling {
                        kind: child.kind,
                        accession: child.accession.clone(),
                    },
                    sink,
                );
                match self.reconcile(&publication) {
                    Ok(outcome) => counts.record(&outcome),
                    Err(err) => {
                        warn!(%study, citation, error = %err, "failed to store publication");
                        failures.push(EntityFailure::new(
                            EntityKind::Publication,
                            Some(citation.as_str()),
                            &err,
                        ));
                        continue;
                    }
                }
                let parent = EntityKey {
                    kind: EntityKind::Study,
                    accession: study,
                };
                match self.link(&parent, &child, sink) {
                    Ok(created) => linked += usize::from(created),
                    Err(err) => {
                        warn!(study = %parent.accession, citation, error = %err, "failed to link publication");
                        failures.push(EntityFailure::new(
                            EntityKind::Publication,
                            Some(citation.as_str()),
                            &err,
                        ));
                    }
                }
            }
        }
        (linked, failures)
    }

    fn set_state(&mut self, state: SyncState, sink: &dyn ProgressSink) {
        match &state {
            SyncState::Reconciling { .. } | SyncState::Linking { .. } => {
                trace!(state = %state, "state change");
            }
            _ => sink.event(ProgressEvent {
                message: state.to_string(),
                elapsed: Some(self.started.elapsed()),
            }),
        }
        self.state = state;
    }
}

/// A record counts as seen when it predates the watermark at its own
/// precision: a bare date must fall on an earlier day than the watermark.
fn already_synced(record: &RawRecord, watermark: Option<DateTime<Utc>>) -> bool {
    let Some(watermark) = watermark else {
        return false;
    };
    let Some(updated) = record.text("last_updated") else {
        return false;
    };
    match NaiveDate::parse_from_str(&updated, "%Y-%m-%d") {
        Ok(date) => date < watermark.date_naive(),
        Err(_) => parse_timestamp(&updated).is_some_and(|updated| updated <= watermark),
    }
}
