use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;
use std::thread;
use std::time::Duration;

use regex::Regex;
use reqwest::blocking::{Client, RequestBuilder};
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use tracing::debug;

use crate::config::SyncConfig;
use crate::domain::{Accession, AccessionNamespace, EntityKind, Partition, SourceMode};
use crate::error::ScryerError;
use crate::source::{CitationSource, RawRecord, RecordSource, accession_field};

const RUN_FIELDS: &[&str] = &[
    "study_accession",
    "study_title",
    "first_public",
    "last_updated",
    "sample_accession",
    "host",
    "host_body_site",
    "host_tax_id",
    "environment_biome",
    "run_accession",
    "experiment_title",
    "description",
    "instrument_model",
    "instrument_platform",
    "library_source",
    "library_layout",
    "library_strategy",
    "nominal_length",
    "read_count",
];

const STUDY_FIELDS: &[&str] = &["study_accession", "study_title", "first_public", "last_updated"];

const BASE_QUERY: &str = "instrument_platform=\"ILLUMINA\" AND \
((library_strategy=\"WGS\" AND library_source=\"METAGENOMIC\") OR \
(library_strategy=\"RNA-Seq\" AND library_source=\"METATRANSCRIPTOMIC\"))";

const ATTRIBUTE_FIELDS: &[(&str, &str)] = &[
    ("ena-first-public", "first_public"),
    ("ena-last-update", "last_updated"),
    ("ena-spot-count", "read_count"),
    ("host", "host"),
    ("host scientific name", "host"),
    ("host body site", "host_body_site"),
    ("host taxid", "host_tax_id"),
    ("host tax id", "host_tax_id"),
    ("environment (biome)", "environment_biome"),
    ("environment_biome", "environment_biome"),
];

const PUBMED_DB: &str = "PUBMED";

static PROJECT_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| block_regex("PROJECT"));
static STUDY_BLOCK: LazyLock<Regex> = LazyLock::new(|| block_regex("STUDY"));
static SAMPLE_BLOCK: LazyLock<Regex> = LazyLock::new(|| block_regex("SAMPLE"));
static RUN_BLOCK: LazyLock<Regex> = LazyLock::new(|| block_regex("RUN"));
static EXPERIMENT_BLOCK: LazyLock<Regex> = LazyLock::new(|| block_regex("EXPERIMENT"));
static EXPERIMENT_REF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<EXPERIMENT_REF\b[^>]*\baccession\s*=\s*"([^"]*)""#).unwrap()
});
static LIBRARY_STRATEGY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<LIBRARY_STRATEGY>(.*?)</LIBRARY_STRATEGY>").unwrap()
});
static LIBRARY_SOURCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<LIBRARY_SOURCE>(.*?)</LIBRARY_SOURCE>").unwrap());
static LIBRARY_LAYOUT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<LIBRARY_LAYOUT>\s*<([A-Z_]+)").unwrap());
static NOMINAL_LENGTH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"\bNOMINAL_LENGTH\s*=\s*"([0-9]+)""#).unwrap());
static SPOT_LENGTH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<SPOT_LENGTH>\s*([0-9]+)\s*</SPOT_LENGTH>").unwrap());
static PLATFORM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<PLATFORM>\s*<([A-Z_]+)").unwrap());
static INSTRUMENT_MODEL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<INSTRUMENT_MODEL>(.*?)</INSTRUMENT_MODEL>").unwrap()
});
static ACCESSION_ATTR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"\baccession\s*=\s*"([^"]*)""#).unwrap());
static PRIMARY_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<PRIMARY_ID>(.*?)</PRIMARY_ID>").unwrap());
static TITLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<(?:STUDY_)?TITLE>(.*?)</(?:STUDY_)?TITLE>").unwrap());
static DESCRIPTION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<DESCRIPTION>(.*?)</DESCRIPTION>").unwrap());
static TAG_VALUE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<TAG>(.*?)</TAG>\s*<VALUE>(.*?)</VALUE>").unwrap()
});
static XREF_LINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<XREF_LINK>\s*<DB>(.*?)</DB>\s*<ID>(.*?)</ID>").unwrap()
});

fn block_regex(tag: &str) -> Regex {
    Regex::new(&format!(r"(?s)<{tag}\b([^>]*)>(.*?)</{tag}>")).unwrap()
}

#[derive(Clone)]
pub struct EnaHttpClient {
    client: Client,
    portal_url: String,
    browser_url: String,
    request_delay: Duration,
    mode: SourceMode,
}

impl EnaHttpClient {
    pub fn new(config: &SyncConfig) -> Result<Self, ScryerError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("mgscryer/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| ScryerError::EnaHttp(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|err| ScryerError::EnaHttp(err.to_string()))?;
        Ok(Self {
            client,
            portal_url: config.portal_url.clone(),
            browser_url: config.browser_url.clone(),
            request_delay: config.request_delay,
            mode: config.mode,
        })
    }

    fn fetch_text(&self, request: RequestBuilder) -> Result<String, ScryerError> {
        thread::sleep(self.request_delay);
        let response = request
            .send()
            .map_err(|err| ScryerError::EnaHttp(err.to_string()))?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "ENA request failed".to_string());
            return Err(ScryerError::EnaStatus { status, message });
        }
        response
            .text()
            .map_err(|err| ScryerError::EnaHttp(err.to_string()))
    }

    fn search(
        &self,
        result: &str,
        fields: &[&str],
        partition: &Partition,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<RawRecord>, ScryerError> {
        let url = format!("{}search", self.portal_url);
        let query = format!("{BASE_QUERY} AND tax_tree({})", partition.tax_id);
        let fields = fields.join(",");
        let limit = limit.to_string();
        let offset = offset.to_string();
        debug!(%url, result, %partition, %offset, %limit, "portal search");
        let body = self.fetch_text(self.client.get(&url).query(&[
            ("result", result),
            ("includeMetagenomes", "1"),
            ("format", "json"),
            ("fields", fields.as_str()),
            ("query", query.as_str()),
            ("limit", limit.as_str()),
            ("offset", offset.as_str()),
        ]))?;
        parse_portal_json(&body)
    }

    fn browser_xml_get(&self, expression: &str) -> Result<String, ScryerError> {
        let url = format!("{}xml/{}", self.browser_url, expression.trim());
        debug!(%url, "browser xml");
        self.fetch_text(self.client.get(&url))
    }

    fn browser_xml_post(&self, accessions: &[&str]) -> Result<String, ScryerError> {
        let url = format!("{}xml", self.browser_url);
        debug!(%url, count = accessions.len(), "browser xml batch");
        let form: Vec<(&str, &str)> = accessions
            .iter()
            .map(|accession| ("accessions", *accession))
            .collect();
        self.fetch_text(self.client.post(&url).form(&form))
    }

    fn linked_study_page(
        &self,
        partition: &Partition,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<RawRecord>, ScryerError> {
        let mut rows = self.search("read_study", STUDY_FIELDS, partition, offset, limit)?;
        let accessions: Vec<String> = rows
            .iter()
            .filter_map(|row| row.accession(EntityKind::Study))
            .collect();
        if accessions.is_empty() {
            return Ok(rows);
        }
        let refs: Vec<&str> = accessions.iter().map(String::as_str).collect();
        let xml = self.browser_xml_post(&refs)?;
        let xrefs: BTreeMap<String, BTreeMap<String, String>> =
            parse_xml_records(&xml, EntityKind::Study)
                .into_iter()
                .filter_map(|record| {
                    record
                        .accession(EntityKind::Study)
                        .map(|accession| (accession, record.xrefs))
                })
                .collect();
        for row in &mut rows {
            if let Some(links) = row
                .accession(EntityKind::Study)
                .and_then(|accession| xrefs.get(&accession))
            {
                row.xrefs.extend(links.clone());
            }
        }
        Ok(rows)
    }
}

impl EnaHttpClient {
    fn attach_experiments(&self, runs: &mut [RawRecord]) -> Result<(), ScryerError> {
        let accessions: BTreeSet<String> = runs.iter().filter_map(experiment_accession).collect();
        if accessions.is_empty() {
            return Ok(());
        }
        let refs: Vec<&str> = accessions.iter().map(String::as_str).collect();
        let xml = self.browser_xml_post(&refs)?;
        merge_experiments(runs, &parse_experiments(&xml));
        Ok(())
    }
}

impl RecordSource for EnaHttpClient {
    fn paged_records(
        &self,
        partition: &Partition,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<RawRecord>, ScryerError> {
        match self.mode {
            SourceMode::Flat => self.search("read_run", RUN_FIELDS, partition, offset, limit),
            SourceMode::Linked => self.linked_study_page(partition, offset, limit),
        }
    }

    fn linked_records(
        &self,
        kind: EntityKind,
        expression: &str,
    ) -> Result<Vec<RawRecord>, ScryerError> {
        if kind == EntityKind::Publication {
            return Err(ScryerError::MalformedPayload(
                "publications are not browsable as linked records".to_string(),
            ));
        }
        let xml = self.browser_xml_get(expression)?;
        let mut records = parse_xml_records(&xml, kind);
        if kind == EntityKind::Run {
            self.attach_experiments(&mut records)?;
        }
        Ok(records)
    }
}

impl CitationSource for EnaHttpClient {
    fn citation_ids(
        &self,
        namespace: AccessionNamespace,
        accessions: &[Accession],
    ) -> Result<Vec<(Accession, String)>, ScryerError> {
        if accessions.is_empty() {
            return Ok(Vec::new());
        }
        debug!(%namespace, count = accessions.len(), "citation lookup");
        let refs: Vec<&str> = accessions.iter().map(Accession::as_str).collect();
        let xml = self.browser_xml_post(&refs)?;
        parse_citations(&xml)
    }
}

pub fn parse_portal_json(body: &str) -> Result<Vec<RawRecord>, ScryerError> {
    if body.trim().is_empty() {
        return Ok(Vec::new());
    }
    let rows: Vec<BTreeMap<String, serde_json::Value>> = serde_json::from_str(body)
        .map_err(|err| ScryerError::MalformedPayload(err.to_string()))?;
    Ok(rows
        .into_iter()
        .map(|row| RawRecord {
            fields: row
                .into_iter()
                .filter_map(|(key, value)| match value {
                    serde_json::Value::Null => None,
                    serde_json::Value::String(text) => Some((key, text)),
                    other => Some((key, other.to_string())),
                })
                .collect(),
            xrefs: BTreeMap::new(),
        })
        .collect())
}

pub fn parse_xml_records(xml: &str, kind: EntityKind) -> Vec<RawRecord> {
    let patterns: Vec<&Regex> = match kind {
        EntityKind::Study => vec![&*PROJECT_BLOCK, &*STUDY_BLOCK],
        EntityKind::Sample => vec![&*SAMPLE_BLOCK],
        EntityKind::Run => vec![&*RUN_BLOCK],
        EntityKind::Publication => Vec::new(),
    };
    patterns
        .iter()
        .flat_map(|pattern| pattern.captures_iter(xml))
        .map(|caps| {
            let attributes = caps.get(1).map_or("", |m| m.as_str());
            let body = caps.get(2).map_or("", |m| m.as_str());
            xml_record(kind, attributes, body)
        })
        .collect()
}

fn xml_record(kind: EntityKind, attributes: &str, body: &str) -> RawRecord {
    let mut record = RawRecord::default();
    let accession = first_capture(&ACCESSION_ATTR, attributes)
        .or_else(|| first_capture(&PRIMARY_ID, body));
    if let Some(accession) = accession {
        record
            .fields
            .insert(accession_field(kind).to_string(), accession);
    }

    match kind {
        EntityKind::Study => {
            if let Some(title) = first_capture(&TITLE, body) {
                record.fields.insert("study_title".to_string(), title);
            }
        }
        EntityKind::Run => {
            if let Some(experiment) = first_capture(&EXPERIMENT_REF, body) {
                record
                    .fields
                    .insert("experiment_accession".to_string(), experiment);
            }
            if let Some(title) = first_capture(&TITLE, body) {
                record.fields.insert("experiment_title".to_string(), title);
            }
            if let Some(description) = first_capture(&DESCRIPTION, body) {
                record.fields.insert("description".to_string(), description);
            }
        }
        EntityKind::Sample | EntityKind::Publication => {}
    }

    for caps in TAG_VALUE.captures_iter(body) {
        let tag = decode_entities(&caps[1]).to_lowercase();
        if let Some((_, field)) = ATTRIBUTE_FIELDS.iter().find(|(name, _)| *name == tag) {
            record
                .fields
                .entry(field.to_string())
                .or_insert_with(|| decode_entities(&caps[2]));
        }
    }

    for (db, id) in xref_links(body) {
        record
            .xrefs
            .entry(db.to_lowercase())
            .and_modify(|existing| {
                existing.push(',');
                existing.push_str(&id);
            })
            .or_insert(id);
    }
    record
}

pub fn parse_experiments(xml: &str) -> BTreeMap<String, BTreeMap<String, String>> {
    EXPERIMENT_BLOCK
        .captures_iter(xml)
        .filter_map(|caps| {
            let attributes = caps.get(1).map_or("", |m| m.as_str());
            let body = caps.get(2).map_or("", |m| m.as_str());
            let accession = first_capture(&ACCESSION_ATTR, attributes)
                .or_else(|| first_capture(&PRIMARY_ID, body))?;
            let fields: BTreeMap<String, String> = [
                ("library_strategy", first_capture(&LIBRARY_STRATEGY, body)),
                ("library_source", first_capture(&LIBRARY_SOURCE, body)),
                ("library_layout", first_capture(&LIBRARY_LAYOUT, body)),
                (
                    "nominal_length",
                    first_capture(&NOMINAL_LENGTH, body)
                        .or_else(|| first_capture(&SPOT_LENGTH, body)),
                ),
                ("instrument_platform", first_capture(&PLATFORM, body)),
                ("instrument_model", first_capture(&INSTRUMENT_MODEL, body)),
            ]
            .into_iter()
            .filter_map(|(field, value)| value.map(|value| (field.to_string(), value)))
            .collect();
            Some((accession, fields))
        })
        .collect()
}

pub fn merge_experiments(
    runs: &mut [RawRecord],
    experiments: &BTreeMap<String, BTreeMap<String, String>>,
) {
    for run in runs {
        let Some(fields) = experiment_accession(run).and_then(|id| experiments.get(&id)) else {
            continue;
        };
        for (field, value) in fields {
            run.fields
                .entry(field.clone())
                .or_insert_with(|| value.clone());
        }
    }
}

fn experiment_accession(run: &RawRecord) -> Option<String> {
    run.text("experiment_accession")
        .or_else(|| run.xref("ena-experiment").map(str::to_string))
}

pub fn parse_citations(xml: &str) -> Result<Vec<(Accession, String)>, ScryerError> {
    let mut citations = Vec::new();
    for caps in PROJECT_BLOCK
        .captures_iter(xml)
        .chain(STUDY_BLOCK.captures_iter(xml))
    {
        let attributes = caps.get(1).map_or("", |m| m.as_str());
        let body = caps.get(2).map_or("", |m| m.as_str());
        let Some(accession) = first_capture(&ACCESSION_ATTR, attributes)
            .or_else(|| first_capture(&PRIMARY_ID, body))
        else {
            continue;
        };
        let accession: Accession = accession
            .parse()
            .map_err(|err: ScryerError| ScryerError::MalformedPayload(err.to_string()))?;
        for (db, id) in xref_links(body) {
            if db.eq_ignore_ascii_case(PUBMED_DB) && !id.is_empty() {
                citations.push((accession.clone(), id));
            }
        }
    }
    Ok(citations)
}

fn xref_links(body: &str) -> Vec<(String, String)> {
    XREF_LINK
        .captures_iter(body)
        .map(|caps| {
            (
                decode_entities(&caps[1]),
                decode_entities(&caps[2]),
            )
        })
        .collect()
}

fn first_capture(pattern: &Regex, haystack: &str) -> Option<String> {
    pattern
        .captures(haystack)
        .and_then(|caps| caps.get(1))
        .map(|m| decode_entities(m.as_str()))
        .filter(|value| !value.is_empty())
}

fn decode_entities(value: &str) -> String {
    value
        .trim()
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}
