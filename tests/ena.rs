use assert_matches::assert_matches;

use mgscryer::domain::EntityKind;
use mgscryer::ena::{
    merge_experiments, parse_citations, parse_experiments, parse_portal_json, parse_xml_records,
};
use mgscryer::entity::{Run, Sample};
use mgscryer::error::ScryerError;

const PORTAL_PAGE: &str = r#"[
  {
    "run_accession": "ERR5242652",
    "study_accession": "PRJEB42399",
    "sample_accession": "SAMEA7992856",
    "host": "Homo sapiens",
    "environment_biome": "",
    "nominal_length": 200,
    "read_count": "17596",
    "instrument_platform": null,
    "last_updated": "2021-02-04"
  }
]"#;

const SAMPLE_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<SAMPLE_SET>
  <SAMPLE alias="gut-01" accession="SAMEA7992856" broker_name="EMG">
    <IDENTIFIERS>
      <PRIMARY_ID>SAMEA7992856</PRIMARY_ID>
    </IDENTIFIERS>
    <TITLE>Stool sample</TITLE>
    <SAMPLE_LINKS>
      <SAMPLE_LINK>
        <XREF_LINK>
          <DB>ENA-RUN</DB>
          <ID>ERR5242652-ERR5242653</ID>
        </XREF_LINK>
      </SAMPLE_LINK>
    </SAMPLE_LINKS>
    <SAMPLE_ATTRIBUTES>
      <SAMPLE_ATTRIBUTE>
        <TAG>host scientific name</TAG>
        <VALUE>Homo sapiens</VALUE>
      </SAMPLE_ATTRIBUTE>
      <SAMPLE_ATTRIBUTE>
        <TAG>environment (biome)</TAG>
        <VALUE>gut &amp; intestine</VALUE>
      </SAMPLE_ATTRIBUTE>
      <SAMPLE_ATTRIBUTE>
        <TAG>ENA-LAST-UPDATE</TAG>
        <VALUE>2021-02-04</VALUE>
      </SAMPLE_ATTRIBUTE>
    </SAMPLE_ATTRIBUTES>
  </SAMPLE>
</SAMPLE_SET>"#;

const RUN_XML: &str = r#"<RUN_SET>
  <RUN accession="ERR5242652">
    <IDENTIFIERS><PRIMARY_ID>ERR5242652</PRIMARY_ID></IDENTIFIERS>
    <TITLE>Illumina HiSeq 4000 paired end sequencing</TITLE>
    <RUN_ATTRIBUTES>
      <RUN_ATTRIBUTE><TAG>ENA-SPOT-COUNT</TAG><VALUE>17596</VALUE></RUN_ATTRIBUTE>
    </RUN_ATTRIBUTES>
  </RUN>
  <RUN accession="ERR5242653">
    <TITLE>Illumina HiSeq 4000 paired end sequencing</TITLE>
  </RUN>
</RUN_SET>"#;

const PROJECT_XML: &str = r#"<PROJECT_SET>
  <PROJECT accession="PRJEB42399" alias="ena-STUDY-X">
    <IDENTIFIERS><PRIMARY_ID>PRJEB42399</PRIMARY_ID></IDENTIFIERS>
    <TITLE>Gut microbiome of healthy adults</TITLE>
    <PROJECT_LINKS>
      <PROJECT_LINK><XREF_LINK><DB>PUBMED</DB><ID>33510456</ID></XREF_LINK></PROJECT_LINK>
      <PROJECT_LINK><XREF_LINK><DB>ENA-SAMPLE</DB><ID>SAMEA7992856-SAMEA7992860</ID></XREF_LINK></PROJECT_LINK>
    </PROJECT_LINKS>
  </PROJECT>
</PROJECT_SET>
<STUDY_SET>
  <STUDY accession="ERP126155">
    <DESCRIPTOR><STUDY_TITLE>Soil metagenome</STUDY_TITLE></DESCRIPTOR>
    <STUDY_LINKS>
      <STUDY_LINK><XREF_LINK><DB>PUBMED</DB><ID>29335555</ID></XREF_LINK></STUDY_LINK>
      <STUDY_LINK><XREF_LINK><DB>PUBMED</DB><ID>29335556</ID></XREF_LINK></STUDY_LINK>
    </STUDY_LINKS>
  </STUDY>
</STUDY_SET>"#;

const LINKED_RUN_XML: &str = r#"<RUN_SET>
  <RUN accession="ERR9000001">
    <TITLE>NextSeq 500 paired end sequencing</TITLE>
    <EXPERIMENT_REF accession="ERX8000001"/>
    <RUN_ATTRIBUTES>
      <RUN_ATTRIBUTE><TAG>ENA-SPOT-COUNT</TAG><VALUE>500</VALUE></RUN_ATTRIBUTE>
    </RUN_ATTRIBUTES>
  </RUN>
  <RUN accession="ERR9000002">
    <RUN_LINKS>
      <RUN_LINK><XREF_LINK><DB>ENA-EXPERIMENT</DB><ID>ERX8000002</ID></XREF_LINK></RUN_LINK>
    </RUN_LINKS>
  </RUN>
</RUN_SET>"#;

const EXPERIMENT_XML: &str = r#"<EXPERIMENT_SET>
  <EXPERIMENT accession="ERX8000001">
    <DESIGN>
      <LIBRARY_DESCRIPTOR>
        <LIBRARY_STRATEGY>WGS</LIBRARY_STRATEGY>
        <LIBRARY_SOURCE>METAGENOMIC</LIBRARY_SOURCE>
        <LIBRARY_SELECTION>RANDOM</LIBRARY_SELECTION>
        <LIBRARY_LAYOUT>
          <PAIRED NOMINAL_LENGTH="350"/>
        </LIBRARY_LAYOUT>
      </LIBRARY_DESCRIPTOR>
    </DESIGN>
    <PLATFORM>
      <ILLUMINA>
        <INSTRUMENT_MODEL>NextSeq 500</INSTRUMENT_MODEL>
      </ILLUMINA>
    </PLATFORM>
  </EXPERIMENT>
  <EXPERIMENT accession="ERX8000002">
    <DESIGN>
      <LIBRARY_DESCRIPTOR>
        <LIBRARY_STRATEGY>RNA-Seq</LIBRARY_STRATEGY>
        <LIBRARY_SOURCE>METATRANSCRIPTOMIC</LIBRARY_SOURCE>
        <LIBRARY_LAYOUT><SINGLE/></LIBRARY_LAYOUT>
      </LIBRARY_DESCRIPTOR>
      <SPOT_DECODE_SPEC><SPOT_LENGTH>150</SPOT_LENGTH></SPOT_DECODE_SPEC>
    </DESIGN>
    <PLATFORM><ILLUMINA><INSTRUMENT_MODEL>HiSeq X Ten</INSTRUMENT_MODEL></ILLUMINA></PLATFORM>
  </EXPERIMENT>
</EXPERIMENT_SET>"#;

#[test]
fn portal_page_decodes_into_records() {
    let records = parse_portal_json(PORTAL_PAGE).unwrap();
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(record.text("nominal_length").as_deref(), Some("200"));
    assert_eq!(record.text("instrument_platform"), None);
    assert_eq!(record.text("environment_biome"), None);

    let run = Run::from_record(record).unwrap();
    assert_eq!(run.read_count, Some(17596));
    assert_eq!(run.last_update.as_deref(), Some("2021-02-04"));
}

#[test]
fn empty_portal_body_is_an_empty_page() {
    assert!(parse_portal_json("").unwrap().is_empty());
    assert!(parse_portal_json("[]").unwrap().is_empty());
}

#[test]
fn broken_portal_body_is_malformed() {
    assert_matches!(
        parse_portal_json("<html>Service Unavailable</html>"),
        Err(ScryerError::MalformedPayload(_))
    );
}

#[test]
fn sample_xml_maps_attributes_and_links() {
    let records = parse_xml_records(SAMPLE_XML, EntityKind::Sample);
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(record.xref("ena-run"), Some("ERR5242652-ERR5242653"));

    let sample = Sample::from_record(record).unwrap();
    assert_eq!(sample.accession.as_str(), "SAMEA7992856");
    assert_eq!(sample.host.as_deref(), Some("Homo sapiens"));
    assert_eq!(sample.environment_biome.as_deref(), Some("gut & intestine"));
    assert_eq!(sample.last_update.as_deref(), Some("2021-02-04"));
}

#[test]
fn run_xml_reads_every_block() {
    let records = parse_xml_records(RUN_XML, EntityKind::Run);
    let runs: Vec<Run> = records
        .iter()
        .map(|record| Run::from_record(record).unwrap())
        .collect();
    assert_eq!(runs.len(), 2);
    assert_eq!(runs[0].read_count, Some(17596));
    assert_eq!(
        runs[1].experiment_title.as_deref(),
        Some("Illumina HiSeq 4000 paired end sequencing")
    );
    assert_eq!(runs[1].read_count, None);
}

#[test]
fn study_xml_reads_projects_and_studies() {
    let records = parse_xml_records(PROJECT_XML, EntityKind::Study);
    assert_eq!(records.len(), 2);
    assert_eq!(
        records[0].xref("ena-sample"),
        Some("SAMEA7992856-SAMEA7992860")
    );
    assert_eq!(records[1].text("study_title").as_deref(), Some("Soil metagenome"));
}

#[test]
fn citations_keep_only_pubmed_links() {
    let citations: Vec<(String, String)> = parse_citations(PROJECT_XML)
        .unwrap()
        .into_iter()
        .map(|(accession, id)| (accession.to_string(), id))
        .collect();
    assert_eq!(
        citations,
        vec![
            ("PRJEB42399".to_string(), "33510456".to_string()),
            ("ERP126155".to_string(), "29335555".to_string()),
            ("ERP126155".to_string(), "29335556".to_string()),
        ]
    );
}

#[test]
fn linked_runs_take_sequencing_fields_from_their_experiment() {
    let mut records = parse_xml_records(LINKED_RUN_XML, EntityKind::Run);
    merge_experiments(&mut records, &parse_experiments(EXPERIMENT_XML));
    let runs: Vec<Run> = records
        .iter()
        .map(|record| Run::from_record(record).unwrap())
        .collect();

    assert_eq!(runs[0].library_strategy.as_deref(), Some("WGS"));
    assert_eq!(runs[0].library_source.as_deref(), Some("METAGENOMIC"));
    assert_eq!(runs[0].library_layout.as_deref(), Some("PAIRED"));
    assert_eq!(runs[0].nominal_length, Some(350));
    assert_eq!(runs[0].instrument_platform.as_deref(), Some("ILLUMINA"));
    assert_eq!(runs[0].instrument_model.as_deref(), Some("NextSeq 500"));
    assert_eq!(runs[0].read_count, Some(500));

    assert_eq!(runs[1].library_strategy.as_deref(), Some("RNA-Seq"));
    assert_eq!(runs[1].library_layout.as_deref(), Some("SINGLE"));
    assert_eq!(runs[1].nominal_length, Some(150));
    assert_eq!(runs[1].instrument_model.as_deref(), Some("HiSeq X Ten"));
}
