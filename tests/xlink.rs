use assert_matches::assert_matches;

use mgscryer::error::ScryerError;
use mgscryer::graph::parse_xlink_ids;

fn ids(expression: &str) -> Vec<String> {
    parse_xlink_ids(expression)
        .unwrap()
        .into_iter()
        .map(|accession| accession.to_string())
        .collect()
}

#[test]
fn expands_a_range() {
    assert_eq!(
        ids("ERR1000-ERR1003"),
        ["ERR1000", "ERR1001", "ERR1002", "ERR1003"]
    );
}

#[test]
fn mixes_ranges_and_singletons() {
    assert_eq!(
        ids("ERR1000-ERR1002,ERR2000"),
        ["ERR1000", "ERR1001", "ERR1002", "ERR2000"]
    );
    assert_eq!(ids(" SAMEA1 , SAMEA5-SAMEA6 "), ["SAMEA1", "SAMEA5", "SAMEA6"]);
}

#[test]
fn keeps_zero_padding() {
    assert_eq!(
        ids("SRR0009-SRR0012"),
        ["SRR0009", "SRR0010", "SRR0011", "SRR0012"]
    );
}

#[test]
fn single_element_range() {
    assert_eq!(ids("ERR42-ERR42"), ["ERR42"]);
}

#[test]
fn empty_expression_has_no_ids() {
    assert!(ids("").is_empty());
    assert!(ids(" , ").is_empty());
}

#[test]
fn rejects_bad_ranges() {
    assert_matches!(
        parse_xlink_ids("ERR1000-SRR1003"),
        Err(ScryerError::InvalidRange(_))
    );
    assert_matches!(
        parse_xlink_ids("ERR1003-ERR1000"),
        Err(ScryerError::InvalidRange(_))
    );
    assert_matches!(
        parse_xlink_ids("ERR1-ERR9999999"),
        Err(ScryerError::InvalidRange(_))
    );
    assert_matches!(
        parse_xlink_ids("1000-1003"),
        Err(ScryerError::InvalidRange(_))
    );
}

#[test]
fn rejects_bad_singletons() {
    assert_matches!(
        parse_xlink_ids("ERR1 ERR2"),
        Err(ScryerError::InvalidAccession(_))
    );
}
