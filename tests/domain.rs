use assert_matches::assert_matches;

use px_harvest::domain::{
    Accession, DatasetRecord, EnrichedRecord, FileStats, RepositoryStrategy, StatsStatus,
    bytes_to_gb,
};
use px_harvest::error::HarvestError;

#[test]
fn parse_accession_normalizes_case_and_whitespace() {
    let accession: Accession = " pxd000001 ".parse().unwrap();
    assert_eq!(accession.as_str(), "PXD000001");
    assert_eq!(accession.to_string(), "PXD000001");
}

#[test]
fn parse_accession_rejects_other_identifiers() {
    for value in ["", "PXD", "MSV000079514", "PXD12a", "PRD000001"] {
        assert_matches!(
            value.parse::<Accession>(),
            Err(HarvestError::InvalidAccession(_)),
            "{value} should be rejected"
        );
    }
}

#[test]
fn gigabytes_round_to_two_decimals() {
    assert_eq!(bytes_to_gb(27_573_690_040), 25.68);
    assert_eq!(bytes_to_gb(13_249_974_108), 12.34);
    assert_eq!(bytes_to_gb(0), 0.0);
}

#[test]
fn non_ok_stats_report_no_count_or_size() {
    let failed = FileStats::fetch_failed(RepositoryStrategy::Pride);
    assert_eq!(failed.count(), None);
    assert_eq!(failed.size_gb(), None);
    assert!(failed.status.is_failure());

    let zero = FileStats::ok(0, Some(0), RepositoryStrategy::Massive);
    assert_eq!(zero.count(), Some(0));
    assert_eq!(zero.size_gb(), Some(0.0));

    let sizeless = FileStats::ok(4, None, RepositoryStrategy::XmlFallback);
    assert_eq!(sizeless.count(), Some(4));
    assert_eq!(sizeless.size_gb(), None);
}

#[test]
fn cancelled_counts_as_failure_but_unsupported_does_not() {
    assert!(StatsStatus::Cancelled.is_failure());
    assert!(StatsStatus::FetchFailed.is_failure());
    assert!(!StatsStatus::Unsupported.is_failure());
    assert!(!StatsStatus::Skipped.is_failure());
}

#[test]
fn enriched_record_serializes_flat_with_kebab_case_labels() {
    let accession: Accession = "PXD000001".parse().unwrap();
    let row = EnrichedRecord {
        record: DatasetRecord::bare(accession, "https://example.org/ui?pxid=PXD000001".to_string()),
        stats: FileStats::unknown(StatsStatus::Unsupported, Some(RepositoryStrategy::XmlFallback)),
    };
    let value = serde_json::to_value(&row).unwrap();
    assert_eq!(value["accession"], "PXD000001");
    assert_eq!(value["stats"]["status"], "unsupported-repository");
    assert_eq!(value["stats"]["strategy"], "xml-fallback");
}
