use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use assert_matches::assert_matches;
use serde_json::json;

use px_harvest::cancel::CancelToken;
use px_harvest::dispatch::Dispatcher;
use px_harvest::domain::{Accession, RepositoryStrategy, StatsStatus};
use px_harvest::error::HarvestError;
use px_harvest::http::{HttpResponse, RetryPolicy, Transport};
use px_harvest::providers::{Endpoints, iprox, massive, pride, px_xml};

const XML_TWO_RAW: &str = r#"<ProteomeXchangeDataset id="PXD000001">
  <DatasetSummary hostingRepository="PRIDE" title="TMT spikes"/>
  <DatasetFileList>
    <DatasetFile id="FILE_0" name="run_01.raw"/>
    <DatasetFile id="FILE_1" name="run_02.raw"/>
    <DatasetFile id="FILE_2" name="search.mzid"/>
  </DatasetFileList>
</ProteomeXchangeDataset>"#;

const XML_NO_LISTING: &str = r#"<ProteomeXchangeDataset id="PXD000003">
  <DatasetSummary hostingRepository="iProX" title="No files yet"/>
</ProteomeXchangeDataset>"#;

#[derive(Clone)]
enum Reply {
    Status(u16, String),
    Timeout,
}

/// Canned replies per URL; anything unrouted answers 404.
#[derive(Default)]
struct MockTransport {
    routes: HashMap<String, Reply>,
    calls: Mutex<HashMap<String, usize>>,
}

impl MockTransport {
    fn route(mut self, url: String, reply: Reply) -> Self {
        self.routes.insert(url, reply);
        self
    }

    fn ok(self, url: String, body: impl Into<String>) -> Self {
        self.route(url, Reply::Status(200, body.into()))
    }

    fn calls_to(&self, url: &str) -> usize {
        self.calls.lock().unwrap().get(url).copied().unwrap_or(0)
    }

    fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().values().sum()
    }
}

impl Transport for MockTransport {
    fn get(&self, url: &str) -> Result<HttpResponse, HarvestError> {
        *self.calls.lock().unwrap().entry(url.to_string()).or_default() += 1;
        match self.routes.get(url) {
            Some(Reply::Status(status, body)) => Ok(HttpResponse::new(*status, body.clone())),
            Some(Reply::Timeout) => Err(HarvestError::Timeout {
                url: url.to_string(),
            }),
            None => Ok(HttpResponse::new(404, "not found")),
        }
    }
}

fn acc(value: &str) -> Accession {
    value.parse().unwrap()
}

fn pride_url(accession: &str) -> String {
    pride::files_url(&Endpoints::default().pride, &acc(accession))
}

fn massive_url(accession: &str) -> String {
    massive::dataset_url(&Endpoints::default().massive, &acc(accession))
}

fn iprox_url(accession: &str) -> String {
    iprox::files_url(&Endpoints::default().iprox, &acc(accession))
}

fn xml_url(accession: &str) -> String {
    px_xml::document_url(&Endpoints::default().proteomecentral, &acc(accession))
}

fn dispatcher(transport: MockTransport) -> Dispatcher<MockTransport> {
    Dispatcher::new(transport).with_retry(RetryPolicy {
        max_attempts: 3,
        base_delay: Duration::ZERO,
    })
}

fn pride_listing(files: usize, total_bytes: u64) -> String {
    let each = total_bytes / files as u64;
    let last = total_bytes - each * (files as u64 - 1);
    let entries: Vec<_> = (0..files)
        .map(|index| {
            let size = if index + 1 == files { last } else { each };
            json!({
                "fileName": format!("sample_{index:03}.raw"),
                "fileSizeBytes": size,
                "fileCategory": {"value": "RAW"}
            })
        })
        .chain(std::iter::once(json!({
            "fileName": "peptides.mzid",
            "fileSizeBytes": 12_345,
            "fileCategory": {"value": "RESULT"}
        })))
        .collect();
    serde_json::to_string(&entries).unwrap()
}

#[test]
fn pride_dataset_reports_count_and_size() {
    let transport =
        MockTransport::default().ok(pride_url("PXD000001"), pride_listing(150, 27_573_690_040));
    let dispatcher = dispatcher(transport);

    let stats = dispatcher
        .dispatch("PXD000001", "PRIDE", &CancelToken::new())
        .unwrap();
    assert_eq!(stats.status, StatsStatus::Ok);
    assert_eq!(stats.count(), Some(150));
    assert_eq!(stats.total_size_bytes, Some(27_573_690_040));
    assert_eq!(stats.size_gb(), Some(25.68));
    assert_eq!(stats.strategy, Some(RepositoryStrategy::Pride));
    assert_eq!(dispatcher.transport().total_calls(), 1);
}

#[test]
fn retries_stop_at_the_attempt_limit_without_chaining() {
    let transport = MockTransport::default().route(pride_url("PXD000005"), Reply::Timeout);
    let dispatcher = dispatcher(transport).with_fallback_chain(false);

    let stats = dispatcher
        .dispatch("PXD000005", "PRIDE", &CancelToken::new())
        .unwrap();
    assert_eq!(stats.status, StatsStatus::FetchFailed);
    assert_eq!(stats.strategy, Some(RepositoryStrategy::Pride));
    assert_eq!(stats.count(), None);
    assert_eq!(dispatcher.transport().calls_to(&pride_url("PXD000005")), 3);
    assert_eq!(dispatcher.transport().total_calls(), 3);
}

#[test]
fn chained_fallback_gets_its_own_attempts() {
    let transport = MockTransport::default()
        .route(pride_url("PXD000005"), Reply::Timeout)
        .route(xml_url("PXD000005"), Reply::Timeout);
    let dispatcher = dispatcher(transport);

    let stats = dispatcher
        .dispatch("PXD000005", "PRIDE", &CancelToken::new())
        .unwrap();
    assert_eq!(stats.status, StatsStatus::FetchFailed);
    assert_eq!(dispatcher.transport().calls_to(&pride_url("PXD000005")), 3);
    assert_eq!(dispatcher.transport().calls_to(&xml_url("PXD000005")), 3);
}

#[test]
fn unknown_repository_uses_xml_listing() {
    let transport = MockTransport::default().ok(xml_url("PXD000001"), XML_TWO_RAW);
    let dispatcher = dispatcher(transport);

    let stats = dispatcher
        .dispatch("PXD000001", "UnknownRepoXYZ", &CancelToken::new())
        .unwrap();
    assert_eq!(stats.status, StatsStatus::Ok);
    assert_eq!(stats.count(), Some(2));
    assert_eq!(stats.total_size_bytes, None);
    assert_eq!(stats.size_gb(), None);
    assert_eq!(stats.strategy, Some(RepositoryStrategy::XmlFallback));
}

#[test]
fn fallback_without_listing_is_unsupported() {
    let transport = MockTransport::default().ok(xml_url("PXD000003"), XML_NO_LISTING);
    let dispatcher = dispatcher(transport);

    let stats = dispatcher
        .dispatch("PXD000003", "Panorama Public", &CancelToken::new())
        .unwrap();
    assert_eq!(stats.status, StatsStatus::Unsupported);
    assert_eq!(stats.count(), None);
}

#[test]
fn unparseable_responses_fail_the_dataset() {
    let page = "<html><body>Service temporarily unavailable</body></html>";
    let transport = MockTransport::default()
        .ok(pride_url("PXD000007"), page)
        .ok(xml_url("PXD000007"), page);
    let dispatcher = dispatcher(transport);

    let stats = dispatcher
        .dispatch("PXD000007", "PRIDE", &CancelToken::new())
        .unwrap();
    assert_eq!(stats.status, StatsStatus::FetchFailed);
    assert_eq!(stats.strategy, Some(RepositoryStrategy::Pride));
    assert_eq!(dispatcher.transport().calls_to(&pride_url("PXD000007")), 1);
    assert_eq!(dispatcher.transport().calls_to(&xml_url("PXD000007")), 1);
}

#[test]
fn failed_repository_with_empty_fallback_is_fetch_failed() {
    let transport = MockTransport::default()
        .route(pride_url("PXD000003"), Reply::Status(500, "boom".to_string()))
        .ok(xml_url("PXD000003"), XML_NO_LISTING);
    let dispatcher = dispatcher(transport);

    let stats = dispatcher
        .dispatch("PXD000003", "PRIDE", &CancelToken::new())
        .unwrap();
    assert_eq!(stats.status, StatsStatus::FetchFailed);
    assert_eq!(stats.strategy, Some(RepositoryStrategy::Pride));
    assert_eq!(stats.count(), None);
}

#[test]
fn timed_out_repository_with_empty_fallback_is_fetch_failed() {
    let transport = MockTransport::default()
        .route(massive_url("PXD000009"), Reply::Timeout)
        .ok(xml_url("PXD000009"), XML_NO_LISTING);
    let dispatcher = dispatcher(transport);

    let stats = dispatcher
        .dispatch("PXD000009", "MassIVE", &CancelToken::new())
        .unwrap();
    assert_eq!(stats.status, StatsStatus::FetchFailed);
    assert_eq!(stats.strategy, Some(RepositoryStrategy::Massive));
    assert_eq!(dispatcher.transport().calls_to(&xml_url("PXD000009")), 1);
}

#[test]
fn malformed_accession_is_rejected_before_any_request() {
    let dispatcher = dispatcher(MockTransport::default());
    assert_matches!(
        dispatcher.dispatch("PXD-12", "PRIDE", &CancelToken::new()),
        Err(HarvestError::InvalidAccession(_))
    );
    assert_eq!(dispatcher.transport().total_calls(), 0);
}

#[test]
fn iprox_not_found_falls_back_to_xml() {
    let transport = MockTransport::default().ok(xml_url("PXD000001"), XML_TWO_RAW);
    let dispatcher = dispatcher(transport);

    let stats = dispatcher
        .dispatch("PXD000001", "iProX", &CancelToken::new())
        .unwrap();
    assert_eq!(stats.status, StatsStatus::Ok);
    assert_eq!(stats.count(), Some(2));
    assert_eq!(stats.strategy, Some(RepositoryStrategy::XmlFallback));
    assert_eq!(dispatcher.transport().calls_to(&iprox_url("PXD000001")), 1);
}

#[test]
fn zero_from_repository_stays_zero_when_fallback_is_empty_too() {
    let transport = MockTransport::default().ok(xml_url("PXD000003"), XML_NO_LISTING);
    let dispatcher = dispatcher(transport);

    let stats = dispatcher
        .dispatch("PXD000003", "iProX", &CancelToken::new())
        .unwrap();
    assert_eq!(stats.status, StatsStatus::Ok);
    assert_eq!(stats.count(), Some(0));
    assert_eq!(stats.strategy, Some(RepositoryStrategy::Iprox));
}

#[test]
fn missing_repository_label_is_detected_from_xml() {
    let xml = r#"<ProteomeXchangeDataset id="PXD000002">
  <DatasetSummary hostingRepository="MassIVE" title="Yeast"/>
</ProteomeXchangeDataset>"#;
    let files: Vec<_> = (0..80)
        .map(|index| json!({"fileName": format!("raw/f{index}.raw"), "fileSizeBytes": 1_000}))
        .collect();
    let transport = MockTransport::default()
        .ok(xml_url("PXD000002"), xml)
        .ok(massive_url("PXD000002"), json!({"files": files}).to_string());
    let dispatcher = dispatcher(transport);

    let stats = dispatcher
        .dispatch("PXD000002", "", &CancelToken::new())
        .unwrap();
    assert_eq!(stats.status, StatsStatus::Ok);
    assert_eq!(stats.count(), Some(80));
    assert_eq!(stats.total_size_bytes, Some(80_000));
    assert_eq!(stats.strategy, Some(RepositoryStrategy::Massive));
    assert_eq!(dispatcher.transport().calls_to(&xml_url("PXD000002")), 1);
}

#[test]
fn detected_repository_failure_reuses_prefetched_listing() {
    let transport = MockTransport::default().ok(xml_url("PXD000001"), XML_TWO_RAW);
    let dispatcher = dispatcher(transport);

    let stats = dispatcher
        .dispatch("PXD000001", "  ", &CancelToken::new())
        .unwrap();
    assert_eq!(stats.status, StatsStatus::Ok);
    assert_eq!(stats.count(), Some(2));
    assert_eq!(stats.strategy, Some(RepositoryStrategy::XmlFallback));
    assert_eq!(dispatcher.transport().calls_to(&pride_url("PXD000001")), 1);
    assert_eq!(dispatcher.transport().calls_to(&xml_url("PXD000001")), 1);
}

#[test]
fn cancelled_token_short_circuits() {
    let cancel = CancelToken::new();
    cancel.cancel();
    let dispatcher = dispatcher(MockTransport::default());

    let stats = dispatcher.dispatch("PXD000001", "PRIDE", &cancel).unwrap();
    assert_eq!(stats.status, StatsStatus::Cancelled);
    assert_eq!(dispatcher.transport().total_calls(), 0);
}
