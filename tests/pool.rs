use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use serde_json::json;

use px_harvest::app::{ProgressEvent, ProgressSink};
use px_harvest::cancel::CancelToken;
use px_harvest::dispatch::Dispatcher;
use px_harvest::domain::{Accession, DatasetRecord, StatsStatus};
use px_harvest::error::HarvestError;
use px_harvest::http::{HttpResponse, RetryPolicy, Transport};
use px_harvest::pool::StatsPool;

/// Answers every PRIDE listing with `n` raw files, where `n` is the numeric
/// part of the accession. Accessions listed in `failing` time out.
struct NumberedTransport {
    failing: Vec<&'static str>,
    trip: Option<(&'static str, CancelToken)>,
}

impl NumberedTransport {
    fn new() -> Self {
        Self {
            failing: Vec::new(),
            trip: None,
        }
    }
}

impl Transport for NumberedTransport {
    fn get(&self, url: &str) -> Result<HttpResponse, HarvestError> {
        if let Some((accession, cancel)) = &self.trip {
            if url.contains(accession) {
                cancel.cancel();
                thread::sleep(Duration::from_millis(500));
            }
        }
        if self.failing.iter().any(|accession| url.contains(accession)) {
            return Err(HarvestError::Timeout {
                url: url.to_string(),
            });
        }
        let digits: String = url
            .rsplit("PXD")
            .next()
            .unwrap_or_default()
            .chars()
            .take_while(|ch| ch.is_ascii_digit())
            .collect();
        let files: usize = digits.parse().unwrap_or(0);
        let listing: Vec<_> = (0..files)
            .map(|index| {
                json!({
                    "fileName": format!("run{index}.raw"),
                    "fileSizeBytes": 1_073_741_824u64,
                    "fileCategory": {"value": "RAW"}
                })
            })
            .collect();
        Ok(HttpResponse::new(200, json!(listing).to_string()))
    }
}

#[derive(Default)]
struct RecordingSink {
    events: Mutex<Vec<String>>,
}

impl ProgressSink for RecordingSink {
    fn event(&self, event: ProgressEvent) {
        self.events.lock().unwrap().push(event.message);
    }
}

fn record(accession: &str) -> DatasetRecord {
    let accession: Accession = accession.parse().unwrap();
    let mut record = DatasetRecord::bare(accession, String::new());
    record.repository = "PRIDE".to_string();
    record
}

fn pool(transport: NumberedTransport, workers: usize) -> StatsPool<NumberedTransport> {
    let dispatcher = Dispatcher::new(transport)
        .with_retry(RetryPolicy {
            max_attempts: 2,
            base_delay: Duration::ZERO,
        })
        .with_fallback_chain(false);
    StatsPool::new(Arc::new(dispatcher), workers)
}

#[test]
fn every_record_is_resolved_once_in_input_order() {
    let records: Vec<_> = ["PXD000005", "PXD000001", "PXD000004", "PXD000002", "PXD000003"]
        .into_iter()
        .map(record)
        .collect();
    let pool = pool(NumberedTransport::new(), 3);
    let sink = RecordingSink::default();

    let outcome = pool.run(&records, &CancelToken::new(), &sink).unwrap();

    let counts: Vec<_> = outcome.stats.iter().map(|stats| stats.count()).collect();
    assert_eq!(counts, vec![Some(5), Some(1), Some(4), Some(2), Some(3)]);
    assert!(outcome.stats.iter().all(|stats| stats.size_gb() == stats.count().map(|c| c as f64)));
    assert_eq!(outcome.failure_rate(), 0.0);
    assert!(!outcome.interrupted);

    let progress = pool.progress().snapshot();
    assert_eq!((progress.completed, progress.total), (5, 5));
    assert_eq!(progress.ratio(), 1.0);

    let events = sink.events.lock().unwrap();
    let done: Vec<_> = events.iter().filter(|event| event.starts_with("stats.done")).collect();
    assert_eq!(done.len(), 5);
    assert!(done.iter().any(|event| event.ends_with("completed=5 total=5")));
}

#[test]
fn failures_count_toward_failure_rate() {
    let records: Vec<_> = ["PXD000001", "PXD000002", "PXD000003", "PXD000004", "PXD000005"]
        .into_iter()
        .map(record)
        .collect();
    let transport = NumberedTransport {
        failing: vec!["PXD000003"],
        trip: None,
    };
    let outcome = pool(transport, 2)
        .run(&records, &CancelToken::new(), &RecordingSink::default())
        .unwrap();

    assert_eq!(outcome.stats[2].status, StatsStatus::FetchFailed);
    assert_eq!(outcome.stats[2].count(), None);
    assert_eq!(outcome.failed, 1);
    assert_eq!(outcome.failure_rate(), 0.2);
}

#[test]
fn empty_batch_needs_no_workers() {
    let outcome = pool(NumberedTransport::new(), 4)
        .run(&[], &CancelToken::new(), &RecordingSink::default())
        .unwrap();
    assert!(outcome.stats.is_empty());
    assert_eq!(outcome.failure_rate(), 0.0);
}

#[test]
fn interrupt_keeps_resolved_results_and_marks_the_rest() {
    let cancel = CancelToken::new();
    let records: Vec<_> = ["PXD000001", "PXD000002", "PXD000003", "PXD000004"]
        .into_iter()
        .map(record)
        .collect();
    let transport = NumberedTransport {
        failing: Vec::new(),
        trip: Some(("PXD000002", cancel.clone())),
    };

    let started = Instant::now();
    let outcome = pool(transport, 1)
        .run(&records, &cancel, &RecordingSink::default())
        .unwrap();
    assert!(started.elapsed() < Duration::from_millis(450));

    let statuses: Vec<_> = outcome.stats.iter().map(|stats| stats.status).collect();
    assert_eq!(
        statuses,
        vec![
            StatsStatus::Ok,
            StatsStatus::Cancelled,
            StatsStatus::Cancelled,
            StatsStatus::Cancelled
        ]
    );
    assert_eq!(outcome.stats[0].count(), Some(1));
    assert!(outcome.interrupted);
    assert_eq!(outcome.cancelled, 3);
    assert_eq!(outcome.failure_rate(), 0.75);
}
