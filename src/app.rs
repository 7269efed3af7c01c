use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::cancel::CancelToken;
use crate::config::Settings;
use crate::dispatch::Dispatcher;
use crate::domain::{DatasetRecord, EnrichedRecord, FileStats, StatsStatus};
use crate::error::HarvestError;
use crate::export::{self, ExportOptions};
use crate::http::Transport;
use crate::pool::StatsPool;
use crate::search::{DatasetWalker, PageSource};

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub ok: usize,
    pub unsupported: usize,
    pub fetch_failed: usize,
    pub cancelled: usize,
    pub skipped: usize,
}

impl StatusCounts {
    pub fn tally(rows: &[EnrichedRecord]) -> Self {
        let mut counts = Self::default();
        for row in rows {
            match row.stats.status {
                StatsStatus::Ok => counts.ok += 1,
                StatsStatus::Unsupported => counts.unsupported += 1,
                StatsStatus::FetchFailed => counts.fetch_failed += 1,
                StatsStatus::Cancelled => counts.cancelled += 1,
                StatsStatus::Skipped => counts.skipped += 1,
            }
        }
        counts
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HarvestResult {
    pub keyword: String,
    pub output_path: Option<String>,
    pub datasets: usize,
    pub duplicates_dropped: usize,
    pub statuses: StatusCounts,
    pub failure_rate: f64,
    pub interrupted: bool,
    pub generated_at: DateTime<Utc>,
    pub rows: Vec<EnrichedRecord>,
}

/// Keeps the first record seen for each accession, in arrival order.
pub fn dedupe_records(records: Vec<DatasetRecord>) -> (Vec<DatasetRecord>, usize) {
    let before = records.len();
    let mut seen = HashSet::with_capacity(before);
    let unique: Vec<DatasetRecord> = records
        .into_iter()
        .filter(|record| seen.insert(record.accession.clone()))
        .collect();
    let dropped = before - unique.len();
    (unique, dropped)
}

pub struct Harvester<T: Transport + 'static> {
    dispatcher: Arc<Dispatcher<T>>,
    settings: Settings,
}

impl<T: Transport + 'static> Harvester<T> {
    pub fn new(transport: T, settings: Settings) -> Self {
        let dispatcher = Arc::new(Dispatcher::configured(transport, &settings));
        Self {
            dispatcher,
            settings,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn dispatcher(&self) -> &Dispatcher<T> {
        &self.dispatcher
    }

    /// Search, statistics and export in one go.
    pub fn run(
        &self,
        source: &dyn PageSource,
        cancel: &CancelToken,
        sink: &dyn ProgressSink,
    ) -> Result<HarvestResult, HarvestError> {
        let records = self.search(source, cancel, sink)?;
        self.harvest_records(records, cancel, sink)
    }

    /// Walks the search results. Fails only when the first results page
    /// cannot be loaded; later page failures end the walk early.
    pub fn search(
        &self,
        source: &dyn PageSource,
        cancel: &CancelToken,
        sink: &dyn ProgressSink,
    ) -> Result<Vec<DatasetRecord>, HarvestError> {
        let started = Instant::now();
        sink.event(ProgressEvent {
            message: format!("phase=Search; keyword={}", self.settings.keyword),
            elapsed: None,
        });
        info!(keyword = %self.settings.keyword, max = ?self.settings.max_datasets, "search.start");

        let mut walker = DatasetWalker::new(source, self.settings.walker_options(), cancel.clone());
        let mut records = Vec::new();
        for record in walker.by_ref() {
            sink.event(ProgressEvent {
                message: format!(
                    "search.dataset {} discovered={}",
                    record.accession,
                    records.len() + 1
                ),
                elapsed: Some(started.elapsed()),
            });
            records.push(record);
        }
        if let Some(err) = walker.take_failure() {
            error!(error = %err, "search.unreachable");
            return Err(err);
        }
        if cancel.is_cancelled() {
            warn!(found = records.len(), "search.interrupted");
        }
        info!(found = records.len(), elapsed_ms = started.elapsed().as_millis() as u64, "search.finish");
        Ok(records)
    }

    /// Dedupe, enrich and export records that are already in hand.
    pub fn harvest_records(
        &self,
        records: Vec<DatasetRecord>,
        cancel: &CancelToken,
        sink: &dyn ProgressSink,
    ) -> Result<HarvestResult, HarvestError> {
        let (records, duplicates_dropped) = dedupe_records(records);
        if duplicates_dropped > 0 {
            info!(dropped = duplicates_dropped, "dedupe.dropped");
        }

        let (rows, failure_rate, mut interrupted) = self.enrich(records, cancel, sink)?;
        interrupted |= cancel.is_cancelled();

        sink.event(ProgressEvent {
            message: format!(
                "phase=Export; path={}",
                self.settings.output_path
            ),
            elapsed: None,
        });
        let options = ExportOptions {
            sheet_name: self.settings.sheet_name.clone(),
            include_stats: !self.settings.skip_stats,
        };
        let output_path = export::export(&rows, &self.settings.output_path, &options)?;

        let result = HarvestResult {
            keyword: self.settings.keyword.clone(),
            output_path: output_path.map(|path| path.to_string()),
            datasets: rows.len(),
            duplicates_dropped,
            statuses: StatusCounts::tally(&rows),
            failure_rate,
            interrupted,
            generated_at: Utc::now(),
            rows,
        };
        sink.event(ProgressEvent {
            message: format!(
                "phase=Done; datasets={} ok={} failed={}",
                result.datasets,
                result.statuses.ok,
                result.statuses.fetch_failed + result.statuses.cancelled
            ),
            elapsed: None,
        });
        info!(
            datasets = result.datasets,
            duplicates = duplicates_dropped,
            failure_rate = result.failure_rate,
            interrupted = result.interrupted,
            "harvest.finish"
        );
        Ok(result)
    }

    /// Pairs every record with exactly one [`FileStats`]. Returns the rows,
    /// the failure rate and whether the pool was interrupted.
    pub fn enrich(
        &self,
        records: Vec<DatasetRecord>,
        cancel: &CancelToken,
        sink: &dyn ProgressSink,
    ) -> Result<(Vec<EnrichedRecord>, f64, bool), HarvestError> {
        if self.settings.skip_stats {
            sink.event(ProgressEvent {
                message: "phase=Stats; skipped".to_string(),
                elapsed: None,
            });
            let rows = records
                .into_iter()
                .map(|record| EnrichedRecord {
                    record,
                    stats: FileStats::skipped(),
                })
                .collect();
            return Ok((rows, 0.0, false));
        }

        sink.event(ProgressEvent {
            message: format!("phase=Stats; total={}", records.len()),
            elapsed: None,
        });
        let pool = StatsPool::new(Arc::clone(&self.dispatcher), self.settings.workers);
        let outcome = pool.run(&records, cancel, sink)?;
        let failure_rate = outcome.failure_rate();
        let interrupted = outcome.interrupted;
        let rows = records
            .into_iter()
            .zip(outcome.stats)
            .map(|(record, stats)| EnrichedRecord { record, stats })
            .collect();
        Ok((rows, failure_rate, interrupted))
    }

    /// Statistics for a single accession, detecting the repository when no
    /// label is given.
    pub fn stats(
        &self,
        accession: &str,
        repository: Option<&str>,
        cancel: &CancelToken,
    ) -> Result<FileStats, HarvestError> {
        self.dispatcher
            .dispatch(accession, repository.unwrap_or_default(), cancel)
    }
}
