use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::app::{ProgressEvent, ProgressSink};
use crate::cancel::CancelToken;
use crate::dispatch::Dispatcher;
use crate::domain::{Accession, DatasetRecord, FileStats, StatsStatus};
use crate::error::HarvestError;
use crate::http::Transport;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

type Job = (Accession, String);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Progress {
    pub completed: usize,
    pub total: usize,
}

impl Progress {
    pub fn ratio(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.completed as f64 / self.total as f64
    }
}

/// Completed/total counter shared with whoever wants to watch a pool run.
#[derive(Debug, Clone, Default)]
pub struct ProgressCounter {
    completed: Arc<AtomicUsize>,
    total: Arc<AtomicUsize>,
}

impl ProgressCounter {
    pub fn snapshot(&self) -> Progress {
        Progress {
            completed: self.completed.load(Ordering::SeqCst),
            total: self.total.load(Ordering::SeqCst),
        }
    }

    fn reset(&self, total: usize) {
        self.total.store(total, Ordering::SeqCst);
        self.completed.store(0, Ordering::SeqCst);
    }

    fn bump(&self) -> usize {
        self.completed.fetch_add(1, Ordering::SeqCst) + 1
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PoolOutcome {
    /// One entry per input record, in input order.
    pub stats: Vec<FileStats>,
    pub failed: usize,
    pub cancelled: usize,
    pub interrupted: bool,
}

impl PoolOutcome {
    fn empty() -> Self {
        Self {
            stats: Vec::new(),
            failed: 0,
            cancelled: 0,
            interrupted: false,
        }
    }

    pub fn failure_rate(&self) -> f64 {
        if self.stats.is_empty() {
            return 0.0;
        }
        let failures = self.stats.iter().filter(|stats| stats.status.is_failure()).count();
        failures as f64 / self.stats.len() as f64
    }
}

/// Runs the dispatcher over a batch of records on a fixed number of named
/// worker threads. Results come back over a channel keyed by accession and
/// are reassembled in input order.
pub struct StatsPool<T: Transport + 'static> {
    dispatcher: Arc<Dispatcher<T>>,
    workers: usize,
    progress: ProgressCounter,
}

impl<T: Transport + 'static> StatsPool<T> {
    pub fn new(dispatcher: Arc<Dispatcher<T>>, workers: usize) -> Self {
        Self {
            dispatcher,
            workers: workers.max(1),
            progress: ProgressCounter::default(),
        }
    }

    pub fn progress(&self) -> ProgressCounter {
        self.progress.clone()
    }

    pub fn run(
        &self,
        records: &[DatasetRecord],
        cancel: &CancelToken,
        sink: &dyn ProgressSink,
    ) -> Result<PoolOutcome, HarvestError> {
        let total = records.len();
        self.progress.reset(total);
        if total == 0 {
            return Ok(PoolOutcome::empty());
        }

        let queue: Arc<Mutex<VecDeque<Job>>> = Arc::new(Mutex::new(
            records
                .iter()
                .map(|record| (record.accession.clone(), record.repository.clone()))
                .collect(),
        ));
        let (tx, rx) = mpsc::channel();
        let spawned = self.spawn_workers(&queue, &tx, cancel)?;
        drop(tx);
        info!(total, workers = spawned, "stats.start");

        let started = Instant::now();
        let mut resolved: HashMap<Accession, FileStats> = HashMap::with_capacity(total);
        let mut interrupted = false;
        let mut accept = |accession: Accession, stats: FileStats| {
            if resolved.contains_key(&accession) {
                return;
            }
            let completed = self.progress.bump();
            info!(accession = %accession, status = %stats.status, files = ?stats.count(), "stats.resolved");
            sink.event(ProgressEvent {
                message: format!(
                    "stats.done {accession} {} completed={completed} total={total}",
                    stats.status
                ),
                elapsed: Some(started.elapsed()),
            });
            resolved.insert(accession, stats);
        };

        loop {
            if cancel.is_cancelled() {
                interrupted = true;
                while let Ok((accession, stats)) = rx.try_recv() {
                    accept(accession, stats);
                }
                break;
            }
            match rx.recv_timeout(POLL_INTERVAL) {
                Ok((accession, stats)) => accept(accession, stats),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        if interrupted {
            warn!(resolved = resolved.len(), total, "stats.interrupted");
        }
        let stats: Vec<FileStats> = records
            .iter()
            .map(|record| match resolved.get(&record.accession) {
                Some(stats) => stats.clone(),
                None if interrupted => FileStats::cancelled(),
                None => {
                    warn!(accession = %record.accession, "stats.worker_lost");
                    FileStats::unknown(StatsStatus::FetchFailed, None)
                }
            })
            .collect();

        let failed = count_status(&stats, StatsStatus::FetchFailed);
        let cancelled = count_status(&stats, StatsStatus::Cancelled);
        let outcome = PoolOutcome {
            stats,
            failed,
            cancelled,
            interrupted: interrupted || cancelled > 0,
        };
        info!(
            total,
            failed,
            cancelled,
            failure_rate = outcome.failure_rate(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "stats.finish"
        );
        Ok(outcome)
    }

    fn spawn_workers(
        &self,
        queue: &Arc<Mutex<VecDeque<Job>>>,
        tx: &Sender<(Accession, FileStats)>,
        cancel: &CancelToken,
    ) -> Result<usize, HarvestError> {
        let wanted = self.workers.min(queue_len(queue)).max(1);
        let mut spawned = 0;
        for index in 0..wanted {
            let queue = Arc::clone(queue);
            let tx = tx.clone();
            let dispatcher = Arc::clone(&self.dispatcher);
            let cancel = cancel.clone();
            let result = thread::Builder::new()
                .name(format!("stats-{index}"))
                .spawn(move || work(&*dispatcher, &*queue, &tx, &cancel));
            match result {
                Ok(_) => spawned += 1,
                Err(err) if spawned == 0 => return Err(HarvestError::WorkerSpawn(err.to_string())),
                Err(err) => {
                    warn!(index, error = %err, "stats.spawn_failed");
                    break;
                }
            }
        }
        Ok(spawned)
    }
}

// Workers are detached: after a cancel the collector stops listening and any
// call still in flight finishes into a closed channel.
fn work<T: Transport>(
    dispatcher: &Dispatcher<T>,
    queue: &Mutex<VecDeque<Job>>,
    tx: &Sender<(Accession, FileStats)>,
    cancel: &CancelToken,
) {
    loop {
        if cancel.is_cancelled() {
            break;
        }
        let job = match queue.lock() {
            Ok(mut queue) => queue.pop_front(),
            Err(_) => None,
        };
        let Some((accession, repository)) = job else {
            break;
        };
        debug!(accession = %accession, repository = %repository, "stats.dispatch");
        let stats = dispatcher.stats_for(&accession, &repository, cancel);
        if tx.send((accession, stats)).is_err() {
            break;
        }
    }
}

fn queue_len(queue: &Mutex<VecDeque<Job>>) -> usize {
    queue.lock().map(|queue| queue.len()).unwrap_or(0)
}

fn count_status(stats: &[FileStats], status: StatsStatus) -> usize {
    stats.iter().filter(|stats| stats.status == status).count()
}
