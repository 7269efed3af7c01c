use tracing::{info, warn};

use crate::cancel::CancelToken;
use crate::config::Settings;
use crate::domain::{Accession, FileStats, RepositoryStrategy, StatsStatus};
use crate::error::HarvestError;
use crate::http::{RetryPolicy, Transport};
use crate::providers::{Endpoints, RawFileTally, RepositoryMatcher, StrategyContext, px_xml};

/// Routes a dataset to the strategy for its hosting repository and turns
/// whatever comes back into a [`FileStats`]. Per-dataset failures never
/// escape as errors; they become `fetch-failed`, `unsupported-repository`
/// or `cancelled`.
pub struct Dispatcher<T: Transport> {
    transport: T,
    retry: RetryPolicy,
    endpoints: Endpoints,
    matcher: RepositoryMatcher,
    chain_fallback: bool,
}

impl<T: Transport> Dispatcher<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            retry: RetryPolicy::default(),
            endpoints: Endpoints::default(),
            matcher: RepositoryMatcher::default(),
            chain_fallback: true,
        }
    }

    pub fn configured(transport: T, settings: &Settings) -> Self {
        Self::new(transport)
            .with_retry(settings.retry_policy())
            .with_endpoints(settings.endpoints.clone())
            .with_matcher(settings.matcher.clone())
            .with_fallback_chain(settings.xml_fallback_chain)
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_endpoints(mut self, endpoints: Endpoints) -> Self {
        self.endpoints = endpoints;
        self
    }

    pub fn with_matcher(mut self, matcher: RepositoryMatcher) -> Self {
        self.matcher = matcher;
        self
    }

    pub fn with_fallback_chain(mut self, enabled: bool) -> Self {
        self.chain_fallback = enabled;
        self
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn select(&self, repository: &str) -> RepositoryStrategy {
        self.matcher.select(repository)
    }

    /// Validates `accession` and resolves its statistics. The only error is
    /// [`HarvestError::InvalidAccession`].
    pub fn dispatch(
        &self,
        accession: &str,
        repository: &str,
        cancel: &CancelToken,
    ) -> Result<FileStats, HarvestError> {
        let accession: Accession = accession.parse()?;
        Ok(self.stats_for(&accession, repository, cancel))
    }

    pub fn stats_for(
        &self,
        accession: &Accession,
        repository: &str,
        cancel: &CancelToken,
    ) -> FileStats {
        if cancel.is_cancelled() {
            return FileStats::cancelled();
        }
        let ctx = self.context(cancel);

        // An unlabelled dataset costs one XML fetch; its listing is reused if
        // the fallback is needed later.
        let mut prefetched = None;
        let strategy = if repository.trim().is_empty() {
            match px_xml::fetch_document(&ctx, accession) {
                Ok(document) => {
                    prefetched = Some(Ok(RawFileTally {
                        count: document.listing(),
                        bytes: None,
                    }));
                    match document.hosting_repository.as_deref() {
                        Some(label) => {
                            info!(accession = %accession, repository = label, "dispatch.detected");
                            self.select(label)
                        }
                        None => RepositoryStrategy::XmlFallback,
                    }
                }
                Err(HarvestError::Interrupted) => return FileStats::cancelled(),
                Err(err) => {
                    warn!(accession = %accession, error = %err, "dispatch.detect_failed");
                    prefetched = Some(Err(err));
                    RepositoryStrategy::XmlFallback
                }
            }
        } else {
            self.select(repository)
        };

        if strategy == RepositoryStrategy::XmlFallback {
            let outcome =
                prefetched.unwrap_or_else(|| strategy.count_raw_files(&ctx, accession));
            return settle_fallback_only(accession, outcome);
        }

        match strategy.count_raw_files(&ctx, accession) {
            Err(HarvestError::Interrupted) => FileStats::cancelled(),
            Ok(tally) if tally.count > 0 || !self.chain_fallback => {
                FileStats::ok(tally.count, tally.bytes, strategy)
            }
            Err(err) if !self.chain_fallback => {
                warn!(accession = %accession, strategy = %strategy, error = %err, "dispatch.fetch_failed");
                FileStats::fetch_failed(strategy)
            }
            primary => {
                let secondary = prefetched.unwrap_or_else(|| {
                    RepositoryStrategy::XmlFallback.count_raw_files(&ctx, accession)
                });
                settle_chain(accession, strategy, primary, secondary)
            }
        }
    }

    fn context<'a>(&'a self, cancel: &'a CancelToken) -> StrategyContext<'a, T> {
        StrategyContext {
            transport: &self.transport,
            retry: self.retry,
            endpoints: &self.endpoints,
            cancel,
        }
    }
}

fn settle_fallback_only(
    accession: &Accession,
    outcome: Result<RawFileTally, HarvestError>,
) -> FileStats {
    let strategy = RepositoryStrategy::XmlFallback;
    match outcome {
        Ok(tally) if tally.count > 0 => FileStats::ok(tally.count, tally.bytes, strategy),
        Ok(_) => {
            warn!(accession = %accession, "dispatch.no_listing");
            FileStats::unknown(StatsStatus::Unsupported, Some(strategy))
        }
        Err(HarvestError::Interrupted) => FileStats::cancelled(),
        Err(err) => {
            warn!(accession = %accession, strategy = %strategy, error = %err, "dispatch.fetch_failed");
            FileStats::fetch_failed(strategy)
        }
    }
}

fn settle_chain(
    accession: &Accession,
    strategy: RepositoryStrategy,
    primary: Result<RawFileTally, HarvestError>,
    secondary: Result<RawFileTally, HarvestError>,
) -> FileStats {
    match (primary, secondary) {
        (_, Err(HarvestError::Interrupted)) => FileStats::cancelled(),
        (_, Ok(fallback)) if fallback.count > 0 => {
            info!(accession = %accession, strategy = %strategy, files = fallback.count, "dispatch.fallback_used");
            FileStats::ok(fallback.count, fallback.bytes, RepositoryStrategy::XmlFallback)
        }
        (Ok(tally), _) => FileStats::ok(tally.count, tally.bytes, strategy),
        (Err(err), Ok(_)) => {
            warn!(accession = %accession, strategy = %strategy, error = %err, "dispatch.fetch_failed");
            FileStats::fetch_failed(strategy)
        }
        (Err(err), Err(fallback_err)) => {
            warn!(
                accession = %accession,
                strategy = %strategy,
                error = %err,
                fallback_error = %fallback_err,
                "dispatch.fetch_failed"
            );
            FileStats::fetch_failed(strategy)
        }
    }
}
