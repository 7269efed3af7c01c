use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use camino::Utf8PathBuf;
use directories::BaseDirs;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::RepositoryStrategy;
use crate::error::HarvestError;
use crate::http::RetryPolicy;
use crate::providers::{Endpoints, MatchMode, RepositoryMatcher};
use crate::search::WalkerOptions;

pub const WORKERS_MIN: usize = 1;
pub const WORKERS_MAX: usize = 20;
pub const DEFAULT_WORKERS: usize = 5;
pub const DEFAULT_OUTPUT: &str = "proteomexchange_data.xlsx";
pub const DEFAULT_OUTPUT_DIR: &str = "data";
pub const DEFAULT_SHEET_NAME: &str = "ProteomeXchange Datasets";
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_RETRY_BACKOFF_MS: u64 = 200;
pub const DEFAULT_PAGE_DELAY_MS: u64 = 1000;
pub const CONFIG_FILE: &str = "px-harvest.json";
const SHEET_NAME_MAX: usize = 31;

/// On-disk configuration. Every key is optional; CLI flags win over it.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub keyword: Option<String>,
    pub output: Option<String>,
    pub output_dir: Option<String>,
    pub sheet_name: Option<String>,
    pub max_datasets: Option<usize>,
    pub workers: Option<usize>,
    pub skip_stats: Option<bool>,
    pub headless: Option<bool>,
    pub browser: Option<bool>,
    pub match_mode: Option<MatchMode>,
    pub repository_aliases: BTreeMap<String, RepositoryStrategy>,
    pub timeout_secs: Option<u64>,
    pub max_attempts: Option<u32>,
    pub retry_backoff_ms: Option<u64>,
    pub page_delay_ms: Option<u64>,
    pub xml_fallback_chain: Option<bool>,
    pub endpoints: Option<Endpoints>,
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// An explicit path must exist and parse. Without one, the first of
    /// `./px-harvest.json` and `<config dir>/px-harvest/config.json` that
    /// exists is used, and no file at all means defaults.
    pub fn resolve(path: Option<&str>) -> Result<Config, HarvestError> {
        if let Some(path) = path {
            return Self::load(Path::new(path));
        }
        match Self::discover() {
            Some(path) => Self::load(&path),
            None => Ok(Config::default()),
        }
    }

    pub fn load(path: &Path) -> Result<Config, HarvestError> {
        let content =
            fs::read_to_string(path).map_err(|_| HarvestError::ConfigRead(path.to_path_buf()))?;
        let config = serde_json::from_str(&content)
            .map_err(|err| HarvestError::ConfigParse(err.to_string()))?;
        debug!(path = %path.display(), "config.loaded");
        Ok(config)
    }

    fn discover() -> Option<PathBuf> {
        let local = PathBuf::from(CONFIG_FILE);
        if local.is_file() {
            return Some(local);
        }
        BaseDirs::new()
            .map(|dirs| dirs.config_dir().join("px-harvest").join("config.json"))
            .filter(|path| path.is_file())
    }
}

/// Values taken from the command line.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub keyword: Option<String>,
    pub output: Option<String>,
    pub output_dir: Option<String>,
    pub max_datasets: Option<usize>,
    pub workers: Option<usize>,
    pub skip_stats: bool,
    pub show_browser: bool,
    pub no_browser: bool,
    pub match_mode: Option<MatchMode>,
    pub timeout_secs: Option<u64>,
    pub max_attempts: Option<u32>,
}

/// Fully validated run settings.
#[derive(Debug, Clone)]
pub struct Settings {
    pub keyword: String,
    pub output_path: Utf8PathBuf,
    pub sheet_name: String,
    pub max_datasets: Option<usize>,
    pub workers: usize,
    pub skip_stats: bool,
    pub headless: bool,
    pub use_browser: bool,
    pub matcher: RepositoryMatcher,
    pub timeout: Duration,
    pub max_attempts: u32,
    pub retry_backoff: Duration,
    pub page_delay: Duration,
    pub xml_fallback_chain: bool,
    pub endpoints: Endpoints,
}

impl Settings {
    pub fn resolve(mut config: Config, mut overrides: Overrides) -> Result<Self, HarvestError> {
        let keyword = overrides
            .keyword
            .take()
            .or_else(|| config.keyword.take())
            .map(|keyword| keyword.trim().to_string())
            .filter(|keyword| !keyword.is_empty())
            .ok_or(HarvestError::MissingKeyword)?;

        let mut settings = Self::base(config, overrides)?;
        settings.keyword = keyword;
        Ok(settings)
    }

    /// Everything except the keyword, for runs that never search.
    pub fn without_keyword(config: Config, overrides: Overrides) -> Result<Self, HarvestError> {
        Self::base(config, overrides)
    }

    fn base(config: Config, overrides: Overrides) -> Result<Self, HarvestError> {
        let workers = overrides
            .workers
            .or(config.workers)
            .unwrap_or(DEFAULT_WORKERS);
        if !(WORKERS_MIN..=WORKERS_MAX).contains(&workers) {
            return Err(HarvestError::InvalidWorkerCount {
                value: workers,
                min: WORKERS_MIN,
                max: WORKERS_MAX,
            });
        }

        let max_datasets = overrides.max_datasets.or(config.max_datasets);
        if max_datasets == Some(0) {
            return Err(HarvestError::InvalidConfig(
                "max_datasets must be at least 1".to_string(),
            ));
        }

        let timeout_secs = overrides
            .timeout_secs
            .or(config.timeout_secs)
            .unwrap_or(DEFAULT_TIMEOUT_SECS);
        if timeout_secs == 0 {
            return Err(HarvestError::InvalidConfig(
                "timeout_secs must be at least 1".to_string(),
            ));
        }

        let max_attempts = overrides
            .max_attempts
            .or(config.max_attempts)
            .unwrap_or(DEFAULT_MAX_ATTEMPTS);
        if max_attempts == 0 {
            return Err(HarvestError::InvalidConfig(
                "max_attempts must be at least 1".to_string(),
            ));
        }

        let sheet_name = config
            .sheet_name
            .unwrap_or_else(|| DEFAULT_SHEET_NAME.to_string());
        let sheet_len = sheet_name.chars().count();
        if sheet_name.trim().is_empty() || sheet_len > SHEET_NAME_MAX {
            return Err(HarvestError::InvalidConfig(format!(
                "sheet_name must be 1..={SHEET_NAME_MAX} characters, got {sheet_len}"
            )));
        }

        let output_path = output_path(
            overrides.output.or(config.output).as_deref(),
            overrides.output_dir.or(config.output_dir).as_deref(),
        );

        let mode = overrides
            .match_mode
            .or(config.match_mode)
            .unwrap_or_default();
        let matcher = config
            .repository_aliases
            .iter()
            .fold(RepositoryMatcher::new(mode), |matcher, (alias, strategy)| {
                matcher.with_alias(alias, *strategy)
            });

        Ok(Self {
            keyword: String::new(),
            output_path,
            sheet_name,
            max_datasets,
            workers,
            skip_stats: overrides.skip_stats || config.skip_stats.unwrap_or(false),
            headless: !overrides.show_browser && config.headless.unwrap_or(true),
            use_browser: !overrides.no_browser && config.browser.unwrap_or(true),
            matcher,
            timeout: Duration::from_secs(timeout_secs),
            max_attempts,
            retry_backoff: Duration::from_millis(
                config.retry_backoff_ms.unwrap_or(DEFAULT_RETRY_BACKOFF_MS),
            ),
            page_delay: Duration::from_millis(
                config.page_delay_ms.unwrap_or(DEFAULT_PAGE_DELAY_MS),
            ),
            xml_fallback_chain: config.xml_fallback_chain.unwrap_or(true),
            endpoints: config.endpoints.unwrap_or_default(),
        })
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: self.retry_backoff,
        }
    }

    pub fn walker_options(&self) -> WalkerOptions {
        WalkerOptions {
            site: self.endpoints.proteomecentral.clone(),
            keyword: self.keyword.clone(),
            max_datasets: self.max_datasets,
            page_delay: self.page_delay,
        }
    }
}

/// A bare file name lands in `output_dir`; anything with a directory part is
/// taken as given.
pub fn output_path(output: Option<&str>, output_dir: Option<&str>) -> Utf8PathBuf {
    let output = Utf8PathBuf::from(output.unwrap_or(DEFAULT_OUTPUT));
    let has_dir = output
        .parent()
        .is_some_and(|parent| !parent.as_str().is_empty());
    if output.is_absolute() || has_dir {
        return output;
    }
    Utf8PathBuf::from(output_dir.unwrap_or(DEFAULT_OUTPUT_DIR)).join(output)
}
