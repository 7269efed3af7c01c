use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::HarvestError;

const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Accession(String);

impl Accession {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Accession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Accession {
    type Err = HarvestError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_uppercase();
        let digits = normalized.strip_prefix("PXD").unwrap_or_default();
        let is_valid = !digits.is_empty() && digits.chars().all(|ch| ch.is_ascii_digit());
        if !is_valid {
            return Err(HarvestError::InvalidAccession(value.to_string()));
        }
        Ok(Self(normalized))
    }
}

impl TryFrom<String> for Accession {
    type Error = HarvestError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Accession> for String {
    fn from(value: Accession) -> Self {
        value.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DatasetRecord {
    pub accession: Accession,
    pub title: String,
    pub lab_head: String,
    pub description: String,
    pub instruments: String,
    pub keywords: String,
    pub repository: String,
    pub metadata_url: String,
}

impl DatasetRecord {
    pub fn bare(accession: Accession, metadata_url: String) -> Self {
        Self {
            accession,
            title: String::new(),
            lab_head: String::new(),
            description: String::new(),
            instruments: String::new(),
            keywords: String::new(),
            repository: String::new(),
            metadata_url,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RepositoryStrategy {
    Pride,
    Massive,
    Iprox,
    Jpost,
    XmlFallback,
}

impl RepositoryStrategy {
    pub fn label(self) -> &'static str {
        match self {
            RepositoryStrategy::Pride => "PRIDE",
            RepositoryStrategy::Massive => "MassIVE",
            RepositoryStrategy::Iprox => "iProX",
            RepositoryStrategy::Jpost => "jPOST",
            RepositoryStrategy::XmlFallback => "ProteomeXchange XML",
        }
    }
}

impl fmt::Display for RepositoryStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StatsStatus {
    Ok,
    #[serde(rename = "unsupported-repository")]
    Unsupported,
    FetchFailed,
    Cancelled,
    Skipped,
}

impl StatsStatus {
    pub fn label(self) -> &'static str {
        match self {
            StatsStatus::Ok => "ok",
            StatsStatus::Unsupported => "unsupported-repository",
            StatsStatus::FetchFailed => "fetch-failed",
            StatsStatus::Cancelled => "cancelled",
            StatsStatus::Skipped => "skipped",
        }
    }

    pub fn is_failure(self) -> bool {
        matches!(self, StatsStatus::FetchFailed | StatsStatus::Cancelled)
    }
}

impl fmt::Display for StatsStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Raw-file statistics for one dataset. Counts are only meaningful when
/// `status` is [`StatsStatus::Ok`]; every other status means "unknown".
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileStats {
    pub raw_file_count: u64,
    pub total_size_bytes: Option<u64>,
    pub status: StatsStatus,
    pub strategy: Option<RepositoryStrategy>,
}

impl FileStats {
    pub fn ok(raw_file_count: u64, total_size_bytes: Option<u64>, strategy: RepositoryStrategy) -> Self {
        Self {
            raw_file_count,
            total_size_bytes,
            status: StatsStatus::Ok,
            strategy: Some(strategy),
        }
    }

    pub fn unknown(status: StatsStatus, strategy: Option<RepositoryStrategy>) -> Self {
        Self {
            raw_file_count: 0,
            total_size_bytes: None,
            status,
            strategy,
        }
    }

    pub fn fetch_failed(strategy: RepositoryStrategy) -> Self {
        Self::unknown(StatsStatus::FetchFailed, Some(strategy))
    }

    pub fn cancelled() -> Self {
        Self::unknown(StatsStatus::Cancelled, None)
    }

    pub fn skipped() -> Self {
        Self::unknown(StatsStatus::Skipped, None)
    }

    pub fn is_ok(&self) -> bool {
        self.status == StatsStatus::Ok
    }

    pub fn count(&self) -> Option<u64> {
        self.is_ok().then_some(self.raw_file_count)
    }

    pub fn size_gb(&self) -> Option<f64> {
        if !self.is_ok() {
            return None;
        }
        self.total_size_bytes.map(bytes_to_gb)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnrichedRecord {
    #[serde(flatten)]
    pub record: DatasetRecord,
    pub stats: FileStats,
}

pub fn bytes_to_gb(bytes: u64) -> f64 {
    let gb = bytes as f64 / BYTES_PER_GB;
    (gb * 100.0).round() / 100.0
}
