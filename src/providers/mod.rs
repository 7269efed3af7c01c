pub mod iprox;
pub mod jpost;
pub mod massive;
pub mod pride;
pub mod px_xml;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::cancel::CancelToken;
use crate::domain::{Accession, RepositoryStrategy};
use crate::error::HarvestError;
use crate::http::{HttpResponse, RetryPolicy, Transport};

pub const RAW_EXTENSIONS: &[&str] = &[
    ".raw", ".d", ".zip", ".wiff", ".wiff2", ".d.zip", ".tar", ".gz", ".bz2", ".rar", ".7z",
    ".mzml", ".mzxml", ".ms2", ".mgf", ".fid", ".yep", ".tdf",
];

pub fn is_raw_file(name: &str) -> bool {
    let name = name.trim().trim_end_matches('/').to_lowercase();
    RAW_EXTENSIONS.iter().any(|ext| name.ends_with(ext))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Endpoints {
    pub proteomecentral: String,
    pub pride: String,
    pub massive: String,
    pub iprox: String,
    pub jpost: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            proteomecentral: "https://proteomecentral.proteomexchange.org".to_string(),
            pride: "https://www.ebi.ac.uk/pride/ws/archive/v2".to_string(),
            massive: "https://massive.ucsd.edu".to_string(),
            iprox: "https://www.iprox.cn".to_string(),
            jpost: "https://repository.jpostdb.org/proxi/v0.1".to_string(),
        }
    }
}

impl Endpoints {
    pub fn base_for(&self, strategy: RepositoryStrategy) -> &str {
        let base = match strategy {
            RepositoryStrategy::Pride => &self.pride,
            RepositoryStrategy::Massive => &self.massive,
            RepositoryStrategy::Iprox => &self.iprox,
            RepositoryStrategy::Jpost => &self.jpost,
            RepositoryStrategy::XmlFallback => &self.proteomecentral,
        };
        base.trim_end_matches('/')
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum MatchMode {
    Exact,
    #[default]
    Contains,
}

/// Maps free-text hosting repository labels onto strategies. Aliases are
/// checked in table order; anything unmatched goes to the XML fallback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryMatcher {
    mode: MatchMode,
    aliases: Vec<(String, RepositoryStrategy)>,
}

impl Default for RepositoryMatcher {
    fn default() -> Self {
        Self::new(MatchMode::default())
    }
}

impl RepositoryMatcher {
    pub fn new(mode: MatchMode) -> Self {
        let aliases = [
            ("pride", RepositoryStrategy::Pride),
            ("massive", RepositoryStrategy::Massive),
            ("msv", RepositoryStrategy::Massive),
            ("iprox", RepositoryStrategy::Iprox),
            ("jpost", RepositoryStrategy::Jpost),
        ]
        .into_iter()
        .map(|(alias, strategy)| (alias.to_string(), strategy))
        .collect();
        Self { mode, aliases }
    }

    pub fn mode(&self) -> MatchMode {
        self.mode
    }

    /// Adds an alias ahead of the built-in table.
    pub fn with_alias(mut self, alias: &str, strategy: RepositoryStrategy) -> Self {
        let alias = normalize_label(alias);
        if !alias.is_empty() {
            self.aliases.retain(|(existing, _)| *existing != alias);
            self.aliases.insert(0, (alias, strategy));
        }
        self
    }

    pub fn select(&self, repository: &str) -> RepositoryStrategy {
        let label = normalize_label(repository);
        if label.is_empty() {
            return RepositoryStrategy::XmlFallback;
        }
        self.aliases
            .iter()
            .find(|(alias, _)| match self.mode {
                MatchMode::Exact => label == *alias,
                MatchMode::Contains => label.contains(alias.as_str()),
            })
            .map(|(_, strategy)| *strategy)
            .unwrap_or(RepositoryStrategy::XmlFallback)
    }
}

pub fn normalize_label(value: &str) -> String {
    value
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RawFileTally {
    pub count: u64,
    pub bytes: Option<u64>,
}

impl RawFileTally {
    pub fn sized() -> Self {
        Self {
            count: 0,
            bytes: Some(0),
        }
    }

    pub fn add(&mut self, size: Option<u64>) {
        self.count += 1;
        self.bytes = match (self.bytes, size) {
            (Some(total), Some(size)) => Some(total.saturating_add(size)),
            _ => None,
        };
    }
}

/// Shared handles a strategy needs for one call: the transport, retry
/// policy, endpoint table and the run's cancellation token.
pub struct StrategyContext<'a, T: Transport + ?Sized> {
    pub transport: &'a T,
    pub retry: RetryPolicy,
    pub endpoints: &'a Endpoints,
    pub cancel: &'a CancelToken,
}

impl<T: Transport + ?Sized> StrategyContext<'_, T> {
    pub fn get(&self, url: &str) -> Result<HttpResponse, HarvestError> {
        self.retry.send(self.transport, url, self.cancel)
    }

    pub fn get_json(&self, url: &str, origin: &str) -> Result<Value, HarvestError> {
        let response = self.get(url)?.ensure_success(url)?;
        serde_json::from_str(&response.body)
            .map_err(|err| HarvestError::parse(origin, err.to_string()))
    }
}

impl RepositoryStrategy {
    pub fn count_raw_files<T: Transport + ?Sized>(
        self,
        ctx: &StrategyContext<'_, T>,
        accession: &Accession,
    ) -> Result<RawFileTally, HarvestError> {
        match self {
            RepositoryStrategy::Pride => pride::count_raw_files(ctx, accession),
            RepositoryStrategy::Massive => massive::count_raw_files(ctx, accession),
            RepositoryStrategy::Iprox => iprox::count_raw_files(ctx, accession),
            RepositoryStrategy::Jpost => jpost::count_raw_files(ctx, accession),
            RepositoryStrategy::XmlFallback => px_xml::count_raw_files(ctx, accession),
        }
    }
}

pub(crate) fn json_u64(value: Option<&Value>) -> Option<u64> {
    match value? {
        Value::Number(number) => number
            .as_u64()
            .or_else(|| number.as_f64().filter(|v| *v >= 0.0).map(|v| v as u64)),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

pub(crate) fn json_str<'a>(item: &'a Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .find_map(|key| item.get(*key).and_then(|value| value.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_extensions_are_case_insensitive() {
        assert!(is_raw_file("Sample_01.RAW"));
        assert!(is_raw_file("run.d.zip"));
        assert!(is_raw_file("spectra.mzML"));
        assert!(!is_raw_file("README.txt"));
        assert!(!is_raw_file("results.mzid"));
    }

    #[test]
    fn contains_mode_matches_decorated_labels() {
        let matcher = RepositoryMatcher::new(MatchMode::Contains);
        assert_eq!(matcher.select("PRIDE Archive"), RepositoryStrategy::Pride);
        assert_eq!(matcher.select("  massive "), RepositoryStrategy::Massive);
        assert_eq!(matcher.select("MSV000079514"), RepositoryStrategy::Massive);
        assert_eq!(matcher.select("UnknownRepoXYZ"), RepositoryStrategy::XmlFallback);
        assert_eq!(matcher.select(""), RepositoryStrategy::XmlFallback);
    }

    #[test]
    fn exact_mode_requires_whole_label() {
        let matcher = RepositoryMatcher::new(MatchMode::Exact);
        assert_eq!(matcher.select("iProX"), RepositoryStrategy::Iprox);
        assert_eq!(matcher.select("PRIDE Archive"), RepositoryStrategy::XmlFallback);
    }

    #[test]
    fn custom_alias_takes_precedence() {
        let matcher = RepositoryMatcher::new(MatchMode::Exact)
            .with_alias("PRIDE Archive", RepositoryStrategy::Pride)
            .with_alias("Panorama Public", RepositoryStrategy::XmlFallback);
        assert_eq!(matcher.select("pride  archive"), RepositoryStrategy::Pride);
        assert_eq!(matcher.select("Panorama Public"), RepositoryStrategy::XmlFallback);
    }

    #[test]
    fn tally_loses_size_once_unknown() {
        let mut tally = RawFileTally::sized();
        tally.add(Some(10));
        tally.add(Some(5));
        assert_eq!(tally.bytes, Some(15));
        tally.add(None);
        assert_eq!(tally.count, 3);
        assert_eq!(tally.bytes, None);
    }
}
