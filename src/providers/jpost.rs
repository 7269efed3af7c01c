use serde_json::Value;
use tracing::debug;

use crate::domain::{Accession, RepositoryStrategy};
use crate::error::HarvestError;
use crate::http::Transport;
use crate::providers::{RawFileTally, StrategyContext, is_raw_file, json_str};

pub fn dataset_url(base: &str, accession: &Accession) -> String {
    format!(
        "{}/datasets/{}",
        base.trim_end_matches('/'),
        accession.as_str()
    )
}

pub fn count_raw_files<T: Transport + ?Sized>(
    ctx: &StrategyContext<'_, T>,
    accession: &Accession,
) -> Result<RawFileTally, HarvestError> {
    let url = dataset_url(ctx.endpoints.base_for(RepositoryStrategy::Jpost), accession);
    let payload = ctx.get_json(&url, "jPOST")?;
    let tally = tally_files(&payload)?;
    debug!(accession = %accession, files = tally.count, "jpost.tally");
    Ok(tally)
}

/// PROXI dataset documents list files as cvParam-like terms; sizes are not
/// part of the schema.
pub fn tally_files(payload: &Value) -> Result<RawFileTally, HarvestError> {
    let files = payload
        .get("datasetFiles")
        .and_then(|files| files.as_array())
        .ok_or_else(|| HarvestError::parse("jPOST", "missing datasetFiles array"))?;

    let mut tally = RawFileTally::default();
    for file in files {
        let term = json_str(file, &["name"]).unwrap_or_default().to_lowercase();
        let location = json_str(file, &["value"]).unwrap_or_default();
        if term.contains("raw file") || is_raw_file(location) {
            tally.add(None);
        }
    }
    Ok(tally)
}
