use serde_json::Value;
use tracing::debug;

use crate::domain::{Accession, RepositoryStrategy};
use crate::error::HarvestError;
use crate::http::Transport;
use crate::providers::{RawFileTally, StrategyContext, is_raw_file, json_str, json_u64};

pub fn files_url(base: &str, accession: &Accession) -> String {
    format!(
        "{}/api/project/{}/files",
        base.trim_end_matches('/'),
        accession.as_str()
    )
}

pub fn count_raw_files<T: Transport + ?Sized>(
    ctx: &StrategyContext<'_, T>,
    accession: &Accession,
) -> Result<RawFileTally, HarvestError> {
    let url = files_url(ctx.endpoints.base_for(RepositoryStrategy::Iprox), accession);
    let response = ctx.get(&url)?;
    // iProX answers 404 for projects it lists under a different identifier.
    if response.status == 404 {
        debug!(accession = %accession, "iprox.not_listed");
        return Ok(RawFileTally::default());
    }
    let response = response.ensure_success(&url)?;
    let payload: Value = serde_json::from_str(&response.body)
        .map_err(|err| HarvestError::parse("iProX", err.to_string()))?;
    let tally = tally_files(&payload)?;
    debug!(accession = %accession, files = tally.count, "iprox.tally");
    Ok(tally)
}

pub fn tally_files(payload: &Value) -> Result<RawFileTally, HarvestError> {
    let files = ["data", "files"]
        .iter()
        .find_map(|key| payload.get(*key).and_then(|value| value.as_array()))
        .ok_or_else(|| HarvestError::parse("iProX", "missing data/files array"))?;

    let mut tally = RawFileTally::sized();
    for file in files {
        let Some(name) = json_str(file, &["name", "fileName"]) else {
            continue;
        };
        if is_raw_file(name) {
            let size = json_u64(file.get("size")).or_else(|| json_u64(file.get("fileSize")));
            tally.add(size.or(Some(0)));
        }
    }
    Ok(tally)
}
