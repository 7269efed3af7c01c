use serde_json::Value;
use tracing::debug;

use crate::domain::{Accession, RepositoryStrategy};
use crate::error::HarvestError;
use crate::http::Transport;
use crate::providers::{RawFileTally, StrategyContext, is_raw_file, json_str, json_u64};

pub fn files_url(base: &str, accession: &Accession) -> String {
    format!(
        "{}/files/byProject?accession={}",
        base.trim_end_matches('/'),
        accession.as_str()
    )
}

pub fn count_raw_files<T: Transport + ?Sized>(
    ctx: &StrategyContext<'_, T>,
    accession: &Accession,
) -> Result<RawFileTally, HarvestError> {
    let url = files_url(ctx.endpoints.base_for(RepositoryStrategy::Pride), accession);
    let payload = ctx.get_json(&url, "PRIDE")?;
    let tally = tally_files(&payload)?;
    debug!(accession = %accession, files = tally.count, "pride.tally");
    Ok(tally)
}

pub fn tally_files(payload: &Value) -> Result<RawFileTally, HarvestError> {
    let files = payload
        .as_array()
        .or_else(|| {
            payload
                .get("_embedded")
                .and_then(|embedded| embedded.get("files"))
                .and_then(|files| files.as_array())
        })
        .ok_or_else(|| HarvestError::parse("PRIDE", "expected a file list"))?;

    let mut tally = RawFileTally::sized();
    for file in files.iter().filter(|file| is_raw_entry(file)) {
        tally.add(json_u64(file.get("fileSizeBytes")).or(Some(0)));
    }
    Ok(tally)
}

fn is_raw_entry(file: &Value) -> bool {
    let category = file
        .get("fileCategory")
        .and_then(|category| category.get("value").or(Some(category)))
        .and_then(|value| value.as_str());
    match category {
        Some(category) => category.eq_ignore_ascii_case("RAW"),
        None => json_str(file, &["fileName"]).is_some_and(is_raw_file),
    }
}
