use serde_json::Value;
use tracing::debug;

use crate::domain::{Accession, RepositoryStrategy};
use crate::error::HarvestError;
use crate::http::Transport;
use crate::providers::{RawFileTally, StrategyContext, is_raw_file, json_str, json_u64};

pub fn dataset_url(base: &str, accession: &Accession) -> String {
    format!(
        "{}/ProteoSAFe/datasets_json.jsp?accession={}",
        base.trim_end_matches('/'),
        accession.as_str()
    )
}

pub fn count_raw_files<T: Transport + ?Sized>(
    ctx: &StrategyContext<'_, T>,
    accession: &Accession,
) -> Result<RawFileTally, HarvestError> {
    let url = dataset_url(ctx.endpoints.base_for(RepositoryStrategy::Massive), accession);
    let payload = ctx.get_json(&url, "MassIVE")?;
    let tally = tally_files(&payload)?;
    debug!(accession = %accession, files = tally.count, "massive.tally");
    Ok(tally)
}

pub fn tally_files(payload: &Value) -> Result<RawFileTally, HarvestError> {
    let files = payload
        .get("files")
        .and_then(|files| files.as_array())
        .ok_or_else(|| HarvestError::parse("MassIVE", "missing files array"))?;

    let mut tally = RawFileTally::sized();
    for file in files {
        let Some(name) = json_str(file, &["fileName", "name"]) else {
            continue;
        };
        if is_raw_file(name) {
            tally.add(json_u64(file.get("fileSizeBytes")).or(Some(0)));
        }
    }
    Ok(tally)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use serde_json::json;

    use super::*;

    #[test]
    fn counts_by_extension() {
        let payload = json!({"files": [
            {"fileName": "ccms_peak/run1.mzML", "fileSizeBytes": 10},
            {"fileName": "raw/run1.RAW", "fileSizeBytes": "20"},
            {"fileName": "metadata.tsv", "fileSizeBytes": 1}
        ]});
        let tally = tally_files(&payload).unwrap();
        assert_eq!(tally.count, 2);
        assert_eq!(tally.bytes, Some(30));
    }

    #[test]
    fn missing_files_is_a_parse_failure() {
        assert_matches!(
            tally_files(&json!({"status": "ok"})),
            Err(HarvestError::Parse { .. })
        );
    }
}
