use std::io::{self, Write};

use serde::Serialize;
use tracing::debug;

use crate::app::{HarvestResult, ProgressEvent, ProgressSink};
use crate::domain::{Accession, FileStats};

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Interactive,
    NonInteractive,
}

#[derive(Serialize)]
struct StatsReport<'a> {
    accession: &'a Accession,
    repository: Option<&'a str>,
    size_gb: Option<f64>,
    #[serde(flatten)]
    stats: &'a FileStats,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_harvest(result: &HarvestResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_stats(
        accession: &Accession,
        repository: Option<&str>,
        stats: &FileStats,
    ) -> io::Result<()> {
        Self::print_json(&StatsReport {
            accession,
            repository,
            size_gb: stats.size_gb(),
            stats,
        })
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    fn event(&self, event: ProgressEvent) {
        debug!(message = %event.message, "progress");
    }
}
