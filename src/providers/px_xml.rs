use quick_xml::Reader;
use quick_xml::escape::unescape;
use quick_xml::events::{BytesStart, Event};
use tracing::debug;

use crate::domain::{Accession, RepositoryStrategy};
use crate::error::HarvestError;
use crate::http::Transport;
use crate::providers::{RawFileTally, StrategyContext, is_raw_file};

const ORIGIN: &str = "ProteomeXchange XML";
const ANNOUNCED_REPOSITORIES: &[&str] = &["PRIDE", "MassIVE", "iProX", "jPOST", "PeptideAtlas"];

/// What the ProteomeXchange dataset document tells us about a dataset.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PxDocument {
    pub hosting_repository: Option<String>,
    pub raw_files: u64,
    pub ftp_links: u64,
}

impl PxDocument {
    /// Raw `DatasetFile` entries when the document has them, FTP links otherwise.
    pub fn listing(&self) -> u64 {
        if self.raw_files > 0 {
            self.raw_files
        } else {
            self.ftp_links
        }
    }
}

pub fn document_url(base: &str, accession: &Accession) -> String {
    format!(
        "{}/cgi/GetDataset?ID={}&outputMode=XML",
        base.trim_end_matches('/'),
        accession.as_str()
    )
}

pub fn fetch_document<T: Transport + ?Sized>(
    ctx: &StrategyContext<'_, T>,
    accession: &Accession,
) -> Result<PxDocument, HarvestError> {
    let url = document_url(
        ctx.endpoints.base_for(RepositoryStrategy::XmlFallback),
        accession,
    );
    let response = ctx.get(&url)?.ensure_success(&url)?;
    parse_document(&response.body)
}

pub fn count_raw_files<T: Transport + ?Sized>(
    ctx: &StrategyContext<'_, T>,
    accession: &Accession,
) -> Result<RawFileTally, HarvestError> {
    let document = fetch_document(ctx, accession)?;
    debug!(
        accession = %accession,
        raw_files = document.raw_files,
        ftp_links = document.ftp_links,
        "px_xml.tally"
    );
    Ok(RawFileTally {
        count: document.listing(),
        bytes: None,
    })
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum TextTarget {
    None,
    FtpLink,
    DatasetLink,
    Announcement,
}

pub fn parse_document(xml: &str) -> Result<PxDocument, HarvestError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut document = PxDocument::default();
    let mut saw_root = false;
    let mut summary_repository = None;
    let mut record_repository = None;
    let mut announcement = String::new();

    let mut current_file: Option<bool> = None;
    let mut in_full_link = false;
    let mut target = TextTarget::None;
    let mut text = String::new();

    loop {
        let event = reader.read_event().map_err(|err| {
            HarvestError::parse(ORIGIN, format!("at byte {}: {err}", reader.buffer_position()))
        })?;
        let is_empty = matches!(event, Event::Empty(_));
        match event {
            Event::Start(element) | Event::Empty(element) => {
                let name = element.local_name();
                match name.as_ref() {
                    b"ProteomeXchangeDataset" => saw_root = true,
                    b"DatasetSummary" => {
                        if let Some(repo) = attribute(&element, b"hostingRepository") {
                            summary_repository.get_or_insert(repo);
                        }
                    }
                    b"Repository" => {
                        if let Some(repo) = attribute(&element, b"name") {
                            record_repository.get_or_insert(repo);
                        }
                    }
                    b"DatasetFile" => {
                        let raw = attribute(&element, b"name").is_some_and(|name| is_raw_file(&name));
                        if is_empty {
                            document.raw_files += u64::from(raw);
                        } else {
                            current_file = Some(raw);
                        }
                    }
                    b"cvParam" => {
                        let term = attribute(&element, b"name").unwrap_or_default().to_lowercase();
                        let value = attribute(&element, b"value").unwrap_or_default();
                        if let Some(raw) = current_file.as_mut() {
                            *raw |= term.contains("raw file") || is_raw_file(&value);
                        }
                        if in_full_link && value.trim().to_lowercase().starts_with("ftp") {
                            document.ftp_links += 1;
                        }
                    }
                    b"FullDatasetLink" if !is_empty => in_full_link = true,
                    b"ftpLink" if !is_empty => target = TextTarget::FtpLink,
                    b"fullDatasetLink" if !is_empty => target = TextTarget::DatasetLink,
                    b"Announcement" if !is_empty => target = TextTarget::Announcement,
                    _ => {}
                }
                if target != TextTarget::None && !is_empty {
                    text.clear();
                }
            }
            Event::Text(content) => {
                if target != TextTarget::None {
                    let raw = std::str::from_utf8(&content).unwrap_or_default();
                    if let Ok(unescaped) = unescape(raw) {
                        text.push_str(&unescaped);
                    }
                }
            }
            Event::End(element) => match element.local_name().as_ref() {
                b"DatasetFile" => {
                    if current_file.take() == Some(true) {
                        document.raw_files += 1;
                    }
                }
                b"FullDatasetLink" => in_full_link = false,
                b"ftpLink" => {
                    if !text.trim().is_empty() {
                        document.ftp_links += 1;
                    }
                    target = TextTarget::None;
                }
                b"fullDatasetLink" => {
                    if text.to_lowercase().contains("ftp") {
                        document.ftp_links += 1;
                    }
                    target = TextTarget::None;
                }
                b"Announcement" => {
                    announcement.push_str(&text);
                    announcement.push(' ');
                    target = TextTarget::None;
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }

    if !saw_root {
        return Err(HarvestError::parse(ORIGIN, "not a ProteomeXchange dataset document"));
    }
    document.hosting_repository = summary_repository
        .or(record_repository)
        .or_else(|| announced_repository(&announcement));
    Ok(document)
}

fn attribute(element: &BytesStart<'_>, key: &[u8]) -> Option<String> {
    element
        .attributes()
        .filter_map(|attr| attr.ok())
        .find(|attr| attr.key.as_ref() == key)
        .and_then(|attr| String::from_utf8(attr.value.to_vec()).ok())
        .map(|value| match unescape(&value) {
            Ok(unescaped) => unescaped.trim().to_string(),
            Err(_) => value.trim().to_string(),
        })
        .filter(|value| !value.is_empty())
}

fn announced_repository(announcement: &str) -> Option<String> {
    let lowered = announcement.to_lowercase();
    ANNOUNCED_REPOSITORIES
        .iter()
        .find(|repo| lowered.contains(&repo.to_lowercase()))
        .map(|repo| repo.to_string())
}
