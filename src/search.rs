use std::collections::{HashSet, VecDeque};
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use reqwest::Url;
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, info, warn};

use crate::cancel::CancelToken;
use crate::domain::{Accession, DatasetRecord};
use crate::error::HarvestError;
use crate::http::{RetryPolicy, Transport};

static PXID_PARAM: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"[?&]pxid=([^&#]+)"));

/// Something that can hand back the rendered HTML of a page.
pub trait PageSource {
    fn fetch_page(&self, url: &str) -> Result<String, HarvestError>;
}

/// Plain GET, for pages that do not need a JavaScript runtime.
pub struct HttpPageSource<T: Transport> {
    transport: T,
    retry: RetryPolicy,
    cancel: CancelToken,
}

impl<T: Transport> HttpPageSource<T> {
    pub fn new(transport: T, retry: RetryPolicy, cancel: CancelToken) -> Self {
        Self {
            transport,
            retry,
            cancel,
        }
    }
}

impl<T: Transport> PageSource for HttpPageSource<T> {
    fn fetch_page(&self, url: &str) -> Result<String, HarvestError> {
        let response = self
            .retry
            .send(&self.transport, url, &self.cancel)?
            .ensure_success(url)?;
        Ok(response.body)
    }
}

#[derive(Debug, Clone)]
pub struct WalkerOptions {
    pub site: String,
    pub keyword: String,
    pub max_datasets: Option<usize>,
    pub page_delay: Duration,
}

pub fn search_url(site: &str, keyword: &str, page: u32) -> Result<String, HarvestError> {
    let base = format!("{}/ui", site.trim_end_matches('/'));
    let page = page.to_string();
    Url::parse_with_params(
        &base,
        [
            ("view", "datasets"),
            ("search", keyword),
            ("pageNumber", page.as_str()),
        ],
    )
    .map(String::from)
    .map_err(|err| HarvestError::InvalidConfig(format!("search site {site}: {err}")))
}

pub fn detail_url(site: &str, accession: &Accession) -> String {
    format!("{}/ui?pxid={}", site.trim_end_matches('/'), accession.as_str())
}

/// Lazily walks the keyword search: one results page at a time, one detail
/// page per dataset. Stops when a page adds nothing new, when the cap is
/// reached, on a failed results page, or on cancellation.
pub struct DatasetWalker<'a, P: PageSource + ?Sized> {
    source: &'a P,
    options: WalkerOptions,
    cancel: CancelToken,
    page: u32,
    pending: VecDeque<Accession>,
    seen: HashSet<Accession>,
    emitted: usize,
    exhausted: bool,
    failure: Option<HarvestError>,
}

impl<'a, P: PageSource + ?Sized> DatasetWalker<'a, P> {
    pub fn new(source: &'a P, options: WalkerOptions, cancel: CancelToken) -> Self {
        Self {
            source,
            options,
            cancel,
            page: 0,
            pending: VecDeque::new(),
            seen: HashSet::new(),
            emitted: 0,
            exhausted: false,
            failure: None,
        }
    }

    pub fn emitted(&self) -> usize {
        self.emitted
    }

    /// The error that stopped the walk before any results page loaded. A
    /// failure on a later page only ends the walk.
    pub fn take_failure(&mut self) -> Option<HarvestError> {
        self.failure.take()
    }

    fn cap_reached(&self) -> bool {
        self.options
            .max_datasets
            .is_some_and(|max| self.emitted >= max)
    }

    fn load_next_page(&mut self) {
        self.page += 1;
        let url = match search_url(&self.options.site, &self.options.keyword, self.page) {
            Ok(url) => url,
            Err(err) => {
                warn!(error = %err, "search.bad_url");
                self.stop(err);
                return;
            }
        };
        debug!(page = self.page, url = %url, "search.page");
        let html = match self.source.fetch_page(&url) {
            Ok(html) => html,
            Err(err) => {
                warn!(page = self.page, error = %err, "search.page_failed");
                self.stop(err);
                return;
            }
        };

        let mut fresh = 0usize;
        for candidate in extract_pxids(&html) {
            match candidate.parse::<Accession>() {
                Ok(accession) => {
                    if self.seen.insert(accession.clone()) {
                        self.pending.push_back(accession);
                        fresh += 1;
                    }
                }
                Err(_) => warn!(candidate = %candidate, "search.invalid_accession"),
            }
        }
        info!(page = self.page, discovered = fresh, "search.page_done");
        if fresh == 0 {
            self.exhausted = true;
        }
    }

    fn stop(&mut self, err: HarvestError) {
        self.exhausted = true;
        if self.page == 1 && !matches!(err, HarvestError::Interrupted) {
            self.failure = Some(err);
        }
    }

    fn fetch_record(&self, accession: Accession) -> DatasetRecord {
        let url = detail_url(&self.options.site, &accession);
        match self.source.fetch_page(&url) {
            Ok(html) => parse_detail(&html, accession, url),
            Err(err) => {
                warn!(accession = %accession, error = %err, "search.detail_failed");
                DatasetRecord::bare(accession, url)
            }
        }
    }
}

impl<P: PageSource + ?Sized> Iterator for DatasetWalker<'_, P> {
    type Item = DatasetRecord;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.exhausted || self.cap_reached() || self.cancel.is_cancelled() {
                return None;
            }
            if let Some(accession) = self.pending.pop_front() {
                if self.emitted > 0 && !self.cancel.sleep(self.options.page_delay) {
                    return None;
                }
                let record = self.fetch_record(accession);
                self.emitted += 1;
                info!(accession = %record.accession, repository = %record.repository, "search.dataset");
                return Some(record);
            }
            self.load_next_page();
        }
    }
}

/// Raw `pxid` values from every link on a results page, in document order.
pub fn extract_pxids(html: &str) -> Vec<String> {
    let Ok(pattern) = PXID_PARAM.as_ref() else {
        return Vec::new();
    };
    let Ok(links) = Selector::parse("a[href]") else {
        return Vec::new();
    };
    let document = Html::parse_document(html);
    document
        .select(&links)
        .filter_map(|element| element.value().attr("href"))
        .filter_map(|href| pattern.captures(href))
        .filter_map(|caps| caps.get(1))
        .map(|id| id.as_str().trim().to_string())
        .filter(|id| !id.is_empty())
        .collect()
}

/// Reads the label/value table rows of a dataset page. The first cell of a
/// row is the label, the last one the value; the first occurrence of a label
/// wins.
pub fn parse_detail(html: &str, accession: Accession, metadata_url: String) -> DatasetRecord {
    let mut record = DatasetRecord::bare(accession, metadata_url);
    let (Ok(rows), Ok(cell_selector)) = (Selector::parse("tr"), Selector::parse("th, td")) else {
        return record;
    };
    let document = Html::parse_document(html);
    for row in document.select(&rows) {
        let cells: Vec<ElementRef<'_>> = row.select(&cell_selector).collect();
        let (Some(label), Some(value)) = (cells.first(), cells.last()) else {
            continue;
        };
        if cells.len() < 2 {
            continue;
        }
        let label = collapse(&label.text().collect::<String>())
            .trim_end_matches(':')
            .trim()
            .to_lowercase();
        let value = collapse(&value.text().collect::<String>());
        let field = match label.as_str() {
            "title" => &mut record.title,
            "description" => &mut record.description,
            "lab head" => &mut record.lab_head,
            "instrument list" | "instrument" => &mut record.instruments,
            "submitter keyword" | "submitter keywords" | "keywords" => &mut record.keywords,
            "hosting repository" => &mut record.repository,
            _ => continue,
        };
        if field.is_empty() {
            *field = value;
        }
    }
    record
}

fn collapse(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
