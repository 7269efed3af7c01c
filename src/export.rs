use std::fs;
use std::io::Write;

use camino::{Utf8Path, Utf8PathBuf};
use rust_xlsxwriter::{
    Color, Format, FormatAlign, FormatBorder, FormatUnderline, Workbook, XlsxError,
};
use tempfile::NamedTempFile;
use tracing::{info, warn};

use crate::domain::EnrichedRecord;
use crate::error::HarvestError;

const BASE_COLUMNS: &[&str] = &[
    "Accession",
    "Title",
    "Lab Head",
    "Description",
    "Instrument List",
    "Submitter Keyword",
    "Hosting Repository",
];
const STATS_COLUMNS: &[&str] = &["Raw File Count", "Total Raw Size (GB)", "Stats Status"];
const URL_COLUMN: &str = "Metadata URL";

const HEADER_BLUE: u32 = 0x4472C4;
const WIDTH_MIN: usize = 10;
const WIDTH_MAX: usize = 50;
const CELL_TEXT_MAX: usize = 32_767;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Xlsx,
    Csv,
}

impl ExportFormat {
    pub fn from_path(path: &Utf8Path) -> Self {
        match path.extension() {
            Some(ext) if ext.eq_ignore_ascii_case("csv") => ExportFormat::Csv,
            _ => ExportFormat::Xlsx,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExportOptions {
    pub sheet_name: String,
    pub include_stats: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Text(String),
    Count(u64),
    Gigabytes(f64),
    Link(String),
    Blank,
}

impl Cell {
    fn display(&self) -> String {
        match self {
            Cell::Text(text) | Cell::Link(text) => text.clone(),
            Cell::Count(count) => count.to_string(),
            Cell::Gigabytes(gb) => format!("{gb:.2}"),
            Cell::Blank => String::new(),
        }
    }
}

/// Appends `.xlsx` when the path has no extension.
pub fn normalize_output_path(path: &Utf8Path) -> Utf8PathBuf {
    if path.extension().is_some() {
        return path.to_path_buf();
    }
    path.with_extension("xlsx")
}

pub fn columns(include_stats: bool) -> Vec<&'static str> {
    let mut columns = BASE_COLUMNS.to_vec();
    if include_stats {
        columns.extend_from_slice(STATS_COLUMNS);
    }
    columns.push(URL_COLUMN);
    columns
}

pub fn row_cells(row: &EnrichedRecord, include_stats: bool) -> Vec<Cell> {
    let record = &row.record;
    let mut cells: Vec<Cell> = [
        record.accession.as_str(),
        record.title.as_str(),
        record.lab_head.as_str(),
        record.description.as_str(),
        record.instruments.as_str(),
        record.keywords.as_str(),
        record.repository.as_str(),
    ]
    .into_iter()
    .map(text_cell)
    .collect();
    if include_stats {
        let stats = &row.stats;
        cells.push(stats.count().map(Cell::Count).unwrap_or(Cell::Blank));
        cells.push(stats.size_gb().map(Cell::Gigabytes).unwrap_or(Cell::Blank));
        cells.push(Cell::Text(stats.status.label().to_string()));
    }
    cells.push(if record.metadata_url.is_empty() {
        Cell::Blank
    } else {
        Cell::Link(record.metadata_url.clone())
    });
    cells
}

fn text_cell(value: &str) -> Cell {
    if value.is_empty() {
        Cell::Blank
    } else {
        Cell::Text(value.to_string())
    }
}

/// Writes `rows` to `path` and returns where the file landed, or `None` when
/// there was nothing to write.
pub fn export(
    rows: &[EnrichedRecord],
    path: &Utf8Path,
    options: &ExportOptions,
) -> Result<Option<Utf8PathBuf>, HarvestError> {
    if rows.is_empty() {
        warn!(path = %path, "export.no_records");
        return Ok(None);
    }
    let path = normalize_output_path(path);
    let format = ExportFormat::from_path(&path);
    let header = columns(options.include_stats);
    let body: Vec<Vec<Cell>> = rows
        .iter()
        .map(|row| row_cells(row, options.include_stats))
        .collect();

    let bytes = match format {
        ExportFormat::Xlsx => render_xlsx(&header, &body, &options.sheet_name)
            .map_err(|err| HarvestError::Export(err.to_string()))?,
        ExportFormat::Csv => render_csv(&header, &body)?,
    };
    write_atomic(&path, &bytes)?;
    info!(path = %path, rows = rows.len(), format = ?format, "export.written");
    Ok(Some(path))
}

fn render_csv(header: &[&str], body: &[Vec<Cell>]) -> Result<Vec<u8>, HarvestError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer
        .write_record(header)
        .map_err(|err| HarvestError::Export(err.to_string()))?;
    for cells in body {
        writer
            .write_record(cells.iter().map(Cell::display))
            .map_err(|err| HarvestError::Export(err.to_string()))?;
    }
    writer
        .into_inner()
        .map_err(|err| HarvestError::Export(err.to_string()))
}

fn render_xlsx(
    header: &[&str],
    body: &[Vec<Cell>],
    sheet_name: &str,
) -> Result<Vec<u8>, XlsxError> {
    let header_format = Format::new()
        .set_bold()
        .set_font_color(Color::White)
        .set_background_color(Color::RGB(HEADER_BLUE))
        .set_align(FormatAlign::Center)
        .set_align(FormatAlign::VerticalCenter)
        .set_text_wrap()
        .set_border(FormatBorder::Thin);
    let body_format = Format::new()
        .set_align(FormatAlign::Left)
        .set_align(FormatAlign::Top)
        .set_text_wrap()
        .set_border(FormatBorder::Thin);
    let size_format = body_format.clone().set_num_format("0.00");
    let link_format = body_format
        .clone()
        .set_font_color(Color::RGB(0x0563C1))
        .set_underline(FormatUnderline::Single);

    let mut workbook = Workbook::new();
    let sheet = workbook.add_worksheet();
    sheet.set_name(sheet_name)?;

    for (col, title) in header.iter().enumerate() {
        sheet.write_string_with_format(0, col as u16, *title, &header_format)?;
    }
    for (index, cells) in body.iter().enumerate() {
        let row = index as u32 + 1;
        for (col, cell) in cells.iter().enumerate() {
            let col = col as u16;
            match cell {
                Cell::Text(text) => {
                    sheet.write_string_with_format(row, col, clip(text), &body_format)?;
                }
                Cell::Count(count) => {
                    sheet.write_number_with_format(row, col, *count as f64, &body_format)?;
                }
                Cell::Gigabytes(gb) => {
                    sheet.write_number_with_format(row, col, *gb, &size_format)?;
                }
                Cell::Link(url) => {
                    if sheet
                        .write_url_with_format(row, col, url.as_str(), &link_format)
                        .is_err()
                    {
                        sheet.write_string_with_format(row, col, clip(url), &body_format)?;
                    }
                }
                Cell::Blank => {
                    sheet.write_blank(row, col, &body_format)?;
                }
            }
        }
    }

    for (col, width) in column_widths(header, body).into_iter().enumerate() {
        sheet.set_column_width(col as u16, width as f64)?;
    }
    sheet.set_freeze_panes(1, 0)?;
    workbook.save_to_buffer()
}

/// Widest cell per column in display units, padded and clamped.
pub fn column_widths(header: &[&str], body: &[Vec<Cell>]) -> Vec<usize> {
    header
        .iter()
        .enumerate()
        .map(|(col, title)| {
            let widest = body
                .iter()
                .filter_map(|cells| cells.get(col))
                .map(|cell| display_width(&cell.display()))
                .chain(std::iter::once(display_width(title)))
                .max()
                .unwrap_or(0);
            (widest + 2).clamp(WIDTH_MIN, WIDTH_MAX)
        })
        .collect()
}

/// ASCII counts one column, anything else two.
pub fn display_width(text: &str) -> usize {
    text.chars().map(|ch| if ch.is_ascii() { 1 } else { 2 }).sum()
}

fn clip(text: &str) -> &str {
    match text.char_indices().nth(CELL_TEXT_MAX) {
        Some((end, _)) => &text[..end],
        None => text,
    }
}

fn write_atomic(path: &Utf8Path, bytes: &[u8]) -> Result<(), HarvestError> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_str().is_empty() => parent.to_path_buf(),
        _ => Utf8PathBuf::from("."),
    };
    fs::create_dir_all(parent.as_std_path())
        .map_err(|err| HarvestError::Filesystem(format!("create {parent}: {err}")))?;
    let mut temp = NamedTempFile::new_in(parent.as_std_path())
        .map_err(|err| HarvestError::Filesystem(err.to_string()))?;
    temp.write_all(bytes)
        .map_err(|err| HarvestError::Filesystem(err.to_string()))?;
    temp.persist(path.as_std_path())
        .map_err(|err| HarvestError::Filesystem(format!("write {path}: {}", err.error)))?;
    Ok(())
}
