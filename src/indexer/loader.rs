//! Tabular source loader: turns CSV or spreadsheet rows into [`LawRecord`]s.
use std::path::{Path, PathBuf};

use calamine::{Reader, open_workbook_auto};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info};

use crate::index::models::Metadata;

/// Metadata key for the article title.
pub const META_TITLE: &str = "dieu_ten";
/// Metadata key for the source legal document name.
pub const META_SOURCE: &str = "vbqppl";
/// Metadata key for the source legal document hyperlink.
pub const META_LINK: &str = "vbqppl_link";
/// Metadata key for the 0-based source row.
pub const META_ROW_INDEX: &str = "row_index";

const ID_COLUMNS: &[&str] = &["dieu_id", "id"];
const TITLE_COLUMNS: &[&str] = &["dieu_ten", "title"];
const BODY_COLUMNS: &[&str] = &["dieu_noidung", "noi_dung", "content", "body"];
const SOURCE_COLUMNS: &[&str] = &["vbqppl", "source"];
const LINK_COLUMNS: &[&str] = &["vbqppl_link", "link"];

#[derive(Error, Debug)]
pub enum LoaderError {
    #[error("source table not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("failed to read csv: {0}")]
    Csv(#[from] csv::Error),

    #[error("failed to read spreadsheet: {0}")]
    Spreadsheet(String),
}

/// One normalized law article row.
#[derive(Debug, Clone, PartialEq)]
pub struct LawRecord {
    pub id: String,
    pub text: String,
    pub meta: Metadata,
}

/// Header positions for the columns the loader understands.
///
/// Resolved once per table; a `None` field means the column is absent and the
/// corresponding metadata is simply not produced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ColumnMapping {
    pub id: Option<usize>,
    pub title: Option<usize>,
    pub body: Option<usize>,
    pub source_name: Option<usize>,
    pub source_link: Option<usize>,
}

impl ColumnMapping {
    /// Match a header row against the known column names.
    pub fn resolve<S: AsRef<str>>(headers: &[S]) -> Self {
        let normalized: Vec<String> = headers
            .iter()
            .map(|h| h.as_ref().trim_start_matches('\u{feff}').trim().to_lowercase())
            .collect();
        let find = |candidates: &[&str]| {
            candidates
                .iter()
                .find_map(|c| normalized.iter().position(|h| h == c))
        };

        Self {
            id: find(ID_COLUMNS),
            title: find(TITLE_COLUMNS),
            body: find(BODY_COLUMNS),
            source_name: find(SOURCE_COLUMNS),
            source_link: find(LINK_COLUMNS),
        }
    }
}

/// Load every row of the source table at `path`.
///
/// `.xlsx`, `.xlsm`, `.xls` and `.ods` files are read from their first worksheet;
/// anything else is parsed as CSV with a header row.
pub fn load(path: &Path) -> Result<Vec<LawRecord>, LoaderError> {
    if !path.exists() {
        return Err(LoaderError::NotFound(path.to_path_buf()));
    }

    let (headers, rows) = if is_spreadsheet(path) {
        read_spreadsheet(path)?
    } else {
        read_csv(path)?
    };

    let mapping = ColumnMapping::resolve(&headers);
    debug!("Column mapping for {}: {mapping:?}", path.display());

    let records = records_from_rows(&headers, &rows, mapping);
    info!("Loaded {} records from {}", records.len(), path.display());
    Ok(records)
}

/// Build records from already-parsed rows using a resolved mapping.
pub fn records_from_rows(
    headers: &[String],
    rows: &[Vec<String>],
    mapping: ColumnMapping,
) -> Vec<LawRecord> {
    rows.iter()
        .enumerate()
        .map(|(idx, row)| {
            let cell = |col: Option<usize>| col.map(|c| row.get(c).map(String::as_str).unwrap_or(""));

            let id = cell(mapping.id)
                .map(str::to_string)
                .unwrap_or_else(|| idx.to_string());
            let title = cell(mapping.title).unwrap_or("").trim();
            let body = match cell(mapping.body) {
                Some(body) => body.trim().to_string(),
                None => row_as_json(headers, row),
            };
            let text = format!("{title}\n{body}").trim().to_string();

            let mut meta = Metadata::new();
            if mapping.title.is_some() {
                meta.insert(META_TITLE.into(), Value::String(title.to_string()));
            }
            if let Some(src) = cell(mapping.source_name) {
                meta.insert(META_SOURCE.into(), Value::String(src.trim().to_string()));
            }
            if let Some(link) = cell(mapping.source_link) {
                meta.insert(META_LINK.into(), Value::String(link.trim().to_string()));
            }
            meta.insert(META_ROW_INDEX.into(), Value::from(idx));

            LawRecord { id, text, meta }
        })
        .collect()
}

fn row_as_json(headers: &[String], row: &[String]) -> String {
    let obj: serde_json::Map<String, Value> = headers
        .iter()
        .zip(row.iter())
        .map(|(h, v)| (h.clone(), Value::String(v.clone())))
        .collect();
    Value::Object(obj).to_string()
}

fn is_spreadsheet(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| matches!(e.to_lowercase().as_str(), "xlsx" | "xlsm" | "xls" | "ods"))
        .unwrap_or(false)
}

fn read_csv(path: &Path) -> Result<(Vec<String>, Vec<Vec<String>>), LoaderError> {
    let mut reader = csv::ReaderBuilder::new().flexible(true).from_path(path)?;
    let headers = reader.headers()?.iter().map(str::to_string).collect();

    let mut rows = Vec::new();
    for record in reader.records() {
        rows.push(record?.iter().map(str::to_string).collect());
    }
    Ok((headers, rows))
}

fn read_spreadsheet(path: &Path) -> Result<(Vec<String>, Vec<Vec<String>>), LoaderError> {
    let mut workbook =
        open_workbook_auto(path).map_err(|e| LoaderError::Spreadsheet(e.to_string()))?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| LoaderError::Spreadsheet("workbook has no worksheets".to_string()))?
        .map_err(|e| LoaderError::Spreadsheet(e.to_string()))?;

    let mut lines = range
        .rows()
        .map(|r| r.iter().map(|c| c.to_string()).collect::<Vec<String>>());
    let headers = lines.next().unwrap_or_default();
    Ok((headers, lines.collect()))
}
