//! Spreadsheet input for bulk registry loads.
//!
//! A site list arrives as an `.xlsx` workbook or a `.csv` file with a header
//! row naming the `title`, `url`, and `selector` columns (the older `xpath`
//! header is accepted for `selector`; matching is case-insensitive and
//! column order does not matter). Only the first worksheet of a workbook is
//! read.
//!
//! Parsing is all-or-nothing: a row with a missing field or a malformed URL
//! rejects the whole file with the offending row number, so the registry is
//! never handed a partial record. Rows that are entirely blank are skipped.
//!
//! Workbooks are read with `zip` + `quick-xml` directly; no spreadsheet
//! engine is involved.

use std::io::Read;
use std::path::Path;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use thiserror::Error;

use crate::models::NewSite;

/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;
/// Rows beyond this are ignored.
const MAX_ROWS: usize = 100_000;
/// Excel's column limit (`XFD`).
const MAX_COLUMNS: usize = 16_384;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TabularFormat {
    Xlsx,
    Csv,
}

impl TabularFormat {
    /// Format from a file name's extension.
    pub fn from_path(path: &Path) -> Result<Self, TabularError> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();
        Self::from_name(ext)
    }

    /// Format from a bare name such as `"xlsx"` or `"csv"`.
    pub fn from_name(name: &str) -> Result<Self, TabularError> {
        match name.trim().trim_start_matches('.').to_ascii_lowercase().as_str() {
            "xlsx" => Ok(TabularFormat::Xlsx),
            "csv" => Ok(TabularFormat::Csv),
            "" => Err(TabularError::UnsupportedFormat("no extension".to_string())),
            other => Err(TabularError::UnsupportedFormat(format!(".{}", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TabularError {
    #[error("unsupported file format {0}: expected .xlsx or .csv")]
    UnsupportedFormat(String),
    #[error("spreadsheet could not be read: {0}")]
    Xlsx(String),
    #[error("file is not valid UTF-8: {0}")]
    Encoding(String),
    #[error("file has no header row")]
    Empty,
    #[error("missing required column(s): {0} (expected title, url and selector)")]
    MissingColumns(String),
    #[error("row {row}: missing value for '{column}'")]
    MissingValue { row: usize, column: &'static str },
    #[error("row {row}: invalid url {url:?}: {reason}")]
    InvalidUrl {
        row: usize,
        url: String,
        reason: String,
    },
}

/// Parse and validate a site list.
pub fn parse_sites(bytes: &[u8], format: TabularFormat) -> Result<Vec<NewSite>, TabularError> {
    let rows = match format {
        TabularFormat::Xlsx => read_xlsx_rows(bytes)?,
        TabularFormat::Csv => read_csv_rows(bytes)?,
    };
    sites_from_rows(&rows)
}

/// Map raw rows (index + 1 = spreadsheet row number) to validated sites.
fn sites_from_rows(rows: &[Vec<String>]) -> Result<Vec<NewSite>, TabularError> {
    let header_idx = rows
        .iter()
        .position(|r| !is_blank(r))
        .ok_or(TabularError::Empty)?;
    let header = &rows[header_idx];

    let title_col = column(header, &["title"]);
    let url_col = column(header, &["url"]);
    let selector_col = column(header, &["selector", "xpath"]);

    let (title_col, url_col, selector_col) = match (title_col, url_col, selector_col) {
        (Some(t), Some(u), Some(s)) => (t, u, s),
        _ => {
            let missing: Vec<&str> = [
                ("title", title_col),
                ("url", url_col),
                ("selector", selector_col),
            ]
            .iter()
            .filter(|(_, col)| col.is_none())
            .map(|(name, _)| *name)
            .collect();
            return Err(TabularError::MissingColumns(missing.join(", ")));
        }
    };

    let mut sites = Vec::new();
    for (idx, row) in rows.iter().enumerate().skip(header_idx + 1) {
        if is_blank(row) {
            continue;
        }
        let row_number = idx + 1;
        let cell = |col: usize, column: &'static str| {
            row.get(col)
                .map(|v| v.trim())
                .filter(|v| !v.is_empty())
                .ok_or(TabularError::MissingValue {
                    row: row_number,
                    column,
                })
        };

        let title = cell(title_col, "title")?;
        let url = cell(url_col, "url")?;
        let selector = cell(selector_col, "selector")?;
        validate_url(row_number, url)?;

        sites.push(NewSite::new(title, url, selector));
    }

    Ok(sites)
}

fn column(header: &[String], names: &[&str]) -> Option<usize> {
    header
        .iter()
        .position(|h| names.iter().any(|n| h.trim().eq_ignore_ascii_case(n)))
}

fn is_blank(row: &[String]) -> bool {
    row.iter().all(|c| c.trim().is_empty())
}

fn validate_url(row: usize, raw: &str) -> Result<(), TabularError> {
    let invalid = |reason: String| TabularError::InvalidUrl {
        row,
        url: raw.to_string(),
        reason,
    };
    let parsed = url::Url::parse(raw).map_err(|e| invalid(e.to_string()))?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(invalid(format!("scheme '{}' is not http or https", other))),
    }
}

// ═══════════════════════════════════════════════════════════════════════
// CSV
// ═══════════════════════════════════════════════════════════════════════

fn read_csv_rows(bytes: &[u8]) -> Result<Vec<Vec<String>>, TabularError> {
    let text = std::str::from_utf8(bytes).map_err(|e| TabularError::Encoding(e.to_string()))?;
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    Ok(parse_csv(text))
}

/// Minimal CSV parser: quoted fields, doubled-quote escapes, CRLF. Blank
/// lines are kept as empty rows so row numbers match the file.
fn parse_csv(text: &str) -> Vec<Vec<String>> {
    let mut rows = Vec::new();
    let mut row: Vec<String> = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = text.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '"' if in_quotes => {
                if chars.peek() == Some(&'"') {
                    chars.next();
                    field.push('"');
                } else {
                    in_quotes = false;
                }
            }
            '"' if field.is_empty() => in_quotes = true,
            ',' if !in_quotes => row.push(std::mem::take(&mut field)),
            '\r' | '\n' if !in_quotes => {
                if ch == '\r' && chars.peek() == Some(&'\n') {
                    chars.next();
                }
                row.push(std::mem::take(&mut field));
                rows.push(std::mem::take(&mut row));
                if rows.len() >= MAX_ROWS {
                    return rows;
                }
            }
            _ => field.push(ch),
        }
    }

    if !field.is_empty() || !row.is_empty() {
        row.push(field);
        rows.push(row);
    }
    rows
}

// ═══════════════════════════════════════════════════════════════════════
// XLSX
// ═══════════════════════════════════════════════════════════════════════

type Archive<'a> = zip::ZipArchive<std::io::Cursor<&'a [u8]>>;

fn xlsx_err(e: impl std::fmt::Display) -> TabularError {
    TabularError::Xlsx(e.to_string())
}

fn read_xlsx_rows(bytes: &[u8]) -> Result<Vec<Vec<String>>, TabularError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes)).map_err(xlsx_err)?;
    let shared_strings = read_shared_strings(&mut archive)?;
    let sheet = first_worksheet_name(&archive)
        .ok_or_else(|| TabularError::Xlsx("workbook has no worksheets".to_string()))?;
    let sheet_xml = read_zip_entry_bounded(&mut archive, &sheet, MAX_XML_ENTRY_BYTES)?;
    read_sheet_rows(&sheet_xml, &shared_strings)
}

fn read_zip_entry_bounded(
    archive: &mut Archive<'_>,
    name: &str,
    max_bytes: u64,
) -> Result<Vec<u8>, TabularError> {
    let entry = archive.by_name(name).map_err(xlsx_err)?;
    let mut out = Vec::new();
    entry
        .take(max_bytes)
        .read_to_end(&mut out)
        .map_err(xlsx_err)?;
    if out.len() as u64 >= max_bytes {
        return Err(TabularError::Xlsx(format!(
            "ZIP entry {} exceeds size limit ({} bytes)",
            name, max_bytes
        )));
    }
    Ok(out)
}

fn first_worksheet_name(archive: &Archive<'_>) -> Option<String> {
    archive
        .file_names()
        .filter(|n| n.starts_with("xl/worksheets/sheet") && n.ends_with(".xml"))
        .min_by_key(|name| {
            name.trim_start_matches("xl/worksheets/sheet")
                .trim_end_matches(".xml")
                .parse::<u32>()
                .unwrap_or(u32::MAX)
        })
        .map(|s| s.to_string())
}

/// Shared string table. Rich-text runs inside one `<si>` are concatenated;
/// phonetic hints (`<rPh>`) are skipped. A workbook without strings has no
/// `sharedStrings.xml` at all.
fn read_shared_strings(archive: &mut Archive<'_>) -> Result<Vec<String>, TabularError> {
    const NAME: &str = "xl/sharedStrings.xml";
    if !archive.file_names().any(|n| n == NAME) {
        return Ok(Vec::new());
    }
    let xml = read_zip_entry_bounded(archive, NAME, MAX_XML_ENTRY_BYTES)?;

    let mut strings = Vec::new();
    let mut reader = Reader::from_reader(xml.as_slice());
    let mut buf = Vec::new();
    let mut current: Option<String> = None;
    let mut in_t = false;
    let mut in_phonetic = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"si" => current = Some(String::new()),
                b"rPh" => in_phonetic = true,
                b"t" => in_t = !in_phonetic,
                _ => {}
            },
            Ok(Event::Empty(e)) if e.local_name().as_ref() == b"si" => strings.push(String::new()),
            Ok(Event::Text(te)) if in_t => {
                if let Some(s) = current.as_mut() {
                    s.push_str(&te.unescape().map_err(xlsx_err)?);
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"si" => strings.extend(current.take()),
                b"rPh" => in_phonetic = false,
                b"t" => in_t = false,
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(xlsx_err(e)),
            _ => {}
        }
        buf.clear();
    }
    Ok(strings)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CellKind {
    SharedString,
    Inline,
    Other,
}

#[derive(Debug)]
struct OpenCell {
    row: usize,
    col: usize,
    kind: CellKind,
    text: String,
}

fn attr_value(e: &BytesStart<'_>, key: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.as_ref() == key)
        .map(|a| String::from_utf8_lossy(&a.value).into_owned())
}

fn out_of_range() -> TabularError {
    TabularError::Xlsx("cell reference out of range".to_string())
}

/// Zero-based (row, col) from an `A1`-style reference. `Ok(None)` for a
/// malformed reference; an error when it lies beyond the sheet limits.
fn parse_cell_ref(reference: &str) -> Result<Option<(usize, usize)>, TabularError> {
    let letters = reference
        .find(|c: char| c.is_ascii_digit())
        .unwrap_or(reference.len());
    let digits = &reference[letters..];
    if letters == 0 || digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Ok(None);
    }

    let mut col = 0usize;
    for c in reference[..letters].chars() {
        if !c.is_ascii_alphabetic() {
            return Ok(None);
        }
        let digit = c.to_ascii_uppercase() as usize - 'A' as usize + 1;
        col = col
            .checked_mul(26)
            .and_then(|v| v.checked_add(digit))
            .filter(|v| *v <= MAX_COLUMNS)
            .ok_or_else(out_of_range)?;
    }

    // All digits, so a parse failure can only be overflow
    let row: usize = digits.parse().map_err(|_| out_of_range())?;
    match row.checked_sub(1) {
        None => Ok(None),
        Some(row) if row >= MAX_ROWS => Err(out_of_range()),
        Some(row) => Ok(Some((row, col - 1))),
    }
}

fn open_cell(e: &BytesStart<'_>, row: usize, next_col: usize) -> Result<OpenCell, TabularError> {
    let parsed = match attr_value(e, b"r") {
        Some(r) => parse_cell_ref(&r)?,
        None => None,
    };
    let (row, col) = parsed.unwrap_or((row, next_col));
    if row >= MAX_ROWS || col >= MAX_COLUMNS {
        return Err(out_of_range());
    }
    let kind = match attr_value(e, b"t").as_deref() {
        Some("s") => CellKind::SharedString,
        Some("inlineStr") => CellKind::Inline,
        _ => CellKind::Other,
    };
    Ok(OpenCell {
        row,
        col,
        kind,
        text: String::new(),
    })
}

fn place(rows: &mut Vec<Vec<String>>, row: usize, col: usize, value: String) {
    if rows.len() <= row {
        rows.resize_with(row + 1, Vec::new);
    }
    let cells = &mut rows[row];
    if cells.len() <= col {
        cells.resize_with(col + 1, String::new);
    }
    cells[col] = value;
}

/// Cell values by position. Gaps (rows or cells the workbook omits) are
/// filled with empty strings so `rows[i]` is spreadsheet row `i + 1`.
fn read_sheet_rows(xml: &[u8], shared_strings: &[String]) -> Result<Vec<Vec<String>>, TabularError> {
    let mut rows: Vec<Vec<String>> = Vec::new();
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut current_row = 0usize;
    let mut next_row = 0usize;
    let mut next_col = 0usize;
    let mut cell: Option<OpenCell> = None;
    let mut in_value = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"row" => {
                    current_row = attr_value(&e, b"r")
                        .and_then(|r| r.parse::<usize>().ok())
                        .and_then(|r| r.checked_sub(1))
                        .unwrap_or(next_row);
                    if current_row >= MAX_ROWS {
                        break;
                    }
                    next_row = current_row + 1;
                    next_col = 0;
                }
                b"c" => cell = Some(open_cell(&e, current_row, next_col)?),
                b"v" | b"t" if cell.is_some() => in_value = true,
                _ => {}
            },
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"row" => {
                    next_row = attr_value(&e, b"r")
                        .and_then(|r| r.parse::<usize>().ok())
                        .unwrap_or(next_row + 1);
                }
                b"c" => next_col = open_cell(&e, current_row, next_col)?.col + 1,
                _ => {}
            },
            Ok(Event::Text(te)) if in_value => {
                if let Some(c) = cell.as_mut() {
                    c.text.push_str(&te.unescape().map_err(xlsx_err)?);
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"v" | b"t" => in_value = false,
                b"c" => {
                    if let Some(c) = cell.take() {
                        next_col = c.col + 1;
                        let value = match c.kind {
                            CellKind::SharedString => c
                                .text
                                .trim()
                                .parse::<usize>()
                                .ok()
                                .and_then(|i| shared_strings.get(i).cloned())
                                .unwrap_or_default(),
                            CellKind::Inline | CellKind::Other => c.text,
                        };
                        place(&mut rows, c.row, c.col, value);
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(xlsx_err(e)),
            _ => {}
        }
        buf.clear();
    }
    Ok(rows)
}
