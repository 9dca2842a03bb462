//! Table/CSV extractor
//!
//! HTML mode: every `table.tb_base.tb_dados` on a portal page, tagged with
//! the caller's label and concatenated in page order.
//!
//! CSV mode: the portal's download files, whose encoding and delimiter
//! vary from file to file, so both are sniffed.

use encoding_rs::{Encoding, UTF_8, WINDOWS_1252};
use scraper::{ElementRef, Html, Selector};
use serde_json::{Map, Value};

use crate::category::LABEL_COLUMN;
use crate::error::PipelineError;

/// Structural marker of the portal's data tables.
pub const DATA_TABLE_SELECTOR: &str = "table.tb_base.tb_dados";

/// Bytes inspected by the encoding heuristic.
pub const ENCODING_SNIFF_BYTES: usize = 8 * 1024;
/// Lines inspected by the delimiter heuristic.
pub const DELIMITER_SNIFF_LINES: usize = 5;

/// An in-memory table: named columns, rows of JSON cells.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl Table {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Appends (or overwrites) a column holding the same value on every row.
    pub fn set_constant(&mut self, name: &str, value: Value) {
        let idx = match self.column_index(name) {
            Some(idx) => idx,
            None => {
                self.columns.push(name.to_string());
                self.columns.len() - 1
            }
        };
        for row in &mut self.rows {
            if row.len() <= idx {
                row.resize(idx + 1, Value::Null);
            }
            row[idx] = value.clone();
        }
    }

    /// Row-wise concatenation; columns are the union in order of first appearance.
    pub fn concat(tables: Vec<Table>) -> Table {
        let mut out = Table::default();
        for table in tables {
            let mapping: Vec<usize> = table
                .columns
                .iter()
                .map(|name| match out.column_index(name) {
                    Some(idx) => idx,
                    None => {
                        out.columns.push(name.clone());
                        out.columns.len() - 1
                    }
                })
                .collect();
            for row in table.rows {
                let mut merged = vec![Value::Null; out.columns.len()];
                for (cell, &idx) in row.into_iter().zip(&mapping) {
                    merged[idx] = cell;
                }
                out.rows.push(merged);
            }
        }
        let width = out.columns.len();
        for row in &mut out.rows {
            row.resize(width, Value::Null);
        }
        out
    }

    /// JSON objects keyed by column name, in row order.
    pub fn into_records(self) -> Vec<Value> {
        let columns = self.columns;
        self.rows
            .into_iter()
            .map(|row| {
                let mut obj = Map::new();
                for (name, cell) in columns.iter().zip(row) {
                    obj.insert(name.clone(), cell);
                }
                Value::Object(obj)
            })
            .collect()
    }
}

// =============================================================================
// HTML MODE
// =============================================================================

struct TableSelectors {
    table: Selector,
    head: Selector,
    first_row_th: Selector,
    row: Selector,
    td: Selector,
}

impl TableSelectors {
    fn new() -> Result<Self, PipelineError> {
        let parse = |css: &'static str| {
            Selector::parse(css).map_err(|e| PipelineError::Selector {
                css,
                reason: e.to_string(),
            })
        };
        Ok(Self {
            table: parse(DATA_TABLE_SELECTOR)?,
            head: parse("thead tr th, thead tr td")?,
            first_row_th: parse("tr th")?,
            row: parse("tr")?,
            td: parse("td")?,
        })
    }
}

fn cell_text(el: ElementRef<'_>) -> String {
    el.text().collect::<Vec<_>>().join(" ").split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Extracts every data table on the page. No tables yields an empty table.
pub fn extract_html(html: &str, label: &str) -> Result<Table, PipelineError> {
    let sel = TableSelectors::new()?;
    let document = Html::parse_document(html);

    let mut tables = Vec::new();
    for table_el in document.select(&sel.table) {
        let mut headers: Vec<String> = table_el.select(&sel.head).map(cell_text).collect();
        if headers.is_empty() {
            headers = table_el.select(&sel.first_row_th).map(cell_text).collect();
        }

        let mut table = Table::new(headers);
        for row_el in table_el.select(&sel.row) {
            let cells: Vec<String> = row_el.select(&sel.td).map(cell_text).collect();
            if cells.is_empty() || cells.iter().all(|c| c.is_empty()) {
                continue;
            }
            while table.columns.len() < cells.len() {
                let name = format!("col_{}", table.columns.len());
                table.columns.push(name);
            }
            let mut row: Vec<Value> = cells.into_iter().map(Value::String).collect();
            row.resize(table.columns.len(), Value::Null);
            table.rows.push(row);
        }

        table.set_constant(LABEL_COLUMN, Value::String(label.to_string()));
        tables.push(table);
    }

    Ok(Table::concat(tables))
}

// =============================================================================
// CSV MODE
// =============================================================================

/// Share of high bytes that sit inside well-formed UTF-8 sequences.
/// `None` when the sample is pure ASCII.
fn utf8_sequence_ratio(sample: &[u8]) -> Option<f64> {
    let mut high = 0usize;
    let mut in_sequence = 0usize;
    let mut i = 0;
    while i < sample.len() {
        let b = sample[i];
        if b < 0x80 {
            i += 1;
            continue;
        }
        let width = match b {
            0xC2..=0xDF => 2,
            0xE0..=0xEF => 3,
            0xF0..=0xF4 => 4,
            _ => 0,
        };
        let well_formed = width > 0
            && i + width <= sample.len()
            && sample[i + 1..i + width]
                .iter()
                .all(|c| (0x80..=0xBF).contains(c));
        if well_formed {
            high += width;
            in_sequence += width;
            i += width;
        } else {
            high += 1;
            i += 1;
        }
    }
    if high == 0 {
        None
    } else {
        Some(in_sequence as f64 / high as f64)
    }
}

/// Picks UTF-8 or Windows-1252 from a bounded prefix.
pub fn detect_encoding(bytes: &[u8]) -> &'static Encoding {
    if let Some((encoding, _)) = Encoding::for_bom(bytes) {
        return encoding;
    }
    let sample = &bytes[..bytes.len().min(ENCODING_SNIFF_BYTES)];
    match utf8_sequence_ratio(sample) {
        None => UTF_8,
        Some(ratio) if ratio >= 0.9 => UTF_8,
        // Windows-1252 maps every byte, so it never fails to decode.
        Some(_) => WINDOWS_1252,
    }
}

pub fn decode(bytes: &[u8]) -> String {
    let encoding = detect_encoding(bytes);
    let (text, _, _) = encoding.decode(bytes);
    text.into_owned()
}

/// Most frequent of `;`, tab and `,` over the first lines; ties go to comma.
pub fn detect_delimiter(text: &str) -> u8 {
    let sample: Vec<&str> = text
        .lines()
        .filter(|l| !l.trim().is_empty())
        .take(DELIMITER_SNIFF_LINES)
        .collect();

    let mut best = b',';
    let mut best_count = sample.iter().map(|l| l.matches(',').count()).sum::<usize>();
    for candidate in [b';', b'\t'] {
        let count = sample
            .iter()
            .map(|l| l.bytes().filter(|b| *b == candidate).count())
            .sum::<usize>();
        if count > best_count {
            best = candidate;
            best_count = count;
        }
    }
    best
}

/// `2020.1` -> `2020`: duplicate-column artifacts lose their suffix.
pub fn normalize_header(header: &str) -> String {
    let header = header.trim();
    match header.rsplit_once('.') {
        Some((base, suffix))
            if !base.is_empty()
                && !suffix.is_empty()
                && suffix.chars().all(|c| c.is_ascii_digit()) =>
        {
            base.trim().to_string()
        }
        _ => header.to_string(),
    }
}

pub fn extract_csv(bytes: &[u8]) -> Result<Table, csv::Error> {
    let text = decode(bytes);
    let text = text.strip_prefix('\u{feff}').unwrap_or(&text);
    let delimiter = detect_delimiter(text);

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes());

    let columns: Vec<String> = reader.headers()?.iter().map(normalize_header).collect();
    let mut table = Table::new(columns);

    for result in reader.records() {
        let record = result?;
        if record.iter().all(|f| f.is_empty()) {
            continue;
        }
        let mut row: Vec<Value> = record.iter().map(|f| Value::String(f.to_string())).collect();
        row.resize(table.columns.len().max(row.len()), Value::Null);
        while table.columns.len() < row.len() {
            let name = format!("col_{}", table.columns.len());
            table.columns.push(name);
        }
        table.rows.push(row);
    }

    let width = table.columns.len();
    for row in &mut table.rows {
        row.resize(width, Value::Null);
    }
    Ok(table)
}
