//! Section-aware classifier
//!
//! Portal tables are flat lists where an all-upper-case row (`VINHO DE MESA`,
//! `TINTAS`) opens a section and every following row belongs to it until the
//! next one. [`SectionState`] carries the last validated header through the
//! row loop; the header row itself is also a data point of its own section.
//!
//! Rows before the first header, empty names and `Total` rows are dropped.
//! A secondary label (`type`) that is present but outside its taxonomy
//! aborts the whole category: it means the portal changed its layout.

use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::category::{
    Category, KILOGRAMS_LABEL, LABEL_COLUMN, LITERS_LABEL, VALUE_USD_COLUMN, YEAR_COLUMN,
};
use crate::error::PipelineError;
use crate::numeric::{coerce_quantity, coerce_year};
use crate::record::{ProcessRecord, ProductRecord, Record, SalesRecord, TradeRecord};
use crate::taxonomy::{GrapeType, ProcessColor, ProcessKind, WineDerivative};

const PRODUCT_KEYS: &[&str] = &["produto", "product", "name"];
const CULTIVAR_KEYS: &[&str] = &["cultivar"];
const COUNTRY_KEYS: &[&str] = &["países", "país", "paises", "pais", "country"];
const LITERS_KEYS: &[&str] = &[LITERS_LABEL, "valor", "quantidade", "quantity"];
const KILOGRAMS_KEYS: &[&str] = &[KILOGRAMS_LABEL, "valor", "quantidade", "quantity_kg"];
const TRADE_QUANTITY_KEYS: &[&str] = &[KILOGRAMS_LABEL, "quantidade", "quantity_kg"];
const VALUE_USD_KEYS: &[&str] = &[VALUE_USD_COLUMN, "valor_usd", "value_usd"];
const YEAR_KEYS: &[&str] = &[YEAR_COLUMN, "year", "year_no"];
pub(crate) const LABEL_KEYS: &[&str] = &[LABEL_COLUMN, "kind", "grape_type"];

/// Last validated section header seen in file order.
#[derive(Debug, Clone, PartialEq)]
pub struct SectionState<G> {
    current: Option<G>,
}

impl<G> Default for SectionState<G> {
    fn default() -> Self {
        Self { current: None }
    }
}

impl<G> SectionState<G> {
    pub fn enter(&mut self, group: G) {
        self.current = Some(group);
    }

    pub fn current(&self) -> Option<&G> {
        self.current.as_ref()
    }
}

/// At least one letter and no lower-case letter.
pub fn is_header_text(text: &str) -> bool {
    let text = text.trim();
    text.chars().any(char::is_alphabetic) && !text.chars().any(char::is_lowercase)
}

pub fn is_total(text: &str) -> bool {
    text.trim().eq_ignore_ascii_case("total")
}

/// Exact key first, then a case-insensitive match on the trimmed key.
fn field<'a>(obj: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    for key in keys {
        if let Some(v) = obj.get(*key) {
            return Some(v);
        }
    }
    keys.iter().find_map(|key| {
        obj.iter()
            .find(|(k, _)| k.trim().to_lowercase() == key.to_lowercase())
            .map(|(_, v)| v)
    })
}

fn text(obj: &Map<String, Value>, keys: &[&str]) -> String {
    match field(obj, keys) {
        Some(Value::String(s)) => s.split_whitespace().collect::<Vec<_>>().join(" "),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}

fn year(obj: &Map<String, Value>) -> Option<i32> {
    coerce_year(field(obj, YEAR_KEYS))
}

/// Validates the secondary label of a row. Empty is `Ok(None)`.
fn secondary<T>(
    obj: &Map<String, Value>,
    category: Category,
    row: usize,
    field_name: &'static str,
    parse: fn(&str) -> Option<T>,
) -> Result<Option<T>, PipelineError> {
    let raw = text(obj, LABEL_KEYS);
    if raw.is_empty() {
        return Ok(None);
    }
    match parse(&raw) {
        Some(v) => Ok(Some(v)),
        None => Err(PipelineError::InvalidCategoryValue {
            category,
            field: field_name,
            value: raw,
            row,
        }),
    }
}

#[derive(Debug, Default)]
struct Stats {
    emitted: usize,
    before_header: usize,
    totals: usize,
    unlabeled: usize,
    blank: usize,
}

/// One category's row-by-row state machine.
trait RowClassifier {
    fn classify_row(
        &mut self,
        row: usize,
        obj: &Map<String, Value>,
        stats: &mut Stats,
    ) -> Result<Option<Record>, PipelineError>;
}

/// Reads a row's primary name, counting blanks and totals as skipped.
fn primary(obj: &Map<String, Value>, keys: &[&str], stats: &mut Stats) -> Option<String> {
    let name = text(obj, keys);
    if name.is_empty() {
        stats.blank += 1;
        return None;
    }
    if is_total(&name) {
        stats.totals += 1;
        return None;
    }
    Some(name)
}

#[derive(Default)]
struct ProductClassifier {
    state: SectionState<String>,
}

impl RowClassifier for ProductClassifier {
    fn classify_row(
        &mut self,
        _row: usize,
        obj: &Map<String, Value>,
        stats: &mut Stats,
    ) -> Result<Option<Record>, PipelineError> {
        let Some(name) = primary(obj, PRODUCT_KEYS, stats) else {
            return Ok(None);
        };
        if is_header_text(&name) {
            self.state.enter(name.clone());
        }
        let Some(group) = self.state.current() else {
            stats.before_header += 1;
            return Ok(None);
        };
        Ok(Some(Record::Product(ProductRecord {
            wine_derivative_name: group.clone(),
            quantity: coerce_quantity(field(obj, LITERS_KEYS)),
            year_no: year(obj),
            name,
        })))
    }
}

#[derive(Default)]
struct SalesClassifier {
    state: SectionState<WineDerivative>,
}

impl RowClassifier for SalesClassifier {
    fn classify_row(
        &mut self,
        _row: usize,
        obj: &Map<String, Value>,
        stats: &mut Stats,
    ) -> Result<Option<Record>, PipelineError> {
        let Some(name) = primary(obj, PRODUCT_KEYS, stats) else {
            return Ok(None);
        };
        if is_header_text(&name) {
            if let Some(derivative) = WineDerivative::parse(&name) {
                self.state.enter(derivative);
            }
        }
        let Some(&derivative) = self.state.current() else {
            stats.before_header += 1;
            return Ok(None);
        };
        Ok(Some(Record::Sales(SalesRecord {
            wine_derivative_name: derivative,
            quantity_liters: coerce_quantity(field(obj, LITERS_KEYS)),
            year_no: year(obj),
            name,
        })))
    }
}

#[derive(Default)]
struct ProcessClassifier {
    state: SectionState<ProcessColor>,
}

impl RowClassifier for ProcessClassifier {
    fn classify_row(
        &mut self,
        row: usize,
        obj: &Map<String, Value>,
        stats: &mut Stats,
    ) -> Result<Option<Record>, PipelineError> {
        let Some(cultivar) = primary(obj, CULTIVAR_KEYS, stats) else {
            return Ok(None);
        };
        let kind = secondary(obj, Category::Process, row, "kind", ProcessKind::parse)?;
        if is_header_text(&cultivar) {
            if let Some(color) = ProcessColor::parse(&cultivar) {
                self.state.enter(color);
            }
        }
        let Some(&color) = self.state.current() else {
            stats.before_header += 1;
            return Ok(None);
        };
        let Some(kind) = kind else {
            stats.unlabeled += 1;
            return Ok(None);
        };
        Ok(Some(Record::Process(ProcessRecord {
            color_name: color,
            kind_name: kind,
            quantity_kg: coerce_quantity(field(obj, KILOGRAMS_KEYS)),
            year_no: year(obj),
            cultivar,
        })))
    }
}

/// Import and export: no section headers, the group is the row's grape type.
struct TradeClassifier {
    category: Category,
}

impl RowClassifier for TradeClassifier {
    fn classify_row(
        &mut self,
        row: usize,
        obj: &Map<String, Value>,
        stats: &mut Stats,
    ) -> Result<Option<Record>, PipelineError> {
        let Some(country) = primary(obj, COUNTRY_KEYS, stats) else {
            return Ok(None);
        };
        let Some(grape_type) = secondary(obj, self.category, row, "grape_type", GrapeType::parse)?
        else {
            stats.unlabeled += 1;
            return Ok(None);
        };
        let record = TradeRecord {
            grape_type_name: grape_type,
            quantity_kg: coerce_quantity(field(obj, TRADE_QUANTITY_KEYS)),
            value_usd: coerce_quantity(field(obj, VALUE_USD_KEYS)),
            year_no: year(obj),
            country,
        };
        Ok(Some(match self.category {
            Category::Export => Record::Export(record),
            _ => Record::Import(record),
        }))
    }
}

fn classifier_for(category: Category) -> Box<dyn RowClassifier> {
    match category {
        Category::Product => Box::new(ProductClassifier::default()),
        Category::Process => Box::new(ProcessClassifier::default()),
        Category::Sales => Box::new(SalesClassifier::default()),
        Category::Import | Category::Export => Box::new(TradeClassifier { category }),
    }
}

/// Classifies rows in file order. Any error aborts the whole category.
pub fn classify(category: Category, rows: &[Value]) -> Result<Vec<Record>, PipelineError> {
    let mut classifier = classifier_for(category);
    let mut stats = Stats::default();
    let mut records = Vec::new();

    for (idx, value) in rows.iter().enumerate() {
        let Value::Object(obj) = value else {
            return Err(PipelineError::MalformedRecord {
                category,
                row: idx,
                reason: format!("expected a JSON object, found {}", json_kind(value)),
            });
        };
        if let Some(record) = classifier.classify_row(idx, obj, &mut stats)? {
            records.push(record);
        }
    }

    stats.emitted = records.len();
    debug!(%category, ?stats, "classification stats");
    info!(
        %category,
        rows = rows.len(),
        records = stats.emitted,
        "rows classified"
    );
    Ok(records)
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
