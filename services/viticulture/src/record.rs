use serde::Serialize;

use crate::category::Category;
use crate::taxonomy::{GrapeType, ProcessColor, ProcessKind, WineDerivative};

/// Row of the `product` table. The group is free text taken from the
/// latest upper-case header row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProductRecord {
    pub name: String,
    pub wine_derivative_name: String,
    pub quantity: i64,
    pub year_no: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessRecord {
    pub color_name: ProcessColor,
    pub kind_name: ProcessKind,
    pub cultivar: String,
    pub quantity_kg: i64,
    pub year_no: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SalesRecord {
    pub name: String,
    pub wine_derivative_name: WineDerivative,
    pub quantity_liters: i64,
    pub year_no: Option<i32>,
}

/// Row of the `import` and `export` tables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TradeRecord {
    pub grape_type_name: GrapeType,
    pub country: String,
    pub quantity_kg: i64,
    pub value_usd: i64,
    pub year_no: Option<i32>,
}

/// A normalized record, ready for one parameterized insert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Record {
    Product(ProductRecord),
    Process(ProcessRecord),
    Sales(SalesRecord),
    Import(TradeRecord),
    Export(TradeRecord),
}

impl Record {
    pub fn category(&self) -> Category {
        match self {
            Record::Product(_) => Category::Product,
            Record::Process(_) => Category::Process,
            Record::Sales(_) => Category::Sales,
            Record::Import(_) => Category::Import,
            Record::Export(_) => Category::Export,
        }
    }

    pub fn year(&self) -> Option<i32> {
        match self {
            Record::Product(r) => r.year_no,
            Record::Process(r) => r.year_no,
            Record::Sales(r) => r.year_no,
            Record::Import(r) | Record::Export(r) => r.year_no,
        }
    }

    /// Compact JSON rendering used in error messages and logs.
    pub fn describe(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| format!("{:?}", self))
    }
}

/// A record as read back from its table, with its positional identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredRecord {
    pub id: i64,
    #[serde(flatten)]
    pub record: Record,
}
