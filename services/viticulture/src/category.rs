use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Column name the reshaper gives the year of a long-format row.
pub const YEAR_COLUMN: &str = "ano";
/// Column the extractor tags every row with (sub-report label).
pub const LABEL_COLUMN: &str = "type";
/// Second value column of import/export tables.
pub const VALUE_USD_COLUMN: &str = "Valor (US$)";

pub const LITERS_LABEL: &str = "Quantidade (L.)";
pub const KILOGRAMS_LABEL: &str = "Quantidade (Kg)";

/// The five report categories published by the portal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Product,
    Process,
    Sales,
    Import,
    Export,
}

impl Category {
    /// Fixed order used by "import all".
    pub const ALL: [Category; 5] = [
        Category::Product,
        Category::Process,
        Category::Sales,
        Category::Import,
        Category::Export,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Category::Product => "product",
            Category::Process => "process",
            Category::Sales => "sales",
            Category::Import => "import",
            Category::Export => "export",
        }
    }

    /// Destination table; also the artifact file stem.
    pub fn table(self) -> &'static str {
        self.as_str()
    }

    /// Name of the value column after reshaping.
    pub fn unit_label(self) -> &'static str {
        match self {
            Category::Product | Category::Sales => LITERS_LABEL,
            Category::Process | Category::Import | Category::Export => KILOGRAMS_LABEL,
        }
    }

    /// Whether rows need a sub-report label (`type`) to be classified.
    pub fn needs_label(self) -> bool {
        matches!(self, Category::Process | Category::Import | Category::Export)
    }

    /// Whether rows carry a second value column (`Valor (US$)`).
    pub fn has_value_usd(self) -> bool {
        matches!(self, Category::Import | Category::Export)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown report category '{0}' (expected product, process, sales, import or export)")]
pub struct UnknownCategory(pub String);

impl FromStr for Category {
    type Err = UnknownCategory;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "product" | "producao" => Ok(Category::Product),
            "process" | "processamento" => Ok(Category::Process),
            "sales" | "comercializacao" => Ok(Category::Sales),
            "import" | "importacao" => Ok(Category::Import),
            "export" | "exportacao" => Ok(Category::Export),
            _ => Err(UnknownCategory(s.to_string())),
        }
    }
}
