//! Closed taxonomies the classifier validates against.
//!
//! Each `parse` is a match with an explicit invalid arm; whitespace runs are
//! collapsed and comparison ignores case, since the portal is not consistent
//! about either.

use serde::Serialize;
use std::fmt;

fn normalize(raw: &str) -> String {
    raw.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Section header of the processing report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ProcessColor {
    #[serde(rename = "TINTAS")]
    Red,
    #[serde(rename = "BRANCAS E ROSADAS")]
    WhiteRose,
}

impl ProcessColor {
    pub const ALL: [ProcessColor; 2] = [ProcessColor::Red, ProcessColor::WhiteRose];

    pub fn parse(raw: &str) -> Option<Self> {
        match normalize(raw).as_str() {
            "tintas" => Some(ProcessColor::Red),
            "brancas e rosadas" | "brancas" => Some(ProcessColor::WhiteRose),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ProcessColor::Red => "TINTAS",
            ProcessColor::WhiteRose => "BRANCAS E ROSADAS",
        }
    }
}

/// Grape kind of a processing sub-report (the row's `type` label).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ProcessKind {
    #[serde(rename = "Viníferas")]
    Vinifera,
    #[serde(rename = "Americanas e híbridas")]
    AmericanHybrid,
    #[serde(rename = "Uvas de mesa")]
    TableGrape,
    #[serde(rename = "Sem classificação")]
    Unclassified,
    #[serde(rename = "principal")]
    Main,
}

impl ProcessKind {
    pub const ALL: [ProcessKind; 5] = [
        ProcessKind::Vinifera,
        ProcessKind::AmericanHybrid,
        ProcessKind::TableGrape,
        ProcessKind::Unclassified,
        ProcessKind::Main,
    ];

    pub fn parse(raw: &str) -> Option<Self> {
        match normalize(raw).as_str() {
            "viníferas" | "viniferas" => Some(ProcessKind::Vinifera),
            "americanas e híbridas" | "americanas e hibridas" => Some(ProcessKind::AmericanHybrid),
            "uvas de mesa" => Some(ProcessKind::TableGrape),
            "sem classificação" | "sem classificacao" => Some(ProcessKind::Unclassified),
            "principal" => Some(ProcessKind::Main),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ProcessKind::Vinifera => "Viníferas",
            ProcessKind::AmericanHybrid => "Americanas e híbridas",
            ProcessKind::TableGrape => "Uvas de mesa",
            ProcessKind::Unclassified => "Sem classificação",
            ProcessKind::Main => "principal",
        }
    }
}

/// Section header of the sales report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum WineDerivative {
    #[serde(rename = "VINHO DE MESA")]
    TableWine,
    #[serde(rename = "VINHO FINO DE MESA")]
    FineTableWine,
    #[serde(rename = "VINHO FRIZANTE")]
    Frizzante,
    #[serde(rename = "VINHO ORGÂNICO")]
    OrganicWine,
    #[serde(rename = "VINHO ESPECIAL")]
    SpecialWine,
    #[serde(rename = "ESPUMANTES")]
    Sparkling,
    #[serde(rename = "SUCO DE UVAS")]
    GrapeJuice,
    #[serde(rename = "SUCO DE UVAS CONCENTRADO")]
    ConcentratedGrapeJuice,
    #[serde(rename = "SUCO")]
    Juice,
    #[serde(rename = "DERIVADOS")]
    Derivatives,
    #[serde(rename = "OUTROS PRODUTOS COMERCIALIZADOS")]
    OtherProducts,
}

impl WineDerivative {
    pub const ALL: [WineDerivative; 11] = [
        WineDerivative::TableWine,
        WineDerivative::FineTableWine,
        WineDerivative::Frizzante,
        WineDerivative::OrganicWine,
        WineDerivative::SpecialWine,
        WineDerivative::Sparkling,
        WineDerivative::GrapeJuice,
        WineDerivative::ConcentratedGrapeJuice,
        WineDerivative::Juice,
        WineDerivative::Derivatives,
        WineDerivative::OtherProducts,
    ];

    pub fn parse(raw: &str) -> Option<Self> {
        match normalize(raw).as_str() {
            "vinho de mesa" => Some(WineDerivative::TableWine),
            "vinho fino de mesa" => Some(WineDerivative::FineTableWine),
            "vinho frizante" => Some(WineDerivative::Frizzante),
            "vinho orgânico" | "vinho organico" => Some(WineDerivative::OrganicWine),
            "vinho especial" => Some(WineDerivative::SpecialWine),
            "espumantes" => Some(WineDerivative::Sparkling),
            "suco de uvas" => Some(WineDerivative::GrapeJuice),
            "suco de uvas concentrado" => Some(WineDerivative::ConcentratedGrapeJuice),
            "suco" => Some(WineDerivative::Juice),
            "derivados" => Some(WineDerivative::Derivatives),
            "outros produtos comercializados" => Some(WineDerivative::OtherProducts),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            WineDerivative::TableWine => "VINHO DE MESA",
            WineDerivative::FineTableWine => "VINHO FINO DE MESA",
            WineDerivative::Frizzante => "VINHO FRIZANTE",
            WineDerivative::OrganicWine => "VINHO ORGÂNICO",
            WineDerivative::SpecialWine => "VINHO ESPECIAL",
            WineDerivative::Sparkling => "ESPUMANTES",
            WineDerivative::GrapeJuice => "SUCO DE UVAS",
            WineDerivative::ConcentratedGrapeJuice => "SUCO DE UVAS CONCENTRADO",
            WineDerivative::Juice => "SUCO",
            WineDerivative::Derivatives => "DERIVADOS",
            WineDerivative::OtherProducts => "OUTROS PRODUTOS COMERCIALIZADOS",
        }
    }
}

/// Grape product traded in the import/export reports (the row's `type` label).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum GrapeType {
    #[serde(rename = "Vinhos de mesa")]
    TableWine,
    #[serde(rename = "Espumantes")]
    Sparkling,
    #[serde(rename = "Uvas frescas")]
    FreshGrapes,
    #[serde(rename = "Uvas passas")]
    Raisins,
    #[serde(rename = "Suco de uva")]
    GrapeJuice,
}

impl GrapeType {
    pub const ALL: [GrapeType; 5] = [
        GrapeType::TableWine,
        GrapeType::Sparkling,
        GrapeType::FreshGrapes,
        GrapeType::Raisins,
        GrapeType::GrapeJuice,
    ];

    pub fn parse(raw: &str) -> Option<Self> {
        match normalize(raw).as_str() {
            "vinhos de mesa" => Some(GrapeType::TableWine),
            "espumantes" => Some(GrapeType::Sparkling),
            "uvas frescas" => Some(GrapeType::FreshGrapes),
            "uvas passas" => Some(GrapeType::Raisins),
            "suco de uva" => Some(GrapeType::GrapeJuice),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            GrapeType::TableWine => "Vinhos de mesa",
            GrapeType::Sparkling => "Espumantes",
            GrapeType::FreshGrapes => "Uvas frescas",
            GrapeType::Raisins => "Uvas passas",
            GrapeType::GrapeJuice => "Suco de uva",
        }
    }
}

macro_rules! display_as_str {
    ($($ty:ty),*) => {
        $(impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        })*
    };
}

display_as_str!(ProcessColor, ProcessKind, WineDerivative, GrapeType);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_labels_round_trip_through_parse() {
        for v in ProcessColor::ALL {
            assert_eq!(ProcessColor::parse(v.as_str()), Some(v));
        }
        for v in ProcessKind::ALL {
            assert_eq!(ProcessKind::parse(v.as_str()), Some(v));
        }
        for v in WineDerivative::ALL {
            assert_eq!(WineDerivative::parse(v.as_str()), Some(v));
        }
        for v in GrapeType::ALL {
            assert_eq!(GrapeType::parse(v.as_str()), Some(v));
        }
    }

    #[test]
    fn test_serde_matches_stored_label() {
        assert_eq!(
            serde_json::to_value(WineDerivative::OrganicWine).unwrap(),
            serde_json::json!("VINHO ORGÂNICO")
        );
        assert_eq!(
            serde_json::to_value(ProcessKind::AmericanHybrid).unwrap(),
            serde_json::json!("Americanas e híbridas")
        );
    }

    #[test]
    fn test_portal_double_space() {
        assert_eq!(
            WineDerivative::parse("VINHO  FINO DE MESA"),
            Some(WineDerivative::FineTableWine)
        );
    }

    #[test]
    fn test_unknown_values_rejected() {
        assert_eq!(ProcessKind::parse("Tipo Inexistente"), None);
        assert_eq!(GrapeType::parse("Cerveja"), None);
        assert_eq!(ProcessColor::parse("Tinto"), None);
        assert_eq!(WineDerivative::parse("VINHO VERDE"), None);
    }

    #[test]
    fn test_case_insensitive() {
        assert_eq!(GrapeType::parse("UVAS FRESCAS"), Some(GrapeType::FreshGrapes));
        assert_eq!(ProcessKind::parse("viníferas"), Some(ProcessKind::Vinifera));
    }
}
