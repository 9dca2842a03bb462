//! Wide-to-long reshaper
//!
//! Year-labeled columns (names made only of digits) are unpivoted into
//! `ano` plus the category's unit column. Everything else identifies the row
//! and is copied onto every output row.

use serde_json::Value;

use crate::category::{Category, VALUE_USD_COLUMN, YEAR_COLUMN};
use crate::extract::Table;

pub fn is_year_column(name: &str) -> bool {
    let name = name.trim();
    !name.is_empty() && name.chars().all(|c| c.is_ascii_digit())
}

/// Column positions of one year: first occurrence is the quantity, a second
/// one (import/export downloads) is the value in US$.
#[derive(Debug)]
struct YearColumns {
    year: i64,
    quantity: usize,
    value: Option<usize>,
}

pub fn reshape(table: Table, category: Category) -> Table {
    let mut id_columns: Vec<usize> = Vec::new();
    let mut years: Vec<YearColumns> = Vec::new();

    for (idx, name) in table.columns.iter().enumerate() {
        if !is_year_column(name) {
            id_columns.push(idx);
            continue;
        }
        let Ok(year) = name.trim().parse::<i64>() else {
            id_columns.push(idx);
            continue;
        };
        match years.iter_mut().find(|y| y.year == year) {
            Some(existing) if existing.value.is_none() => existing.value = Some(idx),
            Some(_) => {}
            None => years.push(YearColumns {
                year,
                quantity: idx,
                value: None,
            }),
        }
    }

    if years.is_empty() {
        return table;
    }

    let with_value = category.has_value_usd() && years.iter().any(|y| y.value.is_some());

    let mut columns: Vec<String> = id_columns.iter().map(|&i| table.columns[i].clone()).collect();
    columns.push(YEAR_COLUMN.to_string());
    columns.push(category.unit_label().to_string());
    if with_value {
        columns.push(VALUE_USD_COLUMN.to_string());
    }

    let mut out = Table::new(columns);
    for row in &table.rows {
        let cell = |idx: usize| row.get(idx).cloned().unwrap_or(Value::Null);
        for year in &years {
            let mut long_row: Vec<Value> = id_columns.iter().map(|&i| cell(i)).collect();
            long_row.push(Value::from(year.year));
            long_row.push(cell(year.quantity));
            if with_value {
                long_row.push(year.value.map(cell).unwrap_or(Value::Null));
            }
            out.rows.push(long_row);
        }
    }
    out
}
