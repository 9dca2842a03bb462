//! Lenient numeric coercion for portal cells.
//!
//! Cells arrive either as JSON numbers or as Brazilian-formatted strings
//! (`217.208.604`, `1.234,56`, `-`, `nd`). Nothing here fails: bad input
//! becomes zero.

use serde_json::Value;

/// Parses a cleaned numeric string. `None` when nothing numeric remains.
pub fn parse_decimal(raw: &str) -> Option<f64> {
    let s: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    if s.is_empty() {
        return None;
    }

    let cleaned = if s.contains(',') {
        // Decimal comma: dots can only be thousands separators.
        s.replace('.', "").replace(',', ".")
    } else if is_dotted_thousands(&s) {
        s.replace('.', "")
    } else {
        s
    };

    cleaned.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// `1.234` and `12.345.678` are thousands-grouped integers, not decimals.
fn is_dotted_thousands(s: &str) -> bool {
    let digits = s.strip_prefix('-').unwrap_or(s);
    let mut groups = digits.split('.');
    let Some(first) = groups.next() else {
        return false;
    };
    let rest: Vec<&str> = groups.collect();
    !rest.is_empty()
        && (1..=3).contains(&first.len())
        && first.chars().all(|c| c.is_ascii_digit())
        && rest
            .iter()
            .all(|g| g.len() == 3 && g.chars().all(|c| c.is_ascii_digit()))
}

/// Non-negative integer quantity, truncated; anything else is zero.
pub fn coerce_quantity(value: Option<&Value>) -> i64 {
    let number = match value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => parse_decimal(s),
        _ => None,
    };
    match number {
        Some(v) if v > 0.0 => v.trunc() as i64,
        _ => 0,
    }
}

/// Year cell; `None` when absent or not a plausible integer.
pub fn coerce_year(value: Option<&Value>) -> Option<i32> {
    let year = match value {
        Some(Value::Number(n)) => n.as_i64().or_else(|| n.as_f64().map(|f| f.trunc() as i64)),
        Some(Value::String(s)) => s.trim().parse::<i64>().ok(),
        _ => None,
    }?;
    i32::try_from(year).ok().filter(|y| *y > 0)
}
