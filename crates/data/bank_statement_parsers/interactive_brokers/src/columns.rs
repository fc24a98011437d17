//! Column maps built from header rows, and the value coercions used by the
//! section extractors.

use std::borrow::Cow;
use std::collections::HashMap;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use models::TradeDateTime;

use crate::diagnostics::{Diagnostics, Issue};

/// Column name -> field index, built once per header row.
///
/// Indices are absolute positions in the row, so the label and
/// discriminator fields occupy 0 and 1.
#[derive(Debug, Clone)]
pub(crate) struct ColumnMap {
    idx: HashMap<String, usize>,
    width: usize,
}

impl ColumnMap {
    pub fn from_header(fields: &[String]) -> Self {
        let mut idx = HashMap::new();
        for (i, c) in fields.iter().enumerate().skip(2) {
            let k = c.trim().to_string();
            if !k.is_empty() {
                idx.entry(k).or_insert(i);
            }
        }
        Self {
            idx,
            width: fields.len(),
        }
    }

    pub fn index_of(&self, col: &str) -> Option<usize> {
        self.idx.get(col).copied()
    }

    /// Undoes a timestamp that the export split across two fields.
    ///
    /// When the row is one field wider than the header and the field after
    /// `col` looks like a time of day, the two are joined back together so
    /// every later column lines up with the header again.
    pub fn realign<'a>(&self, fields: &'a [String], col: &str) -> Cow<'a, [String]> {
        let Some(i) = self.index_of(col) else {
            return Cow::Borrowed(fields);
        };
        if fields.len() != self.width + 1 {
            return Cow::Borrowed(fields);
        }
        match (fields.get(i), fields.get(i + 1)) {
            (Some(date), Some(time)) if parse_date(date).is_some() && looks_like_time(time) => {
                let mut joined = fields.to_vec();
                let time = joined.remove(i + 1);
                joined[i] = format!("{}, {}", date.trim(), time.trim());
                Cow::Owned(joined)
            }
            _ => Cow::Borrowed(fields),
        }
    }
}

/// A data row projected through its section's column map.
pub(crate) struct RowView<'a> {
    map: &'a ColumnMap,
    fields: Cow<'a, [String]>,
    line: u64,
    section: &'a str,
}

impl<'a> RowView<'a> {
    pub fn new(map: &'a ColumnMap, fields: Cow<'a, [String]>, line: u64, section: &'a str) -> Self {
        Self {
            map,
            fields,
            line,
            section,
        }
    }

    pub fn line(&self) -> u64 {
        self.line
    }

    /// Trimmed cell content; `None` when the column is unknown, the row is
    /// too short, or the cell is empty.
    pub fn text(&self, col: &str) -> Option<&str> {
        let i = self.map.index_of(col)?;
        let v = self.fields.get(i)?.trim();
        if v.is_empty() { None } else { Some(v) }
    }

    pub fn string(&self, col: &str) -> String {
        self.text(col).unwrap_or("").to_string()
    }

    pub fn owned(&self, col: &str) -> Option<String> {
        self.text(col).map(|s| s.to_string())
    }

    pub fn number(&self, col: &str, diags: &mut Diagnostics) -> Option<f64> {
        let raw = self.text(col)?;
        let parsed = parse_number(raw);
        if parsed.is_none() && !is_not_available(raw) {
            diags.row(
                self.line,
                self.section,
                Issue::UnparseableNumber {
                    column: col.to_string(),
                    value: raw.to_string(),
                },
            );
        }
        parsed
    }

    pub fn number_any(&self, cols: &[&str], diags: &mut Diagnostics) -> Option<f64> {
        let col = cols.iter().find(|c| self.text(c).is_some())?;
        self.number(col, diags)
    }

    pub fn date(&self, col: &str, diags: &mut Diagnostics) -> Option<NaiveDate> {
        let raw = self.text(col)?;
        let parsed = parse_date(raw);
        if parsed.is_none() {
            self.bad_date(col, raw, diags);
        }
        parsed
    }

    pub fn date_time(&self, col: &str, diags: &mut Diagnostics) -> Option<TradeDateTime> {
        let raw = self.text(col)?;
        let parsed = parse_date_time(raw);
        if parsed.is_none() {
            self.bad_date(col, raw, diags);
        }
        parsed
    }

    fn bad_date(&self, col: &str, raw: &str, diags: &mut Diagnostics) {
        diags.row(
            self.line,
            self.section,
            Issue::UnparseableDate {
                column: col.to_string(),
                value: raw.to_string(),
            },
        );
    }
}

fn is_not_available(s: &str) -> bool {
    matches!(s.trim(), "" | "-" | "--" | "N/A" | "n/a")
}

/// Parses a statement number: thousands separators and surrounding
/// whitespace are ignored, `(x)` means `-x`. Anything else is absent.
pub fn parse_number(s: &str) -> Option<f64> {
    let t = s.trim();
    if is_not_available(t) {
        return None;
    }
    let (negate, t) = match t.strip_prefix('(').and_then(|x| x.strip_suffix(')')) {
        Some(inner) => (true, inner.trim()),
        None => (false, t),
    };
    let cleaned: String = t.chars().filter(|c| *c != ',' && !c.is_whitespace()).collect();
    let v = cleaned.parse::<f64>().ok().filter(|v| v.is_finite())?;
    Some(if negate { -v } else { v })
}

pub fn parse_date(s: &str) -> Option<NaiveDate> {
    let t = s.trim().trim_matches('"');
    ["%Y-%m-%d", "%Y%m%d", "%m/%d/%Y", "%B %d, %Y", "%b %d, %Y"]
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(t, fmt).ok())
}

pub fn parse_time(s: &str) -> Option<NaiveTime> {
    let t = s.trim();
    ["%H:%M:%S", "%H:%M", "%H%M%S"]
        .iter()
        .find_map(|fmt| NaiveTime::parse_from_str(t, fmt).ok())
}

/// True for "10:15:00" style cells. Colon-less times are not accepted here
/// since a bare number is more likely a quantity.
pub fn looks_like_time(s: &str) -> bool {
    s.split_whitespace()
        .next()
        .filter(|t| t.contains(':'))
        .and_then(parse_time)
        .is_some()
}

/// Parses "2025-03-20, 10:15:00", "2025-03-20;101500", "2025-03-20 10:15:00 EST"
/// or a bare date. A time that cannot be read leaves only the date.
pub fn parse_date_time(s: &str) -> Option<TradeDateTime> {
    let t = s.trim();
    let split_at = t.find([',', ';', ' ']);
    let (date_part, rest) = match split_at {
        Some(i) => (&t[..i], &t[i + 1..]),
        None => (t, ""),
    };
    let date = parse_date(date_part)?;
    let time = rest.split_whitespace().next().and_then(parse_time);
    Some(TradeDateTime::new(date, time))
}

pub fn parse_naive_date_time(s: &str) -> Option<NaiveDateTime> {
    let dt = parse_date_time(s)?;
    match dt.time {
        Some(time) => Some(dt.date.and_time(time)),
        None => dt.date.and_hms_opt(0, 0, 0),
    }
}

/// Trims and collapses internal whitespace runs; statements pad option
/// symbols to a fixed width.
pub fn normalize_symbol(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}
