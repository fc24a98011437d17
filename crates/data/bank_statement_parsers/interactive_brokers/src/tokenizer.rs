//! Splits raw statement text into rows of fields.

use crate::diagnostics::{Diagnostics, Issue};

/// One physical row of the statement, fields untrimmed.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRow {
    pub line: u64,
    pub fields: Vec<String>,
}

/// Tokenizes `text` with the given single-byte delimiter.
///
/// Quoted fields may contain the delimiter and doubled quotes. Rows keep
/// whatever number of fields they have; blank rows are dropped.
pub(crate) fn tokenize(text: &str, delimiter: u8, diags: &mut Diagnostics) -> Vec<RawRow> {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);

    let mut csvr = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .delimiter(delimiter)
        .from_reader(text.as_bytes());

    let mut rows = Vec::new();
    for (ordinal, rec) in csvr.records().enumerate() {
        let rec = match rec {
            Ok(rec) => rec,
            Err(err) => {
                let line = err
                    .position()
                    .map(|p| p.line())
                    .unwrap_or(ordinal as u64 + 1);
                diags.row(
                    line,
                    "",
                    Issue::Tokenizer {
                        message: err.to_string(),
                    },
                );
                continue;
            }
        };

        if rec.iter().all(|f| f.trim().is_empty()) {
            continue;
        }

        let line = rec.position().map(|p| p.line()).unwrap_or(ordinal as u64 + 1);
        rows.push(RawRow {
            line,
            fields: rec.iter().map(|f| f.to_string()).collect(),
        });
    }

    rows
}
