//! Non-fatal issues collected while parsing a statement.
//!
//! Nothing in the parser returns an error to the caller. Every row that is
//! skipped, and every value that could not be interpreted, is recorded here
//! together with the physical line it came from.

use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Issue {
    #[error("unreadable input: {message}")]
    Tokenizer { message: String },

    #[error("row has {fields} field(s), at least 2 required")]
    ShortRow { fields: usize },

    #[error("section never appears in the statement")]
    MissingSection,

    #[error("no Header row available to map this row")]
    MissingHeader,

    #[error("required column '{column}' is missing or empty")]
    MissingField { column: String },

    #[error("unrecognized row discriminator '{value}'")]
    UnknownDiscriminator { value: String },

    #[error("{row_kind} row skipped (aggregate, not an individual record)")]
    AggregateRow { row_kind: String },

    #[error("per-lot row skipped, summary row already carries the position")]
    SkippedLotRow,

    #[error("column '{column}' value '{value}' is not a number")]
    UnparseableNumber { column: String, value: String },

    #[error("column '{column}' value '{value}' is not a date")]
    UnparseableDate { column: String, value: String },

    #[error("delimiter '{value}' is not a single ASCII character, using ','")]
    InvalidDelimiter { value: String },

    #[error("option trade on '{symbol}' could not be decoded, kept as plain trade")]
    UnresolvedOption { symbol: String },

    #[error("trade on '{symbol}' has no usable quantity, cannot be paired")]
    UnmatchedQuantity { symbol: String },

    #[error("realized P/L for '{symbol}' reported {reported:.4}, computed {computed:.4}")]
    RealizedPnlMismatch {
        symbol: String,
        reported: f64,
        computed: f64,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Diagnostic {
    /// 1-based physical line, when the issue belongs to a single row.
    pub line: Option<u64>,
    pub section: String,
    pub issue: Issue,
}

impl Diagnostic {
    pub fn reason(&self) -> String {
        self.issue.to_string()
    }
}

/// Ordered diagnostics log owned by a single parse call.
#[derive(Debug, Default)]
pub(crate) struct Diagnostics {
    entries: Vec<Diagnostic>,
}

impl Diagnostics {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn row(&mut self, line: u64, section: &str, issue: Issue) {
        self.push(Some(line), section, issue);
    }

    pub(crate) fn section(&mut self, section: &str, issue: Issue) {
        self.push(None, section, issue);
    }

    fn push(&mut self, line: Option<u64>, section: &str, issue: Issue) {
        tracing::debug!(line = ?line, section, "{}", issue);
        self.entries.push(Diagnostic {
            line,
            section: section.to_string(),
            issue,
        });
    }

    pub(crate) fn into_vec(self) -> Vec<Diagnostic> {
        self.entries
    }
}
