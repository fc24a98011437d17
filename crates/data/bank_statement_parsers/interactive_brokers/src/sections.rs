//! Groups tokenized rows into labelled sections and classifies each row.

use std::collections::HashMap;

use serde::Serialize;

use crate::diagnostics::{Diagnostics, Issue};
use crate::tokenizer::RawRow;

pub const STATEMENT: &str = "Statement";
pub const ACCOUNT_INFORMATION: &str = "Account Information";
pub const NET_ASSET_VALUE: &str = "Net Asset Value";
pub const OPEN_POSITIONS: &str = "Open Positions";
pub const TRADES: &str = "Trades";
pub const FINANCIAL_INSTRUMENT_INFORMATION: &str = "Financial Instrument Information";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SectionKind {
    Statement,
    AccountInformation,
    NetAssetValue,
    OpenPositions,
    Trades,
    FinancialInstrumentInformation,
    Other,
}

impl SectionKind {
    pub fn from_label(label: &str) -> Self {
        match label {
            STATEMENT => SectionKind::Statement,
            ACCOUNT_INFORMATION => SectionKind::AccountInformation,
            NET_ASSET_VALUE => SectionKind::NetAssetValue,
            OPEN_POSITIONS => SectionKind::OpenPositions,
            TRADES => SectionKind::Trades,
            FINANCIAL_INSTRUMENT_INFORMATION => SectionKind::FinancialInstrumentInformation,
            _ => SectionKind::Other,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum RowKind {
    Header,
    Data,
    SubTotal,
    Total,
    Order,
    Unknown,
}

impl RowKind {
    fn from_discriminator(value: &str) -> Self {
        match value {
            "Header" => RowKind::Header,
            "Data" => RowKind::Data,
            "SubTotal" => RowKind::SubTotal,
            "Total" => RowKind::Total,
            "Order" => RowKind::Order,
            _ => RowKind::Unknown,
        }
    }

    pub fn is_aggregate(self) -> bool {
        matches!(self, RowKind::SubTotal | RowKind::Total)
    }
}

/// Reads the row-kind discriminator of a row.
///
/// Most sections carry it in field 1. Trades data rows carry a second
/// discriminator (`DataDiscriminator`) in field 2 that separates individual
/// orders from subtotal and total lines.
pub fn classify(kind: SectionKind, fields: &[String]) -> (RowKind, String) {
    let primary = fields.get(1).map(|s| s.trim()).unwrap_or("");
    let row_kind = RowKind::from_discriminator(primary);

    if kind != SectionKind::Trades || row_kind != RowKind::Data {
        return match row_kind {
            RowKind::Order => (RowKind::Unknown, primary.to_string()),
            other => (other, primary.to_string()),
        };
    }

    let secondary = fields.get(2).map(|s| s.trim()).unwrap_or("");
    match RowKind::from_discriminator(secondary) {
        k @ (RowKind::Order | RowKind::SubTotal | RowKind::Total) => (k, secondary.to_string()),
        _ => (RowKind::Unknown, format!("Data/{}", secondary)),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassifiedRow {
    line: u64,
    kind: RowKind,
    fields: Vec<String>,
    header_row: Option<usize>,
}

impl ClassifiedRow {
    pub fn line(&self) -> u64 {
        self.line
    }

    pub fn kind(&self) -> RowKind {
        self.kind
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    /// Index (within the section's rows) of the header preceding this row.
    pub fn header_index(&self) -> Option<usize> {
        self.header_row
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Section {
    label: String,
    kind: SectionKind,
    rows: Vec<ClassifiedRow>,
    #[serde(skip)]
    first_header: Option<usize>,
    #[serde(skip)]
    last_header: Option<usize>,
}

impl Section {
    fn new(label: &str) -> Self {
        Self {
            label: label.to_string(),
            kind: SectionKind::from_label(label),
            rows: Vec::new(),
            first_header: None,
            last_header: None,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn kind(&self) -> SectionKind {
        self.kind
    }

    pub fn rows(&self) -> &[ClassifiedRow] {
        &self.rows
    }

    /// The first Header row of the section.
    pub fn header(&self) -> Option<&ClassifiedRow> {
        self.headers().next()
    }

    pub fn headers(&self) -> impl Iterator<Item = &ClassifiedRow> {
        self.rows.iter().filter(|r| r.kind == RowKind::Header)
    }

    /// The header governing `row`: the latest one of this section that
    /// precedes it, or the section's first header otherwise.
    pub fn header_for(&self, row: &ClassifiedRow) -> Option<(usize, &ClassifiedRow)> {
        let idx = row.header_row.or(self.first_header)?;
        self.rows.get(idx).map(|h| (idx, h))
    }

    fn push(&mut self, line: u64, kind: RowKind, fields: Vec<String>) {
        let header_row = if kind == RowKind::Header {
            let idx = self.rows.len();
            self.first_header.get_or_insert(idx);
            self.last_header = Some(idx);
            None
        } else {
            self.last_header
        };
        self.rows.push(ClassifiedRow {
            line,
            kind,
            fields,
            header_row,
        });
    }
}

/// Read-only section map, iterated in order of first appearance.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Sections {
    sections: Vec<Section>,
    #[serde(skip)]
    index: HashMap<String, usize>,
}

impl Sections {
    pub fn get(&self, label: &str) -> Option<&Section> {
        self.index.get(label).map(|&i| &self.sections[i])
    }

    pub fn iter(&self) -> impl Iterator<Item = &Section> {
        self.sections.iter()
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.sections.iter().map(|s| s.label.as_str())
    }

    pub fn len(&self) -> usize {
        self.sections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    fn bucket(&mut self, label: &str) -> &mut Section {
        let next = self.sections.len();
        let idx = *self.index.entry(label.to_string()).or_insert(next);
        if idx == next {
            self.sections.push(Section::new(label));
        }
        &mut self.sections[idx]
    }
}

/// Folds tokenized rows into sections keyed by field 0.
///
/// All rows sharing a label land in one bucket even when the label recurs
/// after other sections. Rows shorter than two fields and rows with an
/// unrecognized discriminator are dropped with a diagnostic.
pub(crate) fn segment(rows: Vec<RawRow>, diags: &mut Diagnostics) -> Sections {
    rows.into_iter().fold(Sections::default(), |mut acc, row| {
        let label = row.fields.first().map(|s| s.trim()).unwrap_or("").to_string();

        if row.fields.len() < 2 {
            diags.row(
                row.line,
                &label,
                Issue::ShortRow {
                    fields: row.fields.len(),
                },
            );
            return acc;
        }

        let kind = SectionKind::from_label(&label);
        match classify(kind, &row.fields) {
            (RowKind::Unknown, value) => {
                diags.row(row.line, &label, Issue::UnknownDiscriminator { value });
            }
            (row_kind, _) => acc.bucket(&label).push(row.line, row_kind, row.fields),
        }
        acc
    })
}
