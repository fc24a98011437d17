//! Parser for IBKR activity statement exports.
//!
//! The export is a sequence of sections (`Statement`, `Account Information`,
//! `Net Asset Value`, `Open Positions`, `Trades`, `Financial Instrument
//! Information`, ...), each with its own header row and row discriminators.
//! [`parse_statement`] turns the raw text into typed records. It never fails:
//! anything it cannot interpret is left out and recorded in
//! [`ParsedStatement::diagnostics`].

mod columns;
mod diagnostics;
mod extract;
mod linker;
mod sections;
mod tokenizer;

use models::{
    Account, InstrumentInfo, NavEntry, OptionTrade, ParserSettings, Position, StatementInfo, Trade,
};
use serde::Serialize;
use thiserror::Error;

pub use columns::{normalize_symbol, parse_date_time, parse_number};
pub use diagnostics::{Diagnostic, Issue};
pub use linker::{resolve_contract, terms_from_symbol, Contract, ContractTerms, InstrumentTable};
pub use sections::{ClassifiedRow, RowKind, Section, SectionKind, Sections};

use diagnostics::Diagnostics;
use linker::LinkOptions;
use sections::{
    ACCOUNT_INFORMATION, FINANCIAL_INSTRUMENT_INFORMATION, NET_ASSET_VALUE, OPEN_POSITIONS, TRADES,
};

pub const PARSER_NAME: &str = "ibkr";

#[derive(Debug, Error, PartialEq)]
pub enum OptionsError {
    #[error("delimiter must be exactly one ASCII character, got {0:?}")]
    InvalidDelimiter(String),
    #[error("default option multiplier must be positive, got {0}")]
    InvalidMultiplier(f64),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParseOptions {
    delimiter: u8,
    default_option_multiplier: f64,
    pnl_tolerance: f64,
    option_categories: Vec<String>,
}

impl Default for ParseOptions {
    fn default() -> Self {
        let settings = ParserSettings::default();
        Self {
            delimiter: b',',
            default_option_multiplier: settings.default_option_multiplier,
            pnl_tolerance: settings.pnl_tolerance,
            option_categories: settings.option_categories,
        }
    }
}

impl ParseOptions {
    pub fn from_settings(settings: &ParserSettings) -> Result<Self, OptionsError> {
        let multiplier = settings.default_option_multiplier;
        if multiplier.is_nan() || multiplier <= 0.0 {
            return Err(OptionsError::InvalidMultiplier(multiplier));
        }
        Ok(Self {
            delimiter: delimiter_byte(&settings.delimiter)?,
            default_option_multiplier: multiplier,
            pnl_tolerance: settings.pnl_tolerance.abs(),
            option_categories: settings.option_categories.clone(),
        })
    }

    pub fn with_delimiter(mut self, delimiter: &str) -> Result<Self, OptionsError> {
        self.delimiter = delimiter_byte(delimiter)?;
        Ok(self)
    }

    pub fn delimiter(&self) -> u8 {
        self.delimiter
    }
}

/// Accepts a single ASCII character; the two-character escape `\t` also
/// means tab.
fn delimiter_byte(raw: &str) -> Result<u8, OptionsError> {
    if raw == "\\t" {
        return Ok(b'\t');
    }
    match raw.as_bytes() {
        [b] if b.is_ascii() => Ok(*b),
        _ => Err(OptionsError::InvalidDelimiter(raw.to_string())),
    }
}

/// Everything extracted from one statement. Immutable once returned.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParsedStatement {
    account: Account,
    statement_info: StatementInfo,
    net_asset_value: Vec<NavEntry>,
    positions: Vec<Position>,
    trades: Vec<Trade>,
    option_trades: Vec<OptionTrade>,
    instruments: Vec<InstrumentInfo>,
    diagnostics: Vec<Diagnostic>,
    #[serde(skip)]
    sections: Sections,
}

impl ParsedStatement {
    pub fn account(&self) -> &Account {
        &self.account
    }

    pub fn statement_info(&self) -> &StatementInfo {
        &self.statement_info
    }

    pub fn net_asset_value(&self) -> &[NavEntry] {
        &self.net_asset_value
    }

    pub fn positions(&self) -> &[Position] {
        &self.positions
    }

    /// Individual executions; subtotal and total lines never appear here.
    pub fn trades(&self) -> &[Trade] {
        &self.trades
    }

    pub fn option_trades(&self) -> &[OptionTrade] {
        &self.option_trades
    }

    pub fn instruments(&self) -> &[InstrumentInfo] {
        &self.instruments
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    /// The segmented input, for debugging.
    pub fn sections(&self) -> &Sections {
        &self.sections
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty() && self.trades.is_empty() && self.option_trades.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct StatementParser {
    options: ParseOptions,
}

impl StatementParser {
    pub fn new(options: ParseOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &ParseOptions {
        &self.options
    }

    pub fn parse(&self, text: &str) -> ParsedStatement {
        self.parse_with(text, Diagnostics::new())
    }

    fn parse_with(&self, text: &str, mut diags: Diagnostics) -> ParsedStatement {
        let rows = tokenizer::tokenize(text, self.options.delimiter, &mut diags);
        let sections = sections::segment(rows, &mut diags);

        for expected in [
            ACCOUNT_INFORMATION,
            NET_ASSET_VALUE,
            OPEN_POSITIONS,
            TRADES,
            FINANCIAL_INSTRUMENT_INFORMATION,
        ] {
            if sections.get(expected).is_none() {
                diags.section(expected, Issue::MissingSection);
            }
        }

        let mut statement_info = StatementInfo::default();
        let mut account: Option<Account> = None;
        let mut net_asset_value = Vec::new();
        let mut positions = Vec::new();
        let mut located_trades = Vec::new();
        let mut instruments = Vec::new();

        for section in sections.iter() {
            match section.kind() {
                SectionKind::Statement => {
                    statement_info = extract::extract_statement_info(section, &mut diags)
                }
                SectionKind::AccountInformation => {
                    account = Some(extract::extract_account(section, &mut diags))
                }
                SectionKind::NetAssetValue => {
                    net_asset_value = extract::extract_net_asset_value(section, &mut diags)
                }
                SectionKind::OpenPositions => {
                    positions = extract::extract_positions(section, &mut diags)
                }
                SectionKind::Trades => {
                    located_trades = extract::extract_trades(section, &mut diags)
                }
                SectionKind::FinancialInstrumentInformation => {
                    instruments = extract::extract_instruments(section, &mut diags)
                }
                SectionKind::Other => {
                    tracing::debug!(section = section.label(), "Ignoring section");
                }
            }
        }

        let balance = extract::nav_balance(&net_asset_value);
        let account = match account {
            Some(mut acc) => {
                acc.balance = balance;
                acc
            }
            None => {
                let mut acc = Account::placeholder();
                acc.balance = balance.or(acc.balance);
                acc
            }
        };

        let option_trades = linker::link_option_trades(
            &located_trades,
            &instruments,
            &LinkOptions {
                option_categories: &self.options.option_categories,
                default_multiplier: self.options.default_option_multiplier,
                pnl_tolerance: self.options.pnl_tolerance,
            },
            &mut diags,
        );
        let trades: Vec<Trade> = located_trades.into_iter().map(|l| l.record).collect();

        let diagnostics = diags.into_vec();
        tracing::info!(
            sections = sections.len(),
            positions = positions.len(),
            trades = trades.len(),
            option_trades = option_trades.len(),
            diagnostics = diagnostics.len(),
            "Parsed {} statement",
            PARSER_NAME
        );

        ParsedStatement {
            account,
            statement_info,
            net_asset_value,
            positions,
            trades,
            option_trades,
            instruments,
            diagnostics,
            sections,
        }
    }
}

/// Parses a statement. `delimiter` defaults to `,`; an override that is not a
/// single ASCII character is noted in the diagnostics and ignored.
pub fn parse_statement(text: &str, delimiter: Option<&str>) -> ParsedStatement {
    let mut diags = Diagnostics::new();
    let mut options = ParseOptions::default();

    if let Some(raw) = delimiter {
        match options.clone().with_delimiter(raw) {
            Ok(o) => options = o,
            Err(_) => diags.section(
                "",
                Issue::InvalidDelimiter {
                    value: raw.to_string(),
                },
            ),
        }
    }

    StatementParser::new(options).parse_with(text, diags)
}
