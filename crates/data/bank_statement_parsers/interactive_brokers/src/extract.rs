//! Per-section extractors: project classified rows into typed records.

use std::borrow::Cow;
use std::collections::HashMap;

use chrono::NaiveDate;
use models::{
    Account, InstrumentInfo, NavEntry, OptionType, Position, StatementInfo, Trade,
    TradeDiscriminator,
};
use sha2::{Digest, Sha256};

use crate::columns::{normalize_symbol, parse_date, parse_naive_date_time, ColumnMap, RowView};
use crate::diagnostics::{Diagnostics, Issue};
use crate::sections::{RowKind, Section};

/// A record together with the line it was read from.
#[derive(Debug, Clone)]
pub(crate) struct Located<T> {
    pub line: u64,
    pub record: T,
}

/// Column maps for every header row of one section.
struct Projector<'a> {
    section: &'a Section,
    maps: HashMap<usize, ColumnMap>,
}

impl<'a> Projector<'a> {
    fn new(section: &'a Section) -> Self {
        let maps = section
            .rows()
            .iter()
            .enumerate()
            .filter(|(_, r)| r.kind() == RowKind::Header)
            .map(|(i, r)| (i, ColumnMap::from_header(r.fields())))
            .collect();
        Self { section, maps }
    }

    /// Calls `f` for every row of kind `accept`, projected through the
    /// header that governs it. Aggregate rows and unmappable rows are
    /// logged and skipped.
    fn each<F>(&self, accept: RowKind, realign: Option<&str>, diags: &mut Diagnostics, mut f: F)
    where
        F: FnMut(&RowView<'_>, &mut Diagnostics),
    {
        let label = self.section.label();
        for row in self.section.rows() {
            match row.kind() {
                RowKind::Header => continue,
                k if k == accept => {}
                k if k.is_aggregate() => {
                    diags.row(
                        row.line(),
                        label,
                        Issue::AggregateRow {
                            row_kind: format!("{:?}", k),
                        },
                    );
                    continue;
                }
                k => {
                    diags.row(
                        row.line(),
                        label,
                        Issue::UnknownDiscriminator {
                            value: format!("{:?}", k),
                        },
                    );
                    continue;
                }
            }

            let Some(map) = self
                .section
                .header_for(row)
                .and_then(|(idx, _)| self.maps.get(&idx))
            else {
                diags.row(row.line(), label, Issue::MissingHeader);
                continue;
            };

            let fields = match realign {
                Some(col) => map.realign(row.fields(), col),
                None => Cow::Borrowed(row.fields()),
            };
            let view = RowView::new(map, fields, row.line(), label);
            f(&view, diags);
        }
    }
}

fn missing(view: &RowView<'_>, label: &str, column: &str, diags: &mut Diagnostics) {
    diags.row(
        view.line(),
        label,
        Issue::MissingField {
            column: column.to_string(),
        },
    );
}

/// Walks a two-column `Field Name` / `Field Value` section.
fn key_values<F>(section: &Section, diags: &mut Diagnostics, mut f: F)
where
    F: FnMut(&str, &str, &RowView<'_>, &mut Diagnostics),
{
    let projector = Projector::new(section);
    projector.each(RowKind::Data, None, diags, |view, diags| {
        match (view.text("Field Name"), view.text("Field Value")) {
            (Some(name), Some(value)) => f(name, value, view, diags),
            (None, _) => missing(view, section.label(), "Field Name", diags),
            (Some(_), None) => {}
        }
    });
}

pub(crate) fn extract_statement_info(section: &Section, diags: &mut Diagnostics) -> StatementInfo {
    let mut info = StatementInfo::default();
    key_values(section, diags, |name, value, view, diags| {
        match name.to_lowercase().as_str() {
            "brokername" => info.broker_name = Some(value.to_string()),
            "title" => info.title = Some(value.to_string()),
            "period" => match parse_period(value) {
                Some((start, end)) => {
                    info.period_start = Some(start);
                    info.period_end = Some(end);
                }
                None => diags.row(
                    view.line(),
                    section.label(),
                    Issue::UnparseableDate {
                        column: "Period".to_string(),
                        value: value.to_string(),
                    },
                ),
            },
            "whengenerated" => {
                info.generated_at = parse_naive_date_time(value);
                if info.generated_at.is_none() {
                    diags.row(
                        view.line(),
                        section.label(),
                        Issue::UnparseableDate {
                            column: "WhenGenerated".to_string(),
                            value: value.to_string(),
                        },
                    );
                }
            }
            _ => {}
        }
    });
    info
}

/// "March 1, 2025 - March 31, 2025" or a single date.
fn parse_period(period: &str) -> Option<(NaiveDate, NaiveDate)> {
    let normalized = period
        .trim()
        .trim_matches('"')
        .replace(['–', '—'], "-");

    if let Some((start, end)) = normalized.split_once(" - ") {
        return Some((parse_date(start)?, parse_date(end)?));
    }

    let day = parse_date(&normalized)?;
    Some((day, day))
}

pub(crate) fn extract_account(section: &Section, diags: &mut Diagnostics) -> Account {
    let mut account = Account::default();
    key_values(section, diags, |name, value, _, _| match name {
        "Account" => account.account_id = value.to_string(),
        "Name" => account.account_name = value.to_string(),
        "Account Type" => account.account_type = value.to_string(),
        "Base Currency" => account.base_currency = value.to_string(),
        _ => {}
    });
    account
}

pub(crate) fn extract_net_asset_value(section: &Section, diags: &mut Diagnostics) -> Vec<NavEntry> {
    let mut entries = Vec::new();
    Projector::new(section).each(RowKind::Data, None, diags, |view, diags| {
        let Some(asset_class) = view.owned("Asset Class") else {
            missing(view, section.label(), "Asset Class", diags);
            return;
        };
        entries.push(NavEntry {
            asset_class,
            prior_total: view.number("Prior Total", diags),
            current_long: view.number("Current Long", diags),
            current_short: view.number("Current Short", diags),
            current_total: view.number("Current Total", diags),
            change: view.number("Change", diags),
        });
    });
    entries
}

/// Current total of the NAV "Total" line, which is the account balance.
pub(crate) fn nav_balance(entries: &[NavEntry]) -> Option<f64> {
    entries
        .iter()
        .find(|e| e.asset_class.eq_ignore_ascii_case("Total"))
        .and_then(|e| e.current_total)
}

pub(crate) fn extract_positions(section: &Section, diags: &mut Diagnostics) -> Vec<Position> {
    let mut positions = Vec::new();
    Projector::new(section).each(RowKind::Data, None, diags, |view, diags| {
        if view
            .text("DataDiscriminator")
            .is_some_and(|d| d.eq_ignore_ascii_case("Lot"))
        {
            diags.row(view.line(), section.label(), Issue::SkippedLotRow);
            return;
        }

        let Some(symbol) = view.text("Symbol").map(normalize_symbol) else {
            missing(view, section.label(), "Symbol", diags);
            return;
        };

        positions.push(Position {
            symbol,
            asset_category: view.string("Asset Category"),
            currency: view.string("Currency"),
            quantity: view.number("Quantity", diags),
            multiplier: view.number_any(&["Mult", "Multiplier"], diags),
            cost_price: view.number("Cost Price", diags),
            cost_basis: view.number("Cost Basis", diags),
            close_price: view.number("Close Price", diags),
            value: view.number("Value", diags),
            unrealized_pnl: view.number("Unrealized P/L", diags),
            code: view.owned("Code"),
        });
    });
    positions
}

pub(crate) fn extract_trades(section: &Section, diags: &mut Diagnostics) -> Vec<Located<Trade>> {
    let mut trades = Vec::new();
    let mut seen: HashMap<String, u32> = HashMap::new();

    Projector::new(section).each(RowKind::Order, Some("Date/Time"), diags, |view, diags| {
        let Some(symbol) = view.text("Symbol").map(normalize_symbol) else {
            missing(view, section.label(), "Symbol", diags);
            return;
        };

        let account = view.owned("Account");
        let date_time = view.date_time("Date/Time", diags);
        let quantity = view.number("Quantity", diags);
        let trade_price = view.number("T. Price", diags);

        let key = format!(
            "{}|{}|{}|{}|{}",
            account.as_deref().unwrap_or(""),
            symbol,
            view.text("Date/Time").unwrap_or(""),
            view.text("Quantity").unwrap_or(""),
            view.text("T. Price").unwrap_or(""),
        );
        let trade_id = build_trade_id(&key, &mut seen);

        trades.push(Located {
            line: view.line(),
            record: Trade {
                trade_id,
                discriminator: TradeDiscriminator::Order,
                asset_category: view.string("Asset Category"),
                currency: view.string("Currency"),
                account,
                symbol,
                date_time,
                quantity,
                trade_price,
                close_price: view.number("C. Price", diags),
                proceeds: view.number("Proceeds", diags),
                commission_or_fee: view.number_any(&["Comm/Fee", "Comm in USD"], diags),
                basis: view.number("Basis", diags),
                realized_pnl: view.number("Realized P/L", diags),
                mark_to_market_pnl: view.number("MTM P/L", diags),
                code: view.owned("Code"),
            },
        });
    });
    trades
}

pub(crate) fn extract_instruments(section: &Section, diags: &mut Diagnostics) -> Vec<InstrumentInfo> {
    let mut instruments = Vec::new();
    Projector::new(section).each(RowKind::Data, None, diags, |view, diags| {
        let Some(symbol) = view.text("Symbol").map(|s| s.to_string()) else {
            missing(view, section.label(), "Symbol", diags);
            return;
        };

        instruments.push(InstrumentInfo {
            asset_category: view.string("Asset Category"),
            symbol,
            description: view.owned("Description"),
            contract_id: view.owned("Conid"),
            underlying_symbol: view.owned("Underlying"),
            listing_exchange: view.owned("Listing Exch"),
            multiplier: view.number("Multiplier", diags),
            expiry_date: view.date("Expiry", diags),
            delivery_month: view.owned("Delivery Month"),
            option_type: view.text("Type").and_then(OptionType::parse),
            strike_price: view.number("Strike", diags),
            code: view.owned("Code"),
        });
    });
    instruments
}

/// Deterministic id; repeated identical rows get an occurrence suffix.
fn build_trade_id(key: &str, seen: &mut HashMap<String, u32>) -> String {
    let n = seen.entry(key.to_string()).or_insert(0);
    let keyed = if *n == 0 {
        key.to_string()
    } else {
        format!("{}#{}", key, n)
    };
    *n += 1;

    let mut hasher = Sha256::new();
    hasher.update(keyed.as_bytes());
    let h = hex::encode(hasher.finalize());
    format!("IBKR-TRD-{}", &h[..24])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sections::{segment, TRADES};
    use crate::tokenizer::tokenize;

    fn sections(text: &str) -> (crate::sections::Sections, Diagnostics) {
        let mut diags = Diagnostics::new();
        let rows = tokenize(text, b',', &mut diags);
        let sections = segment(rows, &mut diags);
        (sections, diags)
    }

    #[test]
    fn test_parse_period() {
        let (start, end) = parse_period("March 1, 2025 - March 31, 2025").unwrap();
        assert_eq!(start, NaiveDate::from_ymd_opt(2025, 3, 1).unwrap());
        assert_eq!(end, NaiveDate::from_ymd_opt(2025, 3, 31).unwrap());

        let (start, end) = parse_period("March 31, 2025").unwrap();
        assert_eq!(start, end);
        assert!(parse_period("sometime").is_none());
    }

    #[test]
    fn test_statement_info() {
        let (s, mut diags) = sections(
            "Statement,Header,Field Name,Field Value\n\
             Statement,Data,BrokerName,Interactive Brokers LLC\n\
             Statement,Data,Title,Activity Statement\n\
             Statement,Data,Period,\"March 1, 2025 - March 31, 2025\"\n\
             Statement,Data,WhenGenerated,\"2025-04-01, 10:21:44 EDT\"\n",
        );
        let info = extract_statement_info(s.get("Statement").unwrap(), &mut diags);
        assert_eq!(info.broker_name.as_deref(), Some("Interactive Brokers LLC"));
        assert_eq!(info.period_end, NaiveDate::from_ymd_opt(2025, 3, 31));
        assert_eq!(
            info.generated_at.unwrap().to_string(),
            "2025-04-01 10:21:44"
        );
        assert!(diags.into_vec().is_empty());
    }

    #[test]
    fn test_account_and_nav() {
        let (s, mut diags) = sections(
            "Account Information,Header,Field Name,Field Value\n\
             Account Information,Data,Name,Jane Doe\n\
             Account Information,Data,Account,U1234567\n\
             Account Information,Data,Account Type,Individual\n\
             Account Information,Data,Base Currency,USD\n\
             Net Asset Value,Header,Asset Class,Prior Total,Current Long,Current Short,Current Total,Change\n\
             Net Asset Value,Data,Cash ,1000,1200,0,1200,200\n\
             Net Asset Value,Data,Total,\"10,000.5\",\"12,000\",0,\"12,345.67\",\"2,345.17\"\n",
        );
        let account = extract_account(s.get("Account Information").unwrap(), &mut diags);
        assert_eq!(account.account_id, "U1234567");
        assert_eq!(account.account_name, "Jane Doe");
        assert_eq!(account.base_currency, "USD");

        let nav = extract_net_asset_value(s.get("Net Asset Value").unwrap(), &mut diags);
        assert_eq!(nav.len(), 2);
        assert_eq!(nav[0].asset_class, "Cash");
        assert_eq!(nav_balance(&nav), Some(12345.67));
        assert!(diags.into_vec().is_empty());
    }

    #[test]
    fn test_positions_skip_lots_and_totals() {
        let (s, mut diags) = sections(
            "Open Positions,Header,DataDiscriminator,Asset Category,Currency,Symbol,Quantity,Mult,Cost Price,Cost Basis,Close Price,Value,Unrealized P/L,Code\n\
             Open Positions,Data,Summary,Equity and Index Options,USD,SPY 31MAR25 570 C,1,100,0.8315665,83.15665,1.1,110,26.84335,\n\
             Open Positions,Data,Lot,Equity and Index Options,USD,SPY 31MAR25 570 C,1,100,0.8315665,83.15665,1.1,110,26.84335,\n\
             Open Positions,Total,,Equity and Index Options,USD,,,,,83.15665,,110,26.84335,\n",
        );
        let positions = extract_positions(s.get("Open Positions").unwrap(), &mut diags);
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].quantity, Some(1.0));
        assert_eq!(positions[0].cost_basis, Some(83.15665));
        assert_eq!(positions[0].multiplier, Some(100.0));
        assert_eq!(positions[0].code, None);

        let entries = diags.into_vec();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].issue, Issue::SkippedLotRow);
        assert!(matches!(entries[1].issue, Issue::AggregateRow { .. }));
    }

    #[test]
    fn test_trades_realign_split_timestamp_and_ids() {
        let (s, mut diags) = sections(
            "Trades,Header,DataDiscriminator,Asset Category,Currency,Account,Symbol,Date/Time,Quantity,T. Price\n\
             Trades,Data,Order,Stocks,USD,U1,AAPL,2025-03-20, 10:15:00,10,220.5\n\
             Trades,Data,Order,Stocks,USD,U1,AAPL,2025-03-20, 10:15:00,10,220.5\n",
        );
        let trades = extract_trades(s.get(TRADES).unwrap(), &mut diags);
        assert_eq!(trades.len(), 2);

        let t = &trades[0].record;
        assert_eq!(t.quantity, Some(10.0));
        assert_eq!(t.trade_price, Some(220.5));
        assert_eq!(t.date_time.unwrap().to_string(), "2025-03-20, 10:15:00");
        assert!(t.trade_id.starts_with("IBKR-TRD-"));
        assert_ne!(t.trade_id, trades[1].record.trade_id);
        assert_eq!(trades[1].line, 3);
    }

    #[test]
    fn test_data_without_header_is_skipped() {
        let (s, mut diags) = sections("Trades,Data,Order,Stocks,USD\n");
        let trades = extract_trades(s.get(TRADES).unwrap(), &mut diags);
        assert!(trades.is_empty());
        assert_eq!(diags.into_vec()[0].issue, Issue::MissingHeader);
    }

    #[test]
    fn test_instruments() {
        let (s, mut diags) = sections(
            "Financial Instrument Information,Header,Asset Category,Symbol,Description,Conid,Underlying,Listing Exch,Multiplier,Expiry,Delivery Month,Type,Strike,Code\n\
             Financial Instrument Information,Data,Equity and Index Options,AAPL  28MAR25 222.5 C,AAPL 28MAR25 222.5 C,7654321,AAPL,CBOE,100,2025-03-28,2025-03,C,222.5,\n",
        );
        let instruments =
            extract_instruments(s.get("Financial Instrument Information").unwrap(), &mut diags);
        assert_eq!(instruments.len(), 1);
        let i = &instruments[0];
        assert_eq!(i.symbol, "AAPL  28MAR25 222.5 C");
        assert_eq!(i.option_type, Some(OptionType::Call));
        assert_eq!(i.strike_price, Some(222.5));
        assert_eq!(i.expiry_date, NaiveDate::from_ymd_opt(2025, 3, 28));
        assert!(diags.into_vec().is_empty());
    }
}
