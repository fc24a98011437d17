//! Reconstructs option trades from executed trades.
//!
//! Contract identity is resolved by an ordered chain: the Financial
//! Instrument Information entry for the symbol first, then a decode of the
//! symbol text itself. Reference values win field by field; the decode only
//! fills what the reference entry leaves empty.

use std::collections::HashMap;
use std::sync::LazyLock;

use chrono::NaiveDate;
use models::{InstrumentInfo, OptionTrade, PutCall, Trade};
use regex::Regex;

use crate::columns::normalize_symbol;
use crate::diagnostics::{Diagnostics, Issue};
use crate::extract::Located;
use crate::sections::TRADES;

static OPTION_SYMBOL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([A-Za-z]+)\s+(\d{1,2})([A-Za-z]{3})(\d{2})\s+(\d+(?:\.\d+)?)\s+([CPcp])$")
        .expect("option symbol pattern")
});

const MONTHS: [&str; 12] = [
    "JAN", "FEB", "MAR", "APR", "MAY", "JUN", "JUL", "AUG", "SEP", "OCT", "NOV", "DEC",
];

/// Partially known contract terms.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContractTerms {
    pub underlying: Option<String>,
    pub expiry: Option<NaiveDate>,
    pub strike: Option<f64>,
    pub put_call: Option<PutCall>,
    pub multiplier: Option<f64>,
}

impl ContractTerms {
    /// Keeps every field already set, takes the rest from `other`.
    fn or(self, other: ContractTerms) -> ContractTerms {
        ContractTerms {
            underlying: self.underlying.or(other.underlying),
            expiry: self.expiry.or(other.expiry),
            strike: self.strike.or(other.strike),
            put_call: self.put_call.or(other.put_call),
            multiplier: self.multiplier.or(other.multiplier),
        }
    }

    fn complete(self, default_multiplier: f64) -> Option<Contract> {
        Some(Contract {
            underlying: self.underlying?,
            expiry: self.expiry?,
            strike: self.strike?,
            put_call: self.put_call?,
            multiplier: self.multiplier.unwrap_or(default_multiplier),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Contract {
    pub underlying: String,
    pub expiry: NaiveDate,
    pub strike: f64,
    pub put_call: PutCall,
    pub multiplier: f64,
}

/// Reference entries keyed by normalized symbol and every listed alias.
pub struct InstrumentTable<'a> {
    by_symbol: HashMap<String, &'a InstrumentInfo>,
}

impl<'a> InstrumentTable<'a> {
    pub fn build(instruments: &'a [InstrumentInfo]) -> Self {
        let mut by_symbol = HashMap::new();
        for inst in instruments {
            by_symbol
                .entry(normalize_symbol(&inst.symbol))
                .or_insert(inst);
            for alias in inst.symbol.split(',') {
                let alias = normalize_symbol(alias);
                if !alias.is_empty() {
                    by_symbol.entry(alias).or_insert(inst);
                }
            }
        }
        Self { by_symbol }
    }

    pub fn lookup(&self, symbol: &str) -> Option<&'a InstrumentInfo> {
        self.by_symbol.get(&normalize_symbol(symbol)).copied()
    }
}

/// Terms from a reference entry.
pub fn terms_from_reference(inst: &InstrumentInfo) -> ContractTerms {
    ContractTerms {
        underlying: inst.underlying_symbol.clone(),
        expiry: inst.expiry_date,
        strike: inst.strike_price,
        put_call: inst.option_type.as_ref().and_then(|t| t.put_call()),
        multiplier: inst.multiplier,
    }
}

/// Terms decoded from text like "AAPL 28MAR25 222.5 C".
pub fn terms_from_symbol(symbol: &str) -> Option<ContractTerms> {
    let normalized = normalize_symbol(symbol);
    let caps = OPTION_SYMBOL.captures(&normalized)?;

    let day: u32 = caps[2].parse().ok()?;
    let month = MONTHS
        .iter()
        .position(|m| m.eq_ignore_ascii_case(&caps[3]))? as u32
        + 1;
    let year: i32 = 2000 + caps[4].parse::<i32>().ok()?;

    Some(ContractTerms {
        underlying: Some(caps[1].to_string()),
        expiry: NaiveDate::from_ymd_opt(year, month, day),
        strike: caps[5].parse().ok(),
        put_call: match caps[6].to_ascii_uppercase().as_str() {
            "C" => Some(PutCall::Call),
            _ => Some(PutCall::Put),
        },
        multiplier: None,
    })
}

/// Resolves the contract traded under `symbol`, or `None` when neither
/// strategy identifies it.
pub fn resolve_contract(
    symbol: &str,
    table: &InstrumentTable<'_>,
    default_multiplier: f64,
) -> Option<Contract> {
    let reference = table.lookup(symbol).map(terms_from_reference);
    let decoded = terms_from_symbol(symbol);

    let terms = match (reference, decoded) {
        (Some(r), Some(d)) => r.or(d),
        (Some(r), None) => r,
        (None, Some(d)) => d,
        (None, None) => return None,
    };
    terms.complete(default_multiplier)
}

pub(crate) struct LinkOptions<'a> {
    pub option_categories: &'a [String],
    pub default_multiplier: f64,
    pub pnl_tolerance: f64,
}

pub(crate) fn is_option_category(category: &str, option_categories: &[String]) -> bool {
    option_categories
        .iter()
        .any(|c| c.eq_ignore_ascii_case(category.trim()))
        || category.to_lowercase().contains("option")
}

/// Derives option trades from the option-category trades.
///
/// Trades sharing a symbol are walked chronologically. A trade reduces the
/// earliest still-open option trades of the opposite sign until its quantity
/// is used up; whatever is left opens a new option trade.
pub(crate) fn link_option_trades(
    trades: &[Located<Trade>],
    instruments: &[InstrumentInfo],
    opts: &LinkOptions<'_>,
    diags: &mut Diagnostics,
) -> Vec<OptionTrade> {
    let table = InstrumentTable::build(instruments);

    let mut order: Vec<String> = Vec::new();
    let mut groups: HashMap<String, (Contract, Vec<&Located<Trade>>)> = HashMap::new();

    for located in trades {
        let trade = &located.record;
        if !is_option_category(&trade.asset_category, opts.option_categories) {
            continue;
        }

        let symbol = normalize_symbol(&trade.symbol);
        if let Some((_, legs)) = groups.get_mut(&symbol) {
            legs.push(located);
            continue;
        }

        match resolve_contract(&symbol, &table, opts.default_multiplier) {
            Some(contract) => {
                order.push(symbol.clone());
                groups.insert(symbol, (contract, vec![located]));
            }
            None => diags.row(
                located.line,
                TRADES,
                Issue::UnresolvedOption {
                    symbol: trade.symbol.clone(),
                },
            ),
        }
    }

    let mut option_trades = Vec::new();
    for symbol in order {
        let Some((contract, mut legs)) = groups.remove(&symbol) else {
            continue;
        };
        legs.sort_by_key(|l| (l.record.date_time.is_none(), l.record.date_time));
        pair_legs(&symbol, &contract, &legs, opts, diags, &mut option_trades);
    }

    tracing::debug!(count = option_trades.len(), "Linked option trades");
    option_trades
}

const QTY_EPSILON: f64 = 1e-9;

/// Running totals of an option trade that still has open contracts.
struct OpenPosition<'a> {
    index: usize,
    opening: &'a Trade,
    /// Unsigned contracts not yet closed.
    remaining: f64,
    /// Share of the opening commission carried by this position.
    open_commission: f64,
    reported: Option<f64>,
    computed: Option<f64>,
    priced: bool,
    close_notional: f64,
    close_priced_qty: f64,
}

impl OpenPosition<'_> {
    fn realized(&self) -> Option<f64> {
        self.reported.or(if self.priced { self.computed } else { None })
    }
}

fn pair_legs(
    symbol: &str,
    contract: &Contract,
    legs: &[&Located<Trade>],
    opts: &LinkOptions<'_>,
    diags: &mut Diagnostics,
    out: &mut Vec<OptionTrade>,
) {
    let mut open: Vec<OpenPosition<'_>> = Vec::new();

    for located in legs {
        let trade = &located.record;
        let qty = match trade.quantity {
            Some(q) if q != 0.0 => q,
            _ => {
                diags.row(
                    located.line,
                    TRADES,
                    Issue::UnmatchedQuantity {
                        symbol: symbol.to_string(),
                    },
                );
                continue;
            }
        };

        let mut left = qty.abs();
        while left > QTY_EPSILON {
            let Some(pos) = open
                .iter()
                .position(|p| p.opening.quantity.is_some_and(|oq| oq.signum() != qty.signum()))
            else {
                break;
            };

            let position = &mut open[pos];
            let matched = left.min(position.remaining);
            let idx = position.index;
            close_portion(position, trade, qty, matched, contract, &mut out[idx]);
            left -= matched;

            if position.remaining <= QTY_EPSILON {
                let position = open.remove(pos);
                check_pnl(symbol, &position, opts, located.line, diags);
            }
        }

        if left > QTY_EPSILON {
            let share = left / qty.abs();
            out.push(OptionTrade {
                symbol: symbol.to_string(),
                underlying_symbol: contract.underlying.clone(),
                expiry_date: contract.expiry,
                strike_price: contract.strike,
                put_call: contract.put_call,
                open_date: trade.date_time.map(|dt| dt.date),
                close_date: None,
                quantity: left.copysign(qty),
                closed_quantity: 0.0,
                premium: trade.trade_price,
                close_premium: None,
                multiplier: contract.multiplier,
                realized_pnl: trade.realized_pnl.map(|p| p * share),
                open_trade_id: trade.trade_id.clone(),
                close_trade_id: None,
            });
            open.push(OpenPosition {
                index: out.len() - 1,
                opening: trade,
                remaining: left,
                open_commission: trade.commission_or_fee.unwrap_or(0.0) * share,
                reported: trade.realized_pnl.map(|p| p * share),
                computed: None,
                priced: true,
                close_notional: 0.0,
                close_priced_qty: 0.0,
            });
        }
    }
}

/// Applies `matched` contracts of the closing `trade` (signed quantity
/// `qty`) to `position` and refreshes the option trade it feeds.
fn close_portion(
    position: &mut OpenPosition<'_>,
    trade: &Trade,
    qty: f64,
    matched: f64,
    contract: &Contract,
    ot: &mut OptionTrade,
) {
    let close_share = matched / qty.abs();
    let open_share = matched / ot.quantity.abs();

    if let Some(pnl) = trade.realized_pnl {
        position.reported = Some(position.reported.unwrap_or(0.0) + pnl * close_share);
    }

    match (position.opening.trade_price, trade.trade_price) {
        (Some(open_px), Some(close_px)) => {
            let direction = ot.quantity.signum();
            let portion = (close_px - open_px) * matched * direction * contract.multiplier
                + position.open_commission * open_share
                + trade.commission_or_fee.unwrap_or(0.0) * close_share;
            position.computed = Some(position.computed.unwrap_or(0.0) + portion);
            position.close_notional += close_px * matched;
            position.close_priced_qty += matched;
        }
        _ => position.priced = false,
    }

    position.remaining -= matched;
    ot.closed_quantity += matched;
    ot.close_date = trade.date_time.map(|dt| dt.date);
    ot.close_trade_id = Some(trade.trade_id.clone());
    if position.close_priced_qty > 0.0 {
        ot.close_premium = Some(position.close_notional / position.close_priced_qty);
    }
    ot.realized_pnl = position.realized();
}

/// Notes a fully closed position whose reported realized P&L disagrees
/// with the one computed from premiums and commissions.
fn check_pnl(
    symbol: &str,
    position: &OpenPosition<'_>,
    opts: &LinkOptions<'_>,
    line: u64,
    diags: &mut Diagnostics,
) {
    if !position.priced {
        return;
    }
    if let (Some(reported), Some(computed)) = (position.reported, position.computed) {
        if (reported - computed).abs() > opts.pnl_tolerance {
            diags.row(
                line,
                TRADES,
                Issue::RealizedPnlMismatch {
                    symbol: symbol.to_string(),
                    reported,
                    computed,
                },
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use models::{OptionType, TradeDateTime, TradeDiscriminator};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn trade(id: &str, symbol: &str, day: u32, qty: f64, price: f64) -> Located<Trade> {
        Located {
            line: day as u64,
            record: Trade {
                trade_id: id.to_string(),
                discriminator: TradeDiscriminator::Order,
                asset_category: "Equity and Index Options".to_string(),
                currency: "USD".to_string(),
                account: None,
                symbol: symbol.to_string(),
                date_time: Some(TradeDateTime::new(date(2025, 3, day), None)),
                quantity: Some(qty),
                trade_price: Some(price),
                close_price: None,
                proceeds: None,
                commission_or_fee: None,
                basis: None,
                realized_pnl: None,
                mark_to_market_pnl: None,
                code: None,
            },
        }
    }

    fn instrument(symbol: &str, strike: f64, expiry: NaiveDate, t: OptionType) -> InstrumentInfo {
        InstrumentInfo {
            asset_category: "Equity and Index Options".to_string(),
            symbol: symbol.to_string(),
            description: None,
            contract_id: None,
            underlying_symbol: Some("AAPL".to_string()),
            listing_exchange: None,
            multiplier: Some(100.0),
            expiry_date: Some(expiry),
            delivery_month: None,
            option_type: Some(t),
            strike_price: Some(strike),
            code: None,
        }
    }

    fn options() -> (Vec<String>, f64, f64) {
        (vec!["Equity and Index Options".to_string()], 100.0, 0.01)
    }

    fn link(trades: &[Located<Trade>], instruments: &[InstrumentInfo]) -> (Vec<OptionTrade>, Vec<crate::Diagnostic>) {
        let (cats, mult, tol) = options();
        let opts = LinkOptions {
            option_categories: &cats,
            default_multiplier: mult,
            pnl_tolerance: tol,
        };
        let mut diags = Diagnostics::new();
        let out = link_option_trades(trades, instruments, &opts, &mut diags);
        (out, diags.into_vec())
    }

    #[test]
    fn test_terms_from_symbol() {
        let terms = terms_from_symbol("AAPL 28MAR25 222.5 C").unwrap();
        assert_eq!(terms.underlying.as_deref(), Some("AAPL"));
        assert_eq!(terms.expiry, Some(date(2025, 3, 28)));
        assert_eq!(terms.strike, Some(222.5));
        assert_eq!(terms.put_call, Some(PutCall::Call));

        let padded = terms_from_symbol("  SPY   31MAR25  570 P ").unwrap();
        assert_eq!(padded.put_call, Some(PutCall::Put));
        assert_eq!(padded.strike, Some(570.0));

        assert!(terms_from_symbol("AAPL").is_none());
        assert!(terms_from_symbol("AAPL 28XYZ25 222.5 C").is_none());
    }

    #[test]
    fn test_reference_takes_precedence_over_decode() {
        let insts = vec![instrument("AAPL  28MAR25 222.5 C", 225.0, date(2025, 4, 4), OptionType::Put)];
        let table = InstrumentTable::build(&insts);

        let c = resolve_contract("AAPL 28MAR25 222.5 C", &table, 100.0).unwrap();
        assert_eq!(c.strike, 225.0);
        assert_eq!(c.expiry, date(2025, 4, 4));
        assert_eq!(c.put_call, PutCall::Put);
    }

    #[test]
    fn test_decode_fills_gaps_in_reference() {
        let mut inst = instrument("AAPL 28MAR25 222.5 C", 0.0, date(2025, 3, 28), OptionType::Call);
        inst.strike_price = None;
        inst.multiplier = None;
        let insts = vec![inst];
        let table = InstrumentTable::build(&insts);

        let c = resolve_contract("AAPL 28MAR25 222.5 C", &table, 100.0).unwrap();
        assert_eq!(c.strike, 222.5);
        assert_eq!(c.multiplier, 100.0);
    }

    #[test]
    fn test_open_and_close_legs_pair() {
        let mut close = trade("T2", "AAPL 28MAR25 222.5 C", 25, -1.0, 2.23);
        close.record.realized_pnl = Some(101.0);
        let trades = vec![close, trade("T1", "AAPL 28MAR25 222.5 C", 20, 1.0, 1.22)];

        let (out, diags) = link(&trades, &[]);
        assert_eq!(out.len(), 1);
        let ot = &out[0];
        assert_eq!(ot.underlying_symbol, "AAPL");
        assert_eq!(ot.premium, Some(1.22));
        assert_eq!(ot.close_premium, Some(2.23));
        assert_eq!(ot.open_date, Some(date(2025, 3, 20)));
        assert_eq!(ot.close_date, Some(date(2025, 3, 25)));
        assert_eq!(ot.open_trade_id, "T1");
        assert_eq!(ot.close_trade_id.as_deref(), Some("T2"));
        assert_eq!(ot.realized_pnl, Some(101.0));
        assert!(diags.is_empty());
    }

    #[test]
    fn test_pnl_computed_when_not_reported() {
        let trades = vec![
            trade("T1", "SPY 31MAR25 570 C", 10, 2.0, 1.0),
            trade("T2", "SPY 31MAR25 570 C", 12, -2.0, 1.5),
        ];
        let (out, _) = link(&trades, &[]);
        let pnl = out[0].realized_pnl.unwrap();
        assert!((pnl - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_pnl_mismatch_is_noted() {
        let mut close = trade("T2", "SPY 31MAR25 570 C", 12, -1.0, 1.5);
        close.record.realized_pnl = Some(10.0);
        let trades = vec![trade("T1", "SPY 31MAR25 570 C", 10, 1.0, 1.0), close];

        let (out, diags) = link(&trades, &[]);
        assert_eq!(out[0].realized_pnl, Some(10.0));
        assert!(matches!(diags[0].issue, Issue::RealizedPnlMismatch { .. }));
    }

    #[test]
    fn test_short_open_and_reopen() {
        let trades = vec![
            trade("T1", "SPY 31MAR25 570 P", 10, -1.0, 3.0),
            trade("T2", "SPY 31MAR25 570 P", 11, 1.0, 1.0),
            trade("T3", "SPY 31MAR25 570 P", 12, 1.0, 0.9),
        ];
        let (out, _) = link(&trades, &[]);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].quantity, -1.0);
        assert!(out[0].is_closed());
        assert_eq!(out[1].open_trade_id, "T3");
        assert!(!out[1].is_closed());
    }

    #[test]
    fn test_partial_closes_reduce_one_position() {
        let trades = vec![
            trade("T1", "SPY 31MAR25 570 C", 10, 2.0, 1.0),
            trade("T2", "SPY 31MAR25 570 C", 11, -1.0, 1.5),
            trade("T3", "SPY 31MAR25 570 C", 12, -1.0, 1.5),
        ];

        let (out, diags) = link(&trades[..2], &[]);
        assert_eq!(out.len(), 1);
        assert!(!out[0].is_closed());
        assert_eq!(out[0].open_quantity(), 1.0);
        assert!((out[0].realized_pnl.unwrap() - 50.0).abs() < 1e-9);
        assert!(diags.is_empty());

        let (out, diags) = link(&trades, &[]);
        assert_eq!(out.len(), 1);
        let ot = &out[0];
        assert_eq!(ot.quantity, 2.0);
        assert_eq!(ot.closed_quantity, 2.0);
        assert!(ot.is_closed());
        assert_eq!(ot.close_premium, Some(1.5));
        assert_eq!(ot.close_trade_id.as_deref(), Some("T3"));
        assert_eq!(ot.close_date, Some(date(2025, 3, 12)));
        assert!((ot.realized_pnl.unwrap() - 100.0).abs() < 1e-9);
        assert!(diags.is_empty());
    }

    #[test]
    fn test_partial_close_splits_reported_pnl() {
        let mut close = trade("T3", "SPY 31MAR25 570 C", 12, -2.0, 1.5);
        close.record.realized_pnl = Some(100.0);
        let trades = vec![
            trade("T1", "SPY 31MAR25 570 C", 10, 1.0, 1.0),
            trade("T2", "SPY 31MAR25 570 C", 11, 1.0, 1.0),
            close,
        ];

        let (out, diags) = link(&trades, &[]);
        assert_eq!(out.len(), 2);
        for ot in &out {
            assert!(ot.is_closed());
            assert_eq!(ot.close_trade_id.as_deref(), Some("T3"));
            assert!((ot.realized_pnl.unwrap() - 50.0).abs() < 1e-9);
        }
        assert!(diags.is_empty());
    }

    #[test]
    fn test_oversized_close_opens_the_remainder() {
        let trades = vec![
            trade("T1", "SPY 31MAR25 570 P", 10, 1.0, 2.0),
            trade("T2", "SPY 31MAR25 570 P", 11, -3.0, 2.5),
        ];

        let (out, _) = link(&trades, &[]);
        assert_eq!(out.len(), 2);
        assert!(out[0].is_closed());
        assert!((out[0].realized_pnl.unwrap() - 50.0).abs() < 1e-9);
        assert_eq!(out[1].quantity, -2.0);
        assert_eq!(out[1].open_trade_id, "T2");
        assert_eq!(out[1].premium, Some(2.5));
        assert!(!out[1].is_closed());
    }

    #[test]
    fn test_unresolvable_and_non_option_trades() {
        let mut stock = trade("S1", "AAPL", 10, 10.0, 220.0);
        stock.record.asset_category = "Stocks".to_string();
        let trades = vec![stock, trade("X1", "WEIRD-OPTION", 10, 1.0, 1.0)];

        let (out, diags) = link(&trades, &[]);
        assert!(out.is_empty());
        assert_eq!(diags.len(), 1);
        assert_eq!(
            diags[0].issue,
            Issue::UnresolvedOption {
                symbol: "WEIRD-OPTION".to_string()
            }
        );
    }

    #[test]
    fn test_is_option_category() {
        let cats = vec!["Equity and Index Options".to_string()];
        assert!(is_option_category("Equity and Index Options", &cats));
        assert!(is_option_category("Options On Futures", &cats));
        assert!(!is_option_category("Stocks", &cats));
    }
}
