
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use std::fmt;

// Settings models
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParserSettings {
	/// Single ASCII character; "\t" for tab-delimited exports.
	pub delimiter: String,
	pub default_option_multiplier: f64,
	pub pnl_tolerance: f64,
	pub option_categories: Vec<String>,
}

impl Default for ParserSettings {
	fn default() -> Self {
		Self {
			delimiter: ",".to_string(),
			default_option_multiplier: 100.0,
			pnl_tolerance: 0.01,
			option_categories: vec![
				"Equity and Index Options".to_string(),
				"Options On Futures".to_string(),
			],
		}
	}
}

// Statement records
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Account {
	pub account_id: String,
	pub account_name: String,
	pub account_type: String,
	pub base_currency: String,
	pub balance: Option<f64>,
}

impl Account {
	/// Stand-in used when the statement has no Account Information section.
	pub fn placeholder() -> Self {
		Self {
			balance: Some(0.0),
			..Self::default()
		}
	}

	pub fn is_placeholder(&self) -> bool {
		self.account_id.is_empty() && self.account_name.is_empty()
	}
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatementInfo {
	pub broker_name: Option<String>,
	pub title: Option<String>,
	pub period_start: Option<NaiveDate>,
	pub period_end: Option<NaiveDate>,
	pub generated_at: Option<NaiveDateTime>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NavEntry {
	pub asset_class: String,
	pub prior_total: Option<f64>,
	pub current_long: Option<f64>,
	pub current_short: Option<f64>,
	pub current_total: Option<f64>,
	pub change: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
	pub symbol: String,
	pub asset_category: String,
	pub currency: String,
	pub quantity: Option<f64>,
	pub multiplier: Option<f64>,
	pub cost_price: Option<f64>,
	pub cost_basis: Option<f64>,
	pub close_price: Option<f64>,
	pub value: Option<f64>,
	pub unrealized_pnl: Option<f64>,
	pub code: Option<String>,
}

/// Row-kind discriminator carried by a materialized trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeDiscriminator {
	Order,
	SubTotal,
	Total,
}

/// Execution timestamp; statements sometimes omit the time of day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TradeDateTime {
	pub date: NaiveDate,
	pub time: Option<NaiveTime>,
}

impl TradeDateTime {
	pub fn new(date: NaiveDate, time: Option<NaiveTime>) -> Self {
		Self { date, time }
	}
}

impl fmt::Display for TradeDateTime {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self.time {
			Some(time) => write!(f, "{}, {}", self.date.format("%Y-%m-%d"), time.format("%H:%M:%S")),
			None => write!(f, "{}", self.date.format("%Y-%m-%d")),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
	pub trade_id: String,
	pub discriminator: TradeDiscriminator,
	pub asset_category: String,
	pub currency: String,
	pub account: Option<String>,
	pub symbol: String,
	pub date_time: Option<TradeDateTime>,
	/// Positive for buy/open, negative for sell/close.
	pub quantity: Option<f64>,
	pub trade_price: Option<f64>,
	pub close_price: Option<f64>,
	pub proceeds: Option<f64>,
	pub commission_or_fee: Option<f64>,
	pub basis: Option<f64>,
	pub realized_pnl: Option<f64>,
	pub mark_to_market_pnl: Option<f64>,
	pub code: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OptionType {
	Call,
	Put,
	Other(String),
}

impl OptionType {
	pub fn parse(raw: &str) -> Option<Self> {
		let t = raw.trim();
		if t.is_empty() {
			return None;
		}
		Some(match t.to_ascii_uppercase().as_str() {
			"C" | "CALL" => OptionType::Call,
			"P" | "PUT" => OptionType::Put,
			_ => OptionType::Other(t.to_string()),
		})
	}

	pub fn put_call(&self) -> Option<PutCall> {
		match self {
			OptionType::Call => Some(PutCall::Call),
			OptionType::Put => Some(PutCall::Put),
			OptionType::Other(_) => None,
		}
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentInfo {
	pub asset_category: String,
	/// As printed in the statement, padding included.
	pub symbol: String,
	pub description: Option<String>,
	pub contract_id: Option<String>,
	pub underlying_symbol: Option<String>,
	pub listing_exchange: Option<String>,
	pub multiplier: Option<f64>,
	pub expiry_date: Option<NaiveDate>,
	pub delivery_month: Option<String>,
	pub option_type: Option<OptionType>,
	pub strike_price: Option<f64>,
	pub code: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PutCall {
	Put,
	Call,
}

impl fmt::Display for PutCall {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			PutCall::Put => write!(f, "P"),
			PutCall::Call => write!(f, "C"),
		}
	}
}

/// An option position reconstructed from one opening trade and the closing
/// trades that reduce it. `closed_quantity` is unsigned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionTrade {
	pub symbol: String,
	pub underlying_symbol: String,
	pub expiry_date: NaiveDate,
	pub strike_price: f64,
	pub put_call: PutCall,
	pub open_date: Option<NaiveDate>,
	pub close_date: Option<NaiveDate>,
	pub quantity: f64,
	#[serde(default)]
	pub closed_quantity: f64,
	pub premium: Option<f64>,
	pub close_premium: Option<f64>,
	pub multiplier: f64,
	pub realized_pnl: Option<f64>,
	pub open_trade_id: String,
	pub close_trade_id: Option<String>,
}

impl OptionTrade {
	/// Contracts still open, unsigned.
	pub fn open_quantity(&self) -> f64 {
		(self.quantity.abs() - self.closed_quantity).max(0.0)
	}

	pub fn is_closed(&self) -> bool {
		self.close_trade_id.is_some() && self.open_quantity() < 1e-9
	}
}
