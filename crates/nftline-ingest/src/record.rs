//! Wire record → storage row mapping
//!
//! The scheduler only ever looks at `updatedAt` (via [`updated_at_of`]);
//! everything else is projected into typed rows for the sink.

use chrono::{DateTime, Utc};
use nftline_queue::Dataset;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    #[error("record has no id")]
    MissingId,
    #[error("record {0} has no valid updatedAt")]
    MissingUpdatedAt(String),
    #[error("unexpected record shape: {0}")]
    Shape(#[from] serde_json::Error),
}

/// `updatedAt` of a raw wire record
pub fn updated_at_of(value: &Value) -> Option<DateTime<Utc>> {
    let raw = value.get("updatedAt")?.as_str()?;
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Primary key of a raw wire record
pub fn id_of(dataset: Dataset, value: &Value) -> Option<&str> {
    let key = match dataset {
        Dataset::Sales => value
            .get("saleId")
            .and_then(Value::as_str)
            .or_else(|| value.get("id").and_then(Value::as_str)),
        Dataset::Asks | Dataset::Bids => value.get("id").and_then(Value::as_str),
    };
    key.filter(|id| !id.is_empty())
}

/// One parsed record ready for upsert
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    pub dataset: Dataset,
    pub updated_at: DateTime<Utc>,
    pub row: Row,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "row", rename_all = "snake_case")]
pub enum Row {
    Sale(SaleRow),
    Order(OrderRow),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SaleRow {
    pub tx_hash: Option<String>,
    pub log_index: Option<i64>,
    pub batch_index: Option<i64>,
    pub block: Option<i64>,
    pub timestamp: Option<i64>,
    pub contract: Option<String>,
    pub token_id: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub amount: Option<String>,
    pub order_side: Option<String>,
    pub order_kind: Option<String>,
    pub source: Option<String>,
    pub currency: Option<String>,
    pub price_decimal: Option<f64>,
    pub price_native: Option<f64>,
    pub price_usd: Option<f64>,
    pub wash_trading_score: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrderRow {
    pub kind: Option<String>,
    pub side: Option<String>,
    pub status: Option<String>,
    pub token_set_id: Option<String>,
    pub contract: Option<String>,
    pub maker: Option<String>,
    pub taker: Option<String>,
    pub currency: Option<String>,
    pub price_decimal: Option<f64>,
    pub price_native: Option<f64>,
    pub price_usd: Option<f64>,
    pub quantity_filled: Option<i64>,
    pub quantity_remaining: Option<i64>,
    pub valid_from: Option<i64>,
    pub valid_until: Option<i64>,
    pub source: Option<String>,
    pub criteria_kind: Option<String>,
}

// Wire shapes. Only the fields we project; unknown fields are ignored.

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct WireToken {
    contract: Option<String>,
    token_id: Option<String>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct WireAmount {
    decimal: Option<f64>,
    usd: Option<f64>,
    native: Option<f64>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct WireCurrency {
    symbol: Option<String>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct WirePrice {
    currency: Option<WireCurrency>,
    amount: Option<WireAmount>,
}

impl WirePrice {
    fn split(self) -> (Option<String>, Option<f64>, Option<f64>, Option<f64>) {
        let currency = self.currency.and_then(|c| c.symbol);
        let amount = self.amount.unwrap_or_default();
        (currency, amount.decimal, amount.native, amount.usd)
    }
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct WireSale {
    tx_hash: Option<String>,
    log_index: Option<i64>,
    batch_index: Option<i64>,
    block: Option<i64>,
    timestamp: Option<i64>,
    token: Option<WireToken>,
    from: Option<String>,
    to: Option<String>,
    amount: Option<String>,
    order_side: Option<String>,
    order_kind: Option<String>,
    fill_source: Option<String>,
    order_source: Option<String>,
    price: Option<WirePrice>,
    wash_trading_score: Option<f64>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct WireSource {
    domain: Option<String>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct WireCriteria {
    kind: Option<String>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct WireOrder {
    kind: Option<String>,
    side: Option<String>,
    status: Option<String>,
    token_set_id: Option<String>,
    contract: Option<String>,
    maker: Option<String>,
    taker: Option<String>,
    price: Option<WirePrice>,
    quantity_filled: Option<i64>,
    quantity_remaining: Option<i64>,
    valid_from: Option<i64>,
    valid_until: Option<i64>,
    source: Option<WireSource>,
    criteria: Option<WireCriteria>,
}

impl From<WireSale> for SaleRow {
    fn from(w: WireSale) -> Self {
        let token = w.token.unwrap_or_default();
        let (currency, price_decimal, price_native, price_usd) =
            w.price.unwrap_or_default().split();
        Self {
            tx_hash: w.tx_hash,
            log_index: w.log_index,
            batch_index: w.batch_index,
            block: w.block,
            timestamp: w.timestamp,
            contract: token.contract,
            token_id: token.token_id,
            from: w.from,
            to: w.to,
            amount: w.amount,
            order_side: w.order_side,
            order_kind: w.order_kind,
            source: w.fill_source.or(w.order_source),
            currency,
            price_decimal,
            price_native,
            price_usd,
            wash_trading_score: w.wash_trading_score,
        }
    }
}

impl From<WireOrder> for OrderRow {
    fn from(w: WireOrder) -> Self {
        let (currency, price_decimal, price_native, price_usd) =
            w.price.unwrap_or_default().split();
        Self {
            kind: w.kind,
            side: w.side,
            status: w.status,
            token_set_id: w.token_set_id,
            contract: w.contract,
            maker: w.maker,
            taker: w.taker,
            currency,
            price_decimal,
            price_native,
            price_usd,
            quantity_filled: w.quantity_filled,
            quantity_remaining: w.quantity_remaining,
            valid_from: w.valid_from,
            valid_until: w.valid_until,
            source: w.source.and_then(|s| s.domain),
            criteria_kind: w.criteria.and_then(|c| c.kind),
        }
    }
}

impl Record {
    /// Map one wire record to its storage row
    pub fn parse(dataset: Dataset, value: &Value) -> Result<Self, RecordError> {
        let id = id_of(dataset, value).ok_or(RecordError::MissingId)?.to_string();
        let updated_at =
            updated_at_of(value).ok_or_else(|| RecordError::MissingUpdatedAt(id.clone()))?;
        let row = match dataset {
            Dataset::Sales => Row::Sale(serde_json::from_value::<WireSale>(value.clone())?.into()),
            Dataset::Asks | Dataset::Bids => {
                Row::Order(serde_json::from_value::<WireOrder>(value.clone())?.into())
            }
        };
        Ok(Self {
            id,
            dataset,
            updated_at,
            row,
        })
    }

    /// Parse a page, dropping (and logging) records that cannot be mapped
    pub fn parse_page(dataset: Dataset, values: &[Value]) -> Vec<Self> {
        values
            .iter()
            .filter_map(|v| match Self::parse(dataset, v) {
                Ok(record) => Some(record),
                Err(e) => {
                    log::warn!("{dataset}: dropping record: {e}");
                    None
                }
            })
            .collect()
    }
}
