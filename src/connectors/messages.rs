// src/connectors/messages.rs
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Стандартный конверт ответа OKX v5: {"code": "...", "msg": "...", "data": [...]}.
/// `code == "0"` — единственный признак успеха; HTTP-статус у OKX почти всегда 200.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub msg: String,
    #[serde(default)]
    pub data: Vec<serde_json::Value>,
}

impl Envelope {
    pub fn is_success(&self) -> bool {
        self.code == "0"
    }

    /// Typed view of `data[0]`, if present and well-formed.
    pub fn first<T: DeserializeOwned>(&self) -> Option<T> {
        self.data
            .first()
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Typed iteration over every `data[]` entry, skipping malformed ones.
    pub fn entries<T: DeserializeOwned>(&self) -> impl Iterator<Item = T> + '_ {
        self.data
            .iter()
            .filter_map(|v| serde_json::from_value(v.clone()).ok())
    }
}

/// Подтверждение приёма ордера из /api/v5/trade/order.
/// OKX шлёт пустые строки вместо отсутствующих id.
#[derive(Debug, Deserialize)]
pub struct OrderAck {
    #[serde(rename = "ordId", default)]
    pub ord_id: Option<String>,
    #[serde(rename = "clOrdId", default)]
    pub cl_ord_id: Option<String>,
    #[serde(rename = "sCode", default)]
    pub s_code: Option<String>,
    #[serde(rename = "sMsg", default)]
    pub s_msg: Option<String>,
}

impl OrderAck {
    pub fn ids(&self) -> crate::types::OrderIds {
        crate::types::OrderIds {
            ord_id: non_empty(&self.ord_id),
            cl_ord_id: non_empty(&self.cl_ord_id),
        }
    }
}

/// Детали ордера из GET /api/v5/trade/order.
/// Числа приходят строками; до исполнения avgPx бывает пустым ("").
#[derive(Debug, Default, Deserialize)]
pub struct OrderDetail {
    #[serde(rename = "fillSz", default)]
    fill_sz: Option<String>,
    #[serde(rename = "accFillSz", default)]
    acc_fill_sz: Option<String>,
    #[serde(rename = "avgPx", default)]
    avg_px: Option<String>,
    #[serde(default)]
    state: Option<String>,
}

impl OrderDetail {
    /// Filled size: `fillSz` first, then `accFillSz`. Missing or blank means zero.
    pub fn filled(&self) -> Decimal {
        parse_decimal(&self.fill_sz)
            .or_else(|| parse_decimal(&self.acc_fill_sz))
            .unwrap_or(Decimal::ZERO)
    }

    /// Average fill price. Blank or zero means the exchange reported no fill yet.
    pub fn average_price(&self) -> Option<Decimal> {
        parse_decimal(&self.avg_px).filter(|p| *p > Decimal::ZERO)
    }

    pub fn state(&self) -> Option<String> {
        self.state.clone()
    }
}

/// Тикер из GET /api/v5/market/ticker.
#[derive(Debug, Deserialize)]
pub struct Ticker {
    #[serde(rename = "instId", default)]
    pub inst_id: Option<String>,
    #[serde(rename = "last", default)]
    last: Option<String>,
}

impl Ticker {
    pub fn last_price(&self) -> Option<Decimal> {
        parse_decimal(&self.last).filter(|p| *p > Decimal::ZERO)
    }
}

/// Один аккаунт из GET /api/v5/account/balance (трейдинговый счёт).
#[derive(Debug, Default, Deserialize)]
pub struct AccountBalance {
    #[serde(default)]
    pub details: Vec<BalanceDetail>,
}

#[derive(Debug, Deserialize)]
pub struct BalanceDetail {
    #[serde(default)]
    pub ccy: String,
    #[serde(rename = "availBal", default)]
    avail_bal: Option<String>,
    #[serde(rename = "cashBal", default)]
    cash_bal: Option<String>,
}

impl BalanceDetail {
    /// Доступный остаток: availBal, затем cashBal, иначе ноль.
    pub fn available(&self) -> Decimal {
        parse_decimal(&self.avail_bal)
            .or_else(|| parse_decimal(&self.cash_bal))
            .unwrap_or(Decimal::ZERO)
    }
}

/// Одна валюта из GET /api/v5/asset/balances (funding-счёт).
#[derive(Debug, Deserialize)]
pub struct AssetBalance {
    #[serde(default)]
    pub ccy: String,
    #[serde(rename = "availBal", default)]
    avail_bal: Option<String>,
}

impl AssetBalance {
    pub fn available(&self) -> Decimal {
        parse_decimal(&self.avail_bal).unwrap_or(Decimal::ZERO)
    }
}

/// Метаданные инструмента из GET /api/v5/public/instruments.
#[derive(Debug, Deserialize)]
pub struct Instrument {
    #[serde(rename = "minSz", default)]
    min_sz: Option<String>,
    #[serde(rename = "lotSz", default)]
    lot_sz: Option<String>,
}

impl Instrument {
    pub fn min_size(&self) -> Option<Decimal> {
        parse_decimal(&self.min_sz)
    }

    /// Precision as decimal places of the lot size: "0.000001" -> 6, "1" -> 0.
    pub fn amount_precision(&self) -> Option<u32> {
        parse_decimal(&self.lot_sz).map(|lot| lot.normalize().scale())
    }
}

/// Серверное время из GET /api/v5/public/time (миллисекунды строкой).
#[derive(Debug, Deserialize)]
pub struct ServerTime {
    pub ts: String,
}

fn non_empty(field: &Option<String>) -> Option<String> {
    field.as_deref().filter(|s| !s.is_empty()).map(str::to_string)
}

fn parse_decimal(field: &Option<String>) -> Option<Decimal> {
    field
        .as_deref()
        .filter(|s| !s.is_empty())
        .and_then(|s| s.parse::<Decimal>().ok())
}
