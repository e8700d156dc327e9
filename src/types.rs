// src/types.rs
use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// Строчное значение для тела ордера OKX.
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "buy",
            Side::Sell => "sell",
        }
    }
}

/// Identifiers the exchange hands back when it accepts an order.
/// Either side may be missing; an order is addressable as long as one is set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrderIds {
    pub ord_id: Option<String>,
    pub cl_ord_id: Option<String>,
}

impl OrderIds {
    pub fn is_empty(&self) -> bool {
        self.ord_id.is_none() && self.cl_ord_id.is_none()
    }
}

/// Snapshot of an order taken while polling for fills.
#[derive(Debug, Clone, Default)]
pub struct OrderStatus {
    pub filled: Decimal,
    pub avg_price: Option<Decimal>,
    pub state: Option<String>,
}

impl OrderStatus {
    /// The order will never fill further: the exchange marked it done or cancelled.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.state.as_deref().map(str::to_ascii_lowercase).as_deref(),
            Some("filled") | Some("canceled") | Some("cancelled")
        )
    }
}

/// Which execution path produced an outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionPath {
    Primary,
    Fallback,
}

/// Final result of one buy/sell attempt, whichever path served it.
/// `filled == 0` means the cycle produced no confirmed fill.
#[derive(Debug, Clone)]
pub struct OrderOutcome {
    pub filled: Decimal,
    pub average_price: Option<Decimal>,
    pub ids: OrderIds,
    pub raw_state: Option<String>,
    pub path: ExecutionPath,
}

impl OrderOutcome {
    pub fn unconfirmed(path: ExecutionPath) -> Self {
        Self {
            filled: Decimal::ZERO,
            average_price: None,
            ids: OrderIds::default(),
            raw_state: None,
            path,
        }
    }

    pub fn confirmed(&self) -> bool {
        self.filled > Decimal::ZERO
    }
}

/// What the fallback broker reports back after submitting an order.
/// Market acks usually carry ids but no fill yet; the caller re-polls.
#[derive(Debug, Clone, Default)]
pub struct FallbackFill {
    pub filled: Decimal,
    pub average_price: Option<Decimal>,
    pub ids: OrderIds,
}

impl FallbackFill {
    pub fn none() -> Self {
        Self::default()
    }
}

/// Открытая позиция, как она лежит на диске между рестартами.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionRecord {
    pub price: Decimal,
    pub amount: Decimal,
    pub ts: f64,
}

impl PositionRecord {
    pub fn new(price: Decimal, amount: Decimal) -> Self {
        Self {
            price,
            amount,
            ts: Utc::now().timestamp_millis() as f64 / 1000.0,
        }
    }
}
