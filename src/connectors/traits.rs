use crate::types::{FallbackFill, OrderIds, OrderStatus};
use anyhow::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;

/// Primary exchange surface: signed OKX REST for one spot instrument.
#[async_trait]
pub trait ExchangeApi: Send + Sync {
    /// Last traded price of the configured instrument.
    async fn last_price(&self) -> Result<Decimal>;

    /// Available quote-currency balance. Implementations report zero rather
    /// than failing when the account endpoints are unreadable.
    async fn quote_balance(&self) -> Result<Decimal>;

    /// Available base-currency balance, same conventions as `quote_balance`.
    async fn base_balance(&self) -> Result<Decimal>;

    /// Market buy sized in quote currency. Ok only when the exchange acked
    /// the order with at least one usable identifier.
    async fn submit_market_buy(&self, cost_quote: Decimal) -> Result<OrderIds>;

    /// Market sell sized in base currency, same ack contract as the buy.
    async fn submit_market_sell(&self, amount_base: Decimal) -> Result<OrderIds>;

    async fn order_detail(&self, ids: &OrderIds) -> Result<OrderStatus>;

    async fn cancel_order(&self, ids: &OrderIds) -> Result<()>;
}

/// Secondary execution path used when the primary one cannot confirm a fill.
/// Also owns the instrument metadata the sizing code needs.
#[async_trait]
pub trait FallbackExecutor: Send + Sync {
    async fn market_buy(&self, amount_base: Decimal) -> Result<FallbackFill>;

    async fn market_sell(&self, amount_base: Decimal) -> Result<FallbackFill>;

    /// Smallest order size the venue accepts, in base currency.
    fn min_amount(&self) -> Decimal;

    /// Decimal places the venue allows on an amount.
    fn amount_precision(&self) -> u32;
}
