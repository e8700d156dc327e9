// src/core/executor.rs
use crate::connectors::traits::{ExchangeApi, FallbackExecutor};
use crate::types::{ExecutionPath, OrderIds, OrderOutcome, OrderStatus, Side};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{error, info, warn};

/// Drives one order from submission to an outcome: primary REST attempt,
/// fill poll, then the fallback path with its own poll. Never errors out —
/// a cycle that confirms nothing comes back as an unconfirmed outcome.
pub struct OrderExecutor {
    exchange: Arc<dyn ExchangeApi>,
    fallback: Arc<dyn FallbackExecutor>,
    poll_interval: Duration,
    fill_timeout: Duration,
}

impl OrderExecutor {
    pub fn new(
        exchange: Arc<dyn ExchangeApi>,
        fallback: Arc<dyn FallbackExecutor>,
        poll_interval: Duration,
        fill_timeout: Duration,
    ) -> Self {
        Self {
            exchange,
            fallback,
            poll_interval,
            fill_timeout,
        }
    }

    /// Market buy: budgeted in quote currency on the primary path,
    /// `fallback_amount` base units on the fallback path.
    pub async fn buy(&self, cost_quote: Decimal, fallback_amount: Decimal) -> OrderOutcome {
        match self.exchange.submit_market_buy(cost_quote).await {
            Ok(ids) => {
                let status = self.poll_until_filled(&ids).await;
                if status.filled > Decimal::ZERO {
                    info!(
                        "✅ BUY filled {:.6} @ {} (primary)",
                        status.filled,
                        display_price(status.avg_price)
                    );
                    return outcome_from(status, ids, ExecutionPath::Primary);
                }
                warn!("Primary buy not filled in time -> cancel & fallback");
                match self.exchange.cancel_order(&ids).await {
                    Ok(()) => info!("Cancel requested"),
                    Err(e) => warn!("Cancel error: {e:#}"),
                }
            }
            Err(e) => warn!("Primary buy failed or rejected ({e:#}) -> fallback by amount"),
        }
        self.fallback_order(Side::Buy, fallback_amount).await
    }

    /// Market sell of `amount_base`. No cancel before the fallback: the
    /// fallback sell re-targets the same held balance either way.
    pub async fn sell(&self, amount_base: Decimal) -> OrderOutcome {
        match self.exchange.submit_market_sell(amount_base).await {
            Ok(ids) => {
                let status = self.poll_until_filled(&ids).await;
                if status.filled > Decimal::ZERO {
                    info!(
                        "✅ SOLD {:.6} @ {} (primary)",
                        status.filled,
                        display_price(status.avg_price)
                    );
                    return outcome_from(status, ids, ExecutionPath::Primary);
                }
                warn!("Primary sell not filled in time -> fallback");
            }
            Err(e) => warn!("Primary sell failed or rejected ({e:#}) -> fallback"),
        }
        self.fallback_order(Side::Sell, amount_base).await
    }

    async fn fallback_order(&self, side: Side, amount: Decimal) -> OrderOutcome {
        let result = match side {
            Side::Buy => self.fallback.market_buy(amount).await,
            Side::Sell => self.fallback.market_sell(amount).await,
        };

        let fill = match result {
            Ok(f) => f,
            Err(e) => {
                error!("Fallback {} failed: {e:#}", side.as_str());
                return OrderOutcome::unconfirmed(ExecutionPath::Fallback);
            }
        };

        if fill.filled > Decimal::ZERO {
            info!(
                "✅ Fallback {} filled {:.6} @ {}",
                side.as_str(),
                fill.filled,
                display_price(fill.average_price)
            );
            return OrderOutcome {
                filled: fill.filled,
                average_price: fill.average_price,
                ids: fill.ids,
                raw_state: None,
                path: ExecutionPath::Fallback,
            };
        }

        if fill.ids.is_empty() {
            warn!(
                "Fallback {} returned no ids and no fill info -> cannot confirm. \
                 Giving up this cycle.",
                side.as_str()
            );
            return OrderOutcome::unconfirmed(ExecutionPath::Fallback);
        }

        info!(
            "Polling fallback order ordId={:?} clOrdId={:?}",
            fill.ids.ord_id, fill.ids.cl_ord_id
        );
        let status = self.poll_until_filled(&fill.ids).await;
        if status.filled > Decimal::ZERO {
            info!(
                "✅ {} filled after poll: {:.6} @ {}",
                side.as_str(),
                status.filled,
                display_price(status.avg_price)
            );
        } else {
            warn!(
                "Fallback {} order not filled in timeout. Giving up this cycle.",
                side.as_str()
            );
        }
        outcome_from(status, fill.ids, ExecutionPath::Fallback)
    }

    /// Polls until a fill shows up, the order goes terminal, or the timeout
    /// lapses. Individual poll errors are logged and absorbed.
    async fn poll_until_filled(&self, ids: &OrderIds) -> OrderStatus {
        let deadline = Instant::now() + self.fill_timeout;
        let mut last = OrderStatus::default();
        loop {
            match self.exchange.order_detail(ids).await {
                Ok(status) => {
                    if status.filled > Decimal::ZERO || status.is_terminal() {
                        return status;
                    }
                    last = status;
                }
                Err(e) => warn!("Error polling order: {e:#}"),
            }
            if Instant::now() >= deadline {
                return last;
            }
            sleep(self.poll_interval).await;
        }
    }
}

fn outcome_from(status: OrderStatus, ids: OrderIds, path: ExecutionPath) -> OrderOutcome {
    OrderOutcome {
        filled: status.filled,
        average_price: status.avg_price,
        ids,
        raw_state: status.state,
        path,
    }
}

fn display_price(price: Option<Decimal>) -> String {
    price.map(|p| p.to_string()).unwrap_or_else(|| "?".to_string())
}
