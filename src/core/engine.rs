// src/core/engine.rs
use crate::config::AppConfig;
use crate::connectors::traits::{ExchangeApi, FallbackExecutor};
use crate::core::executor::OrderExecutor;
use crate::storage::PositionStore;
use crate::types::PositionRecord;
use crate::utils::precision::quantize_amount; // Импорт утилит
use anyhow::Result;
use rust_decimal::Decimal;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, info, warn};

// Ниже этого остатка котировки покупать не на что.
const QUOTE_FLOOR: Decimal = Decimal::ONE;

const READ_ERROR_PAUSE: Duration = Duration::from_secs(3);
const INSUFFICIENT_PAUSE: Duration = Duration::from_secs(10);
const POST_TRADE_PAUSE: Duration = Duration::from_secs(2);
const IDLE_PAUSE: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CycleAction {
    Monitor,
    Insufficient,
    Enter,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExitReason {
    TakeProfit,
    StopLoss,
}

impl ExitReason {
    fn label(&self) -> &'static str {
        match self {
            ExitReason::TakeProfit => "take-profit",
            ExitReason::StopLoss => "stop-loss",
        }
    }
}

enum MonitorExit {
    StopRequested,
    PositionClosed,
}

enum EntryResult {
    Opened,
    NoFill,
}

/// Счётчик подряд идущих циклов без средств. Любой цикл с достаточным
/// остатком сбрасывает его в ноль.
#[derive(Debug)]
struct FundingGuard {
    streak: u32,
    limit: u32,
}

impl FundingGuard {
    fn new(limit: u32) -> Self {
        Self { streak: 0, limit }
    }

    fn sufficient(&mut self) {
        self.streak = 0;
    }

    /// Returns the attempt number and whether the limit is now reached.
    fn insufficient(&mut self) -> (u32, bool) {
        self.streak += 1;
        (self.streak, self.streak >= self.limit)
    }
}

/// Решение цикла. Порядок проверок фиксирован: сначала «держим ли базовую»,
/// потом «есть ли котировка на вход».
fn classify_cycle(
    base_balance: Decimal,
    min_amount: Decimal,
    quote_balance: Decimal,
) -> CycleAction {
    if base_balance >= min_amount {
        return CycleAction::Monitor;
    }
    if quote_balance < QUOTE_FLOOR {
        return CycleAction::Insufficient;
    }
    CycleAction::Enter
}

/// Without a record on disk the current price anchors the exit thresholds.
fn entry_price_from(record: Option<&PositionRecord>, current_price: Decimal) -> Decimal {
    record.map(|r| r.price).unwrap_or(current_price)
}

fn exit_thresholds(
    entry_price: Decimal,
    tp_mult: Decimal,
    sl_mult: Decimal,
) -> (Decimal, Option<Decimal>) {
    let target = entry_price * tp_mult;
    // Стоп имеет смысл только строго ниже цены входа.
    let stoploss =
        (sl_mult > Decimal::ZERO && sl_mult < Decimal::ONE).then(|| entry_price * sl_mult);
    (target, stoploss)
}

/// Тейк-профит всегда проверяется раньше стопа.
fn exit_trigger(price: Decimal, target: Decimal, stoploss: Option<Decimal>) -> Option<ExitReason> {
    if price >= target {
        return Some(ExitReason::TakeProfit);
    }
    match stoploss {
        Some(sl) if price <= sl => Some(ExitReason::StopLoss),
        _ => None,
    }
}

fn entry_amount(
    cost: Decimal,
    price: Decimal,
    min_amount: Decimal,
    precision: u32,
) -> Option<Decimal> {
    // 1. Расчет "сырого" объема
    let estimated = cost.checked_div(price)?;
    // 2. Нормализация объема
    Some(quantize_amount(estimated.max(min_amount), precision))
}

/// Sequential trading loop for one spot instrument: buy flat, babysit the
/// position to take-profit or stop-loss, sell, repeat.
pub struct TradingEngine {
    config: AppConfig,
    exchange: Arc<dyn ExchangeApi>,
    fallback: Arc<dyn FallbackExecutor>,
    executor: OrderExecutor,
    store: PositionStore,
    funding: FundingGuard,
    check_delay: Duration,
}

impl TradingEngine {
    pub fn new(
        config: AppConfig,
        exchange: Arc<dyn ExchangeApi>,
        fallback: Arc<dyn FallbackExecutor>,
        store: PositionStore,
    ) -> Self {
        let executor = OrderExecutor::new(
            exchange.clone(),
            fallback.clone(),
            Duration::from_secs_f64(config.order_poll_secs.max(0.0)),
            Duration::from_secs(config.fill_timeout_secs),
        );
        let funding = FundingGuard::new(config.insufficient_limit);
        let check_delay = Duration::from_secs_f64(config.check_delay_secs.max(0.0));

        Self {
            config,
            exchange,
            fallback,
            executor,
            store,
            funding,
            check_delay,
        }
    }

    pub async fn run(&mut self) -> Result<()> {
        let min_amount = self.fallback.min_amount();
        info!(
            "Engine starting: pair={} buy_cost={} tp_mult={} sl_mult={} dry_run={}",
            self.config.pair_inst,
            self.config.buy_cost,
            self.config.tp_mult,
            self.config.sl_mult,
            self.config.dry_run
        );
        info!("Market min amount (base): {}", min_amount);

        loop {
            if self.stop_requested() {
                info!("{} detected — exiting gracefully.", self.config.stop_file);
                break;
            }

            let (price, quote_bal, base_bal) = match self.read_snapshot().await {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    warn!("Market/account read error: {e:#}");
                    sleep(READ_ERROR_PAUSE).await;
                    continue;
                }
            };

            info!(
                "Balances: {}={:.6}, {}={:.6} | Price={:.6}",
                self.config.quote_ccy(),
                quote_bal,
                self.config.base_ccy(),
                base_bal,
                price
            );

            match classify_cycle(base_bal, min_amount, quote_bal) {
                CycleAction::Monitor => match self.monitor_position(base_bal, price).await {
                    MonitorExit::StopRequested => break,
                    MonitorExit::PositionClosed => sleep(POST_TRADE_PAUSE).await,
                },
                CycleAction::Insufficient => {
                    let (attempt, exhausted) = self.funding.insufficient();
                    warn!(
                        "Insufficient {} ({:.6}), attempt {}/{}",
                        self.config.quote_ccy(),
                        quote_bal,
                        attempt,
                        self.config.insufficient_limit
                    );
                    if exhausted {
                        error!(
                            "❌ {} insufficient too many times — bot stopping.",
                            self.config.quote_ccy()
                        );
                        break;
                    }
                    sleep(INSUFFICIENT_PAUSE).await;
                }
                CycleAction::Enter => {
                    self.funding.sufficient();
                    match self.attempt_entry(price, min_amount).await {
                        EntryResult::Opened => sleep(POST_TRADE_PAUSE).await,
                        EntryResult::NoFill => sleep(IDLE_PAUSE).await,
                    }
                }
            }
        }

        info!("Bot stopped. Goodbye.");
        Ok(())
    }

    async fn read_snapshot(&self) -> Result<(Decimal, Decimal, Decimal)> {
        let price = self.exchange.last_price().await?;
        let quote = self.exchange.quote_balance().await?;
        let base = self.exchange.base_balance().await?;
        Ok((price, quote, base))
    }

    /// Inner loop while a position is on the books: watch the price until a
    /// threshold fires, then sell the held balance.
    async fn monitor_position(&self, held: Decimal, cycle_price: Decimal) -> MonitorExit {
        let record = self.store.load().await;
        let entry_price = entry_price_from(record.as_ref(), cycle_price);
        if record.is_none() {
            warn!("No position record on disk; using current price {entry_price:.6} as entry");
        }

        let (target, stoploss) =
            exit_thresholds(entry_price, self.config.tp_mult, self.config.sl_mult);
        match stoploss {
            Some(sl) => info!(
                "Holding {:.6} {} | buy_price={:.6} target={:.6} stoploss={:.6}",
                held,
                self.config.base_ccy(),
                entry_price,
                target,
                sl
            ),
            None => info!(
                "Holding {:.6} {} | buy_price={:.6} target={:.6}",
                held,
                self.config.base_ccy(),
                entry_price,
                target
            ),
        }

        loop {
            if self.stop_requested() {
                info!("STOP detected — stop monitoring and exit.");
                return MonitorExit::StopRequested;
            }

            let price_now = match self.exchange.last_price().await {
                Ok(p) => p,
                Err(e) => {
                    warn!("Price fetch error: {e:#}");
                    sleep(self.check_delay).await;
                    continue;
                }
            };

            info!("Monitor price={:.6} target={:.6}", price_now, target);

            if let Some(reason) = exit_trigger(price_now, target, stoploss) {
                match reason {
                    ExitReason::TakeProfit => info!("Target reached -> SELL market"),
                    ExitReason::StopLoss => info!("Stop-loss triggered -> SELL market"),
                }
                self.close_position(held, reason).await;
                return MonitorExit::PositionClosed;
            }

            sleep(self.check_delay).await;
        }
    }

    /// Продажа всегда завершается очисткой записи: следующий цикл перечитает
    /// реальные балансы и сам решит, осталась ли позиция.
    async fn close_position(&self, held: Decimal, reason: ExitReason) {
        if self.config.dry_run {
            match reason {
                ExitReason::TakeProfit => info!("[DRY RUN] Would sell via OKX REST"),
                ExitReason::StopLoss => info!("[DRY RUN] Would sell (stop-loss)"),
            }
            self.store.clear().await;
            return;
        }

        let outcome = self.executor.sell(held).await;
        if outcome.confirmed() {
            info!(
                "Position closed ({}): {:.6} {} @ {}",
                reason.label(),
                outcome.filled,
                self.config.base_ccy(),
                outcome
                    .average_price
                    .map(|p| p.to_string())
                    .unwrap_or_else(|| "?".to_string())
            );
        } else {
            warn!("Sell not confirmed this cycle; record cleared, balances re-read next cycle");
        }
        self.store.clear().await;
    }

    async fn attempt_entry(&self, price: Decimal, min_amount: Decimal) -> EntryResult {
        let amount = match entry_amount(
            self.config.buy_cost,
            price,
            min_amount,
            self.fallback.amount_precision(),
        ) {
            Some(a) if a > Decimal::ZERO => a,
            _ => {
                warn!("⚠️ Price {price} unusable for sizing, skipping cycle");
                return EntryResult::NoFill;
            }
        };

        info!(
            "Attempt BUY: cost={} {} -> amount={:.6} {} (est price {:.6})",
            self.config.buy_cost,
            self.config.quote_ccy(),
            amount,
            self.config.base_ccy(),
            price
        );

        if self.config.dry_run {
            info!("[DRY RUN] Would send OKX buy-by-cost (tgtCcy=quote_ccy)");
            self.store.save(price, amount).await;
            return EntryResult::Opened;
        }

        let outcome = self.executor.buy(self.config.buy_cost, amount).await;
        if outcome.confirmed() {
            // Цена из ответа биржи, оценка только как запасной вариант.
            let entry_price = outcome.average_price.unwrap_or(price);
            self.store.save(entry_price, outcome.filled).await;
            EntryResult::Opened
        } else {
            warn!("Buy attempt produced no confirmed fill. Waiting before next attempt.");
            EntryResult::NoFill
        }
    }

    fn stop_requested(&self) -> bool {
        Path::new(&self.config.stop_file).exists()
    }
}
