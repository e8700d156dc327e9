// src/connectors/broker.rs
use crate::config::{AppConfig, Credentials};
use crate::connectors::messages::{Envelope, Instrument, OrderAck, OrderDetail};
use crate::connectors::signing::{self, Signer};
use crate::connectors::traits::FallbackExecutor;
use crate::types::{FallbackFill, Side};
use crate::utils::precision::quantize_amount;
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use serde_json::json;
use std::time::Duration;
use tracing::{info, warn};

const INSTRUMENTS_ENDPOINT: &str = "/api/v5/public/instruments";
const ORDER_ENDPOINT: &str = "/api/v5/trade/order";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const METADATA_TIMEOUT: Duration = Duration::from_secs(6);

// Защитные значения на случай недоступных метаданных инструмента.
const DEFAULT_MIN_AMOUNT: Decimal = Decimal::TEN;
const DEFAULT_AMOUNT_PRECISION: u32 = 6;

/// Secondary spot executor with its own HTTP session and signer.
/// Orders here are always sized in base currency, unlike the primary buy path.
pub struct SpotBroker {
    api_key: String,
    passphrase: String,
    signer: Signer,
    http: Client,
    base_url: String,
    inst_id: String,
    min_amount: Decimal,
    precision: u32,
    dry_run: bool,
}

impl SpotBroker {
    /// Builds the broker and loads instrument limits once. Metadata failures
    /// degrade to stock defaults instead of refusing to start.
    pub async fn connect(credentials: &Credentials, config: &AppConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("failed to build HTTP client")?;
        let base_url = config.rest_url.trim_end_matches('/').to_string();

        let (min_amount, precision) =
            match load_instrument(&http, &base_url, &config.pair_inst).await {
                Ok(instrument) => (
                    instrument.min_size().unwrap_or(DEFAULT_MIN_AMOUNT),
                    instrument.amount_precision().unwrap_or(DEFAULT_AMOUNT_PRECISION),
                ),
                Err(e) => {
                    warn!(
                        "Instrument metadata unavailable for {} ({e:#}); \
                         using defaults min={DEFAULT_MIN_AMOUNT} precision={DEFAULT_AMOUNT_PRECISION}",
                        config.pair_inst
                    );
                    (DEFAULT_MIN_AMOUNT, DEFAULT_AMOUNT_PRECISION)
                }
            };

        Ok(Self {
            api_key: credentials.api_key.clone(),
            passphrase: credentials.passphrase.clone(),
            signer: Signer::new(&credentials.secret_key)?,
            http,
            base_url,
            inst_id: config.pair_inst.clone(),
            min_amount,
            precision,
            dry_run: config.dry_run,
        })
    }

    fn sized_buy(&self, amount: Decimal) -> Decimal {
        quantize_amount(amount.max(self.min_amount), self.precision)
    }

    /// Продажи не дотягиваются до минимума: продать можно только то, что есть.
    fn sized_sell(&self, amount: Decimal) -> Decimal {
        quantize_amount(amount, self.precision)
    }

    async fn submit_market(&self, side: Side, amount: Decimal) -> Result<FallbackFill> {
        if amount <= Decimal::ZERO {
            bail!("bad amount: {amount} after quantization");
        }
        if self.dry_run {
            info!("[DRY RUN] broker {} {} {}", side.as_str(), amount, self.inst_id);
            return Ok(FallbackFill::none());
        }

        let mut body = json!({
            "instId": self.inst_id,
            "tdMode": "cash",
            "side": side.as_str(),
            "ordType": "market",
            "sz": amount.to_string(),
        });
        if side == Side::Buy {
            // Маркет-бай по умолчанию меряется в котировке; здесь объём базовый.
            body["tgtCcy"] = json!("base_ccy");
        }

        let payload = body.to_string();
        let ts = signing::server_timestamp(&self.http, &self.base_url).await;
        let signature = self.signer.sign(&ts, "POST", ORDER_ENDPOINT, &payload);

        let envelope: Envelope = self
            .http
            .post(format!("{}{}", self.base_url, ORDER_ENDPOINT))
            .header("Content-Type", "application/json")
            .header("OK-ACCESS-KEY", &self.api_key)
            .header("OK-ACCESS-PASSPHRASE", &self.passphrase)
            .header("OK-ACCESS-TIMESTAMP", &ts)
            .header("OK-ACCESS-SIGN", &signature)
            .body(payload)
            .send()
            .await?
            .json()
            .await?;

        info!(
            "Broker {} response: code={} msg='{}'",
            side.as_str(),
            envelope.code,
            envelope.msg
        );
        if !envelope.is_success() {
            bail!(
                "broker {} rejected: code={} msg='{}'",
                side.as_str(),
                envelope.code,
                envelope.msg
            );
        }

        // Моментальный ack маркет-ордера объёма исполнения не несёт;
        // вызывающая сторона подтверждает его отдельным опросом по id.
        let ack: OrderAck = envelope
            .first()
            .ok_or_else(|| anyhow!("broker ack carried no data"))?;
        let detail: OrderDetail = envelope.first().unwrap_or_default();

        Ok(FallbackFill {
            filled: detail.filled(),
            average_price: detail.average_price(),
            ids: ack.ids(),
        })
    }
}

#[async_trait]
impl FallbackExecutor for SpotBroker {
    async fn market_buy(&self, amount_base: Decimal) -> Result<FallbackFill> {
        self.submit_market(Side::Buy, self.sized_buy(amount_base)).await
    }

    async fn market_sell(&self, amount_base: Decimal) -> Result<FallbackFill> {
        self.submit_market(Side::Sell, self.sized_sell(amount_base)).await
    }

    fn min_amount(&self) -> Decimal {
        self.min_amount
    }

    fn amount_precision(&self) -> u32 {
        self.precision
    }
}

async fn load_instrument(http: &Client, base_url: &str, inst_id: &str) -> Result<Instrument> {
    let url = format!("{base_url}{INSTRUMENTS_ENDPOINT}?instType=SPOT&instId={inst_id}");
    let envelope: Envelope = http
        .get(&url)
        .timeout(METADATA_TIMEOUT)
        .send()
        .await?
        .json()
        .await?;

    if !envelope.is_success() {
        bail!(
            "instrument lookup failed: code={} msg='{}'",
            envelope.code,
            envelope.msg
        );
    }
    envelope
        .first()
        .ok_or_else(|| anyhow!("no instrument returned for {inst_id}"))
}
