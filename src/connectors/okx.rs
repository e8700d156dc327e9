// src/connectors/okx.rs
use crate::config::{AppConfig, Credentials};
use crate::connectors::messages::{
    AccountBalance, AssetBalance, Envelope, OrderAck, OrderDetail, Ticker,
};
use crate::connectors::signing::{self, Signer};
use crate::connectors::traits::ExchangeApi;
use crate::types::{OrderIds, OrderStatus, Side};
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Method};
use rust_decimal::Decimal;
use serde_json::json;
use std::time::Duration;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

const ORDER_ENDPOINT: &str = "/api/v5/trade/order";
const CANCEL_ENDPOINT: &str = "/api/v5/trade/cancel-order";
const TICKER_ENDPOINT: &str = "/api/v5/market/ticker";
const ACCOUNT_BALANCE_ENDPOINT: &str = "/api/v5/account/balance";
const ASSET_BALANCES_ENDPOINT: &str = "/api/v5/asset/balances";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const TICKER_TIMEOUT: Duration = Duration::from_secs(6);

// Коды OKX для протухшей/кривой метки времени.
const TS_ERROR_CODES: [&str; 2] = ["50112", "50102"];
const RAW_SNIPPET_MAX: usize = 300;

/// A signed call that never produced a usable envelope. Distinct from an
/// envelope with a non-zero code, which the caller still gets to inspect.
#[derive(Debug, Error)]
pub enum CallFailure {
    #[error("timestamp retries exhausted after {attempts} attempts")]
    RetriesExhausted { attempts: u32 },
    #[error("non-JSON response from exchange: {snippet}")]
    NonJson { snippet: String },
}

/// Signed REST client for one OKX spot instrument.
pub struct OkxRestClient {
    api_key: String,
    passphrase: String,
    signer: Signer,
    http: Client,
    base_url: String,
    inst_id: String,
    base_ccy: String,
    quote_ccy: String,
    ts_retries: u32,
    ts_backoff: Duration,
}

impl OkxRestClient {
    pub fn new(credentials: &Credentials, config: &AppConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self {
            api_key: credentials.api_key.clone(),
            passphrase: credentials.passphrase.clone(),
            signer: Signer::new(&credentials.secret_key)?,
            http,
            base_url: config.rest_url.trim_end_matches('/').to_string(),
            inst_id: config.pair_inst.clone(),
            base_ccy: config.base_ccy().to_string(),
            quote_ccy: config.quote_ccy().to_string(),
            ts_retries: config.ts_retries,
            ts_backoff: Duration::from_secs_f64(config.ts_backoff_secs.max(0.0)),
        })
    }

    /// One signed call. Network errors and timestamp rejections burn a retry
    /// each; a body that is not JSON aborts immediately. Every returned
    /// envelope still needs its `code` checked by the caller.
    pub async fn call(
        &self,
        method: Method,
        path: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<Envelope, CallFailure> {
        let payload = body.map(|b| b.to_string()).unwrap_or_default();
        let url = format!("{}{}", self.base_url, path);

        for attempt in 1..=self.ts_retries {
            let ts = signing::server_timestamp(&self.http, &self.base_url).await;
            let signature = self.signer.sign(&ts, method.as_str(), path, &payload);

            let mut request = self
                .http
                .request(method.clone(), &url)
                .header("Content-Type", "application/json")
                .header("OK-ACCESS-KEY", &self.api_key)
                .header("OK-ACCESS-PASSPHRASE", &self.passphrase)
                .header("OK-ACCESS-TIMESTAMP", &ts)
                .header("OK-ACCESS-SIGN", &signature);
            if !payload.is_empty() {
                request = request.body(payload.clone());
            }

            let response = match request.send().await {
                Ok(r) => r,
                Err(e) => {
                    warn!(
                        "Network error calling {path}: {e} (retry {attempt}/{})",
                        self.ts_retries
                    );
                    sleep(self.ts_backoff).await;
                    continue;
                }
            };

            let text = match response.text().await {
                Ok(t) => t,
                Err(e) => {
                    warn!(
                        "Error reading response from {path}: {e} (retry {attempt}/{})",
                        self.ts_retries
                    );
                    sleep(self.ts_backoff).await;
                    continue;
                }
            };

            let envelope: Envelope = match serde_json::from_str(&text) {
                Ok(env) => env,
                Err(_) => {
                    error!("Non-JSON response from OKX {path}: {}", snippet(&text));
                    return Err(CallFailure::NonJson {
                        snippet: snippet(&text),
                    });
                }
            };

            if is_timestamp_rejection(&envelope) {
                warn!(
                    "TS error from OKX (code={}): {} — retry {attempt}/{}",
                    envelope.code, envelope.msg, self.ts_retries
                );
                sleep(self.ts_backoff).await;
                continue;
            }

            return Ok(envelope);
        }

        Err(CallFailure::RetriesExhausted {
            attempts: self.ts_retries,
        })
    }

    async fn submit_market_order(&self, side: Side, sz: Decimal, by_cost: bool) -> Result<OrderIds> {
        let mut body = json!({
            "instId": self.inst_id,
            "tdMode": "cash",
            "side": side.as_str(),
            "ordType": "market",
            "sz": sz.to_string(),
        });
        if by_cost {
            // Размер в валюте котировки; биржа сама пересчитает в базовую.
            body["tgtCcy"] = json!("quote_ccy");
        }

        let envelope = self.call(Method::POST, ORDER_ENDPOINT, Some(&body)).await?;
        info!("OKX {} response: {}", side.as_str(), envelope_json(&envelope));

        if !envelope.is_success() {
            bail!(
                "market {} rejected: code={} msg='{}'",
                side.as_str(),
                envelope.code,
                envelope.msg
            );
        }

        let ack: OrderAck = envelope
            .first()
            .ok_or_else(|| anyhow!("order ack carried no data"))?;
        let ids = ack.ids();
        if ids.is_empty() {
            bail!(
                "market {} accepted but returned no order identifiers (sCode={} sMsg='{}')",
                side.as_str(),
                ack.s_code.as_deref().unwrap_or("?"),
                ack.s_msg.as_deref().unwrap_or("")
            );
        }
        Ok(ids)
    }
}

#[async_trait]
impl ExchangeApi for OkxRestClient {
    async fn last_price(&self) -> Result<Decimal> {
        // Публичный эндпоинт, без подписи.
        let url = format!("{}{}?instId={}", self.base_url, TICKER_ENDPOINT, self.inst_id);
        let envelope: Envelope = self
            .http
            .get(&url)
            .timeout(TICKER_TIMEOUT)
            .send()
            .await?
            .json()
            .await?;

        let ticker: Ticker = envelope
            .first()
            .ok_or_else(|| anyhow!("ticker response carried no data for {}", self.inst_id))?;
        ticker
            .last_price()
            .ok_or_else(|| anyhow!("ticker for {} has no usable last price", self.inst_id))
    }

    async fn quote_balance(&self) -> Result<Decimal> {
        let path = format!("{}?ccy={}", ACCOUNT_BALANCE_ENDPOINT, self.quote_ccy);
        match self.call(Method::GET, &path, None).await {
            Ok(env) if env.is_success() => {
                for account in env.entries::<AccountBalance>() {
                    for detail in &account.details {
                        if detail.ccy == self.quote_ccy {
                            return Ok(detail.available());
                        }
                    }
                }
            }
            Ok(env) => debug!(
                "Trading balance unreadable: code={} msg='{}'",
                env.code, env.msg
            ),
            Err(e) => warn!("Trading balance call failed: {e}"),
        }

        // Funding-счёт как запасной источник остатка.
        match self.call(Method::GET, ASSET_BALANCES_ENDPOINT, None).await {
            Ok(env) if env.is_success() => {
                for asset in env.entries::<AssetBalance>() {
                    if asset.ccy == self.quote_ccy {
                        return Ok(asset.available());
                    }
                }
            }
            Ok(env) => debug!(
                "Funding balance unreadable: code={} msg='{}'",
                env.code, env.msg
            ),
            Err(e) => warn!("Funding balance call failed: {e}"),
        }

        Ok(Decimal::ZERO)
    }

    async fn base_balance(&self) -> Result<Decimal> {
        match self.call(Method::GET, ASSET_BALANCES_ENDPOINT, None).await {
            Ok(env) if env.is_success() => {
                for asset in env.entries::<AssetBalance>() {
                    if asset.ccy == self.base_ccy {
                        return Ok(asset.available());
                    }
                }
            }
            Ok(env) => debug!(
                "Base balance unreadable: code={} msg='{}'",
                env.code, env.msg
            ),
            Err(e) => warn!("Base balance call failed: {e}"),
        }
        Ok(Decimal::ZERO)
    }

    async fn submit_market_buy(&self, cost_quote: Decimal) -> Result<OrderIds> {
        self.submit_market_order(Side::Buy, cost_quote, true).await
    }

    async fn submit_market_sell(&self, amount_base: Decimal) -> Result<OrderIds> {
        self.submit_market_order(Side::Sell, amount_base, false).await
    }

    async fn order_detail(&self, ids: &OrderIds) -> Result<OrderStatus> {
        if ids.is_empty() {
            bail!("ordId or clOrdId required to query an order");
        }

        let mut path = format!("{}?instId={}", ORDER_ENDPOINT, self.inst_id);
        if let Some(id) = &ids.ord_id {
            path.push_str("&ordId=");
            path.push_str(id);
        }
        if let Some(id) = &ids.cl_ord_id {
            path.push_str("&clOrdId=");
            path.push_str(id);
        }

        let envelope = self.call(Method::GET, &path, None).await?;
        if !envelope.is_success() {
            bail!(
                "order lookup failed: code={} msg='{}'",
                envelope.code,
                envelope.msg
            );
        }

        let detail: OrderDetail = envelope
            .first()
            .ok_or_else(|| anyhow!("order lookup carried no data"))?;
        Ok(OrderStatus {
            filled: detail.filled(),
            avg_price: detail.average_price(),
            state: detail.state(),
        })
    }

    async fn cancel_order(&self, ids: &OrderIds) -> Result<()> {
        let mut body = json!({ "instId": self.inst_id });
        if let Some(id) = &ids.ord_id {
            body["ordId"] = json!(id);
        }
        if let Some(id) = &ids.cl_ord_id {
            body["clOrdId"] = json!(id);
        }

        let envelope = self.call(Method::POST, CANCEL_ENDPOINT, Some(&body)).await?;
        if !envelope.is_success() {
            bail!(
                "cancel rejected: code={} msg='{}'",
                envelope.code,
                envelope.msg
            );
        }
        Ok(())
    }
}

fn is_timestamp_rejection(envelope: &Envelope) -> bool {
    TS_ERROR_CODES.contains(&envelope.code.as_str())
        || envelope.msg.contains("Timestamp request expired")
        || envelope.msg.contains("Invalid OK-ACCESS-TIMESTAMP")
}

fn snippet(text: &str) -> String {
    text.chars().take(RAW_SNIPPET_MAX).collect()
}

fn envelope_json(envelope: &Envelope) -> String {
    serde_json::to_string(envelope).unwrap_or_else(|_| format!("{envelope:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;
    use std::str::FromStr;

    fn test_credentials() -> Credentials {
        Credentials {
            api_key: "key".into(),
            secret_key: "secret".into(),
            passphrase: "phrase".into(),
        }
    }

    fn test_config(url: &str) -> AppConfig {
        serde_json::from_value(serde_json::json!({
            "rest_url": url,
            "ts_retries": 2,
            "ts_backoff_secs": 0.01,
        }))
        .unwrap()
    }

    fn test_client(server: &mockito::ServerGuard) -> OkxRestClient {
        OkxRestClient::new(&test_credentials(), &test_config(&server.url())).unwrap()
    }

    async fn mock_time(server: &mut mockito::ServerGuard) -> mockito::Mock {
        server
            .mock("GET", "/api/v5/public/time")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"code":"0","msg":"","data":[{"ts":"1700000000000"}]}"#)
            .create_async()
            .await
    }

    #[test]
    fn timestamp_rejection_matches_codes_and_messages() {
        let by_code: Envelope =
            serde_json::from_str(r#"{"code":"50102","msg":"whatever","data":[]}"#).unwrap();
        assert!(is_timestamp_rejection(&by_code));

        let by_msg: Envelope = serde_json::from_str(
            r#"{"code":"1","msg":"Invalid OK-ACCESS-TIMESTAMP","data":[]}"#,
        )
        .unwrap();
        assert!(is_timestamp_rejection(&by_msg));

        let unrelated: Envelope =
            serde_json::from_str(r#"{"code":"51008","msg":"Insufficient balance","data":[]}"#)
                .unwrap();
        assert!(!is_timestamp_rejection(&unrelated));
    }

    #[tokio::test]
    async fn timestamp_rejections_burn_all_retries() {
        let mut server = mockito::Server::new_async().await;
        let _time = mock_time(&mut server).await;
        let rejected = server
            .mock("POST", "/api/v5/trade/order")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"code":"50102","msg":"Timestamp request expired","data":[]}"#)
            .expect(2)
            .create_async()
            .await;

        let client = test_client(&server);
        let body = serde_json::json!({"instId": "DOGE-USDT"});
        let err = client
            .call(Method::POST, "/api/v5/trade/order", Some(&body))
            .await
            .unwrap_err();

        assert!(matches!(err, CallFailure::RetriesExhausted { attempts: 2 }));
        rejected.assert_async().await;
    }

    #[tokio::test]
    async fn error_coded_envelope_is_returned_not_retried() {
        let mut server = mockito::Server::new_async().await;
        let _time = mock_time(&mut server).await;
        let rejected = server
            .mock("POST", "/api/v5/trade/order")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"code":"51008","msg":"Insufficient balance","data":[]}"#)
            .expect(1)
            .create_async()
            .await;

        let client = test_client(&server);
        let body = serde_json::json!({"instId": "DOGE-USDT"});
        let envelope = client
            .call(Method::POST, "/api/v5/trade/order", Some(&body))
            .await
            .unwrap();

        assert!(!envelope.is_success());
        assert_eq!(envelope.code, "51008");
        rejected.assert_async().await;
    }

    #[tokio::test]
    async fn non_json_body_is_a_sentinel_not_a_panic() {
        let mut server = mockito::Server::new_async().await;
        let _time = mock_time(&mut server).await;
        let _html = server
            .mock("GET", Matcher::Regex(r"^/api/v5/account/balance.*$".to_string()))
            .with_status(200)
            .with_body("<html>gateway busy</html>")
            .create_async()
            .await;

        let client = test_client(&server);
        let err = client
            .call(Method::GET, "/api/v5/account/balance?ccy=USDT", None)
            .await
            .unwrap_err();

        match err {
            CallFailure::NonJson { snippet } => assert!(snippet.contains("<html>")),
            other => panic!("expected NonJson, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn buy_ack_extracts_ids_and_drops_blank_client_id() {
        let mut server = mockito::Server::new_async().await;
        let _time = mock_time(&mut server).await;
        let order = server
            .mock("POST", "/api/v5/trade/order")
            .match_body(Matcher::PartialJson(serde_json::json!({
                "instId": "DOGE-USDT",
                "tdMode": "cash",
                "side": "buy",
                "ordType": "market",
                "sz": "5",
                "tgtCcy": "quote_ccy",
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"code":"0","msg":"","data":[{"ordId":"730385222","clOrdId":"","sCode":"0"}]}"#)
            .create_async()
            .await;

        let client = test_client(&server);
        let ids = client.submit_market_buy(Decimal::from(5)).await.unwrap();

        assert_eq!(ids.ord_id.as_deref(), Some("730385222"));
        assert!(ids.cl_ord_id.is_none());
        order.assert_async().await;
    }

    #[tokio::test]
    async fn sell_without_target_ccy_and_rejection_is_an_error() {
        let mut server = mockito::Server::new_async().await;
        let _time = mock_time(&mut server).await;
        // Полное совпадение тела: продажа не несёт tgtCcy вовсе.
        let order = server
            .mock("POST", "/api/v5/trade/order")
            .match_body(Matcher::Json(serde_json::json!({
                "instId": "DOGE-USDT",
                "tdMode": "cash",
                "side": "sell",
                "ordType": "market",
                "sz": "49.99",
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"code":"51008","msg":"Insufficient balance","data":[]}"#)
            .create_async()
            .await;

        let client = test_client(&server);
        let err = client
            .submit_market_sell(Decimal::from_str("49.99").unwrap())
            .await
            .unwrap_err();

        assert!(err.to_string().contains("51008"));
        order.assert_async().await;
    }

    #[tokio::test]
    async fn quote_balance_falls_back_to_funding_account() {
        let mut server = mockito::Server::new_async().await;
        let _time = mock_time(&mut server).await;
        let _trading = server
            .mock("GET", "/api/v5/account/balance?ccy=USDT")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"code":"50030","msg":"permission denied","data":[]}"#)
            .create_async()
            .await;
        let _funding = server
            .mock("GET", "/api/v5/asset/balances")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"code":"0","msg":"","data":[{"ccy":"BTC","availBal":"0.5"},{"ccy":"USDT","availBal":"41.77"}]}"#,
            )
            .create_async()
            .await;

        let client = test_client(&server);
        let balance = client.quote_balance().await.unwrap();
        assert_eq!(balance, Decimal::from_str("41.77").unwrap());
    }

    #[tokio::test]
    async fn unreadable_balances_report_zero() {
        let mut server = mockito::Server::new_async().await;
        let _time = mock_time(&mut server).await;
        let _denied = server
            .mock("GET", Matcher::Regex(r"^/api/v5/(account|asset)/.*$".to_string()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"code":"50030","msg":"permission denied","data":[]}"#)
            .create_async()
            .await;

        let client = test_client(&server);
        assert_eq!(client.quote_balance().await.unwrap(), Decimal::ZERO);
        assert_eq!(client.base_balance().await.unwrap(), Decimal::ZERO);
    }

    #[tokio::test]
    async fn order_detail_queries_by_both_ids() {
        let mut server = mockito::Server::new_async().await;
        let _time = mock_time(&mut server).await;
        let lookup = server
            .mock("GET", "/api/v5/trade/order?instId=DOGE-USDT&ordId=730385222&clOrdId=moon1")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"code":"0","msg":"","data":[{"fillSz":"49.99","avgPx":"0.10131","state":"filled"}]}"#,
            )
            .create_async()
            .await;

        let client = test_client(&server);
        let ids = OrderIds {
            ord_id: Some("730385222".into()),
            cl_ord_id: Some("moon1".into()),
        };
        let status = client.order_detail(&ids).await.unwrap();

        assert_eq!(status.filled, Decimal::from_str("49.99").unwrap());
        assert_eq!(status.avg_price, Some(Decimal::from_str("0.10131").unwrap()));
        assert!(status.is_terminal());
        lookup.assert_async().await;
    }

    #[tokio::test]
    async fn order_detail_requires_some_id() {
        let server = mockito::Server::new_async().await;
        let client = test_client(&server);
        let err = client.order_detail(&OrderIds::default()).await.unwrap_err();
        assert!(err.to_string().contains("required"));
    }

    #[tokio::test]
    async fn ticker_read_is_unsigned() {
        let mut server = mockito::Server::new_async().await;
        // Намеренно без мока времени: публичный тикер не подписывается.
        let ticker = server
            .mock("GET", "/api/v5/market/ticker?instId=DOGE-USDT")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"code":"0","msg":"","data":[{"instId":"DOGE-USDT","last":"0.10131"}]}"#)
            .create_async()
            .await;

        let client = test_client(&server);
        let price = client.last_price().await.unwrap();
        assert_eq!(price, Decimal::from_str("0.10131").unwrap());
        ticker.assert_async().await;
    }
}
