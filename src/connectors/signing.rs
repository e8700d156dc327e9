// src/connectors/signing.rs
use crate::connectors::messages::{Envelope, ServerTime};
use anyhow::{anyhow, Context, Result};
use base64::{engine::general_purpose, Engine as _};
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::Client;
use sha2::Sha256;
use std::time::Duration;
use tracing::debug;

type HmacSha256 = Hmac<Sha256>;

const TIME_ENDPOINT: &str = "/api/v5/public/time";
const TIME_TIMEOUT: Duration = Duration::from_secs(3);

/// Подпись приватных запросов OKX: HMAC-SHA256 от `ts + METHOD + path + body`,
/// закодированный в base64 (не hex!).
#[derive(Clone)]
pub struct Signer {
    mac: HmacSha256,
}

impl Signer {
    pub fn new(secret_key: &str) -> Result<Self> {
        let mac = HmacSha256::new_from_slice(secret_key.as_bytes())
            .context("Invalid secret key length")?;
        Ok(Self { mac })
    }

    pub fn sign(&self, timestamp: &str, method: &str, path: &str, body: &str) -> String {
        let prehash = format!("{timestamp}{method}{path}{body}");
        let mut mac = self.mac.clone();
        mac.update(prehash.as_bytes());
        general_purpose::STANDARD.encode(mac.finalize().into_bytes())
    }
}

/// Timestamp for the OK-ACCESS-TIMESTAMP header: epoch seconds with exactly
/// three fraction digits, taken from the exchange clock when reachable.
pub async fn server_timestamp(http: &Client, base_url: &str) -> String {
    match fetch_server_time(http, base_url).await {
        Ok(ts) => ts,
        Err(e) => {
            debug!("Server time unavailable ({e:#}), falling back to local clock");
            local_timestamp()
        }
    }
}

pub fn local_timestamp() -> String {
    format_epoch_millis(Utc::now().timestamp_millis())
}

async fn fetch_server_time(http: &Client, base_url: &str) -> Result<String> {
    let url = format!("{base_url}{TIME_ENDPOINT}");
    let envelope: Envelope = http
        .get(&url)
        .timeout(TIME_TIMEOUT)
        .send()
        .await?
        .json()
        .await?;

    let time: ServerTime = envelope
        .first()
        .ok_or_else(|| anyhow!("time response carried no data"))?;
    let millis: i64 = time
        .ts
        .parse()
        .with_context(|| format!("unparseable server ts '{}'", time.ts))?;

    Ok(format_epoch_millis(millis))
}

fn format_epoch_millis(millis: i64) -> String {
    format!("{:.3}", millis as f64 / 1000.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_is_deterministic_base64() {
        let signer = Signer::new("top-secret").unwrap();
        let a = signer.sign("1700000000.000", "POST", "/api/v5/trade/order", "{}");
        let b = signer.sign("1700000000.000", "POST", "/api/v5/trade/order", "{}");
        assert_eq!(a, b);

        // SHA-256 digest is 32 bytes; standard base64 of that is 44 chars.
        assert_eq!(a.len(), 44);
        assert!(a.ends_with('='));
    }

    #[test]
    fn signature_depends_on_every_prehash_part() {
        let signer = Signer::new("top-secret").unwrap();
        let base = signer.sign("1700000000.000", "GET", "/api/v5/account/balance", "");
        assert_ne!(
            base,
            signer.sign("1700000000.001", "GET", "/api/v5/account/balance", "")
        );
        assert_ne!(
            base,
            signer.sign("1700000000.000", "POST", "/api/v5/account/balance", "")
        );
        assert_ne!(
            base,
            signer.sign("1700000000.000", "GET", "/api/v5/asset/balances", "")
        );
        assert_ne!(
            base,
            signer.sign("1700000000.000", "GET", "/api/v5/account/balance", "{}")
        );
    }

    #[test]
    fn epoch_millis_format_keeps_three_fraction_digits() {
        assert_eq!(format_epoch_millis(1_700_000_000_000), "1700000000.000");
        assert_eq!(format_epoch_millis(1_700_000_000_123), "1700000000.123");
        let local = local_timestamp();
        let fraction = local.split('.').nth(1).unwrap();
        assert_eq!(fraction.len(), 3);
    }

    #[tokio::test]
    async fn unreachable_server_falls_back_to_local_clock() {
        let http = Client::new();
        let ts = server_timestamp(&http, "http://127.0.0.1:1").await;
        assert_eq!(ts.split('.').nth(1).map(str::len), Some(3));
    }
}
