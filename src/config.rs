// src/config.rs

use anyhow::{bail, Result};
use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::env;

/// Runtime settings for the bot. Every field has a default, so an empty
/// `Settings.toml` (or none at all) runs the stock DOGE-USDT profile;
/// `MOONBOT_*` environment variables override individual keys.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    /// OKX instrument id, всегда в форме BASE-QUOTE.
    #[serde(default = "default_pair_inst")]
    pub pair_inst: String,
    /// How much quote currency one entry spends.
    #[serde(default = "default_buy_cost")]
    pub buy_cost: Decimal,
    /// Take-profit multiplier applied to the entry price.
    #[serde(default = "default_tp_mult")]
    pub tp_mult: Decimal,
    /// Stop-loss multiplier; values outside (0, 1) disable the stop.
    #[serde(default = "default_sl_mult")]
    pub sl_mult: Decimal,
    /// Pause between price checks while holding, seconds.
    #[serde(default = "default_check_delay_secs")]
    pub check_delay_secs: f64,
    /// Pause between order status polls, seconds.
    #[serde(default = "default_order_poll_secs")]
    pub order_poll_secs: f64,
    /// How long to wait for a market order to fill before falling back, seconds.
    #[serde(default = "default_fill_timeout_secs")]
    pub fill_timeout_secs: u64,
    /// Signed-call retry budget for timestamp rejections.
    #[serde(default = "default_ts_retries")]
    pub ts_retries: u32,
    /// Backoff between timestamp retries, seconds.
    #[serde(default = "default_ts_backoff_secs")]
    pub ts_backoff_secs: f64,
    /// Consecutive insufficient-funds cycles tolerated before the bot stops.
    #[serde(default = "default_insufficient_limit")]
    pub insufficient_limit: u32,
    /// When set, no order leaves the process; trades are only logged.
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default = "default_rest_url")]
    pub rest_url: String,
    #[serde(default = "default_state_file")]
    pub state_file: String,
    #[serde(default = "default_stop_file")]
    pub stop_file: String,
    #[serde(default = "default_log_file")]
    pub log_file: String,
}

impl AppConfig {
    pub fn new() -> Result<Self, ConfigError> {
        let builder = Config::builder()
            .add_source(File::with_name("Settings").required(false))
            .add_source(Environment::with_prefix("MOONBOT").try_parsing(true));

        let config = builder.build()?;
        let app: AppConfig = config.try_deserialize()?;
        app.validate()?;
        Ok(app)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !self.pair_inst.contains('-') {
            return Err(ConfigError::Message(format!(
                "pair_inst must look like BASE-QUOTE, got '{}'",
                self.pair_inst
            )));
        }
        if self.buy_cost <= Decimal::ZERO {
            return Err(ConfigError::Message(format!(
                "buy_cost must be positive, got {}",
                self.buy_cost
            )));
        }
        Ok(())
    }

    /// Валюта, которую покупаем (левая часть pair_inst).
    pub fn base_ccy(&self) -> &str {
        self.pair_inst
            .split_once('-')
            .map(|(base, _)| base)
            .unwrap_or(&self.pair_inst)
    }

    /// Валюта, которой платим (правая часть pair_inst).
    pub fn quote_ccy(&self) -> &str {
        self.pair_inst
            .split_once('-')
            .map(|(_, quote)| quote)
            .unwrap_or(&self.pair_inst)
    }
}

fn default_pair_inst() -> String {
    "DOGE-USDT".to_string()
}

fn default_buy_cost() -> Decimal {
    Decimal::from(5)
}

fn default_tp_mult() -> Decimal {
    Decimal::new(1005, 3) // 1.005
}

fn default_sl_mult() -> Decimal {
    Decimal::new(995, 3) // 0.995
}

fn default_check_delay_secs() -> f64 {
    2.0
}

fn default_order_poll_secs() -> f64 {
    1.0
}

fn default_fill_timeout_secs() -> u64 {
    12
}

fn default_ts_retries() -> u32 {
    6
}

fn default_ts_backoff_secs() -> f64 {
    0.6
}

fn default_insufficient_limit() -> u32 {
    3
}

fn default_rest_url() -> String {
    "https://www.okx.com".to_string()
}

fn default_state_file() -> String {
    "last_buy.json".to_string()
}

fn default_stop_file() -> String {
    "STOP.txt".to_string()
}

fn default_log_file() -> String {
    "moonbot.log".to_string()
}

/// API credentials, только из окружения. Никогда не попадают в Settings.toml.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub api_key: String,
    pub secret_key: String,
    pub passphrase: String,
}

impl Credentials {
    pub fn from_env() -> Result<Self> {
        let api_key = env::var("OKX_API_KEY").unwrap_or_default();
        let secret_key = env::var("OKX_SECRET_KEY").unwrap_or_default();
        let passphrase = env::var("OKX_PASSPHRASE").unwrap_or_default();

        if api_key.is_empty() || secret_key.is_empty() || passphrase.is_empty() {
            bail!(
                "❌ Missing OKX credentials in environment \
                 (OKX_API_KEY, OKX_SECRET_KEY, OKX_PASSPHRASE)."
            );
        }

        Ok(Self {
            api_key,
            secret_key,
            passphrase,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn defaults_cover_every_field() {
        let cfg: AppConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.pair_inst, "DOGE-USDT");
        assert_eq!(cfg.buy_cost, Decimal::from(5));
        assert_eq!(cfg.tp_mult, Decimal::from_str("1.005").unwrap());
        assert_eq!(cfg.sl_mult, Decimal::from_str("0.995").unwrap());
        assert_eq!(cfg.check_delay_secs, 2.0);
        assert_eq!(cfg.order_poll_secs, 1.0);
        assert_eq!(cfg.fill_timeout_secs, 12);
        assert_eq!(cfg.ts_retries, 6);
        assert_eq!(cfg.ts_backoff_secs, 0.6);
        assert_eq!(cfg.insufficient_limit, 3);
        assert!(!cfg.dry_run);
        assert_eq!(cfg.state_file, "last_buy.json");
        assert_eq!(cfg.stop_file, "STOP.txt");
    }

    #[test]
    fn pair_splits_into_base_and_quote() {
        let cfg: AppConfig = serde_json::from_str(r#"{"pair_inst": "SHIB-USDC"}"#).unwrap();
        assert_eq!(cfg.base_ccy(), "SHIB");
        assert_eq!(cfg.quote_ccy(), "USDC");
    }

    #[test]
    fn validate_rejects_malformed_pair() {
        let cfg: AppConfig = serde_json::from_str(r#"{"pair_inst": "DOGEUSDT"}"#).unwrap();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_rejects_non_positive_budget() {
        let cfg: AppConfig = serde_json::from_str(r#"{"buy_cost": "0"}"#).unwrap();
        assert!(cfg.validate().is_err());
    }
}
