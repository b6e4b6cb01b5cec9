//! Wallet subsystem configuration, read from the environment.

use std::str::FromStr;

use thiserror::Error;

use consult_core::Currency;

pub const DEFAULT_PAGE_SIZE: u32 = 20;
pub const MAX_PAGE_SIZE: u32 = 100;
pub const CONFLICT_RETRIES: u32 = 3;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("invalid value for {key}: '{value}' ({reason})")]
pub struct ConfigError {
    pub key: &'static str,
    pub value: String,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WalletConfig {
    /// Currency of wallets opened implicitly (by anything but a credit).
    pub default_currency: Currency,
    pub default_page_size: u32,
    pub max_page_size: u32,
    /// Extra attempts after a concurrent-modification conflict.
    pub conflict_retries: u32,
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            default_currency: Currency::Usd,
            default_page_size: DEFAULT_PAGE_SIZE,
            max_page_size: MAX_PAGE_SIZE,
            conflict_retries: CONFLICT_RETRIES,
        }
    }
}

impl WalletConfig {
    /// `WALLET_DEFAULT_CURRENCY`, `WALLET_MAX_PAGE_SIZE`, `WALLET_CONFLICT_RETRIES`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(raw) = lookup("WALLET_DEFAULT_CURRENCY") {
            config.default_currency = Currency::from_str(&raw).map_err(|e| ConfigError {
                key: "WALLET_DEFAULT_CURRENCY",
                value: raw.clone(),
                reason: e.to_string(),
            })?;
        }
        if let Some(max) = parse_u32(&lookup, "WALLET_MAX_PAGE_SIZE")? {
            if max == 0 {
                return Err(ConfigError {
                    key: "WALLET_MAX_PAGE_SIZE",
                    value: max.to_string(),
                    reason: "must be at least 1".into(),
                });
            }
            config.max_page_size = max;
            config.default_page_size = config.default_page_size.min(max);
        }
        if let Some(retries) = parse_u32(&lookup, "WALLET_CONFLICT_RETRIES")? {
            config.conflict_retries = retries;
        }
        Ok(config)
    }
}

fn parse_u32(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<Option<u32>, ConfigError> {
    lookup(key)
        .map(|raw| {
            raw.trim().parse::<u32>().map_err(|e| ConfigError {
                key,
                value: raw.clone(),
                reason: e.to_string(),
            })
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = WalletConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, WalletConfig::default());
        assert_eq!(config.default_page_size, 20);
        assert_eq!(config.max_page_size, 100);
    }

    #[test]
    fn overrides_are_parsed() {
        let config = WalletConfig::from_lookup(lookup(&[
            ("WALLET_DEFAULT_CURRENCY", "inr"),
            ("WALLET_MAX_PAGE_SIZE", "10"),
            ("WALLET_CONFLICT_RETRIES", "0"),
        ]))
        .unwrap();
        assert_eq!(config.default_currency, Currency::Inr);
        assert_eq!(config.max_page_size, 10);
        assert_eq!(config.default_page_size, 10);
        assert_eq!(config.conflict_retries, 0);
    }

    #[test]
    fn garbage_is_rejected() {
        let err = WalletConfig::from_lookup(lookup(&[("WALLET_MAX_PAGE_SIZE", "lots")])).unwrap_err();
        assert_eq!(err.key, "WALLET_MAX_PAGE_SIZE");
        assert!(WalletConfig::from_lookup(lookup(&[("WALLET_DEFAULT_CURRENCY", "XXX")])).is_err());
    }
}
