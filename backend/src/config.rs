use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigurationError;
use crate::models::transaction::{non_negative_setting, SpeedTier};
use crate::services::bitcoin_rpc::RpcSettings;
use crate::services::onchain::fee_estimator::{DEFAULT_ORACLE_TIMEOUT, DEFAULT_ORACLE_URL};
use crate::services::onchain::FundingSettings;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub rpc: RpcSettings,
    pub funding: FundingSettings,
    pub fallback_fee_rate: f64,
    pub fee_oracle_url: String,
    pub fee_oracle_timeout: Duration,
    pub port: u16,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigurationError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigurationError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let rpc = RpcSettings {
            host: get("BITCOIN_RPC_HOST").unwrap_or_else(|| "127.0.0.1".to_string()),
            port: parse_or(&get, "BITCOIN_RPC_PORT", 8332)?,
            user: get("BITCOIN_RPC_USER").unwrap_or_default(),
            password: get("BITCOIN_RPC_PASSWORD").unwrap_or_default(),
            wallet: get("BITCOIN_RPC_WALLET"),
        };

        let address = get("FUNDING_ADDRESS").ok_or_else(|| ConfigurationError::InvalidSetting {
            key: "FUNDING_ADDRESS".to_string(),
            message: "must be set".to_string(),
        })?;

        let min_rate = non_negative_setting("MIN_FEE_RATE", parse_or(&get, "MIN_FEE_RATE", 1.0)?)?;
        let max_rate = non_negative_setting("MAX_FEE_RATE", parse_or(&get, "MAX_FEE_RATE", 100.0)?)?;
        if min_rate > max_rate {
            return Err(ConfigurationError::FeeRateBounds {
                min: min_rate,
                max: max_rate,
            });
        }

        let funding = FundingSettings {
            address,
            private_key: get("FUNDING_PRIVATE_KEY"),
            required_confirmations: parse_or(&get, "REQUIRED_CONFIRMATIONS", 3)?,
            speed_tier: parse_opt::<SpeedTier, _>(&get, "FEE_SPEED_TIER")?,
            flat_fee: parse_opt(&get, "FLAT_FEE_BTC")?,
            min_rate,
            max_rate,
            limit_fee_sats: parse_opt(&get, "LIMIT_FEE_SATS")?
                .map(|limit| non_negative_setting("LIMIT_FEE_SATS", limit))
                .transpose()?,
        };

        Ok(Self {
            rpc,
            funding,
            fallback_fee_rate: parse_or(&get, "FALLBACK_FEE_RATE", 30.0)?,
            fee_oracle_url: get("FEE_ORACLE_URL").unwrap_or_else(|| DEFAULT_ORACLE_URL.to_string()),
            fee_oracle_timeout: parse_opt::<u64, _>(&get, "FEE_ORACLE_TIMEOUT_MS")?
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_ORACLE_TIMEOUT),
            port: parse_or(&get, "PORT", 3000)?,
        })
    }
}

fn parse_opt<T, G>(get: &G, key: &str) -> Result<Option<T>, ConfigurationError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    get(key)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .map_err(|e| ConfigurationError::InvalidSetting {
                    key: key.to_string(),
                    message: e.to_string(),
                })
        })
        .transpose()
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T, ConfigurationError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    Ok(parse_opt(get, key)?.unwrap_or(default))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<AppConfig, ConfigurationError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config(&[("FUNDING_ADDRESS", "bc1qfunding")]).unwrap();

        assert_eq!(config.rpc.url(), "http://127.0.0.1:8332/");
        assert_eq!(config.funding.required_confirmations, 3);
        assert_eq!(config.funding.speed_tier, None);
        assert_eq!(config.funding.flat_fee, None);
        assert_eq!(config.fallback_fee_rate, 30.0);
        assert_eq!(config.fee_oracle_timeout, Duration::from_millis(1300));
        assert_eq!(config.port, 3000);
    }

    #[test]
    fn test_overrides() {
        let config = config(&[
            ("FUNDING_ADDRESS", "bc1qfunding"),
            ("BITCOIN_RPC_PORT", "18332"),
            ("BITCOIN_RPC_WALLET", "opreturn"),
            ("FEE_SPEED_TIER", "fastest"),
            ("FLAT_FEE_BTC", "0.0001"),
            ("LIMIT_FEE_SATS", "5000"),
            ("FEE_ORACLE_TIMEOUT_MS", "500"),
        ])
        .unwrap();

        assert_eq!(config.rpc.url(), "http://127.0.0.1:18332/wallet/opreturn");
        assert_eq!(config.funding.speed_tier, Some(SpeedTier::Fastest));
        assert_eq!(config.funding.flat_fee, Some(0.0001));
        assert_eq!(config.funding.limit_fee_sats, Some(5000.0));
        assert_eq!(config.fee_oracle_timeout, Duration::from_millis(500));
    }

    #[test]
    fn test_missing_funding_address() {
        let err = config(&[]).unwrap_err();
        assert!(matches!(err, ConfigurationError::InvalidSetting { ref key, .. } if key == "FUNDING_ADDRESS"));
    }

    #[test]
    fn test_negative_fee_settings_are_rejected() {
        for (key, value) in [
            ("LIMIT_FEE_SATS", "-50000"),
            ("MIN_FEE_RATE", "-5"),
            ("MAX_FEE_RATE", "-1"),
            ("MAX_FEE_RATE", "inf"),
            ("LIMIT_FEE_SATS", "NaN"),
        ] {
            let err = config(&[("FUNDING_ADDRESS", "bc1qfunding"), (key, value)]).unwrap_err();
            assert!(
                matches!(err, ConfigurationError::InvalidSetting { key: ref k, .. } if k == key),
                "{}={} gave {:?}",
                key,
                value,
                err
            );
        }

        let config = config(&[("FUNDING_ADDRESS", "bc1qfunding"), ("LIMIT_FEE_SATS", "0")]).unwrap();
        assert_eq!(config.funding.limit_fee_sats, Some(0.0));
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        assert!(config(&[("FUNDING_ADDRESS", "bc1q"), ("PORT", "http")]).is_err());
        assert!(config(&[("FUNDING_ADDRESS", "bc1q"), ("FEE_SPEED_TIER", "9")]).is_err());
        assert_eq!(
            config(&[
                ("FUNDING_ADDRESS", "bc1q"),
                ("MIN_FEE_RATE", "20"),
                ("MAX_FEE_RATE", "10"),
            ])
            .unwrap_err(),
            ConfigurationError::FeeRateBounds {
                min: 20.0,
                max: 10.0
            }
        );
    }
}
