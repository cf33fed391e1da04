use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::error::OracleError;
use crate::models::transaction::{FeeRatePolicy, SpeedTier};

pub const DEFAULT_ORACLE_URL: &str = "https://mempool.space/api/v1/fees/recommended";
pub const DEFAULT_ORACLE_TIMEOUT: Duration = Duration::from_millis(1300);

/// The five readings published by a mempool.space style fee endpoint, in sat/vB.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecommendedFees {
    pub fastest_fee: f64,
    pub half_hour_fee: f64,
    pub hour_fee: f64,
    pub economy_fee: f64,
    pub minimum_fee: f64,
}

impl RecommendedFees {
    // a stalled oracle reports the same value across the whole range
    fn is_flatlined(&self) -> bool {
        self.fastest_fee == self.minimum_fee && self.fastest_fee > 1.0
    }

    pub fn rate_for(&self, tier: Option<SpeedTier>) -> f64 {
        match tier {
            Some(SpeedTier::Minimum) => self.minimum_fee,
            Some(SpeedTier::Economy) => self.economy_fee,
            Some(SpeedTier::EconomyHour) => (self.economy_fee + self.hour_fee) / 2.0,
            Some(SpeedTier::Hour) => self.hour_fee,
            Some(SpeedTier::HourHalfHour) => (self.half_hour_fee + self.hour_fee) / 2.0,
            Some(SpeedTier::HalfHour) | None => self.half_hour_fee,
            Some(SpeedTier::HalfHourFastest) => (self.fastest_fee + self.half_hour_fee) / 2.0,
            Some(SpeedTier::Fastest) => self.fastest_fee,
        }
    }
}

#[async_trait]
pub trait FeeOracle: Send + Sync {
    async fn recommended_fees(&self) -> Result<RecommendedFees, OracleError>;
}

pub struct MempoolSpaceOracle {
    http_client: reqwest::Client,
    url: String,
}

impl MempoolSpaceOracle {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, OracleError> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| OracleError::Transport(e.to_string()))?;

        Ok(Self {
            http_client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl FeeOracle for MempoolSpaceOracle {
    async fn recommended_fees(&self) -> Result<RecommendedFees, OracleError> {
        let response = self
            .http_client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| OracleError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            return Err(OracleError::Status(response.status().as_u16()));
        }

        response
            .json::<RecommendedFees>()
            .await
            .map_err(|e| OracleError::Decode(e.to_string()))
    }
}

/// Where a resolved rate came from.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RateSource {
    Oracle,
    Fallback,
}

#[derive(Debug, Clone, Serialize)]
pub struct TierRate {
    pub tier: u8,
    pub sat_per_vb: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct FeeEstimates {
    pub source: RateSource,
    pub readings: Option<RecommendedFees>,
    /// Rate for the configured tier (half-hour when none is configured).
    pub configured_rate: f64,
    pub tiers: Vec<TierRate>,
    pub timestamp: i64,
}

pub struct FeeEstimator {
    oracle: Arc<dyn FeeOracle>,
    fallback_rate: f64,
}

impl FeeEstimator {
    pub fn new(oracle: Arc<dyn FeeOracle>, fallback_rate: f64) -> Self {
        Self {
            oracle,
            fallback_rate,
        }
    }

    /// Trusted oracle readings, or `None` when the fallback rate must be used.
    async fn fetch_readings(&self) -> Option<RecommendedFees> {
        match self.oracle.recommended_fees().await {
            Ok(fees) if fees.is_flatlined() => {
                tracing::warn!(
                    "Fee oracle reports a flat series ({} sat/vB), using fallback {} sat/vB",
                    fees.fastest_fee,
                    self.fallback_rate
                );
                None
            }
            Ok(fees) => {
                tracing::debug!("Fee oracle readings: {:?}", fees);
                Some(fees)
            }
            Err(e) => {
                tracing::warn!(
                    "Fee oracle unavailable ({}), using fallback {} sat/vB",
                    e,
                    self.fallback_rate
                );
                None
            }
        }
    }

    /// Concrete sat/vB for the policy. Makes exactly one oracle call.
    pub async fn resolve_rate(&self, policy: &FeeRatePolicy) -> f64 {
        let raw = match self.fetch_readings().await {
            Some(fees) => fees.rate_for(policy.speed_tier),
            None => self.fallback_rate,
        };
        let rate = policy.clamp(raw);

        tracing::info!(
            "Fee rate for tier {:?}: {} sat/vB (raw {}, bounds {}..={})",
            policy.speed_tier.map(SpeedTier::level),
            rate,
            raw,
            policy.min_rate,
            policy.max_rate
        );

        rate
    }

    pub async fn get_fee_estimates(&self, policy: &FeeRatePolicy) -> FeeEstimates {
        let readings = self.fetch_readings().await;
        let rate_for = |tier: Option<SpeedTier>| {
            policy.clamp(readings.map_or(self.fallback_rate, |fees| fees.rate_for(tier)))
        };

        FeeEstimates {
            source: if readings.is_some() {
                RateSource::Oracle
            } else {
                RateSource::Fallback
            },
            readings,
            configured_rate: rate_for(policy.speed_tier),
            tiers: SpeedTier::ALL
                .iter()
                .map(|tier| TierRate {
                    tier: tier.level(),
                    sat_per_vb: rate_for(Some(*tier)),
                })
                .collect(),
            timestamp: chrono::Utc::now().timestamp(),
        }
    }
}
