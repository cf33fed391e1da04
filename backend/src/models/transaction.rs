use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::ConfigurationError;

pub const SATS_PER_BTC: f64 = 100_000_000.0;

/// Wire value that marks a payment as "whatever is left after fee and other payments".
pub const REMAINING_BALANCE_SENTINEL: f64 = -1.0;

// every partial sum goes through this, never only the final one
pub fn round_btc(value: f64) -> f64 {
    (value * SATS_PER_BTC).round() / SATS_PER_BTC
}

pub fn sats_to_btc(sats: f64) -> f64 {
    round_btc(sats / SATS_PER_BTC)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnspentOutput {
    pub txid: String,
    pub vout: u32,
    pub amount: f64,
    pub confirmations: u32,
    #[serde(default)]
    pub selected: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PaymentAmount {
    Fixed(f64),
    RemainingBalance,
}

impl PaymentAmount {
    pub fn from_wire(address: &str, amount: f64) -> Result<Self, ConfigurationError> {
        if amount == REMAINING_BALANCE_SENTINEL {
            return Ok(PaymentAmount::RemainingBalance);
        }
        if !amount.is_finite() || amount < 0.0 {
            return Err(ConfigurationError::InvalidPaymentAmount {
                address: address.to_string(),
                amount,
            });
        }
        Ok(PaymentAmount::Fixed(round_btc(amount)))
    }

    pub fn fixed(&self) -> Option<f64> {
        match self {
            PaymentAmount::Fixed(amount) => Some(*amount),
            PaymentAmount::RemainingBalance => None,
        }
    }
}

/// Validated payment map. At most one entry may ask for the remaining balance.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PaymentRequests {
    entries: BTreeMap<String, PaymentAmount>,
}

impl PaymentRequests {
    pub fn new(entries: BTreeMap<String, PaymentAmount>) -> Result<Self, ConfigurationError> {
        if entries.keys().any(|address| address.trim().is_empty()) {
            return Err(ConfigurationError::EmptyPaymentAddress);
        }

        let remaining: Vec<String> = entries
            .iter()
            .filter(|(_, amount)| matches!(amount, PaymentAmount::RemainingBalance))
            .map(|(address, _)| address.clone())
            .collect();
        if remaining.len() > 1 {
            return Err(ConfigurationError::MultipleRemainingBalance {
                addresses: remaining,
            });
        }

        Ok(Self { entries })
    }

    /// Builds from the wire map where `-1` is the remaining-balance sentinel.
    pub fn from_wire(raw: &BTreeMap<String, f64>) -> Result<Self, ConfigurationError> {
        let entries = raw
            .iter()
            .map(|(address, amount)| {
                PaymentAmount::from_wire(address, *amount).map(|parsed| (address.clone(), parsed))
            })
            .collect::<Result<BTreeMap<_, _>, _>>()?;
        Self::new(entries)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &PaymentAmount)> {
        self.entries.iter()
    }

    pub fn remaining_balance_address(&self) -> Option<&str> {
        self.entries
            .iter()
            .find(|(_, amount)| matches!(amount, PaymentAmount::RemainingBalance))
            .map(|(address, _)| address.as_str())
    }

    /// Sum of the fixed amounts, rounded after every addition.
    pub fn fixed_total(&self) -> f64 {
        self.entries
            .values()
            .filter_map(PaymentAmount::fixed)
            .fold(0.0, |acc, amount| round_btc(acc + amount))
    }
}

/// Fee speed levels, slowest to fastest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum SpeedTier {
    Minimum = 1,
    Economy = 2,
    EconomyHour = 3,
    Hour = 4,
    HourHalfHour = 5,
    HalfHour = 6,
    HalfHourFastest = 7,
    Fastest = 8,
}

impl SpeedTier {
    pub const ALL: [SpeedTier; 8] = [
        SpeedTier::Minimum,
        SpeedTier::Economy,
        SpeedTier::EconomyHour,
        SpeedTier::Hour,
        SpeedTier::HourHalfHour,
        SpeedTier::HalfHour,
        SpeedTier::HalfHourFastest,
        SpeedTier::Fastest,
    ];

    pub fn level(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for SpeedTier {
    type Error = ConfigurationError;

    fn try_from(level: u8) -> Result<Self, Self::Error> {
        SpeedTier::ALL
            .get(usize::from(level).wrapping_sub(1))
            .copied()
            .ok_or_else(|| ConfigurationError::InvalidSetting {
                key: "speed_tier".to_string(),
                message: format!("level {} is outside 1..=8", level),
            })
    }
}

impl From<SpeedTier> for u8 {
    fn from(tier: SpeedTier) -> Self {
        tier.level()
    }
}

impl std::str::FromStr for SpeedTier {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(level) = s.trim().parse::<u8>() {
            return SpeedTier::try_from(level);
        }
        match s.trim().to_lowercase().as_str() {
            "minimum" | "min" => Ok(SpeedTier::Minimum),
            "economy" | "slow" | "low" => Ok(SpeedTier::Economy),
            "hour" | "normal" | "medium" => Ok(SpeedTier::Hour),
            "halfhour" | "half_hour" | "fast" | "high" => Ok(SpeedTier::HalfHour),
            "fastest" | "urgent" => Ok(SpeedTier::Fastest),
            other => Err(ConfigurationError::InvalidSetting {
                key: "speed_tier".to_string(),
                message: format!("unknown tier '{}'", other),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FeeRatePolicy {
    pub speed_tier: Option<SpeedTier>,
    pub min_rate: f64,
    pub max_rate: f64,
    pub limit_fee_sats: Option<f64>,
}

impl FeeRatePolicy {
    pub fn clamp(&self, rate: f64) -> f64 {
        rate.max(self.min_rate).min(self.max_rate)
    }
}

/// Fee rates, bounds and caps must be finite and not negative.
pub fn non_negative_setting(key: &str, value: f64) -> Result<f64, ConfigurationError> {
    if !value.is_finite() || value < 0.0 {
        return Err(ConfigurationError::InvalidSetting {
            key: key.to_string(),
            message: format!("{} is not a finite, non-negative number", value),
        });
    }
    Ok(value)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SelectionResult {
    pub selected_inputs: Vec<UnspentOutput>,
    pub fee: f64,
    /// Change back to the funding address, or the remainder paid to the
    /// remaining-balance entry when one is present.
    pub change_or_remainder: f64,
    /// Payments with the remaining-balance entry resolved (or dropped when nothing is left).
    pub payments: BTreeMap<String, f64>,
    pub pays_remaining_balance: bool,
    pub success: bool,
    /// Rate the fee was derived from; `None` for a flat fee.
    pub sat_per_vb: Option<f64>,
}

impl SelectionResult {
    pub fn selected_amount(&self) -> f64 {
        self.selected_inputs
            .iter()
            .fold(0.0, |acc, utxo| round_btc(acc + utxo.amount))
    }

    /// Address → amount map handed to `createrawtransaction`, change included.
    pub fn outputs(&self, funding_address: &str) -> BTreeMap<String, f64> {
        let mut outputs = self.payments.clone();
        if !self.pays_remaining_balance && self.change_or_remainder > 0.0 {
            let entry = outputs.entry(funding_address.to_string()).or_insert(0.0);
            *entry = round_btc(*entry + self.change_or_remainder);
        }
        outputs
    }
}
