use serde::Deserialize;
use std::collections::BTreeMap;

use crate::error::ConfigurationError;
use crate::models::transaction::{non_negative_setting, PaymentRequests, SpeedTier};
use crate::services::onchain::BuildRequest;

/// Per-request overrides of the configured fee policy.
#[derive(Debug, Default, Deserialize)]
pub struct FeeOverrides {
    pub speed_tier: Option<SpeedTier>,
    pub flat_fee: Option<f64>,
    pub limit_fee_sats: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct OpReturnRequest {
    pub message: String,
    /// Address to BTC amount; `-1` sends whatever is left after fees.
    #[serde(default)]
    pub payments: BTreeMap<String, f64>,
    #[serde(flatten)]
    pub fees: FeeOverrides,
    pub private_key: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PaymentRequest {
    pub payments: BTreeMap<String, f64>,
    #[serde(flatten)]
    pub fees: FeeOverrides,
    pub private_key: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PlanRequest {
    pub message: Option<String>,
    #[serde(default)]
    pub payments: BTreeMap<String, f64>,
    #[serde(flatten)]
    pub fees: FeeOverrides,
}

#[derive(Debug, Deserialize)]
pub struct TxidsRequest {
    pub txids: Vec<String>,
    #[serde(default)]
    pub utf8_only: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct ReadQuery {
    #[serde(default)]
    pub utf8_only: bool,
}

#[derive(Debug, Deserialize)]
pub struct DecodeRequest {
    pub hex: String,
}

fn build_request(
    message: Option<String>,
    payments: &BTreeMap<String, f64>,
    fees: FeeOverrides,
    private_key: Option<String>,
) -> Result<BuildRequest, ConfigurationError> {
    Ok(BuildRequest {
        message,
        payments: PaymentRequests::from_wire(payments)?,
        speed_tier: fees.speed_tier,
        flat_fee: fees.flat_fee,
        limit_fee_sats: fees
            .limit_fee_sats
            .map(|limit| non_negative_setting("limit_fee_sats", limit))
            .transpose()?,
        private_key,
    })
}

impl OpReturnRequest {
    pub fn into_build_request(self) -> Result<BuildRequest, ConfigurationError> {
        build_request(Some(self.message), &self.payments, self.fees, self.private_key)
    }
}

impl PaymentRequest {
    pub fn into_build_request(self) -> Result<BuildRequest, ConfigurationError> {
        if self.payments.is_empty() {
            return Err(ConfigurationError::InvalidSetting {
                key: "payments".to_string(),
                message: "at least one payment is required".to_string(),
            });
        }
        build_request(None, &self.payments, self.fees, self.private_key)
    }
}

impl PlanRequest {
    pub fn into_build_request(self) -> Result<BuildRequest, ConfigurationError> {
        build_request(self.message, &self.payments, self.fees, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::transaction::PaymentAmount;

    #[test]
    fn test_op_return_request_with_overrides() {
        let body = r#"{
            "message": "hello",
            "payments": {"bc1qdest": 0.001, "bc1qrest": -1},
            "speed_tier": 8,
            "limit_fee_sats": 2500
        }"#;
        let request: OpReturnRequest = serde_json::from_str(body).unwrap();
        let build = request.into_build_request().unwrap();

        assert_eq!(build.message.as_deref(), Some("hello"));
        assert_eq!(build.speed_tier, Some(SpeedTier::Fastest));
        assert_eq!(build.limit_fee_sats, Some(2500.0));
        assert_eq!(build.flat_fee, None);
        assert_eq!(build.payments.remaining_balance_address(), Some("bc1qrest"));
        assert_eq!(
            build.payments.iter().next(),
            Some((&"bc1qdest".to_string(), &PaymentAmount::Fixed(0.001)))
        );
    }

    #[test]
    fn test_out_of_range_tier_is_rejected() {
        let body = r#"{"message": "hi", "speed_tier": 9}"#;
        assert!(serde_json::from_str::<OpReturnRequest>(body).is_err());
    }

    #[test]
    fn test_payment_request_needs_a_payment() {
        let request: PaymentRequest = serde_json::from_str(r#"{"payments": {}}"#).unwrap();
        assert!(matches!(
            request.into_build_request(),
            Err(ConfigurationError::InvalidSetting { ref key, .. }) if key == "payments"
        ));
    }

    #[test]
    fn test_negative_fee_cap_is_rejected() {
        let body = r#"{"message": "hi", "limit_fee_sats": -50000}"#;
        let request: OpReturnRequest = serde_json::from_str(body).unwrap();
        assert!(matches!(
            request.into_build_request(),
            Err(ConfigurationError::InvalidSetting { ref key, .. }) if key == "limit_fee_sats"
        ));

        let body = r#"{"limit_fee_sats": 0}"#;
        let request: PlanRequest = serde_json::from_str(body).unwrap();
        assert_eq!(request.into_build_request().unwrap().limit_fee_sats, Some(0.0));
    }

    #[test]
    fn test_two_remaining_balance_entries_are_rejected() {
        let body = r#"{"payments": {"bc1qa": -1, "bc1qb": -1}}"#;
        let request: PaymentRequest = serde_json::from_str(body).unwrap();
        assert!(matches!(
            request.into_build_request(),
            Err(ConfigurationError::MultipleRemainingBalance { .. })
        ));
    }
}
