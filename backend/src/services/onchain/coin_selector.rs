use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::SelectionError;
use crate::models::transaction::{
    round_btc, sats_to_btc, FeeRatePolicy, PaymentAmount, PaymentRequests, SelectionResult,
    UnspentOutput,
};

use super::fee_estimator::FeeEstimator;
use super::size_estimator::{estimate_fee, AddressScriptType};
use super::utxo_manager::sort_largest_first;

/// Flat fees at or below this are treated as "no flat fee given".
pub const FLAT_FEE_THRESHOLD: f64 = 0.00000001;

/// Smallest change output the node relays for a P2PKH funding address.
pub const DUST_CHANGE_SATS: f64 = 546.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FeeMode {
    /// Fixed fee in BTC.
    Flat(f64),
    /// Fee derived from the transaction shape at this sat/vB rate.
    Dynamic { sat_per_vb: f64 },
}

/// Everything a selection run needs besides the unspent set.
#[derive(Debug, Clone)]
pub struct SelectionRequest {
    pub payments: PaymentRequests,
    pub required_confirmations: u32,
    pub rate_policy: FeeRatePolicy,
    pub funding_address: String,
    pub flat_fee: Option<f64>,
    /// Whether the transaction carries an OP_RETURN data output.
    pub carries_data: bool,
}

impl SelectionRequest {
    pub fn flat_fee(&self) -> Option<f64> {
        self.flat_fee.filter(|fee| *fee > FLAT_FEE_THRESHOLD)
    }

    fn data_outputs(&self) -> usize {
        usize::from(self.carries_data)
    }
}

pub struct CoinSelector {
    fee_estimator: Arc<FeeEstimator>,
}

impl CoinSelector {
    pub fn new(fee_estimator: Arc<FeeEstimator>) -> Self {
        Self { fee_estimator }
    }

    /// Picks the fee mode (resolving the rate once when dynamic) and selects.
    pub async fn select(
        &self,
        unspents: &[UnspentOutput],
        request: &SelectionRequest,
    ) -> Result<SelectionResult, SelectionError> {
        let mode = match request.flat_fee() {
            Some(fee) => FeeMode::Flat(round_btc(fee)),
            None => FeeMode::Dynamic {
                sat_per_vb: self.fee_estimator.resolve_rate(&request.rate_policy).await,
            },
        };

        select_with_mode(unspents, request, mode)
    }
}

/// Largest-first greedy selection at a known fee mode. Pure.
pub fn select_with_mode(
    unspents: &[UnspentOutput],
    request: &SelectionRequest,
    mode: FeeMode,
) -> Result<SelectionResult, SelectionError> {
    let mut candidates = unspents.to_vec();
    sort_largest_first(&mut candidates);

    let script_type = AddressScriptType::from_address(&request.funding_address);
    let extra = request.payments.fixed_total();
    let outputs = request.data_outputs() + request.payments.len();
    let pays_all = request.payments.remaining_balance_address().is_some();

    let mut selected: Vec<UnspentOutput> = Vec::new();
    let mut sum = 0.0;
    let mut fee = 0.0;
    let mut covered = false;

    for mut utxo in candidates {
        if utxo.confirmations < request.required_confirmations {
            tracing::debug!(
                "Skipping {}:{} with {} confirmations (need {})",
                utxo.txid,
                utxo.vout,
                utxo.confirmations,
                request.required_confirmations
            );
            continue;
        }

        utxo.selected = true;
        sum = round_btc(sum + utxo.amount);
        selected.push(utxo);

        // the remaining balance is only known once every eligible output is in
        if pays_all {
            continue;
        }

        match mode {
            FeeMode::Flat(flat) => {
                fee = flat;
                if sum > round_btc(flat + extra) {
                    covered = true;
                    break;
                }
            }
            FeeMode::Dynamic { sat_per_vb } => {
                let fee_without_change =
                    estimate_fee(selected.len(), outputs, sat_per_vb, script_type);
                let fee_with_change =
                    estimate_fee(selected.len(), outputs + 1, sat_per_vb, script_type);

                if sum == round_btc(fee_without_change + extra) {
                    fee = fee_without_change;
                    covered = true;
                    break;
                }
                fee = fee_with_change;
                if sum >= round_btc(fee_with_change + extra) {
                    covered = true;
                    break;
                }
            }
        }
    }

    if selected.is_empty() {
        return Err(SelectionError::InsufficientFunds {
            accumulated: 0.0,
            fee: 0.0,
            payments: extra,
        });
    }

    if pays_all || matches!(mode, FeeMode::Flat(_)) {
        fee = match mode {
            FeeMode::Flat(flat) => flat,
            FeeMode::Dynamic { sat_per_vb } => {
                estimate_fee(selected.len(), outputs, sat_per_vb, script_type)
            }
        };
        covered = covered || sum >= round_btc(fee + extra);
    }

    if !covered {
        match mode {
            FeeMode::Dynamic { .. } => {
                return Err(SelectionError::InsufficientFunds {
                    accumulated: sum,
                    fee,
                    payments: extra,
                });
            }
            FeeMode::Flat(_) => {
                tracing::warn!(
                    "Flat fee selection short: {} BTC selected for fee {} + payments {}",
                    sum,
                    fee,
                    extra
                );
            }
        }
    }

    let limit_fee_sats = request.rate_policy.limit_fee_sats;
    if let (FeeMode::Dynamic { .. }, Some(limit_sats)) = (mode, limit_fee_sats) {
        let limit = sats_to_btc(limit_sats);
        if fee > limit {
            // change is recomputed from the capped fee; the tx shape is not re-priced
            tracing::warn!("Capping fee {} BTC to limit {} BTC", fee, limit);
            fee = limit;
        }
    }

    let remainder = round_btc(round_btc(sum - fee) - extra);

    let mut payments = BTreeMap::new();
    for (address, amount) in request.payments.iter() {
        match amount {
            PaymentAmount::Fixed(value) => {
                payments.insert(address.clone(), *value);
            }
            PaymentAmount::RemainingBalance if remainder > 0.0 => {
                payments.insert(address.clone(), remainder);
            }
            PaymentAmount::RemainingBalance => {
                tracing::info!("Nothing left for remaining-balance payment to {}", address);
            }
        }
    }

    if !pays_all && remainder > 0.0 && remainder < sats_to_btc(DUST_CHANGE_SATS) {
        tracing::warn!(
            "Change of {} BTC is below the dust limit and will likely be rejected by the node",
            remainder
        );
    }

    tracing::info!(
        "Selected {} unspent outputs totaling {} BTC, fee {} BTC, {} {} BTC",
        selected.len(),
        sum,
        fee,
        if pays_all { "remainder" } else { "change" },
        remainder
    );

    Ok(SelectionResult {
        selected_inputs: selected,
        fee,
        change_or_remainder: remainder,
        payments,
        pays_remaining_balance: pays_all,
        success: covered,
        sat_per_vb: match mode {
            FeeMode::Dynamic { sat_per_vb } => Some(sat_per_vb),
            FeeMode::Flat(_) => None,
        },
    })
}
