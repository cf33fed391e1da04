use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::{PipelineError, SelectionError, Stage, StageFailure};
use crate::models::transaction::{FeeRatePolicy, PaymentRequests, SelectionResult, SpeedTier};
use crate::services::bitcoin_rpc::{NodeRpc, RawTxOutputs, TxInputRef};
use crate::services::payload::encode_op_return_payload;

use super::coin_selector::{CoinSelector, SelectionRequest};
use super::utxo_manager::UtxoManager;

/// Per-deployment settings for the funding address and fee policy defaults.
#[derive(Debug, Clone)]
pub struct FundingSettings {
    pub address: String,
    pub private_key: Option<String>,
    pub required_confirmations: u32,
    pub speed_tier: Option<SpeedTier>,
    pub flat_fee: Option<f64>,
    pub min_rate: f64,
    pub max_rate: f64,
    pub limit_fee_sats: Option<f64>,
}

/// One run's input. `None` fields fall back to the funding settings.
#[derive(Debug, Clone, Default)]
pub struct BuildRequest {
    pub message: Option<String>,
    pub payments: PaymentRequests,
    pub speed_tier: Option<SpeedTier>,
    pub flat_fee: Option<f64>,
    pub limit_fee_sats: Option<f64>,
    pub private_key: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TransactionPlan {
    pub inputs: Vec<TxInputRef>,
    pub fee: f64,
    pub sat_per_vb: Option<f64>,
    pub outputs: BTreeMap<String, f64>,
    pub payload_hex: Option<String>,
    pub selection: SelectionResult,
}

#[derive(Debug, Clone, Serialize)]
pub struct BroadcastReport {
    pub txid: String,
    pub fee: f64,
    pub sat_per_vb: Option<f64>,
    pub inputs: Vec<TxInputRef>,
    pub outputs: BTreeMap<String, f64>,
    pub payload_hex: Option<String>,
}

pub struct TransactionBuilder {
    node: Arc<dyn NodeRpc>,
    utxo_manager: UtxoManager,
    coin_selector: CoinSelector,
    funding: FundingSettings,
}

impl TransactionBuilder {
    pub fn new(node: Arc<dyn NodeRpc>, coin_selector: CoinSelector, funding: FundingSettings) -> Self {
        Self {
            utxo_manager: UtxoManager::new(node.clone()),
            node,
            coin_selector,
            funding,
        }
    }

    pub fn funding(&self) -> &FundingSettings {
        &self.funding
    }

    fn selection_request(&self, request: &BuildRequest) -> SelectionRequest {
        SelectionRequest {
            payments: request.payments.clone(),
            required_confirmations: self.funding.required_confirmations,
            rate_policy: FeeRatePolicy {
                speed_tier: request.speed_tier.or(self.funding.speed_tier),
                min_rate: self.funding.min_rate,
                max_rate: self.funding.max_rate,
                limit_fee_sats: request.limit_fee_sats.or(self.funding.limit_fee_sats),
            },
            funding_address: self.funding.address.clone(),
            flat_fee: request.flat_fee.or(self.funding.flat_fee),
            carries_data: request.message.is_some(),
        }
    }

    /// ListUnspents → SelectCoins → EncodePayload, without touching the node afterwards.
    pub async fn plan(&self, request: &BuildRequest) -> Result<TransactionPlan, PipelineError> {
        let unspents = self
            .utxo_manager
            .get_unspents(&self.funding.address)
            .await
            .map_err(|e| PipelineError::new(Stage::ListUnspents, e))?;

        let selection = self
            .coin_selector
            .select(&unspents, &self.selection_request(request))
            .await
            .map_err(|e| PipelineError::new(Stage::SelectCoins, e))?;

        if !selection.success {
            return Err(PipelineError::new(
                Stage::SelectCoins,
                SelectionError::InsufficientFunds {
                    accumulated: selection.selected_amount(),
                    fee: selection.fee,
                    payments: request.payments.fixed_total(),
                },
            ));
        }

        let payload_hex = request
            .message
            .as_deref()
            .map(encode_op_return_payload)
            .transpose()
            .map_err(|e| PipelineError::new(Stage::EncodePayload, e))?;

        let inputs = selection
            .selected_inputs
            .iter()
            .map(|utxo| TxInputRef {
                txid: utxo.txid.clone(),
                vout: utxo.vout,
            })
            .collect();

        Ok(TransactionPlan {
            inputs,
            fee: selection.fee,
            sat_per_vb: selection.sat_per_vb,
            outputs: selection.outputs(&self.funding.address),
            payload_hex,
            selection,
        })
    }

    /// Runs every stage in order and stops at the first failure.
    pub async fn build_and_broadcast(
        &self,
        request: &BuildRequest,
    ) -> Result<BroadcastReport, PipelineError> {
        let plan = self.plan(request).await?;

        let raw_outputs = RawTxOutputs {
            payments: plan.outputs.clone(),
            data: plan.payload_hex.clone(),
        };
        let raw_tx = self
            .node
            .create_raw_transaction(&plan.inputs, &raw_outputs)
            .await
            .map_err(|e| PipelineError::new(Stage::BuildRawTransaction, e))?;
        tracing::debug!("Created raw transaction with {} inputs", plan.inputs.len());

        let private_key = match request.private_key.clone().or_else(|| self.funding.private_key.clone()) {
            Some(key) => key,
            None => self
                .node
                .dump_private_key(&self.funding.address)
                .await
                .map_err(|e| PipelineError::new(Stage::ObtainSigningKey, e))?,
        };

        let signed = self
            .node
            .sign_raw_transaction_with_key(&raw_tx, &[private_key])
            .await
            .map_err(|e| PipelineError::new(Stage::SignTransaction, e))?;
        if !signed.complete {
            return Err(PipelineError::new(
                Stage::SignTransaction,
                StageFailure::IncompleteSignature,
            ));
        }

        let txid = self
            .node
            .send_raw_transaction(&signed.hex)
            .await
            .map_err(|e| PipelineError::new(Stage::Broadcast, e))?;

        tracing::info!("Successfully broadcast transaction: {}", txid);

        Ok(BroadcastReport {
            txid,
            fee: plan.fee,
            sat_per_vb: plan.sat_per_vb,
            inputs: plan.inputs,
            outputs: plan.outputs,
            payload_hex: plan.payload_hex,
        })
    }
}
