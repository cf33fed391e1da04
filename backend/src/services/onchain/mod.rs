pub mod utxo_manager;
pub mod fee_estimator;
pub mod size_estimator;
pub mod coin_selector;
pub mod transaction_builder;

pub use fee_estimator::{FeeEstimates, FeeEstimator, FeeOracle, MempoolSpaceOracle};
pub use coin_selector::CoinSelector;
pub use transaction_builder::{
    BroadcastReport, BuildRequest, FundingSettings, TransactionBuilder, TransactionPlan,
};

use std::sync::Arc;

use crate::error::PipelineError;
use crate::models::transaction::FeeRatePolicy;
use crate::services::bitcoin_rpc::NodeRpc;

pub struct OnChainPaymentService {
    pub fee_estimator: Arc<FeeEstimator>,
    pub transaction_builder: TransactionBuilder,
}

impl OnChainPaymentService {
    pub fn new(
        node: Arc<dyn NodeRpc>,
        oracle: Arc<dyn FeeOracle>,
        fallback_fee_rate: f64,
        funding: FundingSettings,
    ) -> Self {
        let fee_estimator = Arc::new(FeeEstimator::new(oracle, fallback_fee_rate));
        let coin_selector = CoinSelector::new(fee_estimator.clone());
        let transaction_builder = TransactionBuilder::new(node, coin_selector, funding);

        Self {
            fee_estimator,
            transaction_builder,
        }
    }

    /// Writes `request.message` into an OP_RETURN output.
    pub async fn write_op_return(&self, request: &BuildRequest) -> Result<BroadcastReport, PipelineError> {
        tracing::info!(
            "Writing {} byte OP_RETURN payload with {} payments",
            request.message.as_deref().map_or(0, str::len),
            request.payments.len()
        );
        self.transaction_builder.build_and_broadcast(request).await
    }

    pub async fn send_payment(&self, request: &BuildRequest) -> Result<BroadcastReport, PipelineError> {
        tracing::info!("Sending {} payments", request.payments.len());
        self.transaction_builder.build_and_broadcast(request).await
    }

    pub async fn plan(&self, request: &BuildRequest) -> Result<TransactionPlan, PipelineError> {
        self.transaction_builder.plan(request).await
    }

    pub async fn get_fee_estimates(&self) -> FeeEstimates {
        let funding = self.transaction_builder.funding();
        let policy = FeeRatePolicy {
            speed_tier: funding.speed_tier,
            min_rate: funding.min_rate,
            max_rate: funding.max_rate,
            limit_fee_sats: funding.limit_fee_sats,
        };
        self.fee_estimator.get_fee_estimates(&policy).await
    }
}
