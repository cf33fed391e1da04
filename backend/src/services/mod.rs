pub mod bitcoin_rpc;
pub mod onchain;
pub mod payload;
pub mod reader;

use anyhow::{Context, Result};
use std::sync::Arc;

use crate::config::AppConfig;
use bitcoin_rpc::BitcoindRpc;
use onchain::{MempoolSpaceOracle, OnChainPaymentService};
use reader::OpReturnReader;

/// Long-lived services shared by every request. Runs themselves share nothing.
pub struct AppServices {
    pub onchain: Arc<OnChainPaymentService>,
    pub reader: Arc<OpReturnReader>,
}

impl AppServices {
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let node = Arc::new(
            BitcoindRpc::new(config.rpc.clone()).context("Failed to build node RPC client")?,
        );
        let oracle = Arc::new(
            MempoolSpaceOracle::new(config.fee_oracle_url.clone(), config.fee_oracle_timeout)
                .context("Failed to build fee oracle client")?,
        );

        tracing::info!(
            "Using node at {} and fee oracle {} (timeout {:?})",
            config.rpc.url(),
            config.fee_oracle_url,
            config.fee_oracle_timeout
        );

        Ok(Self {
            onchain: Arc::new(OnChainPaymentService::new(
                node.clone(),
                oracle,
                config.fallback_fee_rate,
                config.funding.clone(),
            )),
            reader: Arc::new(OpReturnReader::new(node)),
        })
    }
}
