use std::sync::Arc;

use crate::error::RpcError;
use crate::models::transaction::{round_btc, UnspentOutput};
use crate::services::bitcoin_rpc::{ListUnspentEntry, NodeRpc};

pub const LIST_UNSPENT_MIN_CONF: u32 = 1;
pub const LIST_UNSPENT_MAX_CONF: u32 = 9_999_999;

impl From<ListUnspentEntry> for UnspentOutput {
    fn from(entry: ListUnspentEntry) -> Self {
        Self {
            txid: entry.txid,
            vout: entry.vout,
            amount: round_btc(entry.amount),
            confirmations: entry.confirmations,
            selected: false,
        }
    }
}

pub struct UtxoManager {
    node: Arc<dyn NodeRpc>,
}

impl UtxoManager {
    pub fn new(node: Arc<dyn NodeRpc>) -> Self {
        Self { node }
    }

    /// Fresh unspent set of `address`, largest first.
    pub async fn get_unspents(&self, address: &str) -> Result<Vec<UnspentOutput>, RpcError> {
        tracing::info!("Looking for unspent outputs at {}", address);

        let entries = self
            .node
            .list_unspent(
                LIST_UNSPENT_MIN_CONF,
                LIST_UNSPENT_MAX_CONF,
                &[address.to_string()],
            )
            .await?;

        let mut unspents: Vec<UnspentOutput> = entries
            .into_iter()
            // a wallet-wide listunspent may ignore the filter on older nodes
            .filter(|entry| entry.address.as_deref().map_or(true, |a| a == address))
            .map(UnspentOutput::from)
            .collect();
        sort_largest_first(&mut unspents);

        tracing::info!(
            "Found {} unspent outputs totaling {} BTC",
            unspents.len(),
            total_amount(&unspents)
        );

        Ok(unspents)
    }
}

/// Stable, so equal amounts keep the node's order.
pub fn sort_largest_first(unspents: &mut [UnspentOutput]) {
    unspents.sort_by(|a, b| b.amount.total_cmp(&a.amount));
}

pub fn total_amount(unspents: &[UnspentOutput]) -> f64 {
    unspents
        .iter()
        .fold(0.0, |acc, utxo| round_btc(acc + utxo.amount))
}
