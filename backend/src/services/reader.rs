use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

use crate::error::RpcError;
use crate::services::bitcoin_rpc::{NodeRpc, RawTransactionInfo};
use crate::services::payload::{decode_bytes, op_return_data};

/// One OP_RETURN output read back from the chain.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OpReturnRecord {
    pub txid: String,
    pub vout: u32,
    pub block_hash: Option<String>,
    pub block_time: Option<String>,
    pub hex: String,
    pub text: String,
    pub is_utf8: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct BlockRecords {
    pub block_hash: String,
    pub transactions_scanned: usize,
    pub records: Vec<OpReturnRecord>,
}

pub struct OpReturnReader {
    node: Arc<dyn NodeRpc>,
}

impl OpReturnReader {
    pub fn new(node: Arc<dyn NodeRpc>) -> Self {
        Self { node }
    }

    pub async fn read_txids(
        &self,
        txids: &[String],
        utf8_only: bool,
    ) -> Result<Vec<OpReturnRecord>, RpcError> {
        let mut records = Vec::new();
        for txid in txids {
            let tx = self.node.get_raw_transaction(txid).await?;
            records.extend(
                extract_records(&tx)
                    .into_iter()
                    .filter(|record| !utf8_only || record.is_utf8),
            );
        }

        tracing::info!(
            "Read {} OP_RETURN records from {} transactions",
            records.len(),
            txids.len()
        );
        Ok(records)
    }

    pub async fn read_block_hash(
        &self,
        block_hash: &str,
        utf8_only: bool,
    ) -> Result<BlockRecords, RpcError> {
        let block = self.node.get_block(block_hash).await?;
        tracing::info!(
            "Scanning {} transactions of block {}",
            block.tx.len(),
            block.hash
        );

        let records = self.read_txids(&block.tx, utf8_only).await?;
        Ok(BlockRecords {
            block_hash: block.hash,
            transactions_scanned: block.tx.len(),
            records,
        })
    }

    pub async fn read_block_height(
        &self,
        height: u64,
        utf8_only: bool,
    ) -> Result<BlockRecords, RpcError> {
        let block_hash = self.node.get_block_hash(height).await?;
        self.read_block_hash(&block_hash, utf8_only).await
    }
}

fn format_block_time(timestamp: i64) -> Option<String> {
    DateTime::<Utc>::from_timestamp(timestamp, 0).map(|time| time.to_rfc3339())
}

pub fn extract_records(tx: &RawTransactionInfo) -> Vec<OpReturnRecord> {
    tx.vout
        .iter()
        .filter_map(|output| {
            let data = op_return_data(&output.script_pub_key.hex)?;
            let decoded = decode_bytes(&data);
            Some(OpReturnRecord {
                txid: tx.txid.clone(),
                vout: output.n,
                block_hash: tx.blockhash.clone(),
                block_time: tx.blocktime.and_then(format_block_time),
                hex: hex::encode(&data),
                text: decoded.text,
                is_utf8: decoded.is_utf8,
            })
        })
        .collect()
}
