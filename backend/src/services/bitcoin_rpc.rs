use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;

use crate::error::RpcError;

const RPC_REQUEST_ID: &str = "opreturn-backend";

/// One row of `listunspent`. Only the fields selection needs are kept.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ListUnspentEntry {
    pub txid: String,
    pub vout: u32,
    #[serde(default)]
    pub address: Option<String>,
    pub amount: f64,
    pub confirmations: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TxInputRef {
    pub txid: String,
    pub vout: u32,
}

/// Outputs object for `createrawtransaction`: address → BTC, plus optional `data` hex.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawTxOutputs {
    pub payments: BTreeMap<String, f64>,
    pub data: Option<String>,
}

impl RawTxOutputs {
    fn to_json(&self) -> Value {
        let mut outputs = serde_json::Map::new();
        if let Some(data) = &self.data {
            outputs.insert("data".to_string(), Value::String(data.clone()));
        }
        for (address, amount) in &self.payments {
            outputs.insert(address.clone(), json!(amount));
        }
        Value::Object(outputs)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SignedRawTransaction {
    pub hex: String,
    pub complete: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BlockInfo {
    pub hash: String,
    #[serde(default)]
    pub height: Option<u64>,
    pub tx: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ScriptPubKeyInfo {
    #[serde(default)]
    pub asm: String,
    pub hex: String,
    #[serde(rename = "type", default)]
    pub script_type: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TxOutputInfo {
    pub value: f64,
    pub n: u32,
    #[serde(rename = "scriptPubKey")]
    pub script_pub_key: ScriptPubKeyInfo,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TxInputInfo {
    #[serde(default)]
    pub txid: Option<String>,
    #[serde(default)]
    pub vout: Option<u32>,
    #[serde(default)]
    pub coinbase: Option<String>,
}

/// Verbose `getrawtransaction` result.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RawTransactionInfo {
    pub txid: String,
    pub vin: Vec<TxInputInfo>,
    pub vout: Vec<TxOutputInfo>,
    #[serde(default)]
    pub blockhash: Option<String>,
    #[serde(default)]
    pub blocktime: Option<i64>,
}

/// The node operations this service relies on.
#[async_trait]
pub trait NodeRpc: Send + Sync {
    async fn list_unspent(
        &self,
        min_conf: u32,
        max_conf: u32,
        addresses: &[String],
    ) -> Result<Vec<ListUnspentEntry>, RpcError>;

    async fn create_raw_transaction(
        &self,
        inputs: &[TxInputRef],
        outputs: &RawTxOutputs,
    ) -> Result<String, RpcError>;

    async fn dump_private_key(&self, address: &str) -> Result<String, RpcError>;

    async fn sign_raw_transaction_with_key(
        &self,
        raw_tx: &str,
        private_keys: &[String],
    ) -> Result<SignedRawTransaction, RpcError>;

    async fn send_raw_transaction(&self, signed_tx: &str) -> Result<String, RpcError>;

    async fn get_block_hash(&self, height: u64) -> Result<String, RpcError>;

    async fn get_block(&self, hash: &str) -> Result<BlockInfo, RpcError>;

    async fn get_raw_transaction(&self, txid: &str) -> Result<RawTransactionInfo, RpcError>;
}

#[derive(Debug, Clone)]
pub struct RpcSettings {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    /// Wallet name; requests go to `/wallet/<name>` when set.
    pub wallet: Option<String>,
}

impl RpcSettings {
    pub fn url(&self) -> String {
        match &self.wallet {
            Some(wallet) => format!("http://{}:{}/wallet/{}", self.host, self.port, wallet),
            None => format!("http://{}:{}/", self.host, self.port),
        }
    }
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    result: Option<Value>,
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

/// Bitcoin Core JSON-RPC 1.0 over HTTP with basic auth.
pub struct BitcoindRpc {
    http_client: reqwest::Client,
    settings: RpcSettings,
    url: String,
}

impl BitcoindRpc {
    pub fn new(settings: RpcSettings) -> Result<Self, RpcError> {
        let http_client = reqwest::Client::builder()
            .build()
            .map_err(|e| RpcError::Transport {
                method: "client".to_string(),
                message: e.to_string(),
            })?;
        let url = settings.url();

        Ok(Self {
            http_client,
            settings,
            url,
        })
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T, RpcError> {
        let payload = json!({
            "jsonrpc": "1.0",
            "id": RPC_REQUEST_ID,
            "method": method,
            "params": params,
        });

        tracing::debug!("RPC {} -> {}", method, self.url);

        let response = self
            .http_client
            .post(&self.url)
            .basic_auth(&self.settings.user, Some(&self.settings.password))
            .header(reqwest::header::CONTENT_TYPE, "text/plain;")
            .json(&payload)
            .send()
            .await
            .map_err(|e| RpcError::Transport {
                method: method.to_string(),
                message: e.to_string(),
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| RpcError::Transport {
            method: method.to_string(),
            message: e.to_string(),
        })?;

        // bitcoind answers RPC-level errors with a 500 and a JSON error body
        match parse_response(method, &body) {
            Err(RpcError::Decode { .. }) if !status.is_success() => Err(RpcError::Http {
                method: method.to_string(),
                status: status.as_u16(),
                body,
            }),
            other => other,
        }
    }
}

fn parse_response<T: DeserializeOwned>(method: &str, body: &str) -> Result<T, RpcError> {
    let decode_error = |message: String| RpcError::Decode {
        method: method.to_string(),
        message,
    };

    let envelope: JsonRpcResponse =
        serde_json::from_str(body).map_err(|e| decode_error(e.to_string()))?;

    if let Some(error) = envelope.error {
        return Err(RpcError::Node {
            method: method.to_string(),
            code: error.code,
            message: error.message,
        });
    }

    let result = envelope
        .result
        .ok_or_else(|| decode_error("response has neither result nor error".to_string()))?;
    serde_json::from_value(result).map_err(|e| decode_error(e.to_string()))
}

#[async_trait]
impl NodeRpc for BitcoindRpc {
    async fn list_unspent(
        &self,
        min_conf: u32,
        max_conf: u32,
        addresses: &[String],
    ) -> Result<Vec<ListUnspentEntry>, RpcError> {
        self.call("listunspent", json!([min_conf, max_conf, addresses]))
            .await
    }

    async fn create_raw_transaction(
        &self,
        inputs: &[TxInputRef],
        outputs: &RawTxOutputs,
    ) -> Result<String, RpcError> {
        self.call("createrawtransaction", json!([inputs, outputs.to_json()]))
            .await
    }

    async fn dump_private_key(&self, address: &str) -> Result<String, RpcError> {
        self.call("dumpprivkey", json!([address])).await
    }

    async fn sign_raw_transaction_with_key(
        &self,
        raw_tx: &str,
        private_keys: &[String],
    ) -> Result<SignedRawTransaction, RpcError> {
        self.call("signrawtransactionwithkey", json!([raw_tx, private_keys]))
            .await
    }

    async fn send_raw_transaction(&self, signed_tx: &str) -> Result<String, RpcError> {
        self.call("sendrawtransaction", json!([signed_tx])).await
    }

    async fn get_block_hash(&self, height: u64) -> Result<String, RpcError> {
        self.call("getblockhash", json!([height])).await
    }

    async fn get_block(&self, hash: &str) -> Result<BlockInfo, RpcError> {
        self.call("getblock", json!([hash])).await
    }

    async fn get_raw_transaction(&self, txid: &str) -> Result<RawTransactionInfo, RpcError> {
        self.call("getrawtransaction", json!([txid, true])).await
    }
}
