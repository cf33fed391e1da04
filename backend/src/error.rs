use std::fmt;
use thiserror::Error;

/// Invalid settings or request shape. Always raised before the node is contacted.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigurationError {
    #[error("more than one payment requests the remaining balance: {}", addresses.join(", "))]
    MultipleRemainingBalance { addresses: Vec<String> },

    #[error("invalid payment amount {amount} for {address}")]
    InvalidPaymentAmount { address: String, amount: f64 },

    #[error("payment address must not be empty")]
    EmptyPaymentAddress,

    #[error("invalid value for {key}: {message}")]
    InvalidSetting { key: String, message: String },

    #[error("minimum fee rate {min} sat/vB is above maximum {max} sat/vB")]
    FeeRateBounds { min: f64, max: f64 },
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SelectionError {
    #[error(
        "insufficient funds: accumulated {accumulated:.8} BTC, fee {fee:.8} BTC, payments {payments:.8} BTC"
    )]
    InsufficientFunds {
        accumulated: f64,
        fee: f64,
        payments: f64,
    },
}

/// Failures talking to the node over JSON-RPC.
#[derive(Debug, Clone, Error)]
pub enum RpcError {
    #[error("{method}: transport failure: {message}")]
    Transport { method: String, message: String },

    #[error("{method}: http status {status}: {body}")]
    Http {
        method: String,
        status: u16,
        body: String,
    },

    #[error("{method}: rpc error {code}: {message}")]
    Node {
        method: String,
        code: i64,
        message: String,
    },

    #[error("{method}: failed to decode response: {message}")]
    Decode { method: String, message: String },
}

#[derive(Debug, Clone, Error)]
pub enum OracleError {
    #[error("fee oracle request failed: {0}")]
    Transport(String),

    #[error("fee oracle returned status {0}")]
    Status(u16),

    #[error("failed to decode fee oracle response: {0}")]
    Decode(String),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PayloadError {
    #[error("payload is not valid hex: {0}")]
    InvalidHex(String),

    #[error("payload is {len} bytes, OP_RETURN data is limited to {max} bytes")]
    TooLarge { len: usize, max: usize },
}

/// Stages of a transaction build run, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    ListUnspents,
    SelectCoins,
    EncodePayload,
    BuildRawTransaction,
    ObtainSigningKey,
    SignTransaction,
    Broadcast,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::ListUnspents => "list unspents",
            Stage::SelectCoins => "select coins",
            Stage::EncodePayload => "encode payload",
            Stage::BuildRawTransaction => "build raw transaction",
            Stage::ObtainSigningKey => "obtain signing key",
            Stage::SignTransaction => "sign transaction",
            Stage::Broadcast => "broadcast",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Error)]
pub enum StageFailure {
    #[error(transparent)]
    Selection(#[from] SelectionError),

    #[error(transparent)]
    Node(#[from] RpcError),

    #[error(transparent)]
    Payload(#[from] PayloadError),

    #[error("node returned an incomplete signature set")]
    IncompleteSignature,
}

/// First failure of a run, tagged with the stage it happened in.
#[derive(Debug, Clone, Error)]
#[error("{stage} failed: {source}")]
pub struct PipelineError {
    pub stage: Stage,
    #[source]
    pub source: StageFailure,
}

impl PipelineError {
    pub fn new(stage: Stage, source: impl Into<StageFailure>) -> Self {
        Self {
            stage,
            source: source.into(),
        }
    }
}
