pub mod opreturn;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;

use crate::error::{PipelineError, RpcError, StageFailure};
use crate::services::onchain::OnChainPaymentService;
use crate::services::reader::OpReturnReader;
use crate::services::AppServices;

#[derive(Clone)]
pub struct ApiState {
    pub onchain: Arc<OnChainPaymentService>,
    pub reader: Arc<OpReturnReader>,
}

impl From<AppServices> for ApiState {
    fn from(services: AppServices) -> Self {
        Self {
            onchain: services.onchain,
            reader: services.reader,
        }
    }
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        // Writing
        .route("/api/opreturn", post(opreturn::write_op_return))
        .route("/api/payments", post(opreturn::send_payment))
        .route("/api/plan", post(opreturn::plan_transaction))
        .route("/api/fee-estimates", get(opreturn::get_fee_estimates))

        // Reading
        .route("/api/opreturn/tx/:txid", get(opreturn::read_transaction))
        .route("/api/opreturn/txids", post(opreturn::read_transactions))
        .route("/api/opreturn/block/:height", get(opreturn::read_block_height))
        .route("/api/opreturn/blockhash/:hash", get(opreturn::read_block_hash))
        .route("/api/payload/decode", post(opreturn::decode_payload))

        .with_state(state)
}

pub(crate) fn error_response(status: StatusCode, message: impl ToString) -> Response {
    (
        status,
        Json(serde_json::json!({
            "error": message.to_string()
        })),
    )
        .into_response()
}

// bitcoind codes for unknown blocks, transactions and out-of-range heights
const RPC_NOT_FOUND_CODES: [i64; 2] = [-5, -8];

pub(crate) fn rpc_status(error: &RpcError) -> StatusCode {
    match error {
        RpcError::Node { code, .. } if RPC_NOT_FOUND_CODES.contains(code) => StatusCode::NOT_FOUND,
        _ => StatusCode::BAD_GATEWAY,
    }
}

pub(crate) fn pipeline_status(error: &PipelineError) -> StatusCode {
    match &error.source {
        StageFailure::Selection(_) => StatusCode::UNPROCESSABLE_ENTITY,
        StageFailure::Payload(_) => StatusCode::BAD_REQUEST,
        StageFailure::Node(_) | StageFailure::IncompleteSignature => StatusCode::BAD_GATEWAY,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{PayloadError, SelectionError, Stage};

    #[test]
    fn test_pipeline_status_mapping() {
        let insufficient = PipelineError::new(
            Stage::SelectCoins,
            SelectionError::InsufficientFunds {
                accumulated: 0.0,
                fee: 0.0,
                payments: 0.1,
            },
        );
        assert_eq!(pipeline_status(&insufficient), StatusCode::UNPROCESSABLE_ENTITY);

        let too_large = PipelineError::new(
            Stage::EncodePayload,
            PayloadError::TooLarge { len: 81, max: 80 },
        );
        assert_eq!(pipeline_status(&too_large), StatusCode::BAD_REQUEST);

        let unsigned = PipelineError::new(Stage::SignTransaction, StageFailure::IncompleteSignature);
        assert_eq!(pipeline_status(&unsigned), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn test_rpc_status_mapping() {
        let missing = RpcError::Node {
            method: "getblock".to_string(),
            code: -5,
            message: "Block not found".to_string(),
        };
        assert_eq!(rpc_status(&missing), StatusCode::NOT_FOUND);

        let down = RpcError::Transport {
            method: "getblock".to_string(),
            message: "connection refused".to_string(),
        };
        assert_eq!(rpc_status(&down), StatusCode::BAD_GATEWAY);
    }
}
