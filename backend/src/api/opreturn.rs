use axum::{
    extract::{Json, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use bitcoin::{BlockHash, Txid};
use std::str::FromStr;

use super::{error_response, pipeline_status, rpc_status, ApiState};
use crate::models::requests::{
    DecodeRequest, OpReturnRequest, PaymentRequest, PlanRequest, ReadQuery, TxidsRequest,
};
use crate::services::payload::decode_hex_text;

pub async fn write_op_return(
    State(state): State<ApiState>,
    Json(request): Json<OpReturnRequest>,
) -> impl IntoResponse {
    let request = match request.into_build_request() {
        Ok(request) => request,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, e),
    };

    match state.onchain.write_op_return(&request).await {
        Ok(report) => (StatusCode::CREATED, Json(report)).into_response(),
        Err(e) => {
            tracing::error!("Error writing OP_RETURN: {}", e);
            error_response(pipeline_status(&e), e)
        }
    }
}

pub async fn send_payment(
    State(state): State<ApiState>,
    Json(request): Json<PaymentRequest>,
) -> impl IntoResponse {
    let request = match request.into_build_request() {
        Ok(request) => request,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, e),
    };

    match state.onchain.send_payment(&request).await {
        Ok(report) => (StatusCode::CREATED, Json(report)).into_response(),
        Err(e) => {
            tracing::error!("Error sending payment: {}", e);
            error_response(pipeline_status(&e), e)
        }
    }
}

/// Dry run: selection and fee without creating or broadcasting anything.
pub async fn plan_transaction(
    State(state): State<ApiState>,
    Json(request): Json<PlanRequest>,
) -> impl IntoResponse {
    let request = match request.into_build_request() {
        Ok(request) => request,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, e),
    };

    match state.onchain.plan(&request).await {
        Ok(plan) => (StatusCode::OK, Json(plan)).into_response(),
        Err(e) => {
            tracing::warn!("Planning failed: {}", e);
            error_response(pipeline_status(&e), e)
        }
    }
}

pub async fn get_fee_estimates(State(state): State<ApiState>) -> impl IntoResponse {
    let estimates = state.onchain.get_fee_estimates().await;
    (StatusCode::OK, Json(estimates)).into_response()
}

pub async fn read_transaction(
    State(state): State<ApiState>,
    Path(txid): Path<String>,
    Query(query): Query<ReadQuery>,
) -> impl IntoResponse {
    if let Err(e) = Txid::from_str(&txid) {
        return error_response(StatusCode::BAD_REQUEST, format!("invalid txid {}: {}", txid, e));
    }

    match state.reader.read_txids(&[txid], query.utf8_only).await {
        Ok(records) => (StatusCode::OK, Json(records)).into_response(),
        Err(e) => {
            tracing::error!("Error reading transaction: {}", e);
            error_response(rpc_status(&e), e)
        }
    }
}

pub async fn read_transactions(
    State(state): State<ApiState>,
    Json(request): Json<TxidsRequest>,
) -> impl IntoResponse {
    if let Some(bad) = request.txids.iter().find(|txid| Txid::from_str(txid).is_err()) {
        return error_response(StatusCode::BAD_REQUEST, format!("invalid txid {}", bad));
    }

    match state.reader.read_txids(&request.txids, request.utf8_only).await {
        Ok(records) => (StatusCode::OK, Json(records)).into_response(),
        Err(e) => {
            tracing::error!("Error reading transactions: {}", e);
            error_response(rpc_status(&e), e)
        }
    }
}

pub async fn read_block_height(
    State(state): State<ApiState>,
    Path(height): Path<u64>,
    Query(query): Query<ReadQuery>,
) -> impl IntoResponse {
    match state.reader.read_block_height(height, query.utf8_only).await {
        Ok(block) => (StatusCode::OK, Json(block)).into_response(),
        Err(e) => {
            tracing::error!("Error reading block {}: {}", height, e);
            error_response(rpc_status(&e), e)
        }
    }
}

pub async fn read_block_hash(
    State(state): State<ApiState>,
    Path(hash): Path<String>,
    Query(query): Query<ReadQuery>,
) -> impl IntoResponse {
    if let Err(e) = BlockHash::from_str(&hash) {
        return error_response(StatusCode::BAD_REQUEST, format!("invalid block hash {}: {}", hash, e));
    }

    match state.reader.read_block_hash(&hash, query.utf8_only).await {
        Ok(block) => (StatusCode::OK, Json(block)).into_response(),
        Err(e) => {
            tracing::error!("Error reading block {}: {}", hash, e);
            error_response(rpc_status(&e), e)
        }
    }
}

pub async fn decode_payload(Json(request): Json<DecodeRequest>) -> impl IntoResponse {
    match decode_hex_text(&request.hex) {
        Ok(decoded) => (StatusCode::OK, Json(decoded)).into_response(),
        Err(e) => error_response(StatusCode::BAD_REQUEST, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::router;
    use crate::services::bitcoin_rpc::{
        BlockInfo, RawTransactionInfo, ScriptPubKeyInfo, TxOutputInfo,
    };
    use crate::services::onchain::fee_estimator::tests::{readings, StaticOracle};
    use crate::services::onchain::transaction_builder::tests::{
        funding_settings, unspent, FakeNode,
    };
    use crate::services::onchain::OnChainPaymentService;
    use crate::services::reader::OpReturnReader;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use serde_json::Value;
    use std::sync::Arc;
    use tower::ServiceExt;

    const TXID: &str = "4a5e1e4baab89f3a32518a88c31bc87f618f76673e2cc77ab2127b7afdeda33b";
    const BLOCK_HASH: &str = "000000000000000000024bead8df69990852c202db0e0097c1a12ea637d7e96d";

    fn node() -> FakeNode {
        let mut node = FakeNode::with_unspents(vec![
            unspent("small", 0, 0.0001, 10),
            unspent("large", 1, 0.001, 10),
        ]);
        node.transactions.insert(
            TXID.to_string(),
            RawTransactionInfo {
                txid: TXID.to_string(),
                vin: Vec::new(),
                vout: vec![TxOutputInfo {
                    value: 0.0,
                    n: 0,
                    script_pub_key: ScriptPubKeyInfo {
                        asm: String::new(),
                        hex: format!("6a05{}", hex::encode("hello")),
                        script_type: "nulldata".to_string(),
                    },
                }],
                blockhash: Some(BLOCK_HASH.to_string()),
                blocktime: None,
            },
        );
        node.block_hashes.insert(800_000, BLOCK_HASH.to_string());
        node.blocks.insert(
            BLOCK_HASH.to_string(),
            BlockInfo {
                hash: BLOCK_HASH.to_string(),
                height: Some(800_000),
                tx: vec![TXID.to_string()],
            },
        );
        node
    }

    fn app(node: Arc<FakeNode>) -> axum::Router {
        let onchain = OnChainPaymentService::new(
            node.clone(),
            Arc::new(StaticOracle::ok(readings())),
            4.0,
            funding_settings(),
        );
        router(ApiState {
            onchain: Arc::new(onchain),
            reader: Arc::new(OpReturnReader::new(node)),
        })
    }

    async fn send(app: axum::Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_write_op_return_broadcasts() {
        let node = Arc::new(node());
        let (status, body) = send(
            app(node.clone()),
            post_json("/api/opreturn", serde_json::json!({ "message": "hello" })),
        )
        .await;

        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["txid"], "f00d");
        assert_eq!(body["payload_hex"], hex::encode("hello"));
        assert_eq!(node.calls().last(), Some(&"sendrawtransaction"));
    }

    #[tokio::test]
    async fn test_invalid_payments_never_reach_the_node() {
        let node = Arc::new(node());
        let (status, body) = send(
            app(node.clone()),
            post_json(
                "/api/payments",
                serde_json::json!({ "payments": { "bc1qa": -1, "bc1qb": -1 } }),
            ),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("remaining balance"));
        assert!(node.calls().is_empty());
    }

    #[tokio::test]
    async fn test_insufficient_funds_is_unprocessable() {
        let node = Arc::new(node());
        let (status, body) = send(
            app(node.clone()),
            post_json("/api/plan", serde_json::json!({ "payments": { "bc1qdest": 5.0 } })),
        )
        .await;

        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(body["error"].as_str().unwrap().starts_with("select coins failed"));
        assert_eq!(node.calls(), vec!["listunspent"]);
    }

    #[tokio::test]
    async fn test_plan_does_not_broadcast() {
        let node = Arc::new(node());
        let (status, body) = send(
            app(node.clone()),
            post_json("/api/plan", serde_json::json!({ "message": "hello" })),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["inputs"].as_array().unwrap().len(), 1);
        assert_eq!(node.calls(), vec!["listunspent"]);
    }

    #[tokio::test]
    async fn test_fee_estimates() {
        let (status, body) = send(app(Arc::new(node())), get("/api/fee-estimates")).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["source"], "oracle");
        assert_eq!(body["configured_rate"], 30.0);
        assert_eq!(body["tiers"].as_array().unwrap().len(), 8);
    }

    #[tokio::test]
    async fn test_read_transaction() {
        let (status, body) = send(
            app(Arc::new(node())),
            get(&format!("/api/opreturn/tx/{}", TXID)),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body[0]["text"], "hello");
        assert_eq!(body[0]["is_utf8"], true);
    }

    #[tokio::test]
    async fn test_malformed_txid_is_rejected() {
        let node = Arc::new(node());
        let (status, _) = send(app(node.clone()), get("/api/opreturn/tx/nothex")).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(node.calls().is_empty());
    }

    #[tokio::test]
    async fn test_read_block_by_height_and_hash() {
        let (status, body) = send(app(Arc::new(node())), get("/api/opreturn/block/800000")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["transactions_scanned"], 1);
        assert_eq!(body["records"][0]["text"], "hello");

        let (status, _) = send(app(Arc::new(node())), get("/api/opreturn/block/1")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = send(
            app(Arc::new(node())),
            get(&format!("/api/opreturn/blockhash/{}?utf8_only=true", BLOCK_HASH)),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["block_hash"], BLOCK_HASH);
    }

    #[tokio::test]
    async fn test_decode_payload() {
        let (status, body) = send(
            app(Arc::new(node())),
            post_json("/api/payload/decode", serde_json::json!({ "hex": "68656c6c6f" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["text"], "hello");

        let (status, _) = send(
            app(Arc::new(node())),
            post_json("/api/payload/decode", serde_json::json!({ "hex": "zz" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
