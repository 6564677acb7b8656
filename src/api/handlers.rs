//! REST API handlers for ledger operations

use crate::api::websocket::{WsBroadcaster, WsEvent};
use crate::core::{
    Block, ChainViolation, LedgerError, LedgerStats, ProductEntry, ProductRegistration, Record,
    RecordError, SharedLedger, ValidationResult,
};
use crate::crypto::ManufacturerInfo;
use crate::mining::{MiningError, MiningStats};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// Shared application state for API handlers
#[derive(Clone)]
pub struct ApiState {
    pub ledger: SharedLedger,
    pub ws_broadcaster: Arc<WsBroadcaster>,
    /// Mine in the background after every registration
    pub auto_mine: bool,
    /// Serializes mining rounds started by this server
    pub mining_lock: Arc<Mutex<()>>,
}

impl ApiState {
    pub fn new(ledger: SharedLedger, auto_mine: bool) -> Self {
        Self {
            ledger,
            ws_broadcaster: Arc::new(WsBroadcaster::new()),
            auto_mine,
            mining_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Mine everything pending and announce the block
    async fn mine(
        &self,
        difficulty: Option<usize>,
        cancel: &CancellationToken,
    ) -> Result<(Block, MiningStats), LedgerError> {
        let _round = self.mining_lock.lock().await;
        let (block, stats) = self.ledger.mine_pending(difficulty, cancel).await?;

        self.ws_broadcaster.broadcast(WsEvent::BlockMined {
            block: BlockInfo::from(&block),
            time_ms: stats.time_ms,
            attempts: stats.hash_attempts,
        });
        Ok((block, stats))
    }
}

type ApiFailure = (StatusCode, Json<ApiError>);

// ============================================================================
// Response Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub blocks: usize,
}

#[derive(Clone, Debug, Serialize)]
pub struct BlockInfo {
    pub index: u64,
    pub hash: String,
    pub previous_hash: String,
    pub merkle_root: String,
    pub timestamp: i64,
    pub nonce: u64,
    pub records: usize,
}

impl From<&Block> for BlockInfo {
    fn from(block: &Block) -> Self {
        Self {
            index: block.index,
            hash: block.hash.clone(),
            previous_hash: block.previous_hash.clone(),
            merkle_root: block.merkle_root.clone(),
            timestamp: block.timestamp,
            nonce: block.nonce,
            records: block.record_count(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub record_id: String,
    pub product_id: String,
    pub manufacturer: String,
    /// The record waits in the pending pool until the next block
    pub pending: bool,
    pub auto_mine: bool,
}

#[derive(Debug, Serialize)]
pub struct VerifyResponse {
    pub found: bool,
    pub product_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record: Option<Record>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_index: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confirmations: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct ChainResponse {
    pub blocks: Vec<Block>,
    pub stats: LedgerStats,
}

#[derive(Debug, Serialize)]
pub struct MineResponse {
    pub block: BlockInfo,
    pub time_ms: u128,
    pub attempts: u64,
    pub hash_rate: f64,
}

#[derive(Debug, Serialize)]
pub struct PendingResponse {
    pub pending_records: usize,
    pub records: Vec<Record>,
}

#[derive(Debug, Serialize)]
pub struct ValidationResponse {
    pub valid: bool,
    pub blocks_checked: usize,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub violation: Option<ChainViolation>,
}

impl From<ValidationResult> for ValidationResponse {
    /// On failure `blocks_checked` is the violating index: every block
    /// before it passed.
    fn from(result: ValidationResult) -> Self {
        let message = result.message();
        match result {
            ValidationResult::Valid { blocks_checked } => Self {
                valid: true,
                blocks_checked,
                message,
                violation: None,
            },
            ValidationResult::Invalid(violation) => Self {
                valid: false,
                blocks_checked: usize::try_from(violation.block_index).unwrap_or(usize::MAX),
                message,
                violation: Some(violation),
            },
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
}

// ============================================================================
// Request Types
// ============================================================================

#[derive(Deserialize)]
pub struct RegisterRequest {
    pub product_name: String,
    pub manufacturer: String,
    pub batch_number: String,
    pub manufacture_date: String,
}

impl From<RegisterRequest> for ProductRegistration {
    fn from(req: RegisterRequest) -> Self {
        ProductRegistration::new(
            req.product_name,
            req.manufacturer,
            req.batch_number,
            req.manufacture_date,
        )
    }
}

#[derive(Deserialize, Default)]
pub struct MineRequest {
    /// Defaults to the ledger difficulty
    #[serde(default)]
    pub difficulty: Option<usize>,
}

// ============================================================================
// Error mapping
// ============================================================================

fn error_response(status: StatusCode, error: impl Into<String>) -> ApiFailure {
    (
        status,
        Json(ApiError {
            error: error.into(),
        }),
    )
}

fn ledger_failure(err: LedgerError) -> ApiFailure {
    let status = match &err {
        LedgerError::NoPendingRecords
        | LedgerError::StaleCandidate(_)
        | LedgerError::DuplicateRecord(_) => StatusCode::CONFLICT,
        LedgerError::UnknownManufacturer(_) => StatusCode::NOT_FOUND,
        LedgerError::Record(RecordError::MissingField(_))
        | LedgerError::InvalidDifficulty(_)
        | LedgerError::DifficultyTooLow { .. } => StatusCode::BAD_REQUEST,
        LedgerError::Mining(MiningError::Cancelled { .. })
        | LedgerError::Mining(MiningError::IterationLimit { .. }) => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };

    if status.is_server_error() {
        log::error!("Request failed: {}", err);
    }
    error_response(status, err.to_string())
}

// ============================================================================
// Handlers
// ============================================================================

/// GET /health - Liveness check
pub async fn health_check(State(state): State<ApiState>) -> Json<HealthResponse> {
    let ledger = state.ledger.read().await;
    Json(HealthResponse {
        status: "ok",
        blocks: ledger.chain().len(),
    })
}

/// POST /api/products - Register a product
pub async fn register_product(
    State(state): State<ApiState>,
    Json(req): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<RegisterResponse>), ApiFailure> {
    let record = state
        .ledger
        .submit(req.into())
        .await
        .map_err(ledger_failure)?;

    let pending_records = state.ledger.read().await.pending().len();
    state.ws_broadcaster.broadcast(WsEvent::RecordRegistered {
        record_id: record.record_id.clone(),
        product_id: record.product_id().to_string(),
        manufacturer: record.manufacturer().to_string(),
        pending_records,
    });

    if state.auto_mine {
        let background = state.clone();
        tokio::spawn(async move {
            let cancel = background.ledger.shutdown_token();
            match background.mine(None, &cancel).await {
                Ok(_) | Err(LedgerError::NoPendingRecords) => {}
                Err(e) => log::warn!("Background mining failed: {}", e),
            }
        });
    }

    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            record_id: record.record_id.clone(),
            product_id: record.product_id().to_string(),
            manufacturer: record.manufacturer().to_string(),
            pending: true,
            auto_mine: state.auto_mine,
        }),
    ))
}

/// GET /api/products - All registered products
pub async fn list_products(State(state): State<ApiState>) -> Json<Vec<ProductEntry>> {
    Json(state.ledger.read().await.products())
}

/// GET /api/verify/{product_id} - Authenticity lookup
pub async fn verify_product(
    State(state): State<ApiState>,
    Path(product_id): Path<String>,
) -> Json<VerifyResponse> {
    let ledger = state.ledger.read().await;

    let response = match ledger.find_record(&product_id) {
        Some(location) => VerifyResponse {
            found: true,
            product_id,
            record: Some(location.record.clone()),
            block_index: Some(location.block.index),
            block_hash: Some(location.block.hash.clone()),
            confirmations: Some(location.confirmations),
        },
        None => VerifyResponse {
            found: false,
            product_id,
            record: None,
            block_index: None,
            block_hash: None,
            confirmations: None,
        },
    };
    Json(response)
}

/// GET /api/chain - Full chain export with stats
pub async fn get_chain(State(state): State<ApiState>) -> Json<ChainResponse> {
    let ledger = state.ledger.read().await;
    Json(ChainResponse {
        blocks: ledger.chain().to_vec(),
        stats: ledger.stats(),
    })
}

/// GET /api/chain/blocks/{index} - Get block by index
pub async fn get_block(
    State(state): State<ApiState>,
    Path(index): Path<u64>,
) -> Result<Json<Block>, ApiFailure> {
    let ledger = state.ledger.read().await;
    ledger.get_block(index).cloned().map(Json).ok_or_else(|| {
        error_response(
            StatusCode::NOT_FOUND,
            format!("Block at index {} not found", index),
        )
    })
}

/// GET /api/chain/validate - Validate the whole chain
pub async fn validate_chain(State(state): State<ApiState>) -> Json<ValidationResponse> {
    let result = state.ledger.read().await.validate_chain();
    Json(result.into())
}

/// GET /api/stats - Ledger statistics
pub async fn get_stats(State(state): State<ApiState>) -> Json<LedgerStats> {
    Json(state.ledger.read().await.stats())
}

/// POST /api/mine - Mine all pending records
pub async fn mine_block(
    State(state): State<ApiState>,
    Json(req): Json<MineRequest>,
) -> Result<Json<MineResponse>, ApiFailure> {
    // Abandon the search if the client goes away
    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();

    let (block, stats) = state
        .mine(req.difficulty, &cancel)
        .await
        .map_err(ledger_failure)?;

    Ok(Json(MineResponse {
        block: BlockInfo::from(&block),
        time_ms: stats.time_ms,
        attempts: stats.hash_attempts,
        hash_rate: stats.hash_rate,
    }))
}

/// GET /api/pending - Records waiting for the next block
pub async fn get_pending(State(state): State<ApiState>) -> Json<PendingResponse> {
    let ledger = state.ledger.read().await;
    Json(PendingResponse {
        pending_records: ledger.pending().len(),
        records: ledger.pending().to_vec(),
    })
}

/// GET /api/manufacturers - Registered manufacturers (public keys only)
pub async fn list_manufacturers(State(state): State<ApiState>) -> Json<Vec<ManufacturerInfo>> {
    Json(state.ledger.read().await.manufacturers())
}
