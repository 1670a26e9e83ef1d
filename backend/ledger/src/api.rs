//! Axum REST API handlers.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use base64::Engine;
use earmark_protocol::{Beneficiary, BeneficiaryId, Error, LedgerEntry, Proof};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::errors::LedgerError;
use crate::reviewer::Reviewer;
use crate::service::LedgerService;
use crate::summary::Summary;

#[derive(Clone)]
pub struct ApiState {
    pub service: Arc<LedgerService>,
    pub reviewer: Option<Reviewer>,
}

pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/beneficiaries", get(list_beneficiaries).post(add_beneficiary))
        .route("/beneficiaries/:id", get(get_beneficiary))
        .route("/beneficiaries/:id/donations", post(donate))
        .route("/beneficiaries/:id/proofs", post(submit_proof))
        .route("/beneficiaries/:id/release", post(evaluate_release))
        .route("/proofs", get(list_proofs))
        .route("/proofs/:hash", get(get_proof))
        .route("/proofs/:hash/verify", post(verify_proof))
        .route("/proofs/:hash/reject", post(reject_proof))
        .route("/ledger", get(list_ledger))
        .route("/ledger/export.csv", get(export_ledger_csv))
        .route("/summary", get(summary))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ─────────────────────────────────────────────────────────
// Request / response shapes
// ─────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct NewBeneficiaryRequest {
    pub name: String,
    pub need: Decimal,
    #[serde(default)]
    pub story: String,
}

#[derive(Deserialize)]
pub struct DonationRequest {
    pub amount: Decimal,
}

#[derive(Deserialize)]
pub struct ProofRequest {
    pub filename: String,
    /// Raw proof bytes, standard base64.
    pub content_base64: String,
}

#[derive(Deserialize, Default, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LedgerOrder {
    #[default]
    Oldest,
    Newest,
}

#[derive(Deserialize)]
pub struct LedgerQuery {
    #[serde(default)]
    pub order: LedgerOrder,
}

#[derive(Serialize)]
pub struct BeneficiariesResponse {
    pub count: usize,
    pub beneficiaries: Vec<Beneficiary>,
}

#[derive(Serialize)]
pub struct BeneficiaryResponse {
    pub beneficiary: Beneficiary,
    pub entries: Vec<LedgerEntry>,
}

#[derive(Serialize)]
pub struct DonationResponse {
    pub entry: LedgerEntry,
    pub beneficiary: Beneficiary,
}

#[derive(Serialize)]
pub struct ProofSubmittedResponse {
    pub proof: Proof,
    /// Seconds until automatic review, when enabled.
    pub review_in_secs: Option<u64>,
}

#[derive(Serialize)]
pub struct ProofResponse {
    pub proof: Proof,
    pub beneficiary: Beneficiary,
}

#[derive(Serialize)]
pub struct ProofDetailResponse {
    pub proof: Proof,
    /// Stored bytes still hash to `proof.hash`.
    pub blob_intact: bool,
}

#[derive(Serialize)]
pub struct ProofsResponse {
    pub count: usize,
    pub proofs: Vec<Proof>,
}

#[derive(Serialize)]
pub struct ReleaseResponse {
    pub entries: Vec<LedgerEntry>,
    pub beneficiary: Beneficiary,
}

#[derive(Serialize)]
pub struct LedgerResponse {
    pub count: usize,
    pub entries: Vec<LedgerEntry>,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl IntoResponse for LedgerError {
    fn into_response(self) -> Response {
        let status = match self.protocol() {
            Some(Error::Validation(_)) => StatusCode::BAD_REQUEST,
            Some(Error::NotFound(_)) => StatusCode::NOT_FOUND,
            Some(Error::PreconditionFailed(_)) | Some(Error::InvalidState { .. }) => {
                StatusCode::CONFLICT
            }
            None if self.is_storage() => StatusCode::SERVICE_UNAVAILABLE,
            None => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            warn!("Request failed: {self}");
        }
        (
            status,
            Json(ErrorResponse {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}

type ApiResult<T> = Result<T, LedgerError>;

// ─────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────

/// `GET /health`
pub async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// `GET /beneficiaries`
pub async fn list_beneficiaries(
    State(state): State<Arc<ApiState>>,
) -> ApiResult<Json<BeneficiariesResponse>> {
    let beneficiaries = state.service.list_beneficiaries().await?;
    Ok(Json(BeneficiariesResponse {
        count: beneficiaries.len(),
        beneficiaries,
    }))
}

/// `POST /beneficiaries`
pub async fn add_beneficiary(
    State(state): State<Arc<ApiState>>,
    Json(req): Json<NewBeneficiaryRequest>,
) -> ApiResult<impl IntoResponse> {
    let beneficiary = state
        .service
        .add_beneficiary(&req.name, req.need, &req.story)
        .await?;
    Ok((StatusCode::CREATED, Json(beneficiary)))
}

/// `GET /beneficiaries/:id`
///
/// The snapshot plus this beneficiary's ledger history.
pub async fn get_beneficiary(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<BeneficiaryId>,
) -> ApiResult<Json<BeneficiaryResponse>> {
    let beneficiary = state.service.get_beneficiary(id).await?;
    let entries = state.service.beneficiary_ledger(id).await?;
    Ok(Json(BeneficiaryResponse {
        beneficiary,
        entries,
    }))
}

/// `POST /beneficiaries/:id/donations`
pub async fn donate(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<BeneficiaryId>,
    Json(req): Json<DonationRequest>,
) -> ApiResult<impl IntoResponse> {
    let entry = state.service.donate(id, req.amount).await?;
    let beneficiary = state.service.get_beneficiary(id).await?;
    Ok((
        StatusCode::CREATED,
        Json(DonationResponse { entry, beneficiary }),
    ))
}

/// `POST /beneficiaries/:id/proofs`
pub async fn submit_proof(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<BeneficiaryId>,
    Json(req): Json<ProofRequest>,
) -> ApiResult<impl IntoResponse> {
    let content = base64::engine::general_purpose::STANDARD
        .decode(req.content_base64.trim())
        .map_err(|e| Error::Validation(format!("content_base64 is not valid base64: {e}")))?;

    let proof = state.service.submit_proof(id, &req.filename, &content).await?;

    let review_in_secs = state.reviewer.as_ref().map(|reviewer| {
        reviewer.schedule(proof.hash.clone());
        reviewer.delay().as_secs()
    });

    Ok((
        StatusCode::CREATED,
        Json(ProofSubmittedResponse {
            proof,
            review_in_secs,
        }),
    ))
}

/// `POST /beneficiaries/:id/release`
///
/// Re-run release evaluation. A no-op once released.
pub async fn evaluate_release(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<BeneficiaryId>,
) -> ApiResult<Json<ReleaseResponse>> {
    let entries = state.service.evaluate_release(id).await?;
    let beneficiary = state.service.get_beneficiary(id).await?;
    Ok(Json(ReleaseResponse {
        entries,
        beneficiary,
    }))
}

/// `GET /proofs`
pub async fn list_proofs(State(state): State<Arc<ApiState>>) -> ApiResult<Json<ProofsResponse>> {
    let proofs = state.service.list_proofs().await?;
    Ok(Json(ProofsResponse {
        count: proofs.len(),
        proofs,
    }))
}

/// `GET /proofs/:hash`
pub async fn get_proof(
    State(state): State<Arc<ApiState>>,
    Path(hash): Path<String>,
) -> ApiResult<Json<ProofDetailResponse>> {
    let proof = state.service.get_proof(&hash).await?;
    let blob_intact = state.service.verify_blob(&hash).await?;
    Ok(Json(ProofDetailResponse { proof, blob_intact }))
}

/// `POST /proofs/:hash/verify`
pub async fn verify_proof(
    State(state): State<Arc<ApiState>>,
    Path(hash): Path<String>,
) -> ApiResult<Json<ProofResponse>> {
    let proof = state.service.verify_proof(&hash).await?;
    let beneficiary = state.service.get_beneficiary(proof.beneficiary_id).await?;
    Ok(Json(ProofResponse { proof, beneficiary }))
}

/// `POST /proofs/:hash/reject`
pub async fn reject_proof(
    State(state): State<Arc<ApiState>>,
    Path(hash): Path<String>,
) -> ApiResult<Json<ProofResponse>> {
    let proof = state.service.reject_proof(&hash).await?;
    let beneficiary = state.service.get_beneficiary(proof.beneficiary_id).await?;
    Ok(Json(ProofResponse { proof, beneficiary }))
}

/// `GET /ledger`
///
/// Append order by default; `?order=newest` reverses it.
pub async fn list_ledger(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<LedgerQuery>,
) -> ApiResult<Json<LedgerResponse>> {
    let mut entries = state.service.list_ledger().await?;
    if query.order == LedgerOrder::Newest {
        entries.reverse();
    }
    Ok(Json(LedgerResponse {
        count: entries.len(),
        entries,
    }))
}

/// `GET /ledger/export.csv`
pub async fn export_ledger_csv(State(state): State<Arc<ApiState>>) -> ApiResult<impl IntoResponse> {
    let csv = state.service.export_ledger_csv().await?;
    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8"),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"earmark_ledger.csv\"",
            ),
        ],
        csv,
    ))
}

/// `GET /summary`
pub async fn summary(State(state): State<Arc<ApiState>>) -> ApiResult<Json<Summary>> {
    Ok(Json(state.service.summary().await?))
}
