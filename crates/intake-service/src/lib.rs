#![deny(unsafe_code)]

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use intake_adapters::{MockLedger, MockWalletSigner, RejectingSigner, StalledLedger};
use intake_core::{
    ConfirmationLedger, ConfirmationPolicy, Fingerprint, IntakeEngine, IntakeEngineConfig,
    IntakeError, Overview, ResubmitPolicy, SectionCatalog, SectionOutcome, SnapshotStorageConfig,
    TransactionSigner, TransactionState, WorkflowEvent, WorkflowView,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

/// Which signer and ledger pair backs the confirmation transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectorProfile {
    /// Deterministic wallet signature, confirmed after a couple of polls.
    #[default]
    Mock,
    /// Every signature request is declined.
    RejectSignature,
    /// Signed, but the ledger never confirms.
    Stalled,
}

impl ConnectorProfile {
    fn connectors(self) -> (Arc<dyn TransactionSigner>, Arc<dyn ConfirmationLedger>) {
        match self {
            Self::Mock => (
                Arc::new(MockWalletSigner::default()),
                Arc::new(MockLedger::confirming_after(2)),
            ),
            Self::RejectSignature => (
                Arc::new(RejectingSigner::new("user rejected the signature request")),
                Arc::new(MockLedger::confirming_after(0)),
            ),
            Self::Stalled => (
                Arc::new(MockWalletSigner::default()),
                Arc::new(StalledLedger),
            ),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ServiceConfig {
    pub snapshot_storage: SnapshotStorageConfig,
    pub resubmit_policy: ResubmitPolicy,
    pub confirmation: ConfirmationPolicy,
    pub connectors: ConnectorProfile,
}

#[derive(Clone)]
pub struct ServiceState {
    pub engine: Arc<IntakeEngine>,
}

impl ServiceState {
    pub fn bootstrap(config: ServiceConfig) -> Result<Self, ServiceError> {
        let ServiceConfig {
            snapshot_storage,
            resubmit_policy,
            confirmation,
            connectors,
        } = config;
        let engine_config = IntakeEngineConfig {
            snapshot_storage,
            resubmit_policy,
            confirmation,
            ..IntakeEngineConfig::default()
        };
        let (signer, ledger) = connectors.connectors();
        info!(
            signer = signer.signer_id(),
            ledger = ledger.ledger_id(),
            "Connectors configured"
        );

        let engine =
            IntakeEngine::bootstrap(SectionCatalog::application(), engine_config, signer, ledger)?;

        Ok(Self {
            engine: Arc::new(engine),
        })
    }
}

/// Mirror workflow events into the log until the engine is dropped.
pub fn spawn_event_logger(engine: &IntakeEngine) -> tokio::task::JoinHandle<()> {
    let mut events = engine.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(WorkflowEvent::TransactionStage {
                    stage,
                    error: Some(error),
                }) => warn!(stage = stage.name(), error = %error, "Transaction stage changed"),
                Ok(event) => debug!(?event, "Workflow event"),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Event logger lagged behind workflow events")
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

pub fn build_router(state: ServiceState) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/workflow", get(workflow))
        .route("/v1/sections", get(list_sections))
        .route("/v1/sections/:id", get(get_section))
        .route("/v1/sections/:id/submit", post(submit_section))
        .route("/v1/sections/:id/select", post(select_section))
        .route("/v1/reset", post(reset_workflow))
        .route("/v1/fingerprint", get(get_fingerprint))
        .route("/v1/overview", get(overview))
        .route("/v1/transaction", get(transaction))
        .route("/v1/transaction/submit", post(submit_transaction))
        .route("/v1/transaction/reset", post(reset_transaction))
        .with_state(state)
}

/// Claim the submitter synchronously, then run the lifecycle in the background.
pub fn start_submission(state: &ServiceState) -> Result<TransactionState, ApiError> {
    let accepted = state.engine.begin_application()?;

    let engine = Arc::clone(&state.engine);
    tokio::spawn(async move {
        if let Err(err) = engine.submitter().run().await {
            warn!(error = %err, "Background submission ended without confirmation");
        }
    });

    Ok(accepted)
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("core engine error: {0}")]
    Core(#[from] IntakeError),
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{message}")]
    Http { status: StatusCode, message: String },
    #[error(transparent)]
    Core(#[from] IntakeError),
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self::Http {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

fn core_status(err: &IntakeError) -> StatusCode {
    match err {
        IntakeError::UnknownSection(_) => StatusCode::NOT_FOUND,
        IntakeError::GatingViolation { .. }
        | IntakeError::WorkflowIncomplete { .. }
        | IntakeError::SubmissionInFlight(_)
        | IntakeError::SubmissionFinalized => StatusCode::CONFLICT,
        IntakeError::NotReady => StatusCode::SERVICE_UNAVAILABLE,
        IntakeError::Serialization(_) => StatusCode::BAD_REQUEST,
        IntakeError::SignerRejected(_)
        | IntakeError::Network(_)
        | IntakeError::ConfirmationTimeout { .. }
        | IntakeError::LedgerRejected(_) => StatusCode::BAD_GATEWAY,
        IntakeError::Persistence(_) | IntakeError::InvalidCatalog(_) | IntakeError::Internal(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Http { status, message } => {
                (status, Json(serde_json::json!({ "error": message }))).into_response()
            }
            ApiError::Core(err) => (
                core_status(&err),
                Json(serde_json::json!({ "error": err.to_string() })),
            )
                .into_response(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
    ready: bool,
    snapshot_backend: &'static str,
}

async fn health(State(state): State<ServiceState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        service: "intake-service",
        ready: state.engine.is_ready(),
        snapshot_backend: state.engine.snapshot_backend(),
    })
}

async fn workflow(State(state): State<ServiceState>) -> Result<Json<WorkflowView>, ApiError> {
    Ok(Json(state.engine.view()?))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SectionResponse {
    pub id: String,
    pub title: String,
    pub index: usize,
    pub unlocked: bool,
    pub active: bool,
    pub fingerprinted: bool,
    pub payload: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SectionListResponse {
    pub items: Vec<SectionResponse>,
}

fn section_response(
    state: &ServiceState,
    view: &WorkflowView,
    index: usize,
) -> Result<SectionResponse, ApiError> {
    let spec = state
        .engine
        .catalog()
        .get(index)
        .ok_or_else(|| IntakeError::Internal(format!("section index {index} out of range")))?;
    Ok(SectionResponse {
        id: spec.id.clone(),
        title: spec.title.clone(),
        index,
        unlocked: view.unlocked.get(index).copied().unwrap_or(false),
        active: view.active_index == index,
        fingerprinted: spec.fingerprinted,
        payload: state.engine.section(&spec.id)?,
    })
}

async fn list_sections(
    State(state): State<ServiceState>,
) -> Result<Json<SectionListResponse>, ApiError> {
    let view = state.engine.view()?;
    let items = (0..state.engine.catalog().len())
        .map(|index| section_response(&state, &view, index))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Json(SectionListResponse { items }))
}

async fn get_section(
    Path(id): Path<String>,
    State(state): State<ServiceState>,
) -> Result<Json<SectionResponse>, ApiError> {
    let index = state.engine.catalog().require_index(&id)?;
    let view = state.engine.view()?;
    Ok(Json(section_response(&state, &view, index)?))
}

async fn submit_section(
    Path(id): Path<String>,
    State(state): State<ServiceState>,
    Json(payload): Json<Value>,
) -> Result<Json<SectionOutcome>, ApiError> {
    if !payload.is_object() {
        return Err(ApiError::bad_request(format!(
            "payload for section '{}' must be a JSON object",
            id
        )));
    }
    Ok(Json(state.engine.submit_section(&id, payload)?))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectResponse {
    pub active_index: usize,
    pub active_section: String,
}

async fn select_section(
    Path(id): Path<String>,
    State(state): State<ServiceState>,
) -> Result<Json<SelectResponse>, ApiError> {
    let active_index = state.engine.select_section(&id)?;
    Ok(Json(SelectResponse {
        active_index,
        active_section: id,
    }))
}

async fn reset_workflow(State(state): State<ServiceState>) -> Result<Json<WorkflowView>, ApiError> {
    state.engine.reset_all()?;
    Ok(Json(state.engine.view()?))
}

#[derive(Debug, Clone, Deserialize)]
struct FingerprintQuery {
    sections: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FingerprintResponse {
    pub sections: Vec<String>,
    pub fingerprint: Fingerprint,
}

fn parse_section_filter(
    catalog: &SectionCatalog,
    raw: Option<&str>,
) -> Result<Vec<String>, ApiError> {
    let Some(raw) = raw else {
        return Ok(catalog.fingerprint_sections());
    };

    let ids = raw
        .split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .collect::<Vec<_>>();
    if ids.is_empty() {
        return Err(ApiError::bad_request(
            "sections filter must name at least one section",
        ));
    }
    for id in &ids {
        catalog.require_index(id)?;
    }
    Ok(ids)
}

async fn get_fingerprint(
    State(state): State<ServiceState>,
    Query(query): Query<FingerprintQuery>,
) -> Result<Json<FingerprintResponse>, ApiError> {
    let sections = parse_section_filter(state.engine.catalog(), query.sections.as_deref())?;
    let fingerprint = state.engine.fingerprint_of(&sections)?;
    Ok(Json(FingerprintResponse {
        sections,
        fingerprint,
    }))
}

async fn overview(State(state): State<ServiceState>) -> Result<Json<Overview>, ApiError> {
    Ok(Json(state.engine.overview()?))
}

async fn transaction(State(state): State<ServiceState>) -> Json<TransactionState> {
    Json(state.engine.transaction_state())
}

async fn submit_transaction(
    State(state): State<ServiceState>,
) -> Result<(StatusCode, Json<TransactionState>), ApiError> {
    let accepted = start_submission(&state)?;
    Ok((StatusCode::ACCEPTED, Json(accepted)))
}

async fn reset_transaction(
    State(state): State<ServiceState>,
) -> Result<Json<TransactionState>, ApiError> {
    Ok(Json(state.engine.reset_transaction()?))
}
