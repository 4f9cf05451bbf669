use std::time::Duration;

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::task::{JoinError, JoinHandle};
use tracing::{info, warn};

use crate::{
    store::{model::check_passphrase_len, NewSecret, StoreError},
    vault::{CreateError, RedeemError, Redemption, Vault},
    AppState,
};

// ── Health ────────────────────────────────────────────────────────────────────

pub async fn health(State(state): State<AppState>) -> Response {
    match run_blocking(&state, |vault| vault.store().count()).await {
        Ok(n) => Json(json!({"status": "ok", "secrets": n})).into_response(),
        Err(e) => {
            warn!(error = %e, "health check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({"status": "unavailable"})),
            )
                .into_response()
        }
    }
}

// ── Create ────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct CreateResponse {
    pub id: String,
    pub access_count: u32,
    pub expires_in: u64,
}

pub async fn create_secret(
    State(state): State<AppState>,
    body: Result<Json<NewSecret>, JsonRejection>,
) -> Response {
    let Json(body) = match body {
        Ok(b) => b,
        Err(rejection) => return bad_request(&rejection.body_text()),
    };

    let id = Vault::new_id();
    let task_id = id.clone();
    let vault = state.vault.clone();
    let mut task = tokio::task::spawn_blocking(move || vault.create(&task_id, body));

    let outcome = match tokio::time::timeout(state.store_timeout, &mut task).await {
        Ok(joined) => settle(joined),
        Err(_) => {
            // The create may still commit; remove it once it has settled.
            delete_after(task, state.vault.clone(), id);
            Err(CreateError::from(timed_out(state.store_timeout)))
        }
    };

    match outcome {
        Ok(created) => (
            StatusCode::CREATED,
            Json(CreateResponse {
                id: created.id,
                access_count: created.access_count,
                expires_in: created.expires_in,
            }),
        )
            .into_response(),
        Err(CreateError::Validation(e)) => bad_request(&e.to_string()),
        Err(e) => internal_error(&e),
    }
}

/// Delete `id` after `task` finishes, so the delete cannot be ordered ahead
/// of a commit the task is still waiting to make.
fn delete_after<T: Send + 'static>(task: JoinHandle<T>, vault: Vault, id: String) {
    tokio::spawn(async move {
        // Only the completion matters here, not the create's outcome.
        let _ = task.await;
        match tokio::task::spawn_blocking(move || vault.store().delete(&id)).await {
            Ok(Ok(true)) => info!("removed secret written by a timed-out create"),
            Ok(Ok(false)) => {}
            Ok(Err(e)) => warn!(error = %e, "cleanup after failed create also failed"),
            Err(e) => warn!(error = %e, "cleanup task failed"),
        }
    });
}

// ── Redeem ────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct RedeemRequest {
    pub id: String,
    #[serde(default)]
    pub passphrase: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RedeemResponse {
    pub message: String,
    pub remaining_access: u32,
    pub expires_in: u64,
}

impl From<Redemption> for RedeemResponse {
    fn from(r: Redemption) -> Self {
        Self {
            message: r.message,
            remaining_access: r.remaining_access,
            expires_in: r.expires_in,
        }
    }
}

/// `GET /api/secrets/{id}`: redeem a secret that has no passphrase.
pub async fn get_secret(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    redeem(&state, id, None).await
}

/// `POST /api/secrets/redeem`: redeem with an optional passphrase in the body.
pub async fn redeem_secret(
    State(state): State<AppState>,
    body: Result<Json<RedeemRequest>, JsonRejection>,
) -> Response {
    let Json(body) = match body {
        Ok(b) => b,
        Err(rejection) => return bad_request(&rejection.body_text()),
    };
    if let Some(p) = &body.passphrase {
        if let Err(e) = check_passphrase_len(p) {
            return bad_request(&e.to_string());
        }
    }
    redeem(&state, body.id, body.passphrase).await
}

async fn redeem(state: &AppState, id: String, passphrase: Option<String>) -> Response {
    if !is_well_formed_id(&id) {
        return not_found();
    }

    let result = run_blocking(state, move |vault| vault.redeem(&id, passphrase.as_deref())).await;
    match result {
        Ok(r) => Json(RedeemResponse::from(r)).into_response(),
        Err(RedeemError::InvalidPassphrase) => bad_request("invalid passphrase"),
        Err(RedeemError::BudgetExhausted) => bad_request("max attempts reached"),
        Err(RedeemError::NotFound) => not_found(),
        Err(RedeemError::Store(e)) => internal_error(&e),
    }
}

/// Ids are 32 lowercase hex characters; anything else cannot exist.
fn is_well_formed_id(id: &str) -> bool {
    id.len() == 32 && id.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

// ── Prune ─────────────────────────────────────────────────────────────────────

pub async fn prune_secrets(State(state): State<AppState>) -> Response {
    match run_blocking(&state, |vault| vault.store().prune()).await {
        Ok(n) => {
            info!(pruned = n, "audit: secret.prune");
            Json(json!({"pruned": n})).into_response()
        }
        Err(e) => internal_error(&e),
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

/// Run a blocking vault call off the async runtime, bounded by the configured
/// store timeout. A timeout or a panicked task is reported as
/// [`StoreError::Unavailable`], never as an absent record.
async fn run_blocking<T, E, F>(state: &AppState, f: F) -> Result<T, E>
where
    F: FnOnce(&Vault) -> Result<T, E> + Send + 'static,
    T: Send + 'static,
    E: From<StoreError> + Send + 'static,
{
    let vault = state.vault.clone();
    let task = tokio::task::spawn_blocking(move || f(&vault));

    match tokio::time::timeout(state.store_timeout, task).await {
        Ok(joined) => settle(joined),
        Err(_) => Err(timed_out(state.store_timeout).into()),
    }
}

fn settle<T, E: From<StoreError>>(joined: Result<Result<T, E>, JoinError>) -> Result<T, E> {
    match joined {
        Ok(result) => result,
        Err(join) => Err(StoreError::Unavailable(
            anyhow::Error::new(join).context("store task failed"),
        )
        .into()),
    }
}

fn timed_out(limit: Duration) -> StoreError {
    StoreError::Unavailable(anyhow::anyhow!("store call exceeded {limit:?}"))
}

fn bad_request(msg: &str) -> Response {
    (StatusCode::BAD_REQUEST, Json(json!({"error": msg}))).into_response()
}

fn not_found() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({"error": "not found or expired"})),
    )
        .into_response()
}

fn internal_error(e: &dyn std::fmt::Display) -> Response {
    tracing::error!(error = %e, "internal error");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({"error": "internal server error"})),
    )
        .into_response()
}
