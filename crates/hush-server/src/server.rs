use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use directories::ProjectDirs;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::{
    auth::require_api_key,
    handlers::{create_secret, get_secret, health, prune_secrets, redeem_secret},
    store::{PassphraseHasher, Store},
    vault::Vault,
    AppState,
};

pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(5);

pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub api_key: Option<String>,
    pub data_dir: Option<PathBuf>,
    pub store_timeout: Duration,
    pub cors_origins: Option<String>,
    pub log_level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: std::env::var("HUSH_HOST").unwrap_or_else(|_| "0.0.0.0".into()),
            port: std::env::var("HUSH_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(8080),
            api_key: std::env::var("HUSH_API_KEY").ok(),
            data_dir: std::env::var("HUSH_DATA_DIR").ok().map(PathBuf::from),
            store_timeout: DEFAULT_STORE_TIMEOUT,
            cors_origins: std::env::var("HUSH_CORS_ORIGINS").ok(),
            log_level: "warn".into(),
        }
    }
}

/// Directory holding `hush.db`: `explicit` when given, otherwise the platform
/// data dir (`~/.local/share/hush/` and equivalents). Created if missing.
pub fn resolve_data_dir(explicit: Option<&PathBuf>) -> Result<PathBuf> {
    let path = match explicit {
        Some(d) => d.clone(),
        None => ProjectDirs::from("", "", "hush")
            .context("could not determine platform data directory")?
            .data_dir()
            .to_owned(),
    };
    std::fs::create_dir_all(&path)
        .with_context(|| format!("create data dir {}", path.display()))?;
    Ok(path)
}

pub async fn run(cfg: ServerConfig) -> Result<()> {
    let data_dir = resolve_data_dir(cfg.data_dir.as_ref())?;
    info!(data_dir = %data_dir.display(), "using data directory");

    let db_path = data_dir.join("hush.db");
    let store = Store::open(&db_path).context("open store")?;

    let state = AppState {
        vault: Vault::new(store, PassphraseHasher::default()),
        api_key: cfg.api_key,
        store_timeout: cfg.store_timeout,
    };
    if state.api_key.is_none() {
        info!("HUSH_API_KEY not set; admin routes are open");
    }

    let app = build_router(state, cfg.cors_origins.as_deref());

    let addr: SocketAddr = format!("{}:{}", cfg.host, cfg.port)
        .parse()
        .context("invalid host/port")?;

    info!(%addr, log_level = %cfg.log_level, "hush server listening");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("bind listener")?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")
}

pub fn build_router(state: AppState, cors_origins: Option<&str>) -> Router {
    let public = Router::new()
        .route("/health", get(health))
        .route("/api/secrets", post(create_secret))
        .route("/api/secrets/redeem", post(redeem_secret))
        .route("/api/secrets/{id}", get(get_secret));

    let admin = Router::new()
        .route("/api/prune", post(prune_secrets))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            require_api_key,
        ));

    Router::new()
        .merge(public)
        .merge(admin)
        .with_state(state)
        .layer(build_cors(cors_origins))
        .layer(TraceLayer::new_for_http())
}

fn build_cors(origins: Option<&str>) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([http::Method::GET, http::Method::POST, http::Method::OPTIONS])
        .allow_headers(Any);

    match origins {
        Some(o) => {
            let origins: Vec<_> = o
                .split(',')
                .filter_map(|s| s.trim().parse().ok())
                .collect();
            cors.allow_origin(origins)
        }
        None => cors.allow_origin(Any),
    }
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("shutdown signal received");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::passphrase::test_hasher;
    use axum::http::StatusCode;
    use axum_test::TestServer;
    use serde_json::{json, Value};
    use tempfile::tempdir;

    fn make_server(api_key: Option<&str>) -> (TestServer, AppState, tempfile::TempDir) {
        make_server_with_timeout(api_key, DEFAULT_STORE_TIMEOUT)
    }

    fn make_server_with_timeout(
        api_key: Option<&str>,
        store_timeout: Duration,
    ) -> (TestServer, AppState, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let store = Store::open(&dir.path().join("http.db")).unwrap();
        let state = AppState {
            vault: Vault::new(store, test_hasher()),
            api_key: api_key.map(Into::into),
            store_timeout,
        };
        let server = TestServer::new(build_router(state.clone(), None)).unwrap();
        (server, state, dir)
    }

    async fn create(server: &TestServer, body: Value) -> String {
        let resp = server.post("/api/secrets").json(&body).await;
        resp.assert_status(StatusCode::CREATED);
        resp.json::<Value>()["id"].as_str().unwrap().to_owned()
    }

    #[test]
    fn explicit_data_dir_is_created() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("a").join("b");
        let resolved = resolve_data_dir(Some(&nested)).unwrap();
        assert_eq!(resolved, nested);
        assert!(nested.is_dir());
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let (server, _state, _dir) = make_server(None);
        let resp = server.get("/health").await;
        resp.assert_status_ok();
        assert_eq!(resp.json::<Value>()["status"], "ok");
    }

    #[tokio::test]
    async fn launch_codes_over_http() {
        let (server, _state, _dir) = make_server(None);
        let id = create(
            &server,
            json!({"message": "launch codes", "access_count": 2, "expiry_seconds": 3600}),
        )
        .await;

        let first = server.get(&format!("/api/secrets/{id}")).await;
        first.assert_status_ok();
        let body = first.json::<Value>();
        assert_eq!(body["message"], "launch codes");
        assert_eq!(body["remaining_access"], 1);

        let second = server.get(&format!("/api/secrets/{id}")).await;
        second.assert_status_ok();
        assert_eq!(second.json::<Value>()["remaining_access"], 0);

        server
            .get(&format!("/api/secrets/{id}"))
            .await
            .assert_status(StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn passphrase_flow_over_http() {
        let (server, state, _dir) = make_server(None);
        let id = create(&server, json!({"message": "secret", "passphrase": "abc123"})).await;

        let wrong = server
            .post("/api/secrets/redeem")
            .json(&json!({"id": id, "passphrase": "wrong!"}))
            .await;
        wrong.assert_status(StatusCode::BAD_REQUEST);
        assert_eq!(wrong.json::<Value>()["error"], "invalid passphrase");
        assert_eq!(
            state.vault.store().peek(&id).unwrap().unwrap().remaining_access,
            1
        );

        // GET carries no passphrase, so it is rejected the same way
        server
            .get(&format!("/api/secrets/{id}"))
            .await
            .assert_status(StatusCode::BAD_REQUEST);

        let ok = server
            .post("/api/secrets/redeem")
            .json(&json!({"id": id, "passphrase": "abc123"}))
            .await;
        ok.assert_status_ok();
        let body = ok.json::<Value>();
        assert_eq!(body["message"], "secret");
        assert_eq!(body["remaining_access"], 0);
        assert!(state.vault.store().peek(&id).unwrap().is_none());
    }

    #[tokio::test]
    async fn validation_failures_are_400_with_reason() {
        let (server, _state, _dir) = make_server(None);

        let resp = server
            .post("/api/secrets")
            .json(&json!({"message": "m", "access_count": 31}))
            .await;
        resp.assert_status(StatusCode::BAD_REQUEST);
        assert_eq!(
            resp.json::<Value>()["error"],
            "access_count must be between 1 and 30"
        );

        let resp = server
            .post("/api/secrets")
            .json(&json!({"message": "m", "expiry_seconds": 604_801, "access_count": 31}))
            .await;
        resp.assert_status(StatusCode::BAD_REQUEST);
        assert_eq!(
            resp.json::<Value>()["error"],
            "expiry must be between 1 and 604800 seconds"
        );

        server
            .post("/api/secrets")
            .json(&json!({"message": "m", "passphrase": "short"}))
            .await
            .assert_status(StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn malformed_json_is_400() {
        let (server, _state, _dir) = make_server(None);
        server
            .post("/api/secrets")
            .json(&json!({"passphrase": "no message field"}))
            .await
            .assert_status(StatusCode::BAD_REQUEST);
        server
            .post("/api/secrets/redeem")
            .json(&json!({"passphrase": "abc123"}))
            .await
            .assert_status(StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn malformed_or_unknown_ids_are_404() {
        let (server, _state, _dir) = make_server(None);
        server
            .get("/api/secrets/not-an-id")
            .await
            .assert_status(StatusCode::NOT_FOUND);
        server
            .get(&format!("/api/secrets/{}", Vault::new_id()))
            .await
            .assert_status(StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn prune_requires_key_when_configured() {
        let (server, _state, _dir) = make_server(Some("admin-key"));

        server
            .post("/api/prune")
            .await
            .assert_status(StatusCode::UNAUTHORIZED);

        let resp = server
            .post("/api/prune")
            .authorization_bearer("admin-key")
            .await;
        resp.assert_status_ok();
        assert_eq!(resp.json::<Value>()["pruned"], 0);

        // public routes stay open
        server.get("/health").await.assert_status_ok();
    }

    #[tokio::test]
    async fn prune_open_without_key() {
        let (server, state, _dir) = make_server(None);
        state
            .vault
            .store()
            .create(
                &Vault::new_id(),
                crate::store::NewRecord {
                    message: "m".into(),
                    passphrase_hash: None,
                    remaining_access: 1,
                },
                Duration::ZERO,
            )
            .unwrap();

        let resp = server.post("/api/prune").await;
        resp.assert_status_ok();
        assert_eq!(resp.json::<Value>()["pruned"], 1);
    }

    #[tokio::test]
    async fn out_of_range_candidate_rejected_before_lookup() {
        let (server, state, _dir) = make_server(None);
        let id = create(&server, json!({"message": "m", "passphrase": "abc123"})).await;

        for candidate in ["abc".to_owned(), "x".repeat(100_000)] {
            let resp = server
                .post("/api/secrets/redeem")
                .json(&json!({"id": id, "passphrase": candidate}))
                .await;
            resp.assert_status(StatusCode::BAD_REQUEST);
            assert_eq!(
                resp.json::<Value>()["error"],
                "passphrase length should be between 6 and 64 characters"
            );
        }
        assert_eq!(
            state.vault.store().peek(&id).unwrap().unwrap().remaining_access,
            1
        );
    }

    #[tokio::test]
    async fn stalled_store_is_500_not_404() {
        let (server, state, _dir) = make_server_with_timeout(None, Duration::from_millis(200));
        let id = create(&server, json!({"message": "m", "access_count": 2})).await;

        let writer = state.vault.store().hold_writer();
        let resp = server.get(&format!("/api/secrets/{id}")).await;
        resp.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(resp.json::<Value>()["error"], "internal server error");
        assert_eq!(
            state.vault.store().peek(&id).unwrap().unwrap().remaining_access,
            2
        );
        writer.abort().unwrap();
    }

    #[tokio::test]
    async fn stalled_create_leaves_nothing_behind() {
        let (server, state, _dir) = make_server_with_timeout(None, Duration::from_millis(200));

        let writer = state.vault.store().hold_writer();
        server
            .post("/api/secrets")
            .json(&json!({"message": "orphan", "access_count": 5}))
            .await
            .assert_status(StatusCode::INTERNAL_SERVER_ERROR);
        writer.abort().unwrap();

        // the create commits once the writer is free, then the cleanup removes it
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(state.vault.store().count().unwrap(), 0);
    }
}
