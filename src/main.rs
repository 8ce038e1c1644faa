mod credentials;
mod http;
mod jobs;
mod lock;
mod mapper;
mod metrics;
mod models;
mod onboarding;
mod security;
mod shopee;
mod store;
mod sync;
#[cfg(test)]
mod testing;
mod token;

use axum::{
    Json, Router,
    extract::{Extension, Path, Query, State},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Redirect, Response},
    routing::{get, post},
};
use chrono::Utc;
use eyre::WrapErr;
use jobs::{ScheduleConfig, SyncQueue, Trigger};
use mapper::{MapperOptions, OrderMapper, OrderOutcome};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use models::{ApiError, SkuMapping, SyncLogEntry};
use onboarding::ExchangeError;
use security::{AuthContext, AuthState, require_api_auth};
use serde::{Deserialize, Serialize};
use serde_json::json;
use shopee::config::{PLATFORM, SETTINGS_REDIRECT_PATH};
use shopee::{MarketOrder, ShopeeClient};
use std::{net::SocketAddr, sync::Arc};
use store::{ErpStore, MemoryStore, StoreError, SupabaseStore};
use sync::SyncService;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info, warn};

const MISSING_CALLBACK_PARAMS: &str = "Authorization failed: Missing code or shop_id.";

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    if let Err(err) = run().await {
        error!(target = "marketsync.api", "server crashed: {err:?}");
    }
}

async fn run() -> eyre::Result<()> {
    init_tracing();

    let store: Arc<dyn ErpStore> = match SupabaseStore::from_env() {
        Some(store) => {
            info!(target = "marketsync.api", "using supabase store");
            Arc::new(store)
        }
        None => {
            warn!(
                target = "marketsync.api",
                "SUPABASE_URL not set; using in-memory store"
            );
            Arc::new(MemoryStore::from_env().wrap_err("loading sku mappings")?)
        }
    };
    let service = SyncService::new(
        ShopeeClient::from_env(),
        store,
        OrderMapper::new(MapperOptions::from_env()),
    )
    .with_lock(
        lock::SyncLock::from_env().map(|lock| Arc::new(lock) as Arc<dyn lock::CycleLock>),
    );

    let schedule = ScheduleConfig::from_env();
    let (queue, _worker) = SyncQueue::spawn(service.clone(), schedule);
    let _scheduler = queue.spawn_scheduler(schedule);
    info!(
        target = "marketsync.api",
        interval_secs = schedule.interval.as_secs(),
        "sync scheduler started"
    );

    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .wrap_err("installing prometheus recorder")?;
    let state = AppState {
        service,
        queue,
        openapi: Arc::new(load_openapi()),
        prometheus_handle,
    };
    let app = router(state, AuthState::from_env());

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(8000);
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    info!(target = "marketsync.api", "listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}

#[derive(Clone)]
struct AppState {
    service: SyncService,
    queue: SyncQueue,
    openapi: Arc<serde_json::Value>,
    prometheus_handle: PrometheusHandle,
}

fn load_openapi() -> serde_json::Value {
    serde_yaml::from_str(include_str!("../docs/openapi.yaml"))
        .unwrap_or(json!({"openapi": "3.0.3"}))
}

fn router(state: AppState, auth_state: AuthState) -> Router {
    let cors = CorsLayer::new()
        .allow_headers(Any)
        .allow_methods(Any)
        .allow_origin(Any);

    let protected = Router::new()
        .route("/auth/initiate", get(auth_initiate))
        .route("/sync", post(enqueue_sync))
        .route("/sync/logs", get(sync_logs))
        .route("/jobs/{id}", get(get_job_status))
        .route("/orders", post(create_order))
        .route("/mappings/{platform}/{sku}", get(get_mapping))
        .route_layer(middleware::from_fn_with_state(auth_state, require_api_auth));

    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics_endpoint))
        .route("/openapi.json", get(openapi_json))
        .route("/docs", get(swagger_ui))
        .route("/auth_callback", get(auth_callback))
        .merge(protected)
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

/// Health and readiness check.
///
/// - Method: `GET`
/// - Path: `/health`
/// - Auth: none
async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "service": "marketsync",
    }))
}

async fn openapi_json(
    State(state): State<AppState>,
    headers: axum::http::HeaderMap,
) -> Result<Json<serde_json::Value>, AppError> {
    if let Ok(key) = std::env::var("OPENAPI_KEY") {
        let presented = headers
            .get("X-Docs-Key")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if presented != key {
            return Err(AppError::Unauthorized("docs"));
        }
    }
    Ok(Json((*state.openapi).clone()))
}

async fn swagger_ui() -> impl IntoResponse {
    let html = r#"<!doctype html>
<html>
<head>
  <meta charset='utf-8'/>
  <title>Marketsync API Docs</title>
  <link rel="stylesheet" href="https://unpkg.com/swagger-ui-dist@5/swagger-ui.css" />
</head>
<body>
  <div id="swagger-ui"></div>
  <script src="https://unpkg.com/swagger-ui-dist@5/swagger-ui-bundle.js"></script>
  <script>
    window.onload = () => {
      window.ui = SwaggerUIBundle({ url: '/openapi.json', dom_id: '#swagger-ui' });
    };
  </script>
</body>
</html>"#;
    (
        [(axum::http::header::CONTENT_TYPE, "text/html; charset=utf-8")],
        html,
    )
}

async fn metrics_endpoint(
    State(state): State<AppState>,
    headers: axum::http::HeaderMap,
) -> Response {
    if let Ok(secret) = std::env::var("METRICS_KEY") {
        let presented = headers
            .get("X-Metrics-Key")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if presented != secret {
            return (StatusCode::UNAUTHORIZED, "unauthorized").into_response();
        }
    }
    (
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4",
        )],
        state.prometheus_handle.render(),
    )
        .into_response()
}

#[derive(Debug, Deserialize)]
struct CallbackParams {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    shop_id: Option<String>,
}

/// OAuth redirect target registered with the marketplace.
///
/// - Method: `GET`
/// - Path: `/auth_callback?code=..&shop_id=..`
/// - Auth: none (the one-time code is the credential)
///
/// Redirects to the settings page on success; plain-text message otherwise.
async fn auth_callback(
    State(state): State<AppState>,
    Query(params): Query<CallbackParams>,
) -> Response {
    crate::metrics::inc_requests("/auth_callback");
    let code = params.code.filter(|c| !c.trim().is_empty());
    let shop_id = params.shop_id.and_then(|s| s.trim().parse::<u64>().ok());
    let (Some(code), Some(shop_id)) = (code, shop_id) else {
        return (StatusCode::BAD_REQUEST, MISSING_CALLBACK_PARAMS).into_response();
    };

    match onboarding::exchange_code_for_token(
        state.service.client(),
        state.service.store(),
        &code,
        shop_id,
        Utc::now().timestamp(),
    )
    .await
    {
        Ok(outcome) => {
            info!(
                target = "marketsync.api",
                shop_id = outcome.shop_id,
                shop_name = ?outcome.shop_name,
                "shop connected"
            );
            Redirect::to(SETTINGS_REDIRECT_PATH.as_str()).into_response()
        }
        Err(err) => (StatusCode::BAD_GATEWAY, err.user_message()).into_response(),
    }
}

#[derive(Debug, Serialize)]
struct AuthUrlResponse {
    auth_url: String,
}

async fn auth_initiate(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
) -> Result<Json<AuthUrlResponse>, AppError> {
    crate::metrics::inc_requests("/auth/initiate");
    info!(target = "marketsync.api", operator = %context.operator, "auth initiated");
    let auth_url = onboarding::initiate_auth(
        state.service.client(),
        state.service.store(),
        Utc::now().timestamp(),
    )
    .await?;
    Ok(Json(AuthUrlResponse { auth_url }))
}

#[derive(Debug, Serialize)]
struct EnqueueResponse {
    job_id: String,
}

/// Queue a sync cycle behind any cycle already running.
///
/// - Method: `POST`
/// - Path: `/sync`
/// - Response: `{job_id}`; poll `/jobs/{id}` for the report
async fn enqueue_sync(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
) -> Result<Json<EnqueueResponse>, AppError> {
    crate::metrics::inc_requests("/sync");
    let id = state
        .queue
        .enqueue(Trigger::Manual)
        .await
        .map_err(AppError::Api)?;
    info!(target = "marketsync.api", operator = %context.operator, job_id = %id, "manual sync queued");
    Ok(Json(EnqueueResponse {
        job_id: id.to_string(),
    }))
}

async fn get_job_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<jobs::JobInfo>, AppError> {
    let Ok(uuid) = uuid::Uuid::parse_str(&id) else {
        return Err(AppError::InvalidInput {
            code: "invalid_job_id",
            detail: id,
        });
    };
    state
        .queue
        .get(uuid)
        .await
        .map(Json)
        .ok_or(AppError::NotFound("job_not_found"))
}

#[derive(Debug, Deserialize)]
struct LogsQuery {
    #[serde(default)]
    limit: Option<usize>,
}

async fn sync_logs(
    State(state): State<AppState>,
    Query(query): Query<LogsQuery>,
) -> Result<Json<Vec<SyncLogEntry>>, AppError> {
    crate::metrics::inc_requests("/sync/logs");
    let limit = query.limit.filter(|l| *l > 0).unwrap_or(20).min(200);
    Ok(Json(state.service.store().recent_sync_logs(limit).await?))
}

/// Map and persist one order outside the scheduled cycle.
///
/// - Method: `POST`
/// - Path: `/orders`
/// - Body: marketplace order (`order_sn`, `buyer_username`, `item_list`)
/// - Response: `OrderOutcome`
async fn create_order(
    State(state): State<AppState>,
    Json(order): Json<MarketOrder>,
) -> Result<Json<OrderOutcome>, AppError> {
    crate::metrics::inc_requests("/orders");
    let store = state.service.store();
    let settings = store.load_settings().await?;
    let outcome = state
        .service
        .mapper()
        .create_sales_order(
            store,
            &order,
            PLATFORM,
            settings.default_warehouse.as_deref(),
            Utc::now().date_naive(),
        )
        .await
        .map_err(|err| AppError::Store(err.source))?;
    Ok(Json(outcome))
}

async fn get_mapping(
    State(state): State<AppState>,
    Path((platform, sku)): Path<(String, String)>,
) -> Result<Json<SkuMapping>, AppError> {
    crate::metrics::inc_requests("/mappings");
    state
        .service
        .store()
        .find_mapping(&sku, &platform)
        .await?
        .map(Json)
        .ok_or(AppError::NotFound("mapping_not_found"))
}

#[derive(Debug)]
enum AppError {
    InvalidInput { code: &'static str, detail: String },
    Unauthorized(&'static str),
    NotFound(&'static str),
    Store(StoreError),
    Exchange(ExchangeError),
    Api(ApiError),
}

impl From<StoreError> for AppError {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}

impl From<ExchangeError> for AppError {
    fn from(value: ExchangeError) -> Self {
        Self::Exchange(value)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, payload) = match self {
            AppError::InvalidInput { code, detail } => (
                StatusCode::BAD_REQUEST,
                ApiError {
                    error: code.into(),
                    detail: Some(detail),
                },
            ),
            AppError::Unauthorized(scope) => (
                StatusCode::UNAUTHORIZED,
                ApiError {
                    error: "unauthorized".into(),
                    detail: Some(scope.into()),
                },
            ),
            AppError::NotFound(code) => (
                StatusCode::NOT_FOUND,
                ApiError {
                    error: code.into(),
                    detail: None,
                },
            ),
            AppError::Store(err) => {
                error!(target = "marketsync.api", error = %err, "store request failed");
                let status = match err {
                    StoreError::MissingSettings => StatusCode::SERVICE_UNAVAILABLE,
                    StoreError::Conflict(_) => StatusCode::CONFLICT,
                    _ => StatusCode::BAD_GATEWAY,
                };
                (
                    status,
                    ApiError {
                        error: "store_error".into(),
                        detail: Some(err.to_string()),
                    },
                )
            }
            AppError::Exchange(err) => {
                error!(target = "marketsync.api", error = %err, "marketplace auth failed");
                (
                    StatusCode::BAD_GATEWAY,
                    ApiError {
                        error: "auth_failed".into(),
                        detail: Some(err.to_string()),
                    },
                )
            }
            AppError::Api(err) => (StatusCode::SERVICE_UNAVAILABLE, err),
        };
        (status, Json(payload)).into_response()
    }
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,tower_http=debug"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::{Credentials, Settings};
    use crate::shopee::config::{SHOP_INFO_PATH, TOKEN_GET_PATH};
    use crate::testing::serve;
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, header};
    use tower::ServiceExt;

    const KEY: &str = "test-key";

    fn settings() -> Settings {
        Settings {
            credentials: Credentials {
                partner_id: 2001,
                api_key: "secret".into(),
                ..Credentials::default()
            },
            shop_name: None,
            default_warehouse: Some("Main - WH".into()),
        }
    }

    fn mapping() -> SkuMapping {
        SkuMapping {
            marketplace_sku: "SKU-A".into(),
            marketplace: PLATFORM.into(),
            erpnext_item: "ITEM-A".into(),
            conversion_factor: None,
            enabled: true,
        }
    }

    fn app_with(host: &str, store: MemoryStore) -> Router {
        let service = SyncService::new(
            ShopeeClient::new(host),
            Arc::new(store),
            OrderMapper::default(),
        );
        let schedule = ScheduleConfig {
            interval: std::time::Duration::from_secs(3600),
            log_retention_days: 30,
        };
        let (queue, _worker) = SyncQueue::spawn(service.clone(), schedule);
        let state = AppState {
            service,
            queue,
            openapi: Arc::new(load_openapi()),
            prometheus_handle: PrometheusBuilder::new().build_recorder().handle(),
        };
        router(state, AuthState::from_pairs(&format!("ops:{KEY}")))
    }

    fn app(store: MemoryStore) -> Router {
        app_with("http://127.0.0.1:9", store)
    }

    fn authed(method: &str, uri: &str, body: Body) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("X-Sync-Key", KEY)
            .header(header::CONTENT_TYPE, "application/json")
            .body(body)
            .unwrap()
    }

    async fn json_body(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_is_public() {
        let response = app(MemoryStore::default())
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["status"], "ok");
    }

    #[tokio::test]
    async fn protected_routes_require_a_key() {
        let response = app(MemoryStore::default())
            .oneshot(Request::post("/sync").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(json_body(response).await["error"], "missing_api_key");
    }

    #[tokio::test]
    async fn posted_order_becomes_a_sales_order() {
        let store = MemoryStore::new(settings(), vec![mapping()]);
        let order = json!({
            "order_sn": "API-1",
            "buyer_username": "alice",
            "item_list": [
                {"item_sku": "SKU-A", "model_quantity": 2, "model_original_price": 10.0}
            ]
        });
        let response = app(store.clone())
            .oneshot(authed("POST", "/orders", Body::from(order.to_string())))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["outcome"], "created");

        let orders = store.sales_orders().await;
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].order.items[0].warehouse, "Main - WH");
        assert_eq!(orders[0].order.customer, "alice");
        assert_eq!(store.customers().await, vec!["alice".to_string()]);
    }

    #[tokio::test]
    async fn mapping_lookup_returns_404_when_absent() {
        let app = app(MemoryStore::new(settings(), vec![mapping()]));
        let found = app
            .clone()
            .oneshot(authed("GET", "/mappings/Shopee/SKU-A", Body::empty()))
            .await
            .unwrap();
        assert_eq!(found.status(), StatusCode::OK);
        assert_eq!(json_body(found).await["erpnext_item"], "ITEM-A");

        let missing = app
            .oneshot(authed("GET", "/mappings/Shopee/NOPE", Body::empty()))
            .await
            .unwrap();
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn manual_sync_is_queued_and_pollable() {
        let app = app(MemoryStore::new(settings(), Vec::new()));
        let response = app
            .clone()
            .oneshot(authed("POST", "/sync", Body::empty()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let job_id = json_body(response).await["job_id"]
            .as_str()
            .unwrap()
            .to_string();

        let status = app
            .clone()
            .oneshot(authed("GET", &format!("/jobs/{job_id}"), Body::empty()))
            .await
            .unwrap();
        assert_eq!(status.status(), StatusCode::OK);
        assert_eq!(json_body(status).await["trigger"], "manual");

        let bad = app
            .oneshot(authed("GET", "/jobs/not-a-uuid", Body::empty()))
            .await
            .unwrap();
        assert_eq!(bad.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn callback_without_params_is_rejected_in_plain_text() {
        let response = app(MemoryStore::new(settings(), Vec::new()))
            .oneshot(
                Request::get("/auth_callback?code=abc")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], MISSING_CALLBACK_PARAMS.as_bytes());
    }

    #[tokio::test]
    async fn callback_exchanges_code_and_redirects() {
        let mock = Router::new()
            .route(
                TOKEN_GET_PATH,
                post(|| async {
                    Json(json!({
                        "access_token": "acc",
                        "refresh_token": "ref",
                        "expire_in": 14400
                    }))
                }),
            )
            .route(
                SHOP_INFO_PATH,
                get(|| async { Json(json!({"response": {"shop_name": "Demo Shop"}})) }),
            );
        let host = serve(mock).await;
        let store = MemoryStore::new(settings(), Vec::new());
        let response = app_with(&host, store.clone())
            .oneshot(
                Request::get("/auth_callback?code=abc&shop_id=77")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(
            response.headers()[header::LOCATION],
            SETTINGS_REDIRECT_PATH.as_str()
        );

        let saved = store.load_settings().await.unwrap();
        assert_eq!(saved.credentials.shop_id, Some(77));
        assert_eq!(saved.credentials.access_token.as_deref(), Some("acc"));
        assert_eq!(saved.shop_name.as_deref(), Some("Demo Shop"));
    }

    #[tokio::test]
    async fn initiate_returns_signed_auth_url() {
        let response = app(MemoryStore::new(settings(), Vec::new()))
            .oneshot(authed("GET", "/auth/initiate", Body::empty()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let url = json_body(response).await["auth_url"]
            .as_str()
            .unwrap()
            .to_string();
        assert!(url.contains("partner_id=2001"));
        assert!(url.contains("redirect="));
    }
}
