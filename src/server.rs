//! JSON HTTP API.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/api/upload` | Multipart CSV upload (field `file`) |
//! | `GET` | `/api/database` | Records, search results, or stats |
//! | `GET` | `/api/contacts` | List contacts |
//! | `POST` | `/api/contacts` | Create a contact |
//! | `DELETE` | `/api/contacts?id=` | Delete a contact |
//! | `POST` | `/api/contacts/seed` | Insert sample contacts |
//! | `POST` | `/api/send-email` | Send a message, optionally with CSV data |
//! | `GET` | `/api/send-email` | Recent send history |
//! | `GET` | `/health` | Version and database reachability |
//!
//! # Error Contract
//!
//! ```json
//! { "success": false, "error": "Name and email are required" }
//! ```
//!
//! Validation and parse errors are 400, missing entities 404, duplicate
//! contact emails 409, everything else 500.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted.

use axum::{
    extract::{
        multipart::{MultipartError, MultipartRejection},
        rejection::JsonRejection,
        DefaultBodyLimit, Multipart, Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::SqlitePool;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::contacts;
use crate::db;
use crate::error::VaultError;
use crate::ingest::upload;
use crate::mail::{email_history, send_email, Mailer, SendRequest, SpoolMailer, DEFAULT_HISTORY_LIMIT};
use crate::migrate::apply_schema;
use crate::models::{Contact, EmailHistoryEntry, IngestReport, NewContact, Row};
use crate::query::{run_query, QueryResult, RecordQuery, RecordView};
use crate::sqlite_store::SqliteStore;
use crate::store::Store;

/// Multipart framing allowance on top of `ingest.max_upload_bytes`.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    config: Arc<Config>,
    pool: SqlitePool,
    store: Arc<dyn Store>,
    mailer: Arc<dyn Mailer>,
}

impl AppState {
    pub fn new(config: Config, pool: SqlitePool, mailer: Arc<dyn Mailer>) -> Self {
        Self {
            config: Arc::new(config),
            store: Arc::new(SqliteStore::new(pool.clone())),
            pool,
            mailer,
        }
    }
}

/// Build the application router with all routes and layers.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let body_limit = state.config.ingest.max_upload_bytes + MULTIPART_OVERHEAD;

    Router::new()
        .route("/api/upload", post(handle_upload))
        .route("/api/database", get(handle_database))
        .route(
            "/api/contacts",
            get(handle_list_contacts)
                .post(handle_add_contact)
                .delete(handle_delete_contact),
        )
        .route("/api/contacts/seed", post(handle_seed_contacts))
        .route(
            "/api/send-email",
            post(handle_send_email).get(handle_email_history),
        )
        .route("/health", get(handle_health))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Starts the HTTP server on `[server].bind`.
///
/// Applies the schema first, so a fresh database works without `vault
/// init`. Runs until Ctrl-C.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();

    let pool = db::connect(config).await?;
    apply_schema(&pool).await?;

    let mailer: Arc<dyn Mailer> = Arc::new(SpoolMailer::from_config(&config.mail));
    let app = router(AppState::new(config.clone(), pool.clone(), mailer));

    println!("csv-vault listening on http://{}", bind_addr);
    tracing::info!(bind = %bind_addr, db = %config.db.path.display(), "server starting");

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    pool.close().await;
    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    success: bool,
    error: String,
}

/// Error type that converts into an Axum HTTP response.
#[derive(Debug)]
struct AppError {
    status: StatusCode,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            success: false,
            error: self.message,
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        message: message.into(),
    }
}

impl From<VaultError> for AppError {
    fn from(err: VaultError) -> Self {
        let status = match &err {
            VaultError::Parse { .. } | VaultError::Validation(_) => StatusCode::BAD_REQUEST,
            VaultError::NotFound(_) => StatusCode::NOT_FOUND,
            VaultError::Conflict(_) => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!(error = %err, "request failed");
        }
        AppError {
            status,
            message: err.to_string(),
        }
    }
}

impl From<MultipartError> for AppError {
    fn from(err: MultipartError) -> Self {
        AppError {
            status: err.status(),
            message: format!("Failed to read upload: {}", err.body_text()),
        }
    }
}

impl From<MultipartRejection> for AppError {
    fn from(err: MultipartRejection) -> Self {
        bad_request(format!("Expected a multipart upload: {}", err.body_text()))
    }
}

impl From<JsonRejection> for AppError {
    fn from(err: JsonRejection) -> Self {
        bad_request(format!("Invalid JSON body: {}", err.body_text()))
    }
}

type ApiResult<T> = std::result::Result<T, AppError>;

// ============ POST /api/upload ============

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct UploadResponse {
    success: bool,
    data: Vec<Row>,
    filename: String,
    record_count: usize,
    database: IngestReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    warning: Option<String>,
}

async fn handle_upload(
    State(state): State<AppState>,
    multipart: std::result::Result<Multipart, MultipartRejection>,
) -> ApiResult<Json<UploadResponse>> {
    let mut multipart = multipart?;
    let mut file: Option<(String, Vec<u8>)> = None;

    while let Some(field) = multipart.next_field().await? {
        if field.name() == Some("file") {
            let filename = field.file_name().unwrap_or("").to_string();
            let data = field.bytes().await?;
            file = Some((filename, data.to_vec()));
        }
    }

    let (filename, bytes) = file.ok_or_else(|| bad_request("No file provided"))?;

    let outcome = upload(
        state.store.as_ref(),
        &state.config.ingest,
        &filename,
        &bytes,
    )
    .await?;

    Ok(Json(UploadResponse {
        success: true,
        record_count: outcome.rows.len(),
        warning: (!outcome.persisted)
            .then(|| "Data parsed but could not be saved to the database".to_string()),
        data: outcome.rows,
        filename: outcome.filename,
        database: outcome.report,
    }))
}

// ============ GET /api/database ============

#[derive(Debug, Deserialize)]
struct DatabaseParams {
    stats: Option<String>,
    search: Option<String>,
    field: Option<String>,
    filename: Option<String>,
}

impl DatabaseParams {
    fn into_query(self) -> RecordQuery {
        let stats = matches!(self.stats.as_deref(), Some("" | "true" | "1"));
        RecordQuery {
            stats,
            search: self.search,
            field: self.field,
            filename: self.filename,
        }
    }
}

#[derive(Serialize)]
struct RecordsResponse {
    success: bool,
    data: Vec<RecordView>,
    count: usize,
}

async fn handle_database(
    State(state): State<AppState>,
    Query(params): Query<DatabaseParams>,
) -> ApiResult<Response> {
    let query = params.into_query();
    match run_query(state.store.as_ref(), &query).await? {
        QueryResult::Stats(stats) => Ok(Json(stats).into_response()),
        QueryResult::Records(data) => Ok(Json(RecordsResponse {
            success: true,
            count: data.len(),
            data,
        })
        .into_response()),
    }
}

// ============ /api/contacts ============

#[derive(Serialize)]
struct ContactsResponse {
    success: bool,
    contacts: Vec<Contact>,
}

async fn handle_list_contacts(State(state): State<AppState>) -> ApiResult<Json<ContactsResponse>> {
    let contacts = contacts::list_contacts(&state.pool).await?;
    Ok(Json(ContactsResponse {
        success: true,
        contacts,
    }))
}

#[derive(Serialize)]
struct ContactCreatedResponse {
    success: bool,
    contact: Contact,
    message: String,
}

async fn handle_add_contact(
    State(state): State<AppState>,
    body: std::result::Result<Json<NewContact>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<ContactCreatedResponse>)> {
    let Json(input) = body?;
    let contact = contacts::add_contact(&state.pool, &input).await?;
    Ok((
        StatusCode::CREATED,
        Json(ContactCreatedResponse {
            success: true,
            contact,
            message: "Contact added successfully".to_string(),
        }),
    ))
}

#[derive(Debug, Deserialize)]
struct DeleteParams {
    id: Option<String>,
}

async fn handle_delete_contact(
    State(state): State<AppState>,
    Query(params): Query<DeleteParams>,
) -> ApiResult<Json<serde_json::Value>> {
    let id = params.id.unwrap_or_default();
    contacts::delete_contact(&state.pool, &id).await?;
    Ok(Json(json!({
        "success": true,
        "message": "Contact deleted successfully",
    })))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SeedResponse {
    success: bool,
    message: String,
    results: contacts::SeedResults,
    total_contacts: i64,
}

async fn handle_seed_contacts(State(state): State<AppState>) -> ApiResult<Json<SeedResponse>> {
    let report = contacts::seed_test_contacts(&state.pool).await?;
    Ok(Json(SeedResponse {
        success: true,
        message: report.summary(),
        results: report.results,
        total_contacts: report.total_contacts,
    }))
}

// ============ /api/send-email ============

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SendResponse {
    success: bool,
    message_id: String,
    message: String,
}

async fn handle_send_email(
    State(state): State<AppState>,
    body: std::result::Result<Json<SendRequest>, JsonRejection>,
) -> ApiResult<Json<SendResponse>> {
    let Json(request) = body?;
    let sent = send_email(
        &state.pool,
        state.mailer.as_ref(),
        &state.config.mail,
        &request,
    )
    .await?;

    Ok(Json(SendResponse {
        success: true,
        message: format!(
            "Email sent successfully to {} recipient(s)",
            sent.recipients.len()
        ),
        message_id: sent.message_id,
    }))
}

#[derive(Serialize)]
struct HistoryResponse {
    success: bool,
    history: Vec<EmailHistoryEntry>,
}

async fn handle_email_history(State(state): State<AppState>) -> ApiResult<Json<HistoryResponse>> {
    let history = email_history(&state.pool, DEFAULT_HISTORY_LIMIT).await?;
    Ok(Json(HistoryResponse {
        success: true,
        history,
    }))
}

// ============ GET /health ============

async fn handle_health(State(state): State<AppState>) -> Response {
    let version = env!("CARGO_PKG_VERSION");
    match state.store.count_files().await {
        Ok(files_count) => Json(json!({
            "status": "ok",
            "version": version,
            "database": { "status": "connected", "filesCount": files_count },
        }))
        .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "health check could not reach the database");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "status": "error",
                    "version": version,
                    "database": { "status": "error", "error": e.to_string() },
                })),
            )
                .into_response()
        }
    }
}
