use crate::config::ApiConfig;
use crate::db;
use crate::error::LifecycleError;
use crate::key_generator::UserKey;
use crate::media::{Category, MediaBatch, UploadedFile};
use crate::request_service::RequestService;
use crate::user_service::UserLifecycleService;
use crate::validation::{CreateRequestForm, CreateUserForm, UpdateUserForm};
use anyhow::{Context, Result};
use axum::{
    extract::{rejection::JsonRejection, DefaultBodyLimit, Multipart, Query, State},
    http::{Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sqlx::postgres::PgPool;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{error, info, instrument};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub users: Arc<UserLifecycleService>,
    pub requests: Arc<RequestService>,
    pub pool: PgPool,
}

/// Body of every API response: status code, message, payload and error detail
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope<T> {
    pub status_code: u16,
    pub message: String,
    pub data: T,
    pub error: Value,
}

fn success<T: Serialize>(message: impl Into<String>, data: T) -> Response {
    (
        StatusCode::OK,
        Json(Envelope {
            status_code: StatusCode::OK.as_u16(),
            message: message.into(),
            data,
            error: json!({}),
        }),
    )
        .into_response()
}

/// Failure rendered as an [`Envelope`]
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
    pub detail: Value,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            detail: json!({}),
        }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    /// Replace the generic message of a server-side failure
    fn or_message(mut self, message: &str) -> Self {
        if self.status.is_server_error() {
            self.message = message.to_string();
        }
        self
    }
}

impl From<LifecycleError> for ApiError {
    fn from(err: LifecycleError) -> Self {
        match err {
            LifecycleError::NotFound(what) => {
                Self::new(StatusCode::NOT_FOUND, format!("{what} not found"))
            }
            LifecycleError::Validation(fields) => {
                let message = fields
                    .first()
                    .map(|f| f.message.clone())
                    .unwrap_or_else(|| "Invalid request".to_string());
                Self {
                    status: StatusCode::BAD_REQUEST,
                    message,
                    detail: json!(fields),
                }
            }
            other => {
                error!(error = %other, "Request failed");
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(Envelope {
                status_code: self.status.as_u16(),
                message: self.message,
                data: json!([]),
                error: self.detail,
            }),
        )
            .into_response()
    }
}

type ApiResult = std::result::Result<Response, ApiError>;

/// Create the API router
pub fn create_router(state: AppState, config: &ApiConfig, static_root: Option<PathBuf>) -> Router {
    let cors = if config.cors_enabled {
        if config.cors_origins.is_empty() {
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        } else {
            let origins: Vec<_> = config
                .cors_origins
                .iter()
                .filter_map(|o| o.parse().ok())
                .collect();
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods(Any)
                .allow_headers(Any)
        }
    } else {
        CorsLayer::new()
    };

    let mut router = Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/users/list", get(list_users))
        .route(
            "/users/user",
            get(get_user)
                .post(create_user)
                .put(update_user)
                .delete(delete_user_by_id),
        )
        .route("/users/user/key", delete(delete_user_by_key))
        .route("/requests/request", post(create_request));

    if let Some(root) = static_root {
        router = router.nest_service("/static", ServeDir::new(root));
    }

    router
        .fallback(route_not_found)
        .layer(DefaultBodyLimit::max(config.max_body_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Health check endpoint
async fn health_check() -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "service": "records-service"
    }))
}

/// Readiness check endpoint
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    match db::ping(&state.pool).await {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({
                "status": "ready",
                "database": "connected"
            })),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "status": "not_ready",
                "database": "disconnected",
                "error": e.to_string()
            })),
        ),
    }
}

async fn route_not_found(method: Method, uri: Uri) -> ApiError {
    ApiError::new(
        StatusCode::NOT_FOUND,
        format!("Cant find {method} {uri} on this server!"),
    )
}

/// Text fields and uploads of a multipart body
#[derive(Debug, Default)]
struct UploadForm {
    fields: HashMap<String, String>,
    photos: MediaBatch,
    videos: MediaBatch,
}

impl UploadForm {
    fn take(&mut self, name: &str) -> Option<String> {
        self.fields.remove(name)
    }
}

/// Collect a multipart body. Every `photos`/`videos` part becomes one entry
/// of its category's batch, whether the client sent one file or many.
async fn read_multipart(mut multipart: Multipart) -> std::result::Result<UploadForm, ApiError> {
    let mut form = UploadForm::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("Malformed multipart body: {e}")))?
    {
        let name = field.name().unwrap_or_default().to_string();
        let file_name = field.file_name().map(str::to_string);

        match (Category::from_field_name(&name), file_name) {
            (Some(category), Some(file_name)) => {
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::bad_request(format!("Failed to read upload: {e}")))?;
                // Browsers send an empty part for an untouched file input
                if file_name.is_empty() && data.is_empty() {
                    continue;
                }
                let file = UploadedFile::new(file_name, data);
                match category {
                    Category::Photos => form.photos.push(file),
                    Category::Videos => form.videos.push(file),
                }
            }
            _ => {
                let value = field
                    .text()
                    .await
                    .map_err(|e| ApiError::bad_request(format!("Failed to read field: {e}")))?;
                form.fields.insert(name, value);
            }
        }
    }

    Ok(form)
}

fn parse_key(raw: &str) -> std::result::Result<UserKey, ApiError> {
    UserKey::parse(raw)
        .map_err(|e| LifecycleError::invalid_field("key", format!("The 'key' field is invalid: {e}")).into())
}

#[instrument(skip(state))]
async fn list_users(State(state): State<AppState>) -> ApiResult {
    let users = state.users.list_users().await?;

    if users.is_empty() {
        return Err(ApiError::new(StatusCode::NOT_FOUND, "Users not found"));
    }

    Ok(success("All users fetched successfully", users))
}

#[derive(Debug, Deserialize)]
struct UserLookup {
    #[serde(rename = "compositeKey")]
    composite_key: Option<String>,
    key: Option<String>,
}

#[instrument(skip(state))]
async fn get_user(State(state): State<AppState>, Query(lookup): Query<UserLookup>) -> ApiResult {
    let raw = lookup
        .composite_key
        .or(lookup.key)
        .ok_or_else(|| {
            ApiError::from(LifecycleError::invalid_field(
                "compositeKey",
                "The 'compositeKey' field is required.",
            ))
        })?;

    let user = state.users.get_user_by_composite_key(&raw).await?;
    Ok(success("User fetched successfully", user))
}

#[instrument(skip_all)]
async fn create_user(State(state): State<AppState>, multipart: Multipart) -> ApiResult {
    let mut upload = read_multipart(multipart).await?;
    let form = CreateUserForm {
        name: upload.take("name"),
        surname: upload.take("surname"),
        patronymic: upload.take("patronymic"),
        phone: upload.take("phone"),
        email: upload.take("email"),
        address: upload.take("address"),
    };
    let profile = form.into_profile().map_err(LifecycleError::from)?;

    let created = state
        .users
        .create_user(profile, upload.photos, upload.videos)
        .await
        .map_err(|e| ApiError::from(e).or_message("User not created"))?;

    Ok(success(
        format!("User with id {} created successfully", created.id),
        created,
    ))
}

#[instrument(skip_all)]
async fn update_user(State(state): State<AppState>, multipart: Multipart) -> ApiResult {
    let mut upload = read_multipart(multipart).await?;
    let form = UpdateUserForm {
        key: upload.take("key"),
        name: upload.take("name"),
        surname: upload.take("surname"),
        patronymic: upload.take("patronymic"),
        phone: upload.take("phone"),
        email: upload.take("email"),
        address: upload.take("address"),
    };
    let (raw_key, patch) = form.into_patch().map_err(LifecycleError::from)?;
    let key = parse_key(&raw_key)?;

    let updated = state
        .users
        .update_user_by_key(&key, patch, upload.photos, upload.videos)
        .await
        .map_err(|e| ApiError::from(e).or_message("User not updated"))?;

    Ok(success(
        format!("User with key {key} updated successfully"),
        updated,
    ))
}

#[derive(Debug, Deserialize)]
struct IdQuery {
    id: Option<String>,
}

#[instrument(skip(state))]
async fn delete_user_by_id(State(state): State<AppState>, Query(query): Query<IdQuery>) -> ApiResult {
    let id = query
        .id
        .as_deref()
        .and_then(|raw| raw.trim().parse::<i64>().ok())
        .ok_or_else(|| {
            ApiError::from(LifecycleError::invalid_field(
                "id",
                "The 'id' field must be an integer.",
            ))
        })?;

    state.users.delete_user_by_id(id).await?;
    Ok(success(format!("User with id {id} deleted successfully"), json!([])))
}

#[derive(Debug, Deserialize)]
struct KeyQuery {
    key: Option<String>,
}

#[instrument(skip(state))]
async fn delete_user_by_key(
    State(state): State<AppState>,
    Query(query): Query<KeyQuery>,
) -> ApiResult {
    let raw = query.key.unwrap_or_default();
    let key = parse_key(&raw)?;

    state.users.delete_user_by_key(&key).await?;
    Ok(success(format!("User with key {key} deleted successfully"), json!([])))
}

#[instrument(skip_all)]
async fn create_request(
    State(state): State<AppState>,
    body: std::result::Result<Json<CreateRequestForm>, JsonRejection>,
) -> ApiResult {
    let Json(form) = body.map_err(|e| ApiError::bad_request(e.body_text()))?;
    let request = form.into_request().map_err(LifecycleError::from)?;

    let id = state
        .requests
        .create_request(request)
        .await
        .map_err(|e| ApiError::from(e).or_message("Error recording request"))?;

    Ok(success(
        format!("Request with id {id} created successfully"),
        json!({ "id": id }),
    ))
}

/// Start the HTTP API server
pub async fn start_api_server(
    state: AppState,
    config: &ApiConfig,
    static_root: Option<PathBuf>,
) -> Result<()> {
    let router = create_router(state, config, static_root);
    let addr = format!("{}:{}", config.host, config.port);

    info!(address = %addr, "Starting records API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, router)
        .await
        .context("API server error")?;

    Ok(())
}
