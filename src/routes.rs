use crate::config::{self, Settings};
use crate::jobs::JobRegistry;
use crate::models::{ApiKey, CorrectionCategory, Language, OutputFormat, RunOptions, RunState};
use crate::services::source::SourceDocument;
use axum::{
    Router,
    extract::{DefaultBodyLimit, Multipart, Path, State},
    response::{Html, IntoResponse, Json, Response},
    routing::{get, post},
};
use http::{HeaderMap, StatusCode, header};
use serde_json::{Value, json};
use std::collections::BTreeSet;
use std::sync::Arc;
use uuid::Uuid;

const MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub jobs: Arc<JobRegistry>,
    pub settings: Arc<Settings>,
}

type ApiError = (StatusCode, Json<Value>);

fn api_error(status: StatusCode, message: impl std::fmt::Display) -> ApiError {
    (status, Json(json!({ "error": message.to_string() })))
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/health", get(health_check))
        .route("/corrections", post(create_correction))
        .route(
            "/corrections/:id",
            get(correction_status).delete(cancel_correction),
        )
        .route("/corrections/:id/download", get(download_correction))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .with_state(state)
}

async fn index() -> Html<&'static str> {
    Html(
        r#"<!DOCTYPE html>
<html>
<head>
    <title>Book Corrector Service</title>
    <meta charset="utf-8">
    <style>
        body { font-family: Arial, sans-serif; margin: 40px; }
        .endpoint { background-color: #f5f5f5; padding: 10px; margin: 10px 0; border-radius: 4px; font-family: monospace; }
    </style>
</head>
<body>
    <h1>Book Corrector Service</h1>
    <p>Upload a .docx (or UTF-8 .txt) document; it is corrected chunk by chunk by a language model
    and returned as a styled .docx or .epub.</p>

    <h2>Endpoints</h2>
    <div class="endpoint">GET /health</div>
    <div class="endpoint">POST /corrections (multipart: document, language, categories, extra_instructions, token_budget, format, title, api_key)</div>
    <div class="endpoint">GET /corrections/{id}</div>
    <div class="endpoint">DELETE /corrections/{id}</div>
    <div class="endpoint">GET /corrections/{id}/download</div>
</body>
</html>
"#,
    )
}

async fn health_check() -> &'static str {
    "OK"
}

/// Form fields of an upload, before validation.
#[derive(Default)]
struct Upload {
    document: Option<SourceDocument>,
    options: RunOptions,
    categories: Option<BTreeSet<CorrectionCategory>>,
    api_key: Option<String>,
}

async fn read_upload(mut multipart: Multipart) -> Result<Upload, ApiError> {
    let mut upload = Upload::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, e))?
    {
        let name = field.name().unwrap_or_default().to_string();
        if name == "document" {
            let file_name = field.file_name().unwrap_or("document").to_string();
            let bytes = field
                .bytes()
                .await
                .map_err(|e| api_error(StatusCode::BAD_REQUEST, e))?;
            upload.document = Some(SourceDocument::new(file_name, bytes.to_vec()));
            continue;
        }

        let value = field
            .text()
            .await
            .map_err(|e| api_error(StatusCode::BAD_REQUEST, e))?;
        let value = value.trim();
        match name.as_str() {
            "language" => {
                upload.options.language = Language::parse(value).ok_or_else(|| {
                    api_error(StatusCode::BAD_REQUEST, format!("unsupported language: {value}"))
                })?;
            }
            "categories" => {
                let set = upload.categories.get_or_insert_with(BTreeSet::new);
                for part in value.split(',').map(str::trim).filter(|p| !p.is_empty()) {
                    let category = CorrectionCategory::parse(part).ok_or_else(|| {
                        api_error(StatusCode::BAD_REQUEST, format!("unknown category: {part}"))
                    })?;
                    set.insert(category);
                }
            }
            "extra_instructions" => upload.options.extra_instructions = value.to_string(),
            "token_budget" => {
                upload.options.token_budget = value.parse().map_err(|_| {
                    api_error(
                        StatusCode::BAD_REQUEST,
                        "token_budget must be a positive integer",
                    )
                })?;
            }
            "format" => {
                upload.options.format = OutputFormat::parse(value).ok_or_else(|| {
                    api_error(StatusCode::BAD_REQUEST, format!("unsupported format: {value}"))
                })?;
            }
            "title" if !value.is_empty() => upload.options.title = value.to_string(),
            "api_key" if !value.is_empty() => upload.api_key = Some(value.to_string()),
            _ => {}
        }
    }

    if let Some(categories) = upload.categories.take() {
        upload.options.categories = categories;
    }
    Ok(upload)
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

async fn create_correction(
    State(state): State<AppState>,
    headers: HeaderMap,
    multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    let upload = read_upload(multipart).await?;
    let document = upload
        .document
        .ok_or_else(|| api_error(StatusCode::BAD_REQUEST, "missing 'document' field"))?;

    let key = bearer_token(&headers)
        .or(upload.api_key)
        .map(ApiKey::new)
        .or_else(|| state.settings.default_api_key.clone());
    config::validate(&upload.options, key.as_ref())
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, e))?;

    let id = state.jobs.submit(document, upload.options, key).await;

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "job_id": id,
            "status_url": format!("/corrections/{id}"),
            "download_url": format!("/corrections/{id}/download"),
        })),
    ))
}

fn parse_id(raw: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw).map_err(|_| api_error(StatusCode::BAD_REQUEST, "invalid job id"))
}

fn not_found() -> ApiError {
    api_error(StatusCode::NOT_FOUND, "no such job")
}

async fn correction_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_id(&id)?;
    let status = state.jobs.status(id).await.ok_or_else(not_found)?;
    Ok(Json(status))
}

async fn cancel_correction(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_id(&id)?;
    let status = state.jobs.cancel(id).await.ok_or_else(not_found)?;
    Ok((StatusCode::ACCEPTED, Json(status)))
}

async fn download_correction(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let id = parse_id(&id)?;
    let status = state.jobs.status(id).await.ok_or_else(not_found)?;

    let Some((path, format)) = status.output.clone().filter(|_| status.state == RunState::Done)
    else {
        return Err((
            StatusCode::CONFLICT,
            Json(json!({ "error": "document is not available", "status": status })),
        ));
    };

    let bytes = tokio::fs::read(&path)
        .await
        .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, e))?;
    let disposition = format!("attachment; filename=\"corrected.{}\"", format.extension());

    Ok((
        [
            (header::CONTENT_TYPE, format.content_type().to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        bytes,
    )
        .into_response())
}
