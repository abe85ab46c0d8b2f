// ─── varia render server ────────────────────────────────────────────
//
// Serves the render entry point: query parameters select a template and
// carry its overrides, and the composed result comes back as an HTML page
// (what the rasterizer captures), raw SVG, or a rendered PNG. A CSV route
// runs a whole batch, and templates are stored through a PUT route.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    extract::{Path, RawQuery, State},
    http::{header, StatusCode},
    response::{Html, IntoResponse, Json, Response},
    routing::get,
    Router,
};
use serde_json::json;

use varia_batch::{BatchOptions, BatchPipeline};
use varia_core::VariaError;
use varia_ir::{validate_template, DataSet, RenderRequest, Template};
use varia_web::{RasterRequest, Rasterizer};

use crate::context::AppContext;

const CSV_PATH_PARAM: &str = "csvFilePath";
const DEFAULT_CSV_PATH: &str = "data.csv";

// ── Shared state ────────────────────────────────────────────────────

#[derive(Clone)]
struct AppState {
    ctx: Arc<AppContext>,
    rasterizer: Option<Arc<dyn Rasterizer>>,
}

/// A library error rendered as a JSON error response.
struct ApiError(VariaError);

impl From<VariaError> for ApiError {
    fn from(err: VariaError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            VariaError::TemplateNotFound(_) => StatusCode::NOT_FOUND,
            VariaError::InvalidRequest(_)
            | VariaError::InvalidTemplate(_)
            | VariaError::InvalidUrl { .. }
            | VariaError::Parse { .. } => StatusCode::BAD_REQUEST,
            VariaError::MalformedDocument(_) => StatusCode::UNPROCESSABLE_ENTITY,
            VariaError::RenderTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            VariaError::DocumentLoad { .. }
            | VariaError::Navigation { .. }
            | VariaError::Capture(_)
            | VariaError::Upload { .. } => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::warn!("request failed: {}", self.0);
        }
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

// ── Entry point ─────────────────────────────────────────────────────

pub fn router(ctx: Arc<AppContext>, rasterizer: Option<Arc<dyn Rasterizer>>) -> Router {
    Router::new()
        .route("/generate", get(generate_page))
        .route("/api/compose", get(compose_svg))
        .route("/api/render", get(render_png))
        .route("/api/csv", get(render_csv))
        .route(
            "/api/templates/{project_id}",
            get(get_template).put(put_template),
        )
        .with_state(AppState { ctx, rasterizer })
}

pub async fn run_server(ctx: AppContext, addr: SocketAddr) -> Result<()> {
    let rasterizer = match ctx.rasterizer() {
        Ok(r) => Some(r),
        Err(e) => {
            tracing::warn!("rendering disabled: {:#}", e);
            None
        }
    };
    let app = router(Arc::new(ctx), rasterizer);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    println!("📡 Varia render server listening on http://{}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}

// ── Helpers ─────────────────────────────────────────────────────────

fn query_pairs(query: &Option<String>) -> Vec<(String, String)> {
    url::form_urlencoded::parse(query.as_deref().unwrap_or("").as_bytes())
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect()
}

fn encode_pairs(pairs: &[(String, String)]) -> String {
    url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(pairs)
        .finish()
}

fn require_rasterizer(state: &AppState) -> ApiResult<Arc<dyn Rasterizer>> {
    state.rasterizer.clone().ok_or_else(|| {
        ApiError(VariaError::Other("no rasterizer is configured".into()))
    })
}

// ── Handlers ────────────────────────────────────────────────────────

async fn generate_page(State(state): State<AppState>, RawQuery(query): RawQuery) -> ApiResult<Html<String>> {
    let request = RenderRequest::from_query_pairs(query_pairs(&query))?;
    let composed = state.ctx.compose(&request).await?;
    Ok(Html(composed.to_html(state.ctx.marker_id())))
}

async fn compose_svg(State(state): State<AppState>, RawQuery(query): RawQuery) -> ApiResult<Response> {
    let request = RenderRequest::from_query_pairs(query_pairs(&query))?;
    let composed = state.ctx.compose(&request).await?;
    Ok(([(header::CONTENT_TYPE, "image/svg+xml")], composed.svg).into_response())
}

async fn render_png(State(state): State<AppState>, RawQuery(query): RawQuery) -> ApiResult<Response> {
    let rasterizer = match require_rasterizer(&state) {
        Ok(r) => r,
        Err(e) => {
            return Ok((StatusCode::SERVICE_UNAVAILABLE, Json(json!({ "error": e.0.to_string() })))
                .into_response())
        }
    };
    // Reject requests the page itself would refuse before launching a browser.
    RenderRequest::from_query_pairs(query_pairs(&query))?;

    let url = state.ctx.generate_url(query.as_deref().unwrap_or(""));
    let image = rasterizer
        .render(&RasterRequest::new(url, &state.ctx.config.rasterizer))
        .await?;
    Ok(([(header::CONTENT_TYPE, "image/png")], image.bytes).into_response())
}

async fn render_csv(State(state): State<AppState>, RawQuery(query): RawQuery) -> ApiResult<Response> {
    let rasterizer = match require_rasterizer(&state) {
        Ok(r) => r,
        Err(e) => {
            return Ok((StatusCode::SERVICE_UNAVAILABLE, Json(json!({ "error": e.0.to_string() })))
                .into_response())
        }
    };

    let mut pairs = query_pairs(&query);
    let csv_path = pairs
        .iter()
        .position(|(k, _)| k == CSV_PATH_PARAM)
        .map(|i| pairs.remove(i).1)
        .unwrap_or_else(|| DEFAULT_CSV_PATH.to_string());
    pairs.retain(|(k, _)| k != CSV_PATH_PARAM);

    let data = DataSet::load(std::path::Path::new(&csv_path))?;
    let url_template = state.ctx.generate_url(&encode_pairs(&pairs));
    let pipeline = BatchPipeline::new(
        rasterizer,
        Arc::clone(&state.ctx.documents),
        BatchOptions::from_config(&state.ctx.config),
    );
    let report = pipeline.render_batch(data.rows(), &url_template).await?;
    Ok(Json(json!({ "imageUrls": report.references() })).into_response())
}

async fn get_template(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
) -> ApiResult<Json<Template>> {
    Ok(Json(state.ctx.templates.get(&project_id).await?))
}

async fn put_template(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
    Json(template): Json<Template>,
) -> ApiResult<StatusCode> {
    validate_template(&template).map_err(|errors| {
        let msgs: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
        VariaError::InvalidTemplate(msgs.join("; "))
    })?;
    state.ctx.templates.put(&project_id, &template).await?;
    tracing::info!("stored template for project {}", project_id);
    Ok(StatusCode::NO_CONTENT)
}
