use std::collections::{BTreeMap, HashMap};

use axum::{
    extract::State,
    http::{header, Method, StatusCode},
    response::{Html, IntoResponse},
    routing::{get, post},
    Form, Json, Router,
};
use serde_json::{json, Value};
use tower_http::cors::{Any, CorsLayer};
use tracing::debug;

use super::state::ServeState;

pub fn build_install_router() -> Router<ServeState> {
    Router::new()
        .route("/health", get(health_handler))
        .route("/install", get(page_handler))
        .route("/install/state", get(state_handler))
        .route("/install/progress", get(progress_handler))
        .route("/install/emit", post(emit_handler))
        .layer(cors_layer())
}

fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any)
}

async fn health_handler(State(state): State<ServeState>) -> Json<Value> {
    let engine = state.session().engine();
    Json(json!({
        "status": "ok",
        "flow": engine.name(),
        "flow_status": engine.status(),
        "started_at": state.started_at.to_rfc3339(),
    }))
}

/// Renders the wizard, starting it on the first visit.
async fn page_handler(State(state): State<ServeState>) -> Html<String> {
    if state.session().ensure_started() {
        debug!("wizard start scheduled by first page render");
    }
    Html(state.session().render_page())
}

async fn state_handler(State(state): State<ServeState>) -> Json<Value> {
    Json(state.session().snapshot())
}

async fn progress_handler(State(state): State<ServeState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain")],
        state.session().engine().progress().to_string(),
    )
}

/// Delivers a form-encoded event. The `event` field names it, the rest is
/// the payload. Events nobody waits for are dropped and still answered 200.
async fn emit_handler(
    State(state): State<ServeState>,
    Form(mut fields): Form<HashMap<String, String>>,
) -> StatusCode {
    let Some(event) = fields.remove("event") else {
        debug!("emit without an event name ignored");
        return StatusCode::OK;
    };
    let payload: BTreeMap<String, String> = fields.into_iter().collect();
    let delivered = state.session().engine().emit(&event, payload);
    debug!(event = %event, delivered, "event emitted");
    StatusCode::OK
}
