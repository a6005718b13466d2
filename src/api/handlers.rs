use std::sync::Arc;
use axum::{
    extract::State,
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use log::{info, warn};

use crate::rates::{RateEntry, RateTable, RelayMessage};
use crate::relay::{Publisher, RelayState, RelayStatus, Selector};

#[derive(Clone)]
pub struct ApiState {
    pub rates: Arc<RateTable>,
    pub selector: Selector,
    pub status: RelayStatus,
    pub publisher: Arc<dyn Publisher>,
    pub topic: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub state: RelayState,
    pub currency: String,
    pub rate: Option<String>,
    pub topic: String,
    pub ticks: u64,
    pub selections: u64,
    pub ignored: u64,
    pub timestamp: String,
}

#[derive(Debug, Serialize)]
pub struct RatesResponse {
    pub rates: Vec<RateEntry>,
    pub default: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SelectRequest {
    pub currency: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SelectResponse {
    pub success: bool,
    pub message: String,
}

// GET /api/health - Health check endpoint
pub async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "rate_relay",
        "timestamp": chrono::Utc::now()
    }))
}

// GET /api/status - Relay state, current selection and counters
pub async fn get_status(State(state): State<ApiState>) -> Json<StatusResponse> {
    let currency = state.selector.current();
    let rate = state.rates.rate_for(&currency).map(str::to_string);
    let (ticks, selections, ignored) = state.status.get_stats();

    Json(StatusResponse {
        state: state.status.get_state(),
        currency,
        rate,
        topic: state.topic.clone(),
        ticks,
        selections,
        ignored,
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

// GET /api/rates - The full rate table in publication order
pub async fn get_rates(State(state): State<ApiState>) -> Json<RatesResponse> {
    Json(RatesResponse {
        rates: state.rates.entries().to_vec(),
        default: state.rates.default_code().map(str::to_string),
    })
}

// POST /api/currency - Publish a selection message onto the topic.
// The selector itself only changes once the message comes back through the subscription.
pub async fn select_currency(
    State(state): State<ApiState>,
    Json(request): Json<SelectRequest>,
) -> Result<(StatusCode, Json<SelectResponse>), (StatusCode, Json<SelectResponse>)> {
    let code = request.currency.trim();

    if !state.rates.contains(code) {
        warn!("Rejected selection of unknown currency '{}'", code);
        return Err((StatusCode::BAD_REQUEST, Json(SelectResponse {
            success: false,
            message: format!("Unknown currency: {}", code),
        })));
    }

    let message = RelayMessage::Currency(code.to_string()).to_string();
    match state.publisher.publish(&state.topic, message) {
        Ok(()) => {
            info!("Selection of {} requested via API", code);
            Ok((StatusCode::ACCEPTED, Json(SelectResponse {
                success: true,
                message: format!("Selection of {} published", code),
            })))
        }
        Err(e) => {
            warn!("Failed to publish selection of {}: {}", code, e);
            Err((StatusCode::SERVICE_UNAVAILABLE, Json(SelectResponse {
                success: false,
                message: e.to_string(),
            })))
        }
    }
}

// Create the API router
pub fn create_api_router(state: ApiState) -> Router {
    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route("/status", get(get_status))
        .route("/rates", get(get_rates))
        .route("/currency", post(select_currency))
        .with_state(state);

    Router::new()
        .nest("/api", api_routes)
}
