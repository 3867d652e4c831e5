//! HTTP API for submitting and observing intents.

use std::sync::Arc;

use axum::{
	extract::{Path, State},
	http::StatusCode,
	response::Json,
	routing::{get, post},
	Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info};

use bridge_core::{BridgeEngine, IntentRequest};
use bridge_types::{Address, BridgeError, BridgeRoute, PayloadDescriptor, SourceIdentity};

#[derive(Clone)]
struct AppState {
	engine: Arc<BridgeEngine>,
}

pub fn router(engine: Arc<BridgeEngine>) -> Router {
	Router::new()
		.route("/intents", post(submit_intent))
		.route("/intents/{id}", get(get_intent))
		.route("/intents/{id}/retry", post(retry_intent))
		.route("/intents/{id}/cancel", post(cancel_intent))
		.route("/health", get(health))
		.with_state(AppState { engine })
		.layer(TraceLayer::new_for_http())
		.layer(CorsLayer::permissive())
}

pub async fn serve(engine: Arc<BridgeEngine>, port: u16) -> anyhow::Result<()> {
	let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;
	info!("API listening on port {}", port);
	axum::serve(listener, router(engine))
		.with_graceful_shutdown(crate::shutdown_signal())
		.await?;
	Ok(())
}

#[derive(Deserialize)]
struct SubmitIntentBody {
	source_chain: String,
	destination_chain_id: u64,
	user_address: String,
	#[serde(default)]
	destination_address: Option<String>,
	amount: u128,
	ticket_count: u32,
	#[serde(default)]
	syndicate_id: Option<String>,
	#[serde(default)]
	referrer: Option<String>,
	route: BridgeRoute,
}

type ApiError = (StatusCode, Json<Value>);

fn bad_request(message: impl Into<String>) -> ApiError {
	(
		StatusCode::BAD_REQUEST,
		Json(json!({ "error": message.into() })),
	)
}

fn error_response(error: BridgeError) -> ApiError {
	let status = match &error {
		BridgeError::IntentNotFound => StatusCode::NOT_FOUND,
		BridgeError::CancellationRefused { .. }
		| BridgeError::InvalidTransition { .. }
		| BridgeError::StaleStage { .. } => StatusCode::CONFLICT,
		BridgeError::BuildFailed(_) | BridgeError::Config(_) => StatusCode::BAD_REQUEST,
		_ => StatusCode::INTERNAL_SERVER_ERROR,
	};
	(status, Json(json!({ "error": error.to_string() })))
}

fn parse_address(field: &str, value: &str) -> Result<Address, ApiError> {
	let address = Address::from_hex(value)
		.map_err(|e| bad_request(format!("{}: {}", field, e)))?;
	if !address.is_evm() {
		return Err(bad_request(format!("{}: not a 20-byte address", field)));
	}
	Ok(address)
}

async fn submit_intent(
	State(state): State<AppState>,
	Json(body): Json<SubmitIntentBody>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
	let destination_address = body
		.destination_address
		.as_deref()
		.map(|s| parse_address("destination_address", s))
		.transpose()?;
	let referrer = body
		.referrer
		.as_deref()
		.map(|s| parse_address("referrer", s))
		.transpose()?;

	let request = IntentRequest {
		source_chain: body.source_chain,
		destination_chain_id: body.destination_chain_id,
		user_address: SourceIdentity(body.user_address),
		destination_address,
		amount: body.amount,
		payload: PayloadDescriptor {
			ticket_count: body.ticket_count,
			syndicate_id: body.syndicate_id,
			referrer,
		},
		route: body.route,
	};

	let intent = state.engine.submit(request).await.map_err(error_response)?;

	// Execution runs in the background; the stage log is the progress record.
	let engine = state.engine.clone();
	let id = intent.id.clone();
	tokio::spawn(async move {
		if let Err(e) = engine.execute(&id).await {
			error!(intent_id = %id, error = %e, "intent execution failed");
		}
	});

	Ok((StatusCode::CREATED, Json(json!({ "intent": intent }))))
}

async fn get_intent(
	State(state): State<AppState>,
	Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
	let (intent, stages) = state.engine.status(&id).await.map_err(error_response)?;
	Ok(Json(json!({ "intent": intent, "stages": stages })))
}

async fn retry_intent(
	State(state): State<AppState>,
	Path(id): Path<String>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
	let (intent, _) = state.engine.status(&id).await.map_err(error_response)?;
	if intent.status != bridge_types::BridgeStage::Failed {
		return Err(error_response(BridgeError::InvalidTransition {
			from: intent.status,
			to: bridge_types::BridgeStage::Quoting,
		}));
	}

	let engine = state.engine.clone();
	let intent_id = id.clone();
	tokio::spawn(async move {
		if let Err(e) = engine.retry(&intent_id).await {
			error!(intent_id = %intent_id, error = %e, "intent retry failed");
		}
	});

	Ok((StatusCode::ACCEPTED, Json(json!({ "intent_id": id }))))
}

async fn cancel_intent(
	State(state): State<AppState>,
	Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
	let intent = state.engine.cancel(&id).await.map_err(error_response)?;
	Ok(Json(json!({ "intent": intent })))
}

async fn health() -> Json<Value> {
	Json(json!({ "status": "ok" }))
}
