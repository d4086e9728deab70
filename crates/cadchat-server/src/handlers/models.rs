//! Conversion service endpoint
//!
//! `POST /api/v1/models` runs the in-process pipeline for one request. The
//! success body is a model reference; failures are `PipelineFailure`
//! objects, the shape `HttpPipeline` reads back.

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use cadchat_core::ErrorCode;
use cadchat_pipeline::{ConversionRequest, PipelineError, PipelineFailure, PipelineStep};
use tracing::{info, warn};

use crate::error::ApiError;
use crate::state::AppState;

pub async fn create_model(
    State(state): State<AppState>,
    payload: Result<Json<ConversionRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(request) = payload?;
    let pipeline = state.conversion.clone().ok_or_else(|| {
        ApiError::Unavailable("conversion service is disabled in remote pipeline mode".to_string())
    })?;

    if let Some(failure) = validate(&request, state.max_source_length) {
        return Ok(failure_response(failure));
    }

    match pipeline.convert(request).await {
        Ok(reference) => {
            info!(document_id = %reference.document_id, "conversion service created document");
            Ok((StatusCode::OK, Json(reference)).into_response())
        }
        Err(failure) => {
            warn!(step = %failure.step, code = %failure.error_code, "conversion service failed: {}", failure.message);
            Ok(failure_response(failure))
        }
    }
}

fn validate(request: &ConversionRequest, max_source_length: usize) -> Option<PipelineFailure> {
    let invalid = |message: String| {
        PipelineFailure::new(PipelineStep::Validate, PipelineError::InvalidInput(message))
    };
    if request.geometry_source.trim().is_empty() {
        return Some(invalid("geometrySource must not be empty".to_string()));
    }
    let length = request.geometry_source.chars().count();
    if length > max_source_length {
        return Some(invalid(format!(
            "geometrySource is {} characters; the limit is {}",
            length, max_source_length
        )));
    }
    None
}

fn failure_response(failure: PipelineFailure) -> Response {
    (status_for(failure.error_code), Json(failure)).into_response()
}

pub fn status_for(code: ErrorCode) -> StatusCode {
    match code {
        ErrorCode::InvalidInput | ErrorCode::UnknownTool => StatusCode::BAD_REQUEST,
        ErrorCode::CompileError | ErrorCode::TessellationError => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorCode::RemoteError | ErrorCode::TransportError => StatusCode::BAD_GATEWAY,
        ErrorCode::Timeout => StatusCode::GATEWAY_TIMEOUT,
        ErrorCode::PipelineError => StatusCode::INTERNAL_SERVER_ERROR,
    }
}
