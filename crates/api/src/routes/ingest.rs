//! Ingestion Routes
//!
//! `POST /index.php/:study_number/:study_key/:table/:operation` accepts the
//! form fields the mobile clients send and forwards them to the router as
//! a named operation message.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Form, Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;

use crate::error::ApiError;
use crate::AppState;
use router::Operation;

/// Path segments of an ingestion request
#[derive(Debug, Deserialize)]
pub struct IngestPath {
    pub study_number: String,
    pub study_key: String,
    pub table: String,
    pub operation: String,
}

/// Form body of an ingestion request
#[derive(Debug, Deserialize)]
pub struct IngestForm {
    pub device_id: String,
    /// JSON array of records, string-encoded
    pub data: Option<String>,
    pub start: Option<f64>,
    pub end: Option<f64>,
}

/// Operation addressed by the trailing path segment
pub fn operation_for(segment: &str) -> Option<Operation> {
    match segment {
        "insert" => Some(Operation::InsertData),
        "update" => Some(Operation::UpdateData),
        "delete" => Some(Operation::DeleteData),
        "query" => Some(Operation::GetData),
        _ => None,
    }
}

fn message_body(operation: Operation, table: &str, form: IngestForm) -> Result<Value, ApiError> {
    if operation.write_kind().is_some() {
        let data = form
            .data
            .ok_or_else(|| ApiError::BadRequest("missing form field `data`".to_string()))?;
        Ok(json!({
            "device_id": form.device_id,
            "table": table,
            "data": data,
        }))
    } else {
        let (Some(start), Some(end)) = (form.start, form.end) else {
            return Err(ApiError::BadRequest(
                "query requires form fields `start` and `end`".to_string(),
            ));
        };
        Ok(json!({
            "device_id": form.device_id,
            "table": table,
            "start": start,
            "end": end,
        }))
    }
}

/// Handle one ingestion request
pub async fn handle(
    State(state): State<Arc<AppState>>,
    Path(path): Path<IngestPath>,
    Form(form): Form<IngestForm>,
) -> Result<Response, ApiError> {
    let operation = operation_for(&path.operation)
        .ok_or_else(|| ApiError::UnknownOperation(path.operation.clone()))?;
    debug!(
        "Study {} {} on {} from {}",
        path.study_number, operation, path.table, form.device_id
    );

    let body = message_body(operation, &path.table, form)?;
    match operation.write_kind() {
        Some(_) => {
            // Outcome is logged by the router.
            let _completion = state.router.dispatch(operation.name(), body).await?;
            Ok(StatusCode::OK.into_response())
        }
        None => {
            let rows = state.router.request(operation.name(), body).await?.into_rows();
            Ok(Json(rows).into_response())
        }
    }
}
