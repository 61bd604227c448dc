use axum::{http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::{errors::ServiceError, ApiResponse};

/// Standard created response
pub fn created_response<T: Serialize>(data: T) -> (StatusCode, Json<ApiResponse<T>>) {
    (StatusCode::CREATED, Json(ApiResponse::success(data)))
}

/// Validate request input, flattening field errors into one message
pub fn validate_input<T: Validate>(input: &T) -> Result<(), ServiceError> {
    input.validate().map_err(|errors| {
        let mut messages: Vec<String> = errors
            .field_errors()
            .iter()
            .flat_map(|(field, errs)| {
                errs.iter().map(move |e| match &e.message {
                    Some(message) => format!("{}: {}", field, message),
                    None => format!("{}: invalid value", field),
                })
            })
            .collect();
        messages.sort();
        ServiceError::ValidationError(messages.join("; "))
    })
}

/// `?page=&limit=` for list endpoints. Zero or missing values fall back to the
/// service defaults.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct PaginationParams {
    #[serde(default)]
    pub page: u64,
    #[serde(default)]
    pub limit: u64,
}
