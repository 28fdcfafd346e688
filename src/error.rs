//! Error taxonomy and axum error-response helpers.

use axum::{
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// Top-level error taxonomy. Transport and decoding errors are fatal to the
/// affected request only; control-link and malformed-JSON errors are fatal
/// to the process.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("upstream transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("unhandled Content-Encoding {0}")]
    UnhandledEncoding(String),

    #[error("unhandled charset {0}")]
    UnhandledCharset(String),

    #[error("invalid media type: {0}")]
    InvalidMediaType(String),

    #[error("malformed SSE event data: {0}")]
    SseParse(String),

    #[error("control link error: {0}")]
    ControlLink(#[from] std::io::Error),

    #[error("agent process error: {0}")]
    Agent(String),
}

#[derive(Serialize)]
struct ErrorResponse<'a> {
    error: ErrorDetail<'a>,
}

#[derive(Serialize)]
struct ErrorDetail<'a> {
    #[serde(rename = "type")]
    error_type: &'static str,
    code: &'a str,
    message: &'a str,
}

pub const HEADER_ERROR_CODE: &str = "X-Proxy-Error-Code";

pub fn create_error(status: StatusCode, code: impl Into<String>, message: impl Into<String>) -> Response {
    let code_str = code.into();
    let message_str = message.into();

    let mut headers = HeaderMap::with_capacity(1);
    if let Ok(val) = HeaderValue::from_str(&code_str) {
        headers.insert(HEADER_ERROR_CODE, val);
    }

    (
        status,
        headers,
        Json(ErrorResponse {
            error: ErrorDetail {
                error_type: status.canonical_reason().unwrap_or("error"),
                code: &code_str,
                message: &message_str,
            },
        }),
    )
        .into_response()
}

pub fn bad_gateway(code: impl Into<String>, message: impl Into<String>) -> Response {
    create_error(StatusCode::BAD_GATEWAY, code, message)
}

pub fn internal_error(code: impl Into<String>, message: impl Into<String>) -> Response {
    create_error(StatusCode::INTERNAL_SERVER_ERROR, code, message)
}

pub fn unprocessable(code: impl Into<String>, message: impl Into<String>) -> Response {
    create_error(StatusCode::UNPROCESSABLE_ENTITY, code, message)
}
