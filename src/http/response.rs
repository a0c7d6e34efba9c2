//! Response construction for denied requests.
//!
//! The client only ever sees the status and its canonical reason. Which
//! rule matched stays in the logs.

use axum::body::Body;
use axum::http::{header, HeaderValue, Response, StatusCode};
use axum::response::IntoResponse;

use crate::security::Decision;

pub fn deny_response(decision: &Decision) -> Response<Body> {
    status_response(decision.status)
}

pub fn status_response(status: StatusCode) -> Response<Body> {
    let body = status.canonical_reason().unwrap_or("Request denied");
    let mut response = (status, body).into_response();
    response.headers_mut().insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("no-store"),
    );
    response
}
