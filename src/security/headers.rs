//! Security response headers.
//!
//! # Responsibilities
//! - Attach a fixed bundle of defensive headers to every response
//!
//! # Design Decisions
//! - Headers are set with `insert`, never appended: decorating twice is the
//!   same as decorating once, and a handler's own value is overwritten
//! - Only headers are touched; status and body pass through unchanged

use axum::http::header::{
    CONTENT_SECURITY_POLICY, REFERRER_POLICY, STRICT_TRANSPORT_SECURITY, X_CONTENT_TYPE_OPTIONS,
    X_FRAME_OPTIONS,
};
use axum::http::{HeaderMap, HeaderName, HeaderValue, Response};

const PERMISSIONS_POLICY: HeaderName = HeaderName::from_static("permissions-policy");

const CSP: &str = "default-src 'self'; \
    script-src 'self'; \
    style-src 'self' 'unsafe-inline'; \
    font-src 'self'; \
    img-src 'self' data:; \
    object-src 'none'; \
    frame-ancestors 'none'";

/// Applies the defensive header bundle to outgoing responses.
#[derive(Debug, Clone)]
pub struct ResponseHardener {
    headers: Vec<(HeaderName, HeaderValue)>,
}

impl Default for ResponseHardener {
    fn default() -> Self {
        Self {
            headers: vec![
                (X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff")),
                (X_FRAME_OPTIONS, HeaderValue::from_static("DENY")),
                (
                    STRICT_TRANSPORT_SECURITY,
                    HeaderValue::from_static("max-age=31536000; includeSubDomains"),
                ),
                (CONTENT_SECURITY_POLICY, HeaderValue::from_static(CSP)),
                (
                    REFERRER_POLICY,
                    HeaderValue::from_static("strict-origin-when-cross-origin"),
                ),
                (
                    PERMISSIONS_POLICY,
                    HeaderValue::from_static(
                        "geolocation=(), microphone=(), camera=(), payment=(), usb=(), interest-cohort=()",
                    ),
                ),
            ],
        }
    }
}

impl ResponseHardener {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the bundle on `response` and hand it back.
    pub fn decorate<B>(&self, mut response: Response<B>) -> Response<B> {
        self.apply(response.headers_mut());
        response
    }

    fn apply(&self, headers: &mut HeaderMap) {
        for (name, value) in &self.headers {
            headers.insert(name.clone(), value.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    #[test]
    fn test_sets_full_bundle() {
        let response = Response::new("body");
        let response = ResponseHardener::new().decorate(response);
        let headers = response.headers();

        assert_eq!(headers[X_CONTENT_TYPE_OPTIONS], "nosniff");
        assert_eq!(headers[X_FRAME_OPTIONS], "DENY");
        assert!(headers.contains_key(STRICT_TRANSPORT_SECURITY));
        assert!(headers[CONTENT_SECURITY_POLICY].to_str().unwrap().contains("script-src 'self'"));
        assert!(headers.contains_key(REFERRER_POLICY));
        assert!(headers.contains_key("permissions-policy"));
    }

    #[test]
    fn test_decorate_is_idempotent() {
        let hardener = ResponseHardener::new();
        let once = hardener.decorate(Response::new(()));
        let twice = hardener.decorate(hardener.decorate(Response::new(())));

        assert_eq!(once.headers(), twice.headers());
        assert_eq!(twice.headers().get_all(X_FRAME_OPTIONS).iter().count(), 1);
    }

    #[test]
    fn test_status_and_body_untouched() {
        let mut response = Response::new("payload");
        *response.status_mut() = StatusCode::CREATED;
        let response = ResponseHardener::new().decorate(response);

        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(*response.body(), "payload");
    }

    #[test]
    fn test_overrides_handler_value() {
        let mut response = Response::new(());
        response
            .headers_mut()
            .insert(X_FRAME_OPTIONS, HeaderValue::from_static("ALLOWALL"));
        let response = ResponseHardener::new().decorate(response);
        assert_eq!(response.headers()[X_FRAME_OPTIONS], "DENY");
    }
}
