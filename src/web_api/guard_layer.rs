//! Admission middleware
//!
//! Every request passes through `AdmissionGuard::try_admit`; the permit is
//! held until the inner service has produced its response.

use crate::admission_guard::{AdmissionGuard, Rejection};
use axum::{
    extract::{ConnectInfo, Request, State},
    http::{header, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;

/// Middleware function applying the admission guard
pub async fn admission_guard(
    State(guard): State<Arc<AdmissionGuard>>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    request: Request,
    next: Next,
) -> Response {
    let peer = connect_info.map(|ConnectInfo(addr)| addr);
    let descriptor = guard.classify(request.uri().path(), request.method(), peer);

    match guard.try_admit(&descriptor) {
        Ok(permit) => {
            let response = next.run(request).await;
            drop(permit);
            response
        }
        Err(rejection) => {
            tracing::debug!(
                path = %request.uri().path(),
                peer = ?peer,
                reason = ?rejection,
                "Request rejected by admission guard"
            );
            rejection_response(rejection, guard.policy().retry_after_secs)
        }
    }
}

/// Rejection as an HTTP response with retry hint and no-store caching
pub fn rejection_response(rejection: Rejection, retry_after_secs: u32) -> Response {
    let body = Json(json!({
        "ok": false,
        "error_code": rejection.code(),
        "message": rejection.message()
    }));

    let mut response = (rejection.status_code(), body).into_response();
    let headers = response.headers_mut();
    headers.insert(header::RETRY_AFTER, HeaderValue::from(retry_after_secs));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    #[test]
    fn test_rate_rejection_response() {
        let response = rejection_response(Rejection::RateLimited, 1);
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "1");
        assert_eq!(response.headers()[header::CACHE_CONTROL], "no-store");
    }

    #[test]
    fn test_server_busy_is_503() {
        let response = rejection_response(Rejection::ServerBusy, 3);
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(response.headers()[header::RETRY_AFTER], "3");

        let response = rejection_response(Rejection::InitFailed, 1);
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
