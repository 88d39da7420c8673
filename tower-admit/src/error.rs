/// Errors produced by the admission middleware stack.
///
/// A rejected admission is always reported as [`AdmitError::RateLimited`], never
/// folded into a failure of the service behind the gate.
#[derive(Debug, Clone, thiserror::Error)]
pub enum AdmitError {
    /// The request was rejected by the admission limiter.
    ///
    /// The duration indicates when the client should retry.
    /// When the `axum` feature is enabled, this converts to `429 Too Many Requests`
    /// with a `Retry-After` header.
    #[error("Too many requests; retry after {retry_after:?}")]
    RateLimited {
        /// The duration to wait before retrying.
        retry_after: std::time::Duration,
    },

    /// The admitted request took longer than the allowed time to complete.
    ///
    /// When the `axum` feature is enabled, this converts to `408 Request Timeout`.
    #[error("Request timed out after admission")]
    Timeout,

    /// The inner service was not ready to take an admitted request.
    ///
    /// This is triggered by the Load Shedding layer to protect system resources.
    /// When the `axum` feature is enabled, this converts to `503 Service Unavailable`.
    #[error("Service is overloaded; request shed")]
    Overloaded,

    /// An unexpected error occurred in the inner service.
    ///
    /// The string contains the `Display` representation of the inner error.
    /// When the `axum` feature is enabled, this converts to `500 Internal Server Error`.
    #[error("Internal service error: {0}")]
    Inner(String),
}

/// Body sent to clients that were refused admission.
#[cfg(feature = "axum")]
pub const RATE_LIMITED_BODY: &str = "Too many requests. Please try again later.";

#[cfg(feature = "axum")]
impl axum::response::IntoResponse for AdmitError {
    fn into_response(self) -> axum::response::Response {
        use axum::http::StatusCode;
        use axum::response::IntoResponse;

        let (status, msg, headers) = match self {
            Self::RateLimited { retry_after } => {
                let secs = retry_after.as_secs_f64().ceil().max(1.0) as u64;
                let val = axum::http::HeaderValue::from(secs);
                (
                    StatusCode::TOO_MANY_REQUESTS,
                    RATE_LIMITED_BODY.to_string(),
                    Some((axum::http::header::RETRY_AFTER, val)),
                )
            }
            Self::Timeout => (StatusCode::REQUEST_TIMEOUT, self.to_string(), None),
            Self::Overloaded => (StatusCode::SERVICE_UNAVAILABLE, self.to_string(), None),
            Self::Inner(_) => (StatusCode::INTERNAL_SERVER_ERROR, self.to_string(), None),
        };

        let mut response = (status, msg).into_response();
        if let Some((name, value)) = headers {
            response.headers_mut().insert(name, value);
        }
        response
    }
}
