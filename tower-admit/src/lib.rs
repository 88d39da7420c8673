//! # Tower Admit
//!
//! `tower-admit` puts an [`admit_limit`] strategy in front of any
//! [Tower](https://github.com/tower-rs/tower) service, typically a handler that makes an
//! expensive, externally billed call.
//!
//! Admission is fail-fast: the strategy is asked exactly once per request and a
//! refusal surfaces immediately as [`AdmitError::RateLimited`]. Requests are never
//! queued waiting for capacity.
//!
//! ## The Managed Stack
//! [`ManagedAdmissionLayer`] is a pre-composed stack for production use:
//!
//! 1. **Admission**: Rejects requests the [`admit_limit::Strategy`] refuses.
//! 2. **Load Shedding**: Rejects admitted requests with `AdmitError::Overloaded`
//!    if the inner service is not ready for them.
//! 3. **Timeouts**: Fails with `AdmitError::Timeout` if the inner service does not
//!    respond within a defined duration.
//! 4. **Error Mapping**: Converts internal Tower errors into the unified, cloneable
//!    [`AdmitError`] domain.
//!
//! ## Feature Flags
//!
//! - `axum`: Enables `IntoResponse` for [`AdmitError`], allowing automatic conversion
//!   to HTTP status codes (429, 408, 503, 500).

mod error;
mod layer;
mod managed_layer;
mod service;


#[cfg(feature = "axum")]
pub use error::RATE_LIMITED_BODY;
pub use error::AdmitError;
pub use layer::AdmissionLayer;
pub use managed_layer::ManagedAdmissionLayer;
pub use service::AdmissionService;
