use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use admit_limit::Strategy;
use tower::BoxError;
use tower::Layer;
use tower::Service;
use tower::util::BoxCloneSyncService;

use crate::AdmissionService;
use crate::AdmitError;

/// A pre-composed admission stack for costly backends.
///
/// ### Error Responsibilities:
/// - **Admission (`AdmitError::RateLimited`)**: The limiter refused the request.
///   This happens at the `poll_ready` stage and is near-instant.
/// - **LoadShedding (`AdmitError::Overloaded`)**: The inner service was not ready
///   to accept an admitted request.
/// - **Timeout (`AdmitError::Timeout`)**: The *inner service* took longer than
///   `max_wait` to respond (e.g., a slow model API).
/// - **Inner (`AdmitError::Inner`)**: Any other inner service failure.
pub struct ManagedAdmissionLayer<L, Req>
where
    L: ?Sized,
{
    limiter: Arc<L>,
    max_wait: Duration,
    _phantom: PhantomData<fn(Req)>,
}

// Note: Deriving Clone causes issues when using the layer with Axum.
impl<L, Req> Clone for ManagedAdmissionLayer<L, Req>
where
    L: ?Sized,
{
    fn clone(&self) -> Self {
        Self {
            limiter: self.limiter.clone(),
            max_wait: self.max_wait,
            _phantom: PhantomData,
        }
    }
}

impl<S, L, Req> Layer<S> for ManagedAdmissionLayer<L, Req>
where
    L: Strategy + ?Sized + Send + Sync + 'static,
    S: Service<Req, Error = BoxError> + Clone + Send + Sync + 'static,
    S::Future: Send + 'static,
    S::Response: 'static,
    Req: Send + 'static,
{
    type Service = BoxCloneSyncService<Req, S::Response, BoxError>;

    fn layer(&self, inner: S) -> Self::Service {
        let admission = AdmissionService::new(inner, self.limiter.clone());

        // Timeout is outer to ensure a hard deadline on the entire process.
        let svc = tower::ServiceBuilder::new()
            .timeout(self.max_wait)
            .load_shed()
            .service(admission);

        let mapped_svc = tower::util::MapErr::new(svc, map_error);

        BoxCloneSyncService::new(mapped_svc)
    }
}

impl<L, Req> ManagedAdmissionLayer<L, Req>
where
    L: Strategy + ?Sized,
{
    pub fn new(limiter: Arc<L>, max_wait: Duration) -> Self {
        Self {
            limiter,
            max_wait,
            _phantom: PhantomData,
        }
    }
}

/// Map the mixed errors of the stack into `AdmitError`.
fn map_error(err: BoxError) -> BoxError {
    if err.is::<tower::timeout::error::Elapsed>() {
        BoxError::from(AdmitError::Timeout)
    } else if err.is::<tower::load_shed::error::Overloaded>() {
        BoxError::from(AdmitError::Overloaded)
    } else if err.is::<AdmitError>() {
        err
    } else {
        Box::from(AdmitError::Inner(err.to_string()))
    }
}
