use std::sync::Arc;

use admit_limit::Strategy;
use tower::Layer;

use crate::service::AdmissionService;

/// Applies admission control to requests.
///
/// Every service produced by the layer shares the same limiter.
#[derive(Debug)]
pub struct AdmissionLayer<L>
where
    L: ?Sized,
{
    limiter: Arc<L>,
}

impl<L> Clone for AdmissionLayer<L>
where
    L: ?Sized,
{
    fn clone(&self) -> Self {
        Self {
            limiter: Arc::clone(&self.limiter),
        }
    }
}

impl<L> AdmissionLayer<L>
where
    L: Strategy + ?Sized,
{
    /// Create an AdmissionLayer
    pub fn new(limiter: Arc<L>) -> Self {
        AdmissionLayer { limiter }
    }
}

impl<L, S> Layer<S> for AdmissionLayer<L>
where
    L: ?Sized,
{
    type Service = AdmissionService<L, S>;

    fn layer(&self, service: S) -> Self::Service {
        AdmissionService::new(service, self.limiter.clone())
    }
}
