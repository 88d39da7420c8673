use std::ops::ControlFlow;
use std::sync::Arc;
use std::task::Context;
use std::task::Poll;

use opentelemetry::KeyValue;
use opentelemetry::global;
use opentelemetry::metrics::Counter;
use tower::BoxError;
use tower::Service;
use tracing::debug;

use admit_limit::Reason;
use admit_limit::Strategy;

use crate::error::AdmitError;

#[derive(Clone, Debug)]
struct AdmissionServiceMetrics {
    admitted: Counter<u64>,
    rejected: Counter<u64>,
}

/// Gates an inner service behind an admission [`Strategy`].
///
/// The strategy is consulted once per request, in `poll_ready`. A rejection
/// fails immediately with [`AdmitError::RateLimited`]; the request is never
/// queued and never asks the strategy a second time.
#[derive(Debug)]
pub struct AdmissionService<L, S>
where
    L: ?Sized,
{
    inner: S,
    limiter: Arc<L>,
    permit_acquired: bool,
    instruments: AdmissionServiceMetrics,
}

// A clone must earn its own permit
impl<L, S> Clone for AdmissionService<L, S>
where
    L: ?Sized,
    S: Clone,
{
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            limiter: Arc::clone(&self.limiter),
            permit_acquired: false,
            instruments: self.instruments.clone(),
        }
    }
}

impl<L, S, Req> Service<Req> for AdmissionService<L, S>
where
    L: Strategy + ?Sized + Send + Sync + 'static,
    S: Service<Req, Error = BoxError>,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = S::Future;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        // Check inner service readiness FIRST to avoid consuming capacity for a
        // request that cannot be served yet.
        match self.inner.poll_ready(cx) {
            Poll::Pending => return Poll::Pending,
            Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
            Poll::Ready(Ok(())) => {}
        }

        if !self.permit_acquired {
            let labels = [KeyValue::new("strategy", self.limiter.name())];

            match self.limiter.process() {
                ControlFlow::Continue(_) => {
                    self.permit_acquired = true;
                    self.instruments.admitted.add(1, &labels);
                }
                ControlFlow::Break(Reason::Overloaded { retry_after }) => {
                    self.instruments.rejected.add(1, &labels);
                    debug!(
                        strategy = self.limiter.name(),
                        ?retry_after,
                        "request rejected by admission control"
                    );
                    return Poll::Ready(Err(Box::new(AdmitError::RateLimited { retry_after })));
                }
            }
        }

        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Req) -> Self::Future {
        debug_assert!(self.permit_acquired, "call() without a successful poll_ready()");
        self.permit_acquired = false;
        self.inner.call(req)
    }
}

impl<L, S> AdmissionService<L, S>
where
    L: ?Sized,
{
    pub fn new(inner: S, limiter: Arc<L>) -> Self {
        let meter = global::meter("admission_service");
        let instruments = AdmissionServiceMetrics {
            admitted: meter.u64_counter("admitted").build(),
            rejected: meter.u64_counter("rejected").build(),
        };

        Self {
            inner,
            limiter,
            permit_acquired: false,
            instruments,
        }
    }
}
