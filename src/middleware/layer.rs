//! Tower integration.

use std::fmt;
use std::task::{Context, Poll};

use futures::future::BoxFuture;
use http::{Request, Response, StatusCode};
use tower::{Layer, Service};
use tracing::trace;

use super::{Admission, Outcome};

/// Applies an [`Admission`] check in front of an HTTP service.
///
/// Rejected requests get `429 Too Many Requests`, requests the limiter could
/// not evaluate get `500 Internal Server Error`; neither reaches the inner
/// service. Admitted requests hold their permit until the inner service's
/// future completes, is dropped, or panics.
pub struct AdmissionLayer<B> {
    admission: Admission<Request<B>>,
}

impl<B> AdmissionLayer<B> {
    /// Create a layer from a configured admission check.
    pub fn new(admission: Admission<Request<B>>) -> Self {
        Self { admission }
    }
}

impl<B> Clone for AdmissionLayer<B> {
    fn clone(&self) -> Self {
        Self {
            admission: self.admission.clone(),
        }
    }
}

impl<B> fmt::Debug for AdmissionLayer<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdmissionLayer").finish_non_exhaustive()
    }
}

impl<S, B> Layer<S> for AdmissionLayer<B> {
    type Service = AdmissionService<S, B>;

    fn layer(&self, inner: S) -> Self::Service {
        AdmissionService {
            inner,
            admission: self.admission.clone(),
        }
    }
}

/// Service produced by [`AdmissionLayer`].
pub struct AdmissionService<S, B> {
    inner: S,
    admission: Admission<Request<B>>,
}

impl<S: Clone, B> Clone for AdmissionService<S, B> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            admission: self.admission.clone(),
        }
    }
}

impl<S: fmt::Debug, B> fmt::Debug for AdmissionService<S, B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdmissionService")
            .field("inner", &self.inner)
            .finish_non_exhaustive()
    }
}

fn status_response<T: Default>(status: StatusCode) -> Response<T> {
    let mut response = Response::new(T::default());
    *response.status_mut() = status;
    response
}

impl<S, B, ResBody> Service<Request<B>> for AdmissionService<S, B>
where
    S: Service<Request<B>, Response = Response<ResBody>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: Send + 'static,
    B: Send + 'static,
    ResBody: Default + Send + 'static,
{
    type Response = Response<ResBody>;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request<B>) -> Self::Future {
        // Keep the instance that was polled ready; leave a fresh clone behind.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let admission = self.admission.clone();
        let key = admission.key(&request);

        Box::pin(async move {
            let outcome = admission.evaluate(&key).await;
            trace!(key = %key, outcome = outcome.label(), "Admission decided");

            match outcome {
                Outcome::Admitted(permit) => {
                    let response = inner.call(request).await;
                    permit.release().await;
                    response
                }
                Outcome::Rejected => Ok(status_response(StatusCode::TOO_MANY_REQUESTS)),
                Outcome::Failed(_) => Ok(status_response(StatusCode::INTERNAL_SERVER_ERROR)),
            }
        })
    }
}
