//! Tower service wrapper around a [`Handler`].
//!
//! [`HandlerService<H, T>`] wraps a single handler and implements
//! `tower::Service<Arc<Context>>`. Rules and jobs store it type-erased as a
//! [`BoxedHandlerService`], so any tower service with the same request and
//! response types (for example a handler with extra layers stacked on top)
//! can be registered as well.

use std::marker::PhantomData;
use std::sync::Arc;
use std::task::{Context as TaskContext, Poll};

use futures::FutureExt;
use futures::future::BoxFuture;
use tower::util::BoxCloneSyncService;
use tower::{BoxError, Service};

use belfry_core::Outcome;

use super::traits::Handler;
use crate::context::Context;

/// Type-erased handler service stored in rules and jobs.
pub type BoxedHandlerService = BoxCloneSyncService<Arc<Context>, Outcome, BoxError>;

/// A tower [`Service`] that calls a single generic handler.
pub struct HandlerService<H, T> {
    handler: H,
    _marker: PhantomData<fn() -> T>,
}

impl<H, T> HandlerService<H, T> {
    pub fn new(handler: H) -> Self {
        Self {
            handler,
            _marker: PhantomData,
        }
    }
}

impl<H: Clone, T> Clone for HandlerService<H, T> {
    fn clone(&self) -> Self {
        HandlerService {
            handler: self.handler.clone(),
            _marker: PhantomData,
        }
    }
}

impl<H, T> Service<Arc<Context>> for HandlerService<H, T>
where
    H: Handler<T>,
{
    type Response = Outcome;
    type Error = BoxError;
    type Future = BoxFuture<'static, Result<Outcome, BoxError>>;

    fn poll_ready(&mut self, _cx: &mut TaskContext<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, ctx: Arc<Context>) -> Self::Future {
        self.handler.clone().call(ctx).boxed()
    }
}

/// Wraps a handler function into a [`BoxedHandlerService`].
pub fn into_service<H, T>(handler: H) -> BoxedHandlerService
where
    H: Handler<T>,
    T: 'static,
{
    BoxCloneSyncService::new(HandlerService::new(handler))
}

/// Type-erases any compatible tower service.
pub fn boxed<S>(service: S) -> BoxedHandlerService
where
    S: Service<Arc<Context>, Response = Outcome, Error = BoxError> + Clone + Send + Sync + 'static,
    S::Future: Send + 'static,
{
    BoxCloneSyncService::new(service)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Captures;
    use crate::rule::Rule;
    use belfry_core::{Target, Trigger};
    use tower::ServiceExt;

    fn ctx() -> Arc<Context> {
        let rule = Rule::builder("seen").command("seen").handler(|| async {});
        let trigger = Trigger::builder("alice", Target::channel("#rust"))
            .text(".seen")
            .build();
        Arc::new(Context::for_rule(
            &rule,
            Arc::new(trigger),
            Captures::whole(".seen"),
        ))
    }

    #[tokio::test]
    async fn test_service_runs_handler() {
        async fn seen(captures: Captures) -> Outcome {
            if captures.args().is_none() {
                Outcome::Unthrottled
            } else {
                Outcome::Handled
            }
        }

        let svc = into_service(seen);
        let outcome = svc.oneshot(ctx()).await.unwrap();
        assert_eq!(outcome, Outcome::Unthrottled);
    }

    #[tokio::test]
    async fn test_extraction_failure_is_an_error() {
        async fn needs_tick(_tick: crate::context::JobTick) {}

        let svc = into_service(needs_tick);
        let err = svc.oneshot(ctx()).await.unwrap_err();
        assert!(err.to_string().contains("no job tick"));
    }
}
