//! Handler system for the Belfry framework.
//!
//! Handlers are plain async functions. The [`Handler`] trait is implemented
//! for every async function whose parameters implement [`FromContext`] and
//! whose return type implements [`IntoOutcome`], similar to Axum's handler
//! system.
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use belfry_framework::{Captures, Outcome, Trigger};
//!
//! // No parameters, no return value
//! async fn heartbeat() {
//!     tracing::debug!("still alive");
//! }
//!
//! // Extractors plus a sentinel return value
//! async fn seen(trigger: Arc<Trigger>, captures: Captures) -> Outcome {
//!     if captures.args().is_none() {
//!         return Outcome::Unthrottled;
//!     }
//!     Outcome::Handled
//! }
//!
//! // Fallible handlers
//! async fn lookup(captures: Captures) -> Result<(), std::io::Error> {
//!     Ok(())
//! }
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use tower::BoxError;

use belfry_core::Outcome;

use crate::context::Context;
use crate::extractor::FromContext;

// ============================================================================
// IntoOutcome - Convert handler return values
// ============================================================================

/// A trait for handler return values.
///
/// Errors become [`ExecutionResult::Failed`](belfry_core::ExecutionResult);
/// everything else becomes an [`Outcome`].
pub trait IntoOutcome: Send {
    fn into_outcome(self) -> Result<Outcome, BoxError>;
}

impl IntoOutcome for () {
    fn into_outcome(self) -> Result<Outcome, BoxError> {
        Ok(Outcome::Handled)
    }
}

impl IntoOutcome for Outcome {
    fn into_outcome(self) -> Result<Outcome, BoxError> {
        Ok(self)
    }
}

/// `None` counts as handled.
impl<T: IntoOutcome> IntoOutcome for Option<T> {
    fn into_outcome(self) -> Result<Outcome, BoxError> {
        match self {
            Some(t) => t.into_outcome(),
            None => Ok(Outcome::Handled),
        }
    }
}

impl<T, E> IntoOutcome for Result<T, E>
where
    T: IntoOutcome,
    E: Into<BoxError> + Send,
{
    fn into_outcome(self) -> Result<Outcome, BoxError> {
        match self {
            Ok(t) => t.into_outcome(),
            Err(e) => Err(e.into()),
        }
    }
}

// ============================================================================
// Handler Trait
// ============================================================================

/// The core trait for rule and job handlers.
///
/// Implemented automatically for async functions that take 0-8 parameters
/// implementing [`FromContext`] and return a type implementing
/// [`IntoOutcome`]. The type parameter `T` only exists to keep the blanket
/// implementations apart.
#[async_trait]
pub trait Handler<T>: Clone + Send + Sync + 'static {
    /// Extracts the parameters and runs the handler body.
    async fn call(self, ctx: Arc<Context>) -> Result<Outcome, BoxError>;
}

macro_rules! impl_handler {
    (
        $($ty:ident),*
    ) => {
        #[allow(non_snake_case)]
        #[async_trait]
        impl<F, Fut, Res, $($ty,)*> Handler<($($ty,)*)> for F
        where
            F: FnOnce($($ty,)*) -> Fut + Clone + Send + Sync + 'static,
            Fut: Future<Output = Res> + Send + 'static,
            Res: IntoOutcome + 'static,
            $( $ty: FromContext + Send + 'static, )*
        {
            #[allow(unused_variables)]
            async fn call(self, ctx: Arc<Context>) -> Result<Outcome, BoxError> {
                $(
                    let $ty = $ty::from_context(&ctx)?;
                )*

                (self)($($ty,)*).await.into_outcome()
            }
        }
    };
}

impl_handler!();
impl_handler!(T1);
impl_handler!(T1, T2);
impl_handler!(T1, T2, T3);
impl_handler!(T1, T2, T3, T4);
impl_handler!(T1, T2, T3, T4, T5);
impl_handler!(T1, T2, T3, T4, T5, T6);
impl_handler!(T1, T2, T3, T4, T5, T6, T7);
impl_handler!(T1, T2, T3, T4, T5, T6, T7, T8);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_into_outcome() {
        assert_eq!(().into_outcome().unwrap(), Outcome::Handled);
        assert_eq!(
            Some(Outcome::Unthrottled).into_outcome().unwrap(),
            Outcome::Unthrottled
        );
        assert_eq!(None::<Outcome>.into_outcome().unwrap(), Outcome::Handled);

        let failed: Result<(), String> = Err("lookup failed".into());
        assert_eq!(failed.into_outcome().unwrap_err().to_string(), "lookup failed");
    }
}
