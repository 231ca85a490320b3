//! Handler and service system for the Belfry framework.
//!
//! - **Handler** ([`traits`]) – the [`Handler`] trait that adapts async
//!   functions with parameter injection, similar to Axum's system
//! - **Service** ([`service`]) – the [`HandlerService`] tower wrapper and the
//!   type-erased [`BoxedHandlerService`] stored in rules and jobs
//!
//! ```text
//! async fn(extractors..) -> impl IntoOutcome
//!     └─ HandlerService            (tower::Service<Arc<Context>>)
//!         └─ BoxedHandlerService   (stored in Rule / Job)
//!             └─ Timeout           (applied by the Executor per invocation)
//! ```

pub mod service;
pub mod traits;

pub use service::{BoxedHandlerService, HandlerService, boxed, into_service};
pub use traits::{Handler, IntoOutcome};
