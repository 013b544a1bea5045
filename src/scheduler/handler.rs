//! # In-process task executors.
//!
//! A [`Handler`] runs tasks dispatched to `task.execute.<name>` without a bus
//! round-trip. Tasks whose handler is not registered locally are left to an
//! external executor that replies on `task.result`.
//!
//! [`HandlerFn`] wraps a closure `F: Fn(TaskExecute, CancellationToken) -> Fut`,
//! producing a fresh future per attempt. If state must be shared between
//! attempts, capture an `Arc<...>` explicitly.
//!
//! ## Example
//! ```rust
//! use tokio_util::sync::CancellationToken;
//! use healvisor::{HandlerFn, HandlerRef, TaskError};
//! use healvisor::body::TaskExecute;
//!
//! let h: HandlerRef = HandlerFn::arc("vacuum", |task: TaskExecute, ctx: CancellationToken| async move {
//!     if ctx.is_cancelled() {
//!         return Err(TaskError::Canceled);
//!     }
//!     let _ = task.payload;
//!     Ok(())
//! });
//! assert_eq!(h.name(), "vacuum");
//! ```

use std::borrow::Cow;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::bus::body::TaskExecute;
use crate::error::TaskError;

/// Shared handle to a handler.
pub type HandlerRef = Arc<dyn Handler>;

/// # Asynchronous, cancelable task executor.
///
/// Implementors should check `ctx.is_cancelled()` and return
/// [`TaskError::Canceled`] promptly during shutdown or after a timeout.
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    /// Handler name; matches [`TaskRequest::handler`](super::TaskRequest::handler).
    fn name(&self) -> &str;

    /// Executes one attempt of `task`.
    async fn run(&self, task: &TaskExecute, ctx: CancellationToken) -> Result<(), TaskError>;
}

/// Function-backed handler.
#[derive(Debug)]
pub struct HandlerFn<F> {
    name: Cow<'static, str>,
    f: F,
}

impl<F> HandlerFn<F> {
    pub fn new(name: impl Into<Cow<'static, str>>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }

    /// Creates the handler and returns it as a shared handle.
    pub fn arc(name: impl Into<Cow<'static, str>>, f: F) -> Arc<Self> {
        Arc::new(Self::new(name, f))
    }
}

#[async_trait]
impl<F, Fut> Handler for HandlerFn<F>
where
    F: Fn(TaskExecute, CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, task: &TaskExecute, ctx: CancellationToken) -> Result<(), TaskError> {
        (self.f)(task.clone(), ctx).await
    }
}
