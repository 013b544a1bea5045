//! # Run a single attempt of a locally handled task.
//!
//! - **Execute ONE attempt** with a child cancellation token
//! - **Apply timeout** if configured (wraps execution in `tokio::time::timeout`)
//! - **Catch panics** and turn them into [`TaskError::Fatal`]
//!
//! ## Rules
//! - On timeout the child token is cancelled before returning
//! - Child cancellation does **not** affect the parent

use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures::FutureExt;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::handler::Handler;
use crate::bus::body::TaskExecute;
use crate::bus::panic_info;
use crate::error::TaskError;

/// Executes a single attempt of `task` on `handler`.
///
/// ### Cancellation semantics
/// - Parent cancellation propagates to the child token
/// - A handler that observes cancellation should return `Err(TaskError::Canceled)`
pub(crate) async fn run_once<H: Handler + ?Sized>(
    handler: &H,
    task: &TaskExecute,
    parent: &CancellationToken,
    timeout: Option<Duration>,
) -> Result<(), TaskError> {
    let child = parent.child_token();
    let fut = AssertUnwindSafe(handler.run(task, child.clone())).catch_unwind();

    let res = if let Some(dur) = timeout.filter(|d| *d > Duration::ZERO) {
        match time::timeout(dur, fut).await {
            Ok(r) => r,
            Err(_elapsed) => {
                child.cancel();
                warn!(task_id = %task.task_id, handler = %task.handler, timeout = ?dur, "task attempt timed out");
                return Err(TaskError::Timeout { timeout: dur });
            }
        }
    } else {
        fut.await
    };

    res.unwrap_or_else(|panic_err| {
        Err(TaskError::fatal(format!(
            "handler panicked: {}",
            panic_info(&*panic_err)
        )))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::Priority;
    use crate::scheduler::HandlerFn;

    fn exec() -> TaskExecute {
        TaskExecute {
            task_id: uuid::Uuid::new_v4(),
            task_type: "t".into(),
            handler: "h".into(),
            priority: Priority::Normal,
            payload: serde_json::Value::Null,
            attempt: 1,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_cancels_child_only() {
        let parent = CancellationToken::new();
        let h = HandlerFn::new("slow", |_t: TaskExecute, ctx: CancellationToken| async move {
            ctx.cancelled().await;
            Err(TaskError::Canceled)
        });
        let res = run_once(&h, &exec(), &parent, Some(Duration::from_secs(1))).await;
        assert_eq!(res, Err(TaskError::Timeout { timeout: Duration::from_secs(1) }));
        assert!(!parent.is_cancelled());
    }

    #[tokio::test]
    async fn panic_becomes_fatal() {
        let h = HandlerFn::new("boom", |_t: TaskExecute, _ctx: CancellationToken| async move {
            if true {
                panic!("kaboom");
            }
            Ok::<(), TaskError>(())
        });
        let res = run_once(&h, &exec(), &CancellationToken::new(), None).await;
        match res {
            Err(TaskError::Fatal { error }) => assert!(error.contains("kaboom")),
            other => panic!("unexpected {other:?}"),
        }
    }
}
