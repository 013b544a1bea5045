//! Named background loops.

use std::future::Future;

use tokio::task::JoinHandle;

/// A spawned component loop, named for shutdown reports.
#[derive(Debug)]
pub struct LoopHandle {
    /// `component.loop`, e.g. `scheduler.worker.0`.
    pub name: String,
    pub handle: JoinHandle<()>,
}

impl LoopHandle {
    /// Spawns `fut` on the current tokio runtime.
    pub(crate) fn spawn<F>(name: impl Into<String>, fut: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        Self {
            name: name.into(),
            handle: tokio::spawn(fut),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}
