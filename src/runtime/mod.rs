//! Process-lifetime context: component wiring, start and graceful shutdown.

mod builder;
mod handle;
#[allow(clippy::module_inception)]
mod runtime;
mod shutdown;

pub use builder::RuntimeBuilder;
pub use handle::LoopHandle;
pub use runtime::{RUNTIME_SOURCE, Runtime};
