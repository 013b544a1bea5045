//! # Restart seam.
//!
//! The supervisor decides *when* to restart; a [`Restarter`] does it. The
//! default [`BusRestarter`] hands the request to whatever process manager
//! listens on `kernel.restart.request` and considers the hand-off a success.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::bus::body::KernelRestart;
use crate::bus::{Body, MessageBus, Priority, topics};
use crate::error::ActionError;

/// Performs one restart attempt of a component.
#[async_trait]
pub trait Restarter: Send + Sync + 'static {
    async fn restart(&self, request: &KernelRestart, ctx: CancellationToken) -> Result<(), ActionError>;
}

/// Publishes `kernel.restart.request` and reports success.
#[derive(Clone)]
pub struct BusRestarter {
    bus: MessageBus,
    source: &'static str,
}

impl BusRestarter {
    pub fn new(bus: MessageBus, source: &'static str) -> Self {
        Self { bus, source }
    }
}

#[async_trait]
impl Restarter for BusRestarter {
    async fn restart(&self, request: &KernelRestart, _ctx: CancellationToken) -> Result<(), ActionError> {
        self.bus
            .publish(
                self.source,
                topics::KERNEL_RESTART_REQUEST,
                Body::KernelRestart(request.clone()),
                Priority::High,
                None,
            )
            .map(|_| ())
            .ok_or_else(|| ActionError::failed(&request.component, "restart request rejected by bus"))
    }
}
