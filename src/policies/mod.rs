//! Retry and cooldown policies.
//!
//! ## Contents
//! - [`BackoffPolicy`]: `first × factor^n`, capped at `max`, then jittered
//! - [`JitterPolicy`]: None, Full or Equal spread
//!
//! ## Wiring
//! ```text
//! SchedulerConfig { retry_backoff: BackoffPolicy }
//!      └─► CRITICAL task failure: wait retry_backoff.next(retry_count) before re-queue
//! KernelConfig { cooldown: BackoffPolicy }
//!      └─► restart attempt n+1 not before cooldown.next(n) after attempt n
//! ```

mod backoff;
mod jitter;

pub use backoff::BackoffPolicy;
pub use jitter::JitterPolicy;
