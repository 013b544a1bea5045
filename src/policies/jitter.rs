//! # Randomized spread for retry and cooldown delays.
//!
//! Several CRITICAL tasks failing against the same dependency, or several
//! components going silent together, would otherwise come back at the same
//! instant. [`JitterPolicy`] spreads them out.
//!
//! | Policy  | Result for a base delay `d`   |
//! |---------|-------------------------------|
//! | `None`  | `d`                           |
//! | `Full`  | uniform in `[0, d]`           |
//! | `Equal` | `d/2` plus uniform `[0, d/2]` |

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JitterPolicy {
    /// Exact delays; paused-clock tests rely on this.
    #[default]
    None,
    Full,
    Equal,
}

impl JitterPolicy {
    /// Spreads `delay` according to the policy. Never exceeds `delay`.
    pub fn apply(self, delay: Duration) -> Duration {
        let fraction = match self {
            JitterPolicy::None => return delay,
            JitterPolicy::Full => rand::rng().random_range(0.0..=1.0),
            JitterPolicy::Equal => 0.5 + rand::rng().random_range(0.0..=0.5),
        };
        delay.mul_f64(fraction).min(delay)
    }
}
