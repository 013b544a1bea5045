//! Topic-based publish/subscribe substrate.
//!
//! All other components talk to each other exclusively through [`MessageBus`].
//!
//! Internal modules:
//! - [`message`]: [`Message`] envelope and [`Priority`];
//! - [`body`]: closed set of typed payloads;
//! - [`topics`]: wire topic names and reserved topic → body pairing;
//! - [`router`]: exact / wildcard-suffix segment trie;
//! - [`acl`]: per-topic allow-lists;
//! - [`queue`]: bounded per-subscriber FIFO with explicit overflow policy;
//! - [`callback`]: per-topic concurrent callback.

mod acl;
pub mod body;
#[allow(clippy::module_inception)]
mod bus;
mod callback;
mod config;
mod message;
mod queue;
mod router;
pub mod topics;

pub use acl::AclTable;
pub use body::Body;
pub(crate) use bus::panic_info;
pub use bus::{BUS_SOURCE, BusStats, MessageBus, Subscription};
pub use callback::TopicCallback;
pub use config::BusConfig;
pub use message::{Message, MessageId, Priority};
pub use queue::OverflowPolicy;
pub use router::TopicPattern;
