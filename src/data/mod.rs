//! Data layer module
//!
//! Handles all relay state:
//! - Durable key/value documents (SQLite, or in-memory for tests)
//! - Subscriber registry and destination error state
//! - Dedup cache (volatile)

mod cache;
mod database;
mod registry;
mod store;

pub use cache::{Claim, DedupCache};
pub use database::Database;
pub use registry::{DeliveryHealth, SubscriberRegistry};
pub use store::{ACTOR_KEYS, ERRORS, MemoryStore, RELAY_LIST, StateStore, load_json, save_json};
