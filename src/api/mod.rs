//! API layer
//!
//! HTTP handlers for:
//! - ActivityPub (relay actor and shared inbox)
//! - Homepage
//! - Well-known discovery (webfinger, nodeinfo)
//! - Metrics (Prometheus)

mod activitypub;
mod home;
pub mod metrics;
mod wellknown;

pub use activitypub::activitypub_router;
pub use home::home_router;
pub use metrics::metrics_router;
pub use wellknown::wellknown_router;
