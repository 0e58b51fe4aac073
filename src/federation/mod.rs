//! ActivityPub federation module
//!
//! Handles:
//! - Relay keypair and HTTP Signatures
//! - Remote actor and nodeinfo resolution
//! - Inbound policy
//! - Activity processing (inbox)
//! - Activity delivery (fan-out)

mod activity;
mod delivery;
mod keys;
mod policy;
mod resolver;
mod signature;

pub use activity::{
    ActivityProcessor, ActivityType, Dispatched, activity_actor, distill_inboxes,
    distill_object_id, host_of,
};
pub use delivery::{DeliveryEngine, DeliveryOutcome, builder, unique_inbox_targets, user_agent};
pub use keys::{KEY_BITS, RelayIdentity};
pub use policy::{InboundPolicy, InboundRequest, Rejection};
pub use resolver::{ActorPublicKey, HttpResolver, NODEINFO_20_REL, RemoteActor, Resolve};
#[cfg(test)]
pub use resolver::MockResolve;
pub use signature::{
    ACTIVITY_CONTENT_TYPE, ParsedSignature, SIGNED_HEADERS, SignedRequest, generate_digest,
    key_owner, parse_signature_header, sign_headers, sign_request, verify_request,
    verify_signature,
};
