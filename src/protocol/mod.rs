//! # Subscription Protocol
//!
//! Shared vocabulary between the client subscription manager and the
//! server broadcast resolver.
//!
//! - **Keys**: canonical scope keys, batch keys and filter content hashes
//! - **Messages**: registration/renewal/unsubscribe wire shapes and the
//!   event envelope pushed over the transport
//!
//! Both sides must derive filter hashes with the same function, otherwise
//! one logical filter registers twice.

pub mod errors;
pub mod keys;
pub mod messages;

pub use errors::{ProtocolError, ProtocolResult};
pub use keys::{
    batch_key, canonical_scope_key, canonicalize, content_hash, definition_key, is_definition_key,
    normalize_events, ModelId, Scope, SubscriberKeys,
};
pub use messages::{
    EventEnvelope, EventKind, ModelEvent, RegisterRequest, RegisterResponse, RegisteredSubscription,
    RenewRequest, RenewResponse, RenewalStatus, UnsubscribeRequest,
};
