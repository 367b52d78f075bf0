//! # Client Subscriptions
//!
//! Client half of the live subscription subsystem.
//!
//! ## Flow
//!
//! caller → [`SubscriptionManager`] → (single id?) [`BatchQueue`] with a
//! debounce timer → one registration per flush → [`ChannelRegistry`] binds
//! the transport channel once → events dispatched to listeners.
//! [`KeepaliveService`] ticks independently, renewing every distinct
//! backend id.
//!
//! ## Guarantees
//!
//! - At most one live subscription per (resource type, canonical scope key)
//! - A burst of id subscriptions sharing resource type and events becomes
//!   one registration; each caller still gets its own outcome
//! - A failed merged registration falls back to one registration per id
//! - Batched siblings share one renewal unit and one backend unsubscribe
//! - Keepalive runs only while at least one subscription exists

pub mod api;
pub mod batch;
pub mod channel;
pub mod errors;
pub mod keepalive;
pub mod manager;
pub mod store;
pub mod timer;

pub use api::{ApiCall, ApiFuture, RecordingApi, SubscriptionApi};
pub use batch::{BatchItem, BatchPhase, BatchQueue, SubscriptionBatch};
pub use channel::{ChannelRegistry, Listener, ListenerId, ModelListenerKey};
pub use errors::{SubscriptionError, SubscriptionResult};
pub use keepalive::{apply_renewal, KeepaliveService, KeepaliveState, RenewalOutcome};
pub use manager::{ManagerStatus, RenewalReport, SubscriptionManager};
pub use store::{Removal, Subscription, SubscriptionStore};
pub use timer::DebounceTimer;
