//! # Broadcast Resolution
//!
//! Server half of the live subscription subsystem.
//!
//! ## Components
//!
//! - [`SubscriptionService`]: handles registration, renewal and
//!   unsubscribe requests and writes the subscriber sets
//! - [`BroadcastTargetResolver`]: answers "is anyone listening" for one
//!   changed record across channel-wide, id and filter subscribers
//! - [`ChangeBroadcaster`]: publishes on the team channel when the answer
//!   is yes
//!
//! Subscriber sets live in a [`CacheStore`]. Filter subscribers are found
//! by pattern scan, or through a key index when the store cannot scan.

pub mod cache;
pub mod errors;
pub mod filter;
pub mod glob;
pub mod publisher;
pub mod resolver;
pub mod service;
pub mod subscribers;

pub use cache::{CacheStore, MemoryCache};
pub use errors::{BroadcastError, BroadcastResult};
pub use filter::{evaluate, FilterEvaluator, FilterOp, RecordSetEvaluator};
pub use glob::{glob_to_regex, GlobPattern};
pub use publisher::{BroadcastOutcome, ChangeBroadcaster};
pub use resolver::BroadcastTargetResolver;
pub use service::{LedgerEntry, Principal, PrincipalApi, SubscriptionService};
pub use subscribers::SubscriberSets;
