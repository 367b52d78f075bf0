//! Observable events of the subscription subsystem
//!
//! Events are explicit and typed. Each one maps to a stable upper-case
//! name used as the `event` field of the log line.

use std::fmt;

/// Log severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Trace = 0,
    Info = 1,
    Warn = 2,
    Error = 3,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Trace => "TRACE",
            Severity::Info => "INFO",
            Severity::Warn => "WARN",
            Severity::Error => "ERROR",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Observable events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    // Client subscriptions
    /// Subscription registered on the backend
    SubscriptionRegistered,
    /// Subscription request ignored because the scope key already exists
    SubscriptionDuplicate,
    /// Registration call failed
    SubscriptionFailed,
    /// Local subscription removed
    SubscriptionRemoved,
    /// Backend unsubscribe issued
    BackendUnsubscribed,
    /// Abandoned registration left to expire because its scope is held again
    ReleaseSkipped,

    // Batching
    /// Debounce window closed, batch handed to the network
    BatchFlushed,
    /// Merged registration failed, items retried individually
    BatchFallback,

    // Keepalive
    /// Keepalive timer started
    KeepaliveStarted,
    /// Keepalive timer stopped
    KeepaliveStopped,
    /// Renewal round complete
    KeepaliveTick,
    /// Renewal call failed as a whole
    KeepaliveFailed,
    /// Backend reported a subscription as expired
    SubscriptionExpired,

    // Channels
    /// Transport channel bound
    ChannelBound,
    /// Event received from the transport
    EventReceived,

    // Broadcast resolution
    /// Subscribers resolved for a changed record
    BroadcastResolved,
    /// Change published to the team channel
    BroadcastPublished,
    /// Filter re-evaluation failed and was skipped
    FilterEvaluationFailed,
    /// Cache scan failed, filter subscribers ignored this round
    CacheScanFailed,
    /// Server-side subscription ledger swept
    LedgerPurged,
}

impl Event {
    /// Returns the string representation of the event
    pub fn as_str(&self) -> &'static str {
        match self {
            Event::SubscriptionRegistered => "SUBSCRIPTION_REGISTERED",
            Event::SubscriptionDuplicate => "SUBSCRIPTION_DUPLICATE",
            Event::SubscriptionFailed => "SUBSCRIPTION_FAILED",
            Event::SubscriptionRemoved => "SUBSCRIPTION_REMOVED",
            Event::BackendUnsubscribed => "BACKEND_UNSUBSCRIBED",
            Event::ReleaseSkipped => "RELEASE_SKIPPED",

            Event::BatchFlushed => "BATCH_FLUSHED",
            Event::BatchFallback => "BATCH_FALLBACK",

            Event::KeepaliveStarted => "KEEPALIVE_STARTED",
            Event::KeepaliveStopped => "KEEPALIVE_STOPPED",
            Event::KeepaliveTick => "KEEPALIVE_TICK",
            Event::KeepaliveFailed => "KEEPALIVE_FAILED",
            Event::SubscriptionExpired => "SUBSCRIPTION_EXPIRED",

            Event::ChannelBound => "CHANNEL_BOUND",
            Event::EventReceived => "EVENT_RECEIVED",

            Event::BroadcastResolved => "BROADCAST_RESOLVED",
            Event::BroadcastPublished => "BROADCAST_PUBLISHED",
            Event::FilterEvaluationFailed => "FILTER_EVALUATION_FAILED",
            Event::CacheScanFailed => "CACHE_SCAN_FAILED",
            Event::LedgerPurged => "LEDGER_PURGED",
        }
    }

    /// Severity this event is logged at
    pub fn severity(&self) -> Severity {
        match self {
            Event::EventReceived | Event::BroadcastResolved | Event::SubscriptionDuplicate => {
                Severity::Trace
            }
            Event::SubscriptionFailed
            | Event::BatchFallback
            | Event::KeepaliveFailed
            | Event::SubscriptionExpired
            | Event::FilterEvaluationFailed
            | Event::CacheScanFailed => Severity::Warn,
            _ => Severity::Info,
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
