//! Generic stream messages.
//!
//! Venue adapters decode their wire formats into these shapes, and encode
//! subscribe requests as [`SubscriptionIntent`]s that the transport can replay
//! after a reconnect.

use serde::{Deserialize, Serialize};

use super::{PriceLevel, Sequence, TimestampMs};

/// Incremental order book update, already translated from the venue format
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffMessage {
    /// Canonical instrument symbol
    pub instrument: String,
    /// First update id covered by this diff
    pub first_seq: Sequence,
    /// Last update id covered by this diff
    pub last_seq: Sequence,
    /// Last update id of the previous diff (linked feeds only)
    pub prior_seq: Option<Sequence>,
    /// Changed bid levels; size zero removes the level
    pub bids: Vec<PriceLevel>,
    /// Changed ask levels; size zero removes the level
    pub asks: Vec<PriceLevel>,
    /// Venue event time
    pub server_time: TimestampMs,
}

/// Full order book state fetched over REST
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookSnapshot {
    /// Ask levels in any order
    pub asks: Vec<PriceLevel>,
    /// Bid levels in any order
    pub bids: Vec<PriceLevel>,
    /// Update id the snapshot is consistent with
    pub sequence: Sequence,
    /// Venue time of the snapshot (0 if the venue does not send one)
    pub server_time: TimestampMs,
}

/// A decoded inbound frame
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Order book diff, routed to the instrument's reconciler
    Diff(DiffMessage),
    /// Subscribe/unsubscribe acknowledgement
    Ack {
        /// Request id echoed back by the venue
        id: Option<u64>,
        /// Channel the ack refers to, if the venue names it
        channel: Option<String>,
    },
    /// Application-level pong
    Pong,
    /// Anything else (tickers, account events); passed through untouched
    Other {
        /// Venue channel or event name
        channel: String,
        /// Raw frame text
        raw: String,
    },
}

/// A replayable subscribe request
///
/// Holds the exact frame that was sent the first time, plus the channel and
/// parameters it was built from so the registry can be inspected. The
/// `replay` marker is set on the registered copy so that re-sending it after
/// a reconnect never registers it a second time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionIntent {
    /// Venue channel name
    pub channel: String,
    /// Channel parameters (instrument, interval, ...)
    pub params: Vec<String>,
    /// Encoded frame text
    pub payload: String,
    /// Set once the intent has been recorded for replay
    #[serde(default)]
    pub replay: bool,
}

impl SubscriptionIntent {
    /// Create a fresh (not yet registered) intent
    pub fn new(channel: impl Into<String>, params: Vec<String>, payload: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            params,
            payload: payload.into(),
            replay: false,
        }
    }

    /// Copy of this intent carrying the replay marker
    #[must_use]
    pub fn as_replay(&self) -> Self {
        Self {
            replay: true,
            ..self.clone()
        }
    }

    /// Whether two intents describe the same logical subscription
    pub fn same_subscription(&self, other: &SubscriptionIntent) -> bool {
        self.channel == other.channel && self.params == other.params
    }
}

/// Notification that a replica changed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BookEvent {
    /// A fresh snapshot was applied; the book is not ready until diffs catch up
    Resynced {
        /// Canonical instrument symbol
        instrument: String,
        /// Snapshot update id
        sequence: Sequence,
    },
    /// A diff was applied
    Updated {
        /// Canonical instrument symbol
        instrument: String,
        /// Last update id now applied
        sequence: Sequence,
    },
}

impl BookEvent {
    /// Instrument the event refers to
    pub fn instrument(&self) -> &str {
        match self {
            BookEvent::Resynced { instrument, .. } | BookEvent::Updated { instrument, .. } => {
                instrument
            }
        }
    }
}
