//! Shared feeds keyed by venue, market and credentials.
//!
//! Callers asking for the same venue, market type and account get the same
//! [`MarketFeed`] instead of a socket each.

use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info};

use crate::client::auth::{fingerprint_of, Credentials};
use crate::config::{Config, MarketType, Venue};
use crate::error::Error;
use crate::feed::MarketFeed;

/// Identity of a pooled connection
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PoolKey {
    /// Exchange
    pub venue: Venue,
    /// Market type
    pub market_type: MarketType,
    /// Credential fingerprint, `anonymous` without credentials
    pub fingerprint: String,
}

impl PoolKey {
    /// Build a key from its parts
    pub fn new(venue: Venue, market_type: MarketType, credentials: Option<&Credentials>) -> Self {
        Self {
            venue,
            market_type,
            fingerprint: fingerprint_of(credentials),
        }
    }

    /// Key a configuration maps to
    pub fn from_config(config: &Config) -> Self {
        Self::new(config.venue(), config.market_type(), config.credentials())
    }
}

/// One pooled feed; locked while it is being connected
type Slot = Arc<AsyncMutex<Option<MarketFeed>>>;

/// Lazily connected, shared market feeds
///
/// Each key has its own slot, so a slow dial only holds up callers asking
/// for the same key.
#[derive(Debug, Default)]
pub struct ConnectionPool {
    slots: Mutex<FxHashMap<PoolKey, Slot>>,
}

impl ConnectionPool {
    /// Create an empty pool
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, key: &PoolKey) -> Slot {
        Arc::clone(self.slots.lock().entry(key.clone()).or_default())
    }

    /// Get the feed for a config, connecting it on first use
    ///
    /// A feed that was shut down is replaced by a fresh connection. Callers
    /// racing on the same key share one dial.
    ///
    /// # Errors
    ///
    /// Whatever [`MarketFeed::connect`] returns; nothing is pooled then.
    pub async fn get_or_connect(&self, config: Config) -> Result<MarketFeed, Error> {
        let key = PoolKey::from_config(&config);
        let slot = self.slot(&key);
        let mut entry = slot.lock().await;

        if let Some(feed) = entry.as_ref() {
            if !feed.is_shutdown() {
                return Ok(feed.clone());
            }
            debug!(venue = key.venue.as_str(), "replacing stopped feed");
        }

        match MarketFeed::connect(config).await {
            Ok(feed) => {
                info!(
                    venue = key.venue.as_str(),
                    market = key.market_type.as_str(),
                    "pooled feed connected"
                );
                *entry = Some(feed.clone());
                Ok(feed)
            }
            Err(e) => {
                *entry = None;
                drop(entry);
                self.forget_empty(&key, &slot);
                Err(e)
            }
        }
    }

    /// Drop a slot left empty by a failed dial, unless it was replaced
    fn forget_empty(&self, key: &PoolKey, slot: &Slot) {
        let mut slots = self.slots.lock();
        let unused = slots.get(key).is_some_and(|current| {
            // nobody else is waiting on it
            Arc::ptr_eq(current, slot)
                && Arc::strong_count(current) == 2
                && current.try_lock().is_ok_and(|feed| feed.is_none())
        });
        if unused {
            slots.remove(key);
        }
    }

    /// Pooled feed for a key, if connected and running
    pub fn get(&self, key: &PoolKey) -> Option<MarketFeed> {
        let slot = self.slots.lock().get(key).cloned()?;
        let entry = slot.try_lock().ok()?;
        entry.as_ref().filter(|feed| !feed.is_shutdown()).cloned()
    }

    /// Shut down and forget one feed; `false` if it was not pooled
    ///
    /// Waits for a dial in progress on the same key.
    pub async fn teardown(&self, key: &PoolKey) -> bool {
        let Some(slot) = self.slots.lock().remove(key) else {
            return false;
        };
        let feed = slot.lock().await.take();
        match feed {
            Some(feed) => {
                feed.shutdown().await;
                true
            }
            None => false,
        }
    }

    /// Shut down every pooled feed
    pub async fn teardown_all(&self) {
        let slots: Vec<Slot> = self.slots.lock().drain().map(|(_, slot)| slot).collect();
        for slot in slots {
            let feed = slot.lock().await.take();
            if let Some(feed) = feed {
                feed.shutdown().await;
            }
        }
    }

    /// Number of connected feeds; dials in progress are not counted
    pub fn len(&self) -> usize {
        self.slots
            .lock()
            .values()
            .filter(|slot| slot.try_lock().is_ok_and(|feed| feed.is_some()))
            .count()
    }

    /// Whether the pool holds no connected feed
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
