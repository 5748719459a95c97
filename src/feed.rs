//! Market data feed: one connection, many order book replicas.
//!
//! [`MarketFeed`] wires a [`StreamTransport`], a [`VenueAdapter`] and an
//! [`OrderbookManager`] together. A dispatcher task decodes every inbound
//! frame and routes diffs to the [`Reconciler`] of their instrument; anything
//! that is not a diff goes to a side channel the caller can take with
//! [`MarketFeed::take_events`]. Ticker subscriptions feed that side channel.
//!
//! The dispatcher never waits on a reconciler. When an instrument's queue is
//! full the diff is dropped and the book is marked for resync, so one slow
//! snapshot fetch cannot stall the other instruments.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc, Mutex as AsyncMutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::client::websocket::{ConnectionStatus, StreamTransport};
use crate::config::Config;
use crate::error::Error;
use crate::orderbook::{BookReplica, OrderbookManager, Reconciler};
use crate::types::{BookEvent, BookId, DiffMessage, StreamEvent};
use crate::venue::{adapter_for, VenueAdapter};

const BOOK_EVENT_CAPACITY: usize = 1024;

struct Route {
    diffs: mpsc::Sender<DiffMessage>,
    cancel: CancellationToken,
}

struct FeedInner {
    config: Config,
    transport: StreamTransport,
    adapter: Arc<dyn VenueAdapter>,
    books: Arc<OrderbookManager>,
    routes: RwLock<FxHashMap<String, Route>>,
    /// Serializes subscribe and unsubscribe
    subscriptions: AsyncMutex<()>,
    book_events: broadcast::Sender<BookEvent>,
    side_tx: mpsc::Sender<StreamEvent>,
    side_rx: Mutex<Option<mpsc::Receiver<StreamEvent>>>,
    cancel: CancellationToken,
}

/// Streaming market data for one venue connection
///
/// Cheap to clone; clones share the connection and the books.
///
/// # Example
///
/// ```rust,no_run
/// use exchange_feed::config::{MarketType, Venue};
/// use exchange_feed::{Config, MarketFeed};
///
/// #[tokio::main]
/// async fn main() -> Result<(), exchange_feed::Error> {
///     let feed = MarketFeed::connect(Config::new(Venue::Binance, MarketType::Spot)).await?;
///     let book = feed.subscribe_orderbook("BTC_USDT").await?;
///
///     let mut events = feed.book_events();
///     while let Ok(event) = events.recv().await {
///         if let Ok(depth) = book.snapshot() {
///             println!("{} mid {:?}", event.instrument(), depth.mid_price());
///         }
///     }
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct MarketFeed {
    inner: Arc<FeedInner>,
}

impl std::fmt::Debug for MarketFeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MarketFeed")
            .field("transport", &self.inner.transport)
            .field("adapter", &self.inner.adapter)
            .field("books", &self.inner.books.len())
            .finish()
    }
}

impl MarketFeed {
    /// Connect using the adapter [`adapter_for`] picks for the config
    ///
    /// # Errors
    ///
    /// Invalid configuration, no adapter for the venue/market pair, or the
    /// initial connection failed.
    pub async fn connect(config: Config) -> Result<Self, Error> {
        let adapter = adapter_for(&config)?;
        Self::with_adapter(config, adapter).await
    }

    /// Connect with an explicit adapter
    ///
    /// # Errors
    ///
    /// Invalid configuration or the initial connection failed.
    pub async fn with_adapter(config: Config, adapter: Arc<dyn VenueAdapter>) -> Result<Self, Error> {
        let cancel = CancellationToken::new();
        let transport = StreamTransport::with_cancellation(config.clone(), cancel.child_token())?;
        transport.connect().await?;

        let (book_events, _) = broadcast::channel(BOOK_EVENT_CAPACITY);
        let (side_tx, side_rx) = mpsc::channel(config.inbound_queue_depth());

        let inner = Arc::new(FeedInner {
            books: Arc::new(OrderbookManager::new(config.max_book_depth())),
            config,
            transport,
            adapter,
            routes: RwLock::new(FxHashMap::default()),
            subscriptions: AsyncMutex::new(()),
            book_events,
            side_tx,
            side_rx: Mutex::new(Some(side_rx)),
            cancel,
        });

        tokio::spawn(dispatch(Arc::clone(&inner)));
        info!(
            connection = %inner.config.connection_id(),
            venue = inner.adapter.venue().as_str(),
            "market feed started"
        );
        Ok(Self { inner })
    }

    /// Start maintaining a replica for an instrument
    ///
    /// Fetches a snapshot, opens the diff subscription and spawns the
    /// instrument's reconciler. Subscribing twice returns the same replica.
    ///
    /// # Errors
    ///
    /// The instrument is not understood by the adapter, or the subscribe
    /// request could not be sent. A failed snapshot is not an error here; the
    /// reconciler retries it when diffs arrive.
    pub async fn subscribe_orderbook(&self, instrument: &str) -> Result<Arc<BookReplica>, Error> {
        let _guard = self.inner.subscriptions.lock().await;

        let id = BookId::new(self.inner.adapter.venue(), self.inner.adapter.market_type(), instrument);
        if self.inner.routes.read().contains_key(&id.instrument) {
            if let Some(replica) = self.inner.books.get(&id.instrument) {
                return Ok(replica);
            }
        }

        let key = id.instrument.clone();
        let replica = self.inner.books.add_market(id);
        let (diffs, rx) = mpsc::channel(self.inner.config.inbound_queue_depth());
        let cancel = self.inner.cancel.child_token();
        self.inner.routes.write().insert(
            key.clone(),
            Route {
                diffs,
                cancel: cancel.clone(),
            },
        );

        let reconciler = Reconciler::new(
            Arc::clone(&replica),
            Arc::clone(&self.inner.adapter),
            Arc::clone(&self.inner.books),
            self.inner.book_events.clone(),
        );
        // diffs arriving while the snapshot is fetched wait in the route queue
        if let Err(e) = reconciler.start(&self.inner.transport).await {
            self.inner.routes.write().remove(&key);
            self.inner.books.remove_market(&key);
            return Err(e);
        }
        tokio::spawn(reconciler.run(rx, cancel));

        Ok(replica)
    }

    /// Stop maintaining an instrument's replica
    ///
    /// Returns `false` if the instrument was not subscribed. The replay
    /// registry keeps its entry, so a later reconnect re-subscribes the
    /// channel; its diffs are dropped until the instrument is subscribed
    /// again.
    ///
    /// # Errors
    ///
    /// The unsubscribe frame could not be encoded or sent. The replica is
    /// dropped either way.
    pub async fn unsubscribe_orderbook(&self, instrument: &str) -> Result<bool, Error> {
        let _guard = self.inner.subscriptions.lock().await;

        let key = instrument.to_uppercase();
        let Some(route) = self.inner.routes.write().remove(&key) else {
            return Ok(false);
        };
        route.cancel.cancel();
        self.inner.books.remove_market(&key);
        debug!(instrument = %key, "order book dropped");

        let frame = self.inner.adapter.encode_unsubscribe(&key)?;
        self.inner.transport.send(&frame).await?;
        Ok(true)
    }

    /// Subscribe to an instrument's ticker
    ///
    /// Ticker updates arrive as [`StreamEvent::Other`] on the receiver from
    /// [`take_events`](Self::take_events). The subscription is replayed after
    /// every reconnect.
    ///
    /// # Errors
    ///
    /// The adapter has no ticker channel or does not understand the
    /// instrument, or the request could not be sent.
    pub async fn subscribe_ticker(&self, instrument: &str) -> Result<(), Error> {
        let intent = self.inner.adapter.encode_ticker_subscribe(instrument)?;
        debug!(instrument, channel = %intent.channel, "ticker subscription");
        self.inner.transport.subscribe(intent).await
    }

    /// Replica for an instrument, if subscribed
    pub fn orderbook(&self, instrument: &str) -> Option<Arc<BookReplica>> {
        self.inner.books.get(&instrument.to_uppercase())
    }

    /// All replicas of this feed
    pub fn books(&self) -> &Arc<OrderbookManager> {
        &self.inner.books
    }

    /// The underlying transport
    pub fn transport(&self) -> &StreamTransport {
        &self.inner.transport
    }

    /// The venue adapter in use
    pub fn adapter(&self) -> &Arc<dyn VenueAdapter> {
        &self.inner.adapter
    }

    /// Configuration the feed was built from
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Connection status of the transport
    pub fn status(&self) -> ConnectionStatus {
        self.inner.transport.status()
    }

    /// Receive replica change notifications
    pub fn book_events(&self) -> broadcast::Receiver<BookEvent> {
        self.inner.book_events.subscribe()
    }

    /// Take the receiver of non-diff stream events
    ///
    /// Only the first call gets the receiver. Events are dropped while the
    /// queue is full.
    pub fn take_events(&self) -> Option<mpsc::Receiver<StreamEvent>> {
        self.inner.side_rx.lock().take()
    }

    /// Stop every task and close the connection
    pub async fn shutdown(&self) {
        self.inner.routes.write().clear();
        self.inner.transport.close().await;
        self.inner.cancel.cancel();
        info!(connection = %self.inner.config.connection_id(), "market feed stopped");
    }

    /// Whether [`shutdown`](Self::shutdown) has run
    pub fn is_shutdown(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }
}

async fn dispatch(inner: Arc<FeedInner>) {
    while let Some(frame) = inner.transport.recv().await {
        let event = match inner.adapter.decode(&frame.payload) {
            Ok(Some(event)) => event,
            Ok(None) => continue,
            Err(e) => {
                warn!(
                    connection = %inner.config.connection_id(),
                    error = %e,
                    "dropping undecodable frame"
                );
                continue;
            }
        };

        match event {
            StreamEvent::Diff(diff) => route_diff(&inner, diff),
            StreamEvent::Ack { id, channel } => {
                debug!(?id, ?channel, "subscription acknowledged");
            }
            StreamEvent::Pong => trace!("pong"),
            other @ StreamEvent::Other { .. } => {
                if inner.side_tx.try_send(other).is_err() {
                    trace!("side channel full, event dropped");
                }
            }
        }
    }
    debug!(connection = %inner.config.connection_id(), "dispatcher stopped");
}

fn route_diff(inner: &FeedInner, diff: DiffMessage) {
    let routes = inner.routes.read();
    let Some(route) = routes.get(&diff.instrument) else {
        trace!(instrument = %diff.instrument, "diff for unsubscribed instrument");
        return;
    };
    match route.diffs.try_send(diff) {
        Ok(()) => {}
        Err(TrySendError::Full(diff)) => {
            if !inner.books.resync_pending(&diff.instrument) {
                warn!(
                    instrument = %diff.instrument,
                    last_seq = diff.last_seq,
                    "diff queue full, dropping diffs until resync"
                );
            }
            inner.books.mark_needs_resync(&diff.instrument);
        }
        Err(TrySendError::Closed(_)) => trace!("reconciler gone, diff dropped"),
    }
}
