//! Live order book test - keeps a synchronized replica of one instrument
//!
//! Usage:
//!   cargo run --example live_orderbook
//!
//! Optional:
//!   FEED_VENUE=gate           # binance (default) or gate
//!   FEED_MARKET=linear        # spot (default), linear or delivery
//!   FEED_INSTRUMENT=ETH_USDT  # canonical BASE_QUOTE (default: BTC_USDT)
//!   FEED_PROXY=http://host:port
//!   RUST_LOG=exchange_feed=debug

use exchange_feed::config::{MarketType, Venue};
use exchange_feed::orderbook::DepthSnapshot;
use exchange_feed::types::{BookEvent, StreamEvent};
use exchange_feed::{Config, MarketFeed};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing for debug output
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("exchange_feed=info".parse()?),
        )
        .init();

    let venue = match std::env::var("FEED_VENUE")
        .unwrap_or_default()
        .to_lowercase()
        .as_str()
    {
        "gate" => Venue::Gate,
        _ => Venue::Binance,
    };
    let market = match std::env::var("FEED_MARKET")
        .unwrap_or_default()
        .to_lowercase()
        .as_str()
    {
        "linear" => MarketType::LinearFutures,
        "delivery" => MarketType::DeliveryFutures,
        _ => MarketType::Spot,
    };
    let instrument = std::env::var("FEED_INSTRUMENT").unwrap_or_else(|_| "BTC_USDT".into());

    println!("=== {} {} live order book ===\n", venue.as_str(), market.as_str());

    let config = Config::new(venue, market).with_proxy_url(std::env::var("FEED_PROXY").ok());
    let feed = MarketFeed::connect(config).await?;
    println!("Connected!\n");

    let mut events = feed.book_events();
    let mut side = feed.take_events().ok_or("side channel already taken")?;

    println!("Subscribing to order book for {}...", instrument);
    let book = feed.subscribe_orderbook(&instrument).await?;
    println!("Subscribing to ticker...");
    feed.subscribe_ticker(&instrument).await?;

    println!("\n=== Streaming Live Data ===");
    println!("(Press Ctrl+C to stop)\n");

    let mut updates = 0u64;
    let start_time = std::time::Instant::now();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Ok(BookEvent::Resynced { instrument, sequence }) => {
                    println!("[RESYNC] {} | snapshot seq: {}", instrument, sequence);
                }
                Ok(BookEvent::Updated { sequence, .. }) => {
                    updates += 1;
                    // print every 20th update to keep the output readable
                    if updates % 20 == 0 {
                        if let Ok(depth) = book.snapshot() {
                            print_book_summary(sequence, &depth);
                        }
                    }
                    if updates % 500 == 0 {
                        let elapsed = start_time.elapsed().as_secs_f64();
                        println!(
                            "\n--- {} updates in {:.1}s ({:.1} upd/s) ---\n",
                            updates,
                            elapsed,
                            updates as f64 / elapsed
                        );
                    }
                }
                Err(e) => println!("[LAGGED] {}", e),
            },
            Some(event) = side.recv() => {
                if let StreamEvent::Other { channel, raw } = event {
                    println!("[{}] {}", channel, raw);
                }
            }
        }
    }

    feed.shutdown().await;
    println!("\nFeed closed");
    Ok(())
}

fn print_book_summary(sequence: u64, depth: &DepthSnapshot) {
    let bid = depth.best_bid();
    let ask = depth.best_ask();
    println!(
        "[BOOK] seq: {} | BID: {} @ {} | ASK: {} @ {} | spread: {} | mid: {}",
        sequence,
        bid.map(|l| l.size.to_string()).unwrap_or_default(),
        bid.map(|l| l.price.to_string()).unwrap_or_default(),
        ask.map(|l| l.size.to_string()).unwrap_or_default(),
        ask.map(|l| l.price.to_string()).unwrap_or_default(),
        depth.spread().map(|s| s.to_string()).unwrap_or_default(),
        depth.mid_price().map(|m| m.to_string()).unwrap_or_default(),
    );
}
