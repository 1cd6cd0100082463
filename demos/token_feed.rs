//! Token feed demo - several views sharing one bus connection
//!
//! Run with: cargo run --example token_feed
//!
//! This demo shows:
//! - A table view and a detail view sharing the `Token/update` topic
//! - Entity-scoped delivery (the detail view only sees `T1`)
//! - Insert fan-out to every view subscribed to `Block/insert`
//! - Upstream subscriptions repaired after the link drops
//!
//! ```text
//!   token-table ──┐
//!   token-detail ─┼──> Multiplexer ──> MemoryBus
//!   block-list ───┘    (one upstream per topic)
//! ```

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Map, Value};

use realtime_mux::bus::MemoryBus;
use realtime_mux::{ConnectionConfig, ConnectionState, EntityId, Envelope, Method, Multiplexer};

fn envelope(table: &str, method: Method, content: Value) -> Envelope {
    let content: Map<String, Value> = content.as_object().cloned().unwrap_or_default();
    Envelope::new(table, method, content)
}

async fn wait_connected(mux: &Multiplexer) -> Result<(), Box<dyn std::error::Error>> {
    let mut rx = mux.watch_state();
    tokio::time::timeout(
        Duration::from_secs(5),
        rx.wait_for(|s| *s == ConnectionState::Connected),
    )
    .await??;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("realtime_mux=debug".parse()?)
                .add_directive("token_feed=info".parse()?),
        )
        .init();

    let bus = Arc::new(MemoryBus::new());
    let config = ConnectionConfig::default().reconnect_delay(Duration::from_millis(100));
    let mux = Multiplexer::with_config(bus.clone(), config);

    mux.subscribe(
        "Token",
        Method::Update,
        |env| println!("[token-table]  {} {:?}", env.method, env.content),
        "token-table",
        None,
    )?;
    mux.subscribe(
        "Token",
        Method::Update,
        |env| println!("[token-detail] {} {:?}", env.method, env.content),
        "token-detail",
        Some(EntityId::from("T1")),
    )?;
    mux.subscribe(
        "Block",
        Method::Insert,
        |env| println!("[block-list]   {} {:?}", env.method, env.content),
        "block-list",
        None,
    )?;

    mux.start();
    wait_connected(&mux).await?;
    println!(
        "Connected: {} upstream subscriptions for {} interests",
        bus.total_live_subscriptions(),
        mux.stats().interests
    );

    bus.publish_envelope(&envelope(
        "Token",
        Method::Update,
        json!({ "id": "T1", "minted": 500 }),
    ));
    bus.publish_envelope(&envelope(
        "Token",
        Method::Update,
        json!({ "id": "T2", "minted": 10 }),
    ));
    bus.publish_envelope(&envelope("Block", Method::Insert, json!({ "height": 1 })));

    println!();
    println!("Dropping the link...");
    bus.drop_link();
    tokio::time::sleep(Duration::from_millis(20)).await;
    wait_connected(&mux).await?;
    println!(
        "Reconnected: {} upstream subscriptions",
        bus.total_live_subscriptions()
    );

    bus.publish_envelope(&envelope("Block", Method::Insert, json!({ "height": 2 })));

    mux.unsubscribe("Token", Method::Update, "token-detail", Some(EntityId::from("T1")))?;
    mux.unsubscribe("Token", Method::Update, "token-table", None)?;
    println!(
        "Token views closed: Token/update upstream count = {}",
        bus.live_subscriptions("Token/update")
    );

    println!();
    println!("{:#?}", mux.stats());

    mux.shutdown();
    Ok(())
}
