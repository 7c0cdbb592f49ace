//! Periodic maintenance loops: keepalive ping fan-out and idle-room reaping.

use std::sync::Arc;
use std::time::Duration;

use duel_core::protocol::ServerMessage;

use crate::room::{Registry, now_ms};

/// Every `PING_INTERVAL`, ping every live connection and drop the ones that
/// fail to accept the send — a send failure means the transport is dead
/// before the read loop has noticed.
pub async fn ping_loop(registry: Arc<Registry>) {
    let period = Duration::from_secs(registry.config.ping_interval_secs);
    let mut interval = tokio::time::interval(period);
    interval.tick().await;

    loop {
        interval.tick().await;
        let ping = ServerMessage::Ping { timestamp: now_ms() };
        for (conn_id, tx) in registry.live_senders().await {
            if tx.send(ping.clone()).is_err() {
                registry.unregister_connection(conn_id).await;
            }
        }
    }
}

/// Every 5 minutes, reap rooms that are not `playing` and older than
/// `ROOM_EXPIRY`.
pub async fn reap_loop(registry: Arc<Registry>) {
    let mut interval = tokio::time::interval(Duration::from_secs(300));
    interval.tick().await;

    loop {
        interval.tick().await;
        registry.reap_idle_rooms().await;
    }
}
