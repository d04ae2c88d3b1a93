//! Line-delimited JSON protocol over TCP
//!
//! Each request line is one [`Operation`]; each reply line is one
//! [`Response`]. Subscriptions are per-connection state: the first
//! `subscribe` registers a fan-out consumer whose callback forwards
//! matching points into the connection's writer channel, so the engine's
//! synchronous publish never blocks on a slow socket.

use parking_lot::RwLock;
use pulsedb_core::{DataPoint, Engine, Operation, Response, ResponseData};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, info};

static NEXT_CONSUMER_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique consumer id for subscription registration.
pub(crate) fn next_consumer_id() -> u64 {
    NEXT_CONSUMER_ID.fetch_add(1, Ordering::Relaxed)
}

const PING_INTERVAL: Duration = Duration::from_secs(30);

pub async fn serve(listener: TcpListener, engine: Arc<Engine>) -> anyhow::Result<()> {
    loop {
        let (socket, peer) = listener.accept().await?;
        debug!(%peer, "tcp client connected");
        let engine = engine.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(socket, engine).await {
                debug!(%peer, "connection closed: {e}");
            }
        });
    }
}

async fn handle_connection(socket: TcpStream, engine: Arc<Engine>) -> anyhow::Result<()> {
    let consumer_id = next_consumer_id();
    let (read_half, mut write_half) = socket.into_split();
    let mut lines = BufReader::new(read_half).lines();

    // All outgoing frames funnel through one channel so subscription
    // deliveries, pings, and replies never interleave mid-line.
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if write_half.write_all(frame.as_bytes()).await.is_err() {
                break;
            }
        }
    });

    let ping_tx = tx.clone();
    let ping = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(PING_INTERVAL);
        ticker.tick().await; // the first tick fires immediately
        loop {
            ticker.tick().await;
            if ping_tx.send(encode_frame(&Response::ok("ping"))).is_err() {
                break;
            }
        }
    });

    let subscriptions: Arc<RwLock<HashSet<String>>> = Arc::new(RwLock::new(HashSet::new()));

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let op = match Operation::from_json(&line) {
            Ok(op) => op,
            Err(e) => {
                let _ = tx.send(encode_frame(&Response::failure(e.to_string())));
                continue;
            }
        };

        match op {
            Operation::Subscribe { key, since } => {
                let response = engine.handle(Operation::Subscribe {
                    key: key.clone(),
                    since,
                });
                if !response.success {
                    let _ = tx.send(encode_frame(&response));
                    continue;
                }
                // replay history frame-by-frame before going live
                if let Some(ResponseData::Points(points)) = response.data {
                    for point in points {
                        let _ = tx.send(encode_frame(&Response::point(point)));
                    }
                }

                let first_subscription = {
                    let mut subs = subscriptions.write();
                    let was_empty = subs.is_empty();
                    subs.insert(key.clone());
                    was_empty
                };
                if first_subscription {
                    info!(consumer = consumer_id, %key, "adding consumer");
                    let subs = subscriptions.clone();
                    let live_tx = tx.clone();
                    engine
                        .fanout()
                        .add_consumer(consumer_id, move |point: &DataPoint| {
                            if subs.read().contains(&point.key) {
                                let _ = live_tx.send(encode_frame(&Response::point(point.clone())));
                            }
                        });
                }
                let _ = tx.send(encode_frame(&Response::ok(format!("Subscribed to {key}"))));
            }

            Operation::Unsubscribe { key } => {
                let response = engine.handle(Operation::Unsubscribe { key: key.clone() });
                if response.success {
                    let now_empty = {
                        let mut subs = subscriptions.write();
                        subs.remove(&key);
                        subs.is_empty()
                    };
                    if now_empty {
                        info!(consumer = consumer_id, "removing consumer");
                        engine.fanout().remove_consumer(consumer_id);
                    }
                }
                let _ = tx.send(encode_frame(&response));
            }

            op => {
                let _ = tx.send(encode_frame(&engine.handle(op)));
            }
        }
    }

    // client went away; tear down the subscription if one is live
    if !subscriptions.read().is_empty() {
        debug!(consumer = consumer_id, "removing consumer on disconnect");
        engine.fanout().remove_consumer(consumer_id);
    }
    ping.abort();
    drop(tx);
    let _ = writer.await;
    Ok(())
}

fn encode_frame(response: &Response) -> String {
    let mut frame = serde_json::to_string(response).unwrap_or_else(|_| {
        r#"{"success":false,"message":"response serialization failed"}"#.to_string()
    });
    frame.push('\n');
    frame
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frames_are_newline_delimited() {
        let frame = encode_frame(&Response::ok("ping"));
        assert_eq!(frame, "{\"success\":true,\"message\":\"ping\"}\n");
        assert!(!frame[..frame.len() - 1].contains('\n'));
    }

    #[test]
    fn test_consumer_ids_are_unique() {
        let a = next_consumer_id();
        let b = next_consumer_id();
        assert_ne!(a, b);
    }
}
