//! HTTP API
//!
//! A single `POST /` endpoint dispatches the same JSON operations as the
//! TCP protocol. `subscribe` is served as a server-sent event stream:
//! the `since` history replays first, then live fan-out deliveries until
//! the client drops the stream.

use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use pulsedb_core::{DataPoint, Engine, Operation, Response, ResponseData};
use serde::Serialize;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::{wrappers::UnboundedReceiverStream, Stream, StreamExt};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::tcp::next_consumer_id;

pub type AppState = Arc<Engine>;

/// Create the API router
pub fn create_router(engine: Arc<Engine>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", post(dispatch))
        .route("/health", get(health))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(engine)
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: pulsedb_core::VERSION.to_string(),
    })
}

async fn dispatch(State(engine): State<AppState>, body: String) -> axum::response::Response {
    let op = match Operation::from_json(&body) {
        Ok(op) => op,
        Err(e) => return Json(Response::failure(e.to_string())).into_response(),
    };

    match op {
        Operation::Subscribe { key, since } if !key.is_empty() => {
            subscribe_sse(engine, key, since).into_response()
        }
        op => Json(engine.handle(op)).into_response(),
    }
}

/// Removes the fan-out consumer when the SSE stream is dropped.
struct ConsumerGuard {
    engine: Arc<Engine>,
    consumer_id: u64,
}

impl Drop for ConsumerGuard {
    fn drop(&mut self) {
        self.engine.fanout().remove_consumer(self.consumer_id);
    }
}

fn subscribe_sse(
    engine: Arc<Engine>,
    key: String,
    since: i64,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let consumer_id = next_consumer_id();
    let (tx, rx) = mpsc::unbounded_channel::<Response>();

    // history first, in order, before any live point
    let replay = engine.handle(Operation::Subscribe {
        key: key.clone(),
        since,
    });
    if let Some(ResponseData::Points(points)) = replay.data {
        for point in points {
            let _ = tx.send(Response::point(point));
        }
    }

    let live_tx = tx.clone();
    let subscribed = key.clone();
    engine
        .fanout()
        .add_consumer(consumer_id, move |point: &DataPoint| {
            if point.key == subscribed {
                let _ = live_tx.send(Response::point(point.clone()));
            }
        });

    let guard = ConsumerGuard {
        engine: engine.clone(),
        consumer_id,
    };
    let stream = UnboundedReceiverStream::new(rx).map(move |response| {
        let _held = &guard; // tie the consumer's lifetime to the stream
        let payload = serde_json::to_string(&response).unwrap_or_default();
        Ok(Event::default().data(payload))
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}
