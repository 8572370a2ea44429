//! Streaming response bodies
//!
//! Long-lived endpoints answer either with newline-delimited JSON or, for
//! browser consumers of the event stream, with Server-Sent Events.

use axum::{
    body::Body,
    http::header,
    response::{
        IntoResponse, Response,
        sse::{Event as SseEvent, KeepAlive, Sse},
    },
};
use futures_util::{Stream, StreamExt};
use keel_core::domain::event::Event;
use serde::Serialize;
use std::convert::Infallible;

pub const NDJSON_CONTENT_TYPE: &str = "application/x-ndjson";

/// Serve `items` as one JSON document per line
///
/// The response ends when the stream ends; dropping the connection drops
/// the stream.
pub fn ndjson<S, T>(items: S) -> Response
where
    S: Stream<Item = T> + Send + 'static,
    T: Serialize + Send + 'static,
{
    let lines = items.filter_map(|item| {
        let line = match serde_json::to_vec(&item) {
            Ok(mut line) => {
                line.push(b'\n');
                Some(Ok::<_, Infallible>(line))
            }
            Err(e) => {
                tracing::warn!("Skipping unserializable stream item: {}", e);
                None
            }
        };
        std::future::ready(line)
    });

    (
        [(header::CONTENT_TYPE, NDJSON_CONTENT_TYPE)],
        Body::from_stream(lines),
    )
        .into_response()
}

/// Serve events as SSE, named after their type
pub fn sse<S>(events: S) -> Response
where
    S: Stream<Item = Event> + Send + 'static,
{
    let frames = events.filter_map(|event| {
        let frame = match SseEvent::default()
            .event(event.event_type.as_str())
            .json_data(&event)
        {
            Ok(frame) => Some(Ok::<_, Infallible>(frame)),
            Err(e) => {
                tracing::warn!("Skipping unserializable event: {}", e);
                None
            }
        };
        std::future::ready(frame)
    });

    Sse::new(frames)
        .keep_alive(KeepAlive::new())
        .into_response()
}
