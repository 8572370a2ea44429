//! Newline-delimited JSON response bodies for long-lived streams

use axum::{
    body::Body,
    http::header,
    response::{IntoResponse, Response},
};
use futures_util::{Stream, StreamExt};
use serde::Serialize;

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
                Some(Ok::<_, std::convert::Infallible>(line))
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
