//! Newline-delimited JSON streams
//!
//! Long-lived endpoints (events, logs) answer with one JSON document per
//! line. [`decode_ndjson`] turns a chunked byte stream into a stream of typed
//! items, regardless of where chunk boundaries fall.

use futures_util::{Stream, StreamExt};
use serde::de::DeserializeOwned;
use std::pin::Pin;

use crate::error::{ClientError, Result};

/// Boxed stream of decoded items
pub type JsonStream<T> = Pin<Box<dyn Stream<Item = Result<T>> + Send>>;

/// Splits buffered bytes into complete lines
#[derive(Debug, Default)]
pub struct LineBuffer {
    buf: Vec<u8>,
}

impl LineBuffer {
    pub fn push(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Next complete, non-blank line without its terminator
    pub fn next_line(&mut self) -> Option<Vec<u8>> {
        while let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
            let mut line: Vec<u8> = self.buf.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            if !line.iter().all(u8::is_ascii_whitespace) {
                return Some(line);
            }
        }
        None
    }

    /// Whatever trails the last newline, if not blank
    pub fn finish(&mut self) -> Option<Vec<u8>> {
        let rest = std::mem::take(&mut self.buf);
        if rest.iter().all(u8::is_ascii_whitespace) {
            None
        } else {
            Some(rest)
        }
    }
}

fn parse_line<T: DeserializeOwned>(line: &[u8]) -> Result<T> {
    serde_json::from_slice(line)
        .map_err(|e| ClientError::ParseError(format!("Invalid stream item: {}", e)))
}

/// Decode a byte stream of newline-delimited JSON
///
/// A transport error ends the stream after being yielded once.
pub fn decode_ndjson<S, B, E, T>(bytes: S) -> JsonStream<T>
where
    S: Stream<Item = std::result::Result<B, E>> + Send + Unpin + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Into<ClientError> + Send + 'static,
    T: DeserializeOwned + Send + 'static,
{
    let state = (bytes, LineBuffer::default(), false);

    Box::pin(futures_util::stream::unfold(
        state,
        |(mut bytes, mut lines, mut done)| async move {
            loop {
                if let Some(line) = lines.next_line() {
                    return Some((parse_line(&line), (bytes, lines, done)));
                }
                if done {
                    return lines
                        .finish()
                        .map(|rest| (parse_line(&rest), (bytes, lines, true)));
                }
                match bytes.next().await {
                    Some(Ok(chunk)) => lines.push(chunk.as_ref()),
                    Some(Err(e)) => {
                        lines = LineBuffer::default();
                        return Some((Err(e.into()), (bytes, lines, true)));
                    }
                    None => done = true,
                }
            }
        },
    ))
}

/// Decode a streaming HTTP response body
pub(crate) fn from_response<T>(response: reqwest::Response) -> JsonStream<T>
where
    T: DeserializeOwned + Send + 'static,
{
    decode_ndjson(Box::pin(response.bytes_stream()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Item {
        n: u32,
    }

    type Chunks = futures_util::stream::Iter<
        std::vec::IntoIter<std::result::Result<Vec<u8>, ClientError>>,
    >;

    fn chunks(parts: &[&str]) -> Chunks {
        let owned: Vec<std::result::Result<Vec<u8>, ClientError>> =
            parts.iter().map(|p| Ok(p.as_bytes().to_vec())).collect();
        futures_util::stream::iter(owned)
    }

    #[test]
    fn test_line_buffer_splits_across_pushes() {
        let mut lines = LineBuffer::default();
        lines.push(b"{\"n\":1}\n{\"n\"");
        assert_eq!(lines.next_line().unwrap(), b"{\"n\":1}");
        assert!(lines.next_line().is_none());

        lines.push(b":2}\r\n\n  \n");
        assert_eq!(lines.next_line().unwrap(), b"{\"n\":2}");
        assert!(lines.next_line().is_none());
        assert!(lines.finish().is_none());
    }

    #[tokio::test]
    async fn test_decode_handles_split_and_trailing_items() {
        let stream = decode_ndjson::<_, _, _, Item>(chunks(&["{\"n\":1}\n{\"n\":", "2}\n{\"n\":3}"]));
        let items: Vec<Item> = stream.map(|r| r.unwrap()).collect().await;
        assert_eq!(items, vec![Item { n: 1 }, Item { n: 2 }, Item { n: 3 }]);
    }

    #[tokio::test]
    async fn test_decode_reports_bad_lines_and_continues() {
        let stream = decode_ndjson::<_, _, _, Item>(chunks(&["oops\n{\"n\":5}\n"]));
        let results: Vec<Result<Item>> = stream.collect().await;
        assert_eq!(results.len(), 2);
        assert!(matches!(results[0], Err(ClientError::ParseError(_))));
        assert_eq!(results[1].as_ref().unwrap(), &Item { n: 5 });
    }

    #[tokio::test]
    async fn test_transport_error_ends_stream() {
        let parts: Vec<std::result::Result<Vec<u8>, ClientError>> = vec![
            Ok(b"{\"n\":1}\n{\"n\":".to_vec()),
            Err(ClientError::InvalidRequest("reset".into())),
            Ok(b"{\"n\":9}\n".to_vec()),
        ];
        let stream = decode_ndjson::<_, _, _, Item>(futures_util::stream::iter(parts));
        let results: Vec<Result<Item>> = stream.collect().await;
        assert_eq!(results.len(), 2);
        assert!(results[0].is_ok());
        assert!(results[1].is_err());
    }
}
