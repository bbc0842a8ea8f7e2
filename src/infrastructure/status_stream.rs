// Chunked newline-delimited JSON stream of status deltas
use crate::domain::snapshot::Delta;
use axum::body::Body;
use axum::http::{Response, StatusCode, header};
use bytes::{BufMut, Bytes, BytesMut};
use futures::stream::Stream;
use tokio::sync::broadcast;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;

/// Deltas for `device_id` from a broadcast receiver. Lagging drops the
/// missed deltas and carries on; the stream ends when the sender is gone.
pub fn device_deltas(
    rx: broadcast::Receiver<Delta>,
    device_id: String,
) -> impl Stream<Item = Delta> + Send + 'static {
    BroadcastStream::new(rx).filter_map(move |item| match item {
        Ok(delta) if delta.device_id == device_id => Some(delta),
        Ok(_) => None,
        Err(BroadcastStreamRecvError::Lagged(skipped)) => {
            tracing::warn!("{}: status stream lagged, {} deltas skipped", device_id, skipped);
            None
        }
    })
}

/// Serialize a single delta as one JSON line
fn serialize_chunk(delta: &Delta) -> Result<Bytes, serde_json::Error> {
    let json = serde_json::to_vec(delta)?;
    let mut chunk = BytesMut::with_capacity(json.len() + 1);
    chunk.put_slice(&json);
    chunk.put_u8(b'\n');
    Ok(chunk.freeze())
}

/// Create a chunked ndjson response from a stream of deltas
pub fn ndjson_stream<S>(stream: S) -> Result<Response<Body>, StatusCode>
where
    S: Stream<Item = Delta> + Send + 'static,
{
    let byte_stream = async_stream::stream! {
        tokio::pin!(stream);
        while let Some(delta) = stream.next().await {
            yield serialize_chunk(&delta);
        }
    };

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/x-ndjson")
        .header(header::CACHE_CONTROL, "no-cache")
        .body(Body::from_stream(byte_stream))
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}
