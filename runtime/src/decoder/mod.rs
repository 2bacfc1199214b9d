use std::io::{self, BufReader, Read};
use std::sync::Arc;
use std::time::Duration;

use futures::{StreamExt, TryStreamExt};
use parking_lot::Mutex;
use serde::de::DeserializeSeed;
use tokio_util::io::{StreamReader, SyncIoBridge};
use tokio_util::sync::CancellationToken;
use tracing::{debug, Span};

pub use values::parse_sample_value;
pub use wide::merge_wide;

use crate::decoder::response::ResponseSeed;
use crate::runtime_error::{RuntimeError, RuntimeResult};
use crate::types::{Frame, Notice, NoticeSeverity};

mod array;
mod response;
mod series;
mod streams;
mod values;
mod wide;


pub use streams::{LABELS_FIELD_NAME, LINE_FIELD_NAME, TS_FIELD_NAME};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DecodeOptions {
    /// Merge all series into one frame sharing a time column.
    pub wide: bool,
}

/// Decodes a Prometheus style response body read from `reader`.
///
/// The body is consumed as it is read; only a `result` appearing before its `resultType`
/// is held in memory until the type is known.
pub fn decode<R: Read>(reader: R, options: &DecodeOptions) -> RuntimeResult<Vec<Frame>> {
    let mut de = serde_json::Deserializer::from_reader(BufReader::new(reader));
    let decoded = ResponseSeed.deserialize(&mut de)?;
    de.end()?;

    if decoded.status.as_deref() == Some("error") {
        return Err(RuntimeError::UpstreamQuery {
            error_type: decoded.error_type.unwrap_or_default(),
            message: decoded.error.unwrap_or_default(),
        });
    }

    let mut frames = decoded.data?;
    if options.wide {
        frames = merge_wide(frames);
    }

    let notices: Vec<Notice> = decoded
        .warnings
        .into_iter()
        .map(|w| Notice::new(NoticeSeverity::Warning, w))
        .chain(
            decoded
                .infos
                .into_iter()
                .map(|i| Notice::new(NoticeSeverity::Info, i)),
        )
        .collect();
    if !notices.is_empty() {
        for frame in frames.iter_mut() {
            frame.meta.notices.extend(notices.iter().cloned());
        }
    }

    debug!(frames = frames.len(), "decoded response");
    Ok(frames)
}

/// Streams the body of `response` through [decode] on a blocking thread.
///
/// The body stream ends as soon as `token` is cancelled, `timeout` elapses or the returned
/// future is dropped, so decoding stops without draining the rest of the body. A transport
/// failure while reading the body is returned as such rather than as a decode error.
pub async fn decode_response(
    response: reqwest::Response,
    options: DecodeOptions,
    token: &CancellationToken,
    timeout: Option<Duration>,
    span: Span,
) -> RuntimeResult<Vec<Frame>> {
    let token = token.child_token();
    let _guard = token.clone().drop_guard();

    let transport_error: Arc<Mutex<Option<reqwest::Error>>> = Arc::default();
    let captured = Arc::clone(&transport_error);
    let body = response
        .bytes_stream()
        .map_err(move |e| {
            let err = io::Error::other(e.to_string());
            captured.lock().get_or_insert(e);
            err
        })
        .take_until(token.clone().cancelled_owned());
    let reader = SyncIoBridge::new(StreamReader::new(Box::pin(body)));

    let handle = tokio::task::spawn_blocking(move || {
        let _guard = span.enter();
        decode(reader, &options)
    });
    let joined = match timeout {
        Some(limit) => match tokio::time::timeout(limit, handle).await {
            Ok(joined) => joined,
            Err(_) => return Err(RuntimeError::Timeout(limit)),
        },
        None => handle.await,
    };
    let result = joined.map_err(|e| RuntimeError::Decode(e.to_string()))?;

    if let Some(err) = transport_error.lock().take() {
        return Err(RuntimeError::UpstreamTransport(err));
    }
    if token.is_cancelled() {
        return Err(RuntimeError::Cancelled);
    }
    result
}
