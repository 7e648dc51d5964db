//! Streaming sink contract for incremental response delivery.

use std::error::Error;
use std::sync::Arc;

use bcommon::BoxFuture;

use crate::DecodedResponse;

pub type SinkError = Box<dyn Error + Send + Sync>;

/// Receives partial-response snapshots while a backend call is in
/// flight. A sink may be called many times per call; the final snapshot
/// represents the complete response. Sink failures must never abort the
/// producer, so producers deliver through [`deliver_quietly`].
pub trait StreamSink: Send + Sync {
    fn deliver<'a>(&'a self, snapshot: DecodedResponse) -> BoxFuture<'a, Result<(), SinkError>>;
}

/// Delivers a snapshot to an optional sink, logging and swallowing any
/// sink failure so a flaky consumer cannot cancel generation.
pub async fn deliver_quietly(sink: Option<&Arc<dyn StreamSink>>, snapshot: DecodedResponse) {
    let Some(sink) = sink else {
        return;
    };

    if let Err(error) = sink.deliver(snapshot).await {
        tracing::warn!(error = %error, "stream sink failed; continuing generation");
    }
}
