//! SSE (Server-Sent Events) relay for chat fragments.
//!
//! Each fragment becomes one `data: <json>\n\n` event, emitted as soon as the
//! engine produces it. Dropping the returned stream (client disconnect) drops
//! the engine stream with it.

use axum::response::sse::Event;
use futures::stream::Stream;
use tokio::sync::OwnedSemaphorePermit;
use tokio_stream::StreamExt;
use tracing::info;

use crate::inference::{ChatFragment, TerminatedStream};
use crate::server::metrics::Metrics;

/// Tracks one relay; logs how it ended when the SSE body is dropped.
struct RelayGuard {
    request_id: String,
    fragments: usize,
    finished: bool,
    metrics: Metrics,
    _permit: Option<OwnedSemaphorePermit>,
}

impl RelayGuard {
    fn observe(&mut self, fragment: &ChatFragment) {
        if fragment.is_terminal() {
            self.finished = true;
        } else {
            self.fragments += 1;
            self.metrics.record_fragment();
        }
    }
}

impl Drop for RelayGuard {
    fn drop(&mut self) {
        if self.finished {
            info!(
                request_id = self.request_id,
                fragments = self.fragments,
                "Chat stream complete"
            );
        } else {
            info!(
                request_id = self.request_id,
                fragments = self.fragments,
                "Client disconnected, abandoning engine stream"
            );
        }
    }
}

/// Convert a terminated fragment stream into an SSE event stream.
///
/// `permit`, when present, is held until the stream ends or is dropped.
pub fn fragments_to_sse_stream(
    fragments: TerminatedStream,
    request_id: String,
    metrics: Metrics,
    permit: Option<OwnedSemaphorePermit>,
) -> impl Stream<Item = Result<Event, axum::Error>> {
    let mut guard = RelayGuard {
        request_id,
        fragments: 0,
        finished: false,
        metrics,
        _permit: permit,
    };

    fragments.map(move |fragment| {
        guard.observe(&fragment);
        Event::default().json_data(&fragment)
    })
}
