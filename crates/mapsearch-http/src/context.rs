//! Task-local request identifier.
//!
//! The route layer wraps each inbound request in [`with_request_id`];
//! outbound domain API calls made anywhere inside that task forward the id
//! as the [`REQUEST_ID_HEADER`] header without threading it through every
//! call. Log events inside the task carry the id through a `request` span.

use std::future::Future;

use tracing::Instrument as _;

tokio::task_local! {
    static REQUEST_ID: String;
}

/// Header carrying the request identifier to downstream services.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Run `fut` with `request_id` as the ambient request identifier.
///
/// Nested calls shadow the outer id for their duration only.
pub async fn with_request_id<F: Future>(request_id: impl Into<String>, fut: F) -> F::Output {
    let request_id = request_id.into();
    let span = tracing::info_span!("request", request_id = %request_id);
    REQUEST_ID.scope(request_id, fut).instrument(span).await
}

/// Ambient request identifier of the current task, if any.
pub fn current_request_id() -> Option<String> {
    REQUEST_ID.try_with(Clone::clone).ok()
}
