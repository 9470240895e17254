//! Server-sent events: the current view first, then one event per change.

use std::convert::Infallible;

use axum::{
    extract::State,
    http::{HeaderMap, HeaderValue},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
};
use futures_util::stream::{self, Stream, StreamExt};
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};

use crate::domain::models::ChangeEvent;

use super::{api_key, ApiResult, AppState, ProblemDetails};

pub const SNAPSHOT_EVENT: &str = "snapshot";
pub const CHANGE_EVENT: &str = "accounts_changed";

pub async fn account_events(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let api_key = api_key(&headers)?;

    // Unknown keys are rejected before a channel is created for them
    state.monitor.snapshots(&api_key).await?;

    // Subscribe before reading the view so no change falls in between
    let rx = state.broadcaster.subscribe(&api_key);
    let view = state.monitor.view(&api_key).await?;

    let initial = serde_json::to_string(&view)
        .map(|data| Event::default().event(SNAPSHOT_EVENT).data(data))
        .map_err(|e| ProblemDetails::internal_error(e.to_string()))?;

    tracing::info!(api_key = %api_key, "Event stream subscriber connected");

    let mut shutdown = state.shutdown.clone();
    let stopped = async move {
        let _ = shutdown.wait_for(|stop| *stop).await;
    };

    let events = stream::once(async move { Ok::<_, Infallible>(initial) })
        .chain(changes(rx))
        .take_until(stopped);

    let mut response_headers = HeaderMap::new();
    response_headers.insert("Cache-Control", HeaderValue::from_static("no-cache"));
    Ok((response_headers, Sse::new(events).keep_alive(KeepAlive::new())).into_response())
}

fn changes(
    rx: tokio::sync::broadcast::Receiver<ChangeEvent>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    BroadcastStream::new(rx).filter_map(|msg| async move {
        match msg {
            Ok(event) => serde_json::to_string(&event).ok().map(|data| {
                Ok(Event::default()
                    .event(CHANGE_EVENT)
                    .id(event.sequence.to_string())
                    .data(data))
            }),
            Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                // The next event carries the full view anyway
                tracing::warn!(skipped, "Event stream subscriber lagged");
                None
            }
        }
    })
}
