use axum::{
    extract::State,
    http::HeaderMap,
    response::sse::{Event as SseEvent, KeepAlive, Sse},
};
use futures::{stream, Stream};
use std::convert::Infallible;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::warn;

use crate::application::events::Event;
use crate::state::AppContext;

/// Every event on the bus, for dashboards following all deployments.
pub async fn event_stream(
    State(ctx): State<AppContext>,
    headers: HeaderMap,
) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>>> {
    let trace_id = super::trace_id(&headers);
    ctx.logger.api_entry(&trace_id, "GET", "/api/events", "subscribe");

    Sse::new(bus_stream(ctx.subscribe_events())).keep_alive(KeepAlive::default())
}

fn bus_stream(rx: broadcast::Receiver<Event>) -> impl Stream<Item = Result<SseEvent, Infallible>> {
    stream::unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    let sse = SseEvent::default()
                        .event(event.event_type())
                        .json_data(&event)
                        .unwrap_or_else(|_| SseEvent::default().event(event.event_type()));
                    return Some((Ok(sse), rx));
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Event stream lagged, skipped {} events", skipped);
                }
                Err(RecvError::Closed) => return None,
            }
        }
    })
}
