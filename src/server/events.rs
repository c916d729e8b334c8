//! Crawl events → Server-Sent Events, one to one and in emission order.

use std::convert::Infallible;

use axum::response::sse::Event;
use futures::stream::{Stream, StreamExt};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::warn;

use crate::models::CrawlEvent;

/// SSE event name and data payload.
pub fn encode(event: &CrawlEvent) -> (&'static str, String) {
    match event {
        CrawlEvent::Record(record) => ("record", json(record)),
        CrawlEvent::Page(page) => ("page", page.to_string()),
        CrawlEvent::End(report) => ("end", json(report)),
    }
}

fn json(value: &impl Serialize) -> String {
    serde_json::to_string(value).unwrap_or_else(|e| {
        warn!("Failed to serialize event: {}", e);
        "{}".to_string()
    })
}

pub fn event_stream(
    rx: mpsc::Receiver<CrawlEvent>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    ReceiverStream::new(rx).map(|event| {
        let (name, data) = encode(&event);
        Ok(Event::default().event(name).data(data))
    })
}
