// Reusable Server-Sent Events infrastructure: connection limiting, keep-alive
// framing and event helpers shared by the exec output and replay streams.

use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::Stream;
use std::collections::HashMap;
use std::convert::Infallible;
use std::net::IpAddr;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

/// Default maximum concurrent SSE connections per IP address. Prevents a
/// single client from exhausting server resources by opening unlimited streams.
const DEFAULT_MAX_SSE_CONNECTIONS_PER_IP: usize = 3;

#[derive(Debug)]
pub struct SseConnectionLimitExceeded;

#[derive(Clone)]
pub struct SseConnectionTracker {
    connections: Arc<Mutex<HashMap<IpAddr, usize>>>,
    max_connections_per_ip: usize,
}

impl Default for SseConnectionTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl SseConnectionTracker {
    pub fn new() -> Self {
        let max_connections_per_ip = std::env::var("SANDCHEST_SSE_MAX_CONNECTIONS_PER_IP")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .filter(|&v| v > 0 && v <= 100)
            .unwrap_or(DEFAULT_MAX_SSE_CONNECTIONS_PER_IP);

        Self { connections: Arc::new(Mutex::new(HashMap::new())), max_connections_per_ip }
    }

    pub fn try_acquire(&self, ip: IpAddr) -> Result<SseConnectionGuard, SseConnectionLimitExceeded> {
        let mut connections = self.connections.lock().unwrap_or_else(|poisoned| {
            warn!(audit = true, "sse connection tracker mutex poisoned, recovering");
            poisoned.into_inner()
        });
        let count = connections.entry(ip).or_insert(0);

        if *count >= self.max_connections_per_ip {
            warn!(ip = %ip, current = %count, max = self.max_connections_per_ip, audit = true, "sse connection limit exceeded");
            return Err(SseConnectionLimitExceeded);
        }

        *count += 1;
        info!(ip = %ip, count = %count, max = self.max_connections_per_ip, "sse connection acquired");

        Ok(SseConnectionGuard { ip, tracker: self.clone() })
    }

    fn release(&self, ip: IpAddr) {
        let mut connections = self.connections.lock().unwrap_or_else(|poisoned| {
            warn!(audit = true, "sse connection tracker mutex poisoned, recovering");
            poisoned.into_inner()
        });
        if let Some(count) = connections.get_mut(&ip) {
            *count = count.saturating_sub(1);
            info!(ip = %ip, remaining = %count, "sse connection released");
            if *count == 0 {
                connections.remove(&ip);
            }
        }
    }
}

pub struct SseConnectionGuard {
    ip: IpAddr,
    tracker: SseConnectionTracker,
}

impl Drop for SseConnectionGuard {
    fn drop(&mut self) {
        self.tracker.release(self.ip);
    }
}

/// Guarantees slot release even when the stream is dropped before being
/// fully polled, which is the normal shutdown path for a client disconnect.
pub struct GuardedSseStream<S> {
    stream: std::pin::Pin<Box<S>>,
    _guard: SseConnectionGuard,
}

impl<S> GuardedSseStream<S> {
    pub fn new(stream: S, guard: SseConnectionGuard) -> Self {
        Self { stream: Box::pin(stream), _guard: guard }
    }
}

impl<S, T, E> Stream for GuardedSseStream<S>
where
    S: Stream<Item = Result<T, E>>,
{
    type Item = Result<T, E>;

    fn poll_next(mut self: std::pin::Pin<&mut Self>, cx: &mut std::task::Context<'_>) -> std::task::Poll<Option<Self::Item>> {
        self.stream.as_mut().poll_next(cx)
    }
}

pub fn create_sse_response<S>(stream: S) -> Sse<impl Stream<Item = Result<Event, Infallible>>>
where
    S: Stream<Item = Result<Event, Infallible>> + Send + 'static,
{
    Sse::new(stream).keep_alive(KeepAlive::new().interval(std::time::Duration::from_secs(15)).text("keep-alive"))
}

/// Frames an exec/replay `Event` record as a named SSE event carrying its
/// JSON payload as the data field.
pub fn create_sse_event<T: serde::Serialize>(event_type: &str, data: &T) -> Result<Event, serde_json::Error> {
    let json_data = serde_json::to_string(data)?;
    Ok(Event::default().event(event_type).data(json_data))
}

pub fn create_error_event(error_message: &str) -> Event {
    Event::default().event("error").data(format!("{{\"error\":\"{}\"}}", error_message))
}
