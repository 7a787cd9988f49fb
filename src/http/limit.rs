use axum::{
    Json,
    extract::{ConnectInfo, Request, State},
    http::{StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::warn;

pub const LIMITED_MESSAGE: &str = "Too many requests, please try again later.";

struct Window {
    started: Instant,
    count: u32,
}

/// Fixed-window request counter keyed by client address.
pub struct RequestLimiter {
    max: u32,
    window: Duration,
    windows: Mutex<HashMap<IpAddr, Window>>,
}

impl RequestLimiter {
    /// `None` when `max` is zero, which disables limiting.
    pub fn new(max: u32, window: Duration) -> Option<Arc<Self>> {
        (max > 0).then(|| {
            Arc::new(Self {
                max,
                window,
                windows: Mutex::new(HashMap::new()),
            })
        })
    }

    /// `Err` carries the time left until the client's window resets.
    fn check_at(&self, client: IpAddr, now: Instant) -> Result<(), Duration> {
        let mut windows = self
            .windows
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let span = self.window;
        windows.retain(|_, w| now.duration_since(w.started) < span);

        let window = windows.entry(client).or_insert(Window {
            started: now,
            count: 0,
        });
        if window.count >= self.max {
            return Err(span.saturating_sub(now.duration_since(window.started)));
        }
        window.count += 1;
        Ok(())
    }
}

/// Requests served without connection info share one bucket.
pub async fn enforce(
    State(limiter): State<Arc<RequestLimiter>>,
    request: Request,
    next: Next,
) -> Response {
    let client = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));

    match limiter.check_at(client, Instant::now()) {
        Ok(()) => next.run(request).await,
        Err(retry_after) => {
            warn!("Request limit reached for {} on {}", client, request.uri().path());
            let body = json!({
                "success": false,
                "message": LIMITED_MESSAGE,
                "error": { "kind": "too_many_requests", "retryable": true },
            });
            (
                StatusCode::TOO_MANY_REQUESTS,
                [(header::RETRY_AFTER, retry_after.as_secs().max(1).to_string())],
                Json(body),
            )
                .into_response()
        }
    }
}
