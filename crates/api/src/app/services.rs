use std::{
    convert::Infallible,
    sync::{Arc, Weak},
    time::Duration,
};

use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use tokio::sync::broadcast;
use tokio_stream::{wrappers::BroadcastStream, StreamExt};

use forgerev_core::TenantId;
use forgerev_events::Subscription;
use forgerev_infra::RevenueEngine;

const BRIDGE_POLL: Duration = Duration::from_millis(250);

/// Realtime message broadcasted via SSE.
#[derive(Debug, Clone, serde::Serialize)]
pub struct RealtimeMessage {
    pub tenant_id: TenantId,
    pub topic: String,
    pub payload: serde_json::Value,
}

pub struct AppServices {
    engine: Arc<RevenueEngine>,
    realtime_tx: broadcast::Sender<RealtimeMessage>,
}

impl AppServices {
    pub fn engine(&self) -> &RevenueEngine {
        &self.engine
    }

    pub fn realtime_tx(&self) -> &broadcast::Sender<RealtimeMessage> {
        &self.realtime_tx
    }
}

/// Wire the engine to the realtime channel.
///
/// Must be called from within a Tokio runtime: the engine's synchronous
/// subscriptions are drained on blocking threads.
pub fn build_services(engine: Arc<RevenueEngine>) -> AppServices {
    // Lossy broadcast, tenant-filtered in handlers.
    let (realtime_tx, _realtime_rx) = broadcast::channel::<RealtimeMessage>(256);

    spawn_bridge(engine.subscribe_postings(), Arc::downgrade(&engine), realtime_tx.clone(), |entry| {
        let payload = serde_json::to_value(&entry).ok()?;
        Some(RealtimeMessage {
            tenant_id: entry.tenant_id,
            topic: "revenue.posted".to_string(),
            payload,
        })
    });

    spawn_bridge(engine.subscribe_events(), Arc::downgrade(&engine), realtime_tx.clone(), |env| {
        let at = env.aggregate_type();
        Some(RealtimeMessage {
            tenant_id: env.tenant_id(),
            topic: format!("{at}.committed"),
            payload: serde_json::json!({
                "kind": "committed",
                "aggregate_type": at,
                "aggregate_id": env.aggregate_id().to_string(),
                "sequence_number": env.sequence_number(),
                "event": env.payload(),
            }),
        })
    });

    AppServices { engine, realtime_tx }
}

fn spawn_bridge<M, F>(
    sub: Subscription<M>,
    engine: Weak<RevenueEngine>,
    realtime_tx: broadcast::Sender<RealtimeMessage>,
    to_message: F,
) where
    M: Send + 'static,
    F: Fn(M) -> Option<RealtimeMessage> + Send + 'static,
{
    tokio::task::spawn_blocking(move || loop {
        match sub.recv_timeout(BRIDGE_POLL) {
            Ok(msg) => {
                if let Some(m) = to_message(msg) {
                    // No receivers is fine.
                    let _ = realtime_tx.send(m);
                }
            }
            Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {
                if engine.strong_count() == 0 {
                    break;
                }
            }
            Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => break,
        }
    });
}

pub fn tenant_sse_stream(
    services: Arc<AppServices>,
    tenant_id: TenantId,
) -> Sse<impl tokio_stream::Stream<Item = Result<SseEvent, Infallible>>> {
    let rx = services.realtime_tx().subscribe();
    let stream = BroadcastStream::new(rx).filter_map(move |msg| match msg {
        Ok(m) if m.tenant_id == tenant_id => {
            let data = serde_json::to_string(&m.payload).unwrap_or_else(|_| "{}".to_string());
            Some(Ok(SseEvent::default().event(m.topic).data(data)))
        }
        _ => None,
    });

    Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
}
