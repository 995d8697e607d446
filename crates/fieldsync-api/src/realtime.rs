//! Per-employee fan-out of real-time events to WebSocket clients.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use fieldsync_core::realtime::{ConnectionInfo, DataUpdate};
use fieldsync_core::{EmployeeId, RealtimeEvent};
use futures::{SinkExt, StreamExt};
use tokio::sync::{broadcast, Mutex};

use crate::rate_limit::employee_fingerprint;

const CHANNEL_CAPACITY: usize = 64;

#[derive(Clone, Default)]
pub struct RealtimeBroker {
    channels: Arc<Mutex<HashMap<EmployeeId, broadcast::Sender<RealtimeEvent>>>>,
    next_connection: Arc<AtomicU64>,
}

impl RealtimeBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn subscribe(&self, employee: &EmployeeId) -> broadcast::Receiver<RealtimeEvent> {
        let mut channels = self.channels.lock().await;
        channels
            .entry(employee.clone())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Send `event` to every open socket of `employee`. Returns the number of
    /// sockets reached.
    pub async fn publish(&self, employee: &EmployeeId, event: RealtimeEvent) -> usize {
        let mut channels = self.channels.lock().await;
        let Some(sender) = channels.get(employee) else {
            return 0;
        };
        match sender.send(event) {
            Ok(receivers) => receivers,
            Err(_) => {
                channels.remove(employee);
                0
            }
        }
    }

    /// Employees with at least one open socket.
    pub async fn active_employees(&self) -> usize {
        let channels = self.channels.lock().await;
        channels
            .values()
            .filter(|sender| sender.receiver_count() > 0)
            .count()
    }

    fn connection_id(&self) -> String {
        format!("conn-{}", self.next_connection.fetch_add(1, Ordering::Relaxed) + 1)
    }
}

/// Drive one upgraded socket until either side goes away.
///
/// `events` must be subscribed before the upgrade so nothing published in
/// between is lost.
pub async fn serve_socket(
    socket: WebSocket,
    broker: RealtimeBroker,
    employee: EmployeeId,
    mut events: broadcast::Receiver<RealtimeEvent>,
) {
    let (mut sink, mut stream) = socket.split();
    let employee_hash = employee_fingerprint(employee.as_str());

    let hello = RealtimeEvent::ConnectionEstablished(ConnectionInfo {
        employee_id: employee.clone(),
        connection_id: Some(broker.connection_id()),
    });
    if send_event(&mut sink, &hello).await.is_err() {
        return;
    }
    tracing::info!(employee = employee_hash, "Realtime socket opened");

    loop {
        tokio::select! {
            received = events.recv() => {
                let event = match received {
                    Ok(event) => event,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(employee = employee_hash, skipped, "Realtime socket lagged");
                        RealtimeEvent::DataUpdate(DataUpdate::default())
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                if send_event(&mut sink, &event).await.is_err() {
                    break;
                }
            }
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Close(_)) | Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }

    tracing::info!(employee = employee_hash, "Realtime socket closed");
}

async fn send_event<S>(sink: &mut S, event: &RealtimeEvent) -> Result<(), ()>
where
    S: futures::Sink<Message> + Unpin,
{
    let frame = event.to_frame().map_err(|error| {
        tracing::error!(%error, "Failed to encode realtime frame");
    })?;
    sink.send(Message::Text(frame.into())).await.map_err(|_| ())
}
