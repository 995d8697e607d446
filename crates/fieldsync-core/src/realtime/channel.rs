//! Long-lived WebSocket subscription keyed by employee id.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use super::event::{EventName, RealtimeEvent};
use crate::models::EmployeeId;
use crate::{Error, Result};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Listener invoked for every event of the name it was registered under.
pub type EventHandler = Arc<dyn Fn(&RealtimeEvent) + Send + Sync>;

/// Where and how to open the channel.
#[derive(Clone, PartialEq, Eq)]
pub struct RealtimeOptions {
    pub url: String,
    pub auth_token: Option<String>,
    /// Delay before the first reconnect attempt
    pub initial_backoff: Duration,
    /// Upper bound for the doubling reconnect delay
    pub max_backoff: Duration,
}

impl std::fmt::Debug for RealtimeOptions {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("RealtimeOptions")
            .field("url", &self.url)
            .field(
                "auth_token",
                &self.auth_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("initial_backoff", &self.initial_backoff)
            .field("max_backoff", &self.max_backoff)
            .finish()
    }
}

impl Default for RealtimeOptions {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:8080/v1/realtime".to_string(),
            auth_token: None,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
        }
    }
}

/// Handle to one employee's real-time subscription.
///
/// Cloning shares the same listeners and connection task.
#[derive(Clone)]
pub struct RealtimeSubscription {
    inner: Arc<SubscriptionInner>,
}

struct SubscriptionInner {
    endpoint: String,
    employee_id: EmployeeId,
    listeners: Mutex<HashMap<EventName, Vec<EventHandler>>>,
    connected: AtomicBool,
    shutdown: watch::Sender<bool>,
}

impl std::fmt::Debug for RealtimeSubscription {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("RealtimeSubscription")
            .field("endpoint", &self.inner.endpoint)
            .field("employee_id", &self.inner.employee_id)
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}

impl RealtimeSubscription {
    /// Build a subscription without a connection task.
    ///
    /// Events reach listeners only through [`Self::dispatch`].
    pub fn detached(options: &RealtimeOptions, employee_id: EmployeeId) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            inner: Arc::new(SubscriptionInner {
                endpoint: subscription_endpoint(&options.url, &employee_id),
                employee_id,
                listeners: Mutex::new(HashMap::new()),
                connected: AtomicBool::new(false),
                shutdown,
            }),
        }
    }

    /// Open the channel for `employee_id` on a background task.
    ///
    /// Must be called inside a tokio runtime. The task reconnects with
    /// exponential backoff until [`Self::close`] is called or every handle is
    /// dropped.
    pub fn connect(options: &RealtimeOptions, employee_id: EmployeeId) -> Self {
        let subscription = Self::detached(options, employee_id);
        let task = ConnectionTask {
            inner: Arc::downgrade(&subscription.inner),
            endpoint: subscription.inner.endpoint.clone(),
            auth_token: options.auth_token.clone(),
            initial_backoff: options.initial_backoff,
            max_backoff: options.max_backoff.max(options.initial_backoff),
            shutdown: subscription.inner.shutdown.subscribe(),
        };
        tokio::spawn(task.run());
        subscription
    }

    pub fn endpoint(&self) -> &str {
        &self.inner.endpoint
    }

    pub fn employee_id(&self) -> &EmployeeId {
        &self.inner.employee_id
    }

    /// Register `handler` for events named `event`.
    pub fn on(&self, event: EventName, handler: impl Fn(&RealtimeEvent) + Send + Sync + 'static) {
        match self.inner.listeners.lock() {
            Ok(mut listeners) => listeners.entry(event).or_default().push(Arc::new(handler)),
            Err(_) => tracing::error!(event = %event, "Listener registry poisoned; handler dropped"),
        }
    }

    /// Deliver `event` to its listeners. Returns how many were invoked.
    pub fn dispatch(&self, event: &RealtimeEvent) -> usize {
        self.inner.dispatch(event)
    }

    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::Acquire)
    }

    /// Stop the connection task. Listeners stay registered.
    pub fn close(&self) {
        self.inner.shutdown.send_replace(true);
        self.inner.connected.store(false, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        *self.inner.shutdown.borrow()
    }

    /// Whether both handles refer to the same subscription.
    pub fn same_as(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl SubscriptionInner {
    fn dispatch(&self, event: &RealtimeEvent) -> usize {
        let handlers = match self.listeners.lock() {
            Ok(listeners) => listeners.get(&event.name()).cloned().unwrap_or_default(),
            Err(_) => {
                tracing::error!("Listener registry poisoned; event dropped");
                return 0;
            }
        };

        for handler in &handlers {
            handler(event);
        }
        handlers.len()
    }
}

struct ConnectionTask {
    inner: Weak<SubscriptionInner>,
    endpoint: String,
    auth_token: Option<String>,
    initial_backoff: Duration,
    max_backoff: Duration,
    shutdown: watch::Receiver<bool>,
}

enum SessionEnd {
    Shutdown,
    Dropped(String),
}

impl ConnectionTask {
    async fn run(mut self) {
        let mut backoff = self.initial_backoff;

        loop {
            if *self.shutdown.borrow() {
                break;
            }

            let connected = tokio::select! {
                _ = self.shutdown.changed() => break,
                result = connect(&self.endpoint, self.auth_token.as_deref()) => result,
            };

            let reason = match connected {
                Ok(stream) => {
                    backoff = self.initial_backoff;
                    tracing::info!(endpoint = %self.endpoint, "Realtime channel connected");
                    match self.read_frames(stream).await {
                        SessionEnd::Shutdown => break,
                        SessionEnd::Dropped(reason) => reason,
                    }
                }
                Err(error) => error.to_string(),
            };

            let Some(inner) = self.inner.upgrade() else {
                break;
            };
            inner.connected.store(false, Ordering::Release);
            tracing::warn!(
                endpoint = %self.endpoint,
                reason = %reason,
                retry_in_ms = u64::try_from(backoff.as_millis()).unwrap_or(u64::MAX),
                "Realtime channel disconnected"
            );
            inner.dispatch(&RealtimeEvent::channel_error(reason));
            drop(inner);

            tokio::select! {
                _ = self.shutdown.changed() => break,
                () = tokio::time::sleep(backoff) => {}
            }
            backoff = (backoff * 2).min(self.max_backoff);
        }

        if let Some(inner) = self.inner.upgrade() {
            inner.connected.store(false, Ordering::Release);
        }
        tracing::debug!(endpoint = %self.endpoint, "Realtime connection task stopped");
    }

    async fn read_frames(&mut self, stream: WsStream) -> SessionEnd {
        let (mut write, mut read) = stream.split();

        match self.inner.upgrade() {
            Some(inner) => inner.connected.store(true, Ordering::Release),
            None => return SessionEnd::Shutdown,
        }

        loop {
            let frame = tokio::select! {
                _ = self.shutdown.changed() => {
                    write.send(Message::Close(None)).await.ok();
                    return SessionEnd::Shutdown;
                }
                frame = read.next() => frame,
            };

            match frame {
                Some(Ok(Message::Text(text))) => match RealtimeEvent::parse(text.as_str()) {
                    Ok(event) => {
                        let Some(inner) = self.inner.upgrade() else {
                            return SessionEnd::Shutdown;
                        };
                        let handled = inner.dispatch(&event);
                        tracing::debug!(event = %event.name(), handled, "Realtime event");
                    }
                    Err(error) => tracing::warn!(%error, "Ignoring malformed realtime frame"),
                },
                Some(Ok(Message::Close(_))) | None => {
                    return SessionEnd::Dropped("connection closed by server".to_string());
                }
                Some(Ok(_)) => {}
                Some(Err(error)) => return SessionEnd::Dropped(error.to_string()),
            }
        }
    }
}

async fn connect(endpoint: &str, auth_token: Option<&str>) -> Result<WsStream> {
    let mut request = endpoint
        .into_client_request()
        .map_err(|error| Error::Realtime(error.to_string()))?;
    if let Some(token) = auth_token {
        let value = format!("Bearer {token}")
            .parse()
            .map_err(|_| Error::Realtime("auth token is not a valid header value".to_string()))?;
        request.headers_mut().insert(AUTHORIZATION, value);
    }

    let (stream, _response) = connect_async(request)
        .await
        .map_err(|error| Error::Realtime(error.to_string()))?;
    Ok(stream)
}

fn subscription_endpoint(url: &str, employee_id: &EmployeeId) -> String {
    let separator = if url.contains('?') { '&' } else { '?' };
    format!(
        "{url}{separator}employee_id={}",
        urlencoding::encode(employee_id.as_str())
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EntityKind;
    use crate::realtime::event::{ConnectionInfo, DataUpdate, Notification};
    use std::sync::atomic::AtomicUsize;
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;

    fn employee() -> EmployeeId {
        EmployeeId::new("emp 1").unwrap()
    }

    #[test]
    fn endpoint_carries_employee_query() {
        let options = RealtimeOptions::default();
        let subscription = RealtimeSubscription::detached(&options, employee());
        assert_eq!(
            subscription.endpoint(),
            "ws://127.0.0.1:8080/v1/realtime?employee_id=emp%201"
        );

        let options = RealtimeOptions {
            url: "wss://example.com/live?v=2".to_string(),
            ..RealtimeOptions::default()
        };
        assert!(RealtimeSubscription::detached(&options, employee())
            .endpoint()
            .ends_with("?v=2&employee_id=emp%201"));
    }

    #[test]
    fn dispatch_routes_by_event_name() {
        let subscription = RealtimeSubscription::detached(&RealtimeOptions::default(), employee());
        let updates = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&updates);
        subscription.on(EventName::DataUpdate, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let handled = subscription.dispatch(&RealtimeEvent::Notification(Notification {
            title: None,
            message: "hello".to_string(),
        }));
        assert_eq!(handled, 0);

        let handled = subscription.dispatch(&RealtimeEvent::DataUpdate(DataUpdate::default()));
        assert_eq!(handled, 1);
        assert_eq!(updates.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn receives_events_over_websocket() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            let hello = RealtimeEvent::ConnectionEstablished(ConnectionInfo {
                employee_id: EmployeeId::new("emp 1").unwrap(),
                connection_id: Some("c-1".to_string()),
            });
            let update = RealtimeEvent::DataUpdate(DataUpdate {
                kind: Some(EntityKind::Receipt),
                ..DataUpdate::default()
            });
            ws.send(Message::text(hello.to_frame().unwrap())).await.unwrap();
            ws.send(Message::text(update.to_frame().unwrap())).await.unwrap();
            // Hold the socket open until the client closes it
            while let Some(Ok(_)) = ws.next().await {}
        });

        let options = RealtimeOptions {
            url: format!("ws://{addr}/v1/realtime"),
            initial_backoff: Duration::from_millis(50),
            ..RealtimeOptions::default()
        };
        let subscription = RealtimeSubscription::connect(&options, employee());

        let (tx, mut rx) = mpsc::unbounded_channel();
        for name in [EventName::ConnectionEstablished, EventName::DataUpdate] {
            let tx = tx.clone();
            subscription.on(name, move |event| {
                tx.send(event.clone()).ok();
            });
        }

        let first = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.name(), EventName::ConnectionEstablished);

        let second = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            second,
            RealtimeEvent::DataUpdate(DataUpdate {
                kind: Some(EntityKind::Receipt),
                ..DataUpdate::default()
            })
        );
        assert!(subscription.is_connected());

        subscription.close();
        assert!(subscription.is_closed());
        assert!(!subscription.is_connected());
    }

    #[tokio::test]
    async fn failed_connect_surfaces_error_event() {
        // Bind then drop to get a port nothing listens on
        let addr = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap()
        };
        let options = RealtimeOptions {
            url: format!("ws://{addr}/v1/realtime"),
            initial_backoff: Duration::from_millis(20),
            max_backoff: Duration::from_millis(40),
            ..RealtimeOptions::default()
        };
        let subscription = RealtimeSubscription::connect(&options, employee());

        let (tx, mut rx) = mpsc::unbounded_channel();
        subscription.on(EventName::Error, move |event| {
            tx.send(event.clone()).ok();
        });

        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.name(), EventName::Error);
        assert!(!subscription.is_connected());
        subscription.close();
    }
}
