//! Persistent subscription connection.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{header::COOKIE, HeaderValue};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, instrument, warn};

use super::protocol::{self, AnswerKind, Frame};
use crate::auth::Session;
use crate::client::ClientConfig;
use crate::{Error, Result};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;

/// Routing entry for one live subscription.
struct Route {
    tx: mpsc::UnboundedSender<Result<Value>>,
    /// Last full answer, base for the next delta
    last: Option<String>,
}

type Routes = Arc<Mutex<HashMap<u64, Route>>>;

fn lock(routes: &Routes) -> MutexGuard<'_, HashMap<u64, Route>> {
    routes.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Answers of a single subscription.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    rx: mpsc::UnboundedReceiver<Result<Value>>,
}

impl Subscription {
    /// Subscription id on the connection.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Next decoded answer. `None` once the subscription is closed or the
    /// connection is gone.
    pub async fn next(&mut self) -> Option<Result<Value>> {
        self.rx.recv().await
    }
}

/// A websocket connection multiplexing subscriptions.
///
/// One reader task decodes incoming frames (including deltas) and routes
/// them to the owning [`Subscription`]. Sends go through a shared writer.
pub struct SubscriptionConnection {
    write: Arc<tokio::sync::Mutex<WsSink>>,
    routes: Routes,
    next_id: AtomicU64,
    connected: Arc<AtomicBool>,
    request_timeout: Duration,
    session: Session,
    reader: JoinHandle<()>,
}

impl SubscriptionConnection {
    /// Connect and perform the protocol handshake.
    #[instrument(skip_all, fields(url = %config.endpoints.websocket_url()))]
    pub async fn connect(session: &Session, config: &ClientConfig) -> Result<Self> {
        let mut request = config.endpoints.websocket_url().into_client_request()?;
        if let Some(cookies) = session.cookie_header() {
            let value = HeaderValue::from_str(cookies)
                .map_err(|_| Error::InvalidInput("Invalid cookie format".to_string()))?;
            request.headers_mut().insert(COOKIE, value);
        }

        let (ws_stream, _) = tokio::time::timeout(config.timeout, connect_async(request))
            .await
            .map_err(|_| Error::Timeout("websocket connect".to_string()))??;
        let (mut write, mut read) = ws_stream.split();

        write
            .send(Message::Text(protocol::connect_message(
                session.mode(),
                &config.locale,
            )))
            .await?;

        let reply = tokio::time::timeout(config.timeout, read.next())
            .await
            .map_err(|_| Error::Timeout("websocket handshake".to_string()))?;
        match reply {
            Some(Ok(Message::Text(text))) if text == protocol::CONNECTED => {}
            Some(Ok(other)) => {
                return Err(Error::Protocol(format!(
                    "unexpected handshake reply: {other}"
                )))
            }
            Some(Err(e)) => return Err(e.into()),
            None => return Err(Error::StreamDisconnected),
        }
        info!("subscription connection established");

        let routes: Routes = Arc::new(Mutex::new(HashMap::new()));
        let connected = Arc::new(AtomicBool::new(true));
        let reader = tokio::spawn(Self::process_messages(
            read,
            routes.clone(),
            connected.clone(),
        ));

        Ok(Self {
            write: Arc::new(tokio::sync::Mutex::new(write)),
            routes,
            next_id: AtomicU64::new(1),
            connected,
            request_timeout: config.timeout,
            session: session.clone(),
            reader,
        })
    }

    /// Whether the connection is still open.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Start a subscription.
    ///
    /// App sessions carry their token inside every subscription payload.
    pub async fn subscribe(&self, mut payload: Value) -> Result<Subscription> {
        if !self.is_connected() {
            return Err(Error::StreamDisconnected);
        }
        if let (Some(token), Some(object)) = (self.session.session_token(), payload.as_object_mut())
        {
            object.insert("token".to_string(), Value::String(token.to_string()));
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::unbounded_channel();
        lock(&self.routes).insert(id, Route { tx, last: None });

        if let Err(e) = self.send(protocol::subscribe_message(id, &payload)).await {
            lock(&self.routes).remove(&id);
            return Err(e);
        }
        debug!(id, "subscribed");
        Ok(Subscription { id, rx })
    }

    /// End a subscription.
    pub async fn unsubscribe(&self, subscription: Subscription) -> Result<()> {
        lock(&self.routes).remove(&subscription.id);
        if self.is_connected() {
            self.send(protocol::unsubscribe_message(subscription.id))
                .await?;
        }
        Ok(())
    }

    /// Subscribe, wait for the first answer, and unsubscribe.
    ///
    /// # Errors
    ///
    /// - [`Error::Timeout`] if no answer arrives within the request timeout
    /// - [`Error::StreamDisconnected`] if the connection drops meanwhile
    /// - [`Error::SessionExpired`] if the service rejects the session
    pub async fn request(&self, payload: Value) -> Result<Value> {
        let mut subscription = self.subscribe(payload).await?;
        let id = subscription.id;

        let answer = match tokio::time::timeout(self.request_timeout, subscription.next()).await {
            Ok(Some(answer)) => answer,
            Ok(None) if !self.is_connected() => Err(Error::StreamDisconnected),
            Ok(None) => Err(Error::Protocol(format!(
                "subscription {id} closed without an answer"
            ))),
            Err(_) => Err(Error::Timeout(format!("no answer to subscription {id}"))),
        };

        if let Err(e) = self.unsubscribe(subscription).await {
            debug!(id, error = %e, "unsubscribe failed");
        }
        answer
    }

    /// Close the connection.
    pub async fn close(&self) -> Result<()> {
        self.connected.store(false, Ordering::SeqCst);
        let mut write = self.write.lock().await;
        write.close().await?;
        Ok(())
    }

    async fn send(&self, text: String) -> Result<()> {
        let mut write = self.write.lock().await;
        write.send(Message::Text(text)).await?;
        Ok(())
    }

    async fn process_messages(
        mut read: SplitStream<WsStream>,
        routes: Routes,
        connected: Arc<AtomicBool>,
    ) {
        while let Some(msg) = read.next().await {
            match msg {
                Ok(Message::Text(text)) => Self::dispatch(&text, &routes),
                Ok(Message::Close(_)) => {
                    debug!("server closed the connection");
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "websocket read failed");
                    break;
                }
                _ => {}
            }
        }

        connected.store(false, Ordering::SeqCst);
        for (_, route) in lock(&routes).drain() {
            let _ = route.tx.send(Err(Error::StreamDisconnected));
        }
    }

    fn dispatch(text: &str, routes: &Routes) {
        let (id, kind, payload) = match protocol::parse_frame(text) {
            Ok(Frame::Answer { id, kind, payload }) => (id, kind, payload),
            Ok(Frame::Connected) => return,
            Err(e) => {
                warn!(error = %e, "dropping unparseable frame");
                return;
            }
        };

        let mut routes = lock(routes);
        let Some(route) = routes.get_mut(&id) else {
            debug!(id, "frame for unknown subscription");
            return;
        };

        let answer = match kind {
            AnswerKind::Full => {
                route.last = Some(payload.to_string());
                serde_json::from_str(payload).map_err(Error::from)
            }
            AnswerKind::Delta => {
                let rebuilt = match route.last.as_deref() {
                    Some(previous) => protocol::apply_delta(previous, payload),
                    None => Err(Error::Protocol(format!(
                        "delta for subscription {id} without a previous answer"
                    ))),
                };
                rebuilt.and_then(|full| {
                    let parsed = serde_json::from_str(&full).map_err(Error::from);
                    route.last = Some(full);
                    parsed
                })
            }
            AnswerKind::Complete => {
                routes.remove(&id);
                return;
            }
            AnswerKind::Error => Err(protocol::error_from_payload(payload)),
        };

        if route.tx.send(answer).is_err() {
            routes.remove(&id);
        }
    }
}

impl Drop for SubscriptionConnection {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

impl std::fmt::Debug for SubscriptionConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionConnection")
            .field("connected", &self.is_connected())
            .field("session", &self.session)
            .finish()
    }
}
