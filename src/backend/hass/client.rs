use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde_json::{Map, Value, json};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use url::Url;

use hassdeck_api::event::HealthStatus;

use crate::backend::hass::frames::{
    self, HassResult, HassSocket, HassWsIncoming, authenticate, text_frame,
};
use crate::error::{ApiError, ApiResult};
use crate::health::HealthBus;

type Waiters = Arc<Mutex<HashMap<u64, oneshot::Sender<HassResult>>>>;

/// One authenticated socket. Ids are scoped to it: a fresh handshake means a
/// fresh `Connection` with the counter back at 1 and an empty waiter table.
struct Connection {
    endpoint: Url,
    token: String,
    writer: tokio::sync::Mutex<SplitSink<HassSocket, Message>>,
    waiters: Waiters,
    next_id: AtomicU64,
    alive: Arc<AtomicBool>,
    reader: JoinHandle<()>,
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

/// Removes a waiter when the request future is dropped (timeout,
/// cancellation or caller giving up), so the table never outlives interest.
struct WaiterGuard {
    waiters: Waiters,
    id: u64,
}

impl Drop for WaiterGuard {
    fn drop(&mut self) {
        self.waiters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.id);
    }
}

impl Connection {
    fn spawn(name: &str, endpoint: Url, token: String, socket: HassSocket) -> Self {
        let (writer, stream) = socket.split();
        let waiters: Waiters = Arc::default();
        let alive = Arc::new(AtomicBool::new(true));

        let reader = tokio::spawn(read_loop(
            name.to_string(),
            stream,
            waiters.clone(),
            alive.clone(),
        ));

        Self {
            endpoint,
            token,
            writer: tokio::sync::Mutex::new(writer),
            waiters,
            next_id: AtomicU64::new(1),
            alive,
            reader,
        }
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    fn register(&self) -> (u64, oneshot::Receiver<HassResult>, WaiterGuard) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.waiters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, tx);
        let guard = WaiterGuard {
            waiters: self.waiters.clone(),
            id,
        };
        (id, rx, guard)
    }

    async fn send(&self, msg: Message) -> ApiResult<()> {
        let res = self.writer.lock().await.send(msg).await;
        if res.is_err() {
            self.alive.store(false, Ordering::Release);
        }
        Ok(res?)
    }

    /// Weak liveness probe: a fire-and-forget ping, then a grace period
    /// during which the reader must not have seen a transport error. No pong
    /// is required.
    async fn probe(&self, grace: Duration) -> bool {
        if !self.is_alive() {
            return false;
        }
        if self.send(Message::Ping(Default::default())).await.is_err() {
            return false;
        }
        tokio::time::sleep(grace).await;
        self.is_alive()
    }
}

async fn read_loop(
    name: String,
    mut stream: SplitStream<HassSocket>,
    waiters: Waiters,
    alive: Arc<AtomicBool>,
) {
    while let Some(msg) = stream.next().await {
        match msg {
            Ok(Message::Text(text)) => dispatch(&name, text.as_str(), &waiters),
            Ok(Message::Close(frame)) => {
                log::debug!("[{name}] Hub closed connection: {frame:?}");
                break;
            }
            Ok(_) => {}
            Err(err) => {
                log::debug!("[{name}] Websocket read failed: {err}");
                break;
            }
        }
    }

    alive.store(false, Ordering::Release);
    // dropping the senders wakes every waiter with "connection lost"
    waiters
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .clear();
}

fn dispatch(name: &str, text: &str, waiters: &Waiters) {
    let Some(HassWsIncoming::Result(res)) = frames::parse_incoming(text) else {
        return;
    };
    let waiter = waiters
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .remove(&res.id);
    match waiter {
        Some(tx) => {
            // receiver may have given up in the meantime
            let _ = tx.send(res);
        }
        None => log::trace!("[{name}] Ignoring result for unknown id {}", res.id),
    }
}

/// Request/response client for the hub's websocket api.
///
/// Holds at most one authenticated connection. Transport failures drop it
/// (the next call needs [`ensure_connected`](Self::ensure_connected));
/// timeouts and remote rejections leave it in place.
pub struct HassClient {
    name: String,
    conn: Mutex<Option<Arc<Connection>>>,
    connect_lock: tokio::sync::Mutex<()>,
    last_target: Mutex<Option<(Url, String)>>,
    health: HealthBus,
    health_grace: Duration,
    cancel: CancellationToken,
}

impl HassClient {
    pub const DEFAULT_HEALTH_GRACE: Duration = Duration::from_millis(250);

    #[must_use]
    pub fn new(name: &str, health: HealthBus, cancel: CancellationToken) -> Self {
        Self {
            name: name.to_string(),
            conn: Mutex::new(None),
            connect_lock: tokio::sync::Mutex::new(()),
            last_target: Mutex::new(None),
            health,
            health_grace: Self::DEFAULT_HEALTH_GRACE,
            cancel,
        }
    }

    #[must_use]
    pub const fn with_health_grace(mut self, grace: Duration) -> Self {
        self.health_grace = grace;
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    fn current(&self) -> Option<Arc<Connection>> {
        self.conn
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.current().is_some_and(|conn| conn.is_alive())
    }

    /// Drop `conn` if it is still the current connection.
    fn invalidate(&self, conn: &Arc<Connection>) {
        let mut slot = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.as_ref().is_some_and(|cur| Arc::ptr_eq(cur, conn)) {
            *slot = None;
            drop(slot);
            log::warn!("[{}] Connection to {} lost", self.name, conn.endpoint);
            self.health.set(HealthStatus::Disconnected);
        }
    }

    async fn cancellable<T>(&self, fut: impl Future<Output = ApiResult<T>>) -> ApiResult<T> {
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(ApiError::Cancelled),
            res = fut => res,
        }
    }

    /// Connect and authenticate, reusing the current connection when it
    /// targets the same endpoint and credential and passes the liveness
    /// probe.
    pub async fn connect_and_authenticate(
        &self,
        endpoint: &Url,
        token: &str,
        timeout: Duration,
    ) -> ApiResult<()> {
        let _connecting = self.cancellable(async { Ok(self.connect_lock.lock().await) }).await?;

        if let Some(conn) = self.current() {
            if conn.endpoint == *endpoint && conn.token == token {
                if self.cancellable(async { Ok(conn.probe(self.health_grace).await) }).await? {
                    log::trace!("[{}] Reusing connection to {endpoint}", self.name);
                    return Ok(());
                }
                log::info!("[{}] Stale connection to {endpoint}, reconnecting", self.name);
            }
            self.invalidate(&conn);
        }

        self.health.set(HealthStatus::Connecting);
        log::info!("[{}] Connecting to {endpoint}", self.name);

        let res = self
            .cancellable(async {
                tokio::time::timeout(timeout, Self::open(endpoint, token))
                    .await
                    .map_err(|_| ApiError::Timeout)?
            })
            .await;

        match res {
            Ok(socket) => {
                let conn = Connection::spawn(&self.name, endpoint.clone(), token.to_string(), socket);
                *self.conn.lock().unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(conn));
                *self
                    .last_target
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner) =
                    Some((endpoint.clone(), token.to_string()));
                log::info!("[{}] Authenticated with {endpoint}", self.name);
                self.health.set(HealthStatus::Connected);
                Ok(())
            }
            Err(err) => {
                log::error!("[{}] Connection to {endpoint} failed: {err}", self.name);
                match &err {
                    ApiError::Handshake(msg) => {
                        self.health.set(HealthStatus::AuthFailed(msg.clone()));
                    }
                    _ => self.health.set(HealthStatus::Disconnected),
                }
                Err(err)
            }
        }
    }

    async fn open(endpoint: &Url, token: &str) -> ApiResult<HassSocket> {
        let (mut socket, _response) = connect_async(endpoint.as_str()).await?;
        authenticate(&mut socket, token).await?;
        Ok(socket)
    }

    /// Make sure a live connection exists, re-running the handshake against
    /// the last successful target if needed.
    pub async fn ensure_connected(&self, timeout: Duration) -> ApiResult<()> {
        if self.is_connected() {
            return Ok(());
        }
        let target = self
            .last_target
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let Some((endpoint, token)) = target else {
            return Err(ApiError::NotConnected);
        };
        self.connect_and_authenticate(&endpoint, &token, timeout).await
    }

    /// Send one correlated frame and wait for the result with the same id.
    async fn roundtrip(
        &self,
        build: impl FnOnce(u64) -> Value,
        timeout: Duration,
    ) -> ApiResult<HassResult> {
        let conn = self
            .current()
            .filter(|conn| conn.is_alive())
            .ok_or(ApiError::NotConnected)?;

        let (id, rx, _guard) = conn.register();

        if let Err(err) = conn.send(text_frame(&build(id))).await {
            self.invalidate(&conn);
            return Err(err);
        }

        let res = self
            .cancellable(async {
                match tokio::time::timeout(timeout, rx).await {
                    Err(_) => Err(ApiError::Timeout),
                    Ok(Err(_)) => Err(ApiError::ConnectionLost),
                    Ok(Ok(res)) => Ok(res),
                }
            })
            .await;

        if res.as_ref().is_err_and(ApiError::invalidates_connection) {
            self.invalidate(&conn);
        }
        res
    }

    /// Read-only query (`get_states`, `get_services`, registry lists, ..).
    /// Returns the `result` payload.
    pub async fn request(&self, kind: &str, timeout: Duration) -> ApiResult<Value> {
        self.roundtrip(|id| json!({"id": id, "type": kind}), timeout)
            .await?
            .into_result(&format!("Request {kind} failed"))
    }

    /// Invoke a hub action against one entity.
    pub async fn call_service(
        &self,
        domain: &str,
        service: &str,
        entity_id: &str,
        data: Map<String, Value>,
        timeout: Duration,
    ) -> ApiResult<()> {
        log::debug!(
            "[{}] call_service {domain}.{service} {entity_id} {}",
            self.name,
            Value::Object(data.clone())
        );
        self.roundtrip(
            |id| {
                json!({
                    "id": id,
                    "type": "call_service",
                    "domain": domain,
                    "service": service,
                    "target": { "entity_id": entity_id },
                    "service_data": data,
                })
            },
            timeout,
        )
        .await?
        .into_result("Service call failed")?;
        Ok(())
    }

    pub async fn close(&self) {
        let conn = self
            .conn
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(conn) = conn {
            log::info!("[{}] Closing connection to {}", self.name, conn.endpoint);
            let _ = conn.writer.lock().await.close().await;
        }
        self.health.set(HealthStatus::Disconnected);
    }
}
