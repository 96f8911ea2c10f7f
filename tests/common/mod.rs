#![allow(dead_code)]

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Notify, broadcast, mpsc};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{WebSocketStream, accept_async};
use url::Url;

use hassdeck::config::{AppConfig, DebounceConfig, HassServer, RefreshConfig, TimeoutConfig};

pub const TOKEN: &str = "secret-token";

pub type HubSocket = WebSocketStream<TcpStream>;

/// Accept websocket connections on a random local port, handing each one to
/// `handler` together with its connection index.
pub async fn spawn_hub<F, Fut>(handler: F) -> (Url, Arc<AtomicUsize>)
where
    F: Fn(HubSocket, usize) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let accepted = Arc::new(AtomicUsize::new(0));

    let handler = Arc::new(handler);
    let counter = accepted.clone();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let index = counter.fetch_add(1, Ordering::SeqCst);
            let handler = handler.clone();
            tokio::spawn(async move {
                if let Ok(ws) = accept_async(stream).await {
                    handler(ws, index).await;
                }
            });
        }
    });

    let url = Url::parse(&format!("ws://{addr}/api/websocket")).unwrap();
    (url, accepted)
}

pub async fn recv_json(ws: &mut HubSocket) -> Option<Value> {
    while let Some(Ok(msg)) = ws.next().await {
        match msg {
            Message::Text(text) => return serde_json::from_str(text.as_str()).ok(),
            Message::Close(_) => return None,
            _ => {}
        }
    }
    None
}

pub async fn send_json(ws: &mut HubSocket, value: &Value) {
    let _ = ws.send(Message::Text(value.to_string().into())).await;
}

/// Hub side of the handshake. Returns whether the token was accepted.
pub async fn accept_auth(ws: &mut HubSocket) -> bool {
    send_json(ws, &json!({"type": "auth_required", "ha_version": "2025.1.0"})).await;
    let Some(auth) = recv_json(ws).await else {
        return false;
    };
    if auth["type"] == "auth" && auth["access_token"] == TOKEN {
        send_json(ws, &json!({"type": "auth_ok", "ha_version": "2025.1.0"})).await;
        true
    } else {
        send_json(ws, &json!({"type": "auth_invalid", "message": "Invalid access token"})).await;
        false
    }
}

pub fn result_ok(id: &Value, result: Value) -> Value {
    json!({"id": id, "type": "result", "success": true, "result": result})
}

pub fn result_err(id: &Value, code: &str, message: &str) -> Value {
    json!({
        "id": id,
        "type": "result",
        "success": false,
        "error": {"code": code, "message": message},
    })
}

pub fn state_changed(sub_id: &Value, entity_id: &str, new_state: Value) -> Value {
    json!({
        "id": sub_id,
        "type": "event",
        "event": {
            "event_type": "state_changed",
            "data": {"entity_id": entity_id, "new_state": new_state},
        },
    })
}

pub fn test_config(url: &Url) -> AppConfig {
    AppConfig {
        hass: HassServer {
            url: url.clone(),
            token: Some(TOKEN.to_string()),
            token_env: None,
        },
        timeouts: TimeoutConfig {
            connect_ms: 2_000,
            request_ms: 2_000,
            health_grace_ms: 20,
        },
        debounce: DebounceConfig {
            brightness_ms: 50,
            hs_color_ms: 50,
            color_temp_ms: 50,
        },
        refresh: RefreshConfig {
            interval_secs: 0,
            reconnect_secs: 1,
        },
    }
}

pub async fn within<T>(fut: impl Future<Output = T>) -> T {
    tokio::time::timeout(Duration::from_secs(5), fut)
        .await
        .expect("timed out waiting for the hub")
}

/// Scriptable stand-in for a full hub: answers the snapshot queries, records
/// service calls and lets the test push `state_changed` events.
pub struct MockHub {
    pub states: Mutex<Value>,
    pub devices: Value,
    pub entities: Value,
    pub areas: Value,
    pub services: Value,
    pub calls: mpsc::UnboundedSender<Value>,
    pub push: broadcast::Sender<Value>,
    pub subscribed: Notify,
    /// States swapped in when the next subscription arrives, before it is
    /// acknowledged.
    pub on_subscribe: Mutex<Option<Value>>,
    hangup: broadcast::Sender<()>,
}

impl MockHub {
    pub fn new(states: Value) -> (Self, mpsc::UnboundedReceiver<Value>) {
        let (calls, rx) = mpsc::unbounded_channel();
        let (push, _) = broadcast::channel(64);
        let (hangup, _) = broadcast::channel(4);
        let hub = Self {
            states: Mutex::new(states),
            devices: json!([]),
            entities: json!([]),
            areas: json!([]),
            services: json!({
                "light": {"turn_on": {}, "turn_off": {}, "toggle": {}},
                "cover": {"set_cover_position": {}},
                "script": {"turn_on": {}},
            }),
            calls,
            push,
            subscribed: Notify::new(),
            on_subscribe: Mutex::new(None),
            hangup,
        };
        (hub, rx)
    }

    pub fn set_states(&self, states: Value) {
        *self.states.lock().unwrap() = states;
    }

    pub fn push_state(&self, entity_id: &str, new_state: Value) {
        let _ = self.push.send(json!({"entity_id": entity_id, "new_state": new_state}));
    }

    /// Drop every connection that holds an event subscription.
    pub fn drop_subscribers(&self) {
        let _ = self.hangup.send(());
    }

    fn answer(&self, request: &Value) -> Value {
        let id = &request["id"];
        match request["type"].as_str().unwrap_or_default() {
            "get_states" => result_ok(id, self.states.lock().unwrap().clone()),
            "get_services" => result_ok(id, self.services.clone()),
            "config/device_registry/list" => result_ok(id, self.devices.clone()),
            "config/entity_registry/list" => result_ok(id, self.entities.clone()),
            "config/area_registry/list" => result_ok(id, self.areas.clone()),
            "call_service" => {
                let _ = self.calls.send(request.clone());
                result_ok(id, json!({"context": {"id": "abc"}}))
            }
            other => result_err(id, "unknown_command", &format!("Unknown command {other}")),
        }
    }

    /// Per-connection loop, usable as a [`spawn_hub`] handler.
    pub async fn serve(self: Arc<Self>, mut ws: HubSocket) {
        if !accept_auth(&mut ws).await {
            return;
        }
        let mut pushes = self.push.subscribe();
        let mut hangups = self.hangup.subscribe();
        let mut subscription: Option<Value> = None;

        loop {
            tokio::select! {
                req = recv_json(&mut ws) => {
                    let Some(req) = req else { return };
                    if req["type"] == "subscribe_events" {
                        if let Some(states) = self.on_subscribe.lock().unwrap().take() {
                            self.set_states(states);
                        }
                        subscription = Some(req["id"].clone());
                        send_json(&mut ws, &result_ok(&req["id"], Value::Null)).await;
                        self.subscribed.notify_one();
                    } else {
                        let reply = self.answer(&req);
                        send_json(&mut ws, &reply).await;
                    }
                }
                Ok(()) = hangups.recv(), if subscription.is_some() => return,
                Ok(push) = pushes.recv() => {
                    if let Some(sub) = &subscription {
                        let frame = state_changed(
                            sub,
                            push["entity_id"].as_str().unwrap_or_default(),
                            push["new_state"].clone(),
                        );
                        send_json(&mut ws, &frame).await;
                    }
                }
            }
        }
    }
}
