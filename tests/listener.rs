mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use hassdeck::backend::hass::listener::{HassListener, LightEventHandler};
use hassdeck::error::{ApiError, ApiResult};
use hassdeck::health::HealthBus;
use hassdeck_api::event::LightEvent;

use common::{MockHub, TOKEN, accept_auth, recv_json, result_ok, send_json, spawn_hub, within};

struct Forward(mpsc::UnboundedSender<LightEvent>);

impl LightEventHandler for Forward {
    fn handle(&self, event: &LightEvent) -> ApiResult<()> {
        let _ = self.0.send(event.clone());
        if event.entity_id() == "light.cursed" {
            return Err(ApiError::service_error("handler exploded"));
        }
        Ok(())
    }
}

fn listener(url: url::Url, tx: mpsc::UnboundedSender<LightEvent>) -> HassListener {
    HassListener::new(
        "test",
        url,
        TOKEN.to_string(),
        HealthBus::new(),
        Arc::new(Forward(tx)),
        Duration::from_secs(2),
    )
}

#[tokio::test]
async fn delivers_typed_events_until_cancelled() {
    let (hub, _calls) = MockHub::new(json!([]));
    let hub = Arc::new(hub);
    let serving = hub.clone();
    let (url, _) = spawn_hub(move |ws, _| serving.clone().serve(ws)).await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let listener = listener(url, tx);
    let cancel = CancellationToken::new();

    let stop = cancel.clone();
    let task = tokio::spawn(async move { listener.run(&stop).await });

    within(hub.subscribed.notified()).await;

    // a failing handler call must not stop the following notifications
    hub.push_state(
        "light.cursed",
        json!({"entity_id": "light.cursed", "state": "on", "attributes": {}}),
    );
    hub.push_state(
        "light.desk",
        json!({
            "entity_id": "light.desk",
            "state": "on",
            "attributes": {"brightness": 200, "hs_color": [120, 50]},
        }),
    );

    let mut seen = vec![];
    while seen.len() < 4 {
        seen.push(within(rx.recv()).await.unwrap());
    }

    assert_eq!(
        seen[0],
        LightEvent::Power {
            entity_id: "light.cursed".into(),
            on: true
        }
    );
    assert_eq!(
        seen[1],
        LightEvent::Power {
            entity_id: "light.desk".into(),
            on: true
        }
    );
    assert_eq!(
        seen[2],
        LightEvent::Brightness {
            entity_id: "light.desk".into(),
            brightness: 200
        }
    );
    assert!(matches!(&seen[3], LightEvent::HsColor { hs, .. } if (hs.hue - 120.0).abs() < 1e-9));

    cancel.cancel();
    assert!(within(task).await.unwrap().is_ok());
}

#[tokio::test]
async fn transport_loss_ends_run_with_error() {
    let (url, _) = spawn_hub(|mut ws, _| async move {
        if !accept_auth(&mut ws).await {
            return;
        }
        let Some(sub) = recv_json(&mut ws).await else {
            return;
        };
        send_json(&mut ws, &result_ok(&sub["id"], json!(null))).await;
        // hang up right after subscribing
    })
    .await;

    let (tx, _rx) = mpsc::unbounded_channel();
    let listener = listener(url, tx);
    let res = within(listener.run(&CancellationToken::new())).await;
    assert!(res.is_err());
}

#[tokio::test]
async fn rejected_token_fails_handshake() {
    let (url, _) = spawn_hub(|mut ws, _| async move {
        let _ = accept_auth(&mut ws).await;
    })
    .await;

    let (tx, _rx) = mpsc::unbounded_channel();
    let listener = HassListener::new(
        "test",
        url,
        "wrong".to_string(),
        HealthBus::new(),
        Arc::new(Forward(tx)),
        Duration::from_secs(2),
    );
    let res = within(listener.run(&CancellationToken::new())).await;
    assert!(matches!(res, Err(ApiError::Handshake(_))));
}
