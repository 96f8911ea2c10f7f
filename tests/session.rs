mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use tokio::sync::{broadcast, mpsc};

use hassdeck::backend::hass::HassSession;
use hassdeck::error::ApiError;
use hassdeck_api::event::SessionEvent;

use common::{MockHub, spawn_hub, test_config, within};

fn states() -> Value {
    json!([
        {
            "entity_id": "light.kitchen",
            "state": "on",
            "attributes": {
                "friendly_name": "Kitchen",
                "supported_color_modes": ["hs", "color_temp"],
                "brightness": 180,
                "hs_color": [30, 60],
                "min_mireds": 153,
                "max_mireds": 454,
                "color_temp": 300,
            },
        },
        {
            "entity_id": "light.hall",
            "state": "off",
            "attributes": {"supported_color_modes": ["brightness"], "brightness": 120},
        },
        {"entity_id": "switch.fan", "state": "on", "attributes": {}},
        {
            "entity_id": "cover.blind",
            "state": "open",
            "attributes": {"current_position": 40, "supported_features": 15},
        },
        {"entity_id": "script.movie", "state": "off", "attributes": {}},
        {"entity_id": "sensor.temp", "state": "21.5", "attributes": {}},
    ])
}

fn hub() -> (MockHub, mpsc::UnboundedReceiver<Value>) {
    let (mut hub, calls) = MockHub::new(states());
    hub.devices = json!([{"id": "d1", "name": "Bulb", "area_id": "kitchen"}]);
    hub.entities = json!([
        {"entity_id": "light.kitchen", "device_id": "d1"},
        {"entity_id": "cover.blind", "area_id": "living"},
    ]);
    hub.areas = json!([
        {"area_id": "kitchen", "name": "Kitchen"},
        {"area_id": "living", "name": "Living room"},
    ]);
    (hub, calls)
}

/// Start a session against `hub` and wait until both the initial load and
/// the resync that follows the event subscription are done.
async fn start_with(hub: MockHub) -> (Arc<HassSession>, Arc<MockHub>) {
    let hub = Arc::new(hub);
    let serving = hub.clone();
    let (url, _) = spawn_hub(move |ws, _| serving.clone().serve(ws)).await;

    let session = Arc::new(HassSession::new("test", test_config(&url)).unwrap());
    let mut events = session.subscribe();
    within(session.start()).await.unwrap();
    within(hub.subscribed.notified()).await;
    wait_for(&mut events, &SessionEvent::EntitiesReloaded).await;
    wait_for(&mut events, &SessionEvent::EntitiesReloaded).await;

    (session, hub)
}

async fn start() -> (Arc<HassSession>, Arc<MockHub>, mpsc::UnboundedReceiver<Value>) {
    let (hub, calls) = hub();
    let (session, hub) = start_with(hub).await;
    (session, hub, calls)
}

async fn next_call(calls: &mut mpsc::UnboundedReceiver<Value>) -> Value {
    within(calls.recv()).await.unwrap()
}

async fn no_more_calls(calls: &mut mpsc::UnboundedReceiver<Value>) {
    let extra = tokio::time::timeout(Duration::from_millis(200), calls.recv()).await;
    assert!(extra.is_err(), "unexpected call {extra:?}");
}

async fn wait_for(events: &mut broadcast::Receiver<SessionEvent>, wanted: &SessionEvent) {
    within(async {
        loop {
            if events.recv().await.unwrap() == *wanted {
                break;
            }
        }
    })
    .await;
}

#[tokio::test]
async fn start_loads_snapshot() {
    let (session, _hub, _calls) = start().await;
    let state = session.state();

    assert_eq!(state.len(), 5);
    assert!(!state.contains("sensor.temp"));
    assert_eq!(state.get_effective_brightness("light.kitchen"), 180);
    // off light: brightness attribute is cached, but not shown
    assert_eq!(state.hsb("light.hall").unwrap().brightness, 120);
    assert_eq!(state.get_effective_brightness("light.hall"), 0);
    assert!(session.last_refresh().is_some());

    let groups = session
        .area_groups()
        .into_iter()
        .map(|g| (g.name, g.entity_ids))
        .collect::<Vec<_>>();
    assert_eq!(
        groups,
        vec![
            ("Kitchen".to_string(), vec!["light.kitchen".to_string()]),
            ("Living room".to_string(), vec!["cover.blind".to_string()]),
            (
                "unassigned".to_string(),
                vec![
                    "light.hall".to_string(),
                    "script.movie".to_string(),
                    "switch.fan".to_string(),
                ]
            ),
        ]
    );

    assert!(session.has_service("cover", "set_cover_position"));
    assert!(!session.has_service("cover", "set_cover_tilt_position"));

    session.shutdown().await;
}

#[tokio::test]
async fn brightness_changes_are_coalesced() {
    let (session, _hub, mut calls) = start().await;

    session.set_brightness("light.hall", 100).unwrap();
    session.set_brightness("light.hall", 150).unwrap();
    assert_eq!(session.set_brightness("light.hall", 900).unwrap(), 255);
    assert_eq!(session.state().get_effective_brightness("light.hall"), 255);

    let call = next_call(&mut calls).await;
    assert_eq!(call["domain"], "light");
    assert_eq!(call["service"], "turn_on");
    assert_eq!(call["target"]["entity_id"], "light.hall");
    assert_eq!(call["service_data"], json!({"brightness": 255}));
    no_more_calls(&mut calls).await;

    assert_eq!(session.adjust_brightness("light.hall", -55).unwrap(), 200);
    let call = next_call(&mut calls).await;
    assert_eq!(call["service_data"], json!({"brightness": 200}));

    session.shutdown().await;
}

#[tokio::test]
async fn color_temp_is_clamped_and_sent_in_kelvin() {
    let (session, _hub, mut calls) = start().await;

    assert_eq!(
        session
            .set_color_temp_kelvin("light.kitchen", 10_000)
            .unwrap(),
        153
    );
    let call = next_call(&mut calls).await;
    assert_eq!(call["service_data"], json!({"color_temp_kelvin": 6536}));

    let hsb = session.adjust_hue("light.kitchen", 350.0).unwrap();
    assert!((hsb.hue - 20.0).abs() < 1e-9);
    let call = next_call(&mut calls).await;
    assert_eq!(call["service_data"]["hs_color"][0], json!(20.0));

    session.shutdown().await;
}

#[tokio::test]
async fn unsupported_operations_are_refused() {
    let (session, _hub, mut calls) = start().await;

    assert!(matches!(
        session.set_hs_color("light.hall", 10.0, 10.0),
        Err(ApiError::UnsupportedCapability { .. })
    ));
    assert!(matches!(
        session.set_brightness("switch.fan", 10),
        Err(ApiError::UnsupportedCapability { .. })
    ));
    assert!(matches!(
        session.set_cover_tilt("cover.blind", 10).await,
        Err(ApiError::UnsupportedCapability { .. })
    ));
    assert!(matches!(
        session.set_brightness("light.nowhere", 10),
        Err(ApiError::UnknownEntity(_))
    ));
    assert!(session.run_script("light.kitchen").await.is_err());

    no_more_calls(&mut calls).await;
    session.shutdown().await;
}

#[tokio::test]
async fn immediate_commands() {
    let (session, _hub, mut calls) = start().await;

    session.toggle("switch.fan").await.unwrap();
    let call = next_call(&mut calls).await;
    assert_eq!((call["domain"].clone(), call["service"].clone()), (json!("switch"), json!("toggle")));
    assert!(!session.state().is_on("switch.fan"));

    session.turn_on("light.hall").await.unwrap();
    let call = next_call(&mut calls).await;
    assert_eq!(call["service"], "turn_on");
    assert_eq!(session.state().get_effective_brightness("light.hall"), 120);

    session.set_cover_position("cover.blind", 150).await.unwrap();
    let call = next_call(&mut calls).await;
    assert_eq!(call["service"], "set_cover_position");
    assert_eq!(call["service_data"], json!({"position": 100}));

    session.run_script("script.movie").await.unwrap();
    let call = next_call(&mut calls).await;
    assert_eq!((call["domain"].clone(), call["service"].clone()), (json!("script"), json!("turn_on")));

    session.shutdown().await;
}

#[tokio::test]
async fn pushed_changes_reach_state() {
    let (session, hub, _calls) = start().await;
    let mut events = session.subscribe();

    hub.push_state(
        "light.hall",
        json!({
            "entity_id": "light.hall",
            "state": "on",
            "attributes": {"supported_color_modes": ["brightness"], "brightness": 77},
        }),
    );
    wait_for(&mut events, &SessionEvent::EntityChanged("light.hall".into())).await;

    within(async {
        while session.state().get_effective_brightness("light.hall") != 77 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;

    hub.push_state("switch.fan", Value::Null);
    wait_for(&mut events, &SessionEvent::EntityRemoved("switch.fan".into())).await;
    assert!(!session.state().contains("switch.fan"));

    session.shutdown().await;
}

#[tokio::test]
async fn refresh_preserves_local_color() {
    let (session, hub, _calls) = start().await;
    let mut events = session.subscribe();

    session.set_hs_color("light.kitchen", 200.0, 80.0).unwrap();

    let mut reduced = states();
    reduced
        .as_array_mut()
        .unwrap()
        .retain(|s| s["entity_id"] != "script.movie");
    hub.set_states(reduced);

    within(session.refresh()).await.unwrap();

    let hsb = session.state().hsb("light.kitchen").unwrap();
    assert!((hsb.hue - 200.0).abs() < 1e-9);
    assert!((hsb.saturation - 80.0).abs() < 1e-9);
    assert!(!session.state().contains("script.movie"));
    wait_for(&mut events, &SessionEvent::EntityRemoved("script.movie".into())).await;

    session.shutdown().await;
}

#[tokio::test]
async fn set_brightness_from_plain_thread() {
    let (session, _hub, mut calls) = start().await;

    let remote = session.clone();
    let set = std::thread::spawn(move || remote.set_brightness("light.kitchen", 42))
        .join()
        .unwrap();
    assert_eq!(set.unwrap(), 42);

    let call = next_call(&mut calls).await;
    assert_eq!(call["service_data"], json!({"brightness": 42}));

    session.shutdown().await;
}

fn fan_off(mut states: Value) -> Value {
    for s in states.as_array_mut().unwrap() {
        if s["entity_id"] == "switch.fan" {
            s["state"] = json!("off");
        }
    }
    states
}

#[tokio::test]
async fn changes_before_subscribing_are_picked_up() {
    let (hub, _calls) = hub();
    // hub changes after the initial load, but before the subscription is up
    *hub.on_subscribe.lock().unwrap() = Some(fan_off(states()));

    let (session, _hub) = start_with(hub).await;
    assert!(!session.state().is_on("switch.fan"));

    session.shutdown().await;
}

#[tokio::test]
async fn resubscribing_resyncs_state() {
    let (session, hub, _calls) = start().await;
    assert!(session.state().is_on("switch.fan"));
    let mut events = session.subscribe();

    *hub.on_subscribe.lock().unwrap() = Some(fan_off(states()));
    hub.drop_subscribers();

    within(hub.subscribed.notified()).await;
    wait_for(&mut events, &SessionEvent::EntitiesReloaded).await;
    assert!(!session.state().is_on("switch.fan"));

    session.shutdown().await;
}

#[tokio::test]
async fn color_uses_preferred_encoding() {
    let (hub, mut calls) = hub();
    hub.set_states(json!([{
        "entity_id": "light.strip",
        "state": "on",
        "attributes": {"supported_color_modes": ["rgbww", "color_temp"], "brightness": 200},
    }]));
    let (session, _hub) = start_with(hub).await;

    session.set_hs_color("light.strip", 240.0, 100.0).unwrap();
    let call = next_call(&mut calls).await;
    assert_eq!(call["service_data"], json!({"rgb_color": [0, 0, 255]}));

    session.shutdown().await;
}
