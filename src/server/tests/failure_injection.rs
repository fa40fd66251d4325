use super::helpers::*;
use serde_json::json;
use std::time::Duration;

async fn wait_for_observers(h: &Harness, count: usize) {
    for _ in 0..200 {
        if h.ctx.observers().len() == count {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!(
        "expected {} observers, have {}",
        count,
        h.ctx.observers().len()
    );
}

// ── Observer failures ───────────────────────────────────────

#[tokio::test]
async fn test_failed_observer_is_evicted_and_others_keep_receiving() {
    let h = harness(true, 100).await;
    let mut a = h.client().await;
    let mut b = h.client().await;
    request(&mut a, json!({"type": "get_status"})).await;
    request(&mut b, json!({"type": "get_status"})).await;

    // An observer whose connection died without deregistering.
    let (_id, tx, rx) = h.ctx.observers().register();
    drop(tx);
    drop(rx);
    assert_eq!(h.ctx.observers().len(), 3);

    let touch = json!({"type": "touch_event", "data": {"action": "tap", "part": "head"}});
    a.send_text(touch.to_string()).await;
    let relay = next_broadcast(&mut b, "touch_event").await;
    assert_eq!(relay["data"]["part"], "head");
    assert_eq!(next_reply(&mut a).await["type"], "touch_reaction");
    assert_eq!(h.ctx.observers().len(), 2);

    b.send_text(touch.to_string()).await;
    assert_eq!(next_broadcast(&mut a, "touch_event").await["data"]["region"], "head");
    assert_eq!(next_reply(&mut b).await["type"], "touch_reaction");
    h.stop().await;
}

#[tokio::test]
async fn test_disconnected_client_leaves_the_observer_set() {
    let h = harness(true, 100).await;
    let mut a = h.client().await;
    let mut c = h.client().await;
    request(&mut a, json!({"type": "get_status"})).await;
    request(&mut c, json!({"type": "get_status"})).await;
    assert_eq!(h.ctx.observers().len(), 2);

    drop(c);
    wait_for_observers(&h, 1).await;
    let status = request(&mut a, json!({"type": "get_status"})).await;
    assert_eq!(status["data"]["connected_clients"], 1);
    h.stop().await;
}

// ── Upstream failures ───────────────────────────────────────

#[tokio::test]
async fn test_missing_sink_is_reported_per_message() {
    let h = harness(false, 100).await;
    let mut client = h.client().await;

    let reply = request(&mut client, json!({"type": "expression", "data": {"name": "happy"}})).await;
    assert_eq!(reply["type"], "error");
    assert_eq!(reply["data"]["message"], "Render sink is not connected");

    // Engines keep working without a sink.
    let reply = request(
        &mut client,
        json!({"type": "parameter", "data": {"id": "ParamAngleX", "value": 5}}),
    )
    .await;
    assert_eq!(reply["type"], "parameter_set");

    let reply = request(
        &mut client,
        json!({"type": "touch_event", "data": {"action": "tap", "part": "cheek"}}),
    )
    .await;
    assert_eq!(reply["type"], "touch_reaction");
    assert_eq!(reply["data"]["affection"], 35);

    let reply = request(&mut client, json!({"type": "speak", "data": {"text": "still here"}})).await;
    assert_eq!(reply["type"], "speak_completed");

    let status = request(&mut client, json!({"type": "get_status"})).await;
    assert_eq!(status["data"]["sink_connected"], false);
    h.stop().await;
}

// ── Shutdown ────────────────────────────────────────────────

#[tokio::test]
async fn test_shutdown_closes_connections_cleanly() {
    let h = harness(true, 100).await;
    let mut client = h.client().await;
    request(&mut client, json!({"type": "get_status"})).await;

    h.trigger.trigger();
    let closed = tokio::time::timeout(Duration::from_secs(2), async {
        // Whatever arrives before the close is a complete JSON frame.
        while let Ok(message) = client.recv().await {
            if let Ok(text) = message.to_str() {
                serde_json::from_str::<serde_json::Value>(text).expect("whole frame");
            }
        }
    })
    .await;
    assert!(closed.is_ok(), "connection stayed open after shutdown");
    wait_for_observers(&h, 0).await;
    h.stop().await;
}
