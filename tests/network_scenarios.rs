//! Network event scenarios: the full CDP-events-in, BiDi-events-out pipeline
//! driven through the network manager with an in-process mock transport.

use bidi_oxide::cdp::mock::MockCdpTransport;
use bidi_oxide::cdp::{CdpEvent, CdpSession, CdpTransport};
use bidi_oxide::context::BrowsingContextStore;
use bidi_oxide::events::queue::{EventQueue, EventSink};
use bidi_oxide::events::{EventManager, OutgoingMessage};
use bidi_oxide::network::{InterceptPhase, NetworkManager, NetworkStorage};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

struct Pipeline {
    mock: Arc<MockCdpTransport>,
    manager: Arc<NetworkManager>,
    storage: Arc<NetworkStorage>,
    events: mpsc::UnboundedReceiver<OutgoingMessage>,
}

fn pipeline() -> Pipeline {
    let contexts = Arc::new(BrowsingContextStore::new());
    contexts.add("frame-1", None, "https://a.test/", "S1");

    let (tx, events) = mpsc::unbounded_channel();
    let sink: EventSink = Arc::new(move |message| {
        let tx = tx.clone();
        Box::pin(async move {
            let _ = tx.send(message);
        })
    });
    let queue = Arc::new(EventQueue::new(sink));
    let event_manager = Arc::new(EventManager::new(contexts, queue));
    event_manager
        .subscribe(&["network".to_string()], &[], Some("A"))
        .unwrap();

    let mock = Arc::new(MockCdpTransport::new());
    let storage = Arc::new(NetworkStorage::new());
    let manager = NetworkManager::new(
        CdpSession::for_target(mock.clone() as Arc<dyn CdpTransport>, "S1"),
        storage.clone(),
        event_manager,
    );

    Pipeline {
        mock,
        manager,
        storage,
        events,
    }
}

fn event(method: &str, params: Value) -> CdpEvent {
    CdpEvent {
        method: method.to_string(),
        params,
        session_id: Some("S1".to_string()),
    }
}

fn will_be_sent(request_id: &str, url: &str) -> Value {
    json!({
        "requestId": request_id,
        "loaderId": "L1",
        "documentURL": url,
        "request": {"url": url, "method": "GET", "headers": {"accept": "*/*"}},
        "wallTime": 1700000000.0,
        "initiator": {"type": "other"},
        "frameId": "frame-1",
    })
}

async fn next_event(rx: &mut mpsc::UnboundedReceiver<OutgoingMessage>) -> Value {
    tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("event within deadline")
        .expect("pipeline alive")
        .payload
}

/// Scenario 1: a normal fetch emits exactly the three lifecycle events, in
/// order, with redirectCount 0.
#[tokio::test]
async fn normal_fetch() {
    let mut p = pipeline();
    let url = "https://a.test/page";

    p.manager.process_event(event("Network.requestWillBeSent", will_be_sent("R1", url)));
    p.manager.process_event(event(
        "Network.requestWillBeSentExtraInfo",
        json!({"requestId": "R1", "headers": {"accept": "*/*"}}),
    ));
    p.manager.process_event(event(
        "Network.responseReceived",
        json!({
            "requestId": "R1",
            "response": {"url": url, "status": 200, "statusText": "OK",
                         "headers": {}, "mimeType": "text/html"},
            "hasExtraInfo": true,
        }),
    ));
    p.manager.process_event(event(
        "Network.responseReceivedExtraInfo",
        json!({"requestId": "R1", "statusCode": 200, "headers": {}}),
    ));

    let first = next_event(&mut p.events).await;
    assert_eq!(first["method"], "network.beforeRequestSent");
    assert_eq!(first["params"]["redirectCount"], 0);
    assert_eq!(next_event(&mut p.events).await["method"], "network.responseStarted");
    let completed = next_event(&mut p.events).await;
    assert_eq!(completed["method"], "network.responseCompleted");
    assert_eq!(completed["params"]["redirectCount"], 0);
    assert!(p.events.try_recv().is_err());
}

/// Scenario 2: the extra-info pair arriving in reverse order produces the
/// same three events in the same order.
#[tokio::test]
async fn reverse_order_extra_info() {
    let mut p = pipeline();
    let url = "https://a.test/page";

    p.manager.process_event(event("Network.requestWillBeSent", will_be_sent("R1", url)));
    p.manager.process_event(event(
        "Network.requestWillBeSentExtraInfo",
        json!({"requestId": "R1", "headers": {}}),
    ));
    // responseReceivedExtraInfo first.
    p.manager.process_event(event(
        "Network.responseReceivedExtraInfo",
        json!({"requestId": "R1", "statusCode": 200, "headers": {}}),
    ));
    p.manager.process_event(event(
        "Network.responseReceived",
        json!({
            "requestId": "R1",
            "response": {"url": url, "status": 200, "statusText": "OK",
                         "headers": {}, "mimeType": "text/html"},
            "hasExtraInfo": true,
        }),
    ));

    assert_eq!(next_event(&mut p.events).await["method"], "network.beforeRequestSent");
    assert_eq!(next_event(&mut p.events).await["method"], "network.responseStarted");
    assert_eq!(next_event(&mut p.events).await["method"], "network.responseCompleted");
}

/// Scenario 3: a redirect flushes the original request and restarts the id
/// with redirectCount 1.
#[tokio::test]
async fn redirect_chain() {
    let mut p = pipeline();

    p.manager.process_event(event(
        "Network.requestWillBeSent",
        will_be_sent("R", "https://a.test/old"),
    ));
    p.manager.process_event(event(
        "Network.requestWillBeSentExtraInfo",
        json!({"requestId": "R", "headers": {}}),
    ));
    assert_eq!(next_event(&mut p.events).await["method"], "network.beforeRequestSent");

    let mut redirect = will_be_sent("R", "https://a.test/new");
    redirect["redirectResponse"] = json!({
        "url": "https://a.test/old",
        "status": 302,
        "statusText": "Found",
        "headers": {"location": "https://a.test/new"},
    });
    p.manager.process_event(event("Network.requestWillBeSent", redirect));
    p.manager.process_event(event(
        "Network.requestWillBeSentExtraInfo",
        json!({"requestId": "R", "headers": {}}),
    ));

    // Old request flushes.
    assert_eq!(next_event(&mut p.events).await["method"], "network.responseStarted");
    let completed = next_event(&mut p.events).await;
    assert_eq!(completed["method"], "network.responseCompleted");
    assert_eq!(completed["params"]["response"]["status"], 302);

    // New request under the same id.
    let restarted = next_event(&mut p.events).await;
    assert_eq!(restarted["method"], "network.beforeRequestSent");
    assert_eq!(restarted["params"]["redirectCount"], 1);
    assert_eq!(restarted["params"]["request"]["request"], "R");
}

/// Scenario 4: request-phase interception blocks until the pause, emits
/// isBlocked, and continuing unblocks the downstream flow.
#[tokio::test]
async fn intercept_at_request_phase() {
    let mut p = pipeline();
    let url = "https://a.test/page";
    p.storage
        .add_intercept(
            vec!["https://a.test/*".to_string()],
            vec![InterceptPhase::BeforeRequestSent],
        )
        .unwrap();

    p.manager.process_event(event("Network.requestWillBeSent", will_be_sent("R1", url)));
    p.manager.process_event(event(
        "Network.requestWillBeSentExtraInfo",
        json!({"requestId": "R1", "headers": {}}),
    ));
    // Nothing yet: interception is expected.
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(p.events.try_recv().is_err());

    p.manager.process_event(event(
        "Fetch.requestPaused",
        json!({
            "requestId": "FETCH-1",
            "request": {"url": url, "method": "GET", "headers": {}},
            "networkId": "R1",
            "frameId": "frame-1",
        }),
    ));

    let blocked = next_event(&mut p.events).await;
    assert_eq!(blocked["method"], "network.beforeRequestSent");
    assert_eq!(blocked["params"]["isBlocked"], true);
    assert!(blocked["params"]["intercepts"].is_array());

    // Continue clears the block and lets the response flow.
    let request = p.storage.get_request("R1").unwrap();
    request
        .continue_request(Default::default())
        .await
        .unwrap();
    assert!(p
        .mock
        .sent_methods()
        .contains(&"Fetch.continueRequest".to_string()));

    p.manager.process_event(event(
        "Network.responseReceived",
        json!({
            "requestId": "R1",
            "response": {"url": url, "status": 200, "statusText": "OK",
                         "headers": {}, "mimeType": "text/html"},
            "hasExtraInfo": false,
        }),
    ));
    assert_eq!(next_event(&mut p.events).await["method"], "network.responseStarted");
    assert_eq!(next_event(&mut p.events).await["method"], "network.responseCompleted");
}

/// Scenario 5: auth challenges re-emit authRequired per retry; providing
/// credentials issues exactly one Fetch.continueWithAuth per call.
#[tokio::test]
async fn auth_challenge() {
    let mut p = pipeline();
    let url = "https://a.test/private";
    p.storage
        .add_intercept(vec![], vec![InterceptPhase::AuthRequired])
        .unwrap();

    p.manager.process_event(event("Network.requestWillBeSent", will_be_sent("R1", url)));
    p.manager.process_event(event(
        "Network.requestWillBeSentExtraInfo",
        json!({"requestId": "R1", "headers": {}}),
    ));
    assert_eq!(next_event(&mut p.events).await["method"], "network.beforeRequestSent");

    let challenge = json!({
        "requestId": "FETCH-9",
        "request": {"url": url, "method": "GET", "headers": {}},
        "authChallenge": {"origin": "https://a.test", "scheme": "basic", "realm": "secrets"},
    });
    p.manager.process_event(event("Fetch.authRequired", challenge.clone()));
    p.manager.process_event(event("Fetch.authRequired", challenge));

    assert_eq!(next_event(&mut p.events).await["method"], "network.authRequired");
    assert_eq!(next_event(&mut p.events).await["method"], "network.authRequired");

    let request = p.storage.get_request("R1").unwrap();
    request
        .continue_with_auth(bidi_oxide::network::AuthAction::ProvideCredentials(
            bidi_oxide::network::AuthCredentials {
                username: "user".to_string(),
                password: "hunter2".to_string(),
            },
        ))
        .await
        .unwrap();

    let auth_calls: Vec<_> = p
        .mock
        .sent()
        .into_iter()
        .filter(|c| c.method == "Fetch.continueWithAuth")
        .collect();
    assert_eq!(auth_calls.len(), 1);
    assert_eq!(
        auth_calls[0].params["authChallengeResponse"]["response"],
        "ProvideCredentials"
    );
    assert_eq!(auth_calls[0].params["authChallengeResponse"]["username"], "user");
    assert_eq!(auth_calls[0].params["authChallengeResponse"]["password"], "hunter2");
}

/// Scenario 6: unsubscribing one event from a module subscription keeps the
/// rest flowing, and a second identical unsubscribe fails without touching
/// the store.
#[tokio::test]
async fn subscription_splitting() {
    let contexts = Arc::new(BrowsingContextStore::new());
    contexts.add("frame-1", None, "https://a.test/", "S1");
    let (tx, mut events) = mpsc::unbounded_channel();
    let sink: EventSink = Arc::new(move |message| {
        let tx = tx.clone();
        Box::pin(async move {
            let _ = tx.send(message);
        })
    });
    let queue = Arc::new(EventQueue::new(sink));
    let event_manager = Arc::new(EventManager::new(contexts, queue));
    event_manager
        .subscribe(&["network".to_string()], &[], Some("A"))
        .unwrap();
    event_manager
        .unsubscribe(&["network.beforeRequestSent".to_string()], &[], Some("A"))
        .unwrap();

    let mock = Arc::new(MockCdpTransport::new());
    let storage = Arc::new(NetworkStorage::new());
    let manager = NetworkManager::new(
        CdpSession::for_target(mock as Arc<dyn CdpTransport>, "S1"),
        storage,
        event_manager.clone(),
    );

    let url = "https://a.test/page";
    manager.process_event(event("Network.requestWillBeSent", will_be_sent("R1", url)));
    manager.process_event(event(
        "Network.requestWillBeSentExtraInfo",
        json!({"requestId": "R1", "headers": {}}),
    ));
    manager.process_event(event(
        "Network.responseReceived",
        json!({
            "requestId": "R1",
            "response": {"url": url, "status": 200, "statusText": "OK",
                         "headers": {}, "mimeType": "text/html"},
            "hasExtraInfo": false,
        }),
    ));

    // beforeRequestSent is gone; the rest still arrive on channel A.
    let first = next_event(&mut events).await;
    assert_eq!(first["method"], "network.responseStarted");
    assert_eq!(next_event(&mut events).await["method"], "network.responseCompleted");

    // Unsubscribing a no-longer-subscribed event fails and changes nothing.
    let err = event_manager
        .unsubscribe(&["network.beforeRequestSent".to_string()], &[], Some("A"))
        .unwrap_err();
    assert_eq!(err.bidi_code(), "invalid argument");
    assert!(event_manager.is_subscribed_to("network.responseCompleted", None));
}
