//! End-to-end tests for the stream client against a local WebSocket server.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use odx_core::auth::WS_AUTH_PATH;
use odx_core::{Credentials, NewOrder, OdxError, Side, TimeInForce};
use odx_ws::{ConnectionState, Handler, OdxWsClient, WsConnConfig};
use rust_decimal_macros::dec;
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;

const WAIT: Duration = Duration::from_secs(5);

type ServerWs = WebSocketStream<TcpStream>;

/// Accept `connections` sockets in turn, handing each to `handler`.
async fn spawn_server<F, Fut>(connections: usize, handler: F) -> String
where
    F: Fn(usize, ServerWs) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        for n in 0..connections {
            let (stream, _) = listener.accept().await.unwrap();
            let ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            handler(n, ws).await;
        }
    });
    format!("ws://{addr}/v1/ws")
}

async fn next_json(ws: &mut ServerWs) -> Value {
    loop {
        match ws.next().await {
            Some(Ok(Message::Text(text))) => return serde_json::from_str(text.as_str()).unwrap(),
            Some(Ok(_)) => continue,
            other => panic!("server expected a text frame, got {other:?}"),
        }
    }
}

async fn push(ws: &mut ServerWs, frame: &str) {
    ws.send(Message::Text(frame.to_string().into())).await.unwrap();
}

fn recorder() -> (Handler, mpsc::UnboundedReceiver<Value>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handler: Handler = Arc::new(move |m: &Value| {
        let _ = tx.send(m.clone());
    });
    (handler, rx)
}

fn client(url: String, on_message: Handler) -> Arc<OdxWsClient> {
    client_with_credentials(url, None, on_message)
}

fn client_with_credentials(url: String, credentials: Option<Credentials>, on_message: Handler) -> Arc<OdxWsClient> {
    let conn = WsConnConfig { url, max_frame_size: 1 << 28, close_timeout: Duration::from_millis(500) };
    Arc::new(OdxWsClient::with_conn_config(conn, credentials, on_message))
}

fn spawn_run(client: &Arc<OdxWsClient>) -> tokio::task::JoinHandle<Result<(), OdxError>> {
    let c = Arc::clone(client);
    tokio::spawn(async move { c.run().await })
}

async fn recv(rx: &mut mpsc::UnboundedReceiver<Value>) -> Value {
    tokio::time::timeout(WAIT, rx.recv()).await.expect("timed out").expect("handler dropped")
}

#[tokio::test]
async fn l2_push_reaches_subscription_and_generic_handler() {
    let push_frame = r#"{"channel":"l2","params":{"symbol":"BTC-PERP"},"data":[[6500.5,1.2]]}"#;
    let (done_tx, done_rx) = tokio::sync::oneshot::channel::<Value>();
    let done_tx = std::sync::Mutex::new(Some(done_tx));

    let url = spawn_server(1, move |_, mut ws| {
        let done_tx = done_tx.lock().unwrap().take();
        async move {
            let subscribe = next_json(&mut ws).await;
            push(&mut ws, push_frame).await;
            if let Some(tx) = done_tx {
                let _ = tx.send(subscribe);
            }
            while ws.next().await.is_some() {}
        }
    })
    .await;

    let (generic, mut generic_rx) = recorder();
    let (channel, mut channel_rx) = recorder();
    let c = client(url, generic);
    let id = c.subscribe(channel, "l2", [("symbol", "BTC-PERP")]).unwrap();
    let run = spawn_run(&c);

    let subscribe = tokio::time::timeout(WAIT, done_rx).await.unwrap().unwrap();
    assert_eq!(
        subscribe,
        json!({"type": "subscribe", "payload": {"subscriptions": [{"channel": "l2", "params": {"symbol": "BTC-PERP"}}]}})
    );
    assert_eq!(id.get(), 1);

    let expected: Value = serde_json::from_str(push_frame).unwrap();
    assert_eq!(recv(&mut channel_rx).await, expected);
    assert_eq!(recv(&mut generic_rx).await, expected);

    c.shutdown();
    tokio::time::timeout(WAIT, run).await.unwrap().unwrap().unwrap();
    assert_eq!(c.state(), ConnectionState::Disconnected);
    assert!(channel_rx.try_recv().is_err(), "subscription handler called more than once");
}

#[tokio::test]
async fn resubscribe_replaces_handler() {
    let url = spawn_server(1, |_, mut ws| async move {
        next_json(&mut ws).await;
        next_json(&mut ws).await;
        push(&mut ws, r#"{"channel":"ticker","params":{"symbol":"X"},"last":"1"}"#).await;
        while ws.next().await.is_some() {}
    })
    .await;

    let (generic, mut generic_rx) = recorder();
    let (old, mut old_rx) = recorder();
    let (new, mut new_rx) = recorder();
    let c = client(url, generic);
    c.subscribe_ticker(old, "X").unwrap();
    c.subscribe_ticker(new, "X").unwrap();
    let run = spawn_run(&c);

    recv(&mut new_rx).await;
    recv(&mut generic_rx).await;
    assert!(old_rx.try_recv().is_err());

    c.shutdown();
    tokio::time::timeout(WAIT, run).await.unwrap().unwrap().unwrap();
}

#[tokio::test]
async fn frames_leave_in_queue_order() {
    let (frames_tx, mut frames_rx) = mpsc::unbounded_channel::<Value>();
    let url = spawn_server(1, move |_, mut ws| {
        let frames_tx = frames_tx.clone();
        async move {
            for _ in 0..20 {
                let _ = frames_tx.send(next_json(&mut ws).await);
            }
            while ws.next().await.is_some() {}
        }
    })
    .await;

    let c = client(url, Arc::new(|_: &Value| {}));
    // Queued before the connection exists.
    for i in 0..10 {
        c.cancel_all_orders(&format!("S{i}")).unwrap();
    }
    let run = spawn_run(&c);
    for i in 10..20 {
        c.cancel_all_stop_orders(&format!("S{i}")).unwrap();
    }

    for i in 0..20u64 {
        let frame = recv(&mut frames_rx).await;
        assert_eq!(frame["payload"]["cl_req_id"], i + 1);
        assert_eq!(frame["payload"]["symbol"], format!("S{i}"));
    }

    c.shutdown();
    tokio::time::timeout(WAIT, run).await.unwrap().unwrap().unwrap();
}

#[tokio::test]
async fn concurrent_orders_get_distinct_ids() {
    let (frames_tx, mut frames_rx) = mpsc::unbounded_channel::<Value>();
    let url = spawn_server(1, move |_, mut ws| {
        let frames_tx = frames_tx.clone();
        async move {
            for _ in 0..2 {
                let _ = frames_tx.send(next_json(&mut ws).await);
            }
            while ws.next().await.is_some() {}
        }
    })
    .await;

    let c = client(url, Arc::new(|_: &Value| {}));
    let run = spawn_run(&c);

    let place = |cl_ord_id: u64| {
        let c = Arc::clone(&c);
        tokio::spawn(async move {
            let order = NewOrder::limit("BTC-PERP", cl_ord_id, Side::Buy, dec!(6500), dec!(0.1), TimeInForce::Gtc);
            c.new_order(&order).unwrap()
        })
    };
    let (a, b) = tokio::join!(place(100), place(200));
    let (a, b) = (a.unwrap(), b.unwrap());
    assert_ne!(a, b);
    assert_eq!(a.get().min(b.get()), 1);
    assert_eq!(a.get().max(b.get()), 2);

    let mut seen = Vec::new();
    for _ in 0..2 {
        let frame = recv(&mut frames_rx).await;
        assert_eq!(frame["type"], "order_new");
        assert_eq!(frame["payload"]["volume"], "0.1");
        let id = frame["payload"]["cl_req_id"].as_u64().unwrap();
        let cl_ord_id = frame["payload"]["cl_ord_id"].as_str().unwrap().to_string();
        seen.push((id, cl_ord_id));
    }
    seen.sort();
    assert_eq!(seen[0].0, 1);
    assert_eq!(seen[1].0, 2);
    let expected_for_1 = if a.get() == 1 { "100" } else { "200" };
    assert_eq!(seen[0].1, expected_for_1);

    c.shutdown();
    tokio::time::timeout(WAIT, run).await.unwrap().unwrap().unwrap();
}

#[tokio::test]
async fn invalid_orders_never_reach_the_wire() {
    let (frames_tx, mut frames_rx) = mpsc::unbounded_channel::<String>();
    let url = spawn_server(1, move |_, mut ws| {
        let frames_tx = frames_tx.clone();
        async move {
            while let Some(Ok(msg)) = ws.next().await {
                if let Message::Text(text) = msg {
                    let _ = frames_tx.send(text.as_str().to_string());
                }
            }
        }
    })
    .await;

    let c = client(url, Arc::new(|_: &Value| {}));

    let mut limit = NewOrder::limit("BTC-PERP", 1, Side::Buy, dec!(1), dec!(1), TimeInForce::Gtc);
    limit.time_in_force = None;
    assert!(matches!(c.new_order(&limit), Err(OdxError::Validation(_))));

    let mut market = NewOrder::market("BTC-PERP", 2, Side::Sell, dec!(1), dec!(1));
    market.time_in_force = Some(TimeInForce::Fok);
    assert!(matches!(c.new_order(&market), Err(OdxError::Validation(_))));

    let volume: rust_decimal::Decimal = "0.1".parse().unwrap();
    c.new_order(&NewOrder::limit("BTC-PERP", 3, Side::Buy, dec!(1), volume, TimeInForce::Gtc)).unwrap();
    c.new_order(&NewOrder::market("BTC-PERP", 4, Side::Sell, dec!(1), volume)).unwrap();

    let run = spawn_run(&c);
    let first = tokio::time::timeout(WAIT, frames_rx.recv()).await.unwrap().unwrap();
    let second = tokio::time::timeout(WAIT, frames_rx.recv()).await.unwrap().unwrap();
    assert!(first.contains(r#""cl_ord_id":"3""#));
    assert!(first.contains(r#""volume":"0.1""#));
    assert!(second.contains(r#""cl_ord_id":"4""#));

    c.shutdown();
    tokio::time::timeout(WAIT, run).await.unwrap().unwrap().unwrap();
    assert!(frames_rx.try_recv().is_err());
}

#[tokio::test]
async fn unparseable_frame_fails_the_connection() {
    let url = spawn_server(1, |_, mut ws| async move {
        push(&mut ws, "definitely not json").await;
        while ws.next().await.is_some() {}
    })
    .await;

    let c = client(url, Arc::new(|_: &Value| {}));
    let res = tokio::time::timeout(WAIT, c.run()).await.unwrap();
    assert!(matches!(res, Err(OdxError::Parse(_))), "got {res:?}");
    assert_eq!(c.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn remote_close_is_an_error_and_reconnect_works() {
    let url = spawn_server(2, |n, mut ws| async move {
        if n == 0 {
            let _ = ws.close(None).await;
            return;
        }
        let subscribe = next_json(&mut ws).await;
        assert_eq!(subscribe["type"], "subscribe");
        push(&mut ws, r#"{"channel":"balances","params":{},"data":{"BTC":"1"}}"#).await;
        while ws.next().await.is_some() {}
    })
    .await;

    let (generic, _generic_rx) = recorder();
    let (balances, mut balances_rx) = recorder();
    let c = client(url, generic);
    c.subscribe_balances(balances.clone()).unwrap();

    // First connection: the server hangs up straight away.
    let res = tokio::time::timeout(WAIT, c.run()).await.unwrap();
    assert!(matches!(res, Err(OdxError::WebSocket(_))), "got {res:?}");
    assert_eq!(c.registry().len(), 1);

    // Re-subscribing after reconnect is up to the caller.
    c.subscribe_balances(balances).unwrap();
    let run = spawn_run(&c);
    let msg = recv(&mut balances_rx).await;
    assert_eq!(msg["data"]["BTC"], "1");

    c.shutdown();
    tokio::time::timeout(WAIT, run).await.unwrap().unwrap().unwrap();
}

#[tokio::test]
async fn run_can_be_retried_right_after_a_failure() {
    let url = spawn_server(2, |_, mut ws| async move {
        let _ = ws.close(None).await;
    })
    .await;

    let c = client(url, Arc::new(|_: &Value| {}));
    let first = tokio::time::timeout(WAIT, c.run()).await.unwrap();
    assert!(matches!(first, Err(OdxError::WebSocket(_))), "got {first:?}");

    // No yield in between: the queue must already be released.
    let second = tokio::time::timeout(WAIT, c.run()).await.unwrap();
    assert!(matches!(second, Err(OdxError::WebSocket(_))), "got {second:?}");
    assert_eq!(c.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn shutdown_right_after_spawning_run_is_honoured() {
    let url = spawn_server(2, |_, mut ws| async move { while ws.next().await.is_some() {} }).await;
    let c = client(url, Arc::new(|_: &Value| {}));

    let run = spawn_run(&c);
    c.shutdown();
    tokio::time::timeout(WAIT, run).await.unwrap().unwrap().unwrap();
    assert_eq!(c.state(), ConnectionState::Disconnected);

    // The request was consumed; the next run connects normally.
    let mut state = c.watch_state();
    let run = spawn_run(&c);
    tokio::time::timeout(WAIT, state.wait_for(|s| *s == ConnectionState::Connected)).await.unwrap().unwrap();
    c.shutdown();
    tokio::time::timeout(WAIT, run).await.unwrap().unwrap().unwrap();
}

#[tokio::test]
async fn auth_unsubscribe_and_deauth_frames() {
    let (frames_tx, mut frames_rx) = mpsc::unbounded_channel::<Value>();
    let url = spawn_server(1, move |_, mut ws| {
        let frames_tx = frames_tx.clone();
        async move {
            for _ in 0..4 {
                let _ = frames_tx.send(next_json(&mut ws).await);
            }
            while ws.next().await.is_some() {}
        }
    })
    .await;

    let creds = Credentials::new("key", "secret");
    let c = client_with_credentials(url, Some(creds.clone()), Arc::new(|_: &Value| {}));
    c.auth().unwrap();
    c.subscribe_l2(Arc::new(|_: &Value| {}), "BTC-PERP").unwrap();
    c.unsubscribe("l2", [("symbol", "BTC-PERP")]).unwrap();
    c.deauth().unwrap();
    let run = spawn_run(&c);

    let auth = recv(&mut frames_rx).await;
    assert_eq!(auth["type"], "auth");
    assert_eq!(auth["payload"]["api_key"], "key");
    let timestamp = auth["payload"]["timestamp"].as_str().expect("timestamp is a string");
    assert!(!timestamp.is_empty() && timestamp.bytes().all(|b| b.is_ascii_digit()), "{timestamp}");
    assert_eq!(auth["payload"]["signature"], creds.sign(WS_AUTH_PATH, timestamp));
    assert!(auth["payload"].get("cl_req_id").is_none());

    let subscribe = recv(&mut frames_rx).await;
    assert_eq!(subscribe["type"], "subscribe");

    let unsubscribe = recv(&mut frames_rx).await;
    assert_eq!(
        unsubscribe,
        json!({"type": "unsubscribe", "payload": {"subscriptions": [{"channel": "l2", "params": {"symbol": "BTC-PERP"}}]}})
    );
    assert_eq!(recv(&mut frames_rx).await, json!({"type": "deauth"}));
    assert!(c.registry().is_empty());

    c.shutdown();
    tokio::time::timeout(WAIT, run).await.unwrap().unwrap().unwrap();
}

#[tokio::test]
async fn shutdown_with_idle_queue_and_blocked_read() {
    let (closed_tx, closed_rx) = tokio::sync::oneshot::channel::<bool>();
    let closed_tx = std::sync::Mutex::new(Some(closed_tx));
    let url = spawn_server(1, move |_, mut ws| {
        let closed_tx = closed_tx.lock().unwrap().take();
        async move {
            let mut saw_close = false;
            while let Some(Ok(msg)) = ws.next().await {
                if msg.is_close() {
                    saw_close = true;
                }
            }
            if let Some(tx) = closed_tx {
                let _ = tx.send(saw_close);
            }
        }
    })
    .await;

    let c = client(url, Arc::new(|_: &Value| {}));
    let mut state = c.watch_state();
    let run = spawn_run(&c);
    tokio::time::timeout(WAIT, state.wait_for(|s| *s == ConnectionState::Connected)).await.unwrap().unwrap();

    c.shutdown();
    tokio::time::timeout(WAIT, run).await.unwrap().unwrap().unwrap();
    assert!(tokio::time::timeout(WAIT, closed_rx).await.unwrap().unwrap());
    assert_eq!(c.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn second_run_is_rejected_while_connected() {
    let url = spawn_server(1, |_, mut ws| async move { while ws.next().await.is_some() {} }).await;
    let c = client(url, Arc::new(|_: &Value| {}));
    let mut state = c.watch_state();
    let run = spawn_run(&c);
    tokio::time::timeout(WAIT, state.wait_for(|s| *s == ConnectionState::Connected)).await.unwrap().unwrap();

    assert!(matches!(c.run().await, Err(OdxError::AlreadyRunning)));

    c.shutdown();
    tokio::time::timeout(WAIT, run).await.unwrap().unwrap().unwrap();
}

#[tokio::test]
async fn connect_failure_is_reported() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let c = client(format!("ws://{addr}/v1/ws"), Arc::new(|_: &Value| {}));
    let res = tokio::time::timeout(WAIT, c.run()).await.unwrap();
    assert!(matches!(res, Err(OdxError::WebSocket(_))), "got {res:?}");
    assert_eq!(c.state(), ConnectionState::Disconnected);
}
