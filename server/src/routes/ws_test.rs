use super::*;
use crate::state::test_helpers;
use frames::{FrameType, ModuleInfo, RoutingFrame, ServiceInfo};
use futures::{SinkExt, StreamExt};
use std::collections::HashMap;
use tokio::net::TcpStream;
use tokio::time::{Duration, sleep, timeout};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn spawn_server(state: AppState) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind should succeed");
    let addr = listener.local_addr().expect("local addr");
    let app = crate::routes::app(state);
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    format!("ws://{addr}/rocky/ws")
}

fn connect_frame(instance_id: &str, modules: &[&str]) -> WsMessage {
    let info = ServiceInfo {
        namespace: "ns1".into(),
        profile: "prod".into(),
        instance_id: instance_id.into(),
        ip: "127.0.0.1".into(),
        port: 9001,
        access_key: String::new(),
        modules: modules.iter().map(|m| (*m).to_owned()).collect(),
        msg: HashMap::new(),
    };
    WsMessage::Binary(frames::encode_frame(&RoutingFrame::of(FrameType::Connect, &info)).into())
}

async fn recv_routing(ws: &mut Client) -> RoutingFrame {
    loop {
        let msg = timeout(Duration::from_millis(500), ws.next())
            .await
            .expect("ws receive timed out")
            .expect("ws stream ended")
            .expect("ws error");
        if let WsMessage::Binary(bytes) = msg {
            return frames::decode_frame(&bytes).expect("frame should decode");
        }
    }
}

/// Poll until the registry lists `expected` instances for `orders`.
async fn wait_for_instances(state: &AppState, expected: usize) {
    for _ in 0..50 {
        let change = state.registry.module_snapshot("ns1", "orders").await.unwrap();
        if change.instances.len() == expected {
            return;
        }
        sleep(Duration::from_millis(20)).await;
    }
    panic!("registry never reached {expected} instances");
}

#[tokio::test]
async fn connect_over_websocket_receives_own_module_and_close_prunes_it() {
    let (state, _store) = test_helpers::test_app_state_watched(&[]).await;
    let url = spawn_server(state.clone()).await;

    let (mut ws, _) = connect_async(url.as_str()).await.expect("ws connect should succeed");
    ws.send(connect_frame("i1", &["orders"])).await.unwrap();

    let frame = recv_routing(&mut ws).await;
    assert_eq!(frame.kind(), Some(FrameType::ChangeService));
    let info: ModuleInfo = frame.payload_as().unwrap();
    assert_eq!(info.module_name, "orders");
    wait_for_instances(&state, 1).await;

    ws.close(None).await.unwrap();
    wait_for_instances(&state, 0).await;
    for _ in 0..50 {
        if state.hub.session_count("ns1").await == 0 {
            return;
        }
        sleep(Duration::from_millis(20)).await;
    }
    panic!("hub still holds the closed session");
}

#[tokio::test]
async fn second_socket_sees_first_instance_appear() {
    let (state, _store) = test_helpers::test_app_state_watched(&[]).await;
    let url = spawn_server(state.clone()).await;

    let (mut consumer, _) = connect_async(url.as_str()).await.unwrap();
    consumer.send(connect_frame("c1", &[])).await.unwrap();
    for _ in 0..50 {
        if state.hub.session_count("ns1").await == 1 {
            break;
        }
        sleep(Duration::from_millis(20)).await;
    }

    let (mut producer, _) = connect_async(url.as_str()).await.unwrap();
    producer.send(connect_frame("i1", &["orders"])).await.unwrap();

    // Intermediate snapshots may still be empty; wait for the one carrying i1.
    loop {
        let info: ModuleInfo = recv_routing(&mut consumer).await.payload_as().unwrap();
        assert_eq!(info.module_name, "orders");
        if let Some(instance) = info.instances.first() {
            assert_eq!(instance.instance_id, "i1");
            break;
        }
    }
}

#[tokio::test]
async fn text_messages_are_ignored() {
    let (state, _store) = test_helpers::test_app_state(&[]).await;
    let url = spawn_server(state.clone()).await;

    let (mut ws, _) = connect_async(url.as_str()).await.unwrap();
    ws.send(WsMessage::Text("hello".into())).await.unwrap();
    ws.send(connect_frame("i1", &[])).await.unwrap();

    for _ in 0..50 {
        if state.hub.session_count("ns1").await == 1 {
            return;
        }
        sleep(Duration::from_millis(20)).await;
    }
    panic!("connect after a text message was not handled");
}
