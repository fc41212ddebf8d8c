use super::*;
use std::sync::atomic::AtomicUsize;
use std::sync::Mutex as StdMutex;

/// Records every frame and answers calls by echoing the payload.
#[derive(Default)]
struct EchoSession {
    sent: StdMutex<Vec<PeerFrame>>,
}

#[async_trait::async_trait]
impl PeerSession for EchoSession {
    async fn send(&self, frame: PeerFrame) -> Result<(), ClientError> {
        self.sent.lock().unwrap().push(frame);
        Ok(())
    }

    async fn call(&self, frame: PeerFrame) -> Result<Vec<u8>, ClientError> {
        let payload = frame.payload.clone();
        self.sent.lock().unwrap().push(frame);
        Ok(payload)
    }

    async fn open_stream(&self, frame: PeerFrame) -> Result<PeerStream, ClientError> {
        let (tx, rx) = tokio::sync::mpsc::channel(4);
        tx.send(Ok(frame.payload.clone())).await.unwrap();
        self.sent.lock().unwrap().push(frame);
        Ok(rx)
    }

    async fn close(&self) {}
}

#[derive(Default)]
struct CountingConnector {
    dials: AtomicUsize,
    session: Arc<EchoSession>,
}

#[async_trait::async_trait]
impl Connector for CountingConnector {
    async fn connect(&self, _instance: &InstanceInfo, _module: &str) -> Result<Arc<dyn PeerSession>, ClientError> {
        self.dials.fetch_add(1, Ordering::SeqCst);
        Ok(self.session.clone())
    }
}

fn instance(id: &str, port: i32, active: bool) -> InstanceInfo {
    InstanceInfo { profile: "prod".into(), instance_id: id.into(), ip: "127.0.0.1".into(), port, active }
}

fn modify(module: &str, instances: Vec<InstanceInfo>) -> ModuleInfo {
    ModuleInfo { namespace: "ns1".into(), module_name: module.into(), ops_type: OpsType::Modify as i32, instances }
}

fn delete(module: &str) -> ModuleInfo {
    ModuleInfo { namespace: "ns1".into(), module_name: module.into(), ops_type: OpsType::Delete as i32, instances: vec![] }
}

fn directory(own_id: &str) -> ModuleDirectory {
    ModuleDirectory::new("orders", xxh3_64(own_id.as_bytes()), Arc::new(CountingConnector::default()))
}

#[tokio::test]
async fn selection_is_sticky_for_an_unchanged_active_set() {
    for own in ["c1", "c2", "consumer-7", "9f1c"] {
        let dir = directory(own);
        dir.update(&[instance("i1", 9001, true), instance("i2", 9002, true), instance("i3", 9003, true)]).await;

        let first = dir.select().await.unwrap().info().await.instance_id;
        for _ in 0..10 {
            assert_eq!(dir.select().await.unwrap().info().await.instance_id, first);
        }

        // A fresh directory with the same consumer id lands on the same instance.
        let again = directory(own);
        again.update(&[instance("i3", 9003, true), instance("i1", 9001, true), instance("i2", 9002, true)]).await;
        assert_eq!(again.select().await.unwrap().info().await.instance_id, first);
    }
}

#[tokio::test]
async fn selection_follows_the_hash_index() {
    let own = "c1";
    let dir = directory(own);
    dir.update(&[instance("i1", 9001, true), instance("i2", 9002, true)]).await;

    let expected = ["i1", "i2"][usize::try_from(xxh3_64(own.as_bytes()) % 2).unwrap()];
    assert_eq!(dir.select().await.unwrap().info().await.instance_id, expected);
}

#[tokio::test]
async fn empty_active_set_is_service_unavailable() {
    let dir = directory("c1");
    assert!(matches!(dir.select().await, Err(ClientError::ServiceUnavailable(m)) if m == "orders"));

    dir.update(&[instance("i1", 9001, false)]).await;
    assert!(matches!(dir.select().await, Err(ClientError::ServiceUnavailable(_))));
}

#[tokio::test]
async fn deactivated_selection_moves_to_survivor() {
    let dir = directory("c1");
    dir.update(&[instance("i1", 9001, true), instance("i2", 9002, true)]).await;
    let first = dir.select().await.unwrap().info().await.instance_id;
    let other = if first == "i1" { "i2" } else { "i1" };

    let updated: Vec<_> =
        [("i1", 9001), ("i2", 9002)].iter().map(|(id, port)| instance(id, *port, *id != first)).collect();
    dir.update(&updated).await;

    assert_eq!(dir.select().await.unwrap().info().await.instance_id, other);
}

#[tokio::test]
async fn absent_instances_are_kept_but_marked_inactive() {
    let dir = directory("c1");
    dir.update(&[instance("i1", 9001, true), instance("i2", 9002, true)]).await;
    dir.update(&[instance("i2", 9002, true)]).await;

    let listed = dir.instances().await;
    assert_eq!(listed.len(), 2);
    let i1 = listed.iter().find(|i| i.instance_id == "i1").unwrap();
    assert!(!i1.active);
    assert_eq!(dir.select().await.unwrap().info().await.instance_id, "i2");

    // Reappearing as active revives the same entry.
    dir.update(&[instance("i1", 9001, true), instance("i2", 9002, true)]).await;
    assert!(dir.instances().await.iter().all(|i| i.active));
}

#[tokio::test]
async fn modules_apply_creates_and_deletes_directories() {
    let modules = Modules::new("c1", Arc::new(CountingConnector::default()));
    assert!(matches!(modules.module("orders").await, Err(ClientError::UnknownModule(m)) if m == "orders"));

    modules.apply(&modify("orders", vec![instance("i1", 9001, true)])).await;
    assert_eq!(modules.use_module("orders").await.unwrap().info().await.instance_id, "i1");
    assert_eq!(modules.topology().await.keys().collect::<Vec<_>>(), vec!["orders"]);

    modules.apply(&delete("orders")).await;
    assert!(matches!(modules.use_module("orders").await, Err(ClientError::UnknownModule(_))));

    // Delete of a module never seen is a no-op.
    modules.apply(&delete("billing")).await;
    assert!(modules.topology().await.is_empty());
}

#[tokio::test]
async fn session_is_dialed_lazily_and_once() {
    let connector = Arc::new(CountingConnector::default());
    let modules = Modules::new("c1", connector.clone());
    modules.apply(&modify("orders", vec![instance("i1", 9001, true)])).await;
    assert_eq!(connector.dials.load(Ordering::SeqCst), 0);

    let client = modules.use_module("orders").await.unwrap();
    let reply = client.request(4).unwrap().payload(b"hello".to_vec()).send().await.unwrap();
    assert_eq!(reply, b"hello".to_vec());
    client.forget(5).unwrap().send().await.unwrap();
    assert_eq!(connector.dials.load(Ordering::SeqCst), 1);

    let sent = connector.session.sent.lock().unwrap();
    assert_eq!(sent[0].peer_kind(), Some(PeerKind::Request));
    assert_eq!(sent[1].peer_kind(), Some(PeerKind::Forget));
    assert_eq!(sent[1].command, 5);
}

#[tokio::test]
async fn concurrent_first_use_dials_once() {
    let connector = Arc::new(CountingConnector::default());
    let dir = Arc::new(ModuleDirectory::new("orders", 0, connector.clone()));
    dir.update(&[instance("i1", 9001, true)]).await;
    let client = dir.select().await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let client = client.clone();
        handles.push(tokio::spawn(async move { client.session().await.map(|_| ()) }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }
    assert_eq!(connector.dials.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn command_factories_require_an_active_instance() {
    let dir = directory("c1");
    dir.update(&[instance("i1", 9001, true)]).await;
    let client = dir.select().await.unwrap();

    dir.update(&[instance("i1", 9001, false)]).await;
    assert!(matches!(client.request(1), Err(ClientError::ServiceUnavailable(_))));
    assert!(matches!(client.forget(1), Err(ClientError::ServiceUnavailable(_))));
    assert!(matches!(client.stream(1), Err(ClientError::ServiceUnavailable(_))));
    assert!(matches!(client.error(1, 500), Err(ClientError::ServiceUnavailable(_))));
}

#[tokio::test]
async fn stream_and_error_commands_use_their_frame_kinds() {
    let connector = Arc::new(CountingConnector::default());
    let dir = ModuleDirectory::new("orders", 0, connector.clone());
    dir.update(&[instance("i1", 9001, true)]).await;
    let client = dir.select().await.unwrap();

    let mut stream = client.stream(9).unwrap().payload(b"q".to_vec()).open().await.unwrap();
    assert_eq!(stream.recv().await.unwrap().unwrap(), b"q".to_vec());
    client.error(9, 422).unwrap().message("bad input").send().await.unwrap();

    let sent = connector.session.sent.lock().unwrap();
    assert_eq!(sent[0].peer_kind(), Some(PeerKind::StreamRequest));
    assert_eq!(sent[1].peer_kind(), Some(PeerKind::Error));
    assert_eq!(sent[1].code, 422);
    assert_eq!(sent[1].payload, b"bad input".to_vec());
}
