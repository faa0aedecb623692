use chrono::{Duration as ChronoDuration, Utc};
use futures::{SinkExt, StreamExt};
use rusqlite::Connection;
use scribe_core::{DocumentSnapshot, DocumentStore, MemoryDocumentStore};
use scribe_sync_server::config::Config;
use scribe_sync_server::db::{AuthRepo, init_database};
use scribe_sync_server::handlers::build_router;
use scribe_sync_server::sync::{SyncSettings, SyncState};
use serde_json::{Value, json};
use std::collections::BTreeSet;
use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

const ALICE: &str = "alice@example.com";
const BOB: &str = "bob@example.com";
const MALLORY: &str = "mallory@example.com";

struct TestServer {
    addr: SocketAddr,
    sync: SyncState,
    store: MemoryDocumentStore,
    repo: Arc<AuthRepo>,
}

impl TestServer {
    async fn start() -> Self {
        let store = MemoryDocumentStore::new();
        store
            .seed(DocumentSnapshot {
                id: "D1".to_string(),
                author: ALICE.to_string(),
                title: "Shared notes".to_string(),
                read_access: BTreeSet::from([ALICE.to_string()]),
                write_access: BTreeSet::from([ALICE.to_string(), BOB.to_string()]),
                data: json!({"ops": []}),
            })
            .unwrap();

        let conn = Connection::open_in_memory().unwrap();
        init_database(&conn).unwrap();
        let repo = Arc::new(AuthRepo::new(conn));

        let config = Arc::new(Config {
            host: "127.0.0.1".to_string(),
            port: 0,
            database_path: PathBuf::from(":memory:"),
            session_expiry_hours: 1,
            flush_interval_secs: 3600,
            outbox_capacity: 16,
            cors_origins: Vec::new(),
        });

        let sync = SyncState::new(
            Arc::new(store.clone()),
            SyncSettings {
                flush_interval: Duration::from_secs(3600),
                outbox_capacity: 16,
            },
        );
        let app = build_router(config, repo.clone(), Arc::new(store.clone()), sync.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            addr,
            sync,
            store,
            repo,
        }
    }

    fn token_for(&self, email: &str) -> String {
        let user_id = match self.repo.get_user_by_email(email).unwrap() {
            Some(user) => user.id,
            None => self.repo.create_user(email, "Test User", "unused").unwrap(),
        };
        self.repo
            .create_session(&user_id, Utc::now() + ChronoDuration::hours(1))
            .unwrap()
    }

    async fn connect(
        &self,
        document_id: &str,
        token: Option<&str>,
    ) -> Result<Client, tungstenite::Error> {
        let mut url = format!(
            "ws://{}/documents/handler?document_id={}",
            self.addr, document_id
        );
        if let Some(token) = token {
            url.push_str(&format!("&token={}", token));
        }
        connect_async(url.as_str()).await.map(|(client, _)| client)
    }

    async fn join(&self, document_id: &str, email: &str) -> Client {
        let token = self.token_for(email);
        self.connect(document_id, Some(&token)).await.unwrap()
    }
}

async fn eventually<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..100 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("timed out waiting for {}", what);
}

async fn next_text(client: &mut Client) -> Value {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(2), client.next())
            .await
            .expect("no message within timeout")
            .expect("stream ended")
            .expect("websocket error");
        if let Message::Text(text) = msg {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

fn status_of(err: tungstenite::Error) -> u16 {
    match err {
        tungstenite::Error::Http(response) => response.status().as_u16(),
        other => panic!("expected an HTTP rejection, got {}", other),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn two_editors_share_changes_and_last_leaver_flushes() {
    let server = TestServer::start().await;

    let mut a = server.join("D1", ALICE).await;
    let mut b = server.join("D1", BOB).await;
    let sync = server.sync.clone();
    eventually("both editors to join", || {
        let sync = sync.clone();
        async move { sync.rooms.connection_count() == 2 }
    })
    .await;

    let edit = json!({
        "data": {"ops": [{"insert": "x"}]},
        "Change": {"op": "insert", "pos": 0, "text": "x"}
    });
    a.send(Message::text(edit.to_string())).await.unwrap();

    let change = next_text(&mut b).await;
    assert_eq!(change, json!({"op": "insert", "pos": 0, "text": "x"}));

    // No echo back to the sender
    assert!(
        tokio::time::timeout(Duration::from_millis(200), a.next())
            .await
            .is_err()
    );

    a.close(None).await.unwrap();
    eventually("A to leave", || {
        let sync = sync.clone();
        async move { sync.rooms.members("D1").await.len() == 1 }
    })
    .await;
    assert!(sync.rooms.contains_room("D1"));
    assert!(sync.snapshots.contains("D1").await);

    b.close(None).await.unwrap();
    eventually("the room to be torn down", || {
        let sync = sync.clone();
        async move { !sync.rooms.contains_room("D1") && !sync.snapshots.contains("D1").await }
    })
    .await;

    let persisted = server.store.find_one("D1").unwrap().unwrap();
    assert_eq!(persisted.data, json!({"ops": [{"insert": "x"}]}));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn refused_sessions_get_http_errors() {
    let server = TestServer::start().await;

    let missing_token = server.connect("D1", None).await.unwrap_err();
    assert_eq!(status_of(missing_token), 401);

    let token = server.token_for(ALICE);
    let not_found = server.connect("nope", Some(&token)).await.unwrap_err();
    assert_eq!(status_of(not_found), 404);

    let stranger = server.token_for(MALLORY);
    let forbidden = server.connect("D1", Some(&stranger)).await.unwrap_err();
    assert_eq!(status_of(forbidden), 403);

    assert_eq!(server.sync.rooms.room_count(), 0);
    assert!(server.sync.snapshots.is_empty().await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn malformed_messages_do_not_end_the_session() {
    let server = TestServer::start().await;

    let mut a = server.join("D1", ALICE).await;
    let mut b = server.join("D1", BOB).await;
    let sync = server.sync.clone();
    eventually("both editors to join", || {
        let sync = sync.clone();
        async move { sync.rooms.connection_count() == 2 }
    })
    .await;

    a.send(Message::text("not json".to_string())).await.unwrap();
    a.send(Message::text(
        json!({"data": {"ops": ["y"]}, "Change": {"seq": 1}}).to_string(),
    ))
    .await
    .unwrap();

    assert_eq!(next_text(&mut b).await, json!({"seq": 1}));
    assert_eq!(sync.rooms.connection_count(), 2);
}
