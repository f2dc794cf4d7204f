//! End-to-end chat flow over a real listener: HTTP auth, then sockets.

use std::sync::Arc;
use std::time::Duration;

use argon2::Params;
use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Method, Request, StatusCode, header};
use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tempfile::TempDir;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use concord_api::password::PasswordHasher;
use concord_api::router::build_router;
use concord_api::state::{AppState, AppStateInner};
use concord_api::tokens::TokenService;
use concord_db::Database;
use concord_store::MemoryStore;

const TEST_SECRET: &str = "concord_test_secret_that_is_definitely_long_enough";

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct Harness {
    state: AppState,
    router: Router,
    addr: std::net::SocketAddr,
    shutdown: CancellationToken,
    _dir: TempDir,
}

impl Harness {
    async fn start() -> Self {
        let dir = TempDir::new().unwrap();
        let db = Arc::new(Database::open(&dir.path().join("concord.db")).unwrap());
        let store = Arc::new(MemoryStore::new());
        let shutdown = CancellationToken::new();
        let state = AppStateInner::new(
            db,
            store.clone(),
            store,
            TokenService::new(TEST_SECRET).unwrap(),
            PasswordHasher::new(Params::MIN_M_COST, 1).unwrap(),
            shutdown.clone(),
        );
        let router = build_router(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let serve_router = router.clone();
        let serve_shutdown = shutdown.clone();
        tokio::spawn(async move {
            axum::serve(listener, serve_router)
                .with_graceful_shutdown(async move { serve_shutdown.cancelled().await })
                .await
                .unwrap();
        });

        Self {
            state,
            router,
            addr,
            shutdown,
            _dir: dir,
        }
    }

    async fn http(&self, method: Method, uri: &str, token: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let body = match body {
            Some(json) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };

        let response = self.router.clone().oneshot(builder.body(body).unwrap()).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    /// Registers and logs in, returning the access token.
    async fn sign_in(&self, username: &str, password: &str) -> String {
        let creds = json!({ "username": username, "password": password });
        let (status, _) = self.http(Method::POST, "/register", None, Some(creds.clone())).await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, tokens) = self.http(Method::POST, "/login", None, Some(creds)).await;
        assert_eq!(status, StatusCode::OK);
        assert!(tokens["refresh_token"].is_string());
        tokens["access_token"].as_str().unwrap().to_string()
    }

    /// Creates a server owned by the caller and channels in it until
    /// `target` exists.
    async fn provision_channel(&self, token: &str, target: i64) -> i64 {
        let (status, server) = self
            .http(Method::POST, "/api/servers", Some(token), Some(json!({ "name": "home" })))
            .await;
        assert_eq!(status, StatusCode::CREATED);
        let server_id = server["id"].as_i64().unwrap();

        loop {
            let (status, channel) = self
                .http(
                    Method::POST,
                    "/api/channels",
                    Some(token),
                    Some(json!({ "name": "room", "server_id": server_id })),
                )
                .await;
            assert_eq!(status, StatusCode::CREATED);
            let id = channel["id"].as_i64().unwrap();
            if id >= target {
                assert_eq!(id, target);
                return server_id;
            }
        }
    }

    async fn connect(&self, token: &str, channel_id: i64) -> Socket {
        let url = format!("ws://{}/api/ws?channel_id={}", self.addr, channel_id);
        let mut request = url.into_client_request().unwrap();
        request
            .headers_mut()
            .insert(header::AUTHORIZATION, format!("Bearer {token}").parse().unwrap());

        let (socket, _) = connect_async(request).await.unwrap();
        socket
    }

    async fn wait_for_connections(&self, channel_id: i64, expected: usize) {
        timeout(Duration::from_secs(5), async {
            while self.state.relay.registry().connection_count(channel_id).await != expected {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("connections did not settle");
    }
}

async fn next_chat_frame(socket: &mut Socket) -> Value {
    loop {
        let frame = timeout(Duration::from_secs(5), socket.next())
            .await
            .expect("no frame within 5s")
            .expect("socket closed")
            .expect("socket error");
        if let Message::Text(text) = frame {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

#[tokio::test]
async fn alice_chats_on_channel_seven() {
    let harness = Harness::start().await;
    let token = harness.sign_in("alice", "pw1").await;
    harness.provision_channel(&token, 7).await;

    let mut a = harness.connect(&token, 7).await;
    let mut b = harness.connect(&token, 7).await;
    harness.wait_for_connections(7, 2).await;

    a.send(Message::text(r#"{"content":"hi"}"#)).await.unwrap();

    for socket in [&mut a, &mut b] {
        let frame = next_chat_frame(socket).await;
        assert_eq!(frame["content"], "hi");
        assert_eq!(frame["username"], "alice");
        assert_eq!(frame["channel_id"], 7);
        let created_at = frame["created_at"].as_str().unwrap();
        assert!(chrono::DateTime::parse_from_rfc3339(created_at).is_ok());
    }

    let (status, history) = harness
        .http(Method::GET, "/api/channels/7/messages", Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(history.as_array().unwrap().len(), 1);

    // empty content is neither stored nor echoed
    a.send(Message::text(r#"{"content":""}"#)).await.unwrap();
    a.send(Message::text(r#"{"content":"second"}"#)).await.unwrap();
    assert_eq!(next_chat_frame(&mut b).await["content"], "second");

    a.close(None).await.unwrap();
    b.close(None).await.unwrap();
    harness.wait_for_connections(7, 0).await;
    assert!(!harness.state.relay.registry().is_active(7).await);

    harness.shutdown.cancel();
}

#[tokio::test]
async fn upgrade_without_token_is_unauthorized() {
    let harness = Harness::start().await;
    let url = format!("ws://{}/api/ws?channel_id=1", harness.addr);

    match connect_async(url).await {
        Err(tungstenite::Error::Http(response)) => assert_eq!(response.status(), StatusCode::UNAUTHORIZED),
        Err(e) => panic!("expected HTTP 401, got {e}"),
        Ok(_) => panic!("upgrade without a token succeeded"),
    }

    harness.shutdown.cancel();
}

#[tokio::test]
async fn upgrade_by_non_member_is_forbidden() {
    let harness = Harness::start().await;
    let alice = harness.sign_in("alice", "pw1").await;
    let mallory = harness.sign_in("mallory", "pw2").await;
    harness.provision_channel(&alice, 1).await;

    let url = format!("ws://{}/api/ws?channel_id=1&token={}", harness.addr, mallory);
    match connect_async(url).await {
        Err(tungstenite::Error::Http(response)) => assert_eq!(response.status(), StatusCode::FORBIDDEN),
        Err(e) => panic!("expected HTTP 403, got {e}"),
        Ok(_) => panic!("upgrade by a non-member succeeded"),
    }

    harness.shutdown.cancel();
}

#[tokio::test]
async fn server_shutdown_releases_every_socket() {
    let harness = Harness::start().await;
    let token = harness.sign_in("alice", "pw1").await;
    harness.provision_channel(&token, 1).await;

    let _socket = harness.connect(&token, 1).await;
    harness.wait_for_connections(1, 1).await;

    harness.shutdown.cancel();
    harness.wait_for_connections(1, 0).await;
    assert_eq!(harness.state.relay.registry().active_channels().await, 0);
}
