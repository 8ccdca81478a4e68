#![allow(dead_code)]

use chathub::api::{build_router, AppState};
use chathub::config::Config;
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use std::net::{SocketAddr, TcpListener};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage, MaybeTlsStream, WebSocketStream};

pub type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct TestServer {
    pub addr: SocketAddr,
    pub state: AppState,
    pub client: reqwest::Client,
    server: JoinHandle<()>,
    _tmp: tempfile::TempDir,
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.server.abort();
    }
}

pub async fn spawn_server() -> TestServer {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    listener.set_nonblocking(true).unwrap();

    let tmp = tempfile::tempdir().unwrap();
    let config = Config {
        bind: addr.to_string(),
        data_dir: tmp.path().to_path_buf(),
        jwt_secret: Some("integration-secret".into()),
        ..Default::default()
    };
    let state = AppState::new(config).await.unwrap();
    let app = build_router(state.clone());
    let server = tokio::spawn(async move {
        axum::Server::from_tcp(listener)
            .unwrap()
            .serve(app.into_make_service())
            .await
            .unwrap();
    });
    TestServer {
        addr,
        state,
        client: reqwest::Client::new(),
        server,
        _tmp: tmp,
    }
}

pub struct TestUser {
    pub id: String,
    pub token: String,
}

impl TestServer {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub async fn register(&self, name: &str) -> TestUser {
        let resp = self
            .client
            .post(self.url("/api/auth/register"))
            .json(&serde_json::json!({
                "name": name,
                "email": format!("{}@example.com", name.to_lowercase()),
                "password": "correct horse",
            }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::CREATED);
        let body: Value = resp.json().await.unwrap();
        TestUser {
            id: body["user"]["id"].as_str().unwrap().to_string(),
            token: body["token"].as_str().unwrap().to_string(),
        }
    }

    pub async fn get(&self, user: &TestUser, path: &str) -> (reqwest::StatusCode, Value) {
        let resp = self
            .client
            .get(self.url(path))
            .bearer_auth(&user.token)
            .send()
            .await
            .unwrap();
        let status = resp.status();
        (status, resp.json().await.unwrap_or(Value::Null))
    }

    pub async fn post(&self, user: &TestUser, path: &str, body: Value) -> (reqwest::StatusCode, Value) {
        let resp = self
            .client
            .post(self.url(path))
            .bearer_auth(&user.token)
            .json(&body)
            .send()
            .await
            .unwrap();
        let status = resp.status();
        (status, resp.json().await.unwrap_or(Value::Null))
    }

    pub async fn delete(&self, user: &TestUser, path: &str) -> (reqwest::StatusCode, Value) {
        let resp = self
            .client
            .delete(self.url(path))
            .bearer_auth(&user.token)
            .send()
            .await
            .unwrap();
        let status = resp.status();
        (status, resp.json().await.unwrap_or(Value::Null))
    }

    /// Open a session and wait until the server reports it active.
    pub async fn connect(&self, user: &TestUser) -> Ws {
        let mut req = format!("ws://{}/ws", self.addr).into_client_request().unwrap();
        req.headers_mut().append(
            "Authorization",
            format!("Bearer {}", user.token).parse().unwrap(),
        );
        let (mut ws, _) = connect_async(req).await.unwrap();
        wait_for(&mut ws, "connected").await;
        ws
    }

    /// Unread counter of `viewer` for a conversation, read over HTTP.
    pub async fn unread(&self, viewer: &TestUser, conversation_id: &str) -> u64 {
        let (_, body) = self
            .get(viewer, &format!("/api/conversations/{conversation_id}"))
            .await;
        body["unreadCount"].as_u64().unwrap()
    }
}

pub async fn send(ws: &mut Ws, event: &str, data: Value) {
    let frame = serde_json::json!({ "event": event, "data": data });
    ws.send(WsMessage::Text(frame.to_string())).await.unwrap();
}

/// Next text frame within `wait`, or None.
pub async fn next_event(ws: &mut Ws, wait: Duration) -> Option<Value> {
    loop {
        match timeout(wait, ws.next()).await {
            Ok(Some(Ok(WsMessage::Text(txt)))) => return Some(serde_json::from_str(&txt).unwrap()),
            Ok(Some(Ok(_))) => continue,
            _ => return None,
        }
    }
}

/// Skip frames until one named `event` arrives.
pub async fn wait_for(ws: &mut Ws, event: &str) -> Value {
    loop {
        let v = next_event(ws, Duration::from_secs(5))
            .await
            .unwrap_or_else(|| panic!("timed out waiting for {event}"));
        if v["event"] == event {
            return v;
        }
    }
}

/// Every frame arriving within `wait`.
pub async fn collect(ws: &mut Ws, wait: Duration) -> Vec<Value> {
    let mut out = Vec::new();
    while let Some(v) = next_event(ws, wait).await {
        out.push(v);
    }
    out
}
