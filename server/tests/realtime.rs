mod common;

use common::{collect, next_event, send, spawn_server, wait_for};
use serde_json::json;
use std::time::Duration;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{client::IntoClientRequest, Error as WsError};

#[tokio::test]
async fn first_message_creates_direct_conversation() {
    let srv = spawn_server().await;
    let alice = srv.register("Alice").await;
    let bob = srv.register("Bob").await;
    let mut bob_ws = srv.connect(&bob).await;
    let mut alice_ws = srv.connect(&alice).await;

    send(&mut alice_ws, "send-message", json!({"to": bob.id, "content": "hi"})).await;
    let ev = wait_for(&mut bob_ws, "new-message").await;
    assert_eq!(ev["data"]["content"], "hi");
    assert_eq!(ev["data"]["type"], "text");
    assert_eq!(ev["data"]["sender"]["name"], "Alice");
    assert_eq!(ev["data"]["delivered"], false);
    let conversation_id = ev["data"]["conversationId"].as_str().unwrap().to_string();

    // the sender's session is part of the group as well
    let echo = wait_for(&mut alice_ws, "new-message").await;
    assert_eq!(echo["data"]["id"], ev["data"]["id"]);

    assert_eq!(srv.unread(&alice, &conversation_id).await, 0);
    assert_eq!(srv.unread(&bob, &conversation_id).await, 1);

    let (_, list) = srv.get(&alice, "/api/conversations").await;
    assert_eq!(list.as_array().unwrap().len(), 1);
    assert_eq!(list[0]["isGroup"], false);
    assert_eq!(list[0]["lastMessage"]["content"], "hi");
}

#[tokio::test]
async fn typing_is_relayed_to_others_only() {
    let srv = spawn_server().await;
    let alice = srv.register("Alice").await;
    let bob = srv.register("Bob").await;
    let (_, conv) = srv
        .post(&alice, "/api/conversations", json!({"userId": bob.id}))
        .await;
    let conversation_id = conv["id"].as_str().unwrap().to_string();

    let mut alice_ws = srv.connect(&alice).await;
    let mut bob_ws = srv.connect(&bob).await;
    collect(&mut alice_ws, Duration::from_millis(200)).await;

    send(
        &mut alice_ws,
        "typing",
        json!({"conversationId": conversation_id, "isTyping": true}),
    )
    .await;
    let ev = wait_for(&mut bob_ws, "typing").await;
    assert_eq!(ev["data"]["userId"], alice.id);
    assert_eq!(ev["data"]["userName"], "Alice");
    assert_eq!(ev["data"]["isTyping"], true);

    let echoed = collect(&mut alice_ws, Duration::from_millis(300)).await;
    assert!(echoed.iter().all(|v| v["event"] != "typing"));
}

#[tokio::test]
async fn presence_follows_connections() {
    let srv = spawn_server().await;
    let alice = srv.register("Alice").await;
    let bob = srv.register("Bob").await;
    let (status, _) = srv
        .post(&alice, "/api/conversations", json!({"userId": bob.id}))
        .await;
    assert_eq!(status, reqwest::StatusCode::CREATED);

    let mut bob_ws = srv.connect(&bob).await;
    let mut first = srv.connect(&alice).await;
    let online = wait_for(&mut bob_ws, "user-online").await;
    assert_eq!(online["data"]["userId"], alice.id);

    let mut second = srv.connect(&alice).await;
    wait_for(&mut bob_ws, "user-online").await;

    // closing one of two sessions still announces offline
    first.close(None).await.unwrap();
    let offline = wait_for(&mut bob_ws, "user-offline").await;
    assert_eq!(offline["data"]["userId"], alice.id);
    assert!(offline["data"]["lastSeen"].is_i64());

    let (_, me) = srv.get(&alice, "/api/me").await;
    assert_eq!(me["isOnline"], false);

    // the surviving session keeps receiving its groups
    send(&mut bob_ws, "send-message", json!({"to": alice.id, "content": "still there?"})).await;
    let ev = wait_for(&mut second, "new-message").await;
    assert_eq!(ev["data"]["content"], "still there?");
}

#[tokio::test]
async fn read_receipts_reach_the_sender() {
    let srv = spawn_server().await;
    let alice = srv.register("Alice").await;
    let bob = srv.register("Bob").await;
    let mut alice_ws = srv.connect(&alice).await;
    let mut bob_ws = srv.connect(&bob).await;

    send(&mut bob_ws, "send-message", json!({"to": alice.id, "content": "ping"})).await;
    let msg = wait_for(&mut alice_ws, "new-message").await;
    let conversation_id = msg["data"]["conversationId"].as_str().unwrap().to_string();
    assert_eq!(srv.unread(&alice, &conversation_id).await, 1);

    send(&mut alice_ws, "delivered", json!({"conversationId": conversation_id})).await;
    let delivered = wait_for(&mut bob_ws, "messages-delivered").await;
    assert_eq!(delivered["data"]["userId"], alice.id);

    send(&mut alice_ws, "read", json!({"conversationId": conversation_id})).await;
    let read = wait_for(&mut bob_ws, "messages-read").await;
    assert_eq!(read["data"]["userId"], alice.id);
    assert_eq!(read["data"]["conversationId"], conversation_id);
    assert_eq!(srv.unread(&alice, &conversation_id).await, 0);

    let (_, history) = srv
        .get(&bob, &format!("/api/messages/{conversation_id}"))
        .await;
    assert_eq!(history[0]["read"], true);
    assert_eq!(history[0]["delivered"], true);
    assert_eq!(history[0]["readBy"][0]["userId"], alice.id);
}

#[tokio::test]
async fn specific_message_read_twice_keeps_one_reader() {
    let srv = spawn_server().await;
    let alice = srv.register("Alice").await;
    let bob = srv.register("Bob").await;
    let mut alice_ws = srv.connect(&alice).await;
    let mut bob_ws = srv.connect(&bob).await;

    send(&mut bob_ws, "send-message", json!({"to": alice.id, "content": "one"})).await;
    let msg = wait_for(&mut alice_ws, "new-message").await;
    let conversation_id = msg["data"]["conversationId"].as_str().unwrap().to_string();
    let message_id = msg["data"]["id"].as_str().unwrap().to_string();

    for _ in 0..2 {
        send(
            &mut alice_ws,
            "read",
            json!({"conversationId": conversation_id, "messageId": message_id}),
        )
        .await;
        let ev = wait_for(&mut bob_ws, "messages-read").await;
        assert_eq!(ev["data"]["messageId"], message_id);
    }
    let (_, history) = srv
        .get(&alice, &format!("/api/messages/{conversation_id}"))
        .await;
    assert_eq!(history[0]["readBy"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn malformed_frames_get_an_error_event() {
    let srv = spawn_server().await;
    let alice = srv.register("Alice").await;
    let bob = srv.register("Bob").await;
    let mut alice_ws = srv.connect(&alice).await;
    let mut bob_ws = srv.connect(&bob).await;
    collect(&mut alice_ws, Duration::from_millis(200)).await;

    send(&mut alice_ws, "send-message", json!({"content": "no target"})).await;
    let err = wait_for(&mut alice_ws, "error").await;
    assert!(err["data"]["message"].as_str().unwrap().contains("conversationId"));

    send(&mut alice_ws, "shout", json!({})).await;
    wait_for(&mut alice_ws, "error").await;

    assert!(next_event(&mut bob_ws, Duration::from_millis(300)).await.is_none());
}

#[tokio::test]
async fn handshake_requires_a_valid_token() {
    let srv = spawn_server().await;
    let mut req = format!("ws://{}/ws", srv.addr).into_client_request().unwrap();
    req.headers_mut()
        .append("Authorization", "Bearer not-a-token".parse().unwrap());
    match connect_async(req).await {
        Err(WsError::Http(resp)) => assert_eq!(resp.status(), 401),
        other => panic!("expected 401, got {:?}", other.map(|_| ())),
    }
    match connect_async(format!("ws://{}/ws", srv.addr)).await {
        Err(WsError::Http(resp)) => assert_eq!(resp.status(), 401),
        other => panic!("expected 401, got {:?}", other.map(|_| ())),
    }

    let alice = srv.register("Alice").await;
    let (mut ws, _) = connect_async(format!("ws://{}/ws?token={}", srv.addr, alice.token))
        .await
        .unwrap();
    let hello = wait_for(&mut ws, "connected").await;
    assert_eq!(hello["data"]["userId"], alice.id);
}
