mod common;

use common::{next_event, send, spawn_server, wait_for};
use reqwest::StatusCode;
use serde_json::json;
use std::time::Duration;

#[tokio::test]
async fn history_pages_deliver_and_delete() {
    let srv = spawn_server().await;
    let alice = srv.register("Alice").await;
    let bob = srv.register("Bob").await;

    let (status, conv) = srv
        .post(&alice, "/api/conversations", json!({"userId": bob.id}))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let conversation_id = conv["id"].as_str().unwrap().to_string();
    let (status, again) = srv
        .post(&bob, "/api/conversations", json!({"userId": alice.id}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(again["id"], conv["id"]);

    let mut ids = Vec::new();
    for text in ["m1", "m2", "m3"] {
        let (status, msg) = srv
            .post(
                &alice,
                "/api/messages",
                json!({"conversationId": conversation_id, "content": text}),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        ids.push(msg["id"].as_str().unwrap().to_string());
    }
    assert_eq!(srv.unread(&bob, &conversation_id).await, 3);

    let (_, page) = srv
        .get(&bob, &format!("/api/messages/{conversation_id}?limit=2"))
        .await;
    let texts: Vec<&str> = page
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["content"].as_str().unwrap())
        .collect();
    assert_eq!(texts, vec!["m2", "m3"]);
    assert!(page.as_array().unwrap().iter().all(|m| m["delivered"] == true));
    let (_, older) = srv
        .get(&bob, &format!("/api/messages/{conversation_id}?limit=2&page=2"))
        .await;
    assert_eq!(older[0]["content"], "m1");
    let (status, beyond) = srv
        .get(
            &bob,
            &format!("/api/messages/{conversation_id}?page={}", u64::MAX),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(beyond, json!([]));

    let (status, _) = srv.delete(&bob, &format!("/api/messages/{}", ids[2])).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = srv.delete(&alice, &format!("/api/messages/{}", ids[2])).await;
    assert_eq!(status, StatusCode::OK);
    let (_, detail) = srv
        .get(&alice, &format!("/api/conversations/{conversation_id}"))
        .await;
    assert_eq!(detail["lastMessage"]["id"], ids[1].as_str());
    let (status, _) = srv.delete(&alice, &format!("/api/messages/{}", ids[2])).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn group_unread_counts() {
    let srv = spawn_server().await;
    let alice = srv.register("Alice").await;
    let bob = srv.register("Bob").await;
    let carol = srv.register("Carol").await;

    let (status, group) = srv
        .post(
            &alice,
            "/api/conversations/group",
            json!({"name": "Family", "participants": [bob.id, carol.id]}),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(group["admin"], alice.id);
    assert_eq!(group["participants"].as_array().unwrap().len(), 3);
    let gid = group["id"].as_str().unwrap().to_string();

    srv.post(&bob, "/api/messages", json!({"conversationId": gid, "content": "dinner?"}))
        .await;
    assert_eq!(srv.unread(&alice, &gid).await, 1);
    assert_eq!(srv.unread(&bob, &gid).await, 0);
    assert_eq!(srv.unread(&carol, &gid).await, 1);

    let (status, _) = srv
        .post(&alice, &format!("/api/conversations/{gid}/read"), json!({}))
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert_eq!(srv.unread(&alice, &gid).await, 0);
    assert_eq!(srv.unread(&bob, &gid).await, 0);
    assert_eq!(srv.unread(&carol, &gid).await, 1);

    let (status, _) = srv
        .post(
            &alice,
            "/api/conversations/group",
            json!({"name": "Tiny", "participants": [bob.id]}),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn outsiders_see_not_found() {
    let srv = spawn_server().await;
    let alice = srv.register("Alice").await;
    let bob = srv.register("Bob").await;
    let eve = srv.register("Eve").await;
    let (_, conv) = srv
        .post(&alice, "/api/conversations", json!({"userId": bob.id}))
        .await;
    let cid = conv["id"].as_str().unwrap().to_string();

    let (status, _) = srv.get(&eve, &format!("/api/conversations/{cid}")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = srv.get(&eve, &format!("/api/messages/{cid}")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, body) = srv
        .post(&eve, "/api/messages", json!({"conversationId": cid, "content": "hi"}))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "conversation not found");
    let (status, _) = srv
        .post(&alice, "/api/conversations", json!({"userId": alice.id}))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn storage_outage_is_reported_to_the_sender_only() {
    let srv = spawn_server().await;
    let alice = srv.register("Alice").await;
    let bob = srv.register("Bob").await;
    let (_, first) = srv
        .post(&alice, "/api/messages", json!({"to": bob.id, "content": "before"}))
        .await;
    let cid = first["conversationId"].as_str().unwrap().to_string();

    let mut alice_ws = srv.connect(&alice).await;
    let mut bob_ws = srv.connect(&bob).await;
    wait_for(&mut alice_ws, "user-online").await;

    srv.state
        .db
        .run(|conn| {
            Ok(conn.execute_batch(
                "CREATE TRIGGER outage BEFORE INSERT ON messages BEGIN SELECT RAISE(ABORT, 'disk offline'); END;",
            )?)
        })
        .await
        .unwrap();

    send(&mut alice_ws, "send-message", json!({"conversationId": cid, "content": "lost"})).await;
    let err = wait_for(&mut alice_ws, "error").await;
    assert_eq!(err["data"]["message"], "storage unavailable, please retry");
    assert!(next_event(&mut bob_ws, Duration::from_millis(300)).await.is_none());

    let (_, detail) = srv.get(&bob, &format!("/api/conversations/{cid}")).await;
    assert_eq!(detail["lastMessage"]["id"], first["id"]);
    assert_eq!(detail["unreadCount"], 1);
}

#[tokio::test]
async fn retry_after_failed_first_send_reaches_the_peer_live() {
    let srv = spawn_server().await;
    let alice = srv.register("Alice").await;
    let bob = srv.register("Bob").await;
    let mut alice_ws = srv.connect(&alice).await;
    let mut bob_ws = srv.connect(&bob).await;

    srv.state
        .db
        .run(|conn| {
            Ok(conn.execute_batch(
                "CREATE TRIGGER outage BEFORE INSERT ON messages BEGIN SELECT RAISE(ABORT, 'disk offline'); END;",
            )?)
        })
        .await
        .unwrap();
    send(&mut alice_ws, "send-message", json!({"to": bob.id, "content": "first"})).await;
    wait_for(&mut alice_ws, "error").await;
    let (_, list) = srv.get(&bob, "/api/conversations").await;
    assert_eq!(list, json!([]));

    srv.state
        .db
        .run(|conn| Ok(conn.execute_batch("DROP TRIGGER outage;")?))
        .await
        .unwrap();
    send(&mut alice_ws, "send-message", json!({"to": bob.id, "content": "again"})).await;
    let msg = wait_for(&mut bob_ws, "new-message").await;
    assert_eq!(msg["data"]["content"], "again");
}

#[tokio::test]
async fn obfuscated_content_is_stored_verbatim() {
    let srv = spawn_server().await;
    let alice = srv.register("Alice").await;
    let bob = srv.register("Bob").await;
    let envelope = "U2FsdGVkX1+yvDXZkRaXZiVw3GCzOLMJ7bcE2Lw4E4g=";
    let (status, msg) = srv
        .post(
            &alice,
            "/api/messages",
            json!({"to": bob.id, "content": "[encrypted]", "encryptedContent": envelope}),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(msg["encryptedContent"], envelope);
    let (status, _) = srv
        .post(
            &alice,
            "/api/messages",
            json!({"to": bob.id, "content": "x", "encryptedContent": "plain words"}),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
