// tests/chat_socket_tests.rs

mod common;

use std::time::Duration;

use common::{PASSWORD, spawn_app};
use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::{Message, client::IntoClientRequest, http::header::AUTHORIZATION},
};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Logs in without a cookie store and returns the access token.
async fn access_token(app: &common::TestApp, email: &str) -> String {
    let response = reqwest::Client::new()
        .post(app.url("/api/auth/login"))
        .json(&json!({ "email": email, "password": PASSWORD }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);

    response
        .headers()
        .get_all(reqwest::header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .filter_map(|v| v.split(';').next())
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == "access_token")
        .map(|(_, value)| value.to_string())
        .expect("login sets the access cookie")
}

async fn open_socket(
    app: &common::TestApp,
    course_id: i64,
    token: &str,
) -> Result<Socket, tokio_tungstenite::tungstenite::Error> {
    let url = format!(
        "{}/api/chat/{}/ws",
        app.address.replacen("http", "ws", 1),
        course_id
    );
    let mut request = url.into_client_request()?;
    request
        .headers_mut()
        .insert(AUTHORIZATION, format!("Bearer {}", token).parse().unwrap());
    connect_async(request).await.map(|(socket, _)| socket)
}

/// Next JSON event from the socket, skipping control frames.
async fn next_event(socket: &mut Socket) -> Value {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match socket.next().await {
                Some(Ok(Message::Text(text))) => {
                    return serde_json::from_str::<Value>(text.as_str()).unwrap();
                }
                Some(Ok(_)) => continue,
                other => panic!("socket ended: {:?}", other),
            }
        }
    })
    .await
    .expect("timed out waiting for a chat event")
}

async fn send_frame(socket: &mut Socket, frame: Value) {
    socket.send(Message::text(frame.to_string())).await.unwrap();
}

/// Polls the presence endpoint until the room reaches `expected` sockets.
async fn wait_online(app: &common::TestApp, client: &reqwest::Client, course_id: i64, expected: i64) {
    for _ in 0..100 {
        let response = client
            .get(app.url(&format!("/api/chat/{}/online", course_id)))
            .send()
            .await
            .unwrap();
        let body: Value = response.json().await.unwrap();
        if body["online"] == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("room {} never reached {} sockets", course_id, expected);
}

#[tokio::test]
async fn members_chat_in_real_time() {
    let Some(app) = spawn_app().await else { return };
    let instructor = common::client();
    let student = common::client();
    let outsider = common::client();

    let course = app.published_course(&instructor, 0).await;
    let course_id = course["id"].as_i64().unwrap();
    let instructor_id = course["instructor_id"].as_i64().unwrap();
    let instructor_email: String =
        sqlx::query_scalar("SELECT email FROM users WHERE id = $1")
            .bind(instructor_id)
            .fetch_one(&app.pool)
            .await
            .unwrap();

    let student_user = app.register(&student, "talker").await;
    let student_id = student_user["id"].as_i64().unwrap();
    student
        .post(app.url(&format!("/api/courses/{}/enroll", course_id)))
        .send()
        .await
        .unwrap();
    let outsider_user = app.register(&outsider, "snoop").await;

    let student_token = access_token(&app, student_user["email"].as_str().unwrap()).await;
    let instructor_token = access_token(&app, &instructor_email).await;
    let outsider_token = access_token(&app, outsider_user["email"].as_str().unwrap()).await;

    // Non-members are refused before the upgrade
    assert!(open_socket(&app, course_id, &outsider_token).await.is_err());
    assert!(open_socket(&app, course_id, "not-a-token").await.is_err());

    let mut student_ws = open_socket(&app, course_id, &student_token).await.unwrap();
    wait_online(&app, &student, course_id, 1).await;

    let mut instructor_ws = open_socket(&app, course_id, &instructor_token).await.unwrap();
    wait_online(&app, &student, course_id, 2).await;

    let joined = next_event(&mut student_ws).await;
    assert_eq!(joined["type"], "join");
    assert_eq!(joined["user_id"], instructor_id);
    assert_eq!(joined["course_id"], course_id);

    // Messages are stored, then fanned out to everyone including the sender
    send_frame(
        &mut instructor_ws,
        json!({ "type": "message", "body": "<b>Welcome</b> to the course" }),
    )
    .await;
    for socket in [&mut student_ws, &mut instructor_ws] {
        let event = next_event(socket).await;
        assert_eq!(event["type"], "message");
        assert_eq!(event["body"], "Welcome to the course");
        assert_eq!(event["user_id"], instructor_id);
        assert!(event["id"].as_i64().is_some());
    }

    let response = student
        .get(app.url(&format!("/api/chat/{}/messages", course_id)))
        .send()
        .await
        .unwrap();
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["messages"][0]["body"], "Welcome to the course");

    // Bad frames only answer the offending socket
    send_frame(
        &mut student_ws,
        json!({ "type": "message", "body": "x".repeat(2001) }),
    )
    .await;
    let event = next_event(&mut student_ws).await;
    assert_eq!(event["type"], "error");
    assert_eq!(event["message"], "Message exceeds 2000 characters");

    student_ws
        .send(Message::text("hello?".to_string()))
        .await
        .unwrap();
    let event = next_event(&mut student_ws).await;
    assert_eq!(event["type"], "error");
    assert_eq!(event["message"], "Unrecognized frame");

    send_frame(&mut student_ws, json!({ "type": "typing" })).await;
    let event = next_event(&mut instructor_ws).await;
    assert_eq!(event["type"], "typing");
    assert_eq!(event["user_id"], student_id);

    let stored: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chat_messages WHERE course_id = $1")
        .bind(course_id)
        .fetch_one(&app.pool)
        .await
        .unwrap();
    assert_eq!(stored, 1);

    instructor_ws.close(None).await.unwrap();
    let left = next_event(&mut student_ws).await;
    assert_eq!(left["type"], "leave");
    assert_eq!(left["user_id"], instructor_id);
    wait_online(&app, &student, course_id, 1).await;

    student_ws.close(None).await.unwrap();
    wait_online(&app, &student, course_id, 0).await;
}
