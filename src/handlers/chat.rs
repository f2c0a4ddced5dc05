// src/handlers/chat.rs

//! Course chat rooms over WebSocket, with persisted history.

use axum::{
    Extension, Json,
    extract::{
        Path, Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use sqlx::PgPool;
use tokio::sync::{broadcast, mpsc};

use crate::{
    config::CHAT_MESSAGE_MAX_LEN,
    error::AppError,
    models::chat::{ChatMessage, ClientFrame, HistoryParams, RoomEvent},
    services::chat::ChatRooms,
    utils::{access::ensure_course_member, html::strip_tags, jwt::Claims},
};

const DEFAULT_HISTORY: i64 = 50;
const MAX_HISTORY: i64 = 100;

/// Past messages of a room, oldest first. Use `before` to page backwards.
pub async fn history(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(course_id): Path<i64>,
    Query(params): Query<HistoryParams>,
) -> Result<impl IntoResponse, AppError> {
    ensure_course_member(&pool, &claims, course_id).await?;

    let limit = params.limit.unwrap_or(DEFAULT_HISTORY).clamp(1, MAX_HISTORY);

    let mut messages = sqlx::query_as::<_, ChatMessage>(
        r#"
        SELECT m.id, m.course_id, m.user_id, u.username, m.body, m.created_at
        FROM chat_messages m
        JOIN users u ON m.user_id = u.id
        WHERE m.course_id = $1 AND ($2::BIGINT IS NULL OR m.id < $2)
        ORDER BY m.id DESC
        LIMIT $3
        "#,
    )
    .bind(course_id)
    .bind(params.before)
    .bind(limit)
    .fetch_all(&pool)
    .await?;
    messages.reverse();

    Ok(Json(json!({ "success": true, "messages": messages })))
}

/// Number of sockets connected to a room.
pub async fn online(
    State(rooms): State<ChatRooms>,
    Path(course_id): Path<i64>,
) -> impl IntoResponse {
    Json(json!({
        "success": true,
        "course_id": course_id,
        "online": rooms.online(course_id).await,
    }))
}

/// Upgrades to a WebSocket joined to the course room.
/// Membership is checked before the upgrade.
pub async fn chat_socket(
    ws: WebSocketUpgrade,
    State(pool): State<PgPool>,
    State(rooms): State<ChatRooms>,
    Extension(claims): Extension<Claims>,
    Path(course_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    ensure_course_member(&pool, &claims, course_id).await?;

    let user_id = claims.user_id()?;
    let username: String = sqlx::query_scalar("SELECT username FROM users WHERE id = $1")
        .bind(user_id)
        .fetch_optional(&pool)
        .await?
        .ok_or(AppError::NotFound("User not found".to_string()))?;

    Ok(ws.on_upgrade(move |socket| {
        handle_connection(socket, pool, rooms, course_id, user_id, username)
    }))
}

/// Validates, sanitizes and stores a chat message.
async fn persist_message(
    pool: &PgPool,
    course_id: i64,
    user_id: i64,
    username: &str,
    body: &str,
) -> Result<ChatMessage, AppError> {
    let body = strip_tags(body);
    if body.is_empty() {
        return Err(AppError::BadRequest("Message cannot be empty".to_string()));
    }
    if body.chars().count() > CHAT_MESSAGE_MAX_LEN {
        return Err(AppError::BadRequest(format!(
            "Message exceeds {} characters",
            CHAT_MESSAGE_MAX_LEN
        )));
    }

    let (id, created_at): (i64, chrono::DateTime<chrono::Utc>) = sqlx::query_as(
        "INSERT INTO chat_messages (course_id, user_id, body) VALUES ($1, $2, $3) RETURNING id, created_at",
    )
    .bind(course_id)
    .bind(user_id)
    .bind(&body)
    .fetch_one(pool)
    .await?;

    Ok(ChatMessage {
        id,
        course_id,
        user_id,
        username: username.to_string(),
        body,
        created_at,
    })
}

fn error_text(err: &AppError) -> String {
    match err {
        AppError::BadRequest(msg) => msg.clone(),
        _ => "Message could not be delivered".to_string(),
    }
}

async fn handle_connection(
    socket: WebSocket,
    pool: PgPool,
    rooms: ChatRooms,
    course_id: i64,
    user_id: i64,
    username: String,
) {
    let (mut sender, mut receiver) = socket.split();
    let mut room_rx = rooms.join(course_id).await;
    // Frames meant for this socket only.
    let (direct_tx, mut direct_rx) = mpsc::channel::<RoomEvent>(8);

    tracing::debug!(course_id, user_id, "Chat socket connected");

    rooms
        .publish(
            course_id,
            RoomEvent::Join {
                course_id,
                user_id,
                username: username.clone(),
            },
        )
        .await;

    let mut send_task = tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                received = room_rx.recv() => match received {
                    Ok(event) => event,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(course_id, user_id, skipped, "Chat socket lagged");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                direct = direct_rx.recv() => match direct {
                    Some(event) => event,
                    None => break,
                },
            };

            // Own presence and typing events are not echoed back.
            let echo = matches!(event, RoomEvent::Message(_) | RoomEvent::Error { .. });
            if !echo && event.origin() == Some(user_id) {
                continue;
            }

            let Ok(text) = serde_json::to_string(&event) else {
                continue;
            };
            if sender.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    let rooms_recv = rooms.clone();
    let username_recv = username.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(msg) = receiver.next().await {
            let text = match msg {
                Ok(Message::Text(text)) => text,
                Ok(Message::Close(_)) => break,
                Ok(_) => continue,
                Err(e) => {
                    tracing::debug!(course_id, user_id, "WebSocket error: {}", e);
                    break;
                }
            };

            let frame = match serde_json::from_str::<ClientFrame>(text.as_str()) {
                Ok(frame) => frame,
                Err(_) => {
                    let _ = direct_tx
                        .send(RoomEvent::Error {
                            message: "Unrecognized frame".to_string(),
                        })
                        .await;
                    continue;
                }
            };

            match frame {
                ClientFrame::Message { body } => {
                    match persist_message(&pool, course_id, user_id, &username_recv, &body).await {
                        Ok(message) => {
                            rooms_recv.publish(course_id, RoomEvent::Message(message)).await;
                        }
                        Err(e) => {
                            if !matches!(e, AppError::BadRequest(_)) {
                                tracing::error!(course_id, user_id, "Failed to store chat message: {:?}", e);
                            }
                            let _ = direct_tx
                                .send(RoomEvent::Error {
                                    message: error_text(&e),
                                })
                                .await;
                        }
                    }
                }
                ClientFrame::Typing => {
                    let typing = RoomEvent::Typing {
                        course_id,
                        user_id,
                        username: username_recv.clone(),
                    };
                    rooms_recv.publish(course_id, typing).await;
                }
            }
        }
    });

    // The aborted task is awaited so its room receiver is dropped before the
    // room is checked for emptiness.
    tokio::select! {
        _ = &mut send_task => {
            recv_task.abort();
            let _ = recv_task.await;
        }
        _ = &mut recv_task => {
            send_task.abort();
            let _ = send_task.await;
        }
    }

    rooms
        .publish(
            course_id,
            RoomEvent::Leave {
                course_id,
                user_id,
                username,
            },
        )
        .await;
    rooms.leave(course_id).await;

    tracing::debug!(course_id, user_id, "Chat socket disconnected");
}
