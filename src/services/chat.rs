// src/services/chat.rs

//! In-process chat rooms keyed by course id.

use std::{collections::HashMap, sync::Arc};

use tokio::sync::{RwLock, broadcast};

use crate::{config::CHAT_CHANNEL_CAPACITY, models::chat::RoomEvent};

#[derive(Clone, Default)]
pub struct ChatRooms {
    rooms: Arc<RwLock<HashMap<i64, broadcast::Sender<RoomEvent>>>>,
}

impl ChatRooms {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes to a room, creating it on first use.
    pub async fn join(&self, course_id: i64) -> broadcast::Receiver<RoomEvent> {
        let mut rooms = self.rooms.write().await;
        rooms
            .entry(course_id)
            .or_insert_with(|| broadcast::channel(CHAT_CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Drops the room once nobody is subscribed any more.
    pub async fn leave(&self, course_id: i64) {
        let mut rooms = self.rooms.write().await;
        if rooms
            .get(&course_id)
            .is_some_and(|sender| sender.receiver_count() == 0)
        {
            rooms.remove(&course_id);
            tracing::debug!(course_id, "Chat room closed");
        }
    }

    /// Number of sockets currently subscribed to a room.
    pub async fn online(&self, course_id: i64) -> usize {
        self.rooms
            .read()
            .await
            .get(&course_id)
            .map(|sender| sender.receiver_count())
            .unwrap_or(0)
    }

    /// Sends an event to everyone in the room. Returns how many received it.
    pub async fn publish(&self, course_id: i64, event: RoomEvent) -> usize {
        match self.rooms.read().await.get(&course_id) {
            Some(sender) => sender.send(event).unwrap_or(0),
            None => 0,
        }
    }
}
