//! Rooms by id, created on first use and dropped once idle.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval};
use tracing::info;

use crate::config::Config;
use crate::room::{Room, RoomHandle, run_room_loop};

/// Room used when a client does not name one.
pub const DEFAULT_ROOM: &str = "lobby";

/// Longest accepted room id.
const MAX_ROOM_ID_LEN: usize = 32;

/// Public view of a room, as listed over HTTP.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RoomSummary {
    pub id: String,
    pub phase: String,
    pub tick: i64,
    pub players: usize,
    pub connections: usize,
}

/// Whether `id` may name a room.
pub fn is_valid_room_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= MAX_ROOM_ID_LEN
        && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Room id from a request path: `/room/<id>`, or the default room for `/`
/// and `/room`.
pub fn room_id_from_path(path: &str) -> Option<&str> {
    let rest = path.trim_end_matches('/');
    if rest.is_empty() || rest == "/room" {
        return Some(DEFAULT_ROOM);
    }
    let id = rest.strip_prefix("/room/")?;
    is_valid_room_id(id).then_some(id)
}

pub struct RoomRegistry {
    config: Arc<Config>,
    rooms: RwLock<HashMap<String, RoomHandle>>,
}

impl RoomRegistry {
    pub fn new(config: Arc<Config>) -> Arc<Self> {
        Arc::new(Self {
            config,
            rooms: RwLock::new(HashMap::new()),
        })
    }

    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    pub async fn get(&self, id: &str) -> Option<RoomHandle> {
        self.rooms.read().await.get(id).cloned()
    }

    /// The room called `id`, creating it and starting its loop if needed.
    pub async fn get_or_create(&self, id: &str) -> anyhow::Result<RoomHandle> {
        if let Some(room) = self.get(id).await {
            return Ok(room);
        }
        if !is_valid_room_id(id) {
            anyhow::bail!("invalid room id {id:?}");
        }
        let map = Room::load_map(&self.config).await?;

        let mut rooms = self.rooms.write().await;
        // another connection may have created it while the map loaded
        if let Some(room) = rooms.get(id) {
            return Ok(Arc::clone(room));
        }
        let room = Arc::new(RwLock::new(Room::new(id, Arc::clone(&self.config), map)));
        rooms.insert(id.to_string(), Arc::clone(&room));
        info!("Created room {} ({} rooms open)", id, rooms.len());

        tokio::spawn(run_room_loop(Arc::clone(&room), self.config.server.tick_interval_ms));
        Ok(room)
    }

    /// Summaries of every open room, ordered by id.
    pub async fn list(&self) -> Vec<RoomSummary> {
        let handles: Vec<RoomHandle> = self.rooms.read().await.values().cloned().collect();
        let mut summaries = Vec::with_capacity(handles.len());
        for handle in handles {
            let room = handle.read().await;
            summaries.push(RoomSummary {
                id: room.id.clone(),
                phase: format!("{:?}", room.phase()),
                tick: room.engine().current_tick(),
                players: room.engine().players().count(),
                connections: room.connections(),
            });
        }
        summaries.sort_by(|a, b| a.id.cmp(&b.id));
        summaries
    }

    /// Close and drop rooms that have had no connection for `timeout`.
    /// Returns the ids removed.
    pub async fn collect_idle(&self, now: Instant, timeout: Duration) -> Vec<String> {
        let mut rooms = self.rooms.write().await;
        let mut removed = Vec::new();
        for (id, handle) in rooms.iter() {
            let mut room = handle.write().await;
            let idle = room
                .empty_since()
                .is_some_and(|since| now.saturating_duration_since(since) >= timeout);
            if idle && room.connections() == 0 {
                room.close();
                removed.push(id.clone());
            }
        }
        for id in &removed {
            rooms.remove(id);
            info!("Dropped idle room {}", id);
        }
        removed
    }

    /// Sweep idle rooms every `gc_interval_secs`.
    pub fn spawn_gc(self: &Arc<Self>) -> JoinHandle<()> {
        let registry = Arc::clone(self);
        let every = Duration::from_secs(self.config.room.gc_interval_secs.max(1));
        let timeout = Duration::from_secs(self.config.room.idle_timeout_secs);
        tokio::spawn(async move {
            let mut ticker = interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                registry.collect_idle(Instant::now(), timeout).await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::room::tests::test_config;

    #[test]
    fn test_room_id_from_path() {
        assert_eq!(room_id_from_path("/"), Some(DEFAULT_ROOM));
        assert_eq!(room_id_from_path("/room"), Some(DEFAULT_ROOM));
        assert_eq!(room_id_from_path("/room/alpha-1"), Some("alpha-1"));
        assert_eq!(room_id_from_path("/room/alpha/"), Some("alpha"));
        assert_eq!(room_id_from_path("/room/../etc"), None);
        assert_eq!(room_id_from_path("/other"), None);
    }

    #[tokio::test]
    async fn test_get_or_create_reuses_rooms() {
        let registry = RoomRegistry::new(test_config(1, 1));
        let a = registry.get_or_create("a").await.unwrap();
        let again = registry.get_or_create("a").await.unwrap();
        assert!(Arc::ptr_eq(&a, &again));
        registry.get_or_create("b").await.unwrap();
        assert!(registry.get_or_create("no spaces").await.is_err());

        let list = registry.list().await;
        assert_eq!(list.iter().map(|r| r.id.as_str()).collect::<Vec<_>>(), ["a", "b"]);
        assert_eq!(list[0].phase, "Registration");
    }

    #[tokio::test]
    async fn test_idle_rooms_are_collected() {
        let registry = RoomRegistry::new(test_config(1, 1));
        let busy = registry.get_or_create("busy").await.unwrap();
        let idle = registry.get_or_create("idle").await.unwrap();
        busy.write().await.connect();

        let removed = registry.collect_idle(Instant::now(), Duration::ZERO).await;
        assert_eq!(removed, ["idle"]);
        assert!(idle.read().await.is_closed());
        assert!(registry.get("idle").await.is_none());
        assert!(registry.get("busy").await.is_some());

        // a recently emptied room survives a long timeout
        busy.write().await.disconnect(None);
        let removed = registry
            .collect_idle(Instant::now(), Duration::from_secs(60))
            .await;
        assert!(removed.is_empty());
    }

    #[tokio::test]
    async fn test_room_listing_json() {
        let registry = RoomRegistry::new(test_config(1, 1));
        let room = registry.get_or_create(DEFAULT_ROOM).await.unwrap();
        room.write().await.join("alice").unwrap();

        let json = serde_json::to_value(registry.list().await).unwrap();
        assert_eq!(json[0]["id"], "lobby");
        assert_eq!(json[0]["phase"], "Running");
        assert_eq!(json[0]["players"], 2);
        assert_eq!(json[0]["connections"], 0);
    }
}
