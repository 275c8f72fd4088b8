//! Brain: the robot's in-memory user directory and key/value store.
//!
//! Nothing here is persisted; a storage integration would call `merge_data`
//! after loading and listen for `Save`/`Close`.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use tokio::sync::broadcast;

use crate::message::User;

const EVENT_BUFFER: usize = 16;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BrainData {
    #[serde(default)]
    pub users: HashMap<String, User>,
    #[serde(default, rename = "_private")]
    pub private: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrainEvent {
    /// Data was merged in (e.g. after a storage load).
    Loaded,
    Connected,
    Save,
    Close,
}

pub struct Brain {
    data: RwLock<BrainData>,
    events: broadcast::Sender<BrainEvent>,
}

impl Default for Brain {
    fn default() -> Self {
        Self::new()
    }
}

impl Brain {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Self {
            data: RwLock::new(BrainData::default()),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BrainEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: BrainEvent) {
        if self.events.send(event).is_err() {
            log::trace!("brain event {:?} had no subscribers", event);
        }
    }

    pub fn set(&self, key: impl Into<String>, value: serde_json::Value) {
        self.write().private.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<serde_json::Value> {
        self.read().private.get(key).cloned()
    }

    pub fn remove(&self, key: &str) -> Option<serde_json::Value> {
        self.write().private.remove(key)
    }

    /// Snapshot of everything the brain holds.
    pub fn data(&self) -> BrainData {
        self.read().clone()
    }

    /// Merge `incoming` over the current data and announce `Loaded`.
    pub fn merge_data(&self, incoming: BrainData) {
        {
            let mut data = self.write();
            data.users.extend(incoming.users);
            data.private.extend(incoming.private);
        }
        self.emit(BrainEvent::Loaded);
    }

    /// Ask storage integrations to persist the current data.
    pub fn save(&self) {
        self.emit(BrainEvent::Save);
    }

    pub fn mark_connected(&self) {
        self.emit(BrainEvent::Connected);
    }

    pub fn close(&self) {
        self.save();
        self.emit(BrainEvent::Close);
    }

    pub fn users(&self) -> Vec<User> {
        self.read().users.values().cloned().collect()
    }

    /// Look up a user by id, creating it from `template` on first sight.
    /// A template naming a different room replaces the stored user.
    pub fn user_for_id(&self, id: &str, template: Option<&User>) -> User {
        let mut data = self.write();
        let fresh = || {
            let mut user = template.cloned().unwrap_or_else(|| User::new(id));
            user.id = id.to_string();
            user
        };
        let wanted_room = template.and_then(|t| t.room.as_deref());
        let replace = match data.users.get(id) {
            None => true,
            Some(existing) => wanted_room.is_some() && existing.room.as_deref() != wanted_room,
        };
        if replace {
            data.users.insert(id.to_string(), fresh());
        }
        data.users.get(id).cloned().unwrap_or_else(fresh)
    }

    /// Case-insensitive lookup by exact name.
    pub fn user_for_name(&self, name: &str) -> Option<User> {
        let name = name.to_lowercase();
        self.read()
            .users
            .values()
            .find(|u| u.name.to_lowercase() == name)
            .cloned()
    }

    /// Users whose name starts with `fuzzy` (case-insensitive).
    pub fn users_for_raw_fuzzy_name(&self, fuzzy: &str) -> Vec<User> {
        let fuzzy = fuzzy.to_lowercase();
        self.read()
            .users
            .values()
            .filter(|u| u.name.to_lowercase().starts_with(&fuzzy))
            .cloned()
            .collect()
    }

    /// Like [`Brain::users_for_raw_fuzzy_name`], but an exact name match wins outright.
    pub fn users_for_fuzzy_name(&self, fuzzy: &str) -> Vec<User> {
        let matched = self.users_for_raw_fuzzy_name(fuzzy);
        let lower = fuzzy.to_lowercase();
        match matched.iter().find(|u| u.name.to_lowercase() == lower) {
            Some(exact) => vec![exact.clone()],
            None => matched,
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, BrainData> {
        self.data.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, BrainData> {
        self.data.write().unwrap_or_else(PoisonError::into_inner)
    }
}
