//! In-memory reference implementations of [`LocalStore`] and [`RemoteStore`]
//! for tests. Gated behind the `testing` feature so real consumers never pull
//! in test scaffolding.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::SyncError;
use crate::kind::EntityKind;
use crate::store::{GameEventOp, LocalStore, RemoteStore};

fn entity_id(payload: &Value) -> Option<String> {
    payload.get("id").and_then(Value::as_str).map(str::to_owned)
}

fn with_id(mut payload: Value, id: &str) -> Value {
    if let Value::Object(map) = &mut payload {
        map.insert("id".to_string(), Value::String(id.to_string()));
    }
    payload
}

/// Minimal in-memory `LocalStore`. Single-process, not durable across
/// restarts by design — it exists purely to exercise the write-through
/// wrapper and engine without a real embedded database.
#[derive(Default)]
pub struct InMemoryLocalStore {
    entities: Mutex<HashMap<(EntityKind, String), Value>>,
    timers: Mutex<HashMap<String, Value>>,
}

impl InMemoryLocalStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an entity directly, bypassing `create`, for test setup.
    pub fn seed(&self, kind: EntityKind, id: impl Into<String>, payload: Value) {
        let id = id.into();
        self.entities
            .lock()
            .unwrap()
            .insert((kind, id.clone()), with_id(payload, &id));
    }
}

#[async_trait]
impl LocalStore for InMemoryLocalStore {
    async fn create(&self, kind: EntityKind, payload: Value) -> Result<Value, SyncError> {
        let id = kind
            .singleton_id()
            .map(str::to_owned)
            .or_else(|| entity_id(&payload))
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let stored = with_id(payload, &id);
        self.entities
            .lock()
            .unwrap()
            .insert((kind, id), stored.clone());
        Ok(stored)
    }

    async fn update(&self, kind: EntityKind, id: &str, payload: Value) -> Result<Option<Value>, SyncError> {
        let mut entities = self.entities.lock().unwrap();
        let key = (kind, id.to_string());
        if !entities.contains_key(&key) {
            return Ok(None);
        }
        let stored = with_id(payload, id);
        entities.insert(key, stored.clone());
        Ok(Some(stored))
    }

    async fn delete(&self, kind: EntityKind, id: &str) -> Result<bool, SyncError> {
        Ok(self
            .entities
            .lock()
            .unwrap()
            .remove(&(kind, id.to_string()))
            .is_some())
    }

    async fn upsert(&self, kind: EntityKind, payload: Value) -> Result<Value, SyncError> {
        let id = kind
            .singleton_id()
            .map(str::to_owned)
            .or_else(|| entity_id(&payload))
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let stored = with_id(payload, &id);
        self.entities
            .lock()
            .unwrap()
            .insert((kind, id), stored.clone());
        Ok(stored)
    }

    async fn get(&self, kind: EntityKind, id: &str) -> Result<Option<Value>, SyncError> {
        Ok(self
            .entities
            .lock()
            .unwrap()
            .get(&(kind, id.to_string()))
            .cloned())
    }

    async fn list(&self, kind: EntityKind) -> Result<Vec<Value>, SyncError> {
        Ok(self
            .entities
            .lock()
            .unwrap()
            .iter()
            .filter(|((k, _), _)| *k == kind)
            .map(|(_, v)| v.clone())
            .collect())
    }

    async fn set_team_roster(&self, team_id: &str, roster: Value) -> Result<Value, SyncError> {
        let stored = with_id(roster, team_id);
        self.entities
            .lock()
            .unwrap()
            .insert((EntityKind::TeamRoster, team_id.to_string()), stored.clone());
        Ok(stored)
    }

    async fn apply_game_event(&self, game_id: &str, op: GameEventOp) -> Result<Value, SyncError> {
        let mut entities = self.entities.lock().unwrap();
        let key = (EntityKind::Game, game_id.to_string());
        let mut game = entities
            .get(&key)
            .cloned()
            .ok_or_else(|| SyncError::LocalStore(format!("no such game '{game_id}'")))?;
        let events = game
            .as_object_mut()
            .and_then(|obj| obj.get_mut("events"))
            .and_then(Value::as_array_mut);
        if let Some(events) = events {
            match op {
                GameEventOp::Add(event) => events.push(event),
                GameEventOp::Update(event) => {
                    if let Some(event_id) = event.get("id").and_then(Value::as_str) {
                        if let Some(slot) = events
                            .iter_mut()
                            .find(|e| e.get("id").and_then(Value::as_str) == Some(event_id))
                        {
                            *slot = event;
                        }
                    }
                }
                GameEventOp::Remove(event_id) => {
                    events.retain(|e| e.get("id").and_then(Value::as_str) != Some(event_id.as_str()));
                }
            }
        }
        entities.insert(key, game.clone());
        Ok(game)
    }

    async fn save_all_games(&self, games: Vec<Value>) -> Vec<Result<Value, SyncError>> {
        let mut out = Vec::with_capacity(games.len());
        for game in games {
            out.push(self.upsert(EntityKind::Game, game).await);
        }
        out
    }

    async fn save_timer_state(&self, game_id: &str, state: Value) -> Result<(), SyncError> {
        self.timers.lock().unwrap().insert(game_id.to_string(), state);
        Ok(())
    }

    async fn get_timer_state(&self, game_id: &str) -> Result<Option<Value>, SyncError> {
        Ok(self.timers.lock().unwrap().get(game_id).cloned())
    }

    async fn clear_all(&self) -> Result<(), SyncError> {
        self.entities.lock().unwrap().clear();
        self.timers.lock().unwrap().clear();
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RecordedCall {
    Upsert(EntityKind, Value),
    Delete(EntityKind, String, Option<Value>),
}

/// In-memory `RemoteStore` that records every call it receives and lets
/// tests script canned responses (e.g. "fail transiently twice, then
/// succeed" for §8 scenario 4) via [`InMemoryRemoteStore::push_result`].
#[derive(Default)]
pub struct InMemoryRemoteStore {
    calls: Mutex<Vec<RecordedCall>>,
    scripted: Mutex<VecDeque<Result<(), SyncError>>>,
    data: Mutex<HashMap<(EntityKind, String), Value>>,
}

impl InMemoryRemoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a scripted result for the next call (upsert or delete). Calls
    /// made once the queue is drained default to `Ok(())`.
    pub fn push_result(&self, result: Result<(), SyncError>) {
        self.scripted.lock().unwrap().push_back(result);
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self, kind: EntityKind, id: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| match c {
                RecordedCall::Upsert(k, v) => *k == kind && entity_id(v).as_deref() == Some(id),
                RecordedCall::Delete(k, i, _) => *k == kind && i == id,
            })
            .count()
    }

    pub fn get(&self, kind: EntityKind, id: &str) -> Option<Value> {
        self.data.lock().unwrap().get(&(kind, id.to_string())).cloned()
    }

    fn next_result(&self) -> Result<(), SyncError> {
        self.scripted.lock().unwrap().pop_front().unwrap_or(Ok(()))
    }
}

#[async_trait]
impl RemoteStore for InMemoryRemoteStore {
    async fn initialize(&self) -> Result<(), SyncError> {
        Ok(())
    }

    async fn close(&self) -> Result<(), SyncError> {
        Ok(())
    }

    async fn upsert(&self, kind: EntityKind, payload: Value) -> Result<(), SyncError> {
        self.calls.lock().unwrap().push(RecordedCall::Upsert(kind, payload.clone()));
        let result = self.next_result();
        if result.is_ok() {
            if let Some(id) = entity_id(&payload).or_else(|| kind.singleton_id().map(str::to_owned)) {
                self.data.lock().unwrap().insert((kind, id), payload);
            }
        }
        result
    }

    async fn delete(&self, kind: EntityKind, id: &str, extra: Option<Value>) -> Result<(), SyncError> {
        self.calls
            .lock()
            .unwrap()
            .push(RecordedCall::Delete(kind, id.to_string(), extra));
        let result = self.next_result();
        if result.is_ok() {
            self.data.lock().unwrap().remove(&(kind, id.to_string()));
        }
        result
    }

    async fn clear_all_user_data(&self) -> Result<(), SyncError> {
        self.data.lock().unwrap().clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn local_store_create_assigns_id_when_missing() {
        let store = InMemoryLocalStore::new();
        let stored = store.create(EntityKind::Player, json!({"name": "Pat"})).await.unwrap();
        assert!(stored.get("id").and_then(Value::as_str).is_some());
    }

    #[tokio::test]
    async fn local_store_update_returns_none_for_missing_entity() {
        let store = InMemoryLocalStore::new();
        let result = store.update(EntityKind::Player, "missing", json!({})).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn remote_store_scripted_failures_then_success() {
        let remote = InMemoryRemoteStore::new();
        remote.push_result(Err(SyncError::TransientRemote("timeout".into())));
        remote.push_result(Err(SyncError::TransientRemote("timeout".into())));

        assert!(remote.upsert(EntityKind::Player, json!({"id": "p1"})).await.is_err());
        assert!(remote.upsert(EntityKind::Player, json!({"id": "p1"})).await.is_err());
        assert!(remote.upsert(EntityKind::Player, json!({"id": "p1"})).await.is_ok());
        assert_eq!(remote.call_count(EntityKind::Player, "p1"), 3);
    }
}
