//! The bulk pusher (B, §4.5): a one-shot orchestrator that bypasses Q and
//! pushes a full local dataset to R in dependency order, with orphan repair
//! and chunked, retried dispatch.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use matchops_sync_types::{EntityKind, LocalStore, RemoteStore, SyncError};
use serde_json::Value;

use crate::config::Config;
use crate::engine::SyncEngine;

/// Per-kind success counts, per-kind lists of failed IDs, and orphan-repair
/// warnings (§4.5 "Return value").
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PushSummary {
    pub succeeded: HashMap<EntityKind, u32>,
    pub failed: HashMap<EntityKind, Vec<String>>,
    pub warnings: Vec<String>,
}

impl PushSummary {
    fn record_success(&mut self, kind: EntityKind) {
        *self.succeeded.entry(kind).or_insert(0) += 1;
    }

    fn record_failure(&mut self, kind: EntityKind, id: String) {
        self.failed.entry(kind).or_default().push(id);
    }
}

fn entity_id(payload: &Value) -> Option<String> {
    payload.get("id").and_then(Value::as_str).map(str::to_owned)
}

fn field_str<'a>(payload: &'a Value, field: &str) -> Option<&'a str> {
    payload.get(field).and_then(Value::as_str)
}

/// Runs the full bulk-push algorithm. `E.resume()` is guaranteed to run even
/// if the push errors out early (step 7's "finally" semantics), implemented
/// with a drop guard rather than try/finally since Rust has no such
/// construct.
pub async fn push_all_to_cloud(
    local: &Arc<dyn LocalStore>,
    remote: &Arc<dyn RemoteStore>,
    queue: &Arc<matchops_sync_queue::Queue>,
    engine: &Arc<SyncEngine>,
    config: &Config,
) -> Result<PushSummary, SyncError> {
    engine.pause().await;
    let _resume_guard = ResumeGuard { engine };

    queue.clear().await?;

    let mut entities = read_all_entities(local).await?;
    let mut summary = PushSummary::default();
    repair_orphans(local, &mut entities, &mut summary).await?;

    for kind in EntityKind::PUSH_ORDER {
        let Some(payloads) = entities.remove(&kind) else {
            continue;
        };
        // TeamRoster and PlayerAdjustment push one entity at a time (§4.5
        // step 5 marks them "(sequential)"); every other kind is chunked
        // with parallel dispatch within each chunk.
        if matches!(kind, EntityKind::TeamRoster | EntityKind::PlayerAdjustment) {
            push_kind_sequential(remote, kind, payloads, config, &mut summary).await;
        } else {
            push_kind_chunked(remote, kind, payloads, config, &mut summary).await;
        }
    }

    Ok(summary)
}

struct ResumeGuard<'a> {
    engine: &'a Arc<SyncEngine>,
}

impl Drop for ResumeGuard<'_> {
    fn drop(&mut self) {
        self.engine.resume();
    }
}

async fn read_all_entities(
    local: &Arc<dyn LocalStore>,
) -> Result<HashMap<EntityKind, Vec<Value>>, SyncError> {
    let reads = EntityKind::PUSH_ORDER
        .iter()
        .map(|&kind| {
            let local = Arc::clone(local);
            async move { (kind, local.list(kind).await) }
        });
    let results = futures::future::join_all(reads).await;

    let mut out = HashMap::new();
    for (kind, result) in results {
        out.insert(kind, result?);
    }
    Ok(out)
}

/// Null out foreign-key references pointing outside the known ID sets,
/// rewriting the affected entity in L and recording a warning for each fix
/// (§4.5 step 4). Rosters whose team no longer exists are dropped entirely.
async fn repair_orphans(
    local: &Arc<dyn LocalStore>,
    entities: &mut HashMap<EntityKind, Vec<Value>>,
    summary: &mut PushSummary,
) -> Result<(), SyncError> {
    let season_ids: HashSet<String> = ids_of(entities, EntityKind::Season);
    let tournament_ids: HashSet<String> = ids_of(entities, EntityKind::Tournament);
    let team_ids: HashSet<String> = ids_of(entities, EntityKind::Team);

    if let Some(games) = entities.get_mut(&EntityKind::Game) {
        for game in games.iter_mut() {
            repair_field(game, "seasonId", &season_ids, local, EntityKind::Game, summary).await?;
            repair_field(game, "tournamentId", &tournament_ids, local, EntityKind::Game, summary).await?;
        }
    }

    if let Some(teams) = entities.get_mut(&EntityKind::Team) {
        for team in teams.iter_mut() {
            repair_field(team, "seasonId", &season_ids, local, EntityKind::Team, summary).await?;
        }
    }

    if let Some(adjustments) = entities.get_mut(&EntityKind::PlayerAdjustment) {
        for adjustment in adjustments.iter_mut() {
            repair_field(adjustment, "teamId", &team_ids, local, EntityKind::PlayerAdjustment, summary).await?;
        }
    }

    if let Some(rosters) = entities.get_mut(&EntityKind::TeamRoster) {
        let before = rosters.len();
        rosters.retain(|roster| {
            let team_id = entity_id(roster);
            let keep = team_id.as_deref().is_some_and(|id| team_ids.contains(id));
            if !keep {
                summary.warnings.push(format!(
                    "skipped team roster for missing team '{}'",
                    team_id.unwrap_or_default()
                ));
            }
            keep
        });
        let _dropped = before - rosters.len();
    }

    Ok(())
}

fn ids_of(entities: &HashMap<EntityKind, Vec<Value>>, kind: EntityKind) -> HashSet<String> {
    entities
        .get(&kind)
        .map(|values| values.iter().filter_map(entity_id).collect())
        .unwrap_or_default()
}

/// If `entity[field]` references an id outside `valid_ids`, null it out,
/// persist the fix in L, and record a warning.
async fn repair_field(
    entity: &mut Value,
    field: &str,
    valid_ids: &HashSet<String>,
    local: &Arc<dyn LocalStore>,
    kind: EntityKind,
    summary: &mut PushSummary,
) -> Result<(), SyncError> {
    let dangling = match field_str(entity, field) {
        Some(value) if !value.is_empty() && !valid_ids.contains(value) => Some(value.to_string()),
        _ => None,
    };
    let Some(dangling_value) = dangling else {
        return Ok(());
    };
    if let Some(obj) = entity.as_object_mut() {
        obj.insert(field.to_string(), Value::String(String::new()));
    }
    let id = entity_id(entity).unwrap_or_default();
    summary.warnings.push(format!(
        "{kind} '{id}' referenced missing {field} '{dangling_value}'; cleared"
    ));
    local.update(kind, &id, entity.clone()).await?;
    Ok(())
}

/// One-at-a-time push for kinds §4.5 step 5 marks "(sequential)"
/// (TeamRoster, PlayerAdjustment): each entity is retried with backoff
/// before moving to the next, with the same per-entity failure collection
/// as [`push_kind_chunked`].
async fn push_kind_sequential(
    remote: &Arc<dyn RemoteStore>,
    kind: EntityKind,
    payloads: Vec<Value>,
    config: &Config,
    summary: &mut PushSummary,
) {
    for payload in payloads {
        let id = entity_id(&payload).unwrap_or_default();
        match push_with_retry(remote, kind, payload, config).await {
            Ok(()) => summary.record_success(kind),
            Err(e) => {
                log::warn!("bulk push failed for {kind} '{id}': {e}");
                summary.record_failure(kind, id);
            }
        }
    }
    log::info!(
        "bulk push complete for {kind}: {} succeeded, {} failed",
        summary.succeeded.get(&kind).copied().unwrap_or(0),
        summary.failed.get(&kind).map(Vec::len).unwrap_or(0)
    );
}

/// Dependency-ordered, chunked, parallel-within-chunk push for one kind
/// (§4.5 step 5-6): each remote call is retried with backoff, and per-entity
/// failures are collected without aborting the rest of the push.
async fn push_kind_chunked(
    remote: &Arc<dyn RemoteStore>,
    kind: EntityKind,
    payloads: Vec<Value>,
    config: &Config,
    summary: &mut PushSummary,
) {
    for chunk in payloads.chunks(config.bulk_chunk_size) {
        let pushes = chunk.iter().map(|payload| {
            let remote = Arc::clone(remote);
            let payload = payload.clone();
            async move {
                let id = entity_id(&payload).unwrap_or_default();
                let result = push_with_retry(&remote, kind, payload, config).await;
                (id, result)
            }
        });
        let results = futures::future::join_all(pushes).await;
        for (id, result) in results {
            match result {
                Ok(()) => summary.record_success(kind),
                Err(e) => {
                    log::warn!("bulk push failed for {kind} '{id}': {e}");
                    summary.record_failure(kind, id);
                }
            }
        }
    }
    log::info!(
        "bulk push chunk complete for {kind}: {} succeeded, {} failed",
        summary.succeeded.get(&kind).copied().unwrap_or(0),
        summary.failed.get(&kind).map(Vec::len).unwrap_or(0)
    );
}

async fn push_with_retry(
    remote: &Arc<dyn RemoteStore>,
    kind: EntityKind,
    payload: Value,
    config: &Config,
) -> Result<(), SyncError> {
    let max_attempts = config.max_transient_attempts.max(1);
    let mut last_error = None;
    for attempt in 0..max_attempts {
        match remote.upsert(kind, payload.clone()).await {
            Ok(()) => return Ok(()),
            Err(e) => {
                let retryable = matches!(e.retry_class(), matchops_sync_types::RetryClass::Retryable);
                last_error = Some(e);
                if !retryable || attempt + 1 >= max_attempts {
                    break;
                }
                tokio::time::sleep(config.backoff_for_attempt(attempt + 1)).await;
            }
        }
    }
    Err(last_error.unwrap_or_else(|| SyncError::PermanentRemote("bulk push exhausted retries".into())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use matchops_sync_types::testing::{InMemoryLocalStore, InMemoryRemoteStore};
    use serde_json::json;
    use tempfile::tempdir;

    #[tokio::test]
    async fn orphan_season_reference_is_cleared_and_warned() {
        crate::engine::reset_engine().await;
        let concrete_local = Arc::new(InMemoryLocalStore::new());
        concrete_local.seed(EntityKind::Game, "g1", json!({"id": "g1", "seasonId": "s-missing"}));
        let local: Arc<dyn LocalStore> = concrete_local;
        let remote: Arc<dyn RemoteStore> = Arc::new(InMemoryRemoteStore::new());
        let dir = tempdir().unwrap();
        let queue = Arc::new(matchops_sync_queue::Queue::open(&dir.path().join("q.sqlite3")).unwrap());
        let engine = crate::engine::get_engine(Arc::clone(&queue), Config::default()).await;

        let summary = push_all_to_cloud(&local, &remote, &queue, &engine, &Config::default())
            .await
            .unwrap();

        assert_eq!(summary.succeeded.get(&EntityKind::Game), Some(&1));
        assert!(summary.failed.is_empty());
        assert_eq!(summary.warnings.len(), 1);
        let stored = local.get(EntityKind::Game, "g1").await.unwrap().unwrap();
        assert_eq!(stored.get("seasonId").and_then(Value::as_str), Some(""));
        crate::engine::reset_engine().await;
    }

    #[tokio::test]
    async fn team_rosters_push_one_at_a_time() {
        crate::engine::reset_engine().await;
        let concrete_local = Arc::new(InMemoryLocalStore::new());
        concrete_local.seed(EntityKind::Team, "t1", json!({"id": "t1"}));
        concrete_local.seed(EntityKind::TeamRoster, "t1", json!({"id": "t1", "players": []}));
        let local: Arc<dyn LocalStore> = concrete_local;
        let remote: Arc<dyn RemoteStore> = Arc::new(InMemoryRemoteStore::new());
        let dir = tempdir().unwrap();
        let queue = Arc::new(matchops_sync_queue::Queue::open(&dir.path().join("q.sqlite3")).unwrap());
        let engine = crate::engine::get_engine(Arc::clone(&queue), Config::default()).await;

        let summary = push_all_to_cloud(&local, &remote, &queue, &engine, &Config::default())
            .await
            .unwrap();

        assert_eq!(summary.succeeded.get(&EntityKind::TeamRoster), Some(&1));
        assert!(summary.failed.is_empty());
        crate::engine::reset_engine().await;
    }
}
