use std::future::Future;
use std::time::Duration;

use crate::error::SyncError;

/// Fixed database name for the legacy/anonymous (pre-login) local store.
pub const LEGACY_DATABASE_NAME: &str = "MatchOpsLocal";

const USER_DATABASE_PREFIX: &str = "matchops_user_";
const MAX_USER_ID_LEN: usize = 255;
const LEGACY_EXISTS_TIMEOUT: Duration = Duration::from_secs(5);

fn is_valid_user_id(user_id: &str) -> bool {
    !user_id.is_empty()
        && user_id.len() <= MAX_USER_ID_LEN
        && user_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Derive the per-user local database name, per §6.
///
/// `userId` must match `^[A-Za-z0-9_-]+$` and be at most 255 characters;
/// empty, whitespace-only, over-length, or otherwise non-matching inputs
/// fail with `ValidationError`. This function is total and strictly
/// injective on valid inputs (§8 property 8): the prefix is fixed and the
/// allowed alphabet cannot itself contain the prefix's delimiter in a way
/// that lets two distinct ids collide.
pub fn get_user_database_name(user_id: &str) -> Result<String, SyncError> {
    if !is_valid_user_id(user_id) {
        return Err(SyncError::Validation(format!(
            "invalid userId '{user_id}': must be 1-{MAX_USER_ID_LEN} characters matching [A-Za-z0-9_-]+"
        )));
    }
    Ok(format!("{USER_DATABASE_PREFIX}{user_id}"))
}

/// True if `name` is a user-scoped database name (vs. the fixed legacy name).
pub fn is_user_scoped(name: &str) -> bool {
    name.starts_with(USER_DATABASE_PREFIX)
}

/// Recover the userId embedded in a user-scoped database name, or `None` if
/// `name` is not user-scoped (including the legacy name itself).
pub fn extract_user_id(name: &str) -> Option<&str> {
    name.strip_prefix(USER_DATABASE_PREFIX)
        .filter(|id| is_valid_user_id(id))
}

/// Check whether the legacy/anonymous database exists, bounded by a 5-second
/// wall timeout. On timeout this returns `false` ("not present") rather than
/// propagating an error — callers use this purely to decide whether a
/// migration prompt is worth showing, and a slow/hung check should never
/// block startup (§5, §8 boundary behavior).
pub async fn legacy_exists<F, Fut>(check: F) -> bool
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = bool>,
{
    tokio::time::timeout(LEGACY_EXISTS_TIMEOUT, check())
        .await
        .unwrap_or(false)
}
