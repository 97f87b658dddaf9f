//! End-of-season cleanup.
//!
//! Each commit is atomic on its own, but a run is not: if a later batch fails,
//! earlier batches and collections stay cleared. Re-running is safe.

use crate::store::{DocumentStore, Fields, MAX_BATCH_WRITES, StoreResult, Write, paths};
use log::{debug, info};
use serde::Serialize;

/// User fields kept by default when a season is reset.
pub const DEFAULT_PRESERVED_FIELDS: &[&str] = &["email", "displayName", "notifications", "createdAt"];

/// Collections emptied at season end, in order.
pub const SEASON_COLLECTIONS: &[&str] = &[paths::WEEK_RECAPS, paths::GAMES, paths::LIVE_GAMES];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupReport {
    /// Documents deleted per collection.
    pub collections: Vec<(String, usize)>,
    pub users_reset: usize,
    pub picks_deleted: usize,
}

/// Delete every document directly in `collection`, at most [`MAX_BATCH_WRITES`] per commit.
pub async fn delete_collection(store: &dyn DocumentStore, collection: &str) -> StoreResult<usize> {
    let docs = store.list(collection).await?;
    let writes: Vec<Write> = docs.into_iter().map(|d| Write::Delete { path: d.path }).collect();
    let mut deleted = 0;
    for batch in writes.chunks(MAX_BATCH_WRITES) {
        store.commit(batch.to_vec()).await?;
        deleted += batch.len();
        debug!("deleted {deleted} documents from {collection}");
    }
    Ok(deleted)
}

/// Remove every user's picks and strip each user document down to `preserved` fields.
pub async fn reset_users(store: &dyn DocumentStore, preserved: &[&str]) -> StoreResult<(usize, usize)> {
    let users = store.list(paths::USERS).await?;
    let mut picks_deleted = 0;
    let mut rewrites = Vec::with_capacity(users.len());

    for user in users {
        picks_deleted += delete_collection(store, &paths::picks(&user.id)).await?;
        let kept: Fields = user
            .fields
            .into_iter()
            .filter(|(key, _)| preserved.contains(&key.as_str()))
            .collect();
        rewrites.push(Write::Set { path: user.path, fields: kept, merge: false });
    }

    let users_reset = rewrites.len();
    for batch in rewrites.chunks(MAX_BATCH_WRITES) {
        store.commit(batch.to_vec()).await?;
    }
    Ok((users_reset, picks_deleted))
}

pub async fn run_season_cleanup(store: &dyn DocumentStore, preserved: &[&str]) -> StoreResult<CleanupReport> {
    let mut report = CleanupReport::default();
    for collection in SEASON_COLLECTIONS {
        let deleted = delete_collection(store, collection).await?;
        info!("cleared {collection}: {deleted} documents");
        report.collections.push(((*collection).to_owned(), deleted));
    }

    let (users_reset, picks_deleted) = reset_users(store, preserved).await?;
    info!("reset {users_reset} users, deleted {picks_deleted} picks (kept {preserved:?})");
    report.users_reset = users_reset;
    report.picks_deleted = picks_deleted;
    Ok(report)
}
