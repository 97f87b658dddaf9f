//! Per-user game picks, including the synthetic favorite-picker "Phil".
//!
//! Picks are not locked: saving a pick for a game overwrites the previous one,
//! and concurrent saves for the same game resolve last-write-wins.

use crate::store::{self, DocumentStore, Fields, MAX_BATCH_WRITES, StoreResult, Write, paths};
use chrono::{DateTime, Utc};
use log::{info, warn};
use nfl_api::{Game, GameStatus, Side};
use serde::{Deserialize, Serialize};
use serde_json::json;

pub const PHIL_USER_ID: &str = "phil";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPick {
    pub game_id: String,
    pub side: Side,
    pub week: Option<u8>,
    pub picked_at: DateTime<Utc>,
}

pub async fn save_pick(store: &dyn DocumentStore, user_id: &str, pick: &UserPick) -> StoreResult<()> {
    store
        .set(&paths::pick(user_id, paths::doc_id(&pick.game_id)?), store::to_fields(pick)?, false)
        .await
}

/// A user's picks, optionally limited to one week.
pub async fn picks_for_user(
    store: &dyn DocumentStore,
    user_id: &str,
    week: Option<u8>,
) -> StoreResult<Vec<UserPick>> {
    let docs = store.list(&paths::picks(user_id)).await?;
    let mut picks = Vec::with_capacity(docs.len());
    for doc in docs {
        match doc.decode::<UserPick>() {
            Ok(pick) if week.is_none() || pick.week == week => picks.push(pick),
            Ok(_) => {}
            Err(e) => warn!("Skipping pick: {e}"),
        }
    }
    Ok(picks)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SkipReason {
    NoFavorite,
    AlreadyStarted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SkippedGame {
    pub game_id: String,
    pub reason: SkipReason,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PhilPicks {
    pub picks: Vec<UserPick>,
    pub skipped: Vec<SkippedGame>,
}

/// Phil takes the favorite in every game that has not kicked off yet.
pub fn generate_phil_picks(games: &[Game], now: DateTime<Utc>) -> PhilPicks {
    let mut result = PhilPicks::default();
    for game in games {
        let skip = |reason| SkippedGame { game_id: game.id.clone(), reason };
        if game.status != GameStatus::Scheduled {
            result.skipped.push(skip(SkipReason::AlreadyStarted));
            continue;
        }
        match game.favorite {
            Some(side) => result.picks.push(UserPick {
                game_id: game.id.clone(),
                side,
                week: game.week,
                picked_at: now,
            }),
            None => result.skipped.push(skip(SkipReason::NoFavorite)),
        }
    }
    result
}

/// Persist Phil's picks, creating his user document on first use.
pub async fn write_phil_picks(store: &dyn DocumentStore, phil: &PhilPicks) -> StoreResult<usize> {
    let mut profile = Fields::new();
    profile.insert("displayName".into(), json!("Phil"));
    profile.insert("email".into(), json!(""));
    profile.insert("notifications".into(), json!(false));
    if store.create(&paths::user(PHIL_USER_ID), profile).await? {
        info!("created Phil's user document");
    }

    let writes = phil
        .picks
        .iter()
        .map(|pick| {
            Ok(Write::Set {
                path: paths::pick(PHIL_USER_ID, &pick.game_id),
                fields: store::to_fields(pick)?,
                merge: false,
            })
        })
        .collect::<StoreResult<Vec<_>>>()?;
    for chunk in writes.chunks(MAX_BATCH_WRITES) {
        store.commit(chunk.to_vec()).await?;
    }
    info!("Phil picked {} games, skipped {}", phil.picks.len(), phil.skipped.len());
    Ok(writes.len())
}
