//! Live game state: the per-game poller and the live-games aggregate.

pub mod poller;

use crate::store::{self, DocumentStore, StoreResult, Write, paths};
use async_trait::async_trait;
use futures_util::future::join_all;
use log::{info, warn};
use nfl_api::client::{ApiResult, NflApi};
use nfl_api::{Game, Situation};
use serde::Serialize;

pub use poller::{PollIntervals, PollSnapshot, PollerHandle};

/// Where game state comes from. Implemented by the ESPN client; faked in tests.
#[async_trait]
pub trait GameSource: Send + Sync + 'static {
    async fn fetch_game(&self, game_id: &str) -> ApiResult<Game>;
    async fn fetch_situation(&self, game_id: &str) -> ApiResult<Situation>;
    /// Current week's scoreboard.
    async fn fetch_scoreboard(&self) -> ApiResult<Vec<Game>>;
}

#[async_trait]
impl GameSource for NflApi {
    async fn fetch_game(&self, game_id: &str) -> ApiResult<Game> {
        NflApi::fetch_game(self, game_id).await
    }

    async fn fetch_situation(&self, game_id: &str) -> ApiResult<Situation> {
        NflApi::fetch_situation(self, game_id).await
    }

    async fn fetch_scoreboard(&self) -> ApiResult<Vec<Game>> {
        NflApi::fetch_scoreboard(self, None).await
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveGames {
    pub games: Vec<Game>,
    /// Games whose detail fetch failed and are shown from the scoreboard entry.
    pub degraded: usize,
}

/// Every game currently in progress, with full details where they could be fetched.
pub async fn fetch_live_games(source: &dyn GameSource) -> ApiResult<LiveGames> {
    let live: Vec<Game> = source
        .fetch_scoreboard()
        .await?
        .into_iter()
        .filter(Game::is_live)
        .collect();

    let details = join_all(live.iter().map(|g| source.fetch_game(&g.id))).await;

    let mut result = LiveGames::default();
    for (coarse, detail) in live.into_iter().zip(details) {
        match detail {
            Ok(game) => result.games.push(game),
            Err(e) => {
                warn!("Detail fetch for live game {} failed, using scoreboard entry: {e}", coarse.id);
                result.degraded += 1;
                result.games.push(coarse);
            }
        }
    }
    info!("{} live games ({} degraded)", result.games.len(), result.degraded);
    Ok(result)
}

/// Mirror the live set into `liveGames`: upsert current games, drop finished ones.
pub async fn record_live_games(store: &dyn DocumentStore, live: &LiveGames) -> StoreResult<()> {
    let existing = store.list(paths::LIVE_GAMES).await?;
    let mut writes = Vec::with_capacity(live.games.len() + existing.len());
    for game in &live.games {
        writes.push(Write::Set {
            path: paths::live_game(&game.id),
            fields: store::to_fields(game)?,
            merge: false,
        });
    }
    for doc in existing {
        if !live.games.iter().any(|g| g.id == doc.id) {
            writes.push(Write::Delete { path: doc.path });
        }
    }
    for chunk in writes.chunks(store::MAX_BATCH_WRITES) {
        store.commit(chunk.to_vec()).await?;
    }
    Ok(())
}
