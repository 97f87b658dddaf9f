use super::GameSource;
use log::{debug, warn};
use nfl_api::Game;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollIntervals {
    /// Situation-only refresh while live.
    pub situation: Duration,
    /// Full re-fetch while live; catches live → final.
    pub full: Duration,
}

/// Shortest period a poll timer will run at; a zero interval is raised to this.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_secs(1);

impl Default for PollIntervals {
    fn default() -> Self {
        Self { situation: Duration::from_secs(10), full: Duration::from_secs(30) }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PollSnapshot {
    pub game_id: String,
    pub game: Option<Game>,
    pub error: Option<String>,
    pub loading: bool,
    pub polling: bool,
}

impl PollSnapshot {
    fn pending(game_id: &str) -> Self {
        Self { game_id: game_id.to_owned(), loading: true, ..Default::default() }
    }
}

/// Owns the polling task for one game at a time.
///
/// Dropping the handle, [`stop`](Self::stop), or [`retarget`](Self::retarget)
/// cancels every timer of the previous game. Results of a fetch that belongs to
/// an older generation are discarded instead of published.
pub struct PollerHandle {
    source: Arc<dyn GameSource>,
    intervals: PollIntervals,
    generation: Arc<AtomicU64>,
    snapshots: Arc<watch::Sender<PollSnapshot>>,
    receiver: watch::Receiver<PollSnapshot>,
    task: Option<JoinHandle<()>>,
}

impl PollerHandle {
    pub fn spawn(
        source: Arc<dyn GameSource>,
        game_id: &str,
        live: bool,
        intervals: PollIntervals,
    ) -> Self {
        let (tx, receiver) = watch::channel(PollSnapshot::pending(game_id));
        let mut handle = Self {
            source,
            intervals,
            generation: Arc::new(AtomicU64::new(0)),
            snapshots: Arc::new(tx),
            receiver,
            task: None,
        };
        handle.start(game_id, live);
        handle
    }

    pub fn subscribe(&self) -> watch::Receiver<PollSnapshot> {
        self.receiver.clone()
    }

    pub fn snapshot(&self) -> PollSnapshot {
        self.receiver.borrow().clone()
    }

    /// Switch to another game. Timers and in-flight fetches of the old one are dropped.
    pub fn retarget(&mut self, game_id: &str, live: bool) {
        self.abort_task();
        retire(&self.snapshots, &self.generation, |s| {
            *s = PollSnapshot::pending(game_id);
            true
        });
        self.start(game_id, live);
    }

    pub fn stop(&mut self) {
        self.abort_task();
        retire(&self.snapshots, &self.generation, |s| {
            s.polling = false;
            s.loading = false;
            true
        });
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    fn abort_task(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    fn start(&mut self, game_id: &str, live: bool) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let publisher = Publisher {
            generation,
            current: self.generation.clone(),
            snapshots: self.snapshots.clone(),
        };
        self.task = Some(tokio::spawn(run(
            self.source.clone(),
            game_id.to_owned(),
            live,
            self.intervals,
            publisher,
        )));
    }
}

impl Drop for PollerHandle {
    fn drop(&mut self) {
        self.abort_task();
        retire(&self.snapshots, &self.generation, |_| false);
    }
}

/// Bump the generation under the channel's write lock, then apply `reset`.
///
/// A [`Publisher`] checks its generation under the same lock, so it has either
/// finished writing or sees the new generation and writes nothing.
fn retire(
    snapshots: &watch::Sender<PollSnapshot>,
    generation: &AtomicU64,
    reset: impl FnOnce(&mut PollSnapshot) -> bool,
) {
    snapshots.send_if_modified(|s| {
        generation.fetch_add(1, Ordering::SeqCst);
        reset(s)
    });
}

/// Publishes only while its generation is the handle's current one.
struct Publisher {
    generation: u64,
    current: Arc<AtomicU64>,
    snapshots: Arc<watch::Sender<PollSnapshot>>,
}

impl Publisher {
    fn update(&self, modify: impl FnOnce(&mut PollSnapshot)) -> bool {
        let mut published = false;
        self.snapshots.send_if_modified(|s| {
            published = self.current.load(Ordering::SeqCst) == self.generation;
            if published {
                modify(s);
            }
            published
        });
        published
    }
}

async fn run(
    source: Arc<dyn GameSource>,
    game_id: String,
    live: bool,
    intervals: PollIntervals,
    publisher: Publisher,
) {
    let game = match source.fetch_game(&game_id).await {
        Ok(game) => game,
        Err(e) => {
            warn!("Failed to load game {game_id}: {e}");
            publisher.update(|s| {
                s.error = Some(e.to_string());
                s.loading = false;
                s.polling = false;
            });
            return;
        }
    };

    let keep_polling = live && game.is_live();
    if !publisher.update(|s| {
        s.game = Some(game);
        s.error = None;
        s.loading = false;
        s.polling = keep_polling;
    }) || !keep_polling
    {
        return;
    }

    debug!("polling live game {game_id}");
    let situation_every = intervals.situation.max(MIN_POLL_INTERVAL);
    let full_every = intervals.full.max(MIN_POLL_INTERVAL);
    let now = Instant::now();
    let mut situation_tick = interval_at(now + situation_every, situation_every);
    let mut full_tick = interval_at(now + full_every, full_every);
    situation_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    full_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            // Full refresh first: once it sees the game end, no more situation ticks.
            biased;

            _ = full_tick.tick() => {
                match source.fetch_game(&game_id).await {
                    Ok(game) => {
                        let still_live = game.is_live();
                        let published = publisher.update(|s| {
                            s.game = Some(game);
                            s.error = None;
                            s.polling = still_live;
                        });
                        if !published || !still_live {
                            debug!("stopped polling game {game_id}");
                            return;
                        }
                    }
                    Err(e) => {
                        warn!("Full refresh of game {game_id} failed: {e}");
                        if !publisher.update(|s| s.error = Some(e.to_string())) {
                            return;
                        }
                    }
                }
            }

            _ = situation_tick.tick() => {
                match source.fetch_situation(&game_id).await {
                    Ok(situation) => {
                        let published = publisher.update(|s| {
                            if let Some(game) = s.game.as_mut() {
                                game.apply_situation(situation);
                            }
                        });
                        if !published {
                            return;
                        }
                    }
                    // Background ticks stay quiet; the next full refresh reports real trouble.
                    Err(e) => debug!("Situation refresh of game {game_id} failed: {e}"),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use nfl_api::client::{ApiError, ApiResult};
    use nfl_api::{GameStatus, Situation};
    use std::collections::HashMap;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicUsize;

    /// Scripted source: each full fetch pops the next status for that game.
    #[derive(Default)]
    struct ScriptedSource {
        statuses: Mutex<HashMap<String, VecDeque<GameStatus>>>,
        full_delay: Mutex<HashMap<String, Duration>>,
        full_calls: Mutex<HashMap<String, usize>>,
        situation_calls: Mutex<HashMap<String, usize>>,
        situation_failures: AtomicUsize,
    }

    impl ScriptedSource {
        fn with_script(game_id: &str, statuses: &[GameStatus]) -> Arc<Self> {
            let source = Self::default();
            source.script(game_id, statuses);
            Arc::new(source)
        }

        fn script(&self, game_id: &str, statuses: &[GameStatus]) {
            self.statuses
                .lock()
                .unwrap()
                .insert(game_id.to_owned(), statuses.iter().copied().collect());
        }

        fn full_calls(&self, game_id: &str) -> usize {
            self.full_calls.lock().unwrap().get(game_id).copied().unwrap_or(0)
        }

        fn situation_calls(&self, game_id: &str) -> usize {
            self.situation_calls.lock().unwrap().get(game_id).copied().unwrap_or(0)
        }
    }

    #[async_trait]
    impl GameSource for ScriptedSource {
        async fn fetch_game(&self, game_id: &str) -> ApiResult<Game> {
            *self.full_calls.lock().unwrap().entry(game_id.to_owned()).or_default() += 1;
            let delay = self.full_delay.lock().unwrap().get(game_id).copied();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            let status = {
                let mut statuses = self.statuses.lock().unwrap();
                let queue = statuses.entry(game_id.to_owned()).or_default();
                // The last scripted status sticks.
                if queue.len() > 1 { queue.pop_front() } else { queue.front().copied() }
            };
            match status {
                Some(status) => Ok(Game {
                    id: game_id.to_owned(),
                    status,
                    situation: (status == Live).then(|| Situation {
                        quarter: Some(2),
                        clock: Some("5:00".into()),
                        ..Default::default()
                    }),
                    ..Default::default()
                }),
                None => Err(ApiError::NotFound(game_id.to_owned())),
            }
        }

        async fn fetch_situation(&self, game_id: &str) -> ApiResult<Situation> {
            let n = {
                let mut calls = self.situation_calls.lock().unwrap();
                let n = calls.entry(game_id.to_owned()).or_default();
                *n += 1;
                *n
            };
            if self.situation_failures.load(Ordering::SeqCst) > 0 {
                self.situation_failures.fetch_sub(1, Ordering::SeqCst);
                return Err(ApiError::Other("flaky".into()));
            }
            Ok(Situation { down: Some((n % 4) as u8 + 1), ..Default::default() })
        }

        async fn fetch_scoreboard(&self) -> ApiResult<Vec<Game>> {
            Ok(Vec::new())
        }
    }

    use GameStatus::{Final, Live, Scheduled};

    #[tokio::test(start_paused = true)]
    async fn not_live_game_is_fetched_once() {
        let source = ScriptedSource::with_script("g1", &[Scheduled]);
        let handle = PollerHandle::spawn(source.clone(), "g1", true, PollIntervals::default());
        let mut rx = handle.subscribe();
        rx.wait_for(|s| !s.loading).await.unwrap();

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(source.full_calls("g1"), 1);
        assert_eq!(source.situation_calls("g1"), 0);
        assert!(!handle.snapshot().polling);
        assert!(!handle.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn live_flag_off_suppresses_polling() {
        let source = ScriptedSource::with_script("g1", &[Live]);
        let handle = PollerHandle::spawn(source.clone(), "g1", false, PollIntervals::default());
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(source.full_calls("g1"), 1);
        assert_eq!(source.situation_calls("g1"), 0);
        assert_eq!(handle.snapshot().game.map(|g| g.status), Some(Live));
    }

    #[tokio::test(start_paused = true)]
    async fn live_game_polls_situation_between_full_refreshes() {
        let source = ScriptedSource::with_script("g1", &[Live]);
        let handle = PollerHandle::spawn(source.clone(), "g1", true, PollIntervals::default());

        tokio::time::sleep(Duration::from_secs(65)).await;
        // Full at 0, 30, 60; situation at 10, 20, 40, 50 (30 and 60 yield to the full refresh
        // only when both fire together, so allow either count there).
        assert_eq!(source.full_calls("g1"), 3);
        let situations = source.situation_calls("g1");
        assert!((4..=6).contains(&situations), "got {situations}");
        let snapshot = handle.snapshot();
        assert!(snapshot.polling);
        assert!(snapshot.game.and_then(|g| g.situation).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn final_status_stops_situation_polling() {
        let source = ScriptedSource::with_script("g1", &[Live, Final]);
        let handle = PollerHandle::spawn(source.clone(), "g1", true, PollIntervals::default());
        let mut rx = handle.subscribe();

        rx.wait_for(|s| s.game.as_ref().is_some_and(|g| g.status == Final))
            .await
            .unwrap();
        let at_final = source.situation_calls("g1");
        assert!(at_final >= 2, "situation ticks ran while live");

        tokio::time::sleep(Duration::from_secs(300)).await;
        assert_eq!(source.situation_calls("g1"), at_final);
        assert_eq!(source.full_calls("g1"), 2);
        assert!(!handle.snapshot().polling);
    }

    #[tokio::test(start_paused = true)]
    async fn situation_tick_keeps_quarter_and_clock() {
        let source = ScriptedSource::with_script("g1", &[Live]);
        let handle = PollerHandle::spawn(source.clone(), "g1", true, PollIntervals::default());

        tokio::time::sleep(Duration::from_secs(15)).await;
        assert_eq!(source.situation_calls("g1"), 1);
        let situation = handle.snapshot().game.and_then(|g| g.situation).unwrap();
        assert_eq!(situation.down, Some(2), "the tick landed");
        assert_eq!(situation.quarter, Some(2));
        assert_eq!(situation.clock.as_deref(), Some("5:00"));
    }

    #[tokio::test(start_paused = true)]
    async fn zero_interval_is_raised_to_the_minimum() {
        let source = ScriptedSource::with_script("g1", &[Live]);
        let intervals = PollIntervals { situation: Duration::ZERO, full: Duration::from_secs(30) };
        let handle = PollerHandle::spawn(source.clone(), "g1", true, intervals);

        tokio::time::sleep(Duration::from_millis(5500)).await;
        assert!(handle.is_running());
        assert!(handle.snapshot().polling);
        let situations = source.situation_calls("g1");
        assert!((4..=6).contains(&situations), "got {situations}");
    }

    #[tokio::test(start_paused = true)]
    async fn situation_errors_are_swallowed() {
        let source = ScriptedSource::with_script("g1", &[Live]);
        source.situation_failures.store(2, Ordering::SeqCst);
        let handle = PollerHandle::spawn(source.clone(), "g1", true, PollIntervals::default());

        tokio::time::sleep(Duration::from_secs(25)).await;
        let snapshot = handle.snapshot();
        assert_eq!(snapshot.error, None);
        assert!(snapshot.polling);
        assert!(snapshot.game.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn full_fetch_error_is_surfaced() {
        let source = Arc::new(ScriptedSource::default());
        let handle = PollerHandle::spawn(source.clone(), "missing", true, PollIntervals::default());
        let mut rx = handle.subscribe();
        let snapshot = rx.wait_for(|s| !s.loading).await.unwrap().clone();
        assert!(snapshot.error.is_some());
        assert!(snapshot.game.is_none());
        assert!(!snapshot.polling);
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_the_handle_clears_timers() {
        let source = ScriptedSource::with_script("g1", &[Live]);
        let handle = PollerHandle::spawn(source.clone(), "g1", true, PollIntervals::default());
        tokio::time::sleep(Duration::from_secs(25)).await;
        let (full, situations) = (source.full_calls("g1"), source.situation_calls("g1"));

        drop(handle);
        tokio::time::sleep(Duration::from_secs(300)).await;
        assert_eq!(source.full_calls("g1"), full);
        assert_eq!(source.situation_calls("g1"), situations);
    }

    #[tokio::test(start_paused = true)]
    async fn retarget_discards_old_game_entirely() {
        let source = ScriptedSource::with_script("old", &[Live]);
        source.script("new", &[Scheduled]);
        // The old game's first fetch is still in flight when we switch.
        source
            .full_delay
            .lock()
            .unwrap()
            .insert("old".into(), Duration::from_secs(5));

        let mut handle = PollerHandle::spawn(source.clone(), "old", true, PollIntervals::default());
        let mut rx = handle.subscribe();
        tokio::time::sleep(Duration::from_secs(1)).await;
        handle.retarget("new", true);

        tokio::time::sleep(Duration::from_secs(300)).await;
        let snapshot = rx.borrow_and_update().clone();
        assert_eq!(snapshot.game_id, "new");
        assert_eq!(snapshot.game.map(|g| g.id), Some("new".to_owned()));
        assert_eq!(source.full_calls("old"), 1);
        assert_eq!(source.situation_calls("old"), 0);
    }

    #[test]
    fn retired_generation_never_lands_after_the_reset() {
        for _ in 0..50 {
            let (tx, rx) = watch::channel(PollSnapshot::pending("old"));
            let snapshots = Arc::new(tx);
            let current = Arc::new(AtomicU64::new(1));
            let old = Publisher { generation: 1, current: current.clone(), snapshots: snapshots.clone() };
            let writer = std::thread::spawn(move || {
                while old.update(|s| s.error = Some("old game".into())) {}
            });

            retire(&snapshots, &current, |s| {
                *s = PollSnapshot::pending("new");
                true
            });
            writer.join().unwrap();
            let snapshot = rx.borrow().clone();
            assert_eq!(snapshot, PollSnapshot::pending("new"));
        }
    }

    #[tokio::test]
    async fn stale_publisher_cannot_write() {
        let (tx, rx) = watch::channel(PollSnapshot::pending("g1"));
        let current = Arc::new(AtomicU64::new(2));
        let stale = Publisher { generation: 1, current: current.clone(), snapshots: Arc::new(tx) };
        assert!(!stale.update(|s| s.error = Some("late".into())));
        assert_eq!(rx.borrow().error, None);
    }
}
