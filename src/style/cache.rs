use super::{TeamColorMapping, TeamStyle, resolve_style};
use crate::store::{DocumentStore, MAX_BATCH_WRITES, StoreError, Write, paths, to_fields};
use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use log::{debug, error, warn};
use nfl_api::Team;
use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

/// Mappings keyed by upper-case team abbreviation.
pub type MappingSet = Arc<HashMap<String, TeamColorMapping>>;

type LoadResult = Result<MappingSet, Arc<StoreError>>;
type LoadFuture = Shared<BoxFuture<'static, LoadResult>>;

#[derive(Error, Debug, Clone)]
pub enum StyleError {
    #[error("team color mappings unavailable: {0}")]
    Store(Arc<StoreError>),

    #[error("team style cache has been disposed")]
    Disposed,
}

/// Notified after every successful [`TeamStyleCache::set_mappings`].
///
/// A failing or panicking listener is logged and does not affect the others.
pub trait MappingListener: Send + Sync {
    fn mappings_changed(&self, mappings: &MappingSet) -> anyhow::Result<()>;
}

impl<F> MappingListener for F
where
    F: Fn(&MappingSet) -> anyhow::Result<()> + Send + Sync,
{
    fn mappings_changed(&self, mappings: &MappingSet) -> anyhow::Result<()> {
        self(mappings)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

enum CacheState {
    Unloaded,
    Loading {
        generation: u64,
        future: LoadFuture,
        previous: Option<MappingSet>,
    },
    Loaded(MappingSet),
    Disposed,
}

/// Lazily loaded cache of team color mappings.
///
/// `UNLOADED → LOADING → LOADED`; a loaded cache only goes back to loading via
/// [`force_reload`](Self::force_reload) or [`set_mappings`](Self::set_mappings).
/// Callers arriving while a load is in flight share it, so there is never more
/// than one outstanding fetch.
pub struct TeamStyleCache {
    store: Arc<dyn DocumentStore>,
    state: Mutex<CacheState>,
    generation: AtomicU64,
    listeners: Mutex<Vec<(SubscriptionId, Arc<dyn MappingListener>)>>,
    next_subscription: AtomicU64,
}

impl TeamStyleCache {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            store,
            state: Mutex::new(CacheState::Unloaded),
            generation: AtomicU64::new(0),
            listeners: Mutex::new(Vec::new()),
            next_subscription: AtomicU64::new(0),
        }
    }

    /// Current mappings, loading them on first use.
    pub async fn mappings(&self) -> Result<MappingSet, StyleError> {
        let (generation, future, previous) = {
            let mut state = self.lock_state();
            let in_flight = match &*state {
                CacheState::Loaded(set) => return Ok(set.clone()),
                CacheState::Disposed => return Err(StyleError::Disposed),
                CacheState::Loading { generation, future, previous } => {
                    Some((*generation, future.clone(), previous.clone()))
                }
                CacheState::Unloaded => None,
            };
            match in_flight {
                Some(pending) => pending,
                None => self.begin(&mut state, self.load_future(), None),
            }
        };
        self.settle(generation, future, previous).await
    }

    /// Skip the cached value and fetch again. Joins a load already in flight.
    pub async fn force_reload(&self) -> Result<MappingSet, StyleError> {
        let (generation, future, previous) = {
            let mut state = self.lock_state();
            let (in_flight, previous) = match &*state {
                CacheState::Disposed => return Err(StyleError::Disposed),
                CacheState::Loading { generation, future, previous } => {
                    (Some((*generation, future.clone(), previous.clone())), None)
                }
                CacheState::Loaded(set) => (None, Some(set.clone())),
                CacheState::Unloaded => (None, None),
            };
            match in_flight {
                Some(pending) => pending,
                None => self.begin(&mut state, self.load_future(), previous),
            }
        };
        self.settle(generation, future, previous).await
    }

    /// Drop the cached value; the next read loads again.
    pub fn invalidate(&self) {
        let mut state = self.lock_state();
        if !matches!(*state, CacheState::Disposed) {
            *state = CacheState::Unloaded;
        }
    }

    /// Release the cache and all listeners. Every later call fails with `Disposed`.
    pub fn dispose(&self) {
        *self.lock_state() = CacheState::Disposed;
        self.lock_listeners().clear();
    }

    /// Persist the full mapping set, replace the cache, then notify each listener once.
    pub async fn set_mappings(
        &self,
        mappings: Vec<TeamColorMapping>,
    ) -> Result<MappingSet, StyleError> {
        let set: MappingSet = Arc::new(
            mappings
                .into_iter()
                .map(|m| {
                    let key = m.abbreviation.to_uppercase();
                    (key.clone(), TeamColorMapping { abbreviation: key, ..m })
                })
                .collect(),
        );

        let (generation, future, previous) = {
            let mut state = self.lock_state();
            let previous = match &*state {
                CacheState::Disposed => return Err(StyleError::Disposed),
                CacheState::Loaded(current) => Some(current.clone()),
                CacheState::Loading { previous, .. } => previous.clone(),
                CacheState::Unloaded => None,
            };
            let future = persist(self.store.clone(), set.clone(), previous.clone())
                .boxed()
                .shared();
            self.begin(&mut state, future, previous)
        };

        let stored = self.settle(generation, future, previous).await?;
        if !Arc::ptr_eq(&stored, &set) {
            // Offline: the write never landed and the old set is still current.
            return Err(StyleError::Store(Arc::new(StoreError::Offline(
                "team color mappings not saved".into(),
            ))));
        }
        self.notify(&stored);
        Ok(stored)
    }

    pub fn subscribe(&self, listener: Arc<dyn MappingListener>) -> SubscriptionId {
        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::Relaxed));
        self.lock_listeners().push((id, listener));
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut listeners = self.lock_listeners();
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    /// Style for a team, falling back to the contrast policy when mappings can't load.
    pub async fn style_for(&self, team: &Team) -> TeamStyle {
        match self.mappings().await {
            Ok(set) => resolve_style(team, set.get(&team.abbreviation.to_uppercase())),
            Err(e) => {
                warn!("Using fallback style for {}: {e}", team.abbreviation);
                resolve_style(team, None)
            }
        }
    }

    fn load_future(&self) -> LoadFuture {
        load(self.store.clone()).boxed().shared()
    }

    fn begin(
        &self,
        state: &mut CacheState,
        future: LoadFuture,
        previous: Option<MappingSet>,
    ) -> (u64, LoadFuture, Option<MappingSet>) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        *state = CacheState::Loading {
            generation,
            future: future.clone(),
            previous: previous.clone(),
        };
        (generation, future, previous)
    }

    /// Await a load and, if it is still the current one, commit its outcome.
    async fn settle(
        &self,
        generation: u64,
        future: LoadFuture,
        previous: Option<MappingSet>,
    ) -> Result<MappingSet, StyleError> {
        let result = future.await;
        let outcome = match result {
            Ok(set) => Ok(set),
            Err(e) if e.is_offline() && previous.is_some() => {
                warn!("Document store offline, keeping last known team color mappings");
                Ok(previous.clone().unwrap_or_default())
            }
            Err(e) => Err(e),
        };

        let mut state = self.lock_state();
        let current = matches!(&*state, CacheState::Loading { generation: g, .. } if *g == generation);
        if current {
            *state = match &outcome {
                Ok(set) => CacheState::Loaded(set.clone()),
                Err(_) => match previous {
                    Some(prev) => CacheState::Loaded(prev),
                    None => CacheState::Unloaded,
                },
            };
        }
        outcome.map_err(StyleError::Store)
    }

    fn notify(&self, set: &MappingSet) {
        let listeners: Vec<_> = self.lock_listeners().iter().map(|(_, l)| l.clone()).collect();
        for listener in listeners {
            match catch_unwind(AssertUnwindSafe(|| listener.mappings_changed(set))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!("Team color mapping listener failed: {e:#}"),
                Err(_) => error!("Team color mapping listener panicked"),
            }
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_listeners(&self) -> MutexGuard<'_, Vec<(SubscriptionId, Arc<dyn MappingListener>)>> {
        self.listeners.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

async fn load(store: Arc<dyn DocumentStore>) -> LoadResult {
    let docs = store
        .list(paths::TEAM_COLOR_MAPPINGS)
        .await
        .map_err(Arc::new)?;

    let mut set = HashMap::with_capacity(docs.len());
    for doc in docs {
        match doc.decode::<TeamColorMapping>() {
            Ok(mapping) => {
                set.insert(mapping.abbreviation.to_uppercase(), mapping);
            }
            Err(e) => warn!("Skipping malformed team color mapping: {e}"),
        }
    }
    debug!("loaded {} team color mappings", set.len());
    Ok(Arc::new(set))
}

/// Write every mapping and delete those no longer present, in as few batches as fit.
async fn persist(
    store: Arc<dyn DocumentStore>,
    set: MappingSet,
    previous: Option<MappingSet>,
) -> LoadResult {
    let mut writes = Vec::with_capacity(set.len());
    for (abbreviation, mapping) in set.iter() {
        let fields = to_fields(mapping).map_err(Arc::new)?;
        writes.push(Write::Set {
            path: paths::team_color_mapping(abbreviation),
            fields,
            merge: false,
        });
    }
    for stale in previous.iter().flat_map(|p| p.keys()).filter(|k| !set.contains_key(*k)) {
        writes.push(Write::Delete { path: paths::team_color_mapping(stale) });
    }

    let mut remaining = writes;
    while !remaining.is_empty() {
        let rest = remaining.split_off(remaining.len().min(MAX_BATCH_WRITES));
        store.commit(remaining).await.map_err(Arc::new)?;
        remaining = rest;
    }
    Ok(set)
}
