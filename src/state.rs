use std::sync::Arc;

use log::{info, warn};
use nfl_api::client::{ESPN_CORE, ESPN_SITE_V2, ESPN_V2, NflApi};

use crate::auth::MagicLinkSigner;
use crate::config::Config;
use crate::email::Mailer;
use crate::live::PollIntervals;
use crate::movies::MovieClient;
use crate::store::{DocumentStore, FirestoreStore, MemoryStore};
use crate::style::{MappingSet, TeamStyleCache};

/// Everything a request handler needs. Built once at startup and shared.
pub struct AppState {
    pub config: Config,
    pub nfl: Arc<NflApi>,
    pub store: Arc<dyn DocumentStore>,
    pub styles: Arc<TeamStyleCache>,
    pub mailer: Mailer,
    pub movies: MovieClient,
    pub magic_links: Option<MagicLinkSigner>,
}

impl AppState {
    pub fn new(config: Config) -> Arc<Self> {
        let nfl = if config.espn_site_url.is_some()
            || config.espn_v2_url.is_some()
            || config.espn_core_url.is_some()
        {
            NflApi::with_base_urls(
                config.espn_site_url.as_deref().unwrap_or(ESPN_SITE_V2),
                config.espn_v2_url.as_deref().unwrap_or(ESPN_V2),
                config.espn_core_url.as_deref().unwrap_or(ESPN_CORE),
            )
        } else {
            NflApi::new()
        };

        let store: Arc<dyn DocumentStore> = match &config.firestore_project_id {
            Some(project) => {
                info!("Using Firestore project {project}");
                Arc::new(FirestoreStore::new(
                    &config.firestore_url,
                    project,
                    config.firestore_token.clone(),
                ))
            }
            None => {
                warn!("FIRESTORE_PROJECT_ID not set, using the in-memory store; data is lost on restart");
                Arc::new(MemoryStore::new())
            }
        };

        Self::from_parts(config, nfl, store)
    }

    pub fn from_parts(config: Config, nfl: NflApi, store: Arc<dyn DocumentStore>) -> Arc<Self> {
        let styles = Arc::new(TeamStyleCache::new(store.clone()));
        styles.subscribe(Arc::new(|set: &MappingSet| -> anyhow::Result<()> {
            info!("Team color mappings updated ({} teams)", set.len());
            Ok(())
        }));

        Arc::new(Self {
            mailer: Mailer::new(
                &config.resend_url,
                config.resend_api_key.clone(),
                config.resend_audience_id.clone(),
                &config.email_from,
            ),
            movies: MovieClient::new(&config.tmdb_url, config.tmdb_api_key.clone()),
            magic_links: config.magic_link_secret.as_deref().map(MagicLinkSigner::new),
            nfl: Arc::new(nfl),
            store,
            styles,
            config,
        })
    }

    pub fn poll_intervals(&self) -> PollIntervals {
        PollIntervals {
            situation: self.config.situation_interval,
            full: self.config.full_refresh_interval,
        }
    }
}
