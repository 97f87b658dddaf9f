use crate::store::{self, DocumentStore, Fields, StoreError, StoreResult, paths};
use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UserProfile {
    pub email: String,
    pub display_name: Option<String>,
    pub movie_picks: Vec<MoviePick>,
    pub super_bowl_pick: Option<SuperBowlPick>,
    /// Opted in to reminder emails.
    pub notifications: bool,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoviePick {
    pub movie_id: u64,
    pub title: String,
    pub poster_path: Option<String>,
}

/// Team abbreviations for each conference champion and the winner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuperBowlPick {
    pub afc: String,
    pub nfc: String,
    pub winner: String,
}

impl SuperBowlPick {
    pub fn is_consistent(&self) -> bool {
        self.winner == self.afc || self.winner == self.nfc
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    #[serde(flatten)]
    pub profile: UserProfile,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClipboardVisibility {
    pub visible: bool,
}

impl Default for ClipboardVisibility {
    fn default() -> Self {
        Self { visible: true }
    }
}

/// Create the user if absent, otherwise refresh email and display name.
///
/// The create is a single create-if-absent call, so two racing sign-ins agree
/// on which one saw `created == true`.
pub async fn upsert_user(
    store: &dyn DocumentStore,
    user_id: &str,
    email: &str,
    display_name: Option<&str>,
) -> StoreResult<(UserProfile, bool)> {
    let path = paths::user(user_id);
    let fresh = UserProfile {
        email: email.to_owned(),
        display_name: display_name.map(str::to_owned),
        notifications: true,
        created_at: Some(Utc::now()),
        ..Default::default()
    };

    let created = store.create(&path, store::to_fields(&fresh)?).await?;
    if created {
        info!("created user {user_id}");
        return Ok((fresh, true));
    }

    let mut update = Fields::new();
    update.insert("email".into(), json!(email));
    if let Some(name) = display_name {
        update.insert("displayName".into(), json!(name));
    }
    store.set(&path, update, true).await?;
    let profile = get_profile(store, user_id)
        .await?
        .ok_or_else(|| StoreError::NotFound(path))?;
    Ok((profile, false))
}

pub async fn get_profile(store: &dyn DocumentStore, user_id: &str) -> StoreResult<Option<UserProfile>> {
    store::get_as(store, &paths::user(user_id)).await
}

/// Every user document that decodes. Malformed ones are logged and skipped.
pub async fn list_users(store: &dyn DocumentStore) -> StoreResult<Vec<User>> {
    let docs = store.list(paths::USERS).await?;
    Ok(docs
        .into_iter()
        .filter_map(|doc| match doc.decode::<UserProfile>() {
            Ok(profile) => Some(User { id: doc.id, profile }),
            Err(e) => {
                warn!("Skipping user: {e}");
                None
            }
        })
        .collect())
}

async fn set_field(store: &dyn DocumentStore, user_id: &str, field: &str, value: Value) -> StoreResult<()> {
    let mut fields = Fields::new();
    fields.insert(field.to_owned(), value);
    store.set(&paths::user(user_id), fields, true).await
}

pub async fn set_movie_picks(store: &dyn DocumentStore, user_id: &str, picks: &[MoviePick]) -> StoreResult<()> {
    set_field(store, user_id, "moviePicks", json!(picks)).await
}

pub async fn set_super_bowl_pick(
    store: &dyn DocumentStore,
    user_id: &str,
    pick: Option<&SuperBowlPick>,
) -> StoreResult<()> {
    set_field(store, user_id, "superBowlPick", json!(pick)).await
}

pub async fn set_notifications(store: &dyn DocumentStore, user_id: &str, enabled: bool) -> StoreResult<()> {
    set_field(store, user_id, "notifications", json!(enabled)).await
}

pub async fn clipboard_visibility(store: &dyn DocumentStore, user_id: &str) -> StoreResult<ClipboardVisibility> {
    Ok(store::get_as(store, &paths::clipboard_visibility(user_id))
        .await?
        .unwrap_or_default())
}

pub async fn set_clipboard_visibility(
    store: &dyn DocumentStore,
    user_id: &str,
    setting: ClipboardVisibility,
) -> StoreResult<()> {
    store
        .set(&paths::clipboard_visibility(user_id), store::to_fields(&setting)?, false)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;

    #[tokio::test]
    async fn upsert_reports_creation_once() {
        let store = MemoryStore::new();
        let (profile, created) = upsert_user(&store, "u1", "a@x.com", Some("Al")).await.unwrap();
        assert!(created);
        assert!(profile.notifications);

        set_notifications(&store, "u1", false).await.unwrap();
        let (profile, created) = upsert_user(&store, "u1", "new@x.com", None).await.unwrap();
        assert!(!created);
        assert_eq!(profile.email, "new@x.com");
        assert_eq!(profile.display_name.as_deref(), Some("Al"));
        assert!(!profile.notifications, "existing settings survive a sign-in");
    }

    #[tokio::test]
    async fn concurrent_upserts_create_exactly_once() {
        let store = MemoryStore::new();
        let (a, b) = tokio::join!(
            upsert_user(&store, "u1", "a@x.com", None),
            upsert_user(&store, "u1", "a@x.com", None)
        );
        let created = [a.unwrap().1, b.unwrap().1];
        assert_eq!(created.iter().filter(|c| **c).count(), 1);
    }

    #[tokio::test]
    async fn profile_fields_are_written_whole() {
        let store = MemoryStore::new();
        upsert_user(&store, "u1", "a@x.com", None).await.unwrap();
        let picks = vec![MoviePick { movie_id: 603, title: "The Matrix".into(), poster_path: None }];
        set_movie_picks(&store, "u1", &picks).await.unwrap();
        let sb = SuperBowlPick { afc: "KC".into(), nfc: "PHI".into(), winner: "KC".into() };
        set_super_bowl_pick(&store, "u1", Some(&sb)).await.unwrap();

        let profile = get_profile(&store, "u1").await.unwrap().unwrap();
        assert_eq!(profile.movie_picks, picks);
        assert_eq!(profile.super_bowl_pick, Some(sb));
        assert_eq!(profile.email, "a@x.com");

        set_super_bowl_pick(&store, "u1", None).await.unwrap();
        assert_eq!(get_profile(&store, "u1").await.unwrap().unwrap().super_bowl_pick, None);
    }

    #[tokio::test]
    async fn list_skips_malformed_users() {
        let store = MemoryStore::new();
        upsert_user(&store, "good", "g@x.com", None).await.unwrap();
        let mut bad = Fields::new();
        bad.insert("email".into(), json!(42));
        store.set("users/bad", bad, false).await.unwrap();

        let users = list_users(&store).await.unwrap();
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].id, "good");
    }

    #[tokio::test]
    async fn clipboard_visibility_defaults_to_visible() {
        let store = MemoryStore::new();
        assert!(clipboard_visibility(&store, "u1").await.unwrap().visible);
        set_clipboard_visibility(&store, "u1", ClipboardVisibility { visible: false }).await.unwrap();
        assert!(!clipboard_visibility(&store, "u1").await.unwrap().visible);
    }

    #[test]
    fn super_bowl_winner_must_be_a_finalist() {
        let pick = SuperBowlPick { afc: "KC".into(), nfc: "PHI".into(), winner: "SF".into() };
        assert!(!pick.is_consistent());
    }
}
