//! Document database access.
//!
//! Everything above this module talks to a [`DocumentStore`]; the hosted
//! database and the in-memory development store are interchangeable behind it.
//! Documents are flat JSON objects addressed by slash-separated paths
//! (`users/abc/picks/401671789`). Writes replace whole top-level fields;
//! concurrent writers to the same document resolve last-write-wins.

pub mod firestore;
pub mod memory;

use async_trait::async_trait;
use serde::{Serialize, de::DeserializeOwned};
use serde_json::{Map, Value};
use thiserror::Error;

pub use firestore::FirestoreStore;
pub use memory::MemoryStore;

/// Largest number of writes a single atomic commit may carry.
pub const MAX_BATCH_WRITES: usize = 500;

pub type Fields = Map<String, Value>;
pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Error, Debug)]
pub enum StoreError {
    /// The database could not be reached. Callers keep their last known state.
    #[error("document store offline: {0}")]
    Offline(String),

    #[error("document not found: {0}")]
    NotFound(String),

    #[error("document already exists: {0}")]
    Conflict(String),

    #[error("batch of {0} writes exceeds the limit of {MAX_BATCH_WRITES}")]
    BatchTooLarge(usize),

    #[error("document store error ({status}): {message}")]
    Remote { status: u16, message: String },

    #[error("could not decode document {path}: {message}")]
    Decode { path: String, message: String },

    #[error("invalid document id: {0:?}")]
    InvalidId(String),
}

impl StoreError {
    pub fn is_offline(&self) -> bool {
        matches!(self, StoreError::Offline(_))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub path: String,
    pub fields: Fields,
}

impl Document {
    pub fn new(path: impl Into<String>, fields: Fields) -> Self {
        let path = path.into();
        let id = path.rsplit('/').next().unwrap_or_default().to_owned();
        Self { id, path, fields }
    }

    pub fn decode<T: DeserializeOwned>(&self) -> StoreResult<T> {
        serde_json::from_value(Value::Object(self.fields.clone())).map_err(|e| StoreError::Decode {
            path: self.path.clone(),
            message: e.to_string(),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Write {
    Set { path: String, fields: Fields, merge: bool },
    Delete { path: String },
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get(&self, path: &str) -> StoreResult<Option<Document>>;

    /// All documents directly inside `collection` (not nested subcollections).
    async fn list(&self, collection: &str) -> StoreResult<Vec<Document>>;

    /// With `merge`, only the given top-level fields are replaced.
    async fn set(&self, path: &str, fields: Fields, merge: bool) -> StoreResult<()>;

    /// Create the document only if absent. Returns whether it was created.
    async fn create(&self, path: &str, fields: Fields) -> StoreResult<bool>;

    async fn delete(&self, path: &str) -> StoreResult<()>;

    /// Apply up to [`MAX_BATCH_WRITES`] writes atomically.
    async fn commit(&self, writes: Vec<Write>) -> StoreResult<()>;
}

/// Serialize a value into top-level document fields.
pub fn to_fields<T: Serialize>(value: &T) -> StoreResult<Fields> {
    match serde_json::to_value(value) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(StoreError::Decode {
            path: String::new(),
            message: format!("expected an object, got {other}"),
        }),
        Err(e) => Err(StoreError::Decode { path: String::new(), message: e.to_string() }),
    }
}

pub async fn get_as<T: DeserializeOwned>(
    store: &dyn DocumentStore,
    path: &str,
) -> StoreResult<Option<T>> {
    match store.get(path).await? {
        Some(doc) => doc.decode().map(Some),
        None => Ok(None),
    }
}

/// Collection and document paths used by the application.
///
/// The builders below join ids verbatim; ids that come from a request go
/// through [`doc_id`] first.
pub mod paths {
    use super::{StoreError, StoreResult};

    pub const USERS: &str = "users";
    pub const WEEK_RECAPS: &str = "weekRecaps";
    pub const GAMES: &str = "games";
    pub const LIVE_GAMES: &str = "liveGames";
    pub const TEAM_COLOR_MAPPINGS: &str = "teamColorMappings";

    pub fn user(user_id: &str) -> String {
        format!("{USERS}/{user_id}")
    }

    pub fn picks(user_id: &str) -> String {
        format!("{USERS}/{user_id}/picks")
    }

    pub fn pick(user_id: &str, game_id: &str) -> String {
        format!("{USERS}/{user_id}/picks/{game_id}")
    }

    pub fn clipboard_visibility(user_id: &str) -> String {
        format!("{USERS}/{user_id}/settings/clipboard-visibility")
    }

    pub fn team_color_mapping(abbreviation: &str) -> String {
        format!("{TEAM_COLOR_MAPPINGS}/{abbreviation}")
    }

    pub fn live_game(game_id: &str) -> String {
        format!("{LIVE_GAMES}/{game_id}")
    }

    /// Accept `id` only if it names exactly one document: non-empty, no `/`,
    /// not `.` or `..`, and not a reserved `__name__` id.
    pub fn doc_id(id: &str) -> StoreResult<&str> {
        let reserved = id.len() >= 4 && id.starts_with("__") && id.ends_with("__");
        if id.is_empty() || id.contains('/') || id == "." || id == ".." || reserved {
            return Err(StoreError::InvalidId(id.to_owned()));
        }
        Ok(id)
    }

    /// Split `a/b/c/d` into (`a/b/c`, `d`).
    pub fn split(path: &str) -> (&str, &str) {
        path.rsplit_once('/').unwrap_or(("", path))
    }
}
