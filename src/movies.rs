//! Movie metadata proxy (TMDB v3). The access key never leaves the server.

use reqwest::{Client, StatusCode, Url};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MovieError {
    #[error("TMDB_API_KEY is not configured")]
    NotConfigured,

    #[error("Search query must not be empty")]
    EmptyQuery,

    #[error("Movie {0} not found")]
    NotFound(u64),

    #[error("Movie service unreachable: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Movie service error ({0})")]
    Upstream(u16),

    #[error("Invalid movie service URL: {0}")]
    Url(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MovieSummary {
    pub id: u64,
    pub title: String,
    #[serde(default, alias = "release_date")]
    pub release_date: Option<String>,
    #[serde(default, alias = "poster_path")]
    pub poster_path: Option<String>,
    #[serde(default)]
    pub overview: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Genre {
    pub id: u64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MovieDetails {
    pub id: u64,
    pub title: String,
    #[serde(default)]
    pub overview: Option<String>,
    #[serde(default, alias = "release_date")]
    pub release_date: Option<String>,
    #[serde(default)]
    pub runtime: Option<u32>,
    #[serde(default, alias = "poster_path")]
    pub poster_path: Option<String>,
    #[serde(default)]
    pub genres: Vec<Genre>,
    #[serde(default, alias = "vote_average")]
    pub vote_average: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct SearchPage {
    #[serde(default)]
    results: Vec<MovieSummary>,
}

#[derive(Debug, Clone)]
pub struct MovieClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl MovieClient {
    pub fn new(base_url: &str, api_key: Option<String>) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
            base_url: base_url.trim_end_matches('/').to_owned(),
            api_key,
        }
    }

    pub async fn search(&self, query: &str) -> Result<Vec<MovieSummary>, MovieError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(MovieError::EmptyQuery);
        }
        let page: SearchPage = self
            .get("/search/movie", &[("query", query), ("include_adult", "false")])
            .await?
            .ok_or(MovieError::Upstream(StatusCode::NOT_FOUND.as_u16()))?;
        Ok(page.results)
    }

    pub async fn details(&self, id: u64) -> Result<MovieDetails, MovieError> {
        self.get(&format!("/movie/{id}"), &[])
            .await?
            .ok_or(MovieError::NotFound(id))
    }

    /// `Ok(None)` on 404.
    async fn get<T: DeserializeOwned>(&self, path: &str, params: &[(&str, &str)]) -> Result<Option<T>, MovieError> {
        let key = self.api_key.as_deref().ok_or(MovieError::NotConfigured)?;
        let mut all = vec![("api_key", key)];
        all.extend_from_slice(params);
        let url = Url::parse_with_params(&format!("{}{path}", self.base_url), &all)
            .map_err(|e| MovieError::Url(e.to_string()))?;

        let response = self.client.get(url).send().await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => Ok(Some(response.json().await?)),
            status => Err(MovieError::Upstream(status.as_u16())),
        }
    }
}
