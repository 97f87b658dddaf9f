//! Firestore v1 REST backend.
//!
//! Firestore wraps every value in a type tag (`{"stringValue": "x"}`,
//! `{"integerValue": "3"}`, ...). Documents cross this module as plain JSON
//! objects; the tagging is confined to `encode_value` / `decode_value`.

use super::{
    Document, DocumentStore, Fields, MAX_BATCH_WRITES, StoreError, StoreResult, Write, paths,
};
use async_trait::async_trait;
use log::debug;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode, Url};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use std::time::Duration;

const LIST_PAGE_SIZE: u32 = 300;

#[derive(Debug, Clone)]
pub struct FirestoreStore {
    client: Client,
    timeout: Duration,
    base_url: String,
    project_id: String,
    token: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct RawDocument {
    name: String,
    #[serde(default)]
    fields: Map<String, Value>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct ListResponse {
    #[serde(default)]
    documents: Vec<RawDocument>,
    next_page_token: Option<String>,
}

impl FirestoreStore {
    pub fn new(base_url: &str, project_id: &str, token: Option<String>) -> Self {
        Self {
            client: Client::new(),
            timeout: Duration::from_secs(10),
            base_url: base_url.trim_end_matches('/').to_owned(),
            project_id: project_id.to_owned(),
            token,
        }
    }

    /// `projects/{p}/databases/(default)/documents`, the prefix of every document name.
    fn root_name(&self) -> String {
        format!("projects/{}/databases/(default)/documents", self.project_id)
    }

    fn document_name(&self, path: &str) -> String {
        format!("{}/{path}", self.root_name())
    }

    fn url(&self, suffix: &str) -> String {
        format!("{}/{}{suffix}", self.base_url, self.root_name())
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let builder = self.client.request(method, url).timeout(self.timeout);
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send(&self, builder: RequestBuilder, context: &str) -> StoreResult<Response> {
        let response = builder.send().await.map_err(|e| {
            if e.is_connect() || e.is_timeout() {
                StoreError::Offline(format!("{context}: {e}"))
            } else {
                StoreError::Remote { status: 0, message: format!("{context}: {e}") }
            }
        })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(match status {
            StatusCode::NOT_FOUND => StoreError::NotFound(context.to_owned()),
            StatusCode::CONFLICT => StoreError::Conflict(context.to_owned()),
            _ => StoreError::Remote { status: status.as_u16(), message: body },
        })
    }

    fn parse_url(raw: &str) -> StoreResult<Url> {
        Url::parse(raw).map_err(|e| StoreError::Remote { status: 0, message: format!("bad url {raw}: {e}") })
    }

    fn decode_document(&self, raw: RawDocument) -> Document {
        let prefix = format!("{}/", self.root_name());
        let path = raw.name.strip_prefix(&prefix).unwrap_or(&raw.name).to_owned();
        Document::new(path, decode_fields(&raw.fields))
    }

    fn encode_write(&self, write: &Write) -> Value {
        match write {
            Write::Set { path, fields, merge } => {
                let mut w = json!({
                    "update": { "name": self.document_name(path), "fields": encode_fields(fields) }
                });
                if *merge {
                    w["updateMask"] = json!({ "fieldPaths": fields.keys().collect::<Vec<_>>() });
                }
                w
            }
            Write::Delete { path } => json!({ "delete": self.document_name(path) }),
        }
    }
}

#[async_trait]
impl DocumentStore for FirestoreStore {
    async fn get(&self, path: &str) -> StoreResult<Option<Document>> {
        let url = Self::parse_url(&self.url(&format!("/{path}")))?;
        match self.send(self.request(Method::GET, url), path).await {
            Ok(response) => {
                let raw: RawDocument = response.json().await.map_err(|e| StoreError::Decode {
                    path: path.to_owned(),
                    message: e.to_string(),
                })?;
                Ok(Some(self.decode_document(raw)))
            }
            Err(StoreError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn list(&self, collection: &str) -> StoreResult<Vec<Document>> {
        let mut documents = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut params = vec![("pageSize", LIST_PAGE_SIZE.to_string())];
            if let Some(token) = &page_token {
                params.push(("pageToken", token.clone()));
            }
            let url = Url::parse_with_params(&self.url(&format!("/{collection}")), &params)
                .map_err(|e| StoreError::Remote { status: 0, message: e.to_string() })?;

            let page: ListResponse = match self.send(self.request(Method::GET, url), collection).await {
                Ok(response) => response.json().await.map_err(|e| StoreError::Decode {
                    path: collection.to_owned(),
                    message: e.to_string(),
                })?,
                // Firestore answers 404 for a collection that never had documents.
                Err(StoreError::NotFound(_)) => ListResponse::default(),
                Err(e) => return Err(e),
            };

            documents.extend(page.documents.into_iter().map(|raw| self.decode_document(raw)));
            match page.next_page_token.filter(|t| !t.is_empty()) {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }
        debug!("listed {} documents from {collection}", documents.len());
        Ok(documents)
    }

    async fn set(&self, path: &str, fields: Fields, merge: bool) -> StoreResult<()> {
        let mut url = Self::parse_url(&self.url(&format!("/{path}")))?;
        if merge {
            let mut query = url.query_pairs_mut();
            for key in fields.keys() {
                query.append_pair("updateMask.fieldPaths", key);
            }
        }
        let body = json!({ "fields": encode_fields(&fields) });
        self.send(self.request(Method::PATCH, url).json(&body), path).await?;
        Ok(())
    }

    async fn create(&self, path: &str, fields: Fields) -> StoreResult<bool> {
        let (collection, id) = paths::split(path);
        let url = Url::parse_with_params(&self.url(&format!("/{collection}")), &[("documentId", id)])
            .map_err(|e| StoreError::Remote { status: 0, message: e.to_string() })?;
        let body = json!({ "fields": encode_fields(&fields) });
        match self.send(self.request(Method::POST, url).json(&body), path).await {
            Ok(_) => Ok(true),
            Err(StoreError::Conflict(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn delete(&self, path: &str) -> StoreResult<()> {
        let url = Self::parse_url(&self.url(&format!("/{path}")))?;
        match self.send(self.request(Method::DELETE, url), path).await {
            Ok(_) | Err(StoreError::NotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn commit(&self, writes: Vec<Write>) -> StoreResult<()> {
        if writes.len() > MAX_BATCH_WRITES {
            return Err(StoreError::BatchTooLarge(writes.len()));
        }
        if writes.is_empty() {
            return Ok(());
        }
        let url = Self::parse_url(&self.url(":commit"))?;
        let body = json!({
            "writes": writes.iter().map(|w| self.encode_write(w)).collect::<Vec<_>>()
        });
        self.send(self.request(Method::POST, url).json(&body), "commit").await?;
        debug!("committed {} writes", writes.len());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Value tagging
// ---------------------------------------------------------------------------

fn encode_fields(fields: &Fields) -> Value {
    Value::Object(fields.iter().map(|(k, v)| (k.clone(), encode_value(v))).collect())
}

fn encode_value(value: &Value) -> Value {
    match value {
        Value::Null => json!({ "nullValue": null }),
        Value::Bool(b) => json!({ "booleanValue": b }),
        Value::Number(n) => match n.as_i64() {
            Some(i) => json!({ "integerValue": i.to_string() }),
            None => json!({ "doubleValue": n.as_f64().unwrap_or_default() }),
        },
        Value::String(s) => json!({ "stringValue": s }),
        Value::Array(items) => {
            json!({ "arrayValue": { "values": items.iter().map(encode_value).collect::<Vec<_>>() } })
        }
        Value::Object(map) => json!({ "mapValue": { "fields": encode_fields(map) } }),
    }
}

fn decode_fields(fields: &Map<String, Value>) -> Fields {
    fields.iter().map(|(k, v)| (k.clone(), decode_value(v))).collect()
}

fn decode_value(tagged: &Value) -> Value {
    let Some((tag, inner)) = tagged.as_object().and_then(|m| m.iter().next()) else {
        return Value::Null;
    };
    match tag.as_str() {
        "integerValue" => inner
            .as_str()
            .and_then(|s| s.parse::<i64>().ok())
            .map(Value::from)
            .unwrap_or_else(|| inner.clone()),
        "arrayValue" => Value::Array(
            inner
                .get("values")
                .and_then(Value::as_array)
                .map(|values| values.iter().map(decode_value).collect())
                .unwrap_or_default(),
        ),
        "mapValue" => Value::Object(
            inner
                .get("fields")
                .and_then(Value::as_object)
                .map(decode_fields)
                .unwrap_or_default(),
        ),
        "nullValue" => Value::Null,
        // stringValue, booleanValue, doubleValue, timestampValue, referenceValue, bytesValue, geoPointValue
        _ => inner.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    const DOCS: &str = "/projects/demo/databases/(default)/documents";

    fn fields(value: Value) -> Fields {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn values_survive_tagging() {
        let original = json!({
            "email": "a@x.com",
            "notifications": true,
            "week": 7,
            "ratio": 0.5,
            "moviePicks": [{"id": 603, "title": "The Matrix"}],
            "superBowlPick": null
        });
        let encoded = encode_fields(original.as_object().unwrap());
        assert_eq!(encoded["week"], json!({"integerValue": "7"}));
        assert_eq!(encoded["ratio"], json!({"doubleValue": 0.5}));
        let decoded = decode_fields(encoded.as_object().unwrap());
        assert_eq!(Value::Object(decoded), original);
    }

    #[test]
    fn timestamps_decode_to_strings() {
        let tagged = json!({"timestampValue": "2025-09-07T17:00:00Z"});
        assert_eq!(decode_value(&tagged), json!("2025-09-07T17:00:00Z"));
    }

    #[tokio::test]
    async fn get_strips_document_prefix_and_handles_missing() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", format!("{DOCS}/users/abc").as_str())
            .match_header("authorization", "Bearer tok")
            .with_header("content-type", "application/json")
            .with_body(format!(
                r#"{{"name": "projects/demo/databases/(default)/documents/users/abc",
                     "fields": {{"email": {{"stringValue": "a@x.com"}}}}}}"#
            ))
            .create_async()
            .await;
        server
            .mock("GET", format!("{DOCS}/users/missing").as_str())
            .with_status(404)
            .create_async()
            .await;

        let store = FirestoreStore::new(&server.url(), "demo", Some("tok".into()));
        let doc = store.get("users/abc").await.unwrap().unwrap();
        assert_eq!(doc.path, "users/abc");
        assert_eq!(doc.id, "abc");
        assert_eq!(doc.fields.get("email"), Some(&json!("a@x.com")));
        assert!(store.get("users/missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_follows_page_tokens() {
        let mut server = mockito::Server::new_async().await;
        let first = server
            .mock("GET", format!("{DOCS}/games").as_str())
            .match_query(Matcher::Exact("pageSize=300".into()))
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"documents": [{"name": "projects/demo/databases/(default)/documents/games/1"}],
                    "nextPageToken": "p2"}"#,
            )
            .expect(1)
            .create_async()
            .await;
        let second = server
            .mock("GET", format!("{DOCS}/games").as_str())
            .match_query(Matcher::Exact("pageSize=300&pageToken=p2".into()))
            .with_header("content-type", "application/json")
            .with_body(r#"{"documents": [{"name": "projects/demo/databases/(default)/documents/games/2"}]}"#)
            .expect(1)
            .create_async()
            .await;

        let store = FirestoreStore::new(&server.url(), "demo", None);
        let docs = store.list("games").await.unwrap();
        let ids: Vec<_> = docs.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2"]);
        second.assert_async().await;
        first.assert_async().await;
    }

    #[tokio::test]
    async fn create_maps_conflict_to_false() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", format!("{DOCS}/users").as_str())
            .match_query(Matcher::UrlEncoded("documentId".into(), "abc".into()))
            .with_status(409)
            .create_async()
            .await;

        let store = FirestoreStore::new(&server.url(), "demo", None);
        assert!(!store.create("users/abc", Fields::new()).await.unwrap());
    }

    #[tokio::test]
    async fn merge_set_sends_update_mask() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("PATCH", format!("{DOCS}/users/abc").as_str())
            .match_query(Matcher::UrlEncoded("updateMask.fieldPaths".into(), "displayName".into()))
            .match_body(Matcher::PartialJson(json!({
                "fields": {"displayName": {"stringValue": "Phil"}}
            })))
            .with_body("{}")
            .create_async()
            .await;

        let store = FirestoreStore::new(&server.url(), "demo", None);
        store
            .set("users/abc", fields(json!({"displayName": "Phil"})), true)
            .await
            .unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn commit_posts_encoded_writes() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", format!("{DOCS}:commit").as_str())
            .match_body(Matcher::PartialJson(json!({
                "writes": [{"delete": "projects/demo/databases/(default)/documents/games/1"}]
            })))
            .with_body("{}")
            .create_async()
            .await;

        let store = FirestoreStore::new(&server.url(), "demo", None);
        store
            .commit(vec![Write::Delete { path: "games/1".into() }])
            .await
            .unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn unreachable_host_is_offline() {
        // Port 9 (discard) is reliably closed on test machines.
        let store = FirestoreStore::new("http://127.0.0.1:9", "demo", None);
        let err = store.get("users/abc").await.unwrap_err();
        assert!(err.is_offline(), "expected offline, got {err}");
    }
}
