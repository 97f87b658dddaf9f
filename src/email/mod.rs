//! Outbound email and the mailing-list audience, both through Resend.

pub mod templates;

use crate::picks;
use crate::store::{DocumentStore, StoreError, StoreResult};
use crate::users::{self, User};
use log::{debug, error, info, warn};
use reqwest::{Client, Method, StatusCode, Url};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use thiserror::Error;

pub use templates::Rendered;

#[derive(Error, Debug)]
pub enum MailError {
    #[error("{0} is not configured")]
    NotConfigured(&'static str),

    #[error("Email provider unreachable: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Email provider rejected the request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("Invalid email provider url: {0}")]
    Url(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type MailResult<T> = Result<T, MailError>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EmailMessage {
    pub to: Vec<String>,
    pub subject: String,
    pub html: String,
    pub text: String,
}

impl EmailMessage {
    pub fn new(to: &str, rendered: Rendered) -> Self {
        Self {
            to: vec![to.to_owned()],
            subject: rendered.subject,
            html: rendered.html,
            text: rendered.text,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    #[serde(default)]
    pub id: String,
    pub email: String,
    #[serde(default)]
    pub unsubscribed: bool,
}

#[derive(Debug, Deserialize)]
struct SendResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct ContactList {
    #[serde(default)]
    data: Vec<Contact>,
}

/// Resend REST client. The key stays on the server; a missing key fails each call.
#[derive(Debug, Clone)]
pub struct Mailer {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    audience_id: Option<String>,
    from: String,
}

impl Mailer {
    pub fn new(base_url: &str, api_key: Option<String>, audience_id: Option<String>, from: &str) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
            base_url: base_url.trim_end_matches('/').to_owned(),
            api_key,
            audience_id,
            from: from.to_owned(),
        }
    }

    /// Send one message. Returns the provider's message id.
    pub async fn send(&self, message: &EmailMessage) -> MailResult<String> {
        let body = json!({
            "from": self.from,
            "to": message.to,
            "subject": message.subject,
            "html": message.html,
            "text": message.text,
        });
        let sent: SendResponse = self.request(Method::POST, &["emails"], Some(body)).await?;
        debug!("sent '{}' as {}", message.subject, sent.id);
        Ok(sent.id)
    }

    pub async fn add_contact(&self, email: &str, first_name: Option<&str>) -> MailResult<()> {
        let path = ["audiences", self.audience()?, "contacts"];
        let mut body = json!({ "email": email, "unsubscribed": false });
        if let Some(name) = first_name {
            body["first_name"] = json!(name);
        }
        let _: serde_json::Value = self.request(Method::POST, &path, Some(body)).await?;
        Ok(())
    }

    pub async fn remove_contact(&self, email: &str) -> MailResult<()> {
        let path = ["audiences", self.audience()?, "contacts", email];
        let _: serde_json::Value = self.request(Method::DELETE, &path, None).await?;
        Ok(())
    }

    pub async fn list_contacts(&self) -> MailResult<Vec<Contact>> {
        let path = ["audiences", self.audience()?, "contacts"];
        let list: ContactList = self.request(Method::GET, &path, None).await?;
        Ok(list.data)
    }

    fn url(&self, segments: &[&str]) -> MailResult<Url> {
        let mut url = Url::parse(&self.base_url).map_err(|e| MailError::Url(format!("{}: {e}", self.base_url)))?;
        url.path_segments_mut()
            .map_err(|_| MailError::Url(self.base_url.clone()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn audience(&self) -> MailResult<&str> {
        self.audience_id
            .as_deref()
            .ok_or(MailError::NotConfigured("RESEND_AUDIENCE_ID"))
    }

    /// Each of `segments` is percent-encoded as one path segment.
    async fn request<T: serde::de::DeserializeOwned>(
        &self,
        method: Method,
        segments: &[&str],
        body: Option<serde_json::Value>,
    ) -> MailResult<T> {
        let key = self
            .api_key
            .as_deref()
            .ok_or(MailError::NotConfigured("RESEND_API_KEY"))?;
        let url = self.url(segments)?;
        let mut request = self.client.request(method, url).bearer_auth(key);
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(MailError::Rejected { status: status.as_u16(), message });
        }
        if status == StatusCode::NO_CONTENT {
            return serde_json::from_value(serde_json::Value::Null).map_err(|e| MailError::Rejected {
                status: status.as_u16(),
                message: e.to_string(),
            });
        }
        Ok(response.json().await?)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "status")]
pub enum Outcome {
    Sent,
    Skipped { reason: String },
    Failed { error: String },
}

/// One row of a batch result. A failed row never stops the rest of the batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserOutcome {
    pub user_id: String,
    pub email: String,
    #[serde(flatten)]
    pub outcome: Outcome,
}

impl UserOutcome {
    fn new(user: &User, outcome: Outcome) -> Self {
        Self { user_id: user.id.clone(), email: user.profile.email.clone(), outcome }
    }
}

/// Send a welcome mail and add the address to the audience. Failures are logged only.
pub async fn welcome_new_user(mailer: &Mailer, email: &str, display_name: Option<&str>, app_url: &str) {
    let message = EmailMessage::new(email, templates::welcome(display_name, app_url));
    if let Err(e) = mailer.send(&message).await {
        warn!("Welcome email to {email} failed: {e}");
    }
    if let Err(e) = mailer.add_contact(email, display_name).await {
        warn!("Adding {email} to the audience failed: {e}");
    }
}

/// Remind every opted-in user who has no picks for `week` yet.
pub async fn send_weekly_reminders(
    store: &dyn DocumentStore,
    mailer: &Mailer,
    week: u8,
    app_url: &str,
) -> StoreResult<Vec<UserOutcome>> {
    let users = users::list_users(store).await?;
    let mut results = Vec::with_capacity(users.len());

    for user in &users {
        if !user.profile.notifications || user.profile.email.is_empty() {
            results.push(UserOutcome::new(user, Outcome::Skipped { reason: "opted out".into() }));
            continue;
        }
        match picks::picks_for_user(store, &user.id, Some(week)).await {
            Ok(picks) if !picks.is_empty() => {
                results.push(UserOutcome::new(user, Outcome::Skipped { reason: "already picked".into() }));
                continue;
            }
            Ok(_) => {}
            Err(e) => {
                error!("Could not read picks for {}: {e}", user.id);
                results.push(UserOutcome::new(user, Outcome::Failed { error: e.to_string() }));
                continue;
            }
        }

        let rendered = templates::weekly_reminder(user.profile.display_name.as_deref(), week, app_url);
        let outcome = match mailer.send(&EmailMessage::new(&user.profile.email, rendered)).await {
            Ok(_) => Outcome::Sent,
            Err(e) => {
                error!("Reminder to {} failed: {e}", user.profile.email);
                Outcome::Failed { error: e.to_string() }
            }
        };
        results.push(UserOutcome::new(user, outcome));
    }

    let sent = results.iter().filter(|r| r.outcome == Outcome::Sent).count();
    info!("week {week} reminders: {sent} sent of {} users", results.len());
    Ok(results)
}

/// Add every opted-in user to the audience, and drop opted-out ones already in it.
pub async fn sync_audience(store: &dyn DocumentStore, mailer: &Mailer) -> MailResult<Vec<UserOutcome>> {
    let users = users::list_users(store).await?;
    let contacts = mailer.list_contacts().await?;
    let mut results = Vec::with_capacity(users.len());

    for user in users.iter().filter(|u| !u.profile.email.is_empty()) {
        let listed = contacts.iter().any(|c| c.email.eq_ignore_ascii_case(&user.profile.email));
        let call = match (user.profile.notifications, listed) {
            (true, false) => mailer
                .add_contact(&user.profile.email, user.profile.display_name.as_deref())
                .await
                .map(|_| Outcome::Sent),
            (false, true) => mailer.remove_contact(&user.profile.email).await.map(|_| Outcome::Sent),
            (true, true) => Ok(Outcome::Skipped { reason: "already subscribed".into() }),
            (false, false) => Ok(Outcome::Skipped { reason: "opted out".into() }),
        };
        let outcome = call.unwrap_or_else(|e| {
            warn!("Audience sync for {} failed: {e}", user.profile.email);
            Outcome::Failed { error: e.to_string() }
        });
        results.push(UserOutcome::new(user, outcome));
    }
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::picks::{UserPick, save_pick};
    use crate::store::memory::MemoryStore;
    use chrono::Utc;
    use mockito::Matcher;
    use nfl_api::Side;

    fn mailer(server: &mockito::ServerGuard) -> Mailer {
        Mailer::new(&server.url(), Some("re_test".into()), Some("aud1".into()), "Picks <p@x.com>")
    }

    #[tokio::test]
    async fn send_posts_with_bearer_key() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/emails")
            .match_header("authorization", "Bearer re_test")
            .match_body(Matcher::PartialJson(json!({"to": ["a@x.com"], "from": "Picks <p@x.com>"})))
            .with_status(200)
            .with_body(r#"{"id":"em_1"}"#)
            .create_async()
            .await;

        let id = mailer(&server)
            .send(&EmailMessage::new("a@x.com", templates::welcome(None, "https://x")))
            .await
            .unwrap();
        assert_eq!(id, "em_1");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn missing_key_is_misconfiguration() {
        let mailer = Mailer::new("http://127.0.0.1:9", None, None, "p@x.com");
        let err = mailer
            .send(&EmailMessage::new("a@x.com", templates::welcome(None, "https://x")))
            .await
            .unwrap_err();
        assert!(matches!(err, MailError::NotConfigured("RESEND_API_KEY")));
        assert!(matches!(
            mailer.list_contacts().await.unwrap_err(),
            MailError::NotConfigured("RESEND_AUDIENCE_ID")
        ));
    }

    #[tokio::test]
    async fn provider_errors_carry_status() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/emails")
            .with_status(422)
            .with_body("invalid from")
            .create_async()
            .await;
        let err = mailer(&server)
            .send(&EmailMessage::new("a@x.com", templates::welcome(None, "https://x")))
            .await
            .unwrap_err();
        assert!(matches!(err, MailError::Rejected { status: 422, .. }));
    }

    #[tokio::test]
    async fn reminders_skip_pickers_and_record_failures() {
        let store = MemoryStore::new();
        users::upsert_user(&store, "done", "done@x.com", None).await.unwrap();
        users::upsert_user(&store, "lazy", "lazy@x.com", None).await.unwrap();
        users::upsert_user(&store, "broken", "broken@x.com", None).await.unwrap();
        users::upsert_user(&store, "quiet", "quiet@x.com", None).await.unwrap();
        users::set_notifications(&store, "quiet", false).await.unwrap();
        let pick = UserPick { game_id: "g1".into(), side: Side::Home, week: Some(4), picked_at: Utc::now() };
        save_pick(&store, "done", &pick).await.unwrap();

        let mut server = mockito::Server::new_async().await;
        let ok = server
            .mock("POST", "/emails")
            .match_body(Matcher::PartialJson(json!({"to": ["lazy@x.com"]})))
            .with_status(200)
            .with_body(r#"{"id":"em_2"}"#)
            .expect(1)
            .create_async()
            .await;
        server
            .mock("POST", "/emails")
            .match_body(Matcher::PartialJson(json!({"to": ["broken@x.com"]})))
            .with_status(500)
            .create_async()
            .await;

        let results = send_weekly_reminders(&store, &mailer(&server), 4, "https://x").await.unwrap();
        let by_user = |id: &str| results.iter().find(|r| r.user_id == id).map(|r| r.outcome.clone());

        assert_eq!(by_user("lazy"), Some(Outcome::Sent));
        assert!(matches!(by_user("broken"), Some(Outcome::Failed { .. })));
        assert!(matches!(by_user("done"), Some(Outcome::Skipped { .. })));
        assert!(matches!(by_user("quiet"), Some(Outcome::Skipped { .. })));
        ok.assert_async().await;
    }

    #[tokio::test]
    async fn audience_sync_adds_missing_subscribers() {
        let store = MemoryStore::new();
        users::upsert_user(&store, "new", "new@x.com", Some("Nia")).await.unwrap();
        users::upsert_user(&store, "old", "old@x.com", None).await.unwrap();

        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/audiences/aud1/contacts")
            .with_status(200)
            .with_body(r#"{"data":[{"id":"c1","email":"OLD@x.com","unsubscribed":false}]}"#)
            .create_async()
            .await;
        let add = server
            .mock("POST", "/audiences/aud1/contacts")
            .match_body(Matcher::PartialJson(json!({"email": "new@x.com", "first_name": "Nia"})))
            .with_status(201)
            .with_body(r#"{"id":"c2"}"#)
            .expect(1)
            .create_async()
            .await;

        let results = sync_audience(&store, &mailer(&server)).await.unwrap();
        assert_eq!(results.len(), 2);
        add.assert_async().await;
    }

    #[tokio::test]
    async fn removed_contact_email_is_one_path_segment() {
        let mut server = mockito::Server::new_async().await;
        let delete = server
            .mock("DELETE", "/audiences/aud1/contacts/fan%2Fclub@x.com")
            .with_status(200)
            .with_body(r#"{"deleted":true}"#)
            .expect(1)
            .create_async()
            .await;

        mailer(&server).remove_contact("fan/club@x.com").await.unwrap();
        delete.assert_async().await;
    }

    #[tokio::test]
    async fn sync_reports_an_offline_store() {
        let store = MemoryStore::new();
        store.set_offline(true);
        let server = mockito::Server::new_async().await;
        let err = sync_audience(&store, &mailer(&server)).await.unwrap_err();
        assert!(matches!(err, MailError::Store(StoreError::Offline(_))));
    }
}
