use reqwest::header::RETRY_AFTER;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tokio::sync::OnceCell;

use super::client::{Annotation, AnnotationClient, AnnotationSource, Listing, RemoteError, Scope};
use crate::core::link::RemoteRef;

pub const DEFAULT_BASE_URL: &str = "https://slack.com/api";

/// Ceiling for a single HTTP round trip.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const PAGE_SIZE: u32 = 100;
const MAX_PAGES: usize = 10;

/// Slack error codes that mean the credential is unusable.
const AUTH_ERRORS: &[&str] = &[
    "invalid_auth",
    "not_authed",
    "token_revoked",
    "token_expired",
    "account_inactive",
    "missing_scope",
    "no_permission",
];

/// `reactions.remove` errors that mean there is nothing left to remove.
const ALREADY_GONE: &[&str] = &["no_reaction", "message_not_found", "channel_not_found"];

/// The token owner, as reported by `auth.test`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Identity {
    pub user_id: String,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub team: String,
}

#[derive(Deserialize)]
struct ReactionsPage {
    #[serde(default)]
    items: Vec<ReactedItem>,
    #[serde(default)]
    response_metadata: Option<ResponseMetadata>,
}

#[derive(Deserialize)]
struct ResponseMetadata {
    #[serde(default)]
    next_cursor: String,
}

#[derive(Deserialize)]
struct ReactedItem {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    channel: String,
    message: Option<ReactedMessage>,
}

#[derive(Deserialize)]
struct ReactedMessage {
    ts: String,
    #[serde(default)]
    text: String,
    permalink: Option<String>,
    #[serde(default)]
    reactions: Vec<Reaction>,
}

#[derive(Deserialize)]
struct Reaction {
    name: String,
    #[serde(default)]
    users: Vec<String>,
}

/// Slack Web API client for reaction annotations.
#[derive(Clone)]
pub struct SlackClient {
    base_url: String,
    token: String,
    http: Client,
    identity: OnceCell<Identity>,
}

impl SlackClient {
    pub fn new(base_url: &str, token: &str) -> Result<Self, RemoteError> {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| RemoteError::Network(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
            http,
            identity: OnceCell::new(),
        })
    }

    /// Check the token with `auth.test`.
    pub async fn test_connection(&self) -> Result<Identity, RemoteError> {
        self.identity().await.cloned()
    }

    async fn identity(&self) -> Result<&Identity, RemoteError> {
        self.identity
            .get_or_try_init(|| async {
                let req = self.http.post(self.url("auth.test"));
                self.send::<Identity>("auth.test", req).await
            })
            .await
    }

    async fn list_reactions(&self, emoji: &str, scope: &Scope) -> Result<Listing, RemoteError> {
        let me = self.identity().await?.user_id.clone();
        let mut out = Vec::new();
        let mut cursor = String::new();

        for page in 0..MAX_PAGES {
            let mut query: Vec<(&str, String)> = vec![
                ("full", "true".to_string()),
                ("limit", PAGE_SIZE.to_string()),
            ];
            if !cursor.is_empty() {
                query.push(("cursor", cursor.clone()));
            }
            let req = self.http.get(self.url("reactions.list")).query(&query);
            let body: ReactionsPage = self.send("reactions.list", req).await?;
            log::debug!("reactions.list page {}: {} items", page + 1, body.items.len());

            for item in body.items {
                if item.kind != "message" || !scope.allows(&item.channel) {
                    continue;
                }
                let Some(message) = item.message else { continue };
                let mine = message.reactions.iter().any(|r| {
                    r.name == emoji && (r.users.is_empty() || r.users.iter().any(|u| *u == me))
                });
                if !mine {
                    continue;
                }
                out.push(Annotation {
                    remote: RemoteRef::new(&item.channel, &message.ts, emoji),
                    message_text: message.text,
                    permalink: message.permalink,
                });
            }

            cursor = body
                .response_metadata
                .map(|m| m.next_cursor)
                .unwrap_or_default();
            if cursor.is_empty() {
                return Ok(Listing::full(out));
            }
        }

        log::warn!("reactions.list: stopped after {} pages; listing is partial", MAX_PAGES);
        Ok(Listing {
            annotations: out,
            complete: false,
        })
    }

    async fn remove_reaction(&self, remote: &RemoteRef) -> Result<(), RemoteError> {
        let req = self.http.post(self.url("reactions.remove")).json(&serde_json::json!({
            "channel": remote.conversation_id,
            "timestamp": remote.message_timestamp,
            "name": remote.annotation_key,
        }));
        match self.send::<serde_json::Value>("reactions.remove", req).await {
            Ok(_) => Ok(()),
            Err(RemoteError::Api(code)) if ALREADY_GONE.contains(&code.as_str()) => {
                log::info!("Reaction {} already gone ({})", remote, code);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    // --- Private helpers ---

    fn url(&self, method: &str) -> String {
        format!("{}/{}", self.base_url, method)
    }

    /// Send a Web API request and decode a successful (`ok: true`) body.
    async fn send<T: DeserializeOwned>(&self, method: &str, req: RequestBuilder) -> Result<T, RemoteError> {
        let resp = req
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| RemoteError::Network(format!("{} request failed: {}", method, e)))?;

        let status = resp.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = resp
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            return Err(RemoteError::RateLimited { retry_after });
        }
        if status.is_server_error() {
            return Err(RemoteError::Network(format!("{} returned {}", method, status)));
        }
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(RemoteError::Auth(format!("{} returned {}", method, status)));
        }

        let text = resp
            .text()
            .await
            .map_err(|e| RemoteError::Network(format!("failed to read {} response: {}", method, e)))?;
        if !status.is_success() {
            return Err(RemoteError::Api(format!("{} returned {}: {}", method, status, text)));
        }

        let value: serde_json::Value = serde_json::from_str(&text)
            .map_err(|e| RemoteError::Api(format!("{} returned invalid JSON: {}", method, e)))?;
        if value["ok"].as_bool() != Some(true) {
            let code = value["error"].as_str().unwrap_or("unknown_error").to_string();
            return Err(classify(code));
        }
        serde_json::from_value(value)
            .map_err(|e| RemoteError::Api(format!("unexpected {} response: {}", method, e)))
    }
}

fn classify(code: String) -> RemoteError {
    if AUTH_ERRORS.contains(&code.as_str()) {
        RemoteError::Auth(code)
    } else if code == "ratelimited" {
        RemoteError::RateLimited { retry_after: None }
    } else {
        RemoteError::Api(code)
    }
}

impl AnnotationClient for SlackClient {
    async fn list_annotations(&self, scope: &Scope) -> Result<Listing, RemoteError> {
        match &scope.source {
            AnnotationSource::Reaction(emoji) => self.list_reactions(emoji, scope).await,
            AnnotationSource::Bookmark(_) => Err(RemoteError::Unsupported("bookmark")),
        }
    }

    async fn remove_annotation(
        &self,
        remote: &RemoteRef,
        source: &AnnotationSource,
    ) -> Result<(), RemoteError> {
        match source {
            AnnotationSource::Reaction(_) => self.remove_reaction(remote).await,
            AnnotationSource::Bookmark(_) => Err(RemoteError::Unsupported("bookmark")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn eyes() -> Scope {
        Scope::new(AnnotationSource::Reaction("eyes".into()), vec![])
    }

    async fn mount_auth(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/auth.test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ok": true, "user_id": "U1", "user": "ana", "team": "acme"
            })))
            .mount(server)
            .await;
    }

    fn item(channel: &str, ts: &str, text: &str, reactions: serde_json::Value) -> serde_json::Value {
        json!({
            "type": "message",
            "channel": channel,
            "message": {
                "ts": ts,
                "text": text,
                "permalink": format!("https://acme.slack.com/archives/{channel}/p{ts}"),
                "reactions": reactions
            }
        })
    }

    #[tokio::test]
    async fn lists_own_reactions_across_pages() {
        let server = MockServer::start().await;
        mount_auth(&server).await;

        Mock::given(method("GET"))
            .and(path("/reactions.list"))
            .and(query_param("cursor", "page2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ok": true,
                "items": [item("C2", "2.0", "second", json!([{"name": "eyes", "users": ["U1"]}]))],
                "response_metadata": {"next_cursor": ""}
            })))
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/reactions.list"))
            .and(header("authorization", "Bearer xoxp-test"))
            .and(query_param("full", "true"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ok": true,
                "items": [
                    item("C1", "1.0", "first", json!([{"name": "eyes", "users": ["U1", "U2"]}])),
                    item("C1", "1.5", "someone else's eyes", json!([
                        {"name": "eyes", "users": ["U2"]},
                        {"name": "tada", "users": ["U1"]}
                    ])),
                    {"type": "file", "channel": "C1"}
                ],
                "response_metadata": {"next_cursor": "page2"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = SlackClient::new(&server.uri(), "xoxp-test").unwrap();
        let listing = client.list_annotations(&eyes()).await.unwrap();
        assert!(listing.complete);
        let got = listing.annotations;

        let refs: Vec<String> = got.iter().map(|a| a.remote.to_string()).collect();
        assert_eq!(refs, ["C1/1.0:eyes", "C2/2.0:eyes"]);
        assert_eq!(got[0].message_text, "first");
        assert_eq!(
            got[0].permalink.as_deref(),
            Some("https://acme.slack.com/archives/C1/p1.0")
        );
    }

    #[tokio::test]
    async fn channel_scope_filters_items() {
        let server = MockServer::start().await;
        mount_auth(&server).await;
        Mock::given(method("GET"))
            .and(path("/reactions.list"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ok": true,
                "items": [
                    item("C1", "1.0", "a", json!([{"name": "eyes", "users": ["U1"]}])),
                    item("C9", "9.0", "b", json!([{"name": "eyes", "users": ["U1"]}]))
                ]
            })))
            .mount(&server)
            .await;

        let client = SlackClient::new(&server.uri(), "t").unwrap();
        let scope = Scope::new(AnnotationSource::Reaction("eyes".into()), vec!["C9".into()]);
        let got = client.list_annotations(&scope).await.unwrap().annotations;
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].remote.conversation_id, "C9");
    }

    #[tokio::test]
    async fn listing_cut_at_page_cap_is_partial() {
        let server = MockServer::start().await;
        mount_auth(&server).await;
        Mock::given(method("GET"))
            .and(path("/reactions.list"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ok": true,
                "items": [item("C1", "1.0", "again", json!([{"name": "eyes", "users": ["U1"]}]))],
                "response_metadata": {"next_cursor": "more"}
            })))
            .expect(MAX_PAGES as u64)
            .mount(&server)
            .await;

        let client = SlackClient::new(&server.uri(), "t").unwrap();
        let listing = client.list_annotations(&eyes()).await.unwrap();
        assert!(!listing.complete);
        assert_eq!(listing.annotations.len(), MAX_PAGES);
    }

    #[tokio::test]
    async fn ok_false_ratelimited_is_rate_limited() {
        let server = MockServer::start().await;
        mount_auth(&server).await;
        Mock::given(method("GET"))
            .and(path("/reactions.list"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"ok": false, "error": "ratelimited"})),
            )
            .mount(&server)
            .await;

        let client = SlackClient::new(&server.uri(), "t").unwrap();
        let err = client.list_annotations(&eyes()).await.unwrap_err();
        assert_eq!(err, RemoteError::RateLimited { retry_after: None });
    }

    #[tokio::test]
    async fn other_ok_false_codes_are_api_errors() {
        let server = MockServer::start().await;
        mount_auth(&server).await;
        Mock::given(method("POST"))
            .and(path("/reactions.remove"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"ok": false, "error": "invalid_name"})),
            )
            .mount(&server)
            .await;

        let client = SlackClient::new(&server.uri(), "t").unwrap();
        let source = AnnotationSource::Reaction("eyes".into());
        let err = client
            .remove_annotation(&RemoteRef::new("C1", "1.0", "eyes"), &source)
            .await
            .unwrap_err();
        assert_eq!(err, RemoteError::Api("invalid_name".into()));
        assert!(!err.is_config_fault());
    }

    #[tokio::test]
    async fn http_429_is_rate_limited_with_retry_after() {
        let server = MockServer::start().await;
        mount_auth(&server).await;
        Mock::given(method("GET"))
            .and(path("/reactions.list"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "17"))
            .mount(&server)
            .await;

        let client = SlackClient::new(&server.uri(), "t").unwrap();
        let err = client.list_annotations(&eyes()).await.unwrap_err();
        assert_eq!(
            err,
            RemoteError::RateLimited {
                retry_after: Some(Duration::from_secs(17))
            }
        );
    }

    #[tokio::test]
    async fn invalid_auth_is_auth_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth.test"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"ok": false, "error": "invalid_auth"})),
            )
            .mount(&server)
            .await;

        let client = SlackClient::new(&server.uri(), "bad").unwrap();
        let err = client.list_annotations(&eyes()).await.unwrap_err();
        assert_eq!(err, RemoteError::Auth("invalid_auth".into()));
        assert!(client.test_connection().await.is_err());
    }

    #[tokio::test]
    async fn no_permission_is_auth_error() {
        let server = MockServer::start().await;
        mount_auth(&server).await;
        Mock::given(method("GET"))
            .and(path("/reactions.list"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"ok": false, "error": "no_permission"})),
            )
            .mount(&server)
            .await;

        let client = SlackClient::new(&server.uri(), "xoxp-test").unwrap();
        let err = client.list_annotations(&eyes()).await.unwrap_err();
        assert_eq!(err, RemoteError::Auth("no_permission".into()));
    }

    #[tokio::test]
    async fn server_error_is_network_error() {
        let server = MockServer::start().await;
        mount_auth(&server).await;
        Mock::given(method("GET"))
            .and(path("/reactions.list"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let client = SlackClient::new(&server.uri(), "t").unwrap();
        let err = client.list_annotations(&eyes()).await.unwrap_err();
        assert!(matches!(err, RemoteError::Network(_)));
    }

    #[tokio::test]
    async fn remove_posts_coordinates() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/reactions.remove"))
            .and(body_partial_json(json!({
                "channel": "C1", "timestamp": "1.0", "name": "eyes"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
            .expect(1)
            .mount(&server)
            .await;

        let client = SlackClient::new(&server.uri(), "t").unwrap();
        let source = AnnotationSource::Reaction("eyes".into());
        client
            .remove_annotation(&RemoteRef::new("C1", "1.0", "eyes"), &source)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn remove_already_gone_is_ok() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/reactions.remove"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"ok": false, "error": "no_reaction"})),
            )
            .mount(&server)
            .await;

        let client = SlackClient::new(&server.uri(), "t").unwrap();
        let source = AnnotationSource::Reaction("eyes".into());
        assert!(client
            .remove_annotation(&RemoteRef::new("C1", "1.0", "eyes"), &source)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn bookmarks_are_unsupported() {
        let client = SlackClient::new("http://127.0.0.1:9", "t").unwrap();
        let scope = Scope::new(AnnotationSource::Bookmark("C1".into()), vec![]);
        assert_eq!(
            client.list_annotations(&scope).await.unwrap_err(),
            RemoteError::Unsupported("bookmark")
        );
    }

    #[tokio::test]
    async fn test_connection_reports_identity() {
        let server = MockServer::start().await;
        mount_auth(&server).await;
        let client = SlackClient::new(&server.uri(), "t").unwrap();
        let me = client.test_connection().await.unwrap();
        assert_eq!(me.user, "ana");
        assert_eq!(me.team, "acme");
    }
}
