//! GroupMe v3 API adapter: paginated fetching with retry/backoff.
//!
//! Implements the `ChatApi` port. Cursor bookkeeping, page-size negotiation,
//! rate limiting and transient-error recovery all live here; the archive
//! core only ever sees the page-by-page iteration contract.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use gma_core::{
    domain::{Attachment, Group, GroupId, Message, UserId},
    errors::Error,
    ports::{ChatApi, Pages},
    Result,
};

pub const DEFAULT_BASE_URL: &str = "https://api.groupme.com/v3";

/// Tuning knobs for the client. `Default` matches the public service's
/// documented limits.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    pub base_url: String,
    /// Items requested per page (groups and messages alike).
    pub page_size: u32,
    /// Pause between successive message-page requests.
    pub page_delay: Duration,
    /// Attempts per request before a transient failure becomes fatal.
    pub max_retries: u32,
    /// Base backoff between attempts; grows linearly with the attempt number.
    pub retry_backoff: Duration,
    pub http_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            page_size: 100,
            page_delay: Duration::from_millis(100),
            max_retries: 3,
            retry_backoff: Duration::from_millis(500),
            http_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Clone, Debug)]
pub struct GroupMeClient {
    cfg: ClientConfig,
    token: String,
    http: reqwest::Client,
}

impl GroupMeClient {
    pub fn new(token: impl Into<String>, cfg: ClientConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(cfg.http_timeout)
            .build()
            .expect("reqwest client build");
        Self {
            cfg,
            token: token.into(),
            http,
        }
    }

    /// GET `path` with query params, retrying transient failures.
    ///
    /// Connect/timeout errors and 5xx responses are retried up to
    /// `max_retries` attempts with linear backoff. Every other status is
    /// returned as-is for the caller to interpret.
    async fn get(&self, path: &str, query: &[(&str, String)]) -> Result<reqwest::Response> {
        let url = format!("{}/{}", self.cfg.base_url.trim_end_matches('/'), path);

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let sent = self
                .http
                .get(&url)
                .header("X-Access-Token", &self.token)
                .query(query)
                .send()
                .await;

            match sent {
                Ok(resp) if resp.status().is_server_error() && attempt < self.cfg.max_retries => {
                    warn!(%url, status = %resp.status(), attempt, "server error, retrying");
                }
                Ok(resp) => return Ok(resp),
                Err(e) if is_transient(&e) && attempt < self.cfg.max_retries => {
                    warn!(%url, error = %e, attempt, "transient error, retrying");
                }
                Err(e) => return Err(Error::Transport(format!("GET {url}: {e}"))),
            }

            tokio::time::sleep(self.cfg.retry_backoff * attempt).await;
        }
    }
}

fn is_transient(e: &reqwest::Error) -> bool {
    e.is_timeout() || e.is_connect()
}

/// Map a non-success status onto the error taxonomy.
fn status_error(status: reqwest::StatusCode, context: &str, group_id: Option<&GroupId>) -> Error {
    match status.as_u16() {
        401 | 403 => Error::Auth,
        404 => match group_id {
            Some(id) => Error::NotFound {
                group_id: id.0.clone(),
            },
            None => Error::Transport(format!("{context}: status {status}")),
        },
        _ => Error::Transport(format!("{context}: status {status}")),
    }
}

// ============== Wire Types ==============

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    response: Option<T>,
}

// Group payloads carry both `id` and `group_id` with the same value; the
// extra key is simply ignored.
#[derive(Debug, Deserialize)]
struct WireGroup {
    id: String,
    name: String,
    created_at: i64,
}

#[derive(Debug, Deserialize)]
struct WireAttachment {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    id: String,
    user_id: String,
    name: String,
    text: Option<String>,
    #[serde(default)]
    attachments: Vec<WireAttachment>,
    created_at: i64,
}

#[derive(Debug, Deserialize)]
struct MessagePage {
    #[serde(default)]
    messages: Vec<WireMessage>,
}

impl From<WireGroup> for Group {
    fn from(w: WireGroup) -> Self {
        Group {
            id: GroupId(w.id),
            name: w.name,
            created_at: w.created_at,
        }
    }
}

impl From<WireMessage> for Message {
    fn from(w: WireMessage) -> Self {
        Message {
            id: w.id,
            user_id: UserId(w.user_id),
            name: w.name,
            text: w.text,
            attachments: w
                .attachments
                .into_iter()
                .map(|a| Attachment {
                    kind: a.kind,
                    url: a.url,
                })
                .collect(),
            created_at: w.created_at,
        }
    }
}

/// Unwrap the `{"response": ...}` envelope of a successful response.
///
/// A missing payload or a record missing required fields is a data error,
/// never silently skipped.
async fn decode<T: serde::de::DeserializeOwned>(resp: reqwest::Response) -> Result<T> {
    let body = resp
        .text()
        .await
        .map_err(|e| Error::Transport(format!("read body: {e}")))?;
    let envelope: Envelope<T> = serde_json::from_str(&body)
        .map_err(|e| Error::Data(format!("malformed response: {e}")))?;
    envelope
        .response
        .ok_or_else(|| Error::Data("missing response payload".to_string()))
}

// ============== Pagers ==============

/// Pager over the group listing (`page`/`per_page` indexing).
///
/// A short or empty page means the listing is exhausted.
struct GroupPages<'a> {
    client: &'a GroupMeClient,
    page: u32,
    done: bool,
}

#[async_trait]
impl Pages<Group> for GroupPages<'_> {
    async fn next_page(&mut self) -> Result<Option<Vec<Group>>> {
        if self.done {
            return Ok(None);
        }

        let per_page = self.client.cfg.page_size;
        let fetched = self
            .client
            .get(
                "groups",
                &[
                    ("page", self.page.to_string()),
                    ("per_page", per_page.to_string()),
                ],
            )
            .await;
        let resp = match fetched {
            Ok(resp) => resp,
            Err(e) => {
                // A failed sequence is not resumable; restart from the top.
                self.done = true;
                return Err(e);
            }
        };

        let status = resp.status();
        if !status.is_success() {
            self.done = true;
            return Err(status_error(status, "GET groups", None));
        }

        let wires: Vec<WireGroup> = match decode(resp).await {
            Ok(wires) => wires,
            Err(e) => {
                self.done = true;
                return Err(e);
            }
        };
        if wires.is_empty() {
            self.done = true;
            return Ok(None);
        }
        if (wires.len() as u32) < per_page {
            self.done = true;
        }
        self.page += 1;
        Ok(Some(wires.into_iter().map(Group::from).collect()))
    }
}

/// Pager over a group's messages, newest first, driven by the `before_id`
/// cursor. The first request omits the cursor; each following request asks
/// for messages strictly older than the last one seen.
struct MessagePages<'a> {
    client: &'a GroupMeClient,
    group_id: GroupId,
    before_id: Option<String>,
    started: bool,
    done: bool,
}

#[async_trait]
impl Pages<Message> for MessagePages<'_> {
    async fn next_page(&mut self) -> Result<Option<Vec<Message>>> {
        if self.done {
            return Ok(None);
        }

        // Stay under the service's abuse thresholds between page requests.
        if self.started {
            tokio::time::sleep(self.client.cfg.page_delay).await;
        }
        self.started = true;

        let limit = self.client.cfg.page_size;
        let mut query = vec![("limit", limit.to_string())];
        if let Some(cursor) = &self.before_id {
            query.push(("before_id", cursor.clone()));
        }

        let path = format!("groups/{}/messages", self.group_id.0);
        let resp = match self.client.get(&path, &query).await {
            Ok(resp) => resp,
            Err(e) => {
                // A failed sequence is not resumable; restart from the top.
                self.done = true;
                return Err(e);
            }
        };
        let status = resp.status();

        // 304 signals an exhausted cursor: normal termination, not an error.
        if status == reqwest::StatusCode::NOT_MODIFIED {
            self.done = true;
            return Ok(None);
        }
        if !status.is_success() {
            self.done = true;
            return Err(status_error(
                status,
                &format!("GET {path}"),
                Some(&self.group_id),
            ));
        }

        let page: MessagePage = match decode(resp).await {
            Ok(page) => page,
            Err(e) => {
                self.done = true;
                return Err(e);
            }
        };
        if page.messages.is_empty() {
            self.done = true;
            return Ok(None);
        }
        if (page.messages.len() as u32) < limit {
            // Short page: nothing older remains, skip the extra round trip.
            self.done = true;
        }

        self.before_id = page.messages.last().map(|m| m.id.clone());
        debug!(
            group = %self.group_id.0,
            fetched = page.messages.len(),
            "fetched message page"
        );
        Ok(Some(page.messages.into_iter().map(Message::from).collect()))
    }
}

#[async_trait]
impl ChatApi for GroupMeClient {
    async fn get_group(&self, group_id: &GroupId) -> Result<Group> {
        let path = format!("groups/{}", group_id.0);
        let resp = self.get(&path, &[]).await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(status_error(
                status,
                &format!("GET {path}"),
                Some(group_id),
            ));
        }

        let wire: WireGroup = decode(resp).await?;
        Ok(wire.into())
    }

    fn groups(&self) -> Box<dyn Pages<Group> + '_> {
        Box::new(GroupPages {
            client: self,
            page: 1,
            done: false,
        })
    }

    fn messages(&self, group_id: &GroupId) -> Box<dyn Pages<Message> + '_> {
        Box::new(MessagePages {
            client: self,
            group_id: group_id.clone(),
            before_id: None,
            started: false,
            done: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gma_core::ports::drain;
    use serde_json::json;

    fn test_client(server: &mockito::ServerGuard) -> GroupMeClient {
        test_client_sized(server, 100)
    }

    fn test_client_sized(server: &mockito::ServerGuard, page_size: u32) -> GroupMeClient {
        GroupMeClient::new(
            "tok",
            ClientConfig {
                base_url: server.url(),
                page_size,
                page_delay: Duration::from_millis(0),
                max_retries: 3,
                retry_backoff: Duration::from_millis(1),
                http_timeout: Duration::from_secs(5),
            },
        )
    }

    fn message_body(start: usize, count: usize) -> String {
        let messages: Vec<serde_json::Value> = (start..start + count)
            .map(|i| {
                json!({
                    "id": format!("m{i}"),
                    "user_id": "u1",
                    "name": "Al",
                    "text": format!("message {i}"),
                    "attachments": [],
                    "created_at": 1_600_000_000 + i as i64,
                })
            })
            .collect();
        json!({"response": {"count": count, "messages": messages}}).to_string()
    }

    fn group_body(ids: &[&str]) -> String {
        let groups: Vec<serde_json::Value> = ids
            .iter()
            .map(|id| {
                json!({
                    "id": id,
                    "group_id": id,
                    "name": format!("Group {id}"),
                    "created_at": 1_500_000_000,
                })
            })
            .collect();
        json!({"response": groups}).to_string()
    }

    #[tokio::test]
    async fn short_message_page_stops_without_another_request() {
        let mut server = mockito::Server::new_async().await;
        let page1 = server
            .mock("GET", "/groups/g1/messages")
            .match_query(mockito::Matcher::Exact("limit=100".to_string()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(message_body(0, 100))
            .expect(1)
            .create_async()
            .await;
        let page2 = server
            .mock("GET", "/groups/g1/messages")
            .match_query(mockito::Matcher::Exact(
                "limit=100&before_id=m99".to_string(),
            ))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(message_body(100, 100))
            .expect(1)
            .create_async()
            .await;
        let page3 = server
            .mock("GET", "/groups/g1/messages")
            .match_query(mockito::Matcher::Exact(
                "limit=100&before_id=m199".to_string(),
            ))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(message_body(200, 37))
            .expect(1)
            .create_async()
            .await;

        let client = test_client(&server);
        let mut pages = client.messages(&GroupId("g1".to_string()));
        let all = drain(pages.as_mut()).await.unwrap();
        assert_eq!(all.len(), 237);
        assert_eq!(all[0].id, "m0");
        assert_eq!(all[236].id, "m236");

        // A drained pager stays exhausted without issuing another request.
        assert!(pages.next_page().await.unwrap().is_none());

        page1.assert_async().await;
        page2.assert_async().await;
        page3.assert_async().await;
    }

    #[tokio::test]
    async fn empty_message_page_stops() {
        let mut server = mockito::Server::new_async().await;
        let _page1 = server
            .mock("GET", "/groups/g1/messages")
            .match_query(mockito::Matcher::Exact("limit=100".to_string()))
            .with_status(200)
            .with_body(message_body(0, 100))
            .create_async()
            .await;
        let _page2 = server
            .mock("GET", "/groups/g1/messages")
            .match_query(mockito::Matcher::Exact(
                "limit=100&before_id=m99".to_string(),
            ))
            .with_status(200)
            .with_body(message_body(100, 100))
            .create_async()
            .await;
        let page3 = server
            .mock("GET", "/groups/g1/messages")
            .match_query(mockito::Matcher::Exact(
                "limit=100&before_id=m199".to_string(),
            ))
            .with_status(200)
            .with_body(json!({"response": {"count": 0, "messages": []}}).to_string())
            .expect(1)
            .create_async()
            .await;

        let client = test_client(&server);
        let mut pages = client.messages(&GroupId("g1".to_string()));
        let all = drain(pages.as_mut()).await.unwrap();
        assert_eq!(all.len(), 200);
        page3.assert_async().await;
    }

    #[tokio::test]
    async fn http_304_is_normal_termination() {
        let mut server = mockito::Server::new_async().await;
        let _page1 = server
            .mock("GET", "/groups/g1/messages")
            .match_query(mockito::Matcher::Exact("limit=100".to_string()))
            .with_status(200)
            .with_body(message_body(0, 100))
            .create_async()
            .await;
        let _page2 = server
            .mock("GET", "/groups/g1/messages")
            .match_query(mockito::Matcher::Exact(
                "limit=100&before_id=m99".to_string(),
            ))
            .with_status(304)
            .create_async()
            .await;

        let client = test_client(&server);
        let mut pages = client.messages(&GroupId("g1".to_string()));
        let all = drain(pages.as_mut()).await.unwrap();
        assert_eq!(all.len(), 100);
    }

    #[tokio::test]
    async fn rejected_credential_is_auth_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/groups/g1/messages")
            .match_query(mockito::Matcher::Any)
            .with_status(401)
            .create_async()
            .await;

        let client = test_client(&server);
        let mut pages = client.messages(&GroupId("g1".to_string()));
        assert!(matches!(pages.next_page().await, Err(Error::Auth)));
    }

    #[tokio::test]
    async fn unknown_group_is_not_found() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/groups/nope")
            .with_status(404)
            .create_async()
            .await;

        let client = test_client(&server);
        let err = client
            .get_group(&GroupId("nope".to_string()))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound { group_id } if group_id == "nope"));
    }

    #[tokio::test]
    async fn server_errors_are_retried_then_fatal() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/groups/g1")
            .with_status(500)
            .expect(3)
            .create_async()
            .await;

        let client = test_client(&server);
        let err = client
            .get_group(&GroupId("g1".to_string()))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Transport(_)));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/groups/g1")
            .with_status(400)
            .expect(1)
            .create_async()
            .await;

        let client = test_client(&server);
        let err = client
            .get_group(&GroupId("g1".to_string()))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Transport(_)));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn missing_required_field_is_data_error() {
        let mut server = mockito::Server::new_async().await;
        // No user_id on the message record.
        let body = json!({
            "response": {
                "count": 1,
                "messages": [{
                    "id": "m1",
                    "name": "Al",
                    "text": "hello",
                    "created_at": 1_600_000_000,
                }]
            }
        })
        .to_string();
        let _mock = server
            .mock("GET", "/groups/g1/messages")
            .match_query(mockito::Matcher::Any)
            .with_status(200)
            .with_body(body)
            .create_async()
            .await;

        let client = test_client(&server);
        let mut pages = client.messages(&GroupId("g1".to_string()));
        assert!(matches!(pages.next_page().await, Err(Error::Data(_))));
    }

    #[tokio::test]
    async fn group_listing_pages_until_short_page() {
        let mut server = mockito::Server::new_async().await;
        let page1 = server
            .mock("GET", "/groups")
            .match_query(mockito::Matcher::Exact("page=1&per_page=2".to_string()))
            .match_header("x-access-token", "tok")
            .with_status(200)
            .with_body(group_body(&["1", "2"]))
            .expect(1)
            .create_async()
            .await;
        let page2 = server
            .mock("GET", "/groups")
            .match_query(mockito::Matcher::Exact("page=2&per_page=2".to_string()))
            .with_status(200)
            .with_body(group_body(&["3"]))
            .expect(1)
            .create_async()
            .await;

        let client = test_client_sized(&server, 2);
        let mut pages = client.groups();
        let all = drain(pages.as_mut()).await.unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[2].id, GroupId("3".to_string()));

        page1.assert_async().await;
        page2.assert_async().await;
    }

    #[tokio::test]
    async fn get_group_unwraps_the_envelope() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/groups/g1")
            .with_status(200)
            .with_body(
                json!({
                    "response": {
                        "id": "g1",
                        "name": "Frands",
                        "created_at": 1_500_000_000,
                    }
                })
                .to_string(),
            )
            .create_async()
            .await;

        let client = test_client(&server);
        let group = client.get_group(&GroupId("g1".to_string())).await.unwrap();
        assert_eq!(group.name, "Frands");
        assert_eq!(group.created_at, 1_500_000_000);
    }
}
