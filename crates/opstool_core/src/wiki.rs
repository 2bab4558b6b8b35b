use std::thread::sleep;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use reqwest::blocking::Client;
use serde_json::Value;

use crate::config::ToolConfig;
use crate::error::StoreError;

/// One page snapshot as fetched from the remote store. The revision id
/// doubles as the optimistic-write precondition token.
#[derive(Debug, Clone)]
pub struct RemotePage {
    pub title: String,
    pub page_id: i64,
    pub revision_id: i64,
    pub timestamp: String,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitPrecondition {
    /// Commit unconditionally.
    None,
    /// Fail with `StoreError::Conflict` if the page has moved past this
    /// revision since it was fetched.
    BaseRevision(i64),
}

#[derive(Debug, Clone)]
pub struct CommitReceipt {
    /// New revision id; absent when the store recorded no change.
    pub revision_id: Option<i64>,
    pub no_change: bool,
}

/// Read surface of the remote document store.
pub trait PageStore {
    fn fetch(&mut self, title: &str) -> Result<RemotePage, StoreError>;
    fn exists(&mut self, title: &str) -> Result<bool, StoreError>;
    fn category_members(&mut self, category: &str) -> Result<Vec<String>, StoreError>;
    fn all_pages(&mut self, namespace: i32) -> Result<Vec<String>, StoreError>;
    fn request_count(&self) -> usize;
}

/// Write surface. Callers construct one authenticated handle and pass it
/// into every operation; there is no ambient session state.
pub trait PageStoreMut: PageStore {
    fn login(&mut self, username: &str, password: &str) -> Result<(), StoreError>;
    fn commit(
        &mut self,
        title: &str,
        content: &str,
        summary: &str,
        precondition: CommitPrecondition,
    ) -> Result<CommitReceipt, StoreError>;
}

#[derive(Debug, Clone)]
pub struct MediaWikiClientConfig {
    pub api_url: String,
    pub user_agent: String,
    pub timeout_ms: u64,
    pub rate_limit_read_ms: u64,
    pub rate_limit_write_ms: u64,
    pub max_retries: usize,
    pub retry_delay_ms: u64,
}

impl MediaWikiClientConfig {
    pub fn from_config(config: &ToolConfig) -> Result<Self, StoreError> {
        let api_url = config.api_url().ok_or_else(|| {
            StoreError::Protocol(
                "no wiki API URL configured (set WIKI_API_URL or [wiki] api_url)".to_string(),
            )
        })?;
        Ok(Self {
            api_url,
            user_agent: config.user_agent(),
            timeout_ms: env_u64("WIKI_HTTP_TIMEOUT_MS", 30_000),
            rate_limit_read_ms: env_u64("WIKI_RATE_LIMIT_READ", 300),
            rate_limit_write_ms: env_u64("WIKI_RATE_LIMIT_WRITE", 1_000),
            max_retries: env_u64("WIKI_HTTP_RETRIES", 2) as usize,
            retry_delay_ms: env_u64("WIKI_HTTP_RETRY_DELAY_MS", 500),
        })
    }
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

pub struct MediaWikiClient {
    client: Client,
    config: MediaWikiClientConfig,
    csrf_token: Option<String>,
    last_request_at: Option<Instant>,
    request_count: usize,
}

impl MediaWikiClient {
    pub fn new(config: MediaWikiClientConfig) -> Result<Self, StoreError> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .cookie_store(true)
            .build()?;
        Ok(Self {
            client,
            config,
            csrf_token: None,
            last_request_at: None,
            request_count: 0,
        })
    }

    pub fn from_tool_config(config: &ToolConfig) -> Result<Self, StoreError> {
        Self::new(MediaWikiClientConfig::from_config(config)?)
    }

    fn request(&mut self, params: &[(&str, String)], write: bool) -> Result<Value, StoreError> {
        let mut pairs = Vec::with_capacity(params.len() + 2);
        pairs.push(("format".to_string(), "json".to_string()));
        pairs.push(("formatversion".to_string(), "2".to_string()));
        for (key, value) in params {
            if !value.is_empty() {
                pairs.push(((*key).to_string(), value.clone()));
            }
        }

        let mut attempt = 0usize;
        loop {
            self.pace(write);
            let request = if write {
                self.client.post(&self.config.api_url).form(&pairs)
            } else {
                self.client.get(&self.config.api_url).query(&pairs)
            };
            let response = request
                .header("User-Agent", self.config.user_agent.clone())
                .send();

            match response {
                Ok(response) if response.status().is_success() => {
                    let payload: Value = response.json()?;
                    if let Some(error) = payload.get("error") {
                        let code = error
                            .get("code")
                            .and_then(Value::as_str)
                            .unwrap_or("unknown_error")
                            .to_string();
                        let info = error
                            .get("info")
                            .and_then(Value::as_str)
                            .unwrap_or("unknown info")
                            .to_string();
                        return Err(StoreError::Api { code, info });
                    }
                    return Ok(payload);
                }
                Ok(response) => {
                    let status = response.status();
                    let retryable = status.is_server_error() || status.as_u16() == 429;
                    if attempt < self.config.max_retries && retryable {
                        self.backoff(attempt);
                        attempt += 1;
                        continue;
                    }
                    return Err(StoreError::Protocol(format!(
                        "api request failed with HTTP {status}"
                    )));
                }
                Err(error) => {
                    if attempt < self.config.max_retries
                        && (error.is_timeout() || error.is_connect())
                    {
                        self.backoff(attempt);
                        attempt += 1;
                        continue;
                    }
                    return Err(StoreError::Http(error));
                }
            }
        }
    }

    fn pace(&mut self, write: bool) {
        let delay = Duration::from_millis(if write {
            self.config.rate_limit_write_ms
        } else {
            self.config.rate_limit_read_ms
        });
        if let Some(last) = self.last_request_at {
            let elapsed = last.elapsed();
            if elapsed < delay {
                sleep(delay - elapsed);
            }
        }
        self.last_request_at = Some(Instant::now());
        self.request_count += 1;
    }

    fn backoff(&self, attempt: usize) {
        let exponent = u32::try_from(attempt).unwrap_or(16);
        let base = self
            .config
            .retry_delay_ms
            .saturating_mul(2u64.saturating_pow(exponent));
        let jitter = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|duration| u64::from(duration.subsec_millis() % 100))
            .unwrap_or(0);
        sleep(Duration::from_millis(base.saturating_add(jitter)));
    }

    fn ensure_csrf_token(&mut self) -> Result<String, StoreError> {
        if let Some(token) = &self.csrf_token {
            return Ok(token.clone());
        }
        let payload = self.request(
            &[
                ("action", "query".to_string()),
                ("meta", "tokens".to_string()),
            ],
            false,
        )?;
        let token = payload
            .get("query")
            .and_then(|value| value.get("tokens"))
            .and_then(|value| value.get("csrftoken"))
            .and_then(Value::as_str)
            .ok_or_else(|| StoreError::Protocol("failed to get csrf token".to_string()))?
            .to_string();
        self.csrf_token = Some(token.clone());
        Ok(token)
    }

    fn list_query(
        &mut self,
        base_params: Vec<(&'static str, String)>,
        list_key: &str,
        continue_key: &'static str,
    ) -> Result<Vec<String>, StoreError> {
        let mut titles = Vec::new();
        let mut continue_token: Option<String> = None;

        loop {
            let mut params = base_params.clone();
            if let Some(token) = &continue_token {
                params.push((continue_key, token.clone()));
            }
            let payload = self.request(&params, false)?;
            if let Some(items) = payload
                .get("query")
                .and_then(|value| value.get(list_key))
                .and_then(Value::as_array)
            {
                for item in items {
                    if let Some(title) = item.get("title").and_then(Value::as_str)
                        && !title.trim().is_empty()
                    {
                        titles.push(title.to_string());
                    }
                }
            }
            continue_token = payload
                .get("continue")
                .and_then(|value| value.get(continue_key))
                .and_then(Value::as_str)
                .map(ToString::to_string);
            if continue_token.is_none() {
                break;
            }
        }
        Ok(titles)
    }
}

impl PageStore for MediaWikiClient {
    fn fetch(&mut self, title: &str) -> Result<RemotePage, StoreError> {
        let payload = self.request(
            &[
                ("action", "query".to_string()),
                ("titles", title.to_string()),
                ("prop", "revisions".to_string()),
                ("rvprop", "content|timestamp|ids".to_string()),
                ("rvslots", "main".to_string()),
            ],
            false,
        )?;
        parse_fetch_payload(&payload, title)
    }

    fn exists(&mut self, title: &str) -> Result<bool, StoreError> {
        let payload = self.request(
            &[
                ("action", "query".to_string()),
                ("titles", title.to_string()),
            ],
            false,
        )?;
        let page = first_page(&payload)
            .ok_or_else(|| StoreError::Protocol("invalid query response shape".to_string()))?;
        Ok(page.get("missing").is_none())
    }

    fn category_members(&mut self, category: &str) -> Result<Vec<String>, StoreError> {
        let category_title = if category.starts_with("Category:") {
            category.to_string()
        } else {
            format!("Category:{category}")
        };
        self.list_query(
            vec![
                ("action", "query".to_string()),
                ("list", "categorymembers".to_string()),
                ("cmtitle", category_title),
                ("cmtype", "page".to_string()),
                ("cmlimit", "500".to_string()),
            ],
            "categorymembers",
            "cmcontinue",
        )
    }

    fn all_pages(&mut self, namespace: i32) -> Result<Vec<String>, StoreError> {
        self.list_query(
            vec![
                ("action", "query".to_string()),
                ("list", "allpages".to_string()),
                ("apnamespace", namespace.to_string()),
                ("aplimit", "500".to_string()),
            ],
            "allpages",
            "apcontinue",
        )
    }

    fn request_count(&self) -> usize {
        self.request_count
    }
}

impl PageStoreMut for MediaWikiClient {
    fn login(&mut self, username: &str, password: &str) -> Result<(), StoreError> {
        let payload = self.request(
            &[
                ("action", "query".to_string()),
                ("meta", "tokens".to_string()),
                ("type", "login".to_string()),
            ],
            false,
        )?;
        let login_token = payload
            .get("query")
            .and_then(|value| value.get("tokens"))
            .and_then(|value| value.get("logintoken"))
            .and_then(Value::as_str)
            .ok_or_else(|| StoreError::Protocol("failed to get login token".to_string()))?
            .to_string();

        let payload = self.request(
            &[
                ("action", "login".to_string()),
                ("lgname", username.to_string()),
                ("lgpassword", password.to_string()),
                ("lgtoken", login_token),
            ],
            true,
        )?;
        let result = payload
            .get("login")
            .and_then(|value| value.get("result"))
            .and_then(Value::as_str);
        if result == Some("Success") {
            self.csrf_token = None;
            return Ok(());
        }
        let reason = payload
            .get("login")
            .and_then(|value| value.get("reason"))
            .and_then(Value::as_str)
            .or(result)
            .unwrap_or("unknown error");
        Err(StoreError::Api {
            code: "login_failed".to_string(),
            info: reason.to_string(),
        })
    }

    fn commit(
        &mut self,
        title: &str,
        content: &str,
        summary: &str,
        precondition: CommitPrecondition,
    ) -> Result<CommitReceipt, StoreError> {
        let token = self.ensure_csrf_token()?;
        let mut params = vec![
            ("action", "edit".to_string()),
            ("title", title.to_string()),
            ("text", content.to_string()),
            ("summary", summary.to_string()),
            ("bot", "1".to_string()),
            ("token", token),
        ];
        if let CommitPrecondition::BaseRevision(revision) = precondition {
            params.push(("baserevid", revision.to_string()));
        }

        let payload = match self.request(&params, true) {
            Err(StoreError::Api { code, .. }) if code == "editconflict" => {
                let base_revision = match precondition {
                    CommitPrecondition::BaseRevision(revision) => revision,
                    CommitPrecondition::None => 0,
                };
                return Err(StoreError::Conflict {
                    title: title.to_string(),
                    base_revision,
                });
            }
            other => other?,
        };

        let edit = payload
            .get("edit")
            .ok_or_else(|| StoreError::Protocol("missing edit payload in response".to_string()))?;
        if edit.get("result").and_then(Value::as_str) != Some("Success") {
            return Err(StoreError::Protocol(format!(
                "edit failed for {title}: {}",
                edit.get("result").and_then(Value::as_str).unwrap_or("unknown")
            )));
        }
        Ok(CommitReceipt {
            revision_id: edit.get("newrevid").and_then(Value::as_i64),
            no_change: edit.get("nochange").is_some(),
        })
    }
}

fn first_page(payload: &Value) -> Option<&Value> {
    payload
        .get("query")
        .and_then(|value| value.get("pages"))
        .and_then(Value::as_array)
        .and_then(|pages| pages.first())
}

pub(crate) fn parse_fetch_payload(payload: &Value, title: &str) -> Result<RemotePage, StoreError> {
    let page = first_page(payload)
        .ok_or_else(|| StoreError::Protocol("invalid query response shape".to_string()))?;
    if page.get("missing").is_some() {
        return Err(StoreError::PageMissing {
            title: title.to_string(),
        });
    }
    let revision = page
        .get("revisions")
        .and_then(Value::as_array)
        .and_then(|revisions| revisions.first())
        .ok_or_else(|| StoreError::Protocol(format!("no revisions returned for {title}")))?;
    let content = revision
        .get("slots")
        .and_then(|value| value.get("main"))
        .and_then(|value| value.get("content"))
        .and_then(Value::as_str)
        .ok_or_else(|| StoreError::Protocol(format!("no content slot returned for {title}")))?;

    Ok(RemotePage {
        title: page
            .get("title")
            .and_then(Value::as_str)
            .unwrap_or(title)
            .to_string(),
        page_id: page.get("pageid").and_then(Value::as_i64).unwrap_or(0),
        revision_id: revision.get("revid").and_then(Value::as_i64).unwrap_or(0),
        timestamp: revision
            .get("timestamp")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        content: content.to_string(),
    })
}

#[cfg(test)]
pub(crate) mod fake {
    use std::collections::BTreeMap;

    use super::{CommitPrecondition, CommitReceipt, PageStore, PageStoreMut, RemotePage};
    use crate::error::StoreError;

    #[derive(Debug, Clone)]
    pub(crate) struct CommittedEdit {
        pub title: String,
        pub content: String,
        pub summary: String,
    }

    /// In-memory store for workflow tests.
    #[derive(Debug, Default)]
    pub(crate) struct FakePageStore {
        pub pages: BTreeMap<String, RemotePage>,
        pub categories: BTreeMap<String, Vec<String>>,
        pub namespaces: BTreeMap<i32, Vec<String>>,
        pub commits: Vec<CommittedEdit>,
        pub logged_in: bool,
        next_revision: i64,
        requests: usize,
    }

    impl FakePageStore {
        pub fn new() -> Self {
            Self {
                next_revision: 100,
                ..Self::default()
            }
        }

        pub fn insert_page(&mut self, title: &str, content: &str) -> i64 {
            self.next_revision += 1;
            let revision_id = self.next_revision;
            self.pages.insert(
                title.to_string(),
                RemotePage {
                    title: title.to_string(),
                    page_id: revision_id,
                    revision_id,
                    timestamp: "2026-01-01T00:00:00Z".to_string(),
                    content: content.to_string(),
                },
            );
            revision_id
        }

        pub fn set_category(&mut self, category: &str, members: &[&str]) {
            self.categories.insert(
                category.to_string(),
                members.iter().map(ToString::to_string).collect(),
            );
        }

        pub fn set_namespace(&mut self, namespace: i32, titles: &[&str]) {
            self.namespaces.insert(
                namespace,
                titles.iter().map(ToString::to_string).collect(),
            );
        }
    }

    impl PageStore for FakePageStore {
        fn fetch(&mut self, title: &str) -> Result<RemotePage, StoreError> {
            self.requests += 1;
            self.pages
                .get(title)
                .cloned()
                .ok_or_else(|| StoreError::PageMissing {
                    title: title.to_string(),
                })
        }

        fn exists(&mut self, title: &str) -> Result<bool, StoreError> {
            self.requests += 1;
            Ok(self.pages.contains_key(title))
        }

        fn category_members(&mut self, category: &str) -> Result<Vec<String>, StoreError> {
            self.requests += 1;
            Ok(self.categories.get(category).cloned().unwrap_or_default())
        }

        fn all_pages(&mut self, namespace: i32) -> Result<Vec<String>, StoreError> {
            self.requests += 1;
            Ok(self.namespaces.get(&namespace).cloned().unwrap_or_default())
        }

        fn request_count(&self) -> usize {
            self.requests
        }
    }

    impl PageStoreMut for FakePageStore {
        fn login(&mut self, _username: &str, _password: &str) -> Result<(), StoreError> {
            self.logged_in = true;
            Ok(())
        }

        fn commit(
            &mut self,
            title: &str,
            content: &str,
            summary: &str,
            precondition: CommitPrecondition,
        ) -> Result<CommitReceipt, StoreError> {
            self.requests += 1;
            if let CommitPrecondition::BaseRevision(base) = precondition {
                let current = self.pages.get(title).map(|page| page.revision_id);
                if current != Some(base) {
                    return Err(StoreError::Conflict {
                        title: title.to_string(),
                        base_revision: base,
                    });
                }
            }
            let revision_id = self.insert_page(title, content);
            self.commits.push(CommittedEdit {
                title: title.to_string(),
                content: content.to_string(),
                summary: summary.to_string(),
            });
            Ok(CommitReceipt {
                revision_id: Some(revision_id),
                no_change: false,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn fetch_payload_extracts_revision_and_content() {
        let payload = json!({
            "query": { "pages": [{
                "title": "Alpha",
                "pageid": 7,
                "ns": 0,
                "revisions": [{
                    "revid": 1234,
                    "timestamp": "2026-08-01T10:00:00Z",
                    "slots": { "main": { "content": "== A ==\nbody" } }
                }]
            }]}
        });
        let page = parse_fetch_payload(&payload, "Alpha").expect("parse");
        assert_eq!(page.title, "Alpha");
        assert_eq!(page.revision_id, 1234);
        assert_eq!(page.content, "== A ==\nbody");
    }

    #[test]
    fn fetch_payload_maps_missing_page() {
        let payload = json!({
            "query": { "pages": [{ "title": "Ghost", "missing": true }] }
        });
        let error = parse_fetch_payload(&payload, "Ghost").expect_err("must fail");
        assert!(matches!(error, StoreError::PageMissing { title } if title == "Ghost"));
    }

    #[test]
    fn fake_store_commit_enforces_base_revision() {
        use super::fake::FakePageStore;

        let mut store = FakePageStore::new();
        let revision = store.insert_page("Alpha", "old");
        // Someone else edits in between.
        store.insert_page("Alpha", "newer");
        let error = store
            .commit(
                "Alpha",
                "mine",
                "summary",
                CommitPrecondition::BaseRevision(revision),
            )
            .expect_err("must conflict");
        assert!(matches!(error, StoreError::Conflict { .. }));

        let current = store.pages.get("Alpha").expect("page").revision_id;
        let receipt = store
            .commit(
                "Alpha",
                "mine",
                "summary",
                CommitPrecondition::BaseRevision(current),
            )
            .expect("commit");
        assert!(!receipt.no_change);
        assert_eq!(store.commits.len(), 1);
    }
}
