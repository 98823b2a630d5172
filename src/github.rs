//! GitHub REST API access: collaborator checks, pull request metadata and comments.

use async_trait::async_trait;
use reqwest::{StatusCode, header};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info};

use crate::cache::ResponseCache;
use crate::error::{Result, RhobotError};
use crate::webhook::RepoId;

const USER_AGENT: &str = concat!("rhobot/", env!("CARGO_PKG_VERSION"));

/// Head commit of a pull request, as needed to build it elsewhere
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullRequestInfo {
    pub head_sha: String,
    pub head_clone_url: String,
}

/// The subset of the GitHub API the bot talks to.
#[async_trait]
pub trait GitHubApi: Send + Sync {
    /// `Ok(false)` only when GitHub confirms the user is not a collaborator.
    async fn is_collaborator(&self, repo: &RepoId, username: &str) -> Result<bool>;

    async fn pull_request(&self, url: &str) -> Result<PullRequestInfo>;

    async fn post_comment(&self, repo: &RepoId, issue_number: u64, body: &str) -> Result<()>;
}

#[derive(Deserialize)]
struct PullRequest {
    head: PullRequestHead,
}

#[derive(Deserialize)]
struct PullRequestHead {
    sha: String,
    repo: Option<HeadRepository>,
}

#[derive(Deserialize)]
struct HeadRepository {
    clone_url: String,
}

#[derive(Serialize)]
struct NewComment<'a> {
    body: &'a str,
}

/// Maps the collaborator endpoint's status to a decision.
///
/// GitHub answers 204 for collaborators and 404 otherwise; 400 is also used
/// for users that cannot be collaborators. Anything else is indeterminate.
pub fn collaborator_decision(status: StatusCode) -> Option<bool> {
    match status {
        s if s.is_success() => Some(true),
        StatusCode::BAD_REQUEST | StatusCode::NOT_FOUND => Some(false),
        _ => None,
    }
}

/// `reqwest` backed GitHub client authenticated with a personal token
pub struct GitHubClient {
    http: reqwest::Client,
    api_url: String,
    token: String,
    cache: Mutex<ResponseCache<CachedResponse>>,
}

#[derive(Clone)]
struct CachedResponse {
    etag: String,
    body: String,
}

impl GitHubClient {
    pub fn new(
        api_url: &str,
        token: &str,
        timeout: Duration,
        cache_capacity: usize,
    ) -> Result<Self> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::ACCEPT,
            header::HeaderValue::from_static("application/vnd.github+json"),
        );
        headers.insert(
            "x-github-api-version",
            header::HeaderValue::from_static("2022-11-28"),
        );

        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|e| RhobotError::ConfigError(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            api_url: api_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
            cache: Mutex::new(ResponseCache::new(cache_capacity)),
        })
    }

    /// GET a JSON document, revalidating any cached copy with its ETag.
    ///
    /// The cached body is only served when GitHub answers `304 Not Modified`.
    async fn get_cached(&self, url: &str) -> Result<String> {
        let cached = self.cache.lock().await.get(url);

        let mut request = self.http.get(url).bearer_auth(&self.token);
        if let Some(cached) = &cached {
            request = request.header(header::IF_NONE_MATCH, &cached.etag);
        }

        let response = request
            .send()
            .await
            .map_err(|e| RhobotError::GitHubApi(format!("GET {} failed: {}", url, e)))?;

        let status = response.status();
        if status == StatusCode::NOT_MODIFIED {
            if let Some(cached) = cached {
                debug!("{} not modified, serving cached body", url);
                return Ok(cached.body);
            }
        }
        if !status.is_success() {
            return Err(RhobotError::GitHubApi(format!(
                "GET {} returned {}",
                url, status
            )));
        }

        let etag = response
            .headers()
            .get(header::ETAG)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response
            .text()
            .await
            .map_err(|e| RhobotError::GitHubApi(format!("GET {} body: {}", url, e)))?;

        let mut cache = self.cache.lock().await;
        match etag {
            Some(etag) => cache.insert(
                url.to_string(),
                CachedResponse {
                    etag,
                    body: body.clone(),
                },
            ),
            // Without a validator the copy could never be revalidated
            None => cache.remove(url),
        }
        Ok(body)
    }
}

#[async_trait]
impl GitHubApi for GitHubClient {
    async fn is_collaborator(&self, repo: &RepoId, username: &str) -> Result<bool> {
        let url = format!(
            "{}/repos/{}/{}/collaborators/{}",
            self.api_url, repo.owner, repo.name, username
        );
        let indeterminate = |message: String| RhobotError::AuthorizationCheck {
            user: username.to_string(),
            message,
        };

        // Never cached: a revoked collaborator must lose access immediately
        let response = self
            .http
            .get(&url)
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| indeterminate(format!("GET {} failed: {}", url, e)))?;

        let status = response.status();
        collaborator_decision(status).ok_or_else(|| {
            error!("Collaborator query for '{}' returned {}", username, status);
            indeterminate(format!("GET {} returned {}", url, status))
        })
    }

    async fn pull_request(&self, url: &str) -> Result<PullRequestInfo> {
        let body = self.get_cached(url).await?;
        let pr: PullRequest = serde_json::from_str(&body)
            .map_err(|e| RhobotError::GitHubApi(format!("Unexpected pull request JSON: {}", e)))?;

        let repo = pr.head.repo.ok_or_else(|| {
            RhobotError::GitHubApi(format!("Head repository of {} no longer exists", url))
        })?;

        Ok(PullRequestInfo {
            head_sha: pr.head.sha,
            head_clone_url: repo.clone_url,
        })
    }

    async fn post_comment(&self, repo: &RepoId, issue_number: u64, body: &str) -> Result<()> {
        let url = format!(
            "{}/repos/{}/{}/issues/{}/comments",
            self.api_url, repo.owner, repo.name, issue_number
        );

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.token)
            .json(&NewComment { body })
            .send()
            .await
            .map_err(|e| RhobotError::GitHubApi(format!("POST {} failed: {}", url, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(RhobotError::GitHubApi(format!(
                "POST {} returned {}",
                url, status
            )));
        }

        info!("Posted comment on {}#{}", repo, issue_number);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::{Path, State};
    use axum::http::HeaderMap;
    use axum::response::{IntoResponse, Response};
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use serde_json::{Value, json};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeGitHub {
        head_sha: std::sync::Mutex<String>,
        pr_fetches: AtomicUsize,
        not_modified: AtomicUsize,
        comments: std::sync::Mutex<Vec<String>>,
    }

    impl Default for FakeGitHub {
        fn default() -> Self {
            Self {
                head_sha: std::sync::Mutex::new("0123abcd".to_string()),
                pr_fetches: AtomicUsize::new(0),
                not_modified: AtomicUsize::new(0),
                comments: std::sync::Mutex::new(Vec::new()),
            }
        }
    }

    async fn collaborator(Path((_owner, _repo, user)): Path<(String, String, String)>) -> StatusCode {
        if user == "sleepy" {
            tokio::time::sleep(Duration::from_secs(5)).await;
        }
        match user.as_str() {
            "alice" => StatusCode::NO_CONTENT,
            "bob" => StatusCode::NOT_FOUND,
            "ghost" => StatusCode::BAD_REQUEST,
            "expired" => StatusCode::UNAUTHORIZED,
            _ => StatusCode::BAD_GATEWAY,
        }
    }

    async fn pull(State(fake): State<Arc<FakeGitHub>>, headers: HeaderMap) -> Response {
        assert_eq!(
            headers.get("authorization").and_then(|v| v.to_str().ok()),
            Some("Bearer token")
        );
        fake.pr_fetches.fetch_add(1, Ordering::SeqCst);

        let sha = fake.head_sha.lock().unwrap().clone();
        let etag = format!("\"{}\"", sha);
        if headers.get("if-none-match").and_then(|v| v.to_str().ok()) == Some(etag.as_str()) {
            fake.not_modified.fetch_add(1, Ordering::SeqCst);
            return (StatusCode::NOT_MODIFIED, [(header::ETAG, etag)]).into_response();
        }

        let body = Json(json!({
            "head": {
                "sha": sha,
                "repo": { "clone_url": "https://github.com/alice/rchain.git" }
            }
        }));
        ([(header::ETAG, etag)], body).into_response()
    }

    async fn comment(State(fake): State<Arc<FakeGitHub>>, Json(body): Json<Value>) -> StatusCode {
        let text = body["body"].as_str().unwrap_or_default().to_string();
        fake.comments.lock().unwrap().push(text);
        StatusCode::CREATED
    }

    async fn serve() -> (String, Arc<FakeGitHub>) {
        let fake = Arc::new(FakeGitHub::default());
        let app = Router::new()
            .route("/repos/{owner}/{repo}/collaborators/{user}", get(collaborator))
            .route("/repos/{owner}/{repo}/pulls/{number}", get(pull))
            .route("/repos/{owner}/{repo}/issues/{number}/comments", post(comment))
            .with_state(fake.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        (format!("http://{}", addr), fake)
    }

    fn repo() -> RepoId {
        RepoId {
            owner: "rchain".to_string(),
            name: "rchain".to_string(),
        }
    }

    fn client(api_url: &str) -> GitHubClient {
        GitHubClient::new(api_url, "token", Duration::from_secs(5), 10).unwrap()
    }

    #[test]
    fn decision_mapping() {
        assert_eq!(collaborator_decision(StatusCode::NO_CONTENT), Some(true));
        assert_eq!(collaborator_decision(StatusCode::OK), Some(true));
        assert_eq!(collaborator_decision(StatusCode::NOT_FOUND), Some(false));
        assert_eq!(collaborator_decision(StatusCode::BAD_REQUEST), Some(false));
        assert_eq!(collaborator_decision(StatusCode::UNAUTHORIZED), None);
        assert_eq!(collaborator_decision(StatusCode::FORBIDDEN), None);
        assert_eq!(collaborator_decision(StatusCode::INTERNAL_SERVER_ERROR), None);
    }

    #[tokio::test]
    async fn collaborator_query_distinguishes_no_from_unknown() {
        let (url, _fake) = serve().await;
        let client = client(&url);

        assert!(client.is_collaborator(&repo(), "alice").await.unwrap());
        assert!(!client.is_collaborator(&repo(), "bob").await.unwrap());
        assert!(!client.is_collaborator(&repo(), "ghost").await.unwrap());
        assert!(matches!(
            client.is_collaborator(&repo(), "expired").await,
            Err(RhobotError::AuthorizationCheck { .. })
        ));
        assert!(matches!(
            client.is_collaborator(&repo(), "someone").await,
            Err(RhobotError::AuthorizationCheck { .. })
        ));
    }

    #[tokio::test]
    async fn unreachable_api_is_indeterminate() {
        // Nothing listens on port 9 of localhost in the test environment
        let client = GitHubClient::new("http://127.0.0.1:9", "token", Duration::from_secs(1), 10)
            .unwrap();
        assert!(matches!(
            client.is_collaborator(&repo(), "alice").await,
            Err(RhobotError::AuthorizationCheck { .. })
        ));
    }

    #[tokio::test]
    async fn slow_api_is_indeterminate() {
        let (url, _fake) = serve().await;
        let client = GitHubClient::new(&url, "token", Duration::from_millis(500), 10).unwrap();

        let err = client.is_collaborator(&repo(), "sleepy").await.unwrap_err();
        assert!(matches!(err, RhobotError::AuthorizationCheck { .. }));
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn unchanged_pull_request_is_served_from_cache() {
        let (url, fake) = serve().await;
        let client = client(&url);
        let pr_url = format!("{}/repos/rchain/rchain/pulls/7", url);

        let first = client.pull_request(&pr_url).await.unwrap();
        let second = client.pull_request(&pr_url).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first.head_sha, "0123abcd");
        assert_eq!(first.head_clone_url, "https://github.com/alice/rchain.git");
        assert_eq!(fake.pr_fetches.load(Ordering::SeqCst), 2);
        assert_eq!(fake.not_modified.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn new_head_commit_replaces_cached_one() {
        let (url, fake) = serve().await;
        let client = client(&url);
        let pr_url = format!("{}/repos/rchain/rchain/pulls/7", url);

        let before = client.pull_request(&pr_url).await.unwrap();
        *fake.head_sha.lock().unwrap() = "4567cdef".to_string();
        let after = client.pull_request(&pr_url).await.unwrap();

        assert_eq!(before.head_sha, "0123abcd");
        assert_eq!(after.head_sha, "4567cdef");
        assert_eq!(fake.not_modified.load(Ordering::SeqCst), 0);

        // The fresh copy is what gets revalidated from now on
        let again = client.pull_request(&pr_url).await.unwrap();
        assert_eq!(again.head_sha, "4567cdef");
        assert_eq!(fake.not_modified.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn comment_is_posted() {
        let (url, fake) = serve().await;
        let client = client(&url);

        client
            .post_comment(&repo(), 7, "https://drone.example.org/rchain/perf-harness/42")
            .await
            .unwrap();

        let comments = fake.comments.lock().unwrap();
        assert_eq!(
            comments.as_slice(),
            ["https://drone.example.org/rchain/perf-harness/42"]
        );
    }
}
