//! GitHub REST client backing real-mode reference checks.
//!
//! Wraps the `commits/{sha}`, `issues/{n}` and `issues?page=` endpoints of
//! one repository using a blocking [`reqwest`] client. Timeouts are owned
//! here, not by the validator.

use serde::Deserialize;
use std::time::Duration;

use crate::config::GithubConfig;
use crate::lookup::{CommitInfo, ExternalLookup, IssueInfo, LookupError};

/// Live lookup against a single `owner/repo`.
pub struct GithubLookup {
    client: reqwest::blocking::Client,
    api_base: String,
    owner: String,
    repo: String,
    token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CommitResponse {
    sha: String,
    author: Option<LoginRef>,
    commit: Option<CommitBody>,
}

#[derive(Debug, Deserialize)]
struct LoginRef { login: Option<String> }

#[derive(Debug, Deserialize)]
struct CommitBody { author: Option<GitSignature> }

#[derive(Debug, Deserialize)]
struct GitSignature { name: Option<String>, date: Option<String> }

#[derive(Debug, Deserialize)]
struct IssueResponse {
    number: u64,
    #[serde(default)]
    title: String,
    body: Option<String>,
    pull_request: Option<serde_json::Value>,
}

impl From<IssueResponse> for IssueInfo {
    fn from(r: IssueResponse) -> Self {
        Self { number: r.number, title: r.title, body: r.body, is_pull_request: r.pull_request.is_some() }
    }
}

impl From<CommitResponse> for CommitInfo {
    fn from(r: CommitResponse) -> Self {
        let signature = r.commit.and_then(|c| c.author);
        // login first, fall back to the git author name
        let author = r.author.and_then(|a| a.login)
            .or_else(|| signature.as_ref().and_then(|s| s.name.clone()));
        let date = signature.and_then(|s| s.date);
        Self { sha: r.sha, author, date }
    }
}

/// Outcome class of one HTTP status.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum StatusClass { Found, NotFound, Unauthorized, Other }

pub(crate) fn classify(status: u16) -> StatusClass {
    match status {
        200..=299 => StatusClass::Found,
        404 | 422 => StatusClass::NotFound,
        401 | 403 => StatusClass::Unauthorized,
        _ => StatusClass::Other,
    }
}

impl GithubLookup {
    pub fn new(cfg: &GithubConfig, owner: impl Into<String>, repo: impl Into<String>, token: Option<String>) -> Result<Self, LookupError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs()))
            .user_agent(concat!("analysis-verify/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| LookupError::Transport { endpoint: cfg.api_base().into(), message: e.to_string() })?;
        Ok(Self {
            client,
            api_base: cfg.api_base().trim_end_matches('/').to_string(),
            owner: owner.into(),
            repo: repo.into(),
            token,
        })
    }

    pub fn repo_slug(&self) -> String { format!("{}/{}", self.owner, self.repo) }

    fn url(&self, endpoint: &str) -> String {
        format!("{}/repos/{}/{}/{}", self.api_base, self.owner, self.repo, endpoint)
    }

    /// GET an endpoint; `Ok(None)` on 404.
    fn get_json<T: serde::de::DeserializeOwned>(&self, endpoint: &str) -> Result<Option<T>, LookupError> {
        let mut req = self.client.get(self.url(endpoint))
            .header(reqwest::header::ACCEPT, "application/vnd.github.v3+json");
        if let Some(token) = &self.token {
            req = req.header(reqwest::header::AUTHORIZATION, format!("token {token}"));
        }
        tracing::debug!(endpoint, "github request");
        let resp = req.send()
            .map_err(|e| LookupError::Transport { endpoint: endpoint.into(), message: e.to_string() })?;
        let status = resp.status().as_u16();
        match classify(status) {
            StatusClass::Found => resp.json::<T>()
                .map(Some)
                .map_err(|e| LookupError::Decode { endpoint: endpoint.into(), message: e.to_string() }),
            StatusClass::NotFound => Ok(None),
            StatusClass::Unauthorized => Err(LookupError::Unauthorized { endpoint: endpoint.into(), status }),
            StatusClass::Other => {
                let body = resp.text().unwrap_or_else(|_| "<unreadable body>".to_string());
                Err(LookupError::Status { endpoint: endpoint.into(), status, body })
            }
        }
    }
}

impl ExternalLookup for GithubLookup {
    fn name(&self) -> &'static str { "github" }
    fn is_live(&self) -> bool { true }

    fn commit(&self, sha: &str) -> Result<Option<CommitInfo>, LookupError> {
        Ok(self.get_json::<CommitResponse>(&format!("commits/{sha}"))?.map(CommitInfo::from))
    }

    fn issue(&self, number: u64) -> Result<Option<IssueInfo>, LookupError> {
        Ok(self.get_json::<IssueResponse>(&format!("issues/{number}"))?.map(IssueInfo::from))
    }

    fn issue_page(&self, page: u32, per_page: u32) -> Result<Vec<IssueInfo>, LookupError> {
        let endpoint = format!("issues?state=all&per_page={per_page}&page={page}");
        let items = self.get_json::<Vec<IssueResponse>>(&endpoint)?.unwrap_or_default();
        Ok(items.into_iter().map(IssueInfo::from).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classes() {
        assert_eq!(classify(200), StatusClass::Found);
        assert_eq!(classify(404), StatusClass::NotFound);
        assert_eq!(classify(422), StatusClass::NotFound);
        assert_eq!(classify(401), StatusClass::Unauthorized);
        assert_eq!(classify(403), StatusClass::Unauthorized);
        assert_eq!(classify(500), StatusClass::Other);
    }

    #[test]
    fn commit_author_falls_back_to_git_name() {
        let raw = r#"{"sha":"abc","author":null,"commit":{"author":{"name":"Jo","date":"2025-09-10T00:00:00Z"}}}"#;
        let info: CommitInfo = serde_json::from_str::<CommitResponse>(raw).unwrap().into();
        assert_eq!(info.author.as_deref(), Some("Jo"));
        assert_eq!(info.date.as_deref(), Some("2025-09-10T00:00:00Z"));

        let raw = r#"{"sha":"abc","author":{"login":"jo-gh"},"commit":{"author":{"name":"Jo"}}}"#;
        let info: CommitInfo = serde_json::from_str::<CommitResponse>(raw).unwrap().into();
        assert_eq!(info.author.as_deref(), Some("jo-gh"));
    }

    #[test]
    fn pull_requests_are_flagged() {
        let raw = r#"{"number":5,"title":"t","body":null,"pull_request":{"url":"x"}}"#;
        let info: IssueInfo = serde_json::from_str::<IssueResponse>(raw).unwrap().into();
        assert!(info.is_pull_request);
    }

    #[test]
    fn unreachable_host_is_a_transport_error() {
        let cfg = GithubConfig { api_base: Some("http://127.0.0.1:9".into()), timeout_secs: Some(2), ..Default::default() };
        let gh = GithubLookup::new(&cfg, "o", "r", None).unwrap();
        assert_eq!(gh.repo_slug(), "o/r");
        let err = gh.commit("abc").unwrap_err();
        assert!(matches!(err, LookupError::Transport { .. }));
    }
}
