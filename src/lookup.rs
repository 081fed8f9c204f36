// analysis-verify/src/lookup.rs

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};

/// What the lookup knows about a commit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitInfo {
    pub sha: String,
    pub author: Option<String>,
    pub date: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueInfo {
    pub number: u64,
    pub title: String,
    pub body: Option<String>,
    #[serde(default)]
    pub is_pull_request: bool,
}

impl IssueInfo {
    /// Case-insensitive keyword search over title and body.
    pub fn mentions_any(&self, keywords: &[String]) -> bool {
        let text = format!("{} {}", self.title, self.body.as_deref().unwrap_or_default()).to_lowercase();
        keywords.iter().any(|kw| text.contains(&kw.to_lowercase()))
    }
}

/// The lookup could not answer; distinct from "answered: does not exist".
#[derive(Debug, thiserror::Error)]
pub enum LookupError {
    #[error("transport error for {endpoint}: {message}")]
    Transport { endpoint: String, message: String },
    #[error("not authorized for {endpoint} (status {status})")]
    Unauthorized { endpoint: String, status: u16 },
    #[error("unexpected status {status} for {endpoint}: {body}")]
    Status { endpoint: String, status: u16, body: String },
    #[error("malformed response for {endpoint}: {message}")]
    Decode { endpoint: String, message: String },
    #[error("issue listing still full after {pages} pages of {per_page}; raise github.max_issue_pages")]
    Truncated { pages: u32, per_page: u32 },
}

/// Source of truth for referenced commits and issues.
pub trait ExternalLookup {
    fn name(&self) -> &'static str;
    /// False for stand-ins; the validator only runs reference checks against a live lookup.
    fn is_live(&self) -> bool;
    fn commit(&self, sha: &str) -> Result<Option<CommitInfo>, LookupError>;
    fn issue(&self, number: u64) -> Result<Option<IssueInfo>, LookupError>;
    /// One page of the repository's issue list (1-based).
    fn issue_page(&self, page: u32, per_page: u32) -> Result<Vec<IssueInfo>, LookupError>;
}

/// No-op lookup for mock mode. Never touches the network and knows nothing;
/// the validator does not run reference checks against a lookup that is not live.
#[derive(Debug, Default)]
pub struct OfflineLookup {
    calls: AtomicUsize,
}

impl OfflineLookup {
    pub fn new() -> Self { Self::default() }

    /// Number of queries answered so far.
    pub fn calls(&self) -> usize { self.calls.load(Ordering::SeqCst) }

    fn tick(&self) { self.calls.fetch_add(1, Ordering::SeqCst); }
}

impl ExternalLookup for OfflineLookup {
    fn name(&self) -> &'static str { "offline" }
    fn is_live(&self) -> bool { false }

    fn commit(&self, _sha: &str) -> Result<Option<CommitInfo>, LookupError> {
        self.tick();
        Ok(None)
    }

    fn issue(&self, _number: u64) -> Result<Option<IssueInfo>, LookupError> {
        self.tick();
        Ok(None)
    }

    fn issue_page(&self, _page: u32, _per_page: u32) -> Result<Vec<IssueInfo>, LookupError> {
        self.tick();
        Ok(Vec::new())
    }
}
