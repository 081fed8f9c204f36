use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fs, path::{Path, PathBuf}};

/// Config is merged: defaults -> user -> workspace -> explicit file -> cli overlay
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub fields: FieldsConfig,
    pub checks: ChecksConfig,
    pub parameters: ParametersConfig,
    pub issues: IssuesConfig,
    pub github: GithubConfig,
    pub report: ReportConfig,
    /// Whether failing lookups gate the overall status.
    pub policy: Option<Policy>,
}

/// How external (lookup-derived) failures affect the overall status.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Policy {
    #[default]
    Strict,
    Advisory,
}

/// Record key for one required field; the first match among `key` then `aliases` wins.
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(default)]
pub struct FieldKey {
    pub key: String,
    pub aliases: Vec<String>,
}

impl FieldKey {
    fn new(key: &str, aliases: &[&str]) -> Self {
        Self { key: key.into(), aliases: aliases.iter().map(|a| a.to_string()).collect() }
    }
    pub fn candidates(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.key.as_str()).chain(self.aliases.iter().map(String::as_str))
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct FieldsConfig {
    pub commit: FieldKey,
    pub changes: FieldKey,
    pub issue: FieldKey,
    pub commit_author: String,
    pub commit_date: String,
}
impl Default for FieldsConfig {
    fn default() -> Self {
        Self {
            commit: FieldKey::new("commit", &["target_commit_sha"]),
            changes: FieldKey::new("changes", &["parameter_changes"]),
            issue: FieldKey::new("issue", &["related_issue_number_list", "issues"]),
            commit_author: "commit_author".into(),
            commit_date: "commit_date".into(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ChecksConfig {
    pub verify_commit: Option<bool>,
    pub verify_parameters: Option<bool>,
    pub verify_issues: Option<bool>,
    pub date_format: Option<String>,     // regex, default ^\d{4}-\d{2}-\d{2}$
    pub schema_path: Option<PathBuf>,    // JSON schema the record must satisfy
}

impl ChecksConfig {
    pub const DEFAULT_DATE_FORMAT: &'static str = r"^\d{4}-\d{2}-\d{2}$";

    pub fn commit_enabled(&self) -> bool { self.verify_commit.unwrap_or(true) }
    pub fn parameters_enabled(&self) -> bool { self.verify_parameters.unwrap_or(true) }
    pub fn issues_enabled(&self) -> bool { self.verify_issues.unwrap_or(true) }
    pub fn date_format(&self) -> &str { self.date_format.as_deref().unwrap_or(Self::DEFAULT_DATE_FORMAT) }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ParameterMode {
    /// Every checked parameter actually changed.
    #[default]
    Any,
    /// before/after equal the expected pair.
    Exact,
    /// `before` lies inside the configured range.
    Range,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ExpectedChange { pub before: serde_json::Value, pub after: serde_json::Value }

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct BeforeRange { pub min_before: f64, pub max_before: f64 }

#[derive(Clone, Debug, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ParametersConfig {
    /// `Some(vec![])` in a later layer clears an earlier list.
    pub required: Option<Vec<String>>,
    pub mode: Option<ParameterMode>,
    pub expected: BTreeMap<String, ExpectedChange>,
    pub ranges: BTreeMap<String, BeforeRange>,
}

#[derive(Clone, Debug, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct IssuesConfig {
    pub keywords: Option<Vec<String>>,        // e.g. ["oom","memory"]
    pub include_pull_requests: Option<bool>,
    pub allow_empty: Option<bool>,
    pub require_complete: Option<bool>,       // referenced set == keyword-matching set
}

impl ParametersConfig {
    pub fn required(&self) -> &[String] { self.required.as_deref().unwrap_or_default() }
}

impl IssuesConfig {
    pub fn keywords(&self) -> &[String] { self.keywords.as_deref().unwrap_or_default() }
}

#[derive(Clone, Debug, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct GithubConfig {
    pub api_base: Option<String>,             // default https://api.github.com
    pub token_var: Option<String>,            // default MCP_GITHUB_TOKEN
    pub owner_var: Option<String>,            // default REPO_OWNER
    pub repo_var: Option<String>,             // default REPO_NAME
    pub timeout_secs: Option<u64>,
    pub fallback_to_mock: Option<bool>,
    pub max_issue_pages: Option<u32>,         // listing past this many pages is an error
}

impl GithubConfig {
    pub fn api_base(&self) -> &str { self.api_base.as_deref().unwrap_or("https://api.github.com") }
    pub fn token_var(&self) -> &str { self.token_var.as_deref().unwrap_or("MCP_GITHUB_TOKEN") }
    pub fn owner_var(&self) -> &str { self.owner_var.as_deref().unwrap_or("REPO_OWNER") }
    pub fn repo_var(&self) -> &str { self.repo_var.as_deref().unwrap_or("REPO_NAME") }
    pub fn timeout_secs(&self) -> u64 { self.timeout_secs.unwrap_or(10) }
    pub fn fallback_to_mock(&self) -> bool { self.fallback_to_mock.unwrap_or(true) }
    pub fn max_issue_pages(&self) -> u32 { self.max_issue_pages.unwrap_or(100).max(1) }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ReportFormat {
    #[default]
    Json,
    Yaml,
}

impl ReportFormat {
    pub fn extension(&self) -> &'static str {
        match self { Self::Json => "json", Self::Yaml => "yaml" }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ReportConfig {
    pub dir: Option<PathBuf>,       // default: ./reports
    pub format: Option<ReportFormat>,
}

impl ReportConfig {
    pub fn dir(&self) -> PathBuf { self.dir.clone().unwrap_or_else(|| PathBuf::from("reports")) }
    pub fn format(&self) -> ReportFormat { self.format.unwrap_or_default() }
}

impl Config {
    pub fn policy(&self) -> Policy { self.policy.unwrap_or_default() }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Scope { User, Workspace, Explicit, Overlay }

/// Resolves the configuration layers for one run.
#[derive(Clone, Debug)]
pub struct ConfigManager {
    merged: Config,
}

impl ConfigManager {
    pub fn load(workspace_root: impl AsRef<Path>, explicit: Option<&Path>) -> Result<Self> {
        let user_dir = ProjectDirs::from("dev", "analysis-verify", "analysis-verify")
            .map(|p| p.config_dir().to_path_buf());
        let workspace_dir = workspace_root.as_ref().join(".analysis-verify");
        Self::from_dirs(user_dir, workspace_dir, explicit)
    }

    pub fn from_dirs(user_dir: Option<PathBuf>, workspace_dir: PathBuf, explicit: Option<&Path>) -> Result<Self> {
        let mut merged = Config::default();
        if let Some(dir) = &user_dir { merge(&mut merged, &read_yaml_dir(dir, Scope::User)?); }
        merge(&mut merged, &read_yaml_dir(&workspace_dir, Scope::Workspace)?);
        if let Some(path) = explicit {
            let part = read_yaml_file(path).with_context(|| format!("load config {}", path.display()))?;
            tracing::debug!(scope = ?Scope::Explicit, path = %path.display(), "config layer");
            merge(&mut merged, &part);
        }
        Ok(Self { merged })
    }

    pub fn get(&self) -> &Config { &self.merged }
    pub fn into_config(self) -> Config { self.merged }

    /// In-memory overlay from command-line flags (not persisted).
    pub fn apply_overlay(&mut self, patch: &Config) {
        tracing::debug!(scope = ?Scope::Overlay, "config layer");
        merge(&mut self.merged, patch);
    }
}

fn read_yaml_file(path: &Path) -> Result<Config> {
    let text = fs::read_to_string(path)?;
    if text.trim().is_empty() { return Ok(Config::default()); }
    Ok(serde_yml::from_str::<Config>(&text)?)
}

fn read_yaml_dir(dir: &Path, scope: Scope) -> Result<Config> {
    // Merge all *.yaml in directory (lexicographic order)
    let mut cfg = Config::default();
    let Ok(rd) = fs::read_dir(dir) else { return Ok(cfg); };
    let mut files: Vec<PathBuf> = rd.filter_map(|e| e.ok().map(|x| x.path()))
                                    .filter(|p| p.extension().is_some_and(|e| e=="yaml"||e=="yml"))
                                    .collect();
    files.sort();
    for f in files {
        let part = read_yaml_file(&f).with_context(|| format!("parse config yaml: {}", f.display()))?;
        tracing::debug!(?scope, path = %f.display(), "config layer");
        merge(&mut cfg, &part);
    }
    Ok(cfg)
}

fn merge(a: &mut Config, b: &Config) {
    let overlay = |dst: &mut Option<String>, src: &Option<String>| { if src.is_some() { *dst = src.clone(); } };
    macro_rules! opt { ($dst:expr, $src:expr) => { if $src.is_some() { $dst = $src.clone(); } } }

    // fields: a layer only overrides names it actually sets
    let d = FieldsConfig::default();
    let fields = |dst: &mut FieldKey, src: &FieldKey| {
        if !src.key.is_empty() { dst.key = src.key.clone(); }
        if !src.aliases.is_empty() { dst.aliases = src.aliases.clone(); }
    };
    if b.fields.commit != d.commit { fields(&mut a.fields.commit, &b.fields.commit); }
    if b.fields.changes != d.changes { fields(&mut a.fields.changes, &b.fields.changes); }
    if b.fields.issue != d.issue { fields(&mut a.fields.issue, &b.fields.issue); }
    if !b.fields.commit_author.is_empty() && b.fields.commit_author != d.commit_author { a.fields.commit_author = b.fields.commit_author.clone(); }
    if !b.fields.commit_date.is_empty() && b.fields.commit_date != d.commit_date { a.fields.commit_date = b.fields.commit_date.clone(); }

    // checks
    opt!(a.checks.verify_commit, b.checks.verify_commit);
    opt!(a.checks.verify_parameters, b.checks.verify_parameters);
    opt!(a.checks.verify_issues, b.checks.verify_issues);
    overlay(&mut a.checks.date_format, &b.checks.date_format);
    opt!(a.checks.schema_path, b.checks.schema_path);

    // parameters
    opt!(a.parameters.required, b.parameters.required);
    opt!(a.parameters.mode, b.parameters.mode);
    for (k, v) in &b.parameters.expected { a.parameters.expected.insert(k.clone(), v.clone()); }
    for (k, v) in &b.parameters.ranges { a.parameters.ranges.insert(k.clone(), *v); }

    // issues
    opt!(a.issues.keywords, b.issues.keywords);
    opt!(a.issues.include_pull_requests, b.issues.include_pull_requests);
    opt!(a.issues.allow_empty, b.issues.allow_empty);
    opt!(a.issues.require_complete, b.issues.require_complete);

    // github
    overlay(&mut a.github.api_base, &b.github.api_base);
    overlay(&mut a.github.token_var, &b.github.token_var);
    overlay(&mut a.github.owner_var, &b.github.owner_var);
    overlay(&mut a.github.repo_var, &b.github.repo_var);
    opt!(a.github.timeout_secs, b.github.timeout_secs);
    opt!(a.github.fallback_to_mock, b.github.fallback_to_mock);
    opt!(a.github.max_issue_pages, b.github.max_issue_pages);

    // report, policy
    opt!(a.report.dir, b.report.dir);
    opt!(a.report.format, b.report.format);
    opt!(a.policy, b.policy);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn later_layers_override_earlier_ones() {
        let tmp = tempfile::tempdir().unwrap();
        let ws = tmp.path().join(".analysis-verify");
        fs::create_dir_all(&ws).unwrap();
        fs::write(ws.join("10-base.yaml"), "policy: advisory\nissues:\n  keywords: [oom]\n").unwrap();
        fs::write(ws.join("20-more.yml"), "issues:\n  allow_empty: true\nreport:\n  format: yaml\n").unwrap();
        let explicit = tmp.path().join("explicit.yaml");
        fs::write(&explicit, "policy: strict\n").unwrap();

        let cm = ConfigManager::from_dirs(None, ws, Some(&explicit)).unwrap();
        let cfg = cm.get();
        assert_eq!(cfg.policy(), Policy::Strict);
        assert_eq!(cfg.issues.keywords(), ["oom".to_string()]);
        assert_eq!(cfg.issues.allow_empty, Some(true));
        assert_eq!(cfg.report.format(), ReportFormat::Yaml);
    }

    #[test]
    fn empty_list_in_later_layer_clears_earlier_one() {
        let tmp = tempfile::tempdir().unwrap();
        let ws = tmp.path().join(".analysis-verify");
        fs::create_dir_all(&ws).unwrap();
        fs::write(ws.join("10-base.yaml"), "parameters:\n  required: [x, y]\nissues:\n  keywords: [oom]\n").unwrap();
        let explicit = tmp.path().join("explicit.yaml");
        fs::write(&explicit, "parameters:\n  required: []\nissues:\n  keywords: []\n").unwrap();

        let cm = ConfigManager::from_dirs(None, ws.clone(), None).unwrap();
        assert_eq!(cm.get().parameters.required(), ["x".to_string(), "y".to_string()]);

        let cm = ConfigManager::from_dirs(None, ws, Some(&explicit)).unwrap();
        assert!(cm.get().parameters.required().is_empty());
        assert!(cm.get().issues.keywords().is_empty());
    }

    #[test]
    fn missing_dirs_yield_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let cm = ConfigManager::from_dirs(Some(tmp.path().join("nope")), tmp.path().join("also-nope"), None).unwrap();
        let cfg = cm.get();
        assert_eq!(cfg.policy(), Policy::Strict);
        assert_eq!(cfg.fields.commit.key, "commit");
        assert_eq!(cfg.report.dir(), PathBuf::from("reports"));
        assert_eq!(cfg.checks.date_format(), ChecksConfig::DEFAULT_DATE_FORMAT);
        assert_eq!(cfg.github.max_issue_pages(), 100);
    }

    #[test]
    fn field_names_can_be_remapped() {
        let tmp = tempfile::tempdir().unwrap();
        let explicit = tmp.path().join("fields.yaml");
        fs::write(&explicit, "fields:\n  commit:\n    key: sha\n").unwrap();
        let cm = ConfigManager::from_dirs(None, tmp.path().join("ws"), Some(&explicit)).unwrap();
        let keys: Vec<&str> = cm.get().fields.commit.candidates().collect();
        assert_eq!(keys, vec!["sha", "target_commit_sha"]);
        assert_eq!(cm.get().fields.issue.key, "issue");
    }

    #[test]
    fn overlay_wins_over_files() {
        let tmp = tempfile::tempdir().unwrap();
        let mut cm = ConfigManager::from_dirs(None, tmp.path().to_path_buf(), None).unwrap();
        let mut patch = Config::default();
        patch.policy = Some(Policy::Advisory);
        patch.report.dir = Some(tmp.path().join("out"));
        cm.apply_overlay(&patch);
        assert_eq!(cm.get().policy(), Policy::Advisory);
        assert_eq!(cm.get().report.dir(), tmp.path().join("out"));
    }

    #[test]
    fn malformed_yaml_is_reported_with_path() {
        let tmp = tempfile::tempdir().unwrap();
        let explicit = tmp.path().join("bad.yaml");
        fs::write(&explicit, "policy: [not, a, policy]\n").unwrap();
        let err = ConfigManager::from_dirs(None, tmp.path().join("ws"), Some(&explicit)).unwrap_err();
        assert!(format!("{err:#}").contains("bad.yaml"));
    }
}
