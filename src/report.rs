// analysis-verify/src/report.rs

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::{fmt::Write as _, fs, path::{Path, PathBuf}};

use crate::config::{Policy, ReportFormat};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode { Mock, Real }

/// Field-level rules always gate; external ones gate only under `strict`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind { Required, External }

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub rule: String,
    pub passed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub kind: RuleKind,
}

impl ValidationResult {
    pub fn pass(rule: impl Into<String>, kind: RuleKind) -> Self {
        Self { rule: rule.into(), passed: true, message: None, kind }
    }
    pub fn fail(rule: impl Into<String>, kind: RuleKind, message: impl Into<String>) -> Self {
        Self { rule: rule.into(), passed: false, message: Some(message.into()), kind }
    }
}

/// Outcome of one validation pass. Holds nothing time-dependent.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Report {
    pub mode: Mode,
    pub policy: Policy,
    pub results: Vec<ValidationResult>,
    pub passed: bool,
}

impl Report {
    /// Computes the overall status from the results and policy.
    pub fn new(mode: Mode, policy: Policy, results: Vec<ValidationResult>) -> Self {
        let passed = results.iter().all(|r| r.passed || (r.kind == RuleKind::External && policy == Policy::Advisory));
        Self { mode, policy, results, passed }
    }

    pub fn result(&self, rule: &str) -> Option<&ValidationResult> {
        self.results.iter().find(|r| r.rule == rule)
    }

    pub fn failures(&self) -> impl Iterator<Item = &ValidationResult> {
        self.results.iter().filter(|r| !r.passed)
    }
}

/// What lands on disk: the report plus run metadata.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReportEnvelope {
    pub run_id: String,
    pub generated_at: String,
    pub source: Option<PathBuf>,
    pub report: Report,
}

#[derive(Debug, thiserror::Error)]
pub enum WriteError {
    #[error("create report dir {path}: {source}")]
    CreateDir { path: PathBuf, #[source] source: std::io::Error },
    #[error("write report {path}: {source}")]
    Write { path: PathBuf, #[source] source: std::io::Error },
    #[error("serialize report: {0}")]
    Serialize(String),
}

#[derive(Clone, Debug)]
pub struct ReportWriter {
    dir: PathBuf,
    format: ReportFormat,
}

impl ReportWriter {
    pub const FILE_STEM: &'static str = "verification_report";

    pub fn new(dir: impl Into<PathBuf>, format: ReportFormat) -> Self { Self { dir: dir.into(), format } }

    pub fn path(&self) -> PathBuf { self.dir.join(format!("{}.{}", Self::FILE_STEM, self.format.extension())) }

    pub fn write(&self, report: &Report, source: Option<&Path>) -> Result<PathBuf, WriteError> {
        fs::create_dir_all(&self.dir).map_err(|source| WriteError::CreateDir { path: self.dir.clone(), source })?;
        let envelope = ReportEnvelope {
            run_id: uuid::Uuid::new_v4().to_string(),
            generated_at: Utc::now().to_rfc3339(),
            source: source.map(Path::to_path_buf),
            report: report.clone(),
        };
        let text = match self.format {
            ReportFormat::Json => serde_json::to_string_pretty(&envelope).map_err(|e| WriteError::Serialize(e.to_string()))?,
            ReportFormat::Yaml => serde_yml::to_string(&envelope).map_err(|e| WriteError::Serialize(e.to_string()))?,
        };
        let path = self.path();
        fs::write(&path, text).map_err(|source| WriteError::Write { path: path.clone(), source })?;
        tracing::info!(path = %path.display(), passed = report.passed, "report written");
        Ok(path)
    }
}

/// Human-readable per-rule listing.
pub fn render_summary(report: &Report) -> String {
    let mut s = String::new();
    for r in &report.results {
        let mark = if r.passed { "ok  " } else if r.kind == RuleKind::External && report.policy == Policy::Advisory { "warn" } else { "FAIL" };
        let _ = write!(s, "[{mark}] {}", r.rule);
        if let Some(m) = &r.message { let _ = write!(s, ": {m}"); }
        s.push('\n');
    }
    let _ = writeln!(s, "{}", "=".repeat(60));
    let verdict = if report.passed { "all verification checks passed" } else { "some verification checks failed" };
    let _ = writeln!(s, "{verdict} ({} mode, {} policy)", mode_name(report.mode), policy_name(report.policy));
    s
}

fn mode_name(m: Mode) -> &'static str { match m { Mode::Mock => "mock", Mode::Real => "real" } }
fn policy_name(p: Policy) -> &'static str { match p { Policy::Strict => "strict", Policy::Advisory => "advisory" } }
