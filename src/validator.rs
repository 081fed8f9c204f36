// analysis-verify/src/validator.rs

use regex::Regex;
use serde_json::Value;
use std::{collections::{BTreeMap, BTreeSet}, fs};

use crate::{
    config::{Config, ParameterMode, Policy},
    lookup::{ExternalLookup, LookupError},
    record::{self, IssueRef, ParameterChange, Record},
    report::{Mode, Report, RuleKind, ValidationResult},
};

#[derive(Debug, thiserror::Error)]
pub enum ValidateError {
    #[error("no record supplied")]
    MissingRecord,
    /// The lookup could not answer, so the reference checks are inconclusive.
    #[error("external lookup failed: {0}")]
    ExternalLookup(#[from] LookupError),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

const SHA_PATTERN: &str = r"^[0-9a-fA-F]{7,40}$";
const ISSUES_PER_PAGE: u32 = 100;

/// Single-pass check of one record. Performs no I/O except through `lookup`.
pub struct Validator<'a> {
    cfg: &'a Config,
    lookup: &'a dyn ExternalLookup,
    sha_re: Regex,
    date_re: Regex,
    schema: Option<jsonschema::Validator>,
}

impl<'a> Validator<'a> {
    pub fn new(cfg: &'a Config, lookup: &'a dyn ExternalLookup) -> Result<Self, ValidateError> {
        if cfg.checks.issues_enabled() && cfg.issues.require_complete.unwrap_or(false) && cfg.issues.keywords().is_empty() {
            return Err(ValidateError::InvalidConfig("issues.require_complete needs issues.keywords".into()));
        }
        let sha_re = Regex::new(SHA_PATTERN).map_err(|e| ValidateError::InvalidConfig(e.to_string()))?;
        let date_re = Regex::new(cfg.checks.date_format())
            .map_err(|e| ValidateError::InvalidConfig(format!("checks.date_format: {e}")))?;
        let schema = match &cfg.checks.schema_path {
            None => None,
            Some(path) => {
                let text = fs::read_to_string(path)
                    .map_err(|e| ValidateError::InvalidConfig(format!("read schema {}: {e}", path.display())))?;
                let value: Value = serde_json::from_str(&text)
                    .map_err(|e| ValidateError::InvalidConfig(format!("parse schema {}: {e}", path.display())))?;
                let compiled = jsonschema::validator_for(&value)
                    .map_err(|e| ValidateError::InvalidConfig(format!("compile schema {}: {e}", path.display())))?;
                Some(compiled)
            }
        };
        Ok(Self { cfg, lookup, sha_re, date_re, schema })
    }

    pub fn mode(&self) -> Mode { if self.lookup.is_live() { Mode::Real } else { Mode::Mock } }

    pub fn validate(&self, record: Option<&Record>) -> Result<Report, ValidateError> {
        let record = record.ok_or(ValidateError::MissingRecord)?;
        let mut out = Vec::new();

        let commit = self.check_commit(record, &mut out);
        let changes = self.check_changes(record, &mut out);
        let issues = self.check_issues(record, &mut out);
        let author = self.check_optional(record, &mut out);

        if self.cfg.checks.parameters_enabled() {
            if let Some(changes) = &changes { out.push(self.check_parameters(changes)); }
        }
        if let Some(schema) = &self.schema {
            out.push(check_schema(schema, record));
        }

        if self.lookup.is_live() {
            tracing::debug!(lookup = self.lookup.name(), "running reference checks");
            if self.cfg.checks.commit_enabled() {
                if let Some(sha) = &commit { self.check_commit_ref(sha, author.as_deref(), &mut out)?; }
            }
            if self.cfg.checks.issues_enabled() {
                if let Some(refs) = &issues { self.check_issue_refs(refs, &mut out)?; }
            }
        }

        let report = Report::new(self.mode(), self.cfg.policy(), out);
        for r in report.failures() {
            tracing::debug!(rule = %r.rule, message = r.message.as_deref().unwrap_or_default(), "rule failed");
        }
        tracing::info!(passed = report.passed, rules = report.results.len(), "validation finished");
        Ok(report)
    }

    // ---- required fields ----

    fn check_commit(&self, record: &Record, out: &mut Vec<ValidationResult>) -> Option<String> {
        let rule = self.cfg.fields.commit.key.as_str();
        match record.lookup(&self.cfg.fields.commit) {
            None => { out.push(missing(rule)); None }
            Some(Value::String(s)) if !s.trim().is_empty() => {
                out.push(ValidationResult::pass(rule, RuleKind::Required));
                Some(s.trim().to_string())
            }
            Some(Value::String(_)) => { out.push(malformed(rule, "must be a non-empty string")); None }
            Some(other) => {
                out.push(malformed(rule, format!("expected string, got {}", record::kind_name(other))));
                None
            }
        }
    }

    fn check_changes(&self, record: &Record, out: &mut Vec<ValidationResult>) -> Option<Vec<ParameterChange>> {
        let rule = self.cfg.fields.changes.key.as_str();
        let Some(value) = record.lookup(&self.cfg.fields.changes) else { out.push(missing(rule)); return None; };
        match record::parameter_changes(value) {
            Ok(changes) => { out.push(ValidationResult::pass(rule, RuleKind::Required)); Some(changes) }
            Err(e) => { out.push(malformed(rule, e)); None }
        }
    }

    fn check_issues(&self, record: &Record, out: &mut Vec<ValidationResult>) -> Option<Vec<IssueRef>> {
        let rule = self.cfg.fields.issue.key.as_str();
        let Some(value) = record.lookup(&self.cfg.fields.issue) else { out.push(missing(rule)); return None; };
        match record::issue_refs(value) {
            Ok(refs) if refs.is_empty() && !self.cfg.issues.allow_empty.unwrap_or(false) => {
                out.push(malformed(rule, "must not be empty"));
                None
            }
            Ok(refs) => { out.push(ValidationResult::pass(rule, RuleKind::Required)); Some(refs) }
            Err(e) => { out.push(malformed(rule, e)); None }
        }
    }

    /// `commit_date` and `commit_author` are checked only when present. Returns the author.
    fn check_optional(&self, record: &Record, out: &mut Vec<ValidationResult>) -> Option<String> {
        let date_key = self.cfg.fields.commit_date.as_str();
        match record.get(date_key) {
            None => {}
            Some(Value::String(d)) if self.date_re.is_match(d) => out.push(ValidationResult::pass(date_key, RuleKind::Required)),
            Some(other) => out.push(malformed(date_key, format!(
                "invalid date format: {}; expected {}", display_value(other), self.cfg.checks.date_format()))),
        }

        let author_key = self.cfg.fields.commit_author.as_str();
        match record.get(author_key) {
            None => None,
            Some(Value::String(a)) if !a.trim().is_empty() => {
                out.push(ValidationResult::pass(author_key, RuleKind::Required));
                Some(a.trim().to_string())
            }
            Some(_) => { out.push(malformed(author_key, "must be a non-empty string")); None }
        }
    }

    fn check_parameters(&self, changes: &[ParameterChange]) -> ValidationResult {
        const RULE: &str = "parameters";
        let p = &self.cfg.parameters;
        let by_name: BTreeMap<&str, &ParameterChange> = changes.iter().map(|c| (c.param.as_str(), c)).collect();
        let mut problems = Vec::new();

        for req in p.required() {
            if !by_name.contains_key(req.as_str()) { problems.push(format!("missing parameter change data for: {req}")); }
        }
        let checked: Vec<&ParameterChange> = if p.required().is_empty() {
            changes.iter().collect()
        } else {
            p.required().iter().filter_map(|r| by_name.get(r.as_str()).copied()).collect()
        };

        match p.mode.unwrap_or_default() {
            ParameterMode::Any => {
                for c in checked {
                    if same_value(&c.before, &c.after) { problems.push(format!("no change detected for {}", c.param)); }
                }
            }
            ParameterMode::Exact => {
                for (param, expected) in &p.expected {
                    match by_name.get(param.as_str()) {
                        None => problems.push(format!("no change recorded for {param}")),
                        Some(c) if !(same_value(&c.before, &expected.before) && same_value(&c.after, &expected.after)) => {
                            problems.push(format!("{param} value mismatch - expected {}->{}, got {}->{}",
                                expected.before, expected.after, c.before, c.after));
                        }
                        Some(_) => {}
                    }
                }
            }
            ParameterMode::Range => {
                for (param, range) in &p.ranges {
                    let before = by_name.get(param.as_str()).and_then(|c| c.before.as_f64());
                    match before {
                        Some(b) if range.min_before <= b && b <= range.max_before => {}
                        _ => problems.push(format!("{param} before value {} not in range {}-{}",
                            before.map(|b| b.to_string()).unwrap_or_else(|| "none".into()), range.min_before, range.max_before)),
                    }
                }
            }
        }

        if problems.is_empty() { ValidationResult::pass(RULE, RuleKind::Required) }
        else { ValidationResult::fail(RULE, RuleKind::Required, problems.join("; ")) }
    }

    // ---- reference checks (live lookup only) ----

    fn external_fail(&self, rule: &str, message: impl Into<String>) -> ValidationResult {
        let message = message.into();
        let message = match self.cfg.policy() {
            Policy::Advisory => format!("advisory: {message}"),
            Policy::Strict => message,
        };
        ValidationResult::fail(rule, RuleKind::External, message)
    }

    fn check_commit_ref(&self, sha: &str, author: Option<&str>, out: &mut Vec<ValidationResult>) -> Result<(), ValidateError> {
        if !self.sha_re.is_match(sha) {
            out.push(self.external_fail("commit.exists", format!("invalid commit SHA format: {sha}")));
            return Ok(());
        }
        let Some(info) = self.lookup.commit(sha)? else {
            out.push(self.external_fail("commit.exists", format!("commit {sha} not found")));
            return Ok(());
        };
        out.push(ValidationResult::pass("commit.exists", RuleKind::External));
        if let Some(expected) = author {
            if info.author.as_deref() == Some(expected) {
                out.push(ValidationResult::pass("commit.author", RuleKind::External));
            } else {
                out.push(self.external_fail("commit.author", format!(
                    "author mismatch - expected {expected}, actual {}", info.author.as_deref().unwrap_or("unknown"))));
            }
        }
        Ok(())
    }

    fn check_issue_refs(&self, refs: &[IssueRef], out: &mut Vec<ValidationResult>) -> Result<(), ValidateError> {
        let keywords = self.cfg.issues.keywords();
        let mut not_found = Vec::new();
        let mut unmatched = Vec::new();
        for r in refs {
            match self.lookup.issue(r.0)? {
                None => not_found.push(*r),
                Some(info) if !keywords.is_empty() && !info.mentions_any(keywords) => unmatched.push(*r),
                Some(_) => {}
            }
        }

        out.push(if not_found.is_empty() {
            ValidationResult::pass("issue.exists", RuleKind::External)
        } else {
            self.external_fail("issue.exists", format!("issue(s) not found: {}", join_refs(&not_found)))
        });

        if keywords.is_empty() { return Ok(()); }
        out.push(if unmatched.is_empty() {
            ValidationResult::pass("issue.keywords", RuleKind::External)
        } else {
            self.external_fail("issue.keywords", format!("issue(s) {} mention none of: {}", join_refs(&unmatched), keywords.join(", ")))
        });

        if self.cfg.issues.require_complete.unwrap_or(false) {
            let expected = self.relevant_issues()?;
            let provided: BTreeSet<IssueRef> = refs.iter().copied().collect();
            let missing: Vec<IssueRef> = expected.difference(&provided).copied().collect();
            let extra: Vec<IssueRef> = provided.difference(&expected).copied().collect();
            if missing.is_empty() && extra.is_empty() {
                out.push(ValidationResult::pass("issue.coverage", RuleKind::External));
            } else {
                let mut parts = Vec::new();
                if !missing.is_empty() { parts.push(format!("missing issues: {}", join_refs(&missing))); }
                if !extra.is_empty() { parts.push(format!("extra issues: {}", join_refs(&extra))); }
                out.push(self.external_fail("issue.coverage", parts.join("; ")));
            }
        }
        Ok(())
    }

    /// Every keyword-matching issue in the repository, paging until a short page.
    /// A listing that is still full at the page cap is an error, never a partial set.
    fn relevant_issues(&self) -> Result<BTreeSet<IssueRef>, LookupError> {
        let keywords = self.cfg.issues.keywords();
        let include_prs = self.cfg.issues.include_pull_requests.unwrap_or(false);
        let max_pages = self.cfg.github.max_issue_pages();
        let mut found = BTreeSet::new();
        let mut page = 1;
        loop {
            let items = self.lookup.issue_page(page, ISSUES_PER_PAGE)?;
            let full = items.len() >= ISSUES_PER_PAGE as usize;
            for item in items {
                if item.is_pull_request && !include_prs { continue; }
                if item.mentions_any(keywords) { found.insert(IssueRef(item.number)); }
            }
            if !full { return Ok(found); }
            if page >= max_pages {
                return Err(LookupError::Truncated { pages: max_pages, per_page: ISSUES_PER_PAGE });
            }
            page += 1;
        }
    }
}

fn check_schema(schema: &jsonschema::Validator, record: &Record) -> ValidationResult {
    let instance = record.as_value();
    let errors: Vec<String> = schema.iter_errors(&instance).map(|e| e.to_string()).collect();
    if errors.is_empty() { ValidationResult::pass("schema", RuleKind::Required) }
    else { ValidationResult::fail("schema", RuleKind::Required, errors.join("; ")) }
}

fn missing(rule: &str) -> ValidationResult { ValidationResult::fail(rule, RuleKind::Required, "missing") }
fn malformed(rule: &str, message: impl Into<String>) -> ValidationResult { ValidationResult::fail(rule, RuleKind::Required, message) }

/// Numbers compare by value so `4` and `4.0` agree.
fn same_value(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

fn display_value(v: &Value) -> String {
    match v { Value::String(s) => s.clone(), other => other.to_string() }
}

fn join_refs(refs: &[IssueRef]) -> String {
    refs.iter().map(IssueRef::to_string).collect::<Vec<_>>().join(", ")
}
