// analysis-verify/src/record.rs

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::{fs, path::{Path, PathBuf}};

use crate::config::FieldKey;

/// The loaded analysis document. Read-only once built.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(Map<String, Value>);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecordFormat { Json, Yaml }

impl RecordFormat {
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension().and_then(|e| e.to_str()).map(|e| e.to_ascii_lowercase()).as_deref() {
            Some("json") => Some(Self::Json),
            Some("yaml") | Some("yml") => Some(Self::Yaml),
            _ => None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("read {path}: {source}")]
    Io { path: PathBuf, #[source] source: std::io::Error },
    #[error("parse {path} as JSON: {source}")]
    Json { path: PathBuf, #[source] source: serde_json::Error },
    #[error("parse {path} as YAML: {source}")]
    Yaml { path: PathBuf, #[source] source: serde_yml::Error },
    #[error("{path}: top-level document must be a mapping, got {found}")]
    NotAMapping { path: PathBuf, found: &'static str },
}

impl Record {
    /// `Null` means there is no record at all; any other non-mapping is malformed.
    pub fn from_value(value: Value) -> Result<Option<Self>, &'static str> {
        match value {
            Value::Null => Ok(None),
            Value::Object(map) => Ok(Some(Self(map))),
            other => Err(kind_name(&other)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> { self.0.get(key) }

    /// Value under the first present key among the field's name and aliases.
    pub fn lookup(&self, field: &FieldKey) -> Option<&Value> {
        field.candidates().find_map(|k| self.0.get(k))
    }

    pub fn as_value(&self) -> Value { Value::Object(self.0.clone()) }
}

pub fn kind_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "sequence",
        Value::Object(_) => "mapping",
    }
}

/// Parse record text. An empty or null document yields `Ok(None)`.
pub fn parse_record(text: &str, format: Option<RecordFormat>, path: &Path) -> Result<Option<Record>, LoadError> {
    if text.trim().is_empty() { return Ok(None); }
    let value = match format {
        Some(RecordFormat::Json) => serde_json::from_str::<Value>(text)
            .map_err(|source| LoadError::Json { path: path.into(), source })?,
        Some(RecordFormat::Yaml) => serde_yml::from_str::<Value>(text)
            .map_err(|source| LoadError::Yaml { path: path.into(), source })?,
        // unknown extension: JSON first, YAML as the more lenient fallback
        None => match serde_json::from_str::<Value>(text) {
            Ok(v) => v,
            Err(_) => serde_yml::from_str::<Value>(text)
                .map_err(|source| LoadError::Yaml { path: path.into(), source })?,
        },
    };
    Record::from_value(value).map_err(|found| LoadError::NotAMapping { path: path.into(), found })
}

pub fn load_record(path: &Path, format: Option<RecordFormat>) -> Result<Option<Record>, LoadError> {
    let text = fs::read_to_string(path).map_err(|source| LoadError::Io { path: path.into(), source })?;
    let format = format.or_else(|| RecordFormat::from_path(path));
    tracing::debug!(path = %path.display(), ?format, "loading record");
    parse_record(&text, format, path)
}

/// A normalized entry of the record's parameter changes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParameterChange {
    pub param: String,
    pub before: Value,
    pub after: Value,
    pub line_number: Option<u64>,
}

/// Accepts either `[{param|name, old|before, new|after}]` or `{param: {before, after}}`.
pub fn parameter_changes(value: &Value) -> Result<Vec<ParameterChange>, String> {
    match value {
        Value::Array(items) => {
            if items.is_empty() { return Err("must not be empty".into()); }
            items.iter().enumerate().map(|(i, item)| {
                let Value::Object(obj) = item else {
                    return Err(format!("entry {i} must be a mapping, got {}", kind_name(item)));
                };
                let param = first_of(obj, &["param", "name", "parameter"])
                    .and_then(Value::as_str)
                    .filter(|s| !s.trim().is_empty())
                    .ok_or_else(|| format!("entry {i} has no parameter name"))?;
                change_from(param, obj).map_err(|e| format!("entry {i}: {e}"))
            }).collect()
        }
        Value::Object(map) => {
            if map.is_empty() { return Err("must not be empty".into()); }
            map.iter().map(|(param, body)| {
                let Value::Object(obj) = body else {
                    return Err(format!("{param} must be a mapping, got {}", kind_name(body)));
                };
                change_from(param, obj).map_err(|e| format!("{param}: {e}"))
            }).collect()
        }
        other => Err(format!("expected a sequence or mapping, got {}", kind_name(other))),
    }
}

fn first_of<'a>(obj: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|k| obj.get(*k))
}

fn change_from(param: &str, obj: &Map<String, Value>) -> Result<ParameterChange, String> {
    let before = first_of(obj, &["before", "old"]).ok_or("missing before/old")?;
    let after = first_of(obj, &["after", "new"]).ok_or("missing after/new")?;
    let line_number = match obj.get("line_number") {
        None | Some(Value::Null) => None,
        Some(v) => Some(v.as_u64().ok_or("line_number must be a non-negative integer")?),
    };
    Ok(ParameterChange { param: param.into(), before: before.clone(), after: after.clone(), line_number })
}

/// Positive issue number.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IssueRef(pub u64);

impl std::fmt::Display for IssueRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { write!(f, "#{}", self.0) }
}

fn issue_ref(v: &Value) -> Result<IssueRef, String> {
    let n = match v {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().trim_start_matches('#').parse::<u64>().ok(),
        _ => None,
    };
    match n {
        Some(n) if n > 0 => Ok(IssueRef(n)),
        _ => Err(format!("invalid issue reference: {v}")),
    }
}

/// A single reference or a list of them. Duplicates are dropped, order kept.
pub fn issue_refs(value: &Value) -> Result<Vec<IssueRef>, String> {
    let mut out: Vec<IssueRef> = Vec::new();
    match value {
        Value::Array(items) => {
            for item in items {
                let r = issue_ref(item)?;
                if !out.contains(&r) { out.push(r); }
            }
        }
        Value::String(s) if s.trim().is_empty() => return Err("must not be empty".into()),
        other => out.push(issue_ref(other)?),
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn null_and_empty_documents_are_no_record() {
        let p = Path::new("r.yaml");
        assert_eq!(parse_record("", Some(RecordFormat::Yaml), p).unwrap(), None);
        assert_eq!(parse_record("null", Some(RecordFormat::Json), p).unwrap(), None);
        assert_eq!(parse_record("~\n", Some(RecordFormat::Yaml), p).unwrap(), None);
    }

    #[test]
    fn non_mapping_document_is_rejected() {
        let err = parse_record("[1, 2]", Some(RecordFormat::Json), Path::new("r.json")).unwrap_err();
        assert!(matches!(err, LoadError::NotAMapping { found: "sequence", .. }));
    }

    #[test]
    fn unknown_extension_falls_back_to_yaml() {
        let rec = parse_record("commit: abc123\nissue: 42\n", None, Path::new("r.txt")).unwrap().unwrap();
        assert_eq!(rec.get("commit"), Some(&json!("abc123")));
        assert_eq!(rec.get("issue"), Some(&json!(42)));
    }

    #[test]
    fn format_from_extension() {
        assert_eq!(RecordFormat::from_path(Path::new("a.JSON")), Some(RecordFormat::Json));
        assert_eq!(RecordFormat::from_path(Path::new("a.yml")), Some(RecordFormat::Yaml));
        assert_eq!(RecordFormat::from_path(Path::new("a")), None);
    }

    #[test]
    fn lookup_prefers_primary_key_over_alias() {
        let rec = Record::from_value(json!({"target_commit_sha": "b", "commit": "a"})).unwrap().unwrap();
        let field = FieldKey { key: "commit".into(), aliases: vec!["target_commit_sha".into()] };
        assert_eq!(rec.lookup(&field), Some(&json!("a")));
    }

    #[test]
    fn changes_accept_sequence_form() {
        let v = json!([{"param": "x", "old": 1, "new": 2}]);
        let changes = parameter_changes(&v).unwrap();
        assert_eq!(changes, vec![ParameterChange { param: "x".into(), before: json!(1), after: json!(2), line_number: None }]);
    }

    #[test]
    fn changes_accept_mapping_form() {
        let v = json!({"micro_batch": {"before": 4, "after": 2, "line_number": 120}});
        let changes = parameter_changes(&v).unwrap();
        assert_eq!(changes[0].param, "micro_batch");
        assert_eq!(changes[0].line_number, Some(120));
    }

    #[test]
    fn malformed_changes_explain_themselves() {
        assert_eq!(parameter_changes(&json!([])).unwrap_err(), "must not be empty");
        assert!(parameter_changes(&json!([{"old": 1, "new": 2}])).unwrap_err().contains("no parameter name"));
        assert!(parameter_changes(&json!({"x": {"before": 1}})).unwrap_err().contains("missing after"));
        assert!(parameter_changes(&json!("x")).unwrap_err().contains("got string"));
    }

    #[test]
    fn issue_refs_accept_strings_numbers_and_lists() {
        assert_eq!(issue_refs(&json!("42")).unwrap(), vec![IssueRef(42)]);
        assert_eq!(issue_refs(&json!("#7")).unwrap(), vec![IssueRef(7)]);
        assert_eq!(issue_refs(&json!([101, "102", 101])).unwrap(), vec![IssueRef(101), IssueRef(102)]);
        assert!(issue_refs(&json!([])).unwrap().is_empty());
        assert!(issue_refs(&json!(0)).is_err());
        assert!(issue_refs(&json!("abc")).is_err());
        assert!(issue_refs(&json!("")).is_err());
    }
}
