pub mod config;
pub mod record;
pub mod lookup;
pub mod github;
pub mod validator;
pub mod report;

pub use config::{Config, ConfigManager, Policy, ReportFormat, Scope};
pub use record::{load_record, parse_record, IssueRef, LoadError, ParameterChange, Record, RecordFormat};
pub use lookup::{CommitInfo, ExternalLookup, IssueInfo, LookupError, OfflineLookup};
pub use github::GithubLookup;
pub use validator::{ValidateError, Validator};
pub use report::{render_summary, Mode, Report, ReportEnvelope, ReportWriter, RuleKind, ValidationResult, WriteError};
