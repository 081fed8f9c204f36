// analysis-verify/src/main.rs

use anyhow::Context;
use clap::{Parser, ValueEnum};
use std::{path::PathBuf, process::ExitCode};
use tracing::{info, warn};

use analysis_verify::{
    load_record, render_summary, Config, ConfigManager, ExternalLookup, GithubLookup, OfflineLookup,
    Policy, RecordFormat, ReportFormat, ReportWriter, ValidateError, Validator,
};

#[derive(ValueEnum, Clone, Copy, Debug)]
enum PolicyArg { Strict, Advisory }

#[derive(ValueEnum, Clone, Copy, Debug)]
enum FormatArg { Json, Yaml }

#[derive(Parser)]
#[command(name = "analysis-verify", version, about = "Verify a change-analysis record. Use --mock to run offline (no GitHub token needed).")]
struct Args {
    /// Record to verify (JSON or YAML)
    #[arg(default_value = "analysis_results.json")]
    record: PathBuf,
    /// Offline mode: skip GitHub lookups
    #[arg(long)]
    mock: bool,
    /// Whether failing lookups gate the overall status
    #[arg(long, value_enum)]
    policy: Option<PolicyArg>,
    /// Directory the report is written to
    #[arg(long)]
    out: Option<PathBuf>,
    /// Extra config file, applied after user and workspace layers
    #[arg(long)]
    config: Option<PathBuf>,
    /// Record format; inferred from the extension when omitted
    #[arg(long, value_enum)]
    format: Option<FormatArg>,
    /// Report file format
    #[arg(long, value_enum)]
    report_format: Option<FormatArg>,
    /// Do not write a report file
    #[arg(long)]
    no_report: bool,
}

const EXIT_FAILED: u8 = 1;
const EXIT_FATAL: u8 = 2;

fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    match run(args) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(EXIT_FAILED),
        Err(err) => {
            eprintln!("Error: {err:#}");
            ExitCode::from(EXIT_FATAL)
        }
    }
}

fn run(args: Args) -> anyhow::Result<bool> {
    let cwd = std::env::current_dir().context("current dir")?;
    let mut cm = ConfigManager::load(&cwd, args.config.as_deref())?;
    cm.apply_overlay(&overlay_from(&args));
    let cfg = cm.into_config();

    let lookup = select_lookup(&cfg, args.mock)?;
    info!(lookup = lookup.name(), record = %args.record.display(), "starting verification");

    let format = args.format.map(|f| match f { FormatArg::Json => RecordFormat::Json, FormatArg::Yaml => RecordFormat::Yaml });
    let record = load_record(&args.record, format)?;
    let validator = Validator::new(&cfg, lookup.as_ref())?;
    let report = match validator.validate(record.as_ref()) {
        Ok(r) => r,
        Err(ValidateError::MissingRecord) => anyhow::bail!("{} holds no record", args.record.display()),
        Err(e) => return Err(e.into()),
    };

    print!("{}", render_summary(&report));
    if !args.no_report {
        let path = ReportWriter::new(cfg.report.dir(), cfg.report.format()).write(&report, Some(&args.record))?;
        println!("report: {}", path.display());
    }
    Ok(report.passed)
}

fn overlay_from(args: &Args) -> Config {
    let mut patch = Config::default();
    patch.policy = args.policy.map(|p| match p { PolicyArg::Strict => Policy::Strict, PolicyArg::Advisory => Policy::Advisory });
    patch.report.dir = args.out.clone();
    patch.report.format = args.report_format.map(|f| match f { FormatArg::Json => ReportFormat::Json, FormatArg::Yaml => ReportFormat::Yaml });
    patch
}

fn select_lookup(cfg: &Config, mock: bool) -> anyhow::Result<Box<dyn ExternalLookup>> {
    if mock { return Ok(Box::new(OfflineLookup::new())); }
    let gh = &cfg.github;
    let token = std::env::var(gh.token_var()).ok().filter(|t| !t.trim().is_empty());
    if token.is_none() && gh.fallback_to_mock() {
        warn!(var = gh.token_var(), "no GitHub token found; switching to mock mode");
        return Ok(Box::new(OfflineLookup::new()));
    }
    let owner = std::env::var(gh.owner_var()).unwrap_or_else(|_| "example-owner".into());
    let repo = std::env::var(gh.repo_var()).unwrap_or_else(|_| "example-repo".into());
    let lookup = GithubLookup::new(gh, owner, repo, token).context("build GitHub client")?;
    info!(repo = %lookup.repo_slug(), "using GitHub lookup");
    Ok(Box::new(lookup))
}
