use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::{fs, path::{Path, PathBuf}};

#[derive(Parser)]
#[command(name = "xtask", about = "analysis-verify workspace tasks")]
struct Cli {
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Validate record files (JSON or YAML) against schemas/record.schema.json
    ValidateRecord { files: Vec<PathBuf> },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.cmd {
        Cmd::ValidateRecord { files } => {
            let mut ok = true;
            for f in &files { ok &= validate_record(f)?; }
            if !ok { std::process::exit(1); }
            Ok(())
        }
    }
}

fn read_any(path: &Path) -> Result<serde_json::Value> {
    let text = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let is_yaml = path.extension().is_some_and(|e| e == "yaml" || e == "yml");
    if is_yaml {
        serde_yml::from_str(&text).with_context(|| format!("parse yaml {}", path.display()))
    } else {
        serde_json::from_str(&text).with_context(|| format!("parse json {}", path.display()))
    }
}

fn validate_record(path: &Path) -> Result<bool> {
    let schema_text = include_str!("../../schemas/record.schema.json");
    let schema: serde_json::Value = serde_json::from_str(schema_text)?;
    let compiled = jsonschema::validator_for(&schema).map_err(|e| anyhow::anyhow!("compile schema: {e}"))?;
    let data = read_any(path)?;
    let errors: Vec<_> = compiled.iter_errors(&data).collect();
    if !errors.is_empty() {
        eprintln!("Invalid: {}", path.display());
        for e in errors {
            eprintln!("- {}", e);
        }
        return Ok(false);
    }
    println!("OK: {}", path.display());
    Ok(true)
}
