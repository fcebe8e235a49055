use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use lsp_types::{Diagnostic, DiagnosticSeverity};
use serde::Serialize;
use tracing::info;
use xpkg_core::apis::Dependency;
use xpkg_core::kinds::PackageType;
use xpkg_deps::{LocalCacheManager, Manager, StaticManager};
use xpkg_snapshot::Factory;

#[derive(Parser, Debug)]
#[command(name = "xpkgctl", version, about = "Crossplane package workspace tooling")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json }

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Kind { Provider, Configuration }

impl From<Kind> for PackageType {
    fn from(k: Kind) -> Self {
        match k {
            Kind::Provider => PackageType::Provider,
            Kind::Configuration => PackageType::Configuration,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Validate every YAML document in a package workspace
    Lint {
        /// Workspace root
        dir: PathBuf,
        /// Extracted package cache (`<cache>/<package>/<version>/...`)
        #[arg(long = "cache-dir", env = "XPKG_CACHE_DIR")]
        cache_dir: Option<PathBuf>,
    },
    /// Edit package meta dependencies
    Dep {
        #[command(subcommand)]
        command: DepCommands,
    },
}

#[derive(Subcommand, Debug)]
enum DepCommands {
    /// Add a dependency, or update its version constraint
    Add {
        /// Workspace root
        dir: PathBuf,
        /// Package reference, e.g. xpkg.upbound.io/upbound/provider-aws
        package: String,
        /// Version or constraint, e.g. ">=v0.20.0"
        version: String,
        #[arg(long = "kind", value_enum, default_value_t = Kind::Provider)]
        kind: Kind,
    },
}

fn init_tracing() {
    let env = std::env::var("XPKG_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

#[derive(Serialize)]
struct FileReport<'a> {
    file: String,
    diagnostics: &'a [Diagnostic],
}

fn display_path(root: &Path, path: &Path) -> String {
    path.strip_prefix(root).unwrap_or(path).display().to_string()
}

fn human_line(file: &str, d: &Diagnostic) -> String {
    let severity = match d.severity {
        Some(DiagnosticSeverity::WARNING) => "warning",
        _ => "error",
    };
    let code = match &d.code {
        Some(lsp_types::NumberOrString::Number(n)) => n.to_string(),
        Some(lsp_types::NumberOrString::String(s)) => s.clone(),
        None => "-".to_string(),
    };
    // editor positions are zero-based
    format!(
        "{}:{}:{}: {} [{}] {}",
        file,
        d.range.start.line + 1,
        d.range.start.character + 1,
        severity,
        code,
        d.message
    )
}

async fn lint(dir: PathBuf, cache_dir: Option<PathBuf>, output: Output) -> Result<()> {
    let manager: Arc<dyn Manager> = match cache_dir {
        Some(cache) => Arc::new(LocalCacheManager::new(cache)),
        None => Arc::new(StaticManager::new()),
    };
    let snapshot = Factory::new(manager)
        .new_snapshot(&dir)
        .await
        .with_context(|| format!("building snapshot of {}", dir.display()))?;
    let reports = snapshot.validate_all_files()?;

    let errors = reports
        .iter()
        .flat_map(|(_, ds)| ds.iter())
        .filter(|d| d.severity != Some(DiagnosticSeverity::WARNING))
        .count();
    match output {
        Output::Human => {
            for (path, diags) in &reports {
                let file = display_path(&dir, path);
                for d in diags {
                    println!("{}", human_line(&file, d));
                }
            }
        }
        Output::Json => {
            let out: Vec<FileReport> = reports
                .iter()
                .filter(|(_, ds)| !ds.is_empty())
                .map(|(p, ds)| FileReport { file: display_path(&dir, p), diagnostics: ds })
                .collect();
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
    }
    info!(files = reports.len(), errors, "lint finished");
    if errors > 0 {
        bail!("{errors} error(s) found");
    }
    Ok(())
}

fn dep_add(dir: PathBuf, dep: Dependency) -> Result<()> {
    let view = xpkg_workspace::Parser::new(&dir)
        .parse()
        .with_context(|| format!("parsing {}", dir.display()))?;
    let (Some(meta), Some(file)) = (view.meta(), view.meta_file()) else {
        bail!("no package meta (crossplane.yaml) found under {}", dir.display());
    };
    let mut meta = meta.clone();
    let appended = meta.upsert_dependency(&dep);
    let bytes = meta.bytes().context("encoding package meta")?;
    std::fs::write(file, bytes).with_context(|| format!("writing {}", file.display()))?;
    let verb = if appended { "added" } else { "updated" };
    info!(package = %dep.package, version = %dep.version, file = %file.display(), "dependency {verb}");
    println!("{verb} {} {} ({})", dep.package, dep.version, dep.kind);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Lint { dir, cache_dir } => lint(dir, cache_dir, cli.output).await,
        Commands::Dep { command: DepCommands::Add { dir, package, version, kind } } => {
            dep_add(dir, Dependency::new(package, version, kind.into()))
        }
    }
}
