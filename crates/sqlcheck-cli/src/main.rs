use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::{Path, PathBuf};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use sqlcheck_catalog::PostgresConnection;
use sqlcheck_core::{Config, Diagnostic, Report};
use sqlcheck_engine::{load_migrations, migrations_hash, Manifest, SqlChecker};

const DEFAULT_CONFIG: &str = "sqlcheck.toml";

/// sqlcheck - Validate embedded SQL queries and views against a live database
#[derive(Parser)]
#[command(name = "sqlcheck")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to config file (default: sqlcheck.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check the views and queries of a manifest
    Check {
        /// Parser-produced manifest with views and queries
        #[arg(short, long, default_value = "manifest.json")]
        manifest: PathBuf,

        /// Output file for report.json
        #[arg(short, long, default_value = "report.json")]
        output: PathBuf,
    },

    /// Print the content hash of the migrations directory
    HashMigrations,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose);
    dotenvy::dotenv().ok();

    let config = load_config(cli.config.as_deref(), cli.verbose)?;

    match cli.command {
        Commands::Check { manifest, output } => {
            let has_errors = check_command(&config, &manifest, &output, cli.verbose).await?;
            if has_errors {
                std::process::exit(1);
            }
            Ok(())
        }
        Commands::HashMigrations => hash_command(&config),
    }
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

fn load_config(path: Option<&Path>, verbose: bool) -> Result<Config> {
    if let Some(path) = path {
        return Config::from_file(path).with_context(|| format!("Failed to load {}", path.display()));
    }

    let default = Path::new(DEFAULT_CONFIG);
    if default.exists() {
        return Ok(Config::from_file(default)?);
    }

    if verbose {
        eprintln!("{}", "No config file found, using defaults".yellow());
    }
    Ok(Config::default())
}

/// Run one pass; returns whether errors were reported
async fn check_command(config: &Config, manifest_path: &Path, output: &Path, verbose: bool) -> Result<bool> {
    if verbose {
        eprintln!("{} {}", "Loading manifest from:".cyan(), manifest_path.display());
    }

    let manifest = Manifest::from_file(manifest_path)?;
    config.migration_regex()?;
    let conn = connect(config).await?;

    if verbose {
        eprintln!("{} {}", "Connected to database:".cyan(), conn.database());
    }

    let mut checker = SqlChecker::new(conn, config)?;

    let result = checker.check(&manifest).await;
    let stats = checker.cache_stats();

    // Release the connection before reporting anything
    if let Err(err) = checker.into_connection().close().await {
        tracing::warn!("failed to close connection: {}", err);
    }

    let diagnostics = result?;

    if verbose {
        eprintln!(
            "{} {} queries, {} views ({} cached answers)",
            "Checked".cyan(),
            manifest.queries.len(),
            manifest.views.len(),
            stats.entries
        );
    }

    for diagnostic in &diagnostics {
        print_diagnostic(diagnostic);
    }

    let report = Report::from_diagnostics(diagnostics).with_counts(manifest.queries.len(), manifest.views.len());
    report.save_to_file(output)?;

    if verbose {
        eprintln!("{} {}", "Report saved to:".green(), output.display());
    }

    print_summary(&report);

    Ok(report.has_errors())
}

async fn connect(config: &Config) -> Result<PostgresConnection> {
    let url = config.database_url()?;
    let postgres = &config.postgres;

    let conn = if postgres.create_database {
        PostgresConnection::create_check_database(&url, postgres.database_name.as_deref(), postgres.tls).await
    } else {
        PostgresConnection::connect(&url, postgres.tls).await
    };

    conn.context("Failed to connect to PostgreSQL")
}

fn hash_command(config: &Config) -> Result<()> {
    let dir = config.migrations_path();
    let files = load_migrations(&dir, &config.migration_regex()?)?;

    println!("{}", migrations_hash(&files));
    Ok(())
}

fn print_diagnostic(diagnostic: &Diagnostic) {
    let mut messages = diagnostic.messages.iter();
    let first = messages.next().map(String::as_str).unwrap_or_default();

    println!(
        "{} ({}) {} {}",
        diagnostic.file_name.bold(),
        diagnostic.code.as_str().red().bold(),
        diagnostic.span.location_string(),
        first
    );
    for line in messages {
        println!("    {}", line);
    }

    if let Some(epilogue) = &diagnostic.epilogue {
        println!("{}", epilogue);
    }
}

fn print_summary(report: &Report) {
    println!();

    if report.diagnostics.is_empty() {
        println!("{}", "✓ No issues found!".green().bold());
        return;
    }

    let counts: Vec<String> = report
        .summary
        .by_code
        .iter()
        .map(|(code, count)| format!("{} {}", count, code))
        .collect();
    println!(
        "{} error(s): {}",
        report.summary.errors.to_string().red().bold(),
        counts.join(", ")
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn check_defaults() {
        let cli = Cli::try_parse_from(["sqlcheck", "check"]).unwrap();
        match cli.command {
            Commands::Check { manifest, output } => {
                assert_eq!(manifest, PathBuf::from("manifest.json"));
                assert_eq!(output, PathBuf::from("report.json"));
            }
            Commands::HashMigrations => panic!("expected check"),
        }
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["sqlcheck", "hash-migrations", "--config", "db/sqlcheck.toml", "-v"]).unwrap();
        assert!(cli.verbose);
        assert_eq!(cli.config, Some(PathBuf::from("db/sqlcheck.toml")));
        assert!(matches!(cli.command, Commands::HashMigrations));
    }
}
