//! Command-line interface

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Args, Subcommand, ValueEnum};
use colored::Colorize;
use tracing::info;

use crate::common::{Error, HarnessConfig, Result};
use crate::protocol::session::Session;
use crate::runner::report::RunReport;
use crate::runner::{SideChannels, SuiteRunner};
use crate::server::ManagedServer;
use crate::suite::loader;
use crate::suite::schema::TestSuite;

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run conformance suites against a MOO server
    Run(RunArgs),
    /// List discovered suites and tests without running them
    List {
        /// Suite file or directory
        suites: PathBuf,
    },
    /// Validate suite files against the schema
    Check {
        /// Suite file or directory
        suites: PathBuf,
    },
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Suite file or directory
    pub suites: PathBuf,

    /// MOO server host
    #[arg(long)]
    pub host: Option<String>,

    /// MOO server port
    #[arg(long)]
    pub port: Option<u16>,

    /// Command to start a MOO server; supports {port} and {db}
    /// placeholders. The server is started and stopped automatically.
    #[arg(long)]
    pub server_command: Option<String>,

    /// Database file for the managed server
    #[arg(long)]
    pub server_db: Option<PathBuf>,

    /// The server's working directory (enables file assertions;
    /// auto-detected with --server-command)
    #[arg(long)]
    pub server_dir: Option<PathBuf>,

    /// The server's log file (enables log assertions; auto-detected
    /// with --server-command)
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Config file (default: mooconf.toml if present)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Only run tests whose suite::name contains this substring
    #[arg(short = 'k', long)]
    pub filter: Option<String>,

    /// Report format
    #[arg(long, value_enum, default_value_t = ReportFormat::Human)]
    pub report: ReportFormat,

    /// Identity to authenticate the primary connection as
    #[arg(long, default_value = "wizard")]
    pub identity: String,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportFormat {
    Human,
    Json,
}

/// Dispatch a CLI command
pub async fn dispatch(command: Commands) -> Result<ExitCode> {
    match command {
        Commands::Run(args) => run(args).await,
        Commands::List { suites } => list(&suites),
        Commands::Check { suites } => check(&suites),
    }
}

async fn run(args: RunArgs) -> Result<ExitCode> {
    let mut config = HarnessConfig::load(args.config.as_deref())?;
    if let Some(host) = &args.host {
        config.target.host = host.clone();
    }
    if let Some(port) = args.port {
        config.target.port = port;
    }
    if let Some(command) = &args.server_command {
        config.server.command = Some(command.clone());
    }
    if let Some(db) = &args.server_db {
        config.server.db = Some(db.clone());
    }
    if let Some(dir) = &args.server_dir {
        config.paths.server_dir = Some(dir.clone());
    }
    if let Some(log) = &args.log_file {
        config.paths.log_file = Some(log.clone());
    }

    let mut suites = loader::discover_suites(&args.suites)?;
    if let Some(filter) = &args.filter {
        apply_filter(&mut suites, filter);
    }
    if suites.is_empty() {
        return Err(Error::Config(format!(
            "no test suites found under {}",
            args.suites.display()
        )));
    }

    let mut managed = match &config.server.command {
        Some(command) => {
            if args.host.is_some() && config.target.host != "localhost" {
                return Err(Error::Config(
                    "--server-command cannot be used with a non-localhost --host".to_string(),
                ));
            }
            let db = config.server.db.clone().ok_or_else(|| {
                Error::Config("--server-command requires --server-db".to_string())
            })?;
            let server = ManagedServer::start(
                command,
                &db,
                args.port,
                &config.target.host,
                Duration::from_secs(config.timeouts.server_start_secs),
            )
            .await?;
            config.target.port = server.port();
            Some(server)
        }
        None => None,
    };

    let side = SideChannels {
        server_dir: config.paths.server_dir.clone().or_else(|| {
            managed.as_ref().map(|s| s.server_dir().to_path_buf())
        }),
        log_file: config.paths.log_file.clone().or_else(|| {
            managed.as_ref().map(|s| s.log_path().to_path_buf())
        }),
    };

    info!(
        host = %config.target.host,
        port = config.target.port,
        "connecting to target server"
    );
    let session = Session::connect(&config, &args.identity).await?;
    let mut runner = SuiteRunner::new(session, config, side);
    runner.bootstrap().await?;

    let mut report = RunReport::default();
    let mut run_error = None;
    for (_, suite) in &suites {
        match runner.run_suite(suite).await {
            Ok(suite_report) => report.suites.push(suite_report),
            Err(e) => {
                run_error = Some(e);
                break;
            }
        }
    }

    let mut session = runner.into_session();
    session.close();
    if let Some(server) = managed.as_mut() {
        server.stop().await;
    }
    if let Some(e) = run_error {
        return Err(e);
    }

    match args.report {
        ReportFormat::Human => report.print_summary(),
        ReportFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(if report.all_passed() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn apply_filter(suites: &mut Vec<(PathBuf, TestSuite)>, filter: &str) {
    for (_, suite) in suites.iter_mut() {
        suite
            .tests
            .retain(|t| format!("{}::{}", suite.name, t.name).contains(filter));
    }
    suites.retain(|(_, suite)| !suite.tests.is_empty());
}

fn list(root: &PathBuf) -> Result<ExitCode> {
    let suites = loader::discover_suites(root)?;
    let mut total = 0usize;
    for (path, suite) in &suites {
        println!(
            "{} {}",
            suite.name.white().bold(),
            path.display().to_string().dimmed()
        );
        for test in &suite.tests {
            println!("  {}", test.name);
            total += 1;
        }
    }
    println!("\n{} suites, {} tests", suites.len(), total);
    Ok(ExitCode::SUCCESS)
}

fn check(root: &PathBuf) -> Result<ExitCode> {
    let mut failures = 0usize;
    let paths = loader::yaml_files(root)?;
    for path in &paths {
        match loader::load_suite(path) {
            Ok(suite) => {
                println!(
                    "{} {} ({} tests)",
                    "✓".green(),
                    path.display(),
                    suite.tests.len()
                );
            }
            Err(e) => {
                println!("{} {}: {e}", "✗".red(), path.display());
                failures += 1;
            }
        }
    }
    println!("\n{} files checked, {} invalid", paths.len(), failures);
    Ok(if failures == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
