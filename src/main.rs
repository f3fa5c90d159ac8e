//! Grid Watch - main entry point
//!
//! Subcommands:
//! - run: Start the monitor and keep it running until Ctrl+C
//! - state: Show the persisted runtime state
//! - signals: List the most recent recorded signals
//! - test-notify: Send a test notification
//! - init-config: Write a default configuration file

use anyhow::Result;
use clap::{Parser, Subcommand};
use gridwatch::state_manager::DEFAULT_SIGNAL_PAGE;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod commands;

const DEFAULT_CONFIG: &str = "configs/gridwatch.json";

#[derive(Parser, Debug)]
#[command(name = "gridwatch")]
#[command(about = "Grid and stop-line monitor for a held crypto position", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the monitor until Ctrl+C
    Run {
        /// Path to configuration file
        #[arg(short, long, default_value = DEFAULT_CONFIG)]
        config: String,
    },

    /// Show the persisted runtime state
    State {
        /// Path to configuration file
        #[arg(short, long, default_value = DEFAULT_CONFIG)]
        config: String,

        /// Print raw JSON
        #[arg(long)]
        json: bool,
    },

    /// List recorded signals, newest first
    Signals {
        /// Path to configuration file
        #[arg(short, long, default_value = DEFAULT_CONFIG)]
        config: String,

        /// Number of signals to show
        #[arg(short, long, default_value_t = DEFAULT_SIGNAL_PAGE)]
        limit: usize,

        /// Print raw JSON
        #[arg(long)]
        json: bool,
    },

    /// Send a test notification through the configured channel
    TestNotify {
        /// Path to configuration file
        #[arg(short, long, default_value = DEFAULT_CONFIG)]
        config: String,

        /// Message text (defaults to a short test line)
        #[arg(short, long)]
        message: Option<String>,
    },

    /// Write a configuration file with every default filled in
    InitConfig {
        /// Destination path
        #[arg(short, long, default_value = DEFAULT_CONFIG)]
        config: String,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

fn setup_logging(verbose: bool, command_name: &str, file_only: bool) -> Result<()> {
    std::fs::create_dir_all("logs")?;

    // {command}_{date}.log
    let log_filename = format!(
        "{}_{}.log",
        command_name,
        chrono::Local::now().format("%Y-%m-%d_%H-%M-%S")
    );
    let log_path = PathBuf::from("logs").join(&log_filename);

    // Filter out noisy external crates
    let level = if verbose { "debug" } else { "info" };
    let filter_str = format!(
        "{},hyper=warn,hyper_util=warn,reqwest=warn,rustls=warn,h2=warn",
        level
    );
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&filter_str));

    let file_appender = tracing_appender::rolling::never("logs", &log_filename);

    if file_only {
        // Query commands print to stdout; keep it free of log lines
        let file_layer = tracing_subscriber::fmt::layer()
            .with_writer(file_appender)
            .with_target(true)
            .with_line_number(true)
            .with_file(true)
            .with_ansi(false);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(file_layer)
            .init();
    } else {
        let console_layer = tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_thread_names(false)
            .with_line_number(true)
            .with_file(true)
            .with_ansi(true);

        let file_layer = tracing_subscriber::fmt::layer()
            .with_writer(file_appender)
            .with_target(true)
            .with_line_number(true)
            .with_file(true)
            .with_ansi(false);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .with(file_layer)
            .init();

        info!("Logging initialized");
        info!("Log file: {}", log_path.display());
    }

    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let (command_name, file_only) = match &cli.command {
        Commands::Run { .. } => ("run", false),
        Commands::State { .. } => ("state", true),
        Commands::Signals { .. } => ("signals", true),
        Commands::TestNotify { .. } => ("test-notify", false),
        Commands::InitConfig { .. } => ("init-config", false),
    };

    setup_logging(cli.verbose, command_name, file_only)?;

    match cli.command {
        Commands::Run { config } => commands::run::run(config),
        Commands::State { config, json } => commands::query::state(config, json),
        Commands::Signals {
            config,
            limit,
            json,
        } => commands::query::signals(config, limit, json),
        Commands::TestNotify { config, message } => commands::notify::run(config, message),
        Commands::InitConfig { config, force } => commands::init::run(config, force),
    }
}
