use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use qs_storage::{verify_hash_chain, VerifyResult};

mod commands;

#[derive(Parser)]
#[command(name = "qs")]
#[command(about = "Event-driven trading simulation and risk engine", long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a CSV of bars through strategy, risk, execution and portfolio
    Backtest {
        /// Layered config paths in merge order (later overrides earlier)
        #[arg(long = "config", required = true)]
        config_paths: Vec<String>,

        /// CSV with timestamp,symbol,open,high,low,close,volume
        #[arg(long)]
        data: String,

        /// Write run artifacts under <exports>/<backtest_id>/
        #[arg(long)]
        exports: Option<String>,

        /// Strategy name (defaults to strategy.name in config)
        #[arg(long)]
        strategy: Option<String>,
    },

    /// Feed a CSV bar-by-bar through the live runtime (simulated execution)
    Paper {
        #[arg(long = "config", required = true)]
        config_paths: Vec<String>,

        #[arg(long)]
        data: String,

        #[arg(long)]
        strategy: Option<String>,

        /// Delay between bars in milliseconds
        #[arg(long, default_value_t = 0)]
        pace_ms: u64,
    },

    /// Compute layered config hash + print canonical JSON
    ConfigHash {
        /// Paths in merge order
        #[arg(required = true)]
        paths: Vec<String>,
    },

    /// Verify the hash chain of an audit log
    AuditVerify {
        /// audit.jsonl path
        path: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::from_filename(".env.local");

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.cmd {
        Commands::Backtest {
            config_paths,
            data,
            exports,
            strategy,
        } => commands::backtest::run_backtest(&config_paths, &data, exports.as_deref(), strategy)?,

        Commands::Paper {
            config_paths,
            data,
            strategy,
            pace_ms,
        } => commands::paper::run_paper(&config_paths, &data, strategy, pace_ms).await?,

        Commands::ConfigHash { paths } => {
            let path_refs: Vec<&str> = paths.iter().map(|s| s.as_str()).collect();
            let loaded = qs_config::load_layered_yaml(&path_refs)?;
            println!("config_hash={}", loaded.config_hash);
            println!("{}", loaded.canonical_json);
        }

        Commands::AuditVerify { path } => match verify_hash_chain(&path)? {
            VerifyResult::Valid { lines } => {
                println!("audit_ok=true lines={lines}");
            }
            VerifyResult::Broken { line, reason } => {
                println!("audit_ok=false line={line}");
                bail!("audit hash chain broken at line {line}: {reason}");
            }
        },
    }

    Ok(())
}
