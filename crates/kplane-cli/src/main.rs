//! kplane: operator tooling for the placement decision engine.
//!
//! # Usage
//!
//! ```text
//! kplane decide --scenario demos/scenario.json --config kplane.toml
//! kplane check-policy 'label("region") == "eu" && has_capacity(0.8)'
//! kplane history --db decisions.redb --workload root:org:default/api
//! ```

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "kplane",
    about = "kplane — multi-cluster placement decisions",
    version,
    propagate_version = true
)]
struct Cli {
    /// Emit logs as JSON lines on stderr.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one placement evaluation over a scenario file.
    ///
    /// The scenario is JSON with `request`, `candidates`, and optional
    /// `policies` and `overrides`.
    Decide {
        /// Scenario file.
        #[arg(short, long)]
        scenario: PathBuf,
        /// Engine configuration (TOML). Defaults apply when omitted.
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Record the decision into this redb file instead of memory.
        #[arg(long)]
        history_db: Option<PathBuf>,
        /// Evaluation deadline in milliseconds.
        #[arg(long, default_value = "5000")]
        timeout_ms: u64,
        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,
    },
    /// Compile a policy expression and optionally evaluate it against the
    /// candidates of a scenario.
    CheckPolicy {
        expression: String,
        #[arg(short, long)]
        scenario: Option<PathBuf>,
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Read recorded decisions.
    History {
        /// redb history file written by `decide --history-db`.
        #[arg(long)]
        db: PathBuf,
        #[arg(long, conflicts_with_all = ["decision", "from"])]
        workload: Option<String>,
        #[arg(long, conflicts_with = "from")]
        decision: Option<String>,
        /// Start of a time range, epoch millis.
        #[arg(long, requires = "to")]
        from: Option<u64>,
        /// End of a time range, epoch millis.
        #[arg(long, requires = "from")]
        to: Option<u64>,
        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,kplane=debug".into());
    let logs = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if cli.log_json {
        logs.json().init();
    } else {
        logs.init();
    }

    match cli.command {
        Commands::Decide {
            scenario,
            config,
            history_db,
            timeout_ms,
            format,
        } => {
            commands::decide::run(
                &scenario,
                config.as_deref(),
                history_db.as_deref(),
                timeout_ms,
                &format,
            )
            .await
        }
        Commands::CheckPolicy {
            expression,
            scenario,
            config,
        } => commands::check_policy::run(&expression, scenario.as_deref(), config.as_deref()),
        Commands::History {
            db,
            workload,
            decision,
            from,
            to,
            format,
        } => {
            let query = commands::history::query_from_args(workload, decision, from, to)?;
            commands::history::run(&db, &query, &format).await
        }
    }
}
