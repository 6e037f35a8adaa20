//! rpmrh CLI
//!
//! Thin front end over the promotion engine: loads configuration, selects
//! collections, runs a diff or tag pass and writes the report.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use rpmrh::{
    validate_config, Action, Collection, Config, Error, PipelineDriver, Result, ServiceFactory,
    EXIT_CONFIG, EXIT_ERRORS,
};

/// Promote packages between repository phases.
#[derive(Debug, Parser)]
#[command(name = "rpmrh", version, about)]
struct Cli {
    /// Configuration file; repeat to layer several files in order.
    #[arg(
        short,
        long = "config",
        value_name = "FILE",
        env = "RPMRH_CONFIG",
        value_delimiter = ',',
        default_value = "rpmrh.toml"
    )]
    config: Vec<PathBuf>,

    /// Source phase.
    #[arg(long = "from", value_name = "PHASE")]
    from: String,

    /// Destination phase.
    #[arg(long = "to", value_name = "PHASE")]
    to: String,

    /// EL major version; repeatable. Defaults to 7.
    #[arg(long = "el", value_name = "N")]
    el: Vec<u32>,

    /// Software collection name; repeatable.
    #[arg(long = "collection", value_name = "NAME")]
    collection: Vec<String>,

    /// Process every collection declared in the configuration.
    #[arg(long, conflicts_with_all = ["el", "collection"])]
    all: bool,

    /// Report format.
    #[arg(long, value_enum, default_value_t = Format::Yaml)]
    format: Format,

    /// Write the report to FILE instead of stdout.
    #[arg(long, value_name = "FILE")]
    report: Option<PathBuf>,

    /// Override pipeline.concurrency.
    #[arg(long, value_name = "N")]
    concurrency: Option<usize>,

    /// Override pipeline.timeout_secs.
    #[arg(long, value_name = "SECS")]
    timeout: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List packages present in the source but missing from the destination.
    Diff,
    /// Tag missing packages that passed their checks into the destination.
    Tag {
        /// Minimum age in days of the oldest passing check.
        #[arg(long, value_name = "N")]
        min_days: Option<u32>,
    },
}

impl Command {
    fn action(&self) -> Action {
        match self {
            Command::Diff => Action::Diff,
            Command::Tag { min_days } => Action::Tag {
                min_days: *min_days,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Format {
    Yaml,
    Json,
}

impl Cli {
    fn collections(&self, config: &Config) -> Vec<Collection> {
        if self.all {
            return config.collections.clone();
        }
        let els = if self.el.is_empty() {
            vec![7]
        } else {
            self.el.clone()
        };
        Collection::product(&els, &self.collection)
    }
}

#[tokio::main]
async fn main() {
    // Logs go to stderr; stdout carries the report.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let code = match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            tracing::error!(error = %err, "run failed");
            if err.is_config() {
                EXIT_CONFIG
            } else {
                EXIT_ERRORS
            }
        }
    };
    std::process::exit(code);
}

async fn run(cli: Cli) -> Result<i32> {
    let mut config = Config::load_all(&cli.config)?;
    if let Some(concurrency) = cli.concurrency {
        config.pipeline.concurrency = concurrency;
    }
    if let Some(timeout) = cli.timeout {
        config.pipeline.timeout_secs = timeout;
    }

    let factory = ServiceFactory::new();
    for warning in validate_config(&config, &factory).into_result()? {
        tracing::warn!(%warning, "configuration warning");
    }
    let phases = config.build(&factory)?;

    let collections = cli.collections(&config);
    if collections.is_empty() {
        return Err(Error::Config("no collections selected".to_string()));
    }

    let driver = PipelineDriver::from_settings(phases, &config.pipeline);
    let cancel = driver.cancel_token().clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupted, letting in-flight calls finish");
            cancel.cancel();
        }
    });

    let report = driver
        .run(&cli.from, &cli.to, &collections, cli.command.action())
        .await?;

    let rendered = match cli.format {
        Format::Yaml => report.to_yaml()?,
        Format::Json => report.to_json()?,
    };
    match &cli.report {
        Some(path) => {
            std::fs::write(path, rendered).map_err(|e| {
                Error::Render(format!("cannot write {}: {}", path.display(), e))
            })?;
            tracing::info!(path = %path.display(), "report written");
        }
        None => print!("{rendered}"),
    }

    Ok(report.exit_code())
}
