//! tsbridge
//!
//! Runs one protocol session on stdin/stdout. stdout carries the protocol,
//! so logs go to stderr or to the configured log file.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Mutex;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use tsbridge::config::{generate_default_config, Config, LoggingConfig};
use tsbridge::error::{Error, Result, ResultExt};
use tsbridge::influx::InfluxCommand;
use tsbridge::protocol::Processor;

#[derive(Parser)]
#[command(name = "tsbridge")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "InfluxQL external search command")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Config file (default: search the standard locations)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// InfluxDB URL, overrides the config file
    #[arg(long)]
    influxdb_url: Option<String>,

    /// Default database, overrides the config file
    #[arg(long)]
    database: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Print or write a default config file
    Config {
        /// Write to this path instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {}", err);
            ExitCode::from(1)
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    if let Some(Commands::Config { output }) = cli.command {
        return write_default_config(output);
    }

    let config = load_config(&cli)?;
    init_logging(&config.logging)?;
    tracing::info!("tsbridge v{} starting session", env!("CARGO_PKG_VERSION"));
    tracing::debug!("InfluxDB: {}", config.influxdb.url);

    let command = InfluxCommand::new(config.influxdb.clone(), config.realtime.clone())?;
    let input = tokio::io::BufReader::new(tokio::io::stdin());
    let output = tokio::io::stdout();
    let mut processor = Processor::new(command, input, output, config.protocol.codec());

    processor.run().await
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::load_with_env(path)?,
        None => Config::load_default()?,
    };

    if let Some(url) = &cli.influxdb_url {
        config.influxdb.url = url.clone();
    }
    if let Some(database) = &cli.database {
        config.influxdb.database = Some(database.clone());
    }
    if let Some(level) = &cli.log_level {
        config.logging.level = level.clone();
    }

    Ok(config)
}

fn init_logging(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("tsbridge={}", config.level)));

    let writer = match &config.file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(Error::config)
                .with_context(|| format!("opening log file {}", path))?;
            BoxMakeWriter::new(Mutex::new(file))
        }
        None => BoxMakeWriter::new(std::io::stderr),
    };

    let registry = tracing_subscriber::registry().with(filter);
    if config.format == "json" {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(writer))
            .init();
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_ansi(config.file.is_none())
                    .with_writer(writer),
            )
            .init();
    }

    Ok(())
}

fn write_default_config(output: Option<PathBuf>) -> Result<()> {
    let content = generate_default_config();
    match output {
        Some(path) => {
            std::fs::write(&path, content)
                .map_err(Error::config)
                .with_context(|| format!("writing {}", path.display()))?;
            println!("Config written to {}", path.display());
        }
        None => print!("{}", content),
    }
    Ok(())
}
