//! ksync Endpoint Binary

use anyhow::Context;
use clap::{Parser, Subcommand};
use ksync_core::{Database, EndpointConfig, HashAlgorithm, Key, Row, TableSource, Value};
use ksync_endpoint::{serve, RemoteEndpoint, Session};
use ksync_engine::{Peer, Reconciler, TableHandle};
use ksync_protocol::Command;
use ksync_state::{Dataset, MemoryDatabase};
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "ksync-endpoint")]
#[command(about = "ksync endpoint - compare tables by hashing key ranges")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve one session over stdin/stdout
    Serve {
        /// Configuration file path
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// JSON dataset to serve
        #[arg(short, long)]
        dataset: Option<PathBuf>,

        /// Digest used until the peer picks one
        #[arg(long)]
        hash_algorithm: Option<HashAlgorithm>,

        /// Session name used in logs
        #[arg(long)]
        name: Option<String>,
    },

    /// Print a dataset's schema as JSON
    Schema {
        #[arg(short, long)]
        dataset: PathBuf,
    },

    /// Print the changes that would make `to` match `from`
    Diff {
        #[arg(long)]
        from: PathBuf,

        #[arg(long)]
        to: PathBuf,

        /// Tables to compare; all tables of `to` when omitted
        #[arg(long)]
        table: Vec<String>,

        #[arg(long, default_value = "blake3")]
        hash_algorithm: HashAlgorithm,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            config,
            dataset,
            hash_algorithm,
            name,
        } => {
            let mut config = match config {
                Some(path) => EndpointConfig::from_file(&path)?,
                None => EndpointConfig::default(),
            };
            if dataset.is_some() {
                config.dataset = dataset;
            }
            if let Some(algorithm) = hash_algorithm {
                config.hash_algorithm = algorithm;
            }
            if let Some(name) = name {
                config.name = name;
            }
            config.validate()?;
            init_logging(&config.log_level);

            let path = config
                .dataset
                .clone()
                .context("no dataset given; pass --dataset or set `dataset` in the config")?;
            let db = load_database(&path)?;
            info!("Serving {} as {}", path.display(), config.name);

            let mut session = Session::from_config(&config, db);
            serve(&mut session, tokio::io::stdin(), tokio::io::stdout(), &config).await?;
        }

        Commands::Schema { dataset } => {
            init_logging("warn");
            let db = load_database(&dataset)?;
            let schema = db.statement_view()?.schema()?;
            println!("{}", schema.to_json()?);
        }

        Commands::Diff {
            from,
            to,
            table,
            hash_algorithm,
        } => {
            init_logging("info");
            let report = diff_datasets(&from, &to, table, hash_algorithm).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(())
}

fn init_logging(default_filter: &str) {
    // stdout carries the protocol, so logs go to stderr
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn load_database(path: &Path) -> anyhow::Result<MemoryDatabase> {
    let db = Dataset::load(path)?
        .into_database()
        .with_context(|| format!("loading {}", path.display()))?;
    Ok(db)
}

/// Reconcile each table of `to` against a session serving `from`, talking
/// over an in-memory pipe exactly as two processes would
async fn diff_datasets(
    from: &Path,
    to: &Path,
    tables: Vec<String>,
    algorithm: HashAlgorithm,
) -> anyhow::Result<serde_json::Value> {
    let from_db = load_database(from)?;
    let to_db = load_database(to)?;
    let view = to_db.begin_consistent_view()?;

    let tables = if tables.is_empty() {
        view.schema()?.tables.into_iter().map(|t| t.name).collect()
    } else {
        tables
    };

    let mut report = Vec::new();
    for name in tables {
        let def = view.table(&name)?;

        let (client, server) = tokio::io::duplex(64 * 1024);
        let (server_read, server_write) = tokio::io::split(server);
        let mut session = Session::new(format!("from/{}", name), from_db.clone(), algorithm);
        let server = tokio::spawn(async move {
            serve(&mut session, server_read, server_write, &EndpointConfig::default()).await
        });

        let (client_read, client_write) = tokio::io::split(client);
        let mut remote = RemoteEndpoint::new(client_read, client_write);
        let diff = Reconciler::new(&view, TableHandle::new(def)?, algorithm)
            .run(&mut remote)
            .await?;
        remote.request(Command::Quit).await?;
        server.await??;

        report.push(serde_json::json!({
            "table": name,
            "upserts": diff.upserts.iter().map(row_json).collect::<Vec<_>>(),
            "deletes": diff.deletes.iter().map(key_json).collect::<Vec<_>>(),
            "commands": diff.commands_sent,
        }));
    }
    Ok(serde_json::Value::Array(report))
}

fn row_json(row: &Row) -> Vec<Option<&str>> {
    row.values().iter().map(Value::as_str).collect()
}

fn key_json(key: &Key) -> Vec<Option<&str>> {
    key.values().iter().map(Value::as_str).collect()
}
