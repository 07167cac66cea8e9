use std::str::FromStr;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use multiverse_core::{LocalState, TrackedState};
use multiverse_kubehub::KubeStore;
use multiverse_persist::{SqliteStateStore, StateStore};
use multiverse_reconcile::{ReconcileConfig, Reconciler};
use tracing::{error, info};

mod manifest;

use manifest::ResourceFile;

#[derive(Parser, Debug)]
#[command(name = "multiversectl", version, about = "Reconcile a custom resource against a cluster")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    /// Namespace override (default: the description's namespace)
    #[arg(long = "ns", global = true)]
    namespace: Option<String>,

    /// Tracked-state database (default: ~/.multiverse/state.db)
    #[arg(long = "db", global = true, env = "MULTIVERSE_DB_PATH")]
    db: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json }

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create the object and start tracking it
    Create {
        /// Resource description file
        #[arg(short = 'f', long = "file")]
        file: String,
    },
    /// Refresh tracked state from the cluster
    Read {
        #[arg(short = 'f', long = "file")]
        file: String,
    },
    /// Replace the object's spec
    Update {
        #[arg(short = 'f', long = "file")]
        file: String,
    },
    /// Delete the object and stop tracking it
    Delete {
        #[arg(short = 'f', long = "file")]
        file: String,
    },
    /// Report whether the object exists
    Exists {
        #[arg(short = 'f', long = "file")]
        file: String,
    },
    /// Start tracking an object that already exists
    Import {
        #[arg(short = 'f', long = "file")]
        file: String,
    },
    /// List tracked objects
    State,
}

fn init_tracing() {
    let env = std::env::var("MULTIVERSE_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("MULTIVERSE_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => tracing::warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            tracing::warn!(addr = %addr, "invalid MULTIVERSE_METRICS_ADDR; expected host:port");
        }
    }
}

fn open_state(db: Option<&str>) -> Result<SqliteStateStore> {
    match db {
        Some(path) => SqliteStateStore::open(path),
        None => SqliteStateStore::open_default(),
    }
}

async fn reconciler() -> Result<Reconciler> {
    let store = KubeStore::try_default().await?;
    Ok(Reconciler::new(Arc::new(store), ReconcileConfig::from_env()))
}

fn print_state(output: Output, verb: &str, key: &str, state: &TrackedState) -> Result<()> {
    match output {
        Output::Human => {
            if state.is_tracked() {
                println!("{} {} (id {})", verb, key, state.id);
            } else {
                println!("{} {} (untracked)", verb, key);
            }
        }
        Output::Json => println!("{}", serde_json::to_string_pretty(state)?),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();
    let states = open_state(cli.db.as_deref())?;
    let ns = cli.namespace.as_deref();

    match &cli.command {
        Commands::State => {
            let rows = states.list()?;
            match cli.output {
                Output::Human => {
                    println!("{:<48} {:<38} NAME", "KEY", "ID");
                    for (key, st) in rows {
                        println!("{:<48} {:<38} {}", key, st.id, st.name);
                    }
                }
                Output::Json => {
                    let items: Vec<_> = rows.into_iter().map(|(key, st)| serde_json::json!({ "key": key, "state": st })).collect();
                    println!("{}", serde_json::to_string_pretty(&items)?);
                }
            }
        }
        Commands::Exists { file } => {
            let rf = ResourceFile::load(file)?;
            let desc = rf.descriptor(ns);
            let found = reconciler().await?.exists(&desc).await?;
            match cli.output {
                Output::Human => println!("{} {}", desc.key(), if found { "exists" } else { "absent" }),
                Output::Json => println!("{}", serde_json::json!({ "key": desc.key(), "exists": found })),
            }
        }
        Commands::Create { file }
        | Commands::Read { file }
        | Commands::Update { file }
        | Commands::Delete { file }
        | Commands::Import { file } => {
            let rf = ResourceFile::load(file)?;
            let desc = rf.descriptor(ns);
            let key = desc.key();
            let rec = reconciler().await?;
            let mut state = states.load(&key)?.unwrap_or_default();
            info!(key = %key, tracked = state.is_tracked(), "loaded tracked state");

            let (verb, res) = match &cli.command {
                Commands::Create { .. } => ("created", rec.create(&desc, &rf.spec_text()?, &mut state).await),
                Commands::Update { .. } => ("updated", rec.update(&desc, &rf.spec_text()?, &mut state).await),
                Commands::Read { .. } => ("read", rec.read(&desc, &mut state).await),
                Commands::Delete { .. } => ("deleted", rec.delete(&desc, &mut state).await),
                Commands::Import { .. } => ("imported", rec.import(&desc, &mut state).await),
                Commands::State | Commands::Exists { .. } => return Ok(()),
            };
            if let Err(e) = res {
                error!(key = %key, error = %e, "{} failed", verb);
                return Err(e.into());
            }
            states.save(&key, &state)?;
            print_state(cli.output, verb, &key, &state)?;
        }
    }
    Ok(())
}
