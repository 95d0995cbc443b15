//! Taranis
//!
//! Command-line front end for the vector database: manage databases, ingest
//! vectors, drive the index lifecycle and run searches. Every command builds
//! one service, runs, and releases the engine before exiting.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use core_config::tracing::{init_tracing, install_color_eyre};
use domain_vectordb::{MongoVectorDbRepository, RedisEngine, VectorDbService, VectorId};
use eyre::{Result, WrapErr};
use tracing::info;

mod commands;
mod config;

use config::Config;

#[derive(Parser)]
#[command(name = "taranis")]
#[command(about = "Manage vector databases, ANN indexes and similarity search")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Database management
    #[command(subcommand)]
    Db(DbCommand),

    /// Vector ingestion and lookup
    #[command(subcommand)]
    Vectors(VectorsCommand),

    /// Index lifecycle
    #[command(subcommand)]
    Index(IndexCommand),

    /// k-nearest-neighbor search over one index
    Search(SearchArgs),
}

#[derive(Subcommand)]
pub enum DbCommand {
    List,
    Create { name: String },
    Get { name: String },
    /// Delete a database with its indexes and vectors
    Delete { name: String },
}

#[derive(Subcommand)]
pub enum VectorsCommand {
    /// Store vectors from a JSON file (`-` for stdin)
    Put {
        #[arg(long)]
        db: String,
        #[arg(short, long)]
        file: PathBuf,
    },
    Get {
        #[arg(long)]
        db: String,
        #[arg(long, value_delimiter = ',', required = true)]
        ids: Vec<VectorId>,
    },
}

#[derive(Subcommand)]
pub enum IndexCommand {
    Create {
        #[arg(long)]
        db: String,
        #[arg(long)]
        name: String,
        #[arg(long = "type", default_value = "IVFPQ")]
        index_type: String,
        #[arg(long)]
        dimension: u32,
        #[arg(long)]
        n_list: u32,
        #[arg(long)]
        n_probes: u32,
        #[arg(long, default_value = "METRIC_L2")]
        metric: String,
    },
    Get {
        #[arg(long)]
        db: String,
        #[arg(long)]
        name: String,
    },
    List {
        #[arg(long)]
        db: String,
    },
    Delete {
        #[arg(long)]
        db: String,
        #[arg(long)]
        name: String,
    },
    /// Train on the first vectors of the database
    Train {
        #[arg(long)]
        db: String,
        #[arg(long)]
        name: String,
    },
    /// Encode every vector of the database into a trained index
    Reindex {
        #[arg(long)]
        db: String,
        #[arg(long)]
        name: String,
    },
    /// Continue an interrupted reindex
    Resume {
        #[arg(long)]
        db: String,
        #[arg(long)]
        name: String,
    },
    /// Re-create the engine index from the stored record if it is missing
    Reconcile {
        #[arg(long)]
        db: String,
        #[arg(long)]
        name: String,
    },
}

#[derive(Args)]
pub struct SearchArgs {
    #[arg(long)]
    pub db: String,
    /// Index to search; required
    #[arg(long)]
    pub index: Option<String>,
    /// Inline JSON array of query vectors
    #[arg(long, conflicts_with = "file")]
    pub queries: Option<String>,
    /// JSON file of query vectors (`-` for stdin)
    #[arg(short, long)]
    pub file: Option<PathBuf>,
    /// Defaults to TARANIS_DEFAULT_K
    #[arg(short)]
    pub k: Option<u32>,
    /// Defaults to TARANIS_DEFAULT_N_PROBE
    #[arg(long)]
    pub n_probe: Option<u32>,
}

#[tokio::main]
async fn main() -> Result<()> {
    install_color_eyre();

    let config = Config::from_env()?;
    init_tracing(&config.environment);

    let cli = Cli::parse();

    info!("Connecting to document store and index engine...");
    let repository = MongoVectorDbRepository::connect(&config.store)
        .await
        .wrap_err("Document store connection failed")?;
    let engine = RedisEngine::connect(config.engine.clone())
        .await
        .wrap_err("Index engine connection failed")?;
    let service = VectorDbService::new(repository, engine, config.vectordb.clone());

    let result = match cli.command {
        Commands::Db(command) => commands::run_db(&service, command).await,
        Commands::Vectors(command) => commands::run_vectors(&service, command).await,
        Commands::Index(command) => commands::run_index(&service, command).await,
        Commands::Search(args) => commands::run_search(&service, args).await,
    };

    service.shutdown().await?;
    result
}
