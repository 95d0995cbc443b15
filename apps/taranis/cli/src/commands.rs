//! Subcommand handlers; each prints its result as pretty JSON on stdout

use std::io::Read;
use std::path::Path;

use domain_vectordb::{
    CreateDatabase, CreateIndex, IndexConfig, IndexEngine, Vector, VectorDbRepository,
    VectorDbService,
};
use eyre::{Result, WrapErr};
use serde::Serialize;
use tracing::info;

use crate::{DbCommand, IndexCommand, SearchArgs, VectorsCommand};

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Read a file, or stdin when the path is `-`
fn read_input(path: &Path) -> Result<String> {
    if path == Path::new("-") {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .wrap_err("Failed to read stdin")?;
        return Ok(buf);
    }
    std::fs::read_to_string(path).wrap_err_with(|| format!("Failed to read {}", path.display()))
}

/// `[{"id": 1, "data": [0.1, ...]}, ...]`
pub fn parse_vectors(raw: &str) -> Result<Vec<Vector>> {
    serde_json::from_str(raw).wrap_err("Expected a JSON array of {\"id\", \"data\"} objects")
}

/// `[[0.1, ...], ...]`
pub fn parse_queries(raw: &str) -> Result<Vec<Vec<f32>>> {
    serde_json::from_str(raw).wrap_err("Expected a JSON array of query vectors")
}

pub async fn run_db<R, E>(service: &VectorDbService<R, E>, command: DbCommand) -> Result<()>
where
    R: VectorDbRepository,
    E: IndexEngine,
{
    match command {
        DbCommand::List => print_json(&service.list_databases().await?),
        DbCommand::Create { name } => {
            print_json(&service.create_database(CreateDatabase { name }).await?)
        }
        DbCommand::Get { name } => print_json(&service.get_database(&name).await?),
        DbCommand::Delete { name } => {
            service.delete_database(&name).await?;
            info!(db = %name, "Database deleted");
            print_json(&serde_json::json!({ "deleted": name }))
        }
    }
}

pub async fn run_vectors<R, E>(
    service: &VectorDbService<R, E>,
    command: VectorsCommand,
) -> Result<()>
where
    R: VectorDbRepository,
    E: IndexEngine,
{
    match command {
        VectorsCommand::Put { db, file } => {
            let vectors = parse_vectors(&read_input(&file)?)?;
            let count = service.put_vectors(&db, vectors).await?;
            print_json(&serde_json::json!({ "db": db, "stored": count }))
        }
        VectorsCommand::Get { db, ids } => print_json(&service.get_vectors(&db, ids).await?),
    }
}

pub async fn run_index<R, E>(service: &VectorDbService<R, E>, command: IndexCommand) -> Result<()>
where
    R: VectorDbRepository,
    E: IndexEngine,
{
    match command {
        IndexCommand::Create {
            db,
            name,
            index_type,
            dimension,
            n_list,
            n_probes,
            metric,
        } => {
            let config = IndexConfig {
                index_type,
                metric,
                ..IndexConfig::new(dimension, n_list, n_probes)
            };
            let index = service
                .create_index(&db, CreateIndex { name, config })
                .await?;
            print_json(&index)
        }
        IndexCommand::Get { db, name } => print_json(&service.get_index(&db, &name).await?),
        IndexCommand::List { db } => print_json(&service.list_indexes(&db).await?),
        IndexCommand::Delete { db, name } => {
            service.delete_index(&db, &name).await?;
            print_json(&serde_json::json!({ "db": db, "deleted": name }))
        }
        IndexCommand::Train { db, name } => print_json(&service.train_index(&db, &name).await?),
        IndexCommand::Reindex { db, name } => print_json(&service.reindex(&db, &name).await?),
        IndexCommand::Resume { db, name } => {
            print_json(&service.resume_reindex(&db, &name).await?)
        }
        IndexCommand::Reconcile { db, name } => {
            let recreated = service.reconcile_index(&db, &name).await?;
            print_json(&serde_json::json!({ "db": db, "index": name, "recreated": recreated }))
        }
    }
}

pub async fn run_search<R, E>(service: &VectorDbService<R, E>, args: SearchArgs) -> Result<()>
where
    R: VectorDbRepository,
    E: IndexEngine,
{
    let raw = match (args.queries, args.file) {
        (Some(inline), _) => inline,
        (None, Some(file)) => read_input(&file)?,
        (None, None) => eyre::bail!("Provide query vectors with --queries or --file"),
    };
    let queries = parse_queries(&raw)?;

    let response = service
        .search(&args.db, args.index.as_deref(), &queries, args.k, args.n_probe)
        .await?;
    print_json(&response)
}
