//! A CLI client exercising [`Connection`] against an in-process responder
//! over the mock fabric. Each invocation creates its own private pool, puts
//! or gets a single key, and prints the result.

use clap::{Parser, Subcommand};
use kv_rdma_core::protocol::POOL_FLAGS_CREATE;
use kv_rdma_core::region_map::RegionMap;
use kv_rdma_core::{Connection, ConnectionConfig, FabricConfig, InMemoryPoolManager, MockFabric, PoolManager, Responder, ServerConfig};
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(about = "Drive a kv-rdma-core connection over the in-process mock fabric")]
struct Args {
    #[arg(long, default_value = "default")]
    pool_name: String,

    #[arg(long, default_value_t = 64 * 1024 * 1024)]
    pool_size: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Store a value under a key.
    Put { key: String, value: String },
    /// Fetch the value stored under a key.
    Get { key: String },
    /// Remove a key.
    Erase { key: String },
    /// Print the number of keys in the pool.
    Count,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let (client_fabric, server_fabric) = MockFabric::pair(FabricConfig::default());
    let pool_manager: Arc<dyn PoolManager> = Arc::new(InMemoryPoolManager::new(Arc::new(RegionMap::new())));
    let responder = Responder::new(Arc::new(server_fabric), pool_manager, ServerConfig::default());

    tokio::spawn(async move {
        if let Err(e) = responder.serve().await {
            tracing::error!(error = %e, "responder stopped on a fatal protocol violation");
        }
    });

    let conn = Connection::new(Arc::new(client_fabric), ConnectionConfig::default());
    conn.connect().await?;
    let pool_id = conn.create_pool(&args.pool_name, args.pool_size, POOL_FLAGS_CREATE, 0).await?;

    match args.command {
        Command::Put { key, value } => {
            conn.put(pool_id, key.as_bytes(), value.as_bytes(), true).await?;
            println!("OK");
        }
        Command::Get { key } => match conn.get(pool_id, key.as_bytes()).await {
            Ok(value) => println!("{}", String::from_utf8_lossy(&value)),
            Err(e) => println!("error: {e}"),
        },
        Command::Erase { key } => {
            conn.erase(pool_id, key.as_bytes()).await?;
            println!("OK");
        }
        Command::Count => {
            let count = conn.count(pool_id).await?;
            println!("{count}");
        }
    }

    conn.close().await?;
    Ok(())
}
