//! A thin CLI driver around [`Responder`]. This build ships only the
//! in-process mock fabric (no real network/RDMA backend), so the "server"
//! and its companion connection live in the same process — the binary
//! exists to exercise the library end to end, not to demonstrate IPC.

use clap::Parser;
use kv_rdma_core::protocol::POOL_FLAGS_CREATE;
use kv_rdma_core::region_map::RegionMap;
use kv_rdma_core::{Connection, ConnectionConfig, FabricConfig, InMemoryPoolManager, MockFabric, PoolManager, Responder, ServerConfig};
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(about = "Run a kv-rdma-core responder over the in-process mock fabric")]
struct Args {
    /// Pool created at startup.
    #[arg(long, default_value = "default")]
    pool_name: String,

    /// Size in bytes of the pool created at startup.
    #[arg(long, default_value_t = 64 * 1024 * 1024)]
    pool_size: u64,
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
    tracing::info!(pool = %args.pool_name, pool_id, "responder ready");

    tokio::signal::ctrl_c().await?;
    conn.close().await?;
    Ok(())
}
