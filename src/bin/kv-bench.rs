//! A microbenchmark driving repeated put/get cycles through a single
//! [`Connection`] against an in-process responder, reporting throughput.
//! Values are inlined or pushed through the two-stage path depending on
//! `--value-size` versus the negotiated inline limit, exactly as a real
//! caller's traffic would split.

use clap::Parser;
use kv_rdma_core::protocol::POOL_FLAGS_CREATE;
use kv_rdma_core::region_map::RegionMap;
use kv_rdma_core::{Connection, ConnectionConfig, FabricConfig, InMemoryPoolManager, MockFabric, PoolManager, Responder, ServerConfig};
use std::sync::Arc;
use std::time::Instant;

#[derive(Parser, Debug)]
#[command(about = "Benchmark put/get throughput against the in-process mock fabric")]
struct Args {
    /// Number of put/get cycles to run.
    #[arg(long, default_value_t = 10_000)]
    count: u64,

    /// Size in bytes of each value.
    #[arg(long, default_value_t = 128)]
    value_size: usize,

    /// Force the two-stage (registered-region) path instead of inline.
    #[arg(long, default_value_t = false)]
    direct: bool,
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
    let pool_id = conn
        .create_pool("bench", 1024 * 1024 * 1024, POOL_FLAGS_CREATE, args.count)
        .await?;

    let value = vec![0xABu8; args.value_size];

    let start = Instant::now();
    for i in 0..args.count {
        let key = format!("key-{i}");
        if args.direct {
            conn.put_direct(pool_id, key.as_bytes(), &value, true).await?;
        } else {
            conn.put(pool_id, key.as_bytes(), &value, true).await?;
        }
    }
    let put_elapsed = start.elapsed();

    let start = Instant::now();
    for i in 0..args.count {
        let key = format!("key-{i}");
        if args.direct {
            conn.get_direct(pool_id, key.as_bytes(), args.value_size).await?;
        } else {
            conn.get(pool_id, key.as_bytes()).await?;
        }
    }
    let get_elapsed = start.elapsed();

    let put_rate = args.count as f64 / put_elapsed.as_secs_f64();
    let get_rate = args.count as f64 / get_elapsed.as_secs_f64();
    println!("put: {:>10} ops in {:?} ({:.0} ops/s)", args.count, put_elapsed, put_rate);
    println!("get: {:>10} ops in {:?} ({:.0} ops/s)", args.count, get_elapsed, get_rate);

    conn.close().await?;
    Ok(())
}
