//! End-to-end scenarios driving a [`Connection`] against a [`Responder`]
//! over the in-process mock fabric, in place of a real network socket.

use kv_rdma_core::protocol::{AttributeType, POOL_FLAGS_CREATE};
use kv_rdma_core::region_map::RegionMap;
use kv_rdma_core::{
    ClientError, Connection, ConnectionConfig, FabricConfig, InMemoryPoolManager, MockFabric, PoolManager,
    Responder, ServerConfig, StatusError,
};
use std::sync::Arc;

async fn connected_pair(pool_size: u64) -> (Connection, u64) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("kv_rdma_core=debug")
        .try_init();

    let (client_fabric, server_fabric) = MockFabric::pair(FabricConfig::default());
    let pool_manager: Arc<dyn PoolManager> = Arc::new(InMemoryPoolManager::new(Arc::new(RegionMap::new())));
    let responder = Responder::new(Arc::new(server_fabric), pool_manager, ServerConfig::default());
    tokio::spawn(async move {
        let _ = responder.serve().await;
    });

    let conn = Connection::new(Arc::new(client_fabric), ConnectionConfig::default());
    conn.connect().await.unwrap();
    let pool_id = conn.create_pool("test-pool", pool_size, POOL_FLAGS_CREATE, 0).await.unwrap();
    (conn, pool_id)
}

#[tokio::test]
async fn basic_put_get_roundtrip_with_count() {
    let (conn, pool_id) = connected_pair(16 * 1024 * 1024).await;

    conn.put(pool_id, b"alpha", b"one", false).await.unwrap();
    conn.put(pool_id, b"beta", b"two", false).await.unwrap();

    assert_eq!(conn.get(pool_id, b"alpha").await.unwrap(), b"one");
    assert_eq!(conn.get(pool_id, b"beta").await.unwrap(), b"two");
    assert_eq!(conn.count(pool_id).await.unwrap(), 2);

    conn.close().await.unwrap();
}

#[tokio::test]
async fn duplicate_put_without_replace_is_rejected() {
    let (conn, pool_id) = connected_pair(16 * 1024 * 1024).await;

    conn.put(pool_id, b"k", b"v1", false).await.unwrap();
    let err = conn.put(pool_id, b"k", b"v2", false).await.unwrap_err();
    assert!(matches!(err, ClientError::Status(StatusError::KeyExists)));

    assert_eq!(conn.get(pool_id, b"k").await.unwrap(), b"v1");

    conn.put(pool_id, b"k", b"v2", true).await.unwrap();
    assert_eq!(conn.get(pool_id, b"k").await.unwrap(), b"v2");

    conn.close().await.unwrap();
}

#[tokio::test]
async fn getting_a_missing_key_is_key_not_found() {
    let (conn, pool_id) = connected_pair(16 * 1024 * 1024).await;

    let err = conn.get(pool_id, b"missing").await.unwrap_err();
    assert!(matches!(err, ClientError::Status(StatusError::KeyNotFound)));

    conn.close().await.unwrap();
}

#[tokio::test]
async fn erase_then_get_is_not_found() {
    let (conn, pool_id) = connected_pair(16 * 1024 * 1024).await;

    conn.put(pool_id, b"gone-soon", b"v", false).await.unwrap();
    conn.erase(pool_id, b"gone-soon").await.unwrap();

    let err = conn.get(pool_id, b"gone-soon").await.unwrap_err();
    assert!(matches!(err, ClientError::Status(StatusError::KeyNotFound)));
    assert_eq!(conn.count(pool_id).await.unwrap(), 0);

    conn.close().await.unwrap();
}

#[tokio::test]
async fn large_value_round_trips_through_put_direct_and_get_direct() {
    let (conn, pool_id) = connected_pair(64 * 1024 * 1024).await;

    let value = vec![0x5Au8; 512 * 1024];
    conn.put_direct(pool_id, b"huge", &value, false).await.unwrap();

    let fetched = conn.get_direct(pool_id, b"huge", value.len()).await.unwrap();
    assert_eq!(fetched, value);

    conn.close().await.unwrap();
}

#[tokio::test]
async fn plain_get_falls_back_to_two_stage_without_caller_registration() {
    let (conn, pool_id) = connected_pair(64 * 1024 * 1024).await;

    let value = vec![0x42u8; 512 * 1024];
    conn.put_direct(pool_id, b"huge", &value, false).await.unwrap();

    // conn.get (not get_direct) never registers a destination region
    // itself; it must still recover the full value on demand.
    let fetched = conn.get(pool_id, b"huge").await.unwrap();
    assert_eq!(fetched, value);

    conn.close().await.unwrap();
}

#[tokio::test]
async fn value_len_attribute_matches_stored_value() {
    let (conn, pool_id) = connected_pair(16 * 1024 * 1024).await;

    conn.put(pool_id, b"sized", b"0123456789", false).await.unwrap();
    let len = conn.get_attribute(pool_id, b"sized", AttributeType::ValueLen).await.unwrap();
    assert_eq!(len, 10);

    conn.close().await.unwrap();
}

#[tokio::test]
async fn find_resumes_from_offset_across_calls() {
    let (conn, pool_id) = connected_pair(16 * 1024 * 1024).await;

    conn.put(pool_id, b"apple", b"1", false).await.unwrap();
    conn.put(pool_id, b"apricot", b"2", false).await.unwrap();
    conn.put(pool_id, b"banana", b"3", false).await.unwrap();

    let (first_key, first_offset) = conn.find(pool_id, b"ap", 0).await.unwrap();
    assert!(first_key == b"apple" || first_key == b"apricot");

    let (second_key, _) = conn.find(pool_id, b"ap", first_offset).await.unwrap();
    assert!(second_key == b"apple" || second_key == b"apricot");
    assert_ne!(first_key, second_key);

    conn.close().await.unwrap();
}

#[tokio::test]
async fn multiple_pools_keep_independent_keyspaces() {
    let (conn, pool_a) = connected_pair(16 * 1024 * 1024).await;
    let pool_b = conn.create_pool("second-pool", 16 * 1024 * 1024, POOL_FLAGS_CREATE, 0).await.unwrap();

    conn.put(pool_a, b"shared-key", b"from-a", false).await.unwrap();
    conn.put(pool_b, b"shared-key", b"from-b", false).await.unwrap();

    assert_eq!(conn.get(pool_a, b"shared-key").await.unwrap(), b"from-a");
    assert_eq!(conn.get(pool_b, b"shared-key").await.unwrap(), b"from-b");

    conn.close().await.unwrap();
}

#[tokio::test]
async fn close_from_ready_reaches_stopped_and_further_ticks_are_no_ops() {
    let (conn, _pool_id) = connected_pair(16 * 1024 * 1024).await;

    conn.close().await.unwrap();
    assert_eq!(conn.tick().await.unwrap(), 0);
}
