pub mod buffer;
pub mod client;
pub mod error;
pub mod index;
pub mod pool;
pub mod protocol;
pub mod region_map;
pub mod server;
pub mod transport;

pub use client::{ClientError, Connection, ConnectionConfig};
pub use error::{AllocError, PoolError, ProtocolError, StatusError};
pub use pool::{InMemoryPoolManager, Pool, PoolManager};
pub use server::{Responder, ServerConfig};
pub use transport::{Fabric, FabricConfig, MockFabric};
