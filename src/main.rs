//! kv-rdma-core — a remote, pool-oriented key-value store with an
//! RDMA-style fabric client and a region-based allocator.
//!
//! ## Usage
//!
//! Start the server:
//! ```bash
//! cargo run --bin kv-server
//! ```
//!
//! Run the client:
//! ```bash
//! cargo run --bin kv-client -- put mykey myvalue
//! cargo run --bin kv-client -- get mykey
//! ```

fn main() {
    println!("kv-rdma-core");
    println!();
    println!("Use the following binaries:");
    println!("  cargo run --bin kv-server -- --help");
    println!("  cargo run --bin kv-client -- --help");
    println!("  cargo run --bin kv-bench -- --help");
}
