//! # mcpipe
//!
//! The value-serialization and batched multi-key pipeline of a memcached
//! client.
//!
//! ## Features
//!
//! - Typed values stored as flagged payloads (raw, text, integer, long, JSON)
//! - Opportunistic zlib compression above a size threshold
//! - Multi-key get/set/add/delete/incr with per-key soft failures
//! - Compare-and-swap with stale-token detection
//! - Pluggable codecs, including simulated misses from a custom decoder
//! - In-memory and ASCII-protocol collaborators, modula or ketama routing
//! - Client pools and async offloading onto tokio's blocking pool
//! - Prometheus metrics for every operation
//!
//! ## Example
//!
//! ```ignore
//! use mcpipe::Client;
//!
//! let mut client = Client::connect(&["127.0.0.1:11211"])?;
//! client.set("foo", "bar")?;
//! assert_eq!(client.get("foo")?, Some("bar".into()));
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────────┐   ┌──────────┐   ┌──────────────┐
//! │ Client       │──▶│ key + batch      │──▶│ executor │──▶│ Memcached    │
//! │ (façade)     │   │ codec + compress │   │          │   │ memory/ascii │
//! └──────────────┘   └──────────────────┘   └──────────┘   └──────────────┘
//!        ▲                                        │
//!        └──────── unmarshal / error mapping ◀────┘
//! ```

// Modules
pub mod backend;
pub mod batch;
pub mod behavior;
pub mod client;
pub mod codec;
pub mod compression;
pub mod config;
pub mod error;
pub mod executor;
pub mod hash;
pub mod key;
pub mod metrics;
pub mod pool;
pub mod prelude;
pub mod protocol;
pub mod storage;

// Re-exports for convenience
pub use client::{Client, StoreOptions};
pub use codec::{Codec, NativeCodec, Value};
pub use error::{
    CacheError, DecodeError, DecompressError, Error, ErrorKind, KeyError, ProtocolError, Result,
    ReturnCode, error_kind_for_raw,
};
pub use key::AppKey;
