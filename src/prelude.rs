//! Prelude module for common imports.
//!
//! This module re-exports commonly used types and traits for convenience.
//!
//! # Usage
//!
//! ```ignore
//! use mcpipe::prelude::*;
//! ```

// Error types
pub use crate::error::{CacheError, Error, ErrorKind, KeyError, Result, ReturnCode};

// Configuration
pub use crate::config::{ClientConfig, CompressionConfig, Config, MetricsConfig};

// Values and keys
pub use crate::codec::{Codec, NativeCodec, Value};
pub use crate::compression::CompressionOptions;
pub use crate::key::AppKey;

// Client
pub use crate::backend::{Memcached, ServerSpec, StoreMode};
pub use crate::behavior::{BehaviorValue, Behaviors};
pub use crate::client::{Client, StoreOptions};
pub use crate::pool::{ClientPool, ThreadMappedPool};

// Metrics
pub use crate::metrics::ClientMetrics;

// Common external crates
pub use std::sync::Arc;
pub use tracing::{debug, error, info, trace, warn};
