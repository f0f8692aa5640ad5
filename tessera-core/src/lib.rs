//! # Tessera Core
//!
//! Shared building blocks for the tessera storage engine:
//! - Error types
//! - Configuration
//! - Metrics sink
//! - Variable-length quantity codec
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │                  tessera-core                   │
//! ├─────────────────────────────────────────────────┤
//! │  • error   - Error taxonomy and Result alias    │
//! │  • config  - Log and index build options        │
//! │  • metrics - Explicit telemetry sink            │
//! │  • varint  - Unsigned VLQ encode/decode         │
//! └─────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod error;
pub mod metrics;
pub mod varint;

// Re-export commonly used types
pub use config::{BuildStrategy, CompressionType, Config, HashType, IndexConfig, LogConfig};
pub use error::{Error, Result};
pub use metrics::{Metrics, MetricsSnapshot};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
