//! Persistence sinks for sample batches
//!
//! ## Design
//!
//! - **Trait-based**: `PersistenceSink` allows swapping implementations
//! - **Async**: All operations are async for compatibility with Tokio actors
//! - **Batch-oriented**: Samples arrive in batches from the accumulator
//!
//! ## Sinks
//!
//! - **SQLite** (default): Embedded database
//! - **In-Memory**: No persistence, for tests or storage-disabled deployments

pub mod backend;
pub mod error;
pub mod memory;
pub mod schema;
#[cfg(feature = "storage-sqlite")]
pub mod sqlite;

pub use backend::{HealthStatus, PersistenceSink};
pub use error::{StorageError, StorageResult};
pub use memory::MemorySink;
pub use schema::SampleRow;
