//! Actor-based sampling pipeline
//!
//! Each actor runs as an independent async task communicating via Tokio
//! channels and is stopped through a shared `CancellationToken`.
//!
//! ## Architecture Overview
//!
//! ```text
//!        +-----------+
//!        | Scheduler |  (one sample per interval)
//!        +-----+-----+
//!              | mpsc (bounded, newest dropped when full)
//!        +-----v-----+
//!        |    tee    |
//!        +-----+-----+
//!     +--------+-----------------+
//!     |        |                 |
//! +---v----+ +-v--+      +-------v---------+
//! | Batch  | |Hub |      | AlertDispatcher |
//! | Accum. | +-+--+      +-----------------+
//! +---+----+   | per-viewer queues
//!     |        v
//!  Persistence  Viewer sessions
//!  Sink
//! ```
//!
//! ## Actor Types
//!
//! - **SchedulerActor**: Samples the host at the configured interval
//! - **BatchAccumulator**: Groups samples into batches for the sink
//! - **HubActor**: Owns the viewer registry and fans messages out
//! - **AlertDispatcher**: Runs the alert hook once per sample
//! - **RetentionTask**: Deletes expired samples
//!
//! ## Communication Patterns
//!
//! 1. **Commands**: Each actor has an mpsc command channel for control messages
//! 2. **Request/Response**: oneshot channels for queries
//! 3. **Fan-out**: The hub offers every message to each viewer queue without waiting

pub mod alert;
pub mod batch;
pub mod hub;
pub mod messages;
pub mod retention;
pub mod scheduler;
