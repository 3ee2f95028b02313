//! # agentflow-checkpoint - Durable snapshots for workflow runs
//!
//! This crate provides the persistence layer for the agentflow workflow
//! runtime: a JSON-serializable [`WorkflowCheckpoint`] snapshot, a
//! marker-based encoding scheme for typed values with an explicit
//! [`TypeRegistry`] and an instantiation guard, and the
//! [`CheckpointStorage`] protocol with in-memory and file-backed
//! implementations.
//!
//! ## Overview
//!
//! A checkpoint captures everything a compatible process needs to resume a
//! paused or interrupted workflow run:
//!
//! - the message queue awaiting the next superstep,
//! - the shared state and every executor's private state,
//! - the pending external (human-in-the-loop) requests,
//! - iteration bookkeeping and arbitrary metadata.
//!
//! Checkpoints are created by the runtime at superstep boundaries or on
//! explicit request, and re-hydrated with `apply_checkpoint` on the
//! runtime side. Resumption is at-least-once: a run restored from a
//! checkpoint may re-deliver messages that were in flight when the
//! snapshot was taken.
//!
//! ## Typed values
//!
//! Checkpoint bodies are plain JSON. Values that started life as concrete
//! Rust types are wrapped in markers carrying their fully qualified type
//! name (see [`encoding`]). Decoding resolves names against a
//! [`TypeRegistry`] and validates the stored body against the registered
//! shape before admitting it; forged or stale markers decode to inert raw
//! JSON instead of instantiating anything.
//!
//! ## Example
//!
//! ```rust,ignore
//! use agentflow_checkpoint::{FileCheckpointStorage, CheckpointStorage, WorkflowCheckpoint};
//!
//! # async fn example() -> agentflow_checkpoint::Result<()> {
//! let storage = FileCheckpointStorage::new("/var/lib/agentflow/checkpoints")?;
//! let checkpoint = WorkflowCheckpoint::new("wf-review", 100);
//! let id = storage.save_checkpoint(&checkpoint).await?;
//! let restored = storage.load_checkpoint(&id).await?;
//! # Ok(())
//! # }
//! ```

pub mod checkpoint;
pub mod encoding;
pub mod error;
pub mod storage;
pub mod summary;

pub use checkpoint::{CheckpointId, PendingRequestState, WorkflowCheckpoint};
pub use encoding::{
    decode_typed, decode_value, encode_bytes, encode_dataclass, encode_datetime, encode_enum,
    encode_model, encode_set, encode_typed, DecodedTyped, ModelCodec, TypeRegistry, TypeShape,
    BYTES_MARKER, DATACLASS_MARKER, DATETIME_MARKER, ENUM_MARKER, MODEL_MARKER, SET_MARKER,
};
pub use error::{CheckpointError, Result};
pub use storage::{CheckpointStorage, FileCheckpointStorage, InMemoryCheckpointStorage};
pub use summary::{checkpoint_summary, CheckpointSummary};
