//! Workflow-scoped shared state with exclusive-hold semantics.
//!
//! [`SharedState`] is a keyed mapping every handler in a run can read and
//! write. Single `get`/`set` operations are atomic per key. Read-modify-
//! write sequences acquire an exclusive [`SharedStateHold`]: while a hold
//! is live, no other handler can observe an interleaved modification —
//! plain `get`/`set` calls from other handlers block cooperatively until
//! the hold is released. Holds never span supersteps; they are released
//! when the guard drops, on every exit path.
//!
//! Nested holds are refused at the context layer
//! ([`WorkflowContext::hold_shared_state`](crate::context::WorkflowContext::hold_shared_state)
//! fails fast on re-acquisition) because a handler awaiting its own hold
//! would deadlock.

use crate::error::Result;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Keyed shared state for one workflow run.
#[derive(Clone, Default)]
pub struct SharedState {
    map: Arc<Mutex<HashMap<String, Value>>>,
}

impl SharedState {
    /// Create an empty shared state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a key. Returns `None` when absent.
    pub async fn get(&self, key: &str) -> Option<Value> {
        self.map.lock().await.get(key).cloned()
    }

    /// Read a key and decode it.
    pub async fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.get(key).await {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    /// Atomically write a key.
    pub async fn set<T: Serialize>(&self, key: impl Into<String>, value: T) -> Result<()> {
        let value = serde_json::to_value(value)?;
        self.map.lock().await.insert(key.into(), value);
        Ok(())
    }

    /// Acquire the exclusive hold. Blocks cooperatively while another
    /// handler holds the state.
    pub async fn hold(&self) -> SharedStateHold {
        SharedStateHold {
            guard: self.map.clone().lock_owned().await,
        }
    }

    /// Snapshot the full mapping (for checkpoints).
    pub async fn snapshot(&self) -> HashMap<String, Value> {
        self.map.lock().await.clone()
    }

    /// Replace the full mapping (checkpoint restore).
    pub async fn restore(&self, entries: HashMap<String, Value>) {
        *self.map.lock().await = entries;
    }

    /// Clear all state for a new run.
    pub async fn reset_for_new_run(&self) {
        self.map.lock().await.clear();
    }
}

impl std::fmt::Debug for SharedState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedState").finish_non_exhaustive()
    }
}

/// An exclusive hold on the shared state.
///
/// Dropping the guard releases the hold; release is guaranteed on all
/// exit paths, normal or error.
pub struct SharedStateHold {
    guard: OwnedMutexGuard<HashMap<String, Value>>,
}

impl SharedStateHold {
    /// Read a key inside the hold.
    pub fn get_within_hold(&self, key: &str) -> Option<Value> {
        self.guard.get(key).cloned()
    }

    /// Read and decode a key inside the hold.
    pub fn get_within_hold_as<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.guard.get(key) {
            Some(value) => Ok(Some(serde_json::from_value(value.clone())?)),
            None => Ok(None),
        }
    }

    /// Write a key inside the hold.
    pub fn set_within_hold<T: Serialize>(&mut self, key: impl Into<String>, value: T) -> Result<()> {
        let value = serde_json::to_value(value)?;
        self.guard.insert(key.into(), value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_get_set() {
        let state = SharedState::new();
        assert!(state.get("missing").await.is_none());

        state.set("count", 1).await.unwrap();
        assert_eq!(state.get("count").await, Some(json!(1)));
        assert_eq!(state.get_as::<i64>("count").await.unwrap(), Some(1));
    }

    #[tokio::test]
    async fn test_hold_composes_read_modify_write() {
        let state = SharedState::new();
        state.set("count", 10).await.unwrap();

        {
            let mut hold = state.hold().await;
            let current: i64 = hold.get_within_hold_as("count").unwrap().unwrap();
            hold.set_within_hold("count", current + 5).unwrap();
        }

        assert_eq!(state.get_as::<i64>("count").await.unwrap(), Some(15));
    }

    #[tokio::test]
    async fn test_hold_excludes_concurrent_writers() {
        let state = SharedState::new();
        state.set("value", 0).await.unwrap();

        let hold = state.hold().await;
        let writer = {
            let state = state.clone();
            tokio::spawn(async move {
                state.set("value", 99).await.unwrap();
            })
        };

        // The writer cannot complete while the hold is live.
        tokio::task::yield_now().await;
        assert!(!writer.is_finished());
        assert_eq!(hold.get_within_hold("value"), Some(json!(0)));

        drop(hold);
        writer.await.unwrap();
        assert_eq!(state.get("value").await, Some(json!(99)));
    }

    #[tokio::test]
    async fn test_reset_and_restore() {
        let state = SharedState::new();
        state.set("a", 1).await.unwrap();

        let snapshot = state.snapshot().await;
        state.reset_for_new_run().await;
        assert!(state.get("a").await.is_none());

        state.restore(snapshot).await;
        assert_eq!(state.get("a").await, Some(json!(1)));
    }
}
