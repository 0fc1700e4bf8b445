//! Operation tracking for dispatched calls.
//!
//! Every dispatched call gets an [`Operation`] carrying its progress, status,
//! and cancellation token. Operations live only while their call runs.

use crate::{EngineError, Result};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationStatus {
    Running,
    Completed,
    Error,
    Cancelled,
}

impl OperationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Error => "error",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

#[derive(Debug)]
struct OperationState {
    id: String,
    kind: String,
    progress: AtomicU8,
    status: Mutex<OperationStatus>,
    cancel: CancellationToken,
}

/// Handle to one in-flight operation, cheap to clone
#[derive(Debug, Clone)]
pub struct Operation {
    state: Arc<OperationState>,
}

impl Operation {
    fn new(id: String, kind: &str) -> Self {
        Self {
            state: Arc::new(OperationState {
                id,
                kind: kind.to_string(),
                progress: AtomicU8::new(0),
                status: Mutex::new(OperationStatus::Running),
                cancel: CancellationToken::new(),
            }),
        }
    }

    /// An untracked operation, for driving engine calls directly
    pub fn detached(kind: &str) -> Self {
        Self::new(Uuid::new_v4().to_string(), kind)
    }

    pub fn id(&self) -> &str {
        &self.state.id
    }

    pub fn kind(&self) -> &str {
        &self.state.kind
    }

    /// Progress 0-100; a monitoring hint
    pub fn progress(&self) -> u8 {
        self.state.progress.load(Ordering::SeqCst)
    }

    /// Record progress; values never move backwards and are capped at 100
    pub fn set_progress(&self, percent: u8) {
        self.state.progress.fetch_max(percent.min(100), Ordering::SeqCst);
    }

    pub fn status(&self) -> OperationStatus {
        self.state
            .status
            .lock()
            .map(|status| *status)
            .unwrap_or(OperationStatus::Error)
    }

    /// Move to a terminal status; the first terminal status wins
    pub fn finish(&self, status: OperationStatus) {
        if let Ok(mut current) = self.state.status.lock() {
            if !current.is_terminal() {
                *current = status;
            }
        }
        if status == OperationStatus::Completed {
            self.set_progress(100);
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.cancel.is_cancelled()
    }

    /// Token polled by copy routines
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.state.cancel
    }

    fn request_cancel(&self) {
        self.state.cancel.cancel();
    }

    /// Checkpoint: fail with [`EngineError::Cancelled`] if cancel was requested
    pub fn checkpoint(&self) -> Result<()> {
        if self.is_cancelled() {
            info!(operation_id = %self.id(), operation = %self.kind(), "Cancellation observed");
            return Err(EngineError::Cancelled);
        }
        Ok(())
    }
}

/// Registry of running operations, shared by clone
#[derive(Debug, Clone, Default)]
pub struct OperationTracker {
    operations: Arc<RwLock<HashMap<String, Operation>>>,
}

impl OperationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new operation under `requested_id`, or a fresh UUID
    pub async fn begin(&self, kind: &str, requested_id: Option<String>) -> Result<Operation> {
        let id = match requested_id.map(|id| id.trim().to_string()) {
            Some(id) if id.is_empty() => {
                return Err(EngineError::validation("operation_id must not be empty"))
            }
            Some(id) => id,
            None => Uuid::new_v4().to_string(),
        };

        let mut operations = self.operations.write().await;
        if operations.contains_key(&id) {
            return Err(EngineError::validation(format!(
                "Operation {id} is already running"
            )));
        }
        let operation = Operation::new(id.clone(), kind);
        operations.insert(id, operation.clone());
        Ok(operation)
    }

    /// Request cancellation of a running operation.
    /// Returns false when the id is unknown or the call already returned.
    pub async fn cancel(&self, id: &str) -> bool {
        let operations = self.operations.read().await;
        match operations.get(id) {
            Some(operation) => {
                operation.request_cancel();
                true
            }
            None => false,
        }
    }

    /// Request cancellation of everything still running; returns how many
    pub async fn cancel_all(&self) -> usize {
        let operations = self.operations.read().await;
        for operation in operations.values() {
            operation.request_cancel();
        }
        operations.len()
    }

    /// Remove an operation from tracking (called when its call returns)
    pub async fn complete(&self, id: &str) {
        let mut operations = self.operations.write().await;
        operations.remove(id);
    }

    pub async fn running_count(&self) -> usize {
        let operations = self.operations.read().await;
        operations.len()
    }
}
