//! Dispatch layer: turns a verb plus JSON parameters into an engine call
//! and wraps the outcome in a result envelope.

pub mod requests;

use crate::engine::BackupEngine;
use crate::ops::tracker::{Operation, OperationStatus, OperationTracker};
use crate::{EngineError, Result};
use requests::{
    parse_params, CancelParams, CreateFileParams, CreateFolderParams, ListAllParams, ListParams,
    Request, RestoreParams, Verb,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, warn};

/// A parsed call, ready to run on the blocking pool
#[derive(Debug)]
enum Call {
    CreateFile(CreateFileParams),
    CreateFolder(CreateFolderParams),
    ListFiles(ListParams),
    ListFolders(ListParams),
    RestoreFile(RestoreParams),
    RestoreFolder(RestoreParams),
    ListAll(ListAllParams),
}

impl Call {
    fn parse(verb: Verb, parameters: &Value) -> Result<Self> {
        let call = match verb {
            Verb::CreateFileBackup => Self::CreateFile(parse_params(verb, parameters)?),
            Verb::CreateFolderBackup => Self::CreateFolder(parse_params(verb, parameters)?),
            Verb::ListFileBackups => Self::ListFiles(parse_params(verb, parameters)?),
            Verb::ListFolderBackups => Self::ListFolders(parse_params(verb, parameters)?),
            Verb::RestoreFileBackup => Self::RestoreFile(parse_params(verb, parameters)?),
            Verb::RestoreFolderBackup => Self::RestoreFolder(parse_params(verb, parameters)?),
            Verb::ListAllBackups => Self::ListAll(parse_params(verb, parameters)?),
            Verb::Cancel => {
                return Err(EngineError::validation("cancel is not an engine call"));
            }
        };
        Ok(call)
    }

    fn execute(self, engine: &BackupEngine, op: &Operation) -> Result<Value> {
        let value = match self {
            Self::CreateFile(p) => {
                serde_json::to_value(engine.create_file_backup(op, &p.path, p.context.as_deref())?)?
            }
            Self::CreateFolder(p) => serde_json::to_value(engine.create_folder_backup(
                op,
                &p.path,
                p.include_pattern.as_deref(),
                p.exclude_pattern.as_deref(),
                p.context.as_deref(),
            )?)?,
            Self::ListFiles(p) => serde_json::to_value(engine.list_file_backups(op, &p.path)?)?,
            Self::ListFolders(p) => serde_json::to_value(engine.list_folder_backups(op, &p.path)?)?,
            Self::RestoreFile(p) => serde_json::to_value(engine.restore_file_backup(
                op,
                &p.path,
                &p.timestamp,
                p.make_emergency,
            )?)?,
            Self::RestoreFolder(p) => serde_json::to_value(engine.restore_folder_backup(
                op,
                &p.path,
                &p.timestamp,
                p.make_emergency,
            )?)?,
            Self::ListAll(p) => serde_json::to_value(engine.list_all_backups(
                op,
                p.include_pattern.as_deref(),
                p.exclude_pattern.as_deref(),
                p.include_emergency,
            )?)?,
        };
        Ok(value)
    }
}

/// Shared dispatcher state
#[derive(Clone)]
pub struct Dispatcher {
    engine: Arc<BackupEngine>,
    tracker: OperationTracker,
}

impl Dispatcher {
    pub fn new(engine: BackupEngine) -> Self {
        Self {
            engine: Arc::new(engine),
            tracker: OperationTracker::new(),
        }
    }

    pub fn engine(&self) -> &BackupEngine {
        &self.engine
    }

    pub fn tracker(&self) -> &OperationTracker {
        &self.tracker
    }

    /// Decode one JSON request line and dispatch it
    pub async fn dispatch_line(&self, line: &str) -> Value {
        match serde_json::from_str::<Request>(line) {
            Ok(request) => self.dispatch(request).await,
            Err(e) => failure(
                None,
                &EngineError::validation(format!("Malformed request: {e}")),
            ),
        }
    }

    /// Run one call to completion and build its envelope
    pub async fn dispatch(&self, request: Request) -> Value {
        let correlation = request.id.clone();
        let mut envelope = match request.operation.parse::<Verb>() {
            Ok(Verb::Cancel) => self.cancel(&request).await,
            Ok(verb) => self.run(verb, request).await,
            Err(e) => failure(request.operation_id.as_deref(), &e),
        };
        if let (Some(id), Some(object)) = (correlation, envelope.as_object_mut()) {
            object.insert("id".to_string(), id);
        }
        envelope
    }

    async fn run(&self, verb: Verb, request: Request) -> Value {
        // Registered before parsing so every failure carries an operation id
        let op = match self.tracker.begin(verb.as_str(), request.operation_id.clone()).await {
            Ok(op) => op,
            Err(e) => return failure(request.operation_id.as_deref(), &e),
        };

        info!(operation_id = %op.id(), operation = %verb, "Operation started");

        let outcome = match Call::parse(verb, &request.parameters) {
            Ok(call) => {
                let engine = self.engine.clone();
                let worker = op.clone();
                tokio::task::spawn_blocking(move || call.execute(&engine, &worker))
                    .await
                    .unwrap_or_else(|e| {
                        Err(EngineError::io(
                            "operation worker failed",
                            std::io::Error::other(e.to_string()),
                        ))
                    })
            }
            Err(e) => Err(e),
        };

        let status = match &outcome {
            Ok(_) => OperationStatus::Completed,
            Err(e) if e.is_cancelled() => OperationStatus::Cancelled,
            Err(_) => OperationStatus::Error,
        };
        op.finish(status);
        self.tracker.complete(op.id()).await;

        match outcome {
            Ok(result) => {
                info!(operation_id = %op.id(), operation = %verb, status = status.as_str(), "Operation finished");
                success(op.id(), result)
            }
            Err(e) => {
                warn!(
                    operation_id = %op.id(),
                    operation = %verb,
                    status = status.as_str(),
                    "Operation failed: {}", e
                );
                failure(Some(op.id()), &e)
            }
        }
    }

    async fn cancel(&self, request: &Request) -> Value {
        let params: CancelParams = match parse_params(Verb::Cancel, &request.parameters) {
            Ok(params) => params,
            Err(e) => return failure(request.operation_id.as_deref(), &e),
        };

        if self.tracker.cancel(&params.operation_id).await {
            info!(operation_id = %params.operation_id, "Cancellation requested");
            json!({
                "success": true,
                "operation_id": params.operation_id,
                "status": OperationStatus::Cancelled.as_str(),
            })
        } else {
            warn!(operation_id = %params.operation_id, "Operation not found or already finished");
            failure(
                Some(&params.operation_id),
                &EngineError::not_found(format!(
                    "Operation not found or already finished: {}",
                    params.operation_id
                )),
            )
        }
    }
}

fn success(operation_id: &str, result: Value) -> Value {
    json!({
        "success": true,
        "operation_id": operation_id,
        "result": result,
    })
}

fn failure(operation_id: Option<&str>, error: &EngineError) -> Value {
    json!({
        "success": false,
        "operation_id": operation_id,
        "error": {
            "kind": error.kind(),
            "message": error.to_string(),
        },
    })
}
