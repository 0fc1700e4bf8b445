//! Request envelope and per-verb parameters.

use crate::{EngineError, Result};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// One dispatch call as received from the host
#[derive(Debug, Clone, Deserialize)]
pub struct Request {
    /// Correlation id echoed back verbatim, if present
    #[serde(default)]
    pub id: Option<Value>,

    #[serde(alias = "command", alias = "verb")]
    pub operation: String,

    #[serde(default, alias = "params", alias = "arguments")]
    pub parameters: Value,

    /// Caller-chosen operation id, so the call can be cancelled while running
    #[serde(default, alias = "operationId")]
    pub operation_id: Option<String>,
}

impl Request {
    pub fn new(operation: impl Into<String>, parameters: Value) -> Self {
        Self {
            id: None,
            operation: operation.into(),
            parameters,
            operation_id: None,
        }
    }

    pub fn with_operation_id(mut self, operation_id: impl Into<String>) -> Self {
        self.operation_id = Some(operation_id.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    CreateFileBackup,
    ListFileBackups,
    RestoreFileBackup,
    CreateFolderBackup,
    ListFolderBackups,
    RestoreFolderBackup,
    ListAllBackups,
    Cancel,
}

impl Verb {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CreateFileBackup => "create-file-backup",
            Self::ListFileBackups => "list-file-backups",
            Self::RestoreFileBackup => "restore-file-backup",
            Self::CreateFolderBackup => "create-folder-backup",
            Self::ListFolderBackups => "list-folder-backups",
            Self::RestoreFolderBackup => "restore-folder-backup",
            Self::ListAllBackups => "list-all-backups",
            Self::Cancel => "cancel",
        }
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Verb {
    type Err = EngineError;

    /// Dash and underscore spellings are equivalent
    fn from_str(s: &str) -> Result<Self> {
        let verb = match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "create-file-backup" => Self::CreateFileBackup,
            "list-file-backups" => Self::ListFileBackups,
            "restore-file-backup" => Self::RestoreFileBackup,
            "create-folder-backup" => Self::CreateFolderBackup,
            "list-folder-backups" => Self::ListFolderBackups,
            "restore-folder-backup" => Self::RestoreFolderBackup,
            "list-all-backups" => Self::ListAllBackups,
            "cancel" | "cancel-operation" => Self::Cancel,
            _ => return Err(EngineError::validation(format!("Unknown operation: {s}"))),
        };
        Ok(verb)
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateFileParams {
    #[serde(alias = "file_path", alias = "filePath")]
    pub path: PathBuf,

    #[serde(default, alias = "agent_context", alias = "agentContext")]
    pub context: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateFolderParams {
    #[serde(alias = "folder_path", alias = "folderPath")]
    pub path: PathBuf,

    #[serde(default, alias = "includePattern", alias = "include")]
    pub include_pattern: Option<String>,

    #[serde(default, alias = "excludePattern", alias = "exclude")]
    pub exclude_pattern: Option<String>,

    #[serde(default, alias = "agent_context", alias = "agentContext")]
    pub context: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListParams {
    #[serde(
        alias = "file_path",
        alias = "filePath",
        alias = "folder_path",
        alias = "folderPath"
    )]
    pub path: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RestoreParams {
    #[serde(
        alias = "file_path",
        alias = "filePath",
        alias = "folder_path",
        alias = "folderPath"
    )]
    pub path: PathBuf,

    pub timestamp: String,

    #[serde(default = "default_true", alias = "makeEmergency", alias = "make-emergency")]
    pub make_emergency: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListAllParams {
    #[serde(default, alias = "includePattern", alias = "include")]
    pub include_pattern: Option<String>,

    #[serde(default, alias = "excludePattern", alias = "exclude")]
    pub exclude_pattern: Option<String>,

    #[serde(
        default = "default_true",
        alias = "includeEmergency",
        alias = "include-emergency"
    )]
    pub include_emergency: bool,
}

impl Default for ListAllParams {
    fn default() -> Self {
        Self {
            include_pattern: None,
            exclude_pattern: None,
            include_emergency: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CancelParams {
    #[serde(alias = "operationId", alias = "id")]
    pub operation_id: String,
}

/// Decode verb parameters; a missing or mistyped argument is a validation error
pub fn parse_params<T: DeserializeOwned>(verb: Verb, parameters: &Value) -> Result<T> {
    let parameters = match parameters {
        Value::Null => Value::Object(Default::default()),
        other => other.clone(),
    };
    serde_json::from_value(parameters)
        .map_err(|e| EngineError::validation(format!("Invalid parameters for {verb}: {e}")))
}
