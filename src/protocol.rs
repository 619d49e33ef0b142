//! JSON-RPC message types and payload builders for the client handshake.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
#[error("cannot express path as a file URI: {}", path.display())]
pub(crate) struct PathToUriError {
    path: PathBuf,
}

#[derive(Debug, Serialize)]
pub(crate) struct Request {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl Request {
    pub fn new(id: u64, method: &'static str, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            method,
            params,
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct Notification {
    pub jsonrpc: &'static str,
    pub method: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl Notification {
    pub fn new(method: &'static str, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            method,
            params,
        }
    }
}

/// `initialize` request parameters for one workspace root.
///
/// Capabilities are the minimum the server needs from us: document sync
/// notifications and plain published diagnostics.
pub(crate) fn initialize_params(root_uri: &str, root_name: &str) -> serde_json::Value {
    serde_json::json!({
        "processId": std::process::id(),
        "clientInfo": {
            "name": "oraide",
            "version": env!("CARGO_PKG_VERSION"),
        },
        "rootUri": root_uri,
        "capabilities": {
            "textDocument": {
                "synchronization": {
                    "dynamicRegistration": false,
                    "willSave": false,
                    "willSaveWaitUntil": false,
                    "didSave": false
                },
                "publishDiagnostics": {
                    "relatedInformation": false
                }
            },
            "workspace": {
                "configuration": true
            }
        },
        "workspaceFolders": [{
            "uri": root_uri,
            "name": root_name
        }]
    })
}

/// `window/logMessage` parameters. `type` follows the LSP `MessageType`
/// numbering: 1=Error, 2=Warning, 3=Info, 4=Log.
#[derive(Debug, Deserialize)]
pub(crate) struct LogMessageParams {
    #[serde(rename = "type")]
    pub kind: u64,
    pub message: String,
}

impl LogMessageParams {
    pub fn label(&self) -> &'static str {
        match self.kind {
            1 => "Error",
            2 => "Warning",
            3 => "Info",
            _ => "Log",
        }
    }
}

/// One entry of a `workspace/configuration` request.
#[derive(Debug, Deserialize)]
pub(crate) struct ConfigurationItem {
    pub section: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ConfigurationParams {
    pub items: Vec<ConfigurationItem>,
}

pub(crate) fn path_to_file_uri(path: &Path) -> Result<url::Url, PathToUriError> {
    url::Url::from_file_path(path).map_err(|()| PathToUriError {
        path: path.to_path_buf(),
    })
}
