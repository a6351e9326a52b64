//! JSON-RPC message shapes and the protocol payloads this client speaks.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

pub const JSONRPC_VERSION: &str = "2.0";

/// JSON-RPC "method not found" error code.
pub const METHOD_NOT_FOUND: i64 = -32601;

pub mod method {
    pub const INITIALIZE: &str = "initialize";
    pub const INITIALIZED: &str = "initialized";
    pub const SHUTDOWN: &str = "shutdown";
    pub const EXIT: &str = "exit";
    pub const DID_OPEN: &str = "textDocument/didOpen";
    pub const DID_CHANGE: &str = "textDocument/didChange";
    pub const COMPLETION: &str = "textDocument/completion";
    pub const PUBLISH_DIAGNOSTICS: &str = "textDocument/publishDiagnostics";
    pub const LOG_MESSAGE: &str = "window/logMessage";
    pub const SHOW_MESSAGE: &str = "window/showMessage";
}

#[derive(Debug, thiserror::Error)]
#[error("cannot convert path to file URI: {}", path.display())]
pub struct PathToUriError {
    path: PathBuf,
}

#[derive(Debug, Serialize)]
pub(crate) struct Request<'a> {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl<'a> Request<'a> {
    pub fn new(id: u64, method: &'a str, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            method,
            params,
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct Notification<'a> {
    pub jsonrpc: &'static str,
    pub method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl<'a> Notification<'a> {
    pub fn new(method: &'a str, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            method,
            params,
        }
    }
}

/// The `error` member of a failed response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

/// A decoded frame, classified by which members it carries.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Incoming {
    /// Reply to one of our requests.
    Response { id: u64, body: serde_json::Value },
    /// The server asking us for something.
    ServerRequest {
        id: serde_json::Value,
        method: String,
    },
    /// Server push with no reply expected.
    Notification {
        method: String,
        params: Option<serde_json::Value>,
    },
}

/// Classify a frame; `None` for shapes that are none of the three.
pub(crate) fn classify(frame: &serde_json::Value) -> Option<Incoming> {
    let id = frame.get("id").filter(|id| !id.is_null());
    let method = frame
        .get("method")
        .and_then(serde_json::Value::as_str)
        .map(String::from);

    match (id, method) {
        (Some(id_val), None) => Some(Incoming::Response {
            id: id_val.as_u64()?,
            body: frame.clone(),
        }),
        (Some(id_val), Some(method)) => Some(Incoming::ServerRequest {
            id: id_val.clone(),
            method,
        }),
        (None, Some(method)) => Some(Incoming::Notification {
            method,
            params: frame.get("params").cloned(),
        }),
        (None, None) => None,
    }
}

/// Split a response body into its `result` or its `error`.
///
/// A response with neither member resolves to JSON `null`.
pub(crate) fn into_result(
    mut body: serde_json::Value,
) -> Result<serde_json::Value, ResponseError> {
    if let Some(error) = body.get_mut("error").map(serde_json::Value::take)
        && !error.is_null()
    {
        return Err(serde_json::from_value(error.clone()).unwrap_or_else(|_| ResponseError {
            code: 0,
            message: error.to_string(),
            data: None,
        }));
    }
    Ok(body
        .get_mut("result")
        .map(serde_json::Value::take)
        .unwrap_or(serde_json::Value::Null))
}

pub(crate) fn method_not_found(id: serde_json::Value, method: &str) -> serde_json::Value {
    serde_json::json!({
        "jsonrpc": JSONRPC_VERSION,
        "id": id,
        "error": {
            "code": METHOD_NOT_FOUND,
            "message": format!("Method not found: {method}")
        }
    })
}

/// Server notifications this client knows how to route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    PublishDiagnostics,
    LogMessage,
    ShowMessage,
    Unhandled,
}

impl NotificationKind {
    #[must_use]
    pub fn from_method(method: &str) -> Self {
        match method {
            method::PUBLISH_DIAGNOSTICS => Self::PublishDiagnostics,
            method::LOG_MESSAGE => Self::LogMessage,
            method::SHOW_MESSAGE => Self::ShowMessage,
            _ => Self::Unhandled,
        }
    }
}

pub fn initialize_params(
    capabilities: serde_json::Value,
    root_uri: Option<&str>,
) -> serde_json::Value {
    serde_json::json!({
        "processId": std::process::id(),
        "rootUri": root_uri,
        "capabilities": capabilities,
    })
}

pub fn did_open_params(uri: &str, language_id: &str, version: i32, text: &str) -> serde_json::Value {
    serde_json::json!({
        "textDocument": {
            "uri": uri,
            "languageId": language_id,
            "version": version,
            "text": text
        }
    })
}

pub fn did_change_params(uri: &str, version: i32, text: &str) -> serde_json::Value {
    serde_json::json!({
        "textDocument": {
            "uri": uri,
            "version": version
        },
        "contentChanges": [{
            "text": text
        }]
    })
}

/// Params for `textDocument/completion`. `line` and `character` are 0-based.
pub fn completion_params(uri: &str, line: u32, character: u32) -> serde_json::Value {
    serde_json::json!({
        "textDocument": { "uri": uri },
        "position": { "line": line, "character": character }
    })
}

/// Result of the `initialize` handshake.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct InitializeResult {
    #[serde(default)]
    pub capabilities: serde_json::Value,
    #[serde(default, rename = "serverInfo")]
    pub server_info: Option<ServerInfo>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ServerInfo {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionItem {
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(
        default,
        rename = "insertText",
        skip_serializing_if = "Option::is_none"
    )]
    pub insert_text: Option<String>,
}

/// `textDocument/completion` may answer with a bare array or a list object.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum CompletionResponse {
    Items(Vec<CompletionItem>),
    List {
        #[serde(default, rename = "isIncomplete")]
        is_incomplete: bool,
        items: Vec<CompletionItem>,
    },
}

impl CompletionResponse {
    #[must_use]
    pub fn into_items(self) -> Vec<CompletionItem> {
        match self {
            Self::Items(items) | Self::List { items, .. } => items,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishDiagnosticsParams {
    pub uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<i32>,
    pub diagnostics: Vec<LspDiagnostic>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LspDiagnostic {
    pub range: LspRange,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LspRange {
    pub start: LspPosition,
    pub end: LspPosition,
}

/// A 0-based line and UTF-16-or-codepoint character offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LspPosition {
    pub line: u32,
    pub character: u32,
}

/// `window/logMessage` and `window/showMessage` params.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct LogMessageParams {
    #[serde(rename = "type")]
    pub kind: u8,
    pub message: String,
}

pub fn path_to_file_uri(path: &Path) -> Result<url::Url, PathToUriError> {
    url::Url::from_file_path(path).map_err(|()| PathToUriError {
        path: path.to_path_buf(),
    })
}

pub fn file_uri_to_path(uri: &str) -> Option<PathBuf> {
    url::Url::parse(uri)
        .ok()
        .and_then(|u| u.to_file_path().ok())
}
