//! Completer contract and the server-backed implementation.
//!
//! Editor requests use 1-based lines; the wire uses 0-based lines. Diagnostic
//! columns come back as character offsets and are turned into byte columns
//! against the buffer the editor sent.

use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};

use relay_types::{
    Candidate, CompletionKind, Diagnostic, DiagnosticKind, Location, Range,
    codepoint_to_byte_offset, line_at,
};

use crate::error::{RpcError, RpcResult};
use crate::launcher::CommandLauncher;
use crate::protocol::{self, CompletionItem, LspDiagnostic, LspPosition, PublishDiagnosticsParams};
use crate::session::Session;
use crate::types::ServerConfig;

/// Completer future type alias.
pub type CompleterFut<'a, T> = Pin<Box<dyn Future<Output = RpcResult<T>> + Send + 'a>>;

/// A buffer as the editor reports it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferRequest {
    pub filepath: PathBuf,
    pub filetype: String,
    pub contents: String,
    /// 1-based.
    pub line_num: u32,
    /// Forwarded to the server unchanged as the position's `character`.
    pub start_codepoint: u32,
}

impl BufferRequest {
    #[must_use]
    pub fn new(filepath: impl Into<PathBuf>, filetype: impl Into<String>, contents: impl Into<String>) -> Self {
        Self {
            filepath: filepath.into(),
            filetype: filetype.into(),
            contents: contents.into(),
            line_num: 1,
            start_codepoint: 0,
        }
    }

    #[must_use]
    pub fn at(mut self, line_num: u32, start_codepoint: u32) -> Self {
        self.line_num = line_num;
        self.start_codepoint = start_codepoint;
        self
    }
}

/// A source of completions and diagnostics for some set of filetypes.
pub trait Completer: Send + Sync {
    fn supported_filetypes(&self) -> &[String];

    fn supports(&self, filetype: &str) -> bool {
        self.supported_filetypes().iter().any(|f| f == filetype)
    }

    /// The editor entered a buffer.
    fn on_buffer_visit<'a>(&'a self, request: &'a BufferRequest) -> CompleterFut<'a, ()>;

    /// The buffer changed enough to be worth re-checking.
    fn on_file_ready_to_parse<'a>(
        &'a self,
        request: &'a BufferRequest,
    ) -> CompleterFut<'a, Vec<Diagnostic>>;

    fn compute_candidates<'a>(&'a self, request: &'a BufferRequest)
    -> CompleterFut<'a, Vec<Candidate>>;

    /// The next batch of diagnostics the server pushes.
    fn diagnostics_for_file<'a>(
        &'a self,
        request: &'a BufferRequest,
    ) -> CompleterFut<'a, Vec<Diagnostic>>;
}

/// Whether a server-backed completer can run with `config`.
#[must_use]
pub fn should_enable(config: &ServerConfig) -> bool {
    let launcher = CommandLauncher::new(config.clone());
    if launcher.is_available() {
        tracing::info!(command = %config.command, "Using completion server");
        true
    } else {
        tracing::warn!(command = %config.command, "Not using completion server: executable not found");
        false
    }
}

/// Completer that forwards to a running [`Session`].
pub struct LspCompleter {
    session: Arc<Session>,
    language_id: String,
    filetypes: Vec<String>,
    /// Last version sent per document URI.
    versions: Mutex<HashMap<String, i32>>,
}

impl LspCompleter {
    #[must_use]
    pub fn new(session: Arc<Session>, config: &ServerConfig) -> Self {
        Self {
            session,
            language_id: config.language_id.clone(),
            filetypes: config.filetypes.clone(),
            versions: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// `didOpen` the first time a document is seen, `didChange` after that.
    async fn sync_document(&self, request: &BufferRequest) -> RpcResult<()> {
        let uri = document_uri(&request.filepath)?;
        let version = {
            let mut versions = self.versions.lock().unwrap_or_else(PoisonError::into_inner);
            let version = versions.entry(uri.clone()).and_modify(|v| *v += 1).or_insert(1);
            *version
        };

        let rpc = self.session.rpc();
        let result = if version == 1 {
            rpc.did_open(&uri, &self.language_id, version, &request.contents)
                .await
        } else {
            rpc.did_change(&uri, version, &request.contents).await
        };
        if result.is_err() {
            // The server never saw this version; reopen next time.
            self.versions
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&uri);
        }
        result
    }

    async fn candidates(&self, request: &BufferRequest) -> RpcResult<Vec<Candidate>> {
        let uri = document_uri(&request.filepath)?;
        let line = request.line_num.saturating_sub(1);
        let items = self
            .session
            .rpc()
            .completion(&uri, line, request.start_codepoint)
            .await?;
        tracing::debug!(uri, line, count = items.len(), "Completion results");
        Ok(items.into_iter().map(to_candidate).collect())
    }

    async fn diagnostics(&self, request: &BufferRequest) -> RpcResult<Vec<Diagnostic>> {
        let doc = self.session.take_diagnostics().await?;
        Ok(convert_diagnostics(&doc, request))
    }
}

impl Completer for LspCompleter {
    fn supported_filetypes(&self) -> &[String] {
        &self.filetypes
    }

    fn on_buffer_visit<'a>(&'a self, request: &'a BufferRequest) -> CompleterFut<'a, ()> {
        Box::pin(self.sync_document(request))
    }

    fn on_file_ready_to_parse<'a>(
        &'a self,
        request: &'a BufferRequest,
    ) -> CompleterFut<'a, Vec<Diagnostic>> {
        Box::pin(async move {
            self.sync_document(request).await?;
            self.diagnostics(request).await
        })
    }

    fn compute_candidates<'a>(
        &'a self,
        request: &'a BufferRequest,
    ) -> CompleterFut<'a, Vec<Candidate>> {
        Box::pin(self.candidates(request))
    }

    fn diagnostics_for_file<'a>(
        &'a self,
        request: &'a BufferRequest,
    ) -> CompleterFut<'a, Vec<Diagnostic>> {
        Box::pin(self.diagnostics(request))
    }
}

fn document_uri(path: &Path) -> RpcResult<String> {
    protocol::path_to_file_uri(path)
        .map(String::from)
        .map_err(|e| RpcError::protocol(e.to_string()))
}

fn to_candidate(item: CompletionItem) -> Candidate {
    let kind = item.kind.and_then(CompletionKind::from_lsp);
    let candidate = Candidate::new(item.label, kind);
    match item.detail {
        Some(detail) => candidate.with_detail(detail),
        None => candidate,
    }
}

/// Convert one diagnostics push into editor coordinates.
///
/// Character offsets are resolved against `request.contents` when the push
/// is for the requested file; otherwise they are taken as byte offsets.
pub(crate) fn convert_diagnostics(
    doc: &PublishDiagnosticsParams,
    request: &BufferRequest,
) -> Vec<Diagnostic> {
    let pushed_path = protocol::file_uri_to_path(&doc.uri);
    let same_file = pushed_path
        .as_deref()
        .is_none_or(|path| path == request.filepath);
    let path = pushed_path.unwrap_or_else(|| request.filepath.clone());
    let contents = same_file.then_some(request.contents.as_str());

    doc.diagnostics
        .iter()
        .map(|diag| convert_diagnostic(diag, &path, contents))
        .collect()
}

fn convert_diagnostic(diag: &LspDiagnostic, path: &Path, contents: Option<&str>) -> Diagnostic {
    let extent = Range::new(
        to_location(&diag.range.start, path, contents),
        to_location(&diag.range.end, path, contents),
    );
    Diagnostic::new(
        extent,
        diag.message.clone(),
        DiagnosticKind::from_lsp_severity(diag.severity),
    )
}

fn to_location(position: &LspPosition, path: &Path, contents: Option<&str>) -> Location {
    let character = position.character as usize;
    let byte = contents
        .and_then(|text| line_at(text, position.line as usize))
        .map_or(character, |line| codepoint_to_byte_offset(line, character));
    let column = u32::try_from(byte).unwrap_or(u32::MAX).saturating_add(1);
    Location::new(position.line.saturating_add(1), column, path)
}
