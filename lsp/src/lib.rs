//! Async JSON-RPC client for one language server spoken to over stdio.
//!
//! A [`Session`] launches the server through a [`Launcher`], performs the
//! `initialize` handshake and runs a single reader task that routes replies
//! to their callers and diagnostics pushes to a depth-one sink. Requests go
//! through [`RpcClient`]; editor-level operations through [`Completer`].

pub mod codec;
pub mod protocol;
pub mod types;

mod completer;
mod diagnostics;
mod error;
mod launcher;
mod pending;
mod reader;
mod rpc;
mod sequence;
mod session;

pub use codec::{FrameReader, FrameWriter, MAX_FRAME_BYTES, encode};
pub use completer::{BufferRequest, Completer, CompleterFut, LspCompleter, should_enable};
pub use diagnostics::DiagnosticsSink;
pub use error::{RpcError, RpcResult};
pub use launcher::{BoxedReader, BoxedWriter, CommandLauncher, Launcher, ServerIo};
pub use pending::{PendingTable, WaitError, Waiter};
pub use protocol::{
    CompletionItem, InitializeResult, LspDiagnostic, LspPosition, LspRange,
    PublishDiagnosticsParams, ServerInfo,
};
pub use rpc::RpcClient;
pub use sequence::Sequence;
pub use session::Session;
pub use types::{
    DEFAULT_DIAGNOSTICS_TIMEOUT, DEFAULT_REQUEST_TIMEOUT, DEFAULT_SHUTDOWN_TIMEOUT, ServerConfig,
    SessionOptions,
};
