//! Editor-facing domain types for relay: completion candidates, diagnostics
//! and the position helpers shared by every completer. No IO, no async.

mod completion;
mod diagnostic;
pub mod text;

pub use completion::{Candidate, CompletionKind};
pub use diagnostic::{Diagnostic, DiagnosticKind, Location, Range};
pub use text::{codepoint_to_byte_offset, line_at};
