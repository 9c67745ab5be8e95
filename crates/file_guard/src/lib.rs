//! File mutation safety layer.
//!
//! Every read, write, and edit performed on behalf of the model goes through
//! [`FileGuard`]. The guard remembers the last content and modification time it
//! observed for each absolute path and refuses to overwrite a file that was not
//! read first, or that changed on disk since it was read. Writes keep the
//! original encoding and line-ending style and report a structured patch.

mod error;
mod format;
mod guard;
mod patch;
pub mod text;

pub use error::FileGuardError;
pub use format::{format_with_line_numbers, TRUNCATION_MARKER};
pub use guard::{FileGuard, LineRange, ReadResult, WriteKind, WriteResult};
pub use patch::{structured_patch, PatchHunk};
pub use text::{LineEnding, TextEncoding};
