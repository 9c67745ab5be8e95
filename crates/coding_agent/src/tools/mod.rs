//! Built-in tools: shell execution, guarded file access, and glob search.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use file_guard::FileGuard;

use crate::tool::{RegistryError, ToolRegistry};

mod bash;
mod edit;
mod glob_search;
mod read;
mod write;

pub use bash::{BashArgs, BashOutput, BashTool, DEFAULT_BASH_TIMEOUT, MAX_BASH_TIMEOUT};
pub use edit::{EditArgs, EditTool};
pub use glob_search::{GlobArgs, GlobTool};
pub use read::{ReadArgs, ReadOutput, ReadTool};
pub use write::{FileChange, WriteArgs, WriteTool};

/// Lines shown when echoing an updated file back to the model.
pub(crate) const SNIPPET_MAX_LINES: usize = 50;

/// Registers `bash`, `Read`, `Write`, `Edit`, and `glob` rooted at `cwd`.
pub fn builtin_registry(
    cwd: impl Into<PathBuf>,
    files: Arc<FileGuard>,
    bash_timeout: Duration,
) -> Result<ToolRegistry, RegistryError> {
    let cwd = cwd.into();
    let mut registry = ToolRegistry::new();
    registry.register(BashTool::new(cwd.clone()).with_default_timeout(bash_timeout))?;
    registry.register(ReadTool::new(Arc::clone(&files)))?;
    registry.register(WriteTool::new(Arc::clone(&files)))?;
    registry.register(EditTool::new(files))?;
    registry.register(GlobTool::new(cwd))?;
    Ok(registry)
}
