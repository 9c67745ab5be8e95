use std::sync::Arc;

use async_trait::async_trait;
use file_guard::{format_with_line_numbers, FileGuard, WriteKind, WriteResult};
use serde::{Deserialize, Serialize};

use super::SNIPPET_MAX_LINES;
use crate::schema::{Property, Schema};
use crate::tool::{Tool, ToolError};

#[derive(Debug, Deserialize)]
pub struct WriteArgs {
    pub file_path: String,
    pub content: String,
}

/// Result of a guarded write or edit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileChange {
    pub kind: &'static str,
    pub file_path: String,
    pub content: String,
    pub hunks: usize,
}

impl From<WriteResult> for FileChange {
    fn from(result: WriteResult) -> Self {
        Self {
            kind: result.kind.as_str(),
            file_path: result.path.display().to_string(),
            content: result.content,
            hunks: result.structured_patch.len(),
        }
    }
}

impl FileChange {
    pub fn is_create(&self) -> bool {
        self.kind == WriteKind::Create.as_str()
    }

    pub(crate) fn snippet(&self) -> String {
        format_with_line_numbers(&self.content, 1, Some(SNIPPET_MAX_LINES))
    }
}

#[derive(Debug, Clone)]
pub struct WriteTool {
    files: Arc<FileGuard>,
}

impl WriteTool {
    pub fn new(files: Arc<FileGuard>) -> Self {
        Self { files }
    }
}

#[async_trait]
impl Tool for WriteTool {
    type Args = WriteArgs;
    type Output = FileChange;

    fn name(&self) -> &str {
        "Write"
    }

    fn description(&self) -> &str {
        "Writes a file to the local filesystem, overwriting any existing file at the path. \
         An existing file must be read with the Read tool first."
    }

    fn schema(&self) -> Schema {
        Schema::object([
            Property::required("file_path", Schema::string().describe("The absolute path to the file to write")),
            Property::required("content", Schema::string().describe("The content to write to the file")),
        ])
    }

    async fn execute(&self, args: WriteArgs) -> Result<FileChange, ToolError> {
        let result = self.files.write(&args.file_path, &args.content).await?;
        Ok(result.into())
    }

    fn to_llm(&self, output: &FileChange) -> Result<String, ToolError> {
        if output.is_create() {
            return Ok(format!("File created successfully at: {}", output.file_path));
        }
        Ok(format!(
            "The file {} has been updated. Here's the result of running `cat -n` on a snippet of the edited file:\n{}",
            output.file_path,
            output.snippet()
        ))
    }

    fn title(&self, args: &WriteArgs) -> String {
        format!("Write {}", args.file_path)
    }
}
