use std::sync::Arc;

use async_trait::async_trait;
use file_guard::FileGuard;
use serde::Deserialize;

use super::FileChange;
use crate::schema::{Property, Schema};
use crate::tool::{Tool, ToolError};

#[derive(Debug, Deserialize)]
pub struct EditArgs {
    pub file_path: String,
    pub old_string: String,
    pub new_string: String,
    #[serde(default)]
    pub replace_all: bool,
}

#[derive(Debug, Clone)]
pub struct EditTool {
    files: Arc<FileGuard>,
}

impl EditTool {
    pub fn new(files: Arc<FileGuard>) -> Self {
        Self { files }
    }
}

#[async_trait]
impl Tool for EditTool {
    type Args = EditArgs;
    type Output = FileChange;

    fn name(&self) -> &str {
        "Edit"
    }

    fn description(&self) -> &str {
        "Performs exact string replacements in files. The file must have been read with the Read tool first. \
         Preserve the exact indentation shown after the line number prefix."
    }

    fn schema(&self) -> Schema {
        Schema::object([
            Property::required("file_path", Schema::string().describe("The absolute path to the file to modify")),
            Property::required("old_string", Schema::string().describe("The text to replace")),
            Property::required(
                "new_string",
                Schema::string().describe("The text to replace it with (must be different from old_string)"),
            ),
            Property::optional(
                "replace_all",
                Schema::boolean().describe("Replace all occurrences of old_string (default false)"),
            ),
        ])
    }

    async fn execute(&self, args: EditArgs) -> Result<FileChange, ToolError> {
        if args.old_string == args.new_string {
            return Err(ToolError::failed("old_string and new_string must be different"));
        }
        let result = self
            .files
            .edit(&args.file_path, &args.old_string, &args.new_string, args.replace_all)
            .await?;
        Ok(result.into())
    }

    fn to_llm(&self, output: &FileChange) -> Result<String, ToolError> {
        Ok(format!(
            "The file {} has been edited. Here's the result:\n{}",
            output.file_path,
            output.snippet()
        ))
    }

    fn title(&self, args: &EditArgs) -> String {
        format!("Edit {}", args.file_path)
    }
}
