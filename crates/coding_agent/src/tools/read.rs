use std::sync::Arc;

use async_trait::async_trait;
use file_guard::{format_with_line_numbers, FileGuard, LineRange};
use serde::{Deserialize, Serialize};

use crate::schema::{Property, Schema};
use crate::tool::{Tool, ToolError};

#[derive(Debug, Deserialize)]
pub struct ReadArgs {
    pub file_path: String,
    #[serde(default)]
    pub offset: Option<usize>,
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReadOutput {
    pub file_path: String,
    pub content: String,
    pub start_line: usize,
    pub total_lines: usize,
    pub encoding: &'static str,
}

#[derive(Debug, Clone)]
pub struct ReadTool {
    files: Arc<FileGuard>,
}

impl ReadTool {
    pub fn new(files: Arc<FileGuard>) -> Self {
        Self { files }
    }
}

#[async_trait]
impl Tool for ReadTool {
    type Args = ReadArgs;
    type Output = ReadOutput;

    fn name(&self) -> &str {
        "Read"
    }

    fn description(&self) -> &str {
        "Reads a file from the local filesystem. Output is numbered like `cat -n`. \
         Use offset and limit only for files too large to read at once."
    }

    fn schema(&self) -> Schema {
        Schema::object([
            Property::required("file_path", Schema::string().describe("The absolute path to the file to read")),
            Property::optional(
                "offset",
                Schema::integer_at_least(0).describe("The line number to start reading from"),
            ),
            Property::optional(
                "limit",
                Schema::integer_at_least(0).describe("The number of lines to read"),
            ),
        ])
    }

    fn read_only(&self) -> bool {
        true
    }

    async fn execute(&self, args: ReadArgs) -> Result<ReadOutput, ToolError> {
        let range = LineRange {
            offset: args.offset.unwrap_or(0),
            limit: args.limit,
        };
        let result = self.files.read(&args.file_path, range).await?;
        Ok(ReadOutput {
            file_path: result.path.display().to_string(),
            content: result.content,
            start_line: result.start_line,
            total_lines: result.total_lines,
            encoding: result.encoding.as_str(),
        })
    }

    fn to_llm(&self, output: &ReadOutput) -> Result<String, ToolError> {
        Ok(format_with_line_numbers(&output.content, output.start_line, None))
    }

    fn title(&self, args: &ReadArgs) -> String {
        format!("Read {}", args.file_path)
    }
}
