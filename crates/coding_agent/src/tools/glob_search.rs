use std::path::{Path, PathBuf};
use std::time::SystemTime;

use async_trait::async_trait;
use serde::Deserialize;

use crate::schema::{Property, Schema};
use crate::tool::{Tool, ToolError};

#[derive(Debug, Deserialize)]
pub struct GlobArgs {
    pub pattern: String,
    #[serde(default)]
    pub path: Option<String>,
}

#[derive(Debug, Clone)]
pub struct GlobTool {
    cwd: PathBuf,
}

impl GlobTool {
    pub fn new(cwd: impl Into<PathBuf>) -> Self {
        Self { cwd: cwd.into() }
    }
}

#[async_trait]
impl Tool for GlobTool {
    type Args = GlobArgs;
    type Output = Vec<String>;

    fn name(&self) -> &str {
        "glob"
    }

    fn description(&self) -> &str {
        "Fast file pattern matching. Supports patterns like \"**/*.rs\" or \"src/**/*.ts\" and \
         returns matching paths sorted by modification time, newest first."
    }

    fn schema(&self) -> Schema {
        Schema::object([
            Property::required("pattern", Schema::string().describe("The glob pattern to match files against")),
            Property::optional(
                "path",
                Schema::string().describe("The directory to search in. Omit to use the working directory."),
            ),
        ])
    }

    fn read_only(&self) -> bool {
        true
    }

    async fn execute(&self, args: GlobArgs) -> Result<Vec<String>, ToolError> {
        let base = match args.path.as_deref().filter(|path| !path.trim().is_empty()) {
            Some(path) => self.cwd.join(path),
            None => self.cwd.clone(),
        };
        tokio::task::spawn_blocking(move || search(&base, &args.pattern))
            .await
            .map_err(|error| ToolError::failed(format!("glob search aborted: {error}")))?
    }

    fn title(&self, args: &GlobArgs) -> String {
        format!("Search {}", args.pattern)
    }
}

fn search(base: &Path, pattern: &str) -> Result<Vec<String>, ToolError> {
    let full_pattern = if Path::new(pattern).is_absolute() {
        pattern.to_owned()
    } else {
        let escaped_base = ::glob::Pattern::escape(&base.to_string_lossy());
        format!("{}/{}", escaped_base.trim_end_matches('/'), pattern)
    };
    let entries = ::glob::glob(&full_pattern)
        .map_err(|error| ToolError::InvalidArguments(format!("invalid glob pattern: {error}")))?;

    let mut matches: Vec<(String, SystemTime)> = entries
        .filter_map(Result::ok)
        .map(|path| {
            let modified = path
                .metadata()
                .and_then(|metadata| metadata.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            let display = path
                .strip_prefix(base)
                .map_or_else(|_| path.display().to_string(), |relative| relative.display().to_string());
            (display, modified)
        })
        .collect();
    matches.sort_by(|left, right| right.1.cmp(&left.1).then_with(|| left.0.cmp(&right.0)));
    Ok(matches.into_iter().map(|(path, _)| path).collect())
}
