use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use agent_session::ToolDefinition;
use async_trait::async_trait;
use file_guard::FileGuardError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::schema::{Schema, SchemaError};

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error(transparent)]
    File(#[from] FileGuardError),
    #[error("{0}")]
    Failed(String),
}

impl ToolError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

impl From<serde_json::Error> for ToolError {
    fn from(error: serde_json::Error) -> Self {
        Self::Failed(format!("failed to render tool result: {error}"))
    }
}

/// A named capability the model can invoke.
///
/// Arguments arrive as JSON, are checked against [`Tool::schema`], then
/// deserialized into `Args`. [`Tool::to_llm`] renders the output for the model
/// and defaults to its JSON form; returning an error from it marks the call as
/// failed.
#[async_trait]
pub trait Tool: Send + Sync + 'static {
    type Args: DeserializeOwned + Send;
    type Output: Serialize + Send;

    fn name(&self) -> &str;

    fn description(&self) -> &str;

    fn schema(&self) -> Schema;

    /// Informs the permission prompt; read-only tools still pass the gate
    /// unless the approval policy says otherwise.
    fn read_only(&self) -> bool {
        false
    }

    async fn execute(&self, args: Self::Args) -> Result<Self::Output, ToolError>;

    fn to_llm(&self, output: &Self::Output) -> Result<String, ToolError> {
        Ok(serde_json::to_string(output)?)
    }

    /// Short label for permission prompts.
    fn title(&self, _args: &Self::Args) -> String {
        self.name().to_owned()
    }
}

/// Object-safe view of a [`Tool`], working on raw JSON arguments.
#[async_trait]
pub trait DynTool: Send + Sync {
    fn name(&self) -> &str;

    fn read_only(&self) -> bool;

    fn definition(&self) -> ToolDefinition;

    fn validate(&self, arguments: &Value) -> Result<(), ToolError>;

    fn title(&self, arguments: &Value) -> String;

    async fn call(&self, arguments: Value) -> Result<String, ToolError>;
}

#[async_trait]
impl<T: Tool> DynTool for T {
    fn name(&self) -> &str {
        Tool::name(self)
    }

    fn read_only(&self) -> bool {
        Tool::read_only(self)
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: Tool::name(self).to_owned(),
            description: self.description().to_owned(),
            parameters: self.schema().to_json_schema(),
        }
    }

    fn validate(&self, arguments: &Value) -> Result<(), ToolError> {
        self.schema().validate(arguments)?;
        Ok(())
    }

    fn title(&self, arguments: &Value) -> String {
        match parse_args::<T::Args>(arguments.clone()) {
            Ok(args) => Tool::title(self, &args),
            Err(_) => Tool::name(self).to_owned(),
        }
    }

    async fn call(&self, arguments: Value) -> Result<String, ToolError> {
        let args = parse_args::<T::Args>(arguments)?;
        let output = self.execute(args).await?;
        self.to_llm(&output)
    }
}

fn parse_args<A: DeserializeOwned>(arguments: Value) -> Result<A, ToolError> {
    // Optional fields may arrive as explicit nulls.
    let arguments = match arguments {
        Value::Object(fields) => Value::Object(
            fields
                .into_iter()
                .filter(|(_, value)| !value.is_null())
                .collect(),
        ),
        other => other,
    };
    serde_json::from_value(arguments).map_err(|error| ToolError::InvalidArguments(error.to_string()))
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("tool `{0}` is already registered")]
    Duplicate(String),
}

/// Name-keyed set of tools, immutable once the engine starts.
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn DynTool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<T: Tool>(&mut self, tool: T) -> Result<(), RegistryError> {
        self.register_dyn(Arc::new(tool))
    }

    pub fn register_dyn(&mut self, tool: Arc<dyn DynTool>) -> Result<(), RegistryError> {
        let name = tool.name().to_owned();
        if self.tools.contains_key(&name) {
            return Err(RegistryError::Duplicate(name));
        }
        self.tools.insert(name, tool);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn DynTool>> {
        self.tools.get(name).cloned()
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(String::as_str).collect()
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.values().map(|tool| tool.definition()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;
    use serde_json::json;

    use super::*;
    use crate::schema::Property;

    struct Echo;

    #[derive(Deserialize)]
    struct EchoArgs {
        text: String,
        #[serde(default)]
        repeat: Option<usize>,
    }

    #[async_trait]
    impl Tool for Echo {
        type Args = EchoArgs;
        type Output = Vec<String>;

        fn name(&self) -> &str {
            "echo"
        }

        fn description(&self) -> &str {
            "Echoes text"
        }

        fn schema(&self) -> Schema {
            Schema::object([
                Property::required("text", Schema::string()),
                Property::optional("repeat", Schema::integer_at_least(1)),
            ])
        }

        async fn execute(&self, args: EchoArgs) -> Result<Vec<String>, ToolError> {
            Ok(vec![args.text; args.repeat.unwrap_or(1)])
        }
    }

    #[tokio::test]
    async fn default_rendering_is_json_and_nulls_are_optional() {
        let tool: Arc<dyn DynTool> = Arc::new(Echo);
        let out = tool
            .call(json!({"text": "hi", "repeat": 2}))
            .await
            .expect("echo");
        assert_eq!(out, r#"["hi","hi"]"#);

        let out = tool.call(json!({"text": "x", "repeat": null})).await.expect("echo");
        assert_eq!(out, r#"["x"]"#);

        let error = tool.call(json!({"repeat": 1})).await.expect_err("missing text");
        assert!(matches!(error, ToolError::InvalidArguments(_)));
    }

    #[test]
    fn registry_rejects_duplicates_and_lists_definitions() {
        let mut registry = ToolRegistry::new();
        registry.register(Echo).expect("first registration");
        assert_eq!(
            registry.register(Echo),
            Err(RegistryError::Duplicate("echo".to_owned()))
        );

        let definitions = registry.definitions();
        assert_eq!(definitions.len(), 1);
        assert_eq!(definitions[0].parameters["required"], json!(["text"]));
        assert!(registry.get("echo").is_some());
        assert!(registry.get("missing").is_none());
    }
}
