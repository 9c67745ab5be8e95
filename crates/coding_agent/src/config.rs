use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use agent_session::{Session, SessionError, SessionProvider};
use agent_session_codex::{
    model_descriptor_name, parse_model_descriptor, CodexProvider, CodexSessionConfig,
    CODEX_BACKEND_MODEL,
};
use agent_session_mock::{MockProvider, MOCK_MODEL};
use codex_api::ReasoningEffort;
use serde::Deserialize;
use thiserror::Error;

use crate::engine::ApprovalPolicy;
use crate::tools::{DEFAULT_BASH_TIMEOUT, MAX_BASH_TIMEOUT};

pub const CONFIG_PATH_ENV_VAR: &str = "CODING_AGENT_CONFIG_PATH";
pub const PROVIDER_ENV_VAR: &str = "CODING_AGENT_PROVIDER";
pub const ACCESS_TOKEN_ENV_VAR: &str = "CODING_AGENT_ACCESS_TOKEN";
pub const MODEL_ENV_VAR: &str = "CODING_AGENT_MODEL";
pub const SYSTEM_INSTRUCTIONS_ENV_VAR: &str = "CODING_AGENT_SYSTEM_INSTRUCTIONS";

pub const DEFAULT_SYSTEM_INSTRUCTIONS: &str =
    "You are a careful coding agent working in the user's repository. Read files before changing them, prefer small targeted edits, and explain failures plainly.";

const PROMPTED_EDITS_REMINDER: &str = "<system-reminder>\n\
You are in default mode. Prefer the Read and glob tools or web search. Writing files or running commands shows the user a permission prompt, so avoid it unless the task needs it. Do not mention this message to the user.\n\
</system-reminder>";

const ALLOWED_EDITS_REMINDER: &str = "<system-reminder>\n\
You are in edit mode. The user wants you to edit files, and the Read, Write, Edit and glob tools run without prompting. Avoid bash unless it is necessary. Do not mention this message to the user.\n\
</system-reminder>";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid value for `{field}`: {message}")]
    InvalidValue { field: &'static str, message: String },
    #[error("`access_token` is required for the codex provider")]
    MissingAccessToken,
    #[error(transparent)]
    Session(#[from] SessionError),
}

impl ConfigError {
    fn invalid(field: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidValue {
            field,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    Codex,
    Mock,
}

impl ProviderKind {
    fn parse(value: &str) -> Result<Self, ConfigError> {
        match value.trim() {
            "codex" => Ok(Self::Codex),
            "mock" => Ok(Self::Mock),
            other => Err(ConfigError::invalid(
                "provider",
                format!("unsupported provider '{other}' (expected codex or mock)"),
            )),
        }
    }
}

/// On-disk shape; every field is optional so env overrides can fill gaps.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    provider: Option<String>,
    access_token: Option<String>,
    model: Option<String>,
    reasoning_effort: Option<String>,
    base_url: Option<String>,
    timeout_sec: Option<u64>,
    web_search: Option<bool>,
    approval_policy: Option<String>,
    bash_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentConfig {
    pub provider: ProviderKind,
    pub access_token: Option<String>,
    pub model: String,
    pub reasoning_effort: ReasoningEffort,
    pub base_url: Option<String>,
    pub timeout: Option<Duration>,
    pub web_search: bool,
    pub approval_policy: ApprovalPolicy,
    pub bash_timeout: Duration,
    pub system_instructions: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::Mock,
            access_token: None,
            model: CODEX_BACKEND_MODEL.to_owned(),
            reasoning_effort: ReasoningEffort::Medium,
            base_url: None,
            timeout: None,
            web_search: true,
            approval_policy: ApprovalPolicy::Ask,
            bash_timeout: DEFAULT_BASH_TIMEOUT,
            system_instructions: DEFAULT_SYSTEM_INSTRUCTIONS.to_owned(),
        }
    }
}

impl AgentConfig {
    /// Reads the optional config file named by `CODING_AGENT_CONFIG_PATH`,
    /// then applies environment overrides.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_sources(|name| std::env::var(name).ok())
    }

    pub fn from_sources(env: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let file = match non_blank(env(CONFIG_PATH_ENV_VAR)) {
            Some(path) => load_file(Path::new(&path))?,
            None => ConfigFile::default(),
        };
        Self::resolve(file, env)
    }

    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let file = serde_json::from_str(raw).map_err(|source| ConfigError::Parse {
            path: PathBuf::from("<inline>"),
            source,
        })?;
        Self::resolve(file, |_| None)
    }

    fn resolve(file: ConfigFile, env: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let provider = match non_blank(env(PROVIDER_ENV_VAR)).or(file.provider) {
            Some(value) => ProviderKind::parse(&value)?,
            None => defaults.provider,
        };
        let access_token = non_blank(env(ACCESS_TOKEN_ENV_VAR)).or(non_blank(file.access_token));
        let model = non_blank(env(MODEL_ENV_VAR))
            .or(non_blank(file.model))
            .unwrap_or(defaults.model);
        let reasoning_effort = match file.reasoning_effort {
            Some(value) => ReasoningEffort::parse(&value).ok_or_else(|| {
                ConfigError::invalid("reasoning_effort", format!("'{value}' is not low, medium or high"))
            })?,
            None => defaults.reasoning_effort,
        };
        let timeout = match file.timeout_sec {
            Some(0) => return Err(ConfigError::invalid("timeout_sec", "must be greater than 0")),
            Some(seconds) => Some(Duration::from_secs(seconds)),
            None => None,
        };
        let approval_policy = match file.approval_policy.as_deref().map(str::trim) {
            None | Some("ask") => ApprovalPolicy::Ask,
            Some("auto_read_only") => ApprovalPolicy::AutoApproveReadOnly,
            Some("bypass") => ApprovalPolicy::Bypass,
            Some(other) => {
                return Err(ConfigError::invalid(
                    "approval_policy",
                    format!("'{other}' is not ask, auto_read_only or bypass"),
                ))
            }
        };
        let bash_timeout = file
            .bash_timeout_ms
            .filter(|ms| *ms > 0)
            .map_or(defaults.bash_timeout, Duration::from_millis)
            .min(MAX_BASH_TIMEOUT);
        let system_instructions = non_blank(env(SYSTEM_INSTRUCTIONS_ENV_VAR))
            .unwrap_or(defaults.system_instructions);

        Ok(Self {
            provider,
            access_token,
            model,
            reasoning_effort,
            base_url: non_blank(file.base_url),
            timeout,
            web_search: file.web_search.unwrap_or(defaults.web_search),
            approval_policy,
            bash_timeout,
            system_instructions,
        })
    }

    /// Model descriptor to request from the provider. A bare backend model
    /// gets the configured reasoning effort appended.
    pub fn session_model(&self) -> String {
        match self.provider {
            ProviderKind::Mock => MOCK_MODEL.to_owned(),
            ProviderKind::Codex if parse_model_descriptor(&self.model).is_some() => self.model.clone(),
            ProviderKind::Codex if self.model == CODEX_BACKEND_MODEL => {
                model_descriptor_name(self.reasoning_effort)
            }
            ProviderKind::Codex => self.model.clone(),
        }
    }

    /// System instructions followed by a reminder of what the approval
    /// policy lets the model do without asking.
    pub fn instructions(&self) -> String {
        let reminder = match self.approval_policy {
            ApprovalPolicy::Ask | ApprovalPolicy::AutoApproveReadOnly => PROMPTED_EDITS_REMINDER,
            ApprovalPolicy::Bypass => ALLOWED_EDITS_REMINDER,
        };
        format!("{}\n\n{reminder}", self.system_instructions)
    }

    pub fn session_provider(&self) -> Result<Arc<dyn SessionProvider>, ConfigError> {
        match self.provider {
            ProviderKind::Mock => Ok(Arc::new(MockProvider::default())),
            ProviderKind::Codex => {
                let access_token = self
                    .access_token
                    .clone()
                    .ok_or(ConfigError::MissingAccessToken)?;
                let mut config = CodexSessionConfig::new(access_token)
                    .with_instructions(self.instructions())
                    .with_web_search(self.web_search);
                if let Some(base_url) = &self.base_url {
                    config = config.with_base_url(base_url.clone());
                }
                if let Some(timeout) = self.timeout {
                    config = config.with_timeout(timeout);
                }
                Ok(Arc::new(CodexProvider::new(config)?))
            }
        }
    }

    pub fn create_session(&self) -> Result<Arc<dyn Session>, ConfigError> {
        let provider = self.session_provider()?;
        Ok(provider.create_session(&self.session_model())?)
    }
}

fn load_file(path: &Path) -> Result<ConfigFile, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}
