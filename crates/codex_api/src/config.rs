use std::collections::BTreeMap;
use std::time::Duration;

pub const DEFAULT_CODEX_BASE_URL: &str = "https://chatgpt.com/backend-api";
pub const DEFAULT_ORIGINATOR: &str = "codex_cli_rs";

/// Transport configuration for Codex API requests.
#[derive(Debug, Clone)]
pub struct CodexApiConfig {
    /// Bearer token; also the source of the account id when none is set.
    pub access_token: String,
    /// Explicit `chatgpt-account-id`; empty means "read it from the token".
    pub account_id: String,
    pub base_url: String,
    pub originator: String,
    /// Sent as `session_id`/`conversation_id` and used as the prompt cache key.
    pub session_id: Option<String>,
    pub user_agent: Option<String>,
    pub extra_headers: BTreeMap<String, String>,
    pub timeout: Option<Duration>,
}

impl Default for CodexApiConfig {
    fn default() -> Self {
        Self {
            access_token: String::new(),
            account_id: String::new(),
            base_url: DEFAULT_CODEX_BASE_URL.to_owned(),
            originator: DEFAULT_ORIGINATOR.to_owned(),
            session_id: None,
            user_agent: None,
            extra_headers: BTreeMap::new(),
            timeout: None,
        }
    }
}

impl CodexApiConfig {
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            ..Self::default()
        }
    }

    pub fn with_account_id(mut self, account_id: impl Into<String>) -> Self {
        self.account_id = account_id.into();
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_originator(mut self, originator: impl Into<String>) -> Self {
        self.originator = originator.into();
        self
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn insert_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_headers.insert(key.into(), value.into());
        self
    }
}

/// Resolves a configured base URL to the responses endpoint.
///
/// A URL already ending in `/codex/responses` is kept, one ending in `/codex`
/// gains `/responses`, and anything else gains `/codex/responses`. Blank input
/// falls back to [`DEFAULT_CODEX_BASE_URL`].
pub fn normalize_codex_url(input: &str) -> String {
    let trimmed = input.trim();
    let base = if trimmed.is_empty() {
        DEFAULT_CODEX_BASE_URL
    } else {
        trimmed
    };
    let base = base.trim_end_matches('/');

    if base.ends_with("/codex/responses") {
        base.to_owned()
    } else if base.ends_with("/codex") {
        format!("{base}/responses")
    } else {
        format!("{base}/codex/responses")
    }
}
