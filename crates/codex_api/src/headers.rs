use std::collections::BTreeMap;

use base64::{engine::general_purpose, Engine as _};
use serde::Deserialize;

use crate::config::CodexApiConfig;
use crate::error::CodexApiError;

pub const HEADER_AUTHORIZATION: &str = "authorization";
pub const HEADER_ACCOUNT_ID: &str = "chatgpt-account-id";
pub const HEADER_OPENAI_BETA: &str = "openai-beta";
pub const HEADER_ORIGINATOR: &str = "originator";
pub const HEADER_SESSION_ID: &str = "session_id";
pub const HEADER_CONVERSATION_ID: &str = "conversation_id";
pub const HEADER_VERSION: &str = "version";
pub const HEADER_ACCEPT: &str = "accept";
pub const HEADER_CONTENT_TYPE: &str = "content-type";
pub const HEADER_USER_AGENT: &str = "user-agent";

pub const CLIENT_VERSION: &str = "0.41.0";

/// Build the header set for a Codex request, keyed by lowercase name.
pub fn build_headers(config: &CodexApiConfig) -> Result<BTreeMap<String, String>, CodexApiError> {
    let token = config.access_token.trim();
    if token.is_empty() {
        return Err(CodexApiError::MissingAccessToken);
    }
    let account_id = match config.account_id.trim() {
        "" => extract_account_id_from_token(token).ok_or(CodexApiError::MissingAccountId)?,
        explicit => explicit.to_owned(),
    };

    let mut headers = BTreeMap::new();
    headers.insert(HEADER_AUTHORIZATION.to_owned(), format!("Bearer {token}"));
    headers.insert(HEADER_ACCOUNT_ID.to_owned(), account_id);
    headers.insert(HEADER_OPENAI_BETA.to_owned(), "responses=experimental".to_owned());
    headers.insert(HEADER_ORIGINATOR.to_owned(), config.originator.trim().to_owned());
    headers.insert(HEADER_VERSION.to_owned(), CLIENT_VERSION.to_owned());
    headers.insert(HEADER_ACCEPT.to_owned(), "text/event-stream".to_owned());
    headers.insert(HEADER_CONTENT_TYPE.to_owned(), "application/json".to_owned());

    let user_agent = config
        .user_agent
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
        .unwrap_or_else(|| default_user_agent(&config.originator));
    headers.insert(HEADER_USER_AGENT.to_owned(), user_agent);

    if let Some(session_id) = config
        .session_id
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
    {
        headers.insert(HEADER_SESSION_ID.to_owned(), session_id.to_owned());
        headers.insert(HEADER_CONVERSATION_ID.to_owned(), session_id.to_owned());
    }

    for (key, value) in &config.extra_headers {
        headers.insert(key.trim().to_ascii_lowercase(), value.trim().to_owned());
    }

    Ok(headers)
}

/// Reads `https://api.openai.com/auth.chatgpt_account_id` from a JWT payload.
pub fn extract_account_id_from_token(token: &str) -> Option<String> {
    let mut parts = token.split('.');
    let _header = parts.next()?;
    let payload = parts.next()?;
    let _signature = parts.next()?;
    if parts.next().is_some() {
        return None;
    }

    let decoded = general_purpose::URL_SAFE_NO_PAD
        .decode(payload)
        .or_else(|_| general_purpose::URL_SAFE.decode(payload))
        .ok()?;
    let claims = serde_json::from_slice::<TokenClaims>(&decoded).ok()?;
    claims
        .auth?
        .chatgpt_account_id
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

fn default_user_agent(originator: &str) -> String {
    let originator = match originator.trim() {
        "" => crate::config::DEFAULT_ORIGINATOR,
        value => value,
    };
    match os_description() {
        Some((platform, release, arch)) => {
            format!("{originator}/{CLIENT_VERSION} ({platform} {release}; {arch})")
        }
        None => format!("{originator}/{CLIENT_VERSION}"),
    }
}

fn normalize_arch(arch: &str) -> String {
    match arch.to_ascii_lowercase().as_str() {
        "x86_64" | "amd64" => "x64".to_owned(),
        "x86" | "i386" | "i686" => "ia32".to_owned(),
        "aarch64" => "arm64".to_owned(),
        other => other.to_owned(),
    }
}

#[cfg(unix)]
fn os_description() -> Option<(String, String, String)> {
    use std::ffi::CStr;
    use std::mem::MaybeUninit;

    let mut raw = MaybeUninit::<libc::utsname>::uninit();
    // SAFETY: `uname` initializes the provided `utsname` struct on success.
    let rc = unsafe { libc::uname(raw.as_mut_ptr()) };
    if rc != 0 {
        return None;
    }
    // SAFETY: `uname` returned success, so `raw` is initialized.
    let raw = unsafe { raw.assume_init() };
    // SAFETY: `uname` fills NUL-terminated fixed-size C strings.
    let (platform, release, machine) = unsafe {
        (
            CStr::from_ptr(raw.sysname.as_ptr()),
            CStr::from_ptr(raw.release.as_ptr()),
            CStr::from_ptr(raw.machine.as_ptr()),
        )
    };
    let platform = platform.to_string_lossy().to_lowercase();
    let release = release.to_string_lossy().into_owned();
    let arch = normalize_arch(&machine.to_string_lossy());

    if platform.is_empty() || release.is_empty() || arch.is_empty() {
        None
    } else {
        Some((platform, release, arch))
    }
}

#[cfg(not(unix))]
fn os_description() -> Option<(String, String, String)> {
    None
}

#[derive(Debug, Deserialize)]
struct TokenClaims {
    #[serde(rename = "https://api.openai.com/auth")]
    auth: Option<AuthClaims>,
}

#[derive(Debug, Deserialize)]
struct AuthClaims {
    #[serde(default)]
    chatgpt_account_id: Option<String>,
}
