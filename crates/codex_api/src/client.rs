use std::future::Future;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Response, StatusCode};
use tokio_util::sync::CancellationToken;

use crate::config::{normalize_codex_url, CodexApiConfig};
use crate::error::{parse_error_message, CodexApiError};
use crate::headers::build_headers;
use crate::payload::CodexRequest;
use crate::retry::{is_retryable_http_error, is_usage_limit_message, retry_delay, MAX_RETRIES};
use crate::stream::CodexEventStream;

#[derive(Debug)]
pub struct CodexApiClient {
    http: Client,
    config: CodexApiConfig,
}

impl CodexApiClient {
    pub fn new(config: CodexApiConfig) -> Result<Self, CodexApiError> {
        let mut builder = Client::builder();
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder.build().map_err(CodexApiError::from)?;
        Ok(Self { http, config })
    }

    pub fn config(&self) -> &CodexApiConfig {
        &self.config
    }

    pub fn normalized_endpoint(&self) -> String {
        normalize_codex_url(&self.config.base_url)
    }

    pub fn header_map(&self) -> Result<HeaderMap, CodexApiError> {
        let mut out = HeaderMap::new();
        for (key, value) in build_headers(&self.config)? {
            let name = HeaderName::from_bytes(key.as_bytes())
                .map_err(|_| CodexApiError::InvalidHeader(format!("invalid header name: {key}")))?;
            let value = HeaderValue::from_str(&value)
                .map_err(|_| CodexApiError::InvalidHeader(format!("invalid value for {key}")))?;
            out.insert(name, value);
        }
        Ok(out)
    }

    pub fn build_request(
        &self,
        request: &CodexRequest,
    ) -> Result<reqwest::RequestBuilder, CodexApiError> {
        validate_request_payload_shape(request)?;

        let headers = self.header_map()?;
        let payload = self.request_with_transport_defaults(request);
        Ok(self
            .http
            .post(self.normalized_endpoint())
            .headers(headers)
            .json(&payload))
    }

    /// Applies the fields the endpoint requires regardless of caller input.
    pub fn request_with_transport_defaults(&self, request: &CodexRequest) -> CodexRequest {
        let mut payload = request.clone();
        payload.store = false;
        payload.stream = true;
        payload.include = vec!["reasoning.encrypted_content".to_owned()];
        payload.tool_choice = Some("auto".to_owned());
        if payload.prompt_cache_key.is_none() {
            payload.prompt_cache_key = self
                .config
                .session_id
                .as_deref()
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(ToOwned::to_owned);
        }
        if let Some(reasoning) = payload.reasoning.as_mut() {
            if reasoning.summary.as_deref().map_or(true, |summary| summary.trim().is_empty()) {
                reasoning.summary = Some("auto".to_owned());
            }
        }
        payload
    }

    /// Posts `request`, retrying transient failures with exponential backoff.
    /// Every attempt and every backoff wait observes `cancel`.
    pub async fn send_with_retry(
        &self,
        request: &CodexRequest,
        cancel: Option<&CancellationToken>,
    ) -> Result<Response, CodexApiError> {
        let mut last_status: Option<StatusCode> = None;
        let mut last_error = None;

        for attempt in 0..=MAX_RETRIES {
            let sent = await_or_cancel(self.build_request(request)?.send(), cancel).await?;

            match sent {
                Ok(response) if response.status().is_success() => return Ok(response),
                Ok(response) => {
                    let status = response.status();
                    last_status = Some(status);
                    let body = await_or_cancel(response.text(), cancel)
                        .await?
                        .unwrap_or_default();
                    let message = parse_error_message(status, &body);
                    last_error = Some(message.clone());

                    let retryable = is_retryable_http_error(status.as_u16(), &body)
                        && !is_usage_limit_message(&message);
                    if attempt < MAX_RETRIES && retryable {
                        tracing::warn!(attempt, status = status.as_u16(), %message, "retrying Codex request");
                        await_or_cancel(tokio::time::sleep(retry_delay(attempt)), cancel).await?;
                        continue;
                    }
                    return Err(CodexApiError::Status(status, message));
                }
                Err(error) => {
                    let message = error.to_string();
                    last_error = Some(message.clone());
                    if attempt < MAX_RETRIES && !is_usage_limit_message(&message) {
                        tracing::warn!(attempt, %message, "retrying Codex request after transport error");
                        await_or_cancel(tokio::time::sleep(retry_delay(attempt)), cancel).await?;
                        continue;
                    }
                    break;
                }
            }
        }

        Err(CodexApiError::RetryExhausted {
            status: last_status,
            last_error,
        })
    }

    /// Sends `request` and returns its decoded event stream.
    pub async fn stream(
        &self,
        request: &CodexRequest,
        cancel: Option<&CancellationToken>,
    ) -> Result<CodexEventStream, CodexApiError> {
        let response = self.send_with_retry(request, cancel).await?;
        Ok(CodexEventStream::from_response(response))
    }
}

fn validate_request_payload_shape(request: &CodexRequest) -> Result<(), CodexApiError> {
    if request.input.is_array() {
        return Ok(());
    }

    Err(CodexApiError::InvalidRequestPayload(format!(
        "'input' must be a JSON array, got {}",
        value_type_name(&request.input)
    )))
}

fn value_type_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

async fn await_or_cancel<F>(
    future: F,
    cancel: Option<&CancellationToken>,
) -> Result<F::Output, CodexApiError>
where
    F: Future,
{
    let Some(token) = cancel else {
        return Ok(future.await);
    };
    if token.is_cancelled() {
        return Err(CodexApiError::Cancelled);
    }
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(CodexApiError::Cancelled),
        output = future => Ok(output),
    }
}
