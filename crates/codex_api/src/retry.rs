use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;

/// Retries after the initial attempt.
pub const MAX_RETRIES: u32 = 3;
pub const BASE_DELAY_MS: u64 = 1000;

fn transient_error_regex() -> Option<&'static Regex> {
    static CACHED: OnceLock<Option<Regex>> = OnceLock::new();
    CACHED
        .get_or_init(|| {
            Regex::new(
                r"(?i)rate.?limit|overloaded|service.?unavailable|upstream.?connect|connection.?(refused|reset)",
            )
            .ok()
        })
        .as_ref()
}

/// 429 and 5xx gateway statuses retry, as does any body that reads like a
/// transient outage. Usage-limit responses never retry.
pub fn is_retryable_http_error(status: u16, error_text: &str) -> bool {
    if is_usage_limit_message(error_text) {
        return false;
    }
    matches!(status, 429 | 500 | 502 | 503 | 504)
        || transient_error_regex().is_some_and(|regex| regex.is_match(error_text))
}

pub fn is_usage_limit_message(message: &str) -> bool {
    message.to_ascii_lowercase().contains("usage limit")
}

/// Exponential backoff: 1s, 2s, 4s, ...
pub fn retry_delay(attempt: u32) -> Duration {
    Duration::from_millis(BASE_DELAY_MS.saturating_mul(2u64.saturating_pow(attempt.min(30))))
}
