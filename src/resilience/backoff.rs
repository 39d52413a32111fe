//! Rate-limit backoff.
//!
//! A 429 carrying a `Retry-After` hint (delta seconds or an HTTP date)
//! waits exactly that long; without a usable hint the configured default
//! delay applies. The delay suspends only the retrying request.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::transport::TransportResponse;

#[derive(Debug, Clone)]
pub struct BackoffController {
    default_delay: Duration,
}

impl BackoffController {
    pub fn new(default_delay: Duration) -> Self {
        Self { default_delay }
    }

    pub fn default_delay(&self) -> Duration {
        self.default_delay
    }

    /// Delay to wait before resubmitting after `response`.
    pub fn delay_for(&self, response: &TransportResponse) -> Duration {
        match response.retry_after() {
            Some(raw) => parse_retry_after(raw).unwrap_or_else(|| {
                tracing::debug!(retry_after = %raw, "Unusable retry hint, using default delay");
                self.default_delay
            }),
            None => self.default_delay,
        }
    }
}

/// Parse a `Retry-After` value against the current wall clock.
pub fn parse_retry_after(raw: &str) -> Option<Duration> {
    parse_retry_after_at(raw, Utc::now())
}

/// Parse a `Retry-After` value relative to `now`.
///
/// Accepts delta seconds or an HTTP date. A date already in the past
/// means no wait.
pub fn parse_retry_after_at(raw: &str, now: DateTime<Utc>) -> Option<Duration> {
    let raw = raw.trim();
    if let Ok(secs) = raw.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }

    let at = DateTime::parse_from_rfc2822(raw).ok()?.with_timezone(&Utc);
    Some((at - now).to_std().unwrap_or(Duration::ZERO))
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::{HeaderValue, RETRY_AFTER};
    use reqwest::StatusCode;

    fn rate_limited(hint: Option<&'static str>) -> TransportResponse {
        let mut response = TransportResponse::new(StatusCode::TOO_MANY_REQUESTS);
        if let Some(hint) = hint {
            response.headers.insert(RETRY_AFTER, HeaderValue::from_static(hint));
        }
        response
    }

    #[test]
    fn test_hint_is_used_exactly() {
        let controller = BackoffController::new(Duration::from_millis(1000));
        assert_eq!(controller.delay_for(&rate_limited(Some("2"))), Duration::from_secs(2));
        assert_eq!(controller.delay_for(&rate_limited(Some(" 0 "))), Duration::ZERO);
    }

    #[test]
    fn test_missing_or_bad_hint_uses_default() {
        let controller = BackoffController::new(Duration::from_millis(750));
        assert_eq!(controller.delay_for(&rate_limited(None)), Duration::from_millis(750));
        assert_eq!(controller.delay_for(&rate_limited(Some("soon"))), Duration::from_millis(750));
        assert_eq!(controller.delay_for(&rate_limited(Some("-3"))), Duration::from_millis(750));
    }

    #[test]
    fn test_http_date_hint() {
        let now = DateTime::parse_from_rfc3339("2015-10-21T07:27:58Z")
            .unwrap()
            .with_timezone(&Utc);

        assert_eq!(
            parse_retry_after_at("Wed, 21 Oct 2015 07:28:00 GMT", now),
            Some(Duration::from_secs(2))
        );
        assert_eq!(
            parse_retry_after_at("Wed, 21 Oct 2015 07:20:00 GMT", now),
            Some(Duration::ZERO)
        );
        assert_eq!(parse_retry_after_at("Wed, 21 Oct 2015", now), None);
    }

    #[test]
    fn test_past_http_date_hint_does_not_fall_back() {
        let controller = BackoffController::new(Duration::from_millis(750));
        let hint = rate_limited(Some("Thu, 01 Jan 1970 00:00:00 GMT"));
        assert_eq!(controller.delay_for(&hint), Duration::ZERO);
    }
}
