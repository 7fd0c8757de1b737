use std::time::Duration;

pub(crate) const RETRY_MAX_ATTEMPTS: u32 = 2;
pub(crate) const RETRY_BACKOFF_BASE_MS: u64 = 100;
pub(crate) const RETRY_BACKOFF_MAX_MS: u64 = 1_000;
const RETRY_TRANSPORT_FAST_SECOND_MS: u64 = 10;

/// Whether a failure to obtain a response looks transient.
#[inline]
pub(crate) fn should_retry_transport_message(message: &str) -> bool {
    const NEEDLES: [&[u8]; 7] = [
        b"timed out",
        b"timeout",
        b"connection reset",
        b"connection aborted",
        b"connection refused",
        b"broken pipe",
        b"unexpected eof",
    ];
    let haystack = message.as_bytes();
    NEEDLES
        .iter()
        .any(|needle| contains_ascii_case_insensitive(haystack, needle))
}

/// Delay before retry number `attempt + 1`. A dropped connection is retried
/// at once; everything else backs off.
#[inline]
pub(crate) fn retry_transport_delay(message: &str, attempt: u32) -> Duration {
    if has_fast_retry_transport_signature(message) {
        return if attempt == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(RETRY_TRANSPORT_FAST_SECOND_MS)
        };
    }
    retry_backoff_delay(attempt)
}

#[inline]
fn has_fast_retry_transport_signature(message: &str) -> bool {
    const FAST_RETRY_NEEDLES: [&[u8]; 4] = [
        b"connection reset",
        b"connection aborted",
        b"broken pipe",
        b"unexpected eof",
    ];
    let haystack = message.as_bytes();
    FAST_RETRY_NEEDLES
        .iter()
        .any(|needle| contains_ascii_case_insensitive(haystack, needle))
}

#[inline]
fn contains_ascii_case_insensitive(haystack: &[u8], needle: &[u8]) -> bool {
    if needle.is_empty() {
        return true;
    }
    if haystack.len() < needle.len() {
        return false;
    }

    haystack.windows(needle.len()).any(|window| {
        window
            .iter()
            .zip(needle.iter())
            .all(|(a, b)| a.eq_ignore_ascii_case(b))
    })
}

#[inline]
pub(crate) fn retry_backoff_delay(attempt: u32) -> Duration {
    let shift = attempt.min(10);
    let multiplier = 1_u64 << shift;
    Duration::from_millis(
        RETRY_BACKOFF_BASE_MS
            .saturating_mul(multiplier)
            .min(RETRY_BACKOFF_MAX_MS),
    )
}

/// Flatten an error and its sources into one line; reqwest keeps the useful
/// part (refused, reset, DNS) in the source chain.
pub(crate) fn error_chain_message(err: &(dyn std::error::Error + 'static)) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if !message.contains(&text) {
            message.push_str(": ");
            message.push_str(&text);
        }
        source = cause.source();
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_retry_connect_failures() {
        assert!(should_retry_transport_message(
            "error sending request: tcp connect error: Connection refused (os error 111)"
        ));
        assert!(should_retry_transport_message("operation timed out"));
        assert!(!should_retry_transport_message("dns error: no such host"));
        assert!(!should_retry_transport_message("invalid URL"));
    }

    #[test]
    fn test_retry_transport_delay_fast_path() {
        assert_eq!(
            retry_transport_delay("connection reset by peer", 0),
            Duration::ZERO
        );
        assert_eq!(
            retry_transport_delay("unexpected EOF while reading", 1),
            Duration::from_millis(RETRY_TRANSPORT_FAST_SECOND_MS)
        );
    }

    #[test]
    fn test_retry_backoff_is_capped() {
        assert_eq!(
            retry_transport_delay("connection refused", 0),
            retry_backoff_delay(0)
        );
        assert_eq!(retry_backoff_delay(1), Duration::from_millis(200));
        assert_eq!(
            retry_backoff_delay(30),
            Duration::from_millis(RETRY_BACKOFF_MAX_MS)
        );
    }

    #[test]
    fn test_error_chain_message_includes_sources() {
        #[derive(Debug, thiserror::Error)]
        #[error("request failed")]
        struct Outer(#[source] std::io::Error);
        let err = Outer(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "connection refused",
        ));
        assert_eq!(error_chain_message(&err), "request failed: connection refused");
    }
}
