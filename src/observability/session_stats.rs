use std::time::Duration;

use tracing::info;

use crate::decode::TokenUsage;

/// Estimate the number of tokens in `text`.
///
/// Uses a lightweight heuristic (`bytes / 4`) to avoid loading model BPE tables.
#[must_use]
pub fn estimate_tokens(text: &str) -> u64 {
    (text.len() as u64).div_ceil(4)
}

/// Merge server-reported counts with a local estimate of the output.
///
/// Non-zero server values always win; a missing or zero output count is
/// filled with `estimated_output`. The prompt count is never estimated.
#[must_use]
pub fn merge_usage(reported: Option<TokenUsage>, estimated_output: u64) -> TokenUsage {
    let reported = reported.unwrap_or_default();
    let output_tokens = match reported.output_tokens {
        Some(v) if v > 0 => Some(v),
        _ => Some(estimated_output),
    };
    TokenUsage {
        prompt_tokens: reported.prompt_tokens.filter(|v| *v > 0),
        output_tokens,
    }
}

/// Counters gathered over one decode session.
#[derive(Debug, Clone)]
pub struct SessionSummary<'a> {
    pub model: &'a str,
    pub outcome: &'a str,
    pub bytes_received: u64,
    pub fragments: u64,
    pub malformed_chunks: u64,
    pub text: &'a str,
    pub reported_usage: Option<TokenUsage>,
    pub duration: Duration,
}

/// Log the terminal summary of a decode session at INFO level.
pub fn log_session_summary(summary: &SessionSummary<'_>) {
    let usage = merge_usage(summary.reported_usage, estimate_tokens(summary.text));
    info!(
        model = summary.model,
        outcome = summary.outcome,
        bytes_received = summary.bytes_received,
        fragments = summary.fragments,
        malformed_chunks = summary.malformed_chunks,
        output_chars = summary.text.chars().count(),
        prompt_tokens = usage.prompt_tokens.unwrap_or(0),
        output_tokens = usage.output_tokens.unwrap_or(0),
        duration_seconds = summary.duration.as_secs_f64(),
        "decode session completed"
    );
}
