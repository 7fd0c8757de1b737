use std::fmt;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::liveness::{LivenessMonitor, StallStage, StallVerdict};
use super::Utf8Carry;
use crate::config::{DecoderConfig, LivenessConfig};
use crate::decode::{
    extract, recover_body, split, ChunkKind, ExtractContext, ExtractionResult, ResponseChunk,
    TokenUsage,
};
use crate::error::DecodeError;
use crate::json_scan::scan_top_level_objects;
use crate::observability::{log_session_summary, SessionSummary};
use crate::util::log_preview;

const STALL_RECOVERED_NOTICE: &str =
    "\n\n[Response auto-completed: the server stopped sending data.]";
const FORCED_TIMEOUT_NOTICE: &str =
    "\n\n[Response incomplete: timed out waiting for the server.]";

/// Lifecycle of one decode session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Streaming,
    Finished,
    Failed,
    Cancelled,
}

impl SessionState {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionState::Finished | SessionState::Failed | SessionState::Cancelled
        )
    }
}

/// Why a session finished successfully.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    /// The transport completed after normal streaming.
    Normal,
    /// Nothing streamed cleanly; the whole-body recovery pass found text.
    Recovered,
    /// The stream went silent after enough text; completed early.
    StallRecovered,
    /// The stream stayed silent until the forced deadline.
    ForcedTimeout,
}

impl fmt::Display for FinishReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FinishReason::Normal => "normal",
            FinishReason::Recovered => "recovered",
            FinishReason::StallRecovered => "stall-recovered",
            FinishReason::ForcedTimeout => "forced-timeout",
        };
        f.write_str(name)
    }
}

/// Terminal result of a session. Exactly one is produced per session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// `text` is the full accumulated answer, without any stall notice.
    Finished { reason: FinishReason, text: String },
    Failed(DecodeError),
    Cancelled,
}

impl Outcome {
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Finished { reason, .. } => match reason {
                FinishReason::Normal => "finished",
                FinishReason::Recovered => "recovered",
                FinishReason::StallRecovered => "stall_recovered",
                FinishReason::ForcedTimeout => "forced_timeout",
            },
            Outcome::Failed(_) => "failed",
            Outcome::Cancelled => "cancelled",
        }
    }
}

/// Item delivered to the caller, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeEvent {
    Fragment(String),
    Terminal(Outcome),
}

/// Per-request decode state. Single writer: every method takes `&mut self`
/// and pushes the resulting events, in order, onto `out`.
#[derive(Debug)]
pub struct DecodeSession {
    model: Option<String>,
    decoder: DecoderConfig,
    monitor: LivenessMonitor,
    state: SessionState,
    started_at: Instant,
    carry: Utf8Carry,
    pending: String,
    raw_body: String,
    accumulated: String,
    bytes_received: u64,
    fragments_emitted: u64,
    malformed_chunks: u64,
    saw_done: bool,
    usage: Option<TokenUsage>,
}

impl DecodeSession {
    #[must_use]
    pub fn new(
        model: Option<String>,
        decoder: DecoderConfig,
        liveness: &LivenessConfig,
        now: Instant,
    ) -> Self {
        Self {
            model,
            decoder,
            monitor: LivenessMonitor::new(liveness, now),
            state: SessionState::Idle,
            started_at: now,
            carry: Utf8Carry::default(),
            pending: String::new(),
            raw_body: String::new(),
            accumulated: String::new(),
            bytes_received: 0,
            fragments_emitted: 0,
            malformed_chunks: 0,
            saw_done: false,
            usage: None,
        }
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    #[must_use]
    pub fn stall_stage(&self) -> StallStage {
        self.monitor.stage()
    }

    /// Text emitted so far, concatenated.
    #[must_use]
    pub fn accumulated(&self) -> &str {
        &self.accumulated
    }

    #[must_use]
    pub fn bytes_received(&self) -> u64 {
        self.bytes_received
    }

    #[must_use]
    pub fn fragments_emitted(&self) -> u64 {
        self.fragments_emitted
    }

    /// `Idle -> Streaming`. Arms the liveness clock.
    pub fn begin(&mut self, now: Instant) {
        if self.state != SessionState::Idle {
            return;
        }
        self.state = SessionState::Streaming;
        self.started_at = now;
        self.monitor.arm(now);
        debug!(model = self.model.as_deref().unwrap_or(""), "decode session started");
    }

    /// Feed raw body bytes. Complete lines and complete leading objects are
    /// decoded now; the rest waits for more data.
    pub fn deliver(&mut self, bytes: &[u8], now: Instant, out: &mut Vec<DecodeEvent>) {
        if self.is_terminal() {
            debug!(bytes = bytes.len(), state = ?self.state, "ignoring delivery to finished session");
            return;
        }
        if self.state == SessionState::Idle {
            self.begin(now);
        }
        if bytes.is_empty() {
            return;
        }

        self.bytes_received += bytes.len() as u64;
        self.monitor.record_activity(now);

        let start = self.raw_body.len();
        self.carry.decode_into(bytes, &mut self.raw_body);
        self.pending.push_str(&self.raw_body[start..]);
        self.process_ready(now, out);
    }

    /// The transport finished the body normally.
    pub fn complete(&mut self, now: Instant, out: &mut Vec<DecodeEvent>) {
        if self.is_terminal() {
            return;
        }
        if self.state == SessionState::Idle {
            self.begin(now);
        }

        let start = self.raw_body.len();
        self.carry.flush_into(&mut self.raw_body);
        self.pending.push_str(&self.raw_body[start..]);
        self.flush_pending(now, out);
        if self.is_terminal() {
            return;
        }

        if self.fragments_emitted > 0 || self.saw_done {
            let text = self.accumulated.clone();
            self.finish(
                Outcome::Finished {
                    reason: FinishReason::Normal,
                    text,
                },
                now,
                out,
            );
            return;
        }

        let ctx = self.extract_context();
        match recover_body(&self.raw_body, &ctx) {
            Some(recovered) => {
                info!(
                    strategy = ?recovered.strategy,
                    bytes = self.raw_body.len(),
                    "recovered text from unstructured body"
                );
                self.emit(recovered.text, out);
                let text = self.accumulated.clone();
                self.finish(
                    Outcome::Finished {
                        reason: FinishReason::Recovered,
                        text,
                    },
                    now,
                    out,
                );
            }
            None => {
                warn!(
                    bytes = self.raw_body.len(),
                    preview = %log_preview(&self.raw_body),
                    "no readable content in response body"
                );
                let bytes = self.raw_body.len();
                self.finish(
                    Outcome::Failed(DecodeError::UnparsableResponse { bytes }),
                    now,
                    out,
                );
            }
        }
    }

    /// The transport or server failed.
    pub fn fail(&mut self, error: DecodeError, now: Instant, out: &mut Vec<DecodeEvent>) {
        if self.is_terminal() {
            return;
        }
        self.finish(Outcome::Failed(error), now, out);
    }

    /// The caller gave up on the request.
    pub fn cancel(&mut self, now: Instant, out: &mut Vec<DecodeEvent>) {
        if self.is_terminal() {
            return;
        }
        self.finish(Outcome::Cancelled, now, out);
    }

    /// Periodic liveness check.
    pub fn tick(&mut self, now: Instant, out: &mut Vec<DecodeEvent>) {
        if self.state != SessionState::Streaming {
            return;
        }
        match self.monitor.evaluate(now, self.accumulated.chars().count()) {
            StallVerdict::Steady => {}
            StallVerdict::Warn { idle } => {
                warn!(
                    idle_ms = idle.as_millis() as u64,
                    fragments = self.fragments_emitted,
                    "stream stalled, waiting for more data"
                );
            }
            StallVerdict::Recover { idle } => {
                warn!(
                    idle_ms = idle.as_millis() as u64,
                    chars = self.accumulated.chars().count(),
                    "stream stalled, completing with accumulated text"
                );
                self.complete_after_stall(FinishReason::StallRecovered, idle, now, out);
            }
            StallVerdict::Force { idle } => {
                warn!(
                    idle_ms = idle.as_millis() as u64,
                    chars = self.accumulated.chars().count(),
                    "stream stalled past deadline, forcing completion"
                );
                self.complete_after_stall(FinishReason::ForcedTimeout, idle, now, out);
            }
        }
    }

    fn complete_after_stall(
        &mut self,
        reason: FinishReason,
        idle: Duration,
        now: Instant,
        out: &mut Vec<DecodeEvent>,
    ) {
        self.flush_pending(now, out);
        if self.is_terminal() {
            return;
        }
        if self.accumulated.is_empty() {
            self.finish(
                Outcome::Failed(DecodeError::StallTimeout { elapsed: idle }),
                now,
                out,
            );
            return;
        }

        let notice = match reason {
            FinishReason::StallRecovered => STALL_RECOVERED_NOTICE,
            _ => FORCED_TIMEOUT_NOTICE,
        };
        out.push(DecodeEvent::Fragment(notice.to_owned()));
        let text = self.accumulated.clone();
        self.finish(Outcome::Finished { reason, text }, now, out);
    }

    fn finish(&mut self, outcome: Outcome, now: Instant, out: &mut Vec<DecodeEvent>) {
        self.state = match outcome {
            Outcome::Finished { .. } => SessionState::Finished,
            Outcome::Failed(_) => SessionState::Failed,
            Outcome::Cancelled => SessionState::Cancelled,
        };
        self.monitor.disarm();
        self.pending.clear();

        if let Outcome::Failed(ref error) = outcome {
            warn!(category = ?error.category(), error = %error, "decode session failed");
        }
        log_session_summary(&SessionSummary {
            model: self.model.as_deref().unwrap_or(""),
            outcome: outcome.label(),
            bytes_received: self.bytes_received,
            fragments: self.fragments_emitted,
            malformed_chunks: self.malformed_chunks,
            text: &self.accumulated,
            reported_usage: self.usage,
            duration: now.saturating_duration_since(self.started_at),
        });
        out.push(DecodeEvent::Terminal(outcome));
    }

    fn extract_context(&self) -> ExtractContext<'_> {
        ExtractContext::new(&self.decoder, self.model.as_deref())
    }

    /// Decode everything up to the last newline, then any complete objects
    /// at the head of the remaining tail.
    fn process_ready(&mut self, now: Instant, out: &mut Vec<DecodeEvent>) {
        if let Some(last_newline) = self.pending.rfind('\n') {
            let block: String = self.pending.drain(..=last_newline).collect();
            self.process_chunks(split(&block), now, out);
            if self.is_terminal() {
                return;
            }
        }

        let peel_end = leading_objects_end(&self.pending);
        if peel_end > 0 {
            let head: String = self.pending.drain(..peel_end).collect();
            let scan = scan_top_level_objects(head.as_bytes());
            let chunks = scan
                .spans
                .iter()
                .map(|span| ResponseChunk::new(&head[span.clone()]))
                .collect();
            self.process_chunks(chunks, now, out);
        }
    }

    fn flush_pending(&mut self, now: Instant, out: &mut Vec<DecodeEvent>) {
        if self.pending.trim().is_empty() {
            self.pending.clear();
            return;
        }
        let rest = std::mem::take(&mut self.pending);
        self.process_chunks(split(&rest), now, out);
    }

    fn process_chunks(
        &mut self,
        chunks: Vec<ResponseChunk>,
        now: Instant,
        out: &mut Vec<DecodeEvent>,
    ) {
        for chunk in chunks {
            let extraction = extract(&chunk, &self.extract_context());
            self.saw_done |= extraction.done;
            if extraction.usage.is_some() {
                self.usage = extraction.usage;
            }

            if let Some(message) = extraction.server_error {
                self.finish(
                    Outcome::Failed(DecodeError::in_stream(message)),
                    now,
                    out,
                );
                return;
            }

            match extraction.result {
                ExtractionResult::Fragment(mut text) => {
                    if chunk.kind() == ChunkKind::PlainText && chunk.line_break() {
                        text.push('\n');
                    }
                    self.emit(text, out);
                }
                ExtractionResult::NoContent => {}
                ExtractionResult::Malformed => {
                    self.malformed_chunks += 1;
                    debug!(
                        kind = %chunk.kind(),
                        preview = %log_preview(chunk.text()),
                        "dropping malformed chunk"
                    );
                }
            }
        }
    }

    fn emit(&mut self, text: String, out: &mut Vec<DecodeEvent>) {
        self.fragments_emitted += 1;
        self.accumulated.push_str(&text);
        out.push(DecodeEvent::Fragment(text));
    }
}

/// End offset of the run of complete objects at the head of `text`
/// (whitespace between them allowed), or 0 when the head is not an object.
fn leading_objects_end(text: &str) -> usize {
    if !text.trim_start().starts_with('{') {
        return 0;
    }
    let scan = scan_top_level_objects(text.as_bytes());
    let mut end = 0;
    for span in &scan.spans {
        if !text[end..span.start].trim().is_empty() {
            break;
        }
        end = span.end;
    }
    end
}
