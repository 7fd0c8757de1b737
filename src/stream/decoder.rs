use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use std::time::Duration;

use futures_util::Stream;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::session::{DecodeEvent, DecodeSession, Outcome, SessionState};
use crate::config::{DecoderConfig, LivenessConfig};
use crate::error::DecodeError;

/// Request metadata the decoder needs.
#[derive(Debug, Clone, Default)]
pub struct RequestMeta {
    /// Model name from the request; stripped from artifact residue.
    pub model: Option<String>,
}

struct Shared {
    session: Mutex<DecodeSession>,
    events: mpsc::UnboundedSender<DecodeEvent>,
    cancel: CancellationToken,
    monitor: Mutex<Option<JoinHandle<()>>>,
    tick_interval: Duration,
}

impl Shared {
    /// Run one transition under the session lock and publish its events in
    /// order before the lock is released.
    fn drive<R>(&self, f: impl FnOnce(&mut DecodeSession, &mut Vec<DecodeEvent>) -> R) -> R {
        let mut session = self.session.lock();
        let mut out = Vec::new();
        let result = f(&mut session, &mut out);
        for event in out {
            // A dropped receiver only means nobody is listening any more.
            let _ = self.events.send(event);
        }
        let terminal = session.is_terminal();
        drop(session);

        if terminal {
            self.disarm();
        }
        result
    }

    fn disarm(&self) {
        self.cancel.cancel();
        if let Some(handle) = self.monitor.lock().take() {
            handle.abort();
        }
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        let mut out = Vec::new();
        self.session.get_mut().cancel(Instant::now(), &mut out);
        for event in out {
            let _ = self.events.send(event);
        }
        self.cancel.cancel();
        if let Some(handle) = self.monitor.get_mut().take() {
            handle.abort();
        }
    }
}

/// Orchestrates one decode session: feeds deliveries through the session
/// state machine, runs the liveness timer, and publishes ordered
/// [`DecodeEvent`]s to the paired [`FragmentStream`].
///
/// Cheap to clone; all clones drive the same session. Dropping the last clone
/// of a non-terminal session cancels it.
#[derive(Clone)]
pub struct StreamDecoder {
    shared: Arc<Shared>,
}

impl StreamDecoder {
    #[must_use]
    pub fn new(
        decoder: DecoderConfig,
        liveness: &LivenessConfig,
        meta: RequestMeta,
    ) -> (Self, FragmentStream) {
        let (tx, rx) = mpsc::unbounded_channel();
        let session = DecodeSession::new(meta.model, decoder, liveness, Instant::now());
        let shared = Arc::new(Shared {
            session: Mutex::new(session),
            events: tx,
            cancel: CancellationToken::new(),
            monitor: Mutex::new(None),
            tick_interval: liveness.tick_interval(),
        });
        (Self { shared }, FragmentStream::new(rx))
    }

    /// Token cancelled when the session reaches any terminal state. Hand it
    /// to the transport so the body read stops with the session.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.shared.cancel.clone()
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.shared.session.lock().state()
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.state().is_terminal()
    }

    /// `Idle -> Streaming`: arms the liveness monitor. Implied by the first
    /// [`deliver`](Self::deliver).
    pub fn begin(&self) {
        let started = self.shared.drive(|session, _| {
            if session.state() != SessionState::Idle {
                return false;
            }
            session.begin(Instant::now());
            true
        });
        if started {
            self.spawn_monitor();
        }
    }

    pub fn deliver(&self, bytes: &[u8]) {
        if self.state() == SessionState::Idle {
            self.begin();
        }
        self.shared
            .drive(|session, out| session.deliver(bytes, Instant::now(), out));
    }

    /// The body ended normally.
    pub fn complete(&self) {
        self.shared
            .drive(|session, out| session.complete(Instant::now(), out));
    }

    pub fn fail(&self, error: DecodeError) {
        self.shared
            .drive(|session, out| session.fail(error, Instant::now(), out));
    }

    /// Network-level failure.
    pub fn fail_transport(&self, message: impl Into<String>) {
        self.fail(DecodeError::Transport(message.into()));
    }

    /// Non-2xx status with its (possibly empty) body.
    pub fn fail_http(&self, status: u16, body: &str) {
        self.fail(DecodeError::from_http_status(status, body));
    }

    /// Stop the session now. No fragment or recovery is observable afterwards.
    pub fn cancel(&self) {
        self.shared
            .drive(|session, out| session.cancel(Instant::now(), out));
    }

    fn spawn_monitor(&self) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!("no tokio runtime, stall detection disabled for this session");
            return;
        };
        let shared = Arc::downgrade(&self.shared);
        let cancel = self.shared.cancel.clone();
        let period = self.shared.tick_interval;
        let handle = runtime.spawn(run_monitor(shared, cancel, period));

        let mut slot = self.shared.monitor.lock();
        if self.shared.cancel.is_cancelled() {
            handle.abort();
        } else {
            *slot = Some(handle);
        }
    }
}

async fn run_monitor(shared: Weak<Shared>, cancel: CancellationToken, period: Duration) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        let Some(shared) = shared.upgrade() else {
            break;
        };
        let terminal = shared.drive(|session, out| {
            session.tick(Instant::now(), out);
            session.is_terminal()
        });
        if terminal {
            break;
        }
    }
    tracing::trace!("liveness monitor stopped");
}

/// Ordered fragments of one session, ending with exactly one terminal
/// outcome. Finite and not restartable.
pub struct FragmentStream {
    rx: mpsc::UnboundedReceiver<DecodeEvent>,
    finished: bool,
}

impl FragmentStream {
    fn new(rx: mpsc::UnboundedReceiver<DecodeEvent>) -> Self {
        Self {
            rx,
            finished: false,
        }
    }

    /// Next event, or `None` after the terminal event.
    pub async fn next_event(&mut self) -> Option<DecodeEvent> {
        if self.finished {
            return None;
        }
        let event = self.rx.recv().await;
        self.observe(event.as_ref());
        event
    }

    /// Drain the stream into its fragments and the terminal outcome.
    pub async fn collect(mut self) -> (Vec<String>, Outcome) {
        let mut fragments = Vec::new();
        while let Some(event) = self.next_event().await {
            match event {
                DecodeEvent::Fragment(text) => fragments.push(text),
                DecodeEvent::Terminal(outcome) => return (fragments, outcome),
            }
        }
        // Sender side vanished without a terminal event.
        (fragments, Outcome::Cancelled)
    }

    fn observe(&mut self, event: Option<&DecodeEvent>) {
        if matches!(event, None | Some(DecodeEvent::Terminal(_))) {
            self.finished = true;
        }
    }
}

impl Stream for FragmentStream {
    type Item = DecodeEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.finished {
            return Poll::Ready(None);
        }
        let polled = this.rx.poll_recv(cx);
        if let Poll::Ready(ref event) = polled {
            this.observe(event.as_ref());
        }
        polled
    }
}
