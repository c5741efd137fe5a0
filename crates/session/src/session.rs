//! Voice session state machine
//!
//! One [`VoiceSession`] owns the whole call lifecycle: capability
//! gate, microphone acquisition, the bounded connect/retry loop, the
//! inbound event pump, transcript accumulation, mute, and teardown.
//! All paths converge on a single state field; a disconnect issued at
//! any point cancels whatever phase is in flight.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, info, warn};
use uuid::Uuid;

use voice_client_config::constants::timeouts;
use voice_client_config::Settings;
use voice_client_core::{
    AudioFrame, CapabilityProbe, CapabilitySnapshot, MediaSource, OpenRequest, ServerEvent,
    SessionError, SignalingConnection, SignalingTransport, TranscriptMessage,
};

use crate::device::{CpalMediaSource, NativeCapabilityProbe};
use crate::level::AudioLevelMonitor;
use crate::media::MediaAcquirer;
use crate::signaling::RealtimeSignaling;
use crate::transcript::TranscriptAggregator;

/// Notices buffered per subscriber.
const NOTICE_QUEUE: usize = 64;

/// Session lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Open,
    Closing,
    Closed,
    /// Transient: a live session lost its connection. Always settles
    /// to `Closed`.
    Failed,
}

/// What subscribers observe about a session.
#[derive(Debug, Clone)]
pub enum SessionNotice {
    /// The session opened or closed.
    StatusChanged { open: bool },
    /// Remote voice-activity boundary.
    SpeechChanged { speaking: bool },
    /// A transcript message was finalized.
    Message(TranscriptMessage),
    /// A terminal error. Emitted exactly once per failure.
    Error(SessionError),
}

struct Shared {
    settings: Settings,
    session_id: String,
    state: parking_lot::RwLock<SessionState>,
    connecting: AtomicBool,
    muted: AtomicBool,
    retries: AtomicU32,
    cancel: parking_lot::Mutex<Option<watch::Sender<bool>>>,
    connection: tokio::sync::Mutex<Option<Box<dyn SignalingConnection>>>,
    input: parking_lot::Mutex<Option<Arc<dyn voice_client_core::AudioInput>>>,
    pump: parking_lot::Mutex<Option<JoinHandle<()>>>,
    transcript: parking_lot::Mutex<TranscriptAggregator>,
    level: AudioLevelMonitor,
    notices: broadcast::Sender<SessionNotice>,
}

impl Shared {
    fn state(&self) -> SessionState {
        *self.state.read()
    }

    fn set_state(&self, next: SessionState) {
        let mut state = self.state.write();
        if *state != next {
            debug!(from = ?*state, to = ?next, "session state");
            *state = next;
        }
    }

    fn notify(&self, notice: SessionNotice) {
        // No subscribers is not an error.
        let _ = self.notices.send(notice);
    }

    /// Stop metering and release the microphone. Idempotent.
    fn teardown_media(&self) {
        self.level.detach();
        if let Some(input) = self.input.lock().take() {
            input.stop();
        }
    }

    fn handle_event(&self, event: ServerEvent) {
        match event {
            ServerEvent::SessionReady => {
                debug!("remote session ready");
            }
            ServerEvent::SpeechStarted => {
                self.notify(SessionNotice::SpeechChanged { speaking: true });
            }
            ServerEvent::SpeechStopped => {
                self.notify(SessionNotice::SpeechChanged { speaking: false });
            }
            ServerEvent::Unhandled { raw_type } => {
                debug!(event_type = %raw_type, "unhandled signaling event");
            }
            other => {
                let finalized = self.transcript.lock().ingest(&other);
                if let Some(message) = finalized {
                    self.notify(SessionNotice::Message(message));
                }
            }
        }
    }

    /// A live session lost its transport. No automatic reconnect;
    /// the caller decides whether to dial again.
    async fn handle_remote_drop(&self, reason: &str) {
        {
            let mut state = self.state.write();
            if *state != SessionState::Open {
                return;
            }
            *state = SessionState::Failed;
        }
        warn!(reason, "connection dropped");
        self.notify(SessionNotice::Error(SessionError::ConnectionDropped(
            reason.to_string(),
        )));

        if let Some(connection) = self.connection.lock().await.take() {
            connection.close().await;
        }
        self.teardown_media();
        self.set_state(SessionState::Closed);
        self.notify(SessionNotice::StatusChanged { open: false });
    }
}

fn spawn_pump(
    shared: Arc<Shared>,
    events: Option<mpsc::Receiver<ServerEvent>>,
    mut closed: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut events = match events {
            Some(events) => events,
            None => {
                warn!("event stream unavailable, monitoring close only");
                let _ = closed.wait_for(|closed| *closed).await;
                shared.handle_remote_drop("peer connection closed").await;
                return;
            }
        };

        loop {
            tokio::select! {
                maybe = events.recv() => match maybe {
                    Some(event) => shared.handle_event(event),
                    None => {
                        shared.handle_remote_drop("event stream ended").await;
                        break;
                    }
                },
                changed = closed.changed() => {
                    if changed.is_err() || *closed.borrow() {
                        shared.handle_remote_drop("peer connection closed").await;
                        break;
                    }
                }
            }
        }
    })
}

/// Clears the single-flight flag on every exit path.
struct ConnectFlag<'a>(&'a AtomicBool);

impl Drop for ConnectFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// A realtime voice session.
pub struct VoiceSession {
    shared: Arc<Shared>,
    probe: Arc<dyn CapabilityProbe>,
    media: MediaAcquirer,
    transport: Arc<dyn SignalingTransport>,
}

impl VoiceSession {
    pub fn new(
        settings: Settings,
        probe: Arc<dyn CapabilityProbe>,
        source: Arc<dyn MediaSource>,
        transport: Arc<dyn SignalingTransport>,
    ) -> Self {
        let media = MediaAcquirer::new(source, &settings.audio);
        let level = AudioLevelMonitor::new(&settings.audio);
        let (notices, _) = broadcast::channel(NOTICE_QUEUE);

        Self {
            shared: Arc::new(Shared {
                settings,
                session_id: Uuid::new_v4().to_string(),
                state: parking_lot::RwLock::new(SessionState::Idle),
                connecting: AtomicBool::new(false),
                muted: AtomicBool::new(false),
                retries: AtomicU32::new(0),
                cancel: parking_lot::Mutex::new(None),
                connection: tokio::sync::Mutex::new(None),
                input: parking_lot::Mutex::new(None),
                pump: parking_lot::Mutex::new(None),
                transcript: parking_lot::Mutex::new(TranscriptAggregator::new()),
                level,
                notices,
            }),
            probe,
            media,
            transport,
        }
    }

    /// A session wired to the host microphone and the realtime API.
    pub fn native(settings: Settings) -> Self {
        let signaling = RealtimeSignaling::new(
            settings.session.clone(),
            settings.observability.log_field_max_chars,
        );
        Self::new(
            settings,
            Arc::new(NativeCapabilityProbe),
            Arc::new(CpalMediaSource),
            Arc::new(signaling),
        )
    }

    /// Dial the realtime endpoint.
    ///
    /// Returns `Ok(true)` once the session is open, `Ok(false)` when
    /// the attempt was superseded (already connecting, already open,
    /// or aborted by a concurrent [`disconnect`](Self::disconnect)),
    /// and the final error when every attempt failed. Retryable
    /// failures are redialed up to the configured attempt count with
    /// linear backoff.
    pub async fn connect(
        &self,
        credential: &str,
        system_prompt: &str,
    ) -> Result<bool, SessionError> {
        if self.shared.connecting.swap(true, Ordering::SeqCst) {
            warn!("connect already in progress");
            return Ok(false);
        }
        let _flag = ConnectFlag(&self.shared.connecting);

        match self.shared.state() {
            SessionState::Idle | SessionState::Closed | SessionState::Failed => {}
            state => {
                debug!(state = ?state, "connect ignored in current state");
                return Ok(false);
            }
        }

        let snapshot = self.probe.probe();
        if !snapshot.supported() {
            return self.fail_connect(SessionError::CapabilityUnsupported(snapshot.details()));
        }

        let (cancel_tx, mut cancel_rx) = watch::channel(false);
        *self.shared.cancel.lock() = Some(cancel_tx);
        self.shared.retries.store(0, Ordering::SeqCst);
        self.shared.set_state(SessionState::Connecting);
        info!(session_id = %self.shared.session_id, "connecting");

        let input = tokio::select! {
            result = self.media.acquire() => match result {
                Ok(input) => input,
                Err(e) => return self.fail_connect(e),
            },
            _ = cancel_rx.changed() => {
                debug!("connect aborted during media acquisition");
                return Ok(false);
            }
        };

        *self.shared.input.lock() = Some(input.clone());
        self.shared.muted.store(false, Ordering::SeqCst);
        input.set_enabled(true);
        self.shared.level.attach(input.clone());

        let config = self.shared.settings.session.clone();
        let mut last_err = None;

        for attempt in 1..=config.max_connect_attempts {
            let request = OpenRequest {
                credential: credential.to_string(),
                system_prompt: system_prompt.to_string(),
                voice: config.voice.clone(),
                input: input.clone(),
            };

            let outcome = tokio::select! {
                result = timeout(
                    Duration::from_millis(config.connect_timeout_ms),
                    self.transport.open(request),
                ) => result,
                _ = cancel_rx.changed() => {
                    debug!("connect aborted");
                    self.shared.teardown_media();
                    return Ok(false);
                }
            };

            let err = match outcome {
                Ok(Ok(connection)) => {
                    self.shared.retries.store(attempt - 1, Ordering::SeqCst);
                    return Ok(self.finish_connect(connection, &cancel_rx).await);
                }
                Ok(Err(e)) => e,
                Err(_) => SessionError::ConnectionTimeout,
            };

            warn!(attempt, error = %err, "connect attempt failed");
            self.shared.retries.store(attempt, Ordering::SeqCst);

            if attempt < config.max_connect_attempts && err.is_retryable() {
                let backoff = Duration::from_millis(config.backoff_base_ms * attempt as u64);
                tokio::select! {
                    _ = sleep(backoff) => continue,
                    _ = cancel_rx.changed() => {
                        debug!("connect aborted during backoff");
                        self.shared.teardown_media();
                        return Ok(false);
                    }
                }
            }

            last_err = Some(err);
            break;
        }

        let err = last_err.unwrap_or(SessionError::Unknown("no connect attempt ran".into()));
        self.fail_connect(err)
    }

    fn fail_connect(&self, err: SessionError) -> Result<bool, SessionError> {
        self.shared.set_state(SessionState::Failed);
        self.shared.notify(SessionNotice::Error(err.clone()));
        self.shared.teardown_media();
        self.shared.set_state(SessionState::Idle);
        Err(err)
    }

    /// Install a negotiated connection, unless a disconnect won the
    /// race while negotiation was finishing. Returns whether the
    /// session actually opened.
    async fn finish_connect(
        &self,
        connection: Box<dyn SignalingConnection>,
        cancel_rx: &watch::Receiver<bool>,
    ) -> bool {
        let mut slot = self.shared.connection.lock().await;
        if *cancel_rx.borrow() {
            drop(slot);
            debug!("connect aborted after negotiation, discarding connection");
            connection.close().await;
            self.shared.teardown_media();
            return false;
        }
        let events = connection.take_events();
        let closed = connection.watch_closed();
        *slot = Some(connection);
        drop(slot);
        *self.shared.pump.lock() = Some(spawn_pump(self.shared.clone(), events, closed));
        self.shared.set_state(SessionState::Open);
        self.shared.notify(SessionNotice::StatusChanged { open: true });
        info!(session_id = %self.shared.session_id, "session open");
        true
    }

    /// Tear the session down. Cancels an in-flight connect; a no-op
    /// when already idle or closed.
    pub async fn disconnect(&self) {
        if let Some(cancel) = self.shared.cancel.lock().take() {
            let _ = cancel.send(true);
        }

        let before = self.shared.state();
        if matches!(before, SessionState::Idle | SessionState::Closed) {
            return;
        }
        self.shared.set_state(SessionState::Closing);

        let connection = self.shared.connection.lock().await.take();
        if let Some(connection) = connection {
            let grace = Duration::from_millis(timeouts::DISCONNECT_GRACE_MS);
            if timeout(grace, connection.close()).await.is_err() {
                warn!("connection close timed out");
            }
        }
        if let Some(pump) = self.shared.pump.lock().take() {
            pump.abort();
        }

        self.shared.teardown_media();
        self.shared.muted.store(false, Ordering::SeqCst);
        self.shared.set_state(SessionState::Closed);
        if matches!(before, SessionState::Open | SessionState::Connecting) {
            self.shared.notify(SessionNotice::StatusChanged { open: false });
        }
        info!(session_id = %self.shared.session_id, "session closed");
    }

    /// Replace the live instruction text. `Ok(false)` when unchanged.
    pub async fn set_system_prompt(&self, text: &str) -> Result<bool, SessionError> {
        match self.shared.connection.lock().await.as_ref() {
            Some(connection) => connection.send_instructions(text).await,
            None => Err(SessionError::ChannelNotOpen),
        }
    }

    /// Switch the synthesized voice. `Ok(false)` when unchanged.
    pub async fn set_voice(&self, name: &str) -> Result<bool, SessionError> {
        match self.shared.connection.lock().await.as_ref() {
            Some(connection) => connection.send_voice(name).await,
            None => Err(SessionError::ChannelNotOpen),
        }
    }

    /// Mute or unmute the microphone. A muted track keeps capturing
    /// silence, so the remote end hears nothing and the level meter
    /// decays to zero.
    pub fn set_muted(&self, muted: bool) {
        self.shared.muted.store(muted, Ordering::SeqCst);
        let input = self.shared.input.lock().clone();
        if let Some(input) = input {
            input.set_enabled(!muted);
        }
        debug!(muted, "mute changed");
    }

    pub fn toggle_mute(&self) -> bool {
        let muted = !self.is_muted();
        self.set_muted(muted);
        muted
    }

    pub fn is_muted(&self) -> bool {
        self.shared.muted.load(Ordering::SeqCst)
    }

    /// Current microphone level in [0.0, 1.0].
    pub fn audio_level(&self) -> f32 {
        self.shared.level.level()
    }

    pub fn subscribe_level(&self) -> watch::Receiver<f32> {
        self.shared.level.subscribe()
    }

    /// Take the remote audio stream for playback. `None` when no
    /// connection is live or the stream was already taken.
    pub async fn take_remote_audio(&self) -> Option<mpsc::Receiver<AudioFrame>> {
        match self.shared.connection.lock().await.as_ref() {
            Some(connection) => connection.take_remote_audio(),
            None => None,
        }
    }

    /// Snapshot of the transcript so far, ascending by timestamp.
    pub fn messages(&self) -> Vec<TranscriptMessage> {
        self.shared.transcript.lock().messages().to_vec()
    }

    pub fn clear_messages(&self) {
        self.shared.transcript.lock().clear();
    }

    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    pub fn session_id(&self) -> &str {
        &self.shared.session_id
    }

    /// Failed attempts during the most recent connect.
    pub fn retry_count(&self) -> u32 {
        self.shared.retries.load(Ordering::SeqCst)
    }

    pub fn capabilities(&self) -> CapabilitySnapshot {
        self.probe.probe()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionNotice> {
        self.shared.notices.subscribe()
    }
}
