//! Dictation session management
//!
//! Provides the session controller that starts and stops dictation:
//! a session couples one exclusive microphone capture, one live transport
//! connection and one target document. The controller owns the session
//! state; nothing about an active session lives in ambient globals.
//!
//! # Start/stop ordering
//! `start()` captures the document anchor, opens the transport and only
//! then opens the microphone, so a rejected handshake never leaves the
//! device recording. `stop()` runs in reverse: fence the microphone, then
//! flush and close the stream.

mod events;
mod sync;

use crate::audio::{self, AudioCaptureError, AudioCaptureHandle, AudioChunk};
use crate::document::{DocumentSurface, Position};
use crate::settings::{self, SettingsError};
use crate::transport::{LiveConnection, StreamOptions, TransportError};
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Lifecycle state of the dictation session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Idle,
    Connecting,
    Live,
    Stopping,
    Stopped,
    Failed,
}

impl SessionState {
    /// Whether a new session may start from this state
    pub fn can_start(self) -> bool {
        matches!(
            self,
            SessionState::Idle | SessionState::Stopped | SessionState::Failed
        )
    }

    /// Whether a session currently owns resources (or is winding down)
    pub fn is_active(self) -> bool {
        matches!(
            self,
            SessionState::Connecting | SessionState::Live | SessionState::Stopping
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Connecting => "connecting",
            SessionState::Live => "recording",
            SessionState::Stopping => "stopping",
            SessionState::Stopped => "stopped",
            SessionState::Failed => "failed",
        };
        write!(f, "{}", name)
    }
}

/// State of one recording-to-transcript session
///
/// The anchor is fixed when the session starts; the committed length tracks
/// how many characters the current utterance occupies in the replace range.
#[derive(Debug)]
pub(crate) struct DictationSession {
    pub(crate) anchor: Position,
    pub(crate) committed_len: usize,
    pub(crate) started_at: DateTime<Utc>,
    pub(crate) finalized_utterances: u64,
}

impl DictationSession {
    pub(crate) fn new(anchor: Position) -> Self {
        Self {
            anchor,
            committed_len: 0,
            started_at: Utc::now(),
            finalized_utterances: 0,
        }
    }
}

/// Resources owned by the active session
pub(crate) struct ActiveSession {
    audio_handle: AudioCaptureHandle,
    connection: Arc<LiveConnection>,
    session: Arc<Mutex<DictationSession>>,
}

/// Errors returned by the session controller
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("A dictation session is already active")]
    AlreadyActive,

    #[error("Audio capture error: {0}")]
    Audio(#[from] AudioCaptureError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Settings error: {0}")]
    Settings(#[from] SettingsError),
}

/// Starts and stops dictation sessions against one document
///
/// At most one session is active at a time; a second `start()` is rejected
/// with `AlreadyActive` rather than queued.
pub struct SessionController {
    doc: Arc<Mutex<dyn DocumentSurface + Send>>,
    endpoint: String,
    state: Arc<Mutex<SessionState>>,
    active: Arc<tokio::sync::Mutex<Option<ActiveSession>>>,
}

impl SessionController {
    /// Create a controller for the given document and service endpoint
    pub fn new(doc: Arc<Mutex<dyn DocumentSurface + Send>>, endpoint: String) -> Self {
        Self {
            doc,
            endpoint,
            state: Arc::new(Mutex::new(SessionState::Idle)),
            active: Arc::new(tokio::sync::Mutex::new(None)),
        }
    }

    /// Current session state, for the status surface
    pub fn state(&self) -> SessionState {
        *lock_recover(&self.state)
    }

    /// Start a dictation session
    ///
    /// Reads the settings store, captures the anchor from the document
    /// cursor, opens the transport and only after a successful handshake
    /// opens the microphone. On any failure the state becomes `Failed` and
    /// nothing stays acquired.
    pub async fn start(&self) -> Result<(), SessionError> {
        let mut active = self.active.lock().await;
        if active.is_some() || !self.state().can_start() {
            return Err(SessionError::AlreadyActive);
        }
        self.set_state(SessionState::Connecting);

        // Settings are read per session start; later edits wait for the
        // next session.
        let dictation_settings = settings::load_settings();
        let api_key = match dictation_settings.resolve_api_key() {
            Ok(key) => key,
            Err(e) => {
                self.set_state(SessionState::Failed);
                return Err(e.into());
            }
        };
        let options = StreamOptions::from(&dictation_settings);

        // The anchor is captured exactly once, where dictation begins
        let anchor = lock_recover(&self.doc).get_cursor();

        let (connection, event_rx) =
            match LiveConnection::open(&self.endpoint, api_key.as_str(), &options).await {
                Ok(pair) => pair,
                Err(e) => {
                    self.set_state(SessionState::Failed);
                    return Err(e.into());
                }
            };
        let connection = Arc::new(connection);

        // Microphone opens strictly after the handshake succeeded
        let (audio_handle, audio_rx) = match audio::start_capture() {
            Ok(pair) => pair,
            Err(e) => {
                connection.close().await;
                self.set_state(SessionState::Failed);
                return Err(e.into());
            }
        };

        let session = Arc::new(Mutex::new(DictationSession::new(anchor)));
        self.set_state(SessionState::Live);

        tokio::spawn(forward_audio(audio_rx, connection.clone()));
        events::spawn_event_task(
            event_rx,
            session.clone(),
            self.doc.clone(),
            self.state.clone(),
            self.active.clone(),
        );

        *active = Some(ActiveSession {
            audio_handle,
            connection,
            session,
        });
        info!(
            anchor_line = anchor.line,
            anchor_ch = anchor.ch,
            "Dictation session started"
        );
        Ok(())
    }

    /// Stop the active session
    ///
    /// Safe to call when nothing is recording. Fences the microphone first,
    /// then flushes and closes the stream; trailing finals from the flush
    /// are still written before this returns.
    pub async fn stop(&self) {
        let taken = self.active.lock().await.take();
        let Some(mut session) = taken else {
            debug!("Stop requested but no session is active");
            return;
        };
        self.set_state(SessionState::Stopping);

        session.audio_handle.stop();
        session.connection.close().await;
        log_session_summary(&session.session);

        self.set_state(SessionState::Stopped);
        info!("Dictation session stopped");
    }

    /// Toggle recording: stop when a session is active, start otherwise
    pub async fn toggle(&self) -> Result<(), SessionError> {
        if self.state().is_active() {
            self.stop().await;
            Ok(())
        } else {
            self.start().await
        }
    }

    fn set_state(&self, new_state: SessionState) {
        *lock_recover(&self.state) = new_state;
        info!("Session state: {}", new_state);
    }
}

/// Forward captured audio chunks into the live connection
async fn forward_audio(mut audio_rx: mpsc::Receiver<AudioChunk>, connection: Arc<LiveConnection>) {
    let mut forwarded = 0u64;
    while let Some(chunk) = audio_rx.recv().await {
        match connection.send(chunk.bytes) {
            Ok(()) => forwarded += 1,
            Err(TransportError::Backpressure) => {
                warn!("Transport buffer full - audio chunk dropped");
            }
            Err(_) => {
                debug!("Transport no longer accepting audio");
                break;
            }
        }
    }
    debug!("Audio forwarding ended after {} chunks", forwarded);
}

/// Log a summary of a finished session
fn log_session_summary(session: &Mutex<DictationSession>) {
    let session = lock_recover(session);
    let duration = Utc::now().signed_duration_since(session.started_at);
    info!(
        "Session summary: {} finalized utterances in {:.1}s",
        session.finalized_utterances,
        duration.num_milliseconds() as f64 / 1000.0
    );
}

/// Lock a mutex, recovering the data if a previous holder panicked
pub(crate) fn lock_recover<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            warn!("Mutex was poisoned, recovering");
            poisoned.into_inner()
        }
    }
}
