//! Session event handling
//!
//! One task per session consumes the transport's event stream serially and
//! drives the synchronizer, so per-event document updates never interleave.

use super::{lock_recover, sync, ActiveSession, DictationSession, SessionState};
use crate::document::DocumentSurface;
use crate::transport::{StreamEvent, TranscriptEvent};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Spawn the event handler task for a session
pub(super) fn spawn_event_task(
    event_rx: broadcast::Receiver<StreamEvent>,
    session: Arc<Mutex<DictationSession>>,
    doc: Arc<Mutex<dyn DocumentSurface + Send>>,
    state: Arc<Mutex<SessionState>>,
    active: Arc<tokio::sync::Mutex<Option<ActiveSession>>>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(run_event_loop(event_rx, session, doc, state, active))
}

/// Event handler loop that processes transport events until a terminal one
async fn run_event_loop(
    mut event_rx: broadcast::Receiver<StreamEvent>,
    session: Arc<Mutex<DictationSession>>,
    doc: Arc<Mutex<dyn DocumentSurface + Send>>,
    state: Arc<Mutex<SessionState>>,
    active: Arc<tokio::sync::Mutex<Option<ActiveSession>>>,
) {
    loop {
        let event = match event_rx.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!("Event handler lagged, {} events skipped", skipped);
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };

        match event {
            StreamEvent::Opened => {
                info!("Recognition stream open");
            }
            StreamEvent::Transcript(transcript) => {
                handle_transcript(&transcript, &session, &doc, &state);
            }
            StreamEvent::Error { message } => {
                error!("Transport error, ending session: {}", message);
                teardown(&active, &state, SessionState::Failed).await;
                break;
            }
            StreamEvent::Closed => {
                // A close the controller initiated has already emptied the
                // active slot; anything else is the service hanging up on us.
                if teardown(&active, &state, SessionState::Stopped).await {
                    warn!("Recognition stream closed unexpectedly");
                }
                break;
            }
        }
    }
    debug!("Session event task exiting");
}

/// Apply a transcript event to the document
fn handle_transcript(
    transcript: &TranscriptEvent,
    session: &Arc<Mutex<DictationSession>>,
    doc: &Arc<Mutex<dyn DocumentSurface + Send>>,
    state: &Arc<Mutex<SessionState>>,
) {
    // Trailing finals from the close-time flush arrive while Stopping and
    // still belong to the session; anything later is ignored.
    let current = *lock_recover(state);
    if !matches!(current, SessionState::Live | SessionState::Stopping) {
        debug!("Ignoring transcript in state {}", current);
        return;
    }

    let mut doc = lock_recover(doc);
    let mut session = lock_recover(session);
    sync::apply_transcript(transcript, &mut session, &mut *doc);
}

/// Release the session's resources after a transport-initiated ending
///
/// Returns true if this call found a session to tear down; false means the
/// controller already did it.
async fn teardown(
    active: &tokio::sync::Mutex<Option<ActiveSession>>,
    state: &Mutex<SessionState>,
    final_state: SessionState,
) -> bool {
    let taken = active.lock().await.take();
    match taken {
        Some(mut session) => {
            session.audio_handle.stop();
            session.connection.close().await;
            super::log_session_summary(&session.session);
            *lock_recover(state) = final_state;
            info!("Session ended ({})", final_state);
            true
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{Position, TextDocument};

    fn fixtures(
        state: SessionState,
    ) -> (
        Arc<Mutex<DictationSession>>,
        Arc<Mutex<TextDocument>>,
        Arc<Mutex<SessionState>>,
    ) {
        (
            Arc::new(Mutex::new(DictationSession::new(Position::new(0, 0)))),
            Arc::new(Mutex::new(TextDocument::new())),
            Arc::new(Mutex::new(state)),
        )
    }

    fn event(text: &str, is_final: bool) -> TranscriptEvent {
        TranscriptEvent {
            text: text.to_string(),
            is_final,
        }
    }

    #[test]
    fn test_transcript_applied_while_live() {
        let (session, doc, state) = fixtures(SessionState::Live);
        let dyn_doc: Arc<Mutex<dyn DocumentSurface + Send>> = doc.clone();

        handle_transcript(&event("hello", false), &session, &dyn_doc, &state);
        assert_eq!(lock_recover(&doc).contents(), "hello");
    }

    #[test]
    fn test_trailing_final_applied_while_stopping() {
        let (session, doc, state) = fixtures(SessionState::Stopping);
        let dyn_doc: Arc<Mutex<dyn DocumentSurface + Send>> = doc.clone();

        handle_transcript(&event("flushed words", true), &session, &dyn_doc, &state);
        assert_eq!(lock_recover(&doc).contents(), "flushed words");
        assert_eq!(lock_recover(&session).finalized_utterances, 1);
    }

    #[test]
    fn test_transcript_ignored_after_session_end() {
        let (session, doc, state) = fixtures(SessionState::Stopped);
        let dyn_doc: Arc<Mutex<dyn DocumentSurface + Send>> = doc.clone();

        handle_transcript(&event("too late", false), &session, &dyn_doc, &state);
        assert_eq!(lock_recover(&doc).contents(), "");
        assert_eq!(lock_recover(&session).committed_len, 0);
    }
}
