//! Transcript-to-document synchronization
//!
//! Turns the stream of superseding hypotheses into replace-range edits
//! against the session's anchor. Non-final hypotheses keep overwriting the
//! same range; a final hypothesis commits the text, advances the anchor past
//! it and resets the range for the next utterance.

use super::DictationSession;
use crate::document::DocumentSurface;
use crate::transport::TranscriptEvent;
use tracing::{debug, trace};

/// Apply one transcript event to the document
///
/// Exactly one `replace_range` call per event. The replace range is
/// `[anchor, anchor + committed_len)` advanced through real document
/// content, so positions stay valid even when committed text contains line
/// breaks or the document was mutated by someone else (the document clamps).
///
/// The first event of a session, or a final with no preceding partial, has
/// `committed_len == 0` and degenerates to a pure insert at the anchor.
pub(crate) fn apply_transcript(
    event: &TranscriptEvent,
    session: &mut DictationSession,
    doc: &mut (dyn DocumentSurface + Send),
) {
    let replace_end = doc.advance_position(session.anchor, session.committed_len);
    doc.replace_range(&event.text, session.anchor, replace_end);
    session.committed_len = event.text.chars().count();

    if event.is_final {
        // The committed text is settled: move the anchor past it so the next
        // utterance starts a fresh replace range, and park the cursor there.
        session.anchor = doc.advance_position(session.anchor, session.committed_len);
        session.committed_len = 0;
        session.finalized_utterances += 1;
        doc.set_cursor(session.anchor);
        debug!(
            utterance = session.finalized_utterances,
            "Committed utterance: {}", event.text
        );
    } else {
        trace!("Applied partial hypothesis ({} chars)", session.committed_len);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{Position, TextDocument};

    fn partial(text: &str) -> TranscriptEvent {
        TranscriptEvent {
            text: text.to_string(),
            is_final: false,
        }
    }

    fn final_event(text: &str) -> TranscriptEvent {
        TranscriptEvent {
            text: text.to_string(),
            is_final: true,
        }
    }

    fn session_at_cursor(doc: &TextDocument) -> DictationSession {
        DictationSession::new(doc.get_cursor())
    }

    #[test]
    fn test_idempotent_partial_replace() {
        // Each hypothesis fully supersedes the previous one, growing or
        // shrinking, and the document always holds exactly the latest.
        let mut doc = TextDocument::new();
        let mut session = session_at_cursor(&doc);

        for text in ["he", "hello", "hello wor", "hello world", "hello!"] {
            apply_transcript(&partial(text), &mut session, &mut doc);
            assert_eq!(doc.contents(), text);
        }
    }

    #[test]
    fn test_first_event_is_pure_insert() {
        let mut doc = TextDocument::from_text("before  after");
        doc.set_cursor(Position::new(0, 7));
        let mut session = session_at_cursor(&doc);

        apply_transcript(&partial("test"), &mut session, &mut doc);
        assert_eq!(doc.contents(), "before test after");
    }

    #[test]
    fn test_exactly_once_finalization() {
        let mut doc = TextDocument::new();
        let mut session = session_at_cursor(&doc);

        apply_transcript(&partial("hello"), &mut session, &mut doc);
        apply_transcript(&final_event("hello "), &mut session, &mut doc);
        assert_eq!(doc.contents(), "hello ");
        assert_eq!(session.committed_len, 0);
        assert_eq!(session.anchor, Position::new(0, 6));

        // Later events belong to the next utterance and must not touch the
        // finalized text.
        apply_transcript(&partial("stray"), &mut session, &mut doc);
        assert_eq!(doc.contents(), "hello stray");
        apply_transcript(&partial("x"), &mut session, &mut doc);
        assert_eq!(doc.contents(), "hello x");
    }

    #[test]
    fn test_sequential_utterance_append() {
        let mut doc = TextDocument::new();
        let mut session = session_at_cursor(&doc);

        apply_transcript(&partial("hel"), &mut session, &mut doc);
        apply_transcript(&final_event("hello "), &mut session, &mut doc);
        apply_transcript(&partial("wor"), &mut session, &mut doc);
        apply_transcript(&final_event("world"), &mut session, &mut doc);

        assert_eq!(doc.contents(), "hello world");
        assert_eq!(session.finalized_utterances, 2);
    }

    #[test]
    fn test_final_without_preceding_partial() {
        let mut doc = TextDocument::from_text("note: ");
        let mut session = session_at_cursor(&doc);

        apply_transcript(&final_event("done"), &mut session, &mut doc);
        assert_eq!(doc.contents(), "note: done");
        assert_eq!(session.anchor, Position::new(0, 10));
    }

    #[test]
    fn test_empty_hypothesis_collapses_range() {
        let mut doc = TextDocument::new();
        let mut session = session_at_cursor(&doc);

        apply_transcript(&partial("mumble"), &mut session, &mut doc);
        apply_transcript(&partial(""), &mut session, &mut doc);
        assert_eq!(doc.contents(), "");
        assert_eq!(session.committed_len, 0);

        apply_transcript(&partial("clear words"), &mut session, &mut doc);
        assert_eq!(doc.contents(), "clear words");
    }

    #[test]
    fn test_cursor_moves_only_on_final() {
        let mut doc = TextDocument::new();
        doc.set_cursor(Position::new(0, 0));
        let mut session = session_at_cursor(&doc);

        apply_transcript(&partial("hello"), &mut session, &mut doc);
        // TextDocument leaves the cursor alone on a replace; partials must
        // not reposition it.
        assert_eq!(doc.get_cursor(), Position::new(0, 0));

        apply_transcript(&final_event("hello"), &mut session, &mut doc);
        assert_eq!(doc.get_cursor(), Position::new(0, 5));
    }

    #[test]
    fn test_committed_text_with_line_break() {
        let mut doc = TextDocument::new();
        let mut session = session_at_cursor(&doc);

        apply_transcript(&final_event("first paragraph\n\n"), &mut session, &mut doc);
        assert_eq!(session.anchor, Position::new(2, 0));

        apply_transcript(&partial("second"), &mut session, &mut doc);
        apply_transcript(&final_event("second paragraph"), &mut session, &mut doc);
        assert_eq!(doc.contents(), "first paragraph\n\nsecond paragraph");
    }

    #[test]
    fn test_unicode_hypotheses_count_chars() {
        let mut doc = TextDocument::new();
        let mut session = session_at_cursor(&doc);

        apply_transcript(&partial("grüß"), &mut session, &mut doc);
        assert_eq!(session.committed_len, 4);
        apply_transcript(&final_event("grüß dich"), &mut session, &mut doc);
        assert_eq!(doc.contents(), "grüß dich");
        assert_eq!(session.anchor, Position::new(0, 9));
    }

    #[test]
    fn test_external_truncation_clamps_and_continues() {
        let mut doc = TextDocument::new();
        let mut session = session_at_cursor(&doc);

        apply_transcript(&partial("a long partial hypothesis"), &mut session, &mut doc);

        // Someone else rewrites the document out from under the session.
        doc.replace_range("hi", Position::new(0, 0), doc.end_position());
        assert_eq!(doc.contents(), "hi");

        // The stale committed length overshoots; the edit clamps instead of
        // panicking and the session keeps going.
        apply_transcript(&final_event("recovered"), &mut session, &mut doc);
        assert_eq!(doc.contents(), "recovered");

        apply_transcript(&final_event(" and more"), &mut session, &mut doc);
        assert_eq!(doc.contents(), "recovered and more");
    }

    #[test]
    fn test_one_edit_per_event_against_counting_surface() {
        struct CountingDoc {
            inner: TextDocument,
            edits: usize,
        }

        impl DocumentSurface for CountingDoc {
            fn get_cursor(&self) -> Position {
                self.inner.get_cursor()
            }
            fn replace_range(&mut self, text: &str, from: Position, to: Position) {
                self.edits += 1;
                self.inner.replace_range(text, from, to);
            }
            fn set_cursor(&mut self, pos: Position) {
                self.inner.set_cursor(pos);
            }
            fn advance_position(&self, from: Position, chars: usize) -> Position {
                self.inner.advance_position(from, chars)
            }
        }

        let mut doc = CountingDoc {
            inner: TextDocument::new(),
            edits: 0,
        };
        let mut session = DictationSession::new(Position::new(0, 0));

        apply_transcript(&partial("a"), &mut session, &mut doc);
        apply_transcript(&partial("ab"), &mut session, &mut doc);
        apply_transcript(&final_event("abc"), &mut session, &mut doc);

        assert_eq!(doc.edits, 3);
        assert_eq!(doc.inner.contents(), "abc");
    }
}
