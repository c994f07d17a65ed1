//! Document editing surface
//!
//! The dictation engine writes transcripts through the small `DocumentSurface`
//! trait so the host can plug in any editor-like text store. `TextDocument` is
//! the in-memory implementation used by the CLI host and the tests.

/// A line/column position in a document
///
/// `ch` counts characters (not bytes) from the start of the line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Position {
    pub line: usize,
    pub ch: usize,
}

impl Position {
    pub fn new(line: usize, ch: usize) -> Self {
        Self { line, ch }
    }
}

/// Editing surface the synchronizer writes through
///
/// Implementations must clamp any out-of-range position to the nearest valid
/// document boundary instead of panicking; the dictation session keeps
/// running even if the document is mutated underneath it.
pub trait DocumentSurface {
    /// Current cursor position
    fn get_cursor(&self) -> Position;

    /// Replace the text in `[from, to)` with `text` as one atomic edit
    fn replace_range(&mut self, text: &str, from: Position, to: Position);

    /// Move the cursor
    fn set_cursor(&mut self, pos: Position);

    /// Advance `from` by `chars` characters of document content, clamped to
    /// the end of the document. Line breaks count as one character.
    fn advance_position(&self, from: Position, chars: usize) -> Position;
}

/// In-memory line-based text document
///
/// Always holds at least one (possibly empty) line, mirroring how editor
/// buffers treat an empty file.
#[derive(Debug, Clone)]
pub struct TextDocument {
    lines: Vec<String>,
    cursor: Position,
}

impl Default for TextDocument {
    fn default() -> Self {
        Self::new()
    }
}

impl TextDocument {
    /// Create an empty document with the cursor at the origin
    pub fn new() -> Self {
        Self {
            lines: vec![String::new()],
            cursor: Position::default(),
        }
    }

    /// Create a document from existing text, cursor at the end
    pub fn from_text(text: &str) -> Self {
        let lines: Vec<String> = text.split('\n').map(String::from).collect();
        let mut doc = Self {
            lines,
            cursor: Position::default(),
        };
        doc.cursor = doc.end_position();
        doc
    }

    /// Full document contents
    pub fn contents(&self) -> String {
        self.lines.join("\n")
    }

    /// Position just past the last character
    pub fn end_position(&self) -> Position {
        let line = self.lines.len() - 1;
        Position::new(line, self.line_len(line))
    }

    /// Clamp a position to the nearest valid location in this document
    pub fn clamp(&self, pos: Position) -> Position {
        let line = pos.line.min(self.lines.len() - 1);
        let ch = pos.ch.min(self.line_len(line));
        Position::new(line, ch)
    }

    fn line_len(&self, line: usize) -> usize {
        self.lines[line].chars().count()
    }

    /// Byte index of the `ch`-th character in `line`
    fn byte_at(line: &str, ch: usize) -> usize {
        line.char_indices().nth(ch).map(|(i, _)| i).unwrap_or(line.len())
    }

    /// Order two clamped positions so `from <= to`
    fn ordered(from: Position, to: Position) -> (Position, Position) {
        if (to.line, to.ch) < (from.line, from.ch) {
            (to, from)
        } else {
            (from, to)
        }
    }
}

impl DocumentSurface for TextDocument {
    fn get_cursor(&self) -> Position {
        self.cursor
    }

    fn replace_range(&mut self, text: &str, from: Position, to: Position) {
        let (from, to) = Self::ordered(self.clamp(from), self.clamp(to));

        let prefix_end = Self::byte_at(&self.lines[from.line], from.ch);
        let suffix_start = Self::byte_at(&self.lines[to.line], to.ch);
        let prefix = &self.lines[from.line][..prefix_end];
        let suffix = &self.lines[to.line][suffix_start..];

        let merged = format!("{}{}{}", prefix, text, suffix);
        let replacement: Vec<String> = merged.split('\n').map(String::from).collect();
        self.lines.splice(from.line..=to.line, replacement);

        self.cursor = self.clamp(self.cursor);
    }

    fn set_cursor(&mut self, pos: Position) {
        self.cursor = self.clamp(pos);
    }

    fn advance_position(&self, from: Position, chars: usize) -> Position {
        let mut pos = self.clamp(from);
        let mut remaining = chars;

        loop {
            let available = self.line_len(pos.line) - pos.ch;
            if remaining <= available {
                pos.ch += remaining;
                return pos;
            }
            if pos.line + 1 >= self.lines.len() {
                // Clamp at end of document
                pos.ch = self.line_len(pos.line);
                return pos;
            }
            // Consume the rest of the line plus its line break
            remaining -= available + 1;
            pos.line += 1;
            pos.ch = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document() {
        let doc = TextDocument::new();
        assert_eq!(doc.contents(), "");
        assert_eq!(doc.get_cursor(), Position::new(0, 0));
        assert_eq!(doc.end_position(), Position::new(0, 0));
    }

    #[test]
    fn test_from_text_cursor_at_end() {
        let doc = TextDocument::from_text("first\nsecond");
        assert_eq!(doc.get_cursor(), Position::new(1, 6));
        assert_eq!(doc.contents(), "first\nsecond");
    }

    #[test]
    fn test_replace_range_insert() {
        let mut doc = TextDocument::from_text("hello world");
        let pos = Position::new(0, 5);
        doc.replace_range(" there", pos, pos);
        assert_eq!(doc.contents(), "hello there world");
    }

    #[test]
    fn test_replace_range_shrinks_and_grows() {
        let mut doc = TextDocument::from_text("abcdef");
        doc.replace_range("XY", Position::new(0, 1), Position::new(0, 5));
        assert_eq!(doc.contents(), "aXYf");
        doc.replace_range("12345", Position::new(0, 1), Position::new(0, 3));
        assert_eq!(doc.contents(), "a12345f");
    }

    #[test]
    fn test_replace_range_multiline_text() {
        let mut doc = TextDocument::from_text("start end");
        doc.replace_range("one\ntwo", Position::new(0, 5), Position::new(0, 6));
        assert_eq!(doc.contents(), "startone\ntwoend");
    }

    #[test]
    fn test_replace_range_across_lines() {
        let mut doc = TextDocument::from_text("aaa\nbbb\nccc");
        doc.replace_range("-", Position::new(0, 2), Position::new(2, 1));
        assert_eq!(doc.contents(), "aa-cc");
    }

    #[test]
    fn test_replace_range_clamps_out_of_range() {
        let mut doc = TextDocument::from_text("short");
        doc.replace_range("!", Position::new(7, 3), Position::new(9, 9));
        assert_eq!(doc.contents(), "short!");
    }

    #[test]
    fn test_replace_range_reversed_positions() {
        let mut doc = TextDocument::from_text("abcd");
        doc.replace_range("X", Position::new(0, 3), Position::new(0, 1));
        assert_eq!(doc.contents(), "aXd");
    }

    #[test]
    fn test_advance_within_line() {
        let doc = TextDocument::from_text("hello world");
        let pos = doc.advance_position(Position::new(0, 0), 5);
        assert_eq!(pos, Position::new(0, 5));
    }

    #[test]
    fn test_advance_across_lines() {
        let doc = TextDocument::from_text("ab\ncd");
        // "ab" (2) + newline (1) + "c" (1)
        let pos = doc.advance_position(Position::new(0, 0), 4);
        assert_eq!(pos, Position::new(1, 1));
    }

    #[test]
    fn test_advance_clamps_at_end() {
        let doc = TextDocument::from_text("ab");
        let pos = doc.advance_position(Position::new(0, 0), 100);
        assert_eq!(pos, Position::new(0, 2));
    }

    #[test]
    fn test_advance_counts_chars_not_bytes() {
        let doc = TextDocument::from_text("héllo");
        let pos = doc.advance_position(Position::new(0, 0), 2);
        assert_eq!(pos, Position::new(0, 2));
    }

    #[test]
    fn test_set_cursor_clamped() {
        let mut doc = TextDocument::from_text("abc");
        doc.set_cursor(Position::new(5, 10));
        assert_eq!(doc.get_cursor(), Position::new(0, 3));
    }

    #[test]
    fn test_unicode_replace() {
        let mut doc = TextDocument::from_text("héllo wörld");
        doc.replace_range("ø", Position::new(0, 1), Position::new(0, 2));
        assert_eq!(doc.contents(), "høllo wörld");
    }
}
