use regex::{Captures, Regex};

/// Byte offset into an immutable template source.
///
/// Anchored operations expect patterns that begin with `\A`; they are run
/// against the unread remainder. Unanchored searches run over the whole
/// source from the current offset so that `(?m)^` still sees the text before
/// it.
#[derive(Debug, Clone)]
pub struct Cursor<'a> {
    source: &'a str,
    pos: usize,
}

impl<'a> Cursor<'a> {
    pub fn new(source: &'a str) -> Self {
        Self { source, pos: 0 }
    }

    pub fn source(&self) -> &'a str {
        self.source
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    /// Restore a position previously read with [`Cursor::pos`].
    pub fn reset(&mut self, pos: usize) {
        self.pos = pos.min(self.source.len());
    }

    pub fn is_eos(&self) -> bool {
        self.pos >= self.source.len()
    }

    pub fn at_line_start(&self) -> bool {
        self.pos == 0 || self.source.as_bytes()[self.pos - 1] == b'\n'
    }

    pub fn rest(&self) -> &'a str {
        &self.source[self.pos..]
    }

    pub fn terminate(&mut self) {
        self.pos = self.source.len();
    }

    /// Match `pattern` here and return the matched text.
    pub fn scan(&mut self, pattern: &Regex) -> Option<&'a str> {
        let rest = self.rest();
        let found = pattern.find(rest).filter(|m| m.start() == 0)?;
        self.pos += found.end();
        Some(&rest[..found.end()])
    }

    /// Like [`Cursor::scan`] but keeps capture groups.
    pub fn captures(&mut self, pattern: &Regex) -> Option<Captures<'a>> {
        let rest = self.rest();
        let caps = pattern.captures(rest)?;
        let whole = caps.get(0)?;
        if whole.start() != 0 {
            return None;
        }
        self.pos += whole.end();
        Some(caps)
    }

    pub fn skip(&mut self, pattern: &Regex) -> bool {
        self.scan(pattern).is_some()
    }

    /// Consume `literal` if the remainder starts with it.
    pub fn skip_str(&mut self, literal: &str) -> bool {
        if self.rest().starts_with(literal) {
            self.pos += literal.len();
            true
        } else {
            false
        }
    }

    /// Text up to the next match of `pattern`, leaving the cursor at the
    /// start of that match. `None` when nothing matches; nothing is consumed.
    pub fn scan_until_exclusive(&mut self, pattern: &Regex) -> Option<&'a str> {
        let found = pattern.find_at(self.source, self.pos)?;
        let text = &self.source[self.pos..found.start()];
        self.pos = found.start();
        Some(text)
    }
}
