//! Source positions for JSON values
//!
//! serde_json discards positions once a document is parsed, so violations are
//! located by rescanning the text and recording where each value starts.
//! Paths use the same `/key/0/key` form as schema violations, with `~` and
//! `/` inside keys written as `~0` and `~1`. Columns count bytes, as
//! serde_json's own parse errors do.

use std::borrow::Cow;
use std::collections::HashMap;

/// Escape one object key for use as a path segment.
pub(crate) fn escape_segment(key: &str) -> Cow<'_, str> {
    if key.contains(['~', '/']) {
        Cow::Owned(key.replace('~', "~0").replace('/', "~1"))
    } else {
        Cow::Borrowed(key)
    }
}

/// 1-based line and column of every value in a JSON document.
#[derive(Debug, Default)]
pub struct SourceMap {
    positions: HashMap<String, (usize, usize)>,
}

impl SourceMap {
    /// Scan `text`. Scanning stops quietly at malformed input; whatever was
    /// recorded up to that point stays usable.
    pub fn scan(text: &str) -> Self {
        let mut scanner = Scanner {
            text,
            pos: 0,
            line: 1,
            column: 1,
            positions: HashMap::new(),
        };
        let _ = scanner.value(String::new());
        Self {
            positions: scanner.positions,
        }
    }

    /// Position of `path`, falling back to the nearest recorded ancestor.
    pub fn locate(&self, path: &str) -> (usize, usize) {
        let mut current = path;
        loop {
            if let Some(position) = self.positions.get(current) {
                return *position;
            }
            match current.rfind('/') {
                Some(idx) => current = &current[..idx],
                None => return (1, 1),
            }
        }
    }
}

struct Scanner<'a> {
    text: &'a str,
    pos: usize,
    line: usize,
    column: usize,
    positions: HashMap<String, (usize, usize)>,
}

impl Scanner<'_> {
    fn peek(&self) -> Option<char> {
        self.text[self.pos..].chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += c.len_utf8();
        }
        Some(c)
    }

    fn skip_whitespace(&mut self) {
        while matches!(self.peek(), Some(' ' | '\t' | '\r' | '\n')) {
            self.bump();
        }
    }

    fn value(&mut self, path: String) -> Option<()> {
        self.skip_whitespace();
        self.positions.insert(path.clone(), (self.line, self.column));
        match self.peek()? {
            '{' => self.object(&path),
            '[' => self.array(&path),
            '"' => self.string().map(|_| ()),
            _ => {
                while !matches!(
                    self.peek(),
                    None | Some(',' | ']' | '}' | ' ' | '\t' | '\r' | '\n')
                ) {
                    self.bump();
                }
                Some(())
            }
        }
    }

    fn object(&mut self, path: &str) -> Option<()> {
        self.bump();
        self.skip_whitespace();
        if self.peek()? == '}' {
            self.bump();
            return Some(());
        }
        loop {
            self.skip_whitespace();
            let key = self.string()?;
            self.skip_whitespace();
            if self.bump()? != ':' {
                return None;
            }
            self.value(format!("{path}/{}", escape_segment(&key)))?;
            self.skip_whitespace();
            match self.bump()? {
                ',' => continue,
                '}' => return Some(()),
                _ => return None,
            }
        }
    }

    fn array(&mut self, path: &str) -> Option<()> {
        self.bump();
        self.skip_whitespace();
        if self.peek()? == ']' {
            self.bump();
            return Some(());
        }
        let mut index = 0usize;
        loop {
            self.value(format!("{path}/{index}"))?;
            index += 1;
            self.skip_whitespace();
            match self.bump()? {
                ',' => continue,
                ']' => return Some(()),
                _ => return None,
            }
        }
    }

    /// Consume a string literal and return its decoded content.
    fn string(&mut self) -> Option<String> {
        let start = self.pos;
        if self.bump()? != '"' {
            return None;
        }
        loop {
            match self.bump()? {
                '\\' => {
                    self.bump()?;
                }
                '"' => break,
                _ => {}
            }
        }
        serde_json::from_str(&self.text[start..self.pos]).ok()
    }
}
