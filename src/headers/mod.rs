//! Header block normalization.
//!
//! Callers hand over headers as a single CRLF/LF joined block or as a list of
//! `Name: value` lines. Both are canonicalized the way DKIM "relaxed" header
//! canonicalization does (RFC 6376 section 3.4.2): folded lines are unfolded
//! and whitespace runs collapse to one space. Names keep their original
//! casing for output, lookup is case-insensitive.

use crate::types::HeaderInput;

const CRLF: &str = "\r\n";

/// Header names the message builder consumes itself.
pub const RECOGNIZED_HEADERS: [&str; 5] = ["content-type", "from", "cc", "bcc", "reply-to"];

/// Returns true if `name` is handled by the builder rather than passed through.
pub fn is_recognized(name: &str) -> bool {
    RECOGNIZED_HEADERS
        .iter()
        .any(|known| known.eq_ignore_ascii_case(name))
}

/// A single header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderEntry {
    /// Name as first encountered.
    pub name: String,
    /// Trimmed value.
    pub value: String,
}

/// Ordered, case-insensitive header mapping with one value per name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderMap {
    entries: Vec<HeaderEntry>,
}

impl HeaderMap {
    /// Creates an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a header.
    ///
    /// A repeated name replaces the earlier value but keeps its position.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();

        match self.entries.iter_mut().find(|e| e.name.eq_ignore_ascii_case(&name)) {
            Some(entry) => entry.value = value,
            None => self.entries.push(HeaderEntry { name, value }),
        }
    }

    /// Returns the value of `name`, case-insensitively.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|e| e.name.eq_ignore_ascii_case(name))
            .map(|e| e.value.as_str())
    }

    /// Returns true if `name` is present.
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Returns the number of headers.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if there are no headers.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates `(lower-cased name, value)` pairs in order.
    pub fn iter(&self) -> impl Iterator<Item = (String, &str)> {
        self.entries
            .iter()
            .map(|e| (e.name.to_ascii_lowercase(), e.value.as_str()))
    }

    /// Iterates the headers the builder does not consume, original casing kept.
    pub fn custom(&self) -> impl Iterator<Item = &HeaderEntry> {
        self.entries.iter().filter(|e| !is_recognized(&e.name))
    }
}

/// Parses caller-supplied headers into a [`HeaderMap`].
pub fn normalize(input: &HeaderInput) -> HeaderMap {
    let block = match input {
        HeaderInput::Raw(raw) => canonicalize_relaxed(raw),
        HeaderInput::Lines(lines) => canonicalize_relaxed(&lines.join(CRLF)),
    };

    let mut map = HeaderMap::new();

    for line in block.split(CRLF).filter(|l| !l.is_empty()) {
        let (name, value) = match line.split_once(':') {
            Some(parts) => parts,
            None => {
                #[cfg(feature = "tracing")]
                tracing::debug!(line = %line, "Dropping header line without colon");
                continue;
            }
        };

        let name = name.trim();
        if name.is_empty() || name.contains(char::is_whitespace) {
            #[cfg(feature = "tracing")]
            tracing::debug!(line = %line, "Dropping header line with invalid name");
            continue;
        }

        map.insert(name, value.trim());
    }

    map
}

/// Canonicalizes a header block: CRLF line endings, unfolded continuation
/// lines, whitespace runs collapsed, lines trimmed.
pub fn canonicalize_relaxed(block: &str) -> String {
    let block = block.replace(CRLF, "\n").replace('\r', "\n");

    let mut lines: Vec<String> = Vec::new();
    for line in block.split('\n') {
        let folded = line.starts_with(' ') || line.starts_with('\t');
        match lines.last_mut() {
            Some(previous) if folded => {
                previous.push(' ');
                previous.push_str(line);
            }
            _ => lines.push(line.to_string()),
        }
    }

    lines
        .iter()
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .collect::<Vec<_>>()
        .join(CRLF)
}
