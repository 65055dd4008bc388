//! Byte-level JSON structure scanner.
//!
//! Tracks string/escape state explicitly so that braces, brackets, and
//! commas inside string literals are never mistaken for structure. All
//! structural characters are ASCII, so byte offsets recorded here are always
//! valid `str` slice boundaries.

/// Lexical state of the scanner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanState {
    /// Outside any string literal.
    Code,
    /// Inside a string literal.
    InString,
    /// Immediately after a backslash inside a string literal.
    Escape,
}

/// Result of scanning a prefix of JSON text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct Scan {
    /// Closers still expected, innermost last.
    pub closers: Vec<u8>,
    /// Byte offset of the opening quote when the text ends inside a string.
    pub open_string_at: Option<usize>,
    /// Per open container: the last `,` inside it, or its opening
    /// `{`/`[` when it has no comma yet.
    boundaries: Vec<(usize, u8)>,
    /// Offset of the last `}` or `]` outside a string.
    pub last_close: Option<usize>,
}

impl Scan {
    pub fn ends_in_string(&self) -> bool {
        self.open_string_at.is_some()
    }

    /// Where the trailing member of the innermost open container begins.
    pub fn last_boundary(&self) -> Option<(usize, u8)> {
        self.boundaries.last().copied()
    }

    /// Closing sequence that balances the scanned text.
    pub fn closing_suffix(&self) -> String {
        self.closers.iter().rev().map(|&b| b as char).collect()
    }
}

/// Scan `text` from the start, recording structural positions.
pub(crate) fn scan(text: &str) -> Scan {
    let mut state = ScanState::Code;
    let mut out = Scan::default();

    for (i, &b) in text.as_bytes().iter().enumerate() {
        match state {
            ScanState::Code => match b {
                b'"' => {
                    state = ScanState::InString;
                    out.open_string_at = Some(i);
                }
                b'{' => {
                    out.closers.push(b'}');
                    out.boundaries.push((i, b));
                }
                b'[' => {
                    out.closers.push(b']');
                    out.boundaries.push((i, b));
                }
                b'}' | b']' => {
                    out.closers.pop();
                    out.boundaries.pop();
                    out.last_close = Some(i);
                }
                b',' => {
                    if let Some(top) = out.boundaries.last_mut() {
                        *top = (i, b);
                    }
                }
                _ => {}
            },
            ScanState::InString => match b {
                b'\\' => state = ScanState::Escape,
                b'"' => {
                    state = ScanState::Code;
                    out.open_string_at = None;
                }
                _ => {}
            },
            ScanState::Escape => state = ScanState::InString,
        }
    }

    out
}

/// Find the end of the object opened at `start` (which must hold `{`).
///
/// Returns the byte offset of the matching `}`, or `None` if the object is
/// never closed.
pub(crate) fn matching_brace(text: &str, start: usize) -> Option<usize> {
    let bytes = text.as_bytes();
    debug_assert_eq!(bytes.get(start), Some(&b'{'));

    let mut state = ScanState::Code;
    let mut depth = 0usize;

    for (offset, &b) in bytes[start..].iter().enumerate() {
        match state {
            ScanState::Code => match b {
                b'"' => state = ScanState::InString,
                b'{' => depth += 1,
                b'}' => {
                    depth -= 1;
                    if depth == 0 {
                        return Some(start + offset);
                    }
                }
                _ => {}
            },
            ScanState::InString => match b {
                b'\\' => state = ScanState::Escape,
                b'"' => state = ScanState::Code,
                _ => {}
            },
            ScanState::Escape => state = ScanState::InString,
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracks_unclosed_containers() {
        let s = scan(r#"{"a":[1,{"b":2"#);
        assert_eq!(s.closing_suffix(), "}]}");
        assert!(!s.ends_in_string());
    }

    #[test]
    fn ignores_structure_inside_strings() {
        let s = scan(r#"{"a":"{[,]}"#);
        assert!(s.ends_in_string());
        assert_eq!(s.closers, vec![b'}']);
        assert_eq!(s.last_boundary(), Some((0, b'{')));
    }

    #[test]
    fn boundary_belongs_to_innermost_open_container() {
        let s = scan(r#"{"a":[1,2],"b":{"c":1}"#);
        assert_eq!(s.last_boundary(), Some((10, b',')));

        let closed = scan(r#"{"a":[1,2]}"#);
        assert_eq!(closed.last_boundary(), None);
    }

    #[test]
    fn escaped_quote_does_not_end_string() {
        let s = scan(r#"{"a":"say \"hi\" "#);
        assert_eq!(s.open_string_at, Some(5));
    }

    #[test]
    fn escaped_backslash_before_quote_ends_string() {
        let s = scan(r#"{"a":"c:\\""#);
        assert!(!s.ends_in_string());
    }

    #[test]
    fn matching_brace_skips_string_braces() {
        let text = r#"x {"a":"}"} y"#;
        assert_eq!(matching_brace(text, 2), Some(10));
    }

    #[test]
    fn matching_brace_unclosed_is_none() {
        assert_eq!(matching_brace(r#"{"a":{"b":1}"#, 0), None);
    }
}
