//! EDIFACT syntax: service characters, release escaping, segment rendering,
//! and a tokenizer for reading interchanges back.
//!
//! A segment is a tag followed by data elements. Elements are separated by
//! the element separator (`+`), components within an element by the
//! component separator (`:`), and every segment ends with the terminator
//! (`'`). A literal occurrence of any service character inside data is
//! prefixed with the release character (`?`).

use std::borrow::Cow;

use thiserror::Error;

// ---------------------------------------------------------------------------
// Service characters
// ---------------------------------------------------------------------------

/// The six characters announced by the `UNA` service string advice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Separators {
    /// Component data element separator.
    pub component: char,
    /// Data element separator.
    pub element: char,
    /// Decimal mark.
    pub decimal: char,
    /// Release (escape) character.
    pub release: char,
    /// Reserved; always a space.
    pub reserved: char,
    /// Segment terminator.
    pub terminator: char,
}

impl Separators {
    /// `UNA:+.? '`, the only set the gateway emits.
    pub const STANDARD: Separators = Separators {
        component: ':',
        element: '+',
        decimal: '.',
        release: '?',
        reserved: ' ',
        terminator: '\'',
    };

    /// Renders the `UNA` service string advice, terminator included.
    pub fn service_string_advice(&self) -> String {
        format!(
            "UNA{}{}{}{}{}{}",
            self.component, self.element, self.decimal, self.release, self.reserved, self.terminator
        )
    }

    fn is_service_char(&self, c: char) -> bool {
        c == self.component || c == self.element || c == self.release || c == self.terminator
    }

    /// Prefixes every service character in `value` with the release character.
    pub fn escape<'a>(&self, value: &'a str) -> Cow<'a, str> {
        if !value.chars().any(|c| self.is_service_char(c)) {
            return Cow::Borrowed(value);
        }
        let mut escaped = String::with_capacity(value.len() + 4);
        for c in value.chars() {
            if self.is_service_char(c) {
                escaped.push(self.release);
            }
            escaped.push(c);
        }
        Cow::Owned(escaped)
    }
}

impl Default for Separators {
    fn default() -> Self {
        Self::STANDARD
    }
}

// ---------------------------------------------------------------------------
// Segment model
// ---------------------------------------------------------------------------

/// One outbound segment: a tag and its data elements, stored unescaped.
///
/// Escaping happens only in [`Segment::render`], so builders work with raw
/// values. Trailing empty components and elements are omitted on output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    tag: &'static str,
    elements: Vec<Vec<String>>,
}

impl Segment {
    /// Starts a segment with the given tag.
    pub fn new(tag: &'static str) -> Self {
        Self {
            tag,
            elements: Vec::new(),
        }
    }

    /// Appends a single-component element.
    pub fn simple(mut self, value: impl Into<String>) -> Self {
        self.elements.push(vec![value.into()]);
        self
    }

    /// Appends an element with several components.
    pub fn composite<I, S>(mut self, components: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.elements
            .push(components.into_iter().map(Into::into).collect());
        self
    }

    /// Appends a single-component element, or an empty one for `None`.
    pub fn optional(mut self, value: Option<impl Into<String>>) -> Self {
        self.elements
            .push(value.map(|v| vec![v.into()]).unwrap_or_default());
        self
    }

    /// Appends an empty element.
    pub fn empty(mut self) -> Self {
        self.elements.push(Vec::new());
        self
    }

    /// Appends the escaped wire form of the segment to `out`.
    pub fn render(&self, separators: &Separators, out: &mut String) {
        out.push_str(self.tag);

        let used = self
            .elements
            .iter()
            .rposition(|e| e.iter().any(|c| !c.is_empty()))
            .map_or(0, |last| last + 1);

        for element in &self.elements[..used] {
            out.push(separators.element);
            let width = element
                .iter()
                .rposition(|c| !c.is_empty())
                .map_or(0, |last| last + 1);
            for (index, component) in element[..width].iter().enumerate() {
                if index > 0 {
                    out.push(separators.component);
                }
                out.push_str(&separators.escape(component));
            }
        }
        out.push(separators.terminator);
    }

    /// Returns the escaped wire form of the segment.
    pub fn to_edifact(&self, separators: &Separators) -> String {
        let mut out = String::new();
        self.render(separators, &mut out);
        out
    }
}

// ---------------------------------------------------------------------------
// Tokenizer
// ---------------------------------------------------------------------------

/// Errors raised while tokenizing an interchange.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SyntaxError {
    /// Input ended inside a segment (missing terminator).
    #[error("Unterminated segment starting at byte {offset}")]
    UnterminatedSegment {
        /// Byte offset where the unterminated segment starts.
        offset: usize,
    },

    /// Input ended directly after a release character.
    #[error("Release character at end of input")]
    DanglingRelease,

    /// A segment had no tag.
    #[error("Segment {index} has no tag")]
    MissingTag {
        /// Zero-based segment position.
        index: usize,
    },

    /// The `UNA` advice was shorter than six characters.
    #[error("Truncated UNA service string advice")]
    InvalidServiceStringAdvice,
}

/// A segment read back from an interchange, with release escapes removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedSegment {
    /// Segment tag.
    pub tag: String,
    /// Elements, each a list of components.
    pub elements: Vec<Vec<String>>,
}

impl ParsedSegment {
    /// Element at `index` (zero-based, tag excluded).
    pub fn element(&self, index: usize) -> Option<&[String]> {
        self.elements.get(index).map(Vec::as_slice)
    }

    /// Component `component` of element `element`.
    pub fn component(&self, element: usize, component: usize) -> Option<&str> {
        self.elements
            .get(element)
            .and_then(|e| e.get(component))
            .map(String::as_str)
    }
}

/// Splits an interchange into segments.
///
/// A leading `UNA` advice overrides the default separators and is returned
/// as a segment with tag `UNA` and no elements. Line breaks between
/// segments are ignored.
pub fn parse_segments(input: &str) -> Result<Vec<ParsedSegment>, SyntaxError> {
    let mut separators = Separators::STANDARD;
    let mut segments = Vec::new();
    let mut rest = input.trim_start();
    let mut offset = input.len() - rest.len();

    if let Some(advice) = rest.strip_prefix("UNA") {
        let chars: Vec<char> = advice.chars().take(6).collect();
        if chars.len() < 6 {
            return Err(SyntaxError::InvalidServiceStringAdvice);
        }
        separators = Separators {
            component: chars[0],
            element: chars[1],
            decimal: chars[2],
            release: chars[3],
            reserved: chars[4],
            terminator: chars[5],
        };
        let consumed = 3 + chars.iter().map(|c| c.len_utf8()).sum::<usize>();
        segments.push(ParsedSegment {
            tag: "UNA".to_string(),
            elements: Vec::new(),
        });
        rest = &rest[consumed..];
        offset += consumed;
    }

    let mut tag = String::new();
    let mut elements: Vec<Vec<String>> = Vec::new();
    let mut component = String::new();
    let mut in_tag = true;
    let mut started = false;
    let mut segment_start = offset;
    let mut chars = rest.char_indices();

    while let Some((position, c)) = chars.next() {
        if !started {
            if c == '\r' || c == '\n' {
                continue;
            }
            started = true;
            segment_start = offset + position;
        }

        if c == separators.release {
            let Some((_, literal)) = chars.next() else {
                return Err(SyntaxError::DanglingRelease);
            };
            if in_tag {
                tag.push(literal);
            } else {
                component.push(literal);
            }
        } else if c == separators.terminator {
            if !in_tag {
                push_component(&mut elements, &mut component);
            }
            let trimmed = tag.trim();
            if trimmed.is_empty() {
                return Err(SyntaxError::MissingTag {
                    index: segments.len(),
                });
            }
            segments.push(ParsedSegment {
                tag: trimmed.to_string(),
                elements: std::mem::take(&mut elements),
            });
            tag.clear();
            in_tag = true;
            started = false;
        } else if c == separators.element {
            if in_tag {
                in_tag = false;
            } else {
                push_component(&mut elements, &mut component);
            }
            elements.push(Vec::new());
        } else if c == separators.component && !in_tag {
            match elements.last_mut() {
                Some(element) => element.push(std::mem::take(&mut component)),
                None => elements.push(vec![std::mem::take(&mut component)]),
            }
        } else if in_tag {
            tag.push(c);
        } else {
            component.push(c);
        }
    }

    if started {
        return Err(SyntaxError::UnterminatedSegment {
            offset: segment_start,
        });
    }
    Ok(segments)
}

fn push_component(elements: &mut [Vec<String>], component: &mut String) {
    if let Some(element) = elements.last_mut() {
        element.push(std::mem::take(component));
    }
}
